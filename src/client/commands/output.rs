//! Rendering command results as tables or JSON.

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

pub const FORMAT_JSON: &str = "json";

pub fn is_json(format: &str) -> bool {
    format == FORMAT_JSON
}

/// Pretty-print `value` as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T, label: &str) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing {} to JSON: {}", label, e),
    }
}

/// Print `{ "<key>": value }`.
pub fn print_json_wrapped<T: Serialize + ?Sized>(key: &str, value: &T, label: &str) {
    print_json(&serde_json::json!({ key: value }), label);
}

/// Print a table followed by the number of rows.
pub fn display_table_with_count<T: Tabled>(rows: &[T], label: &str) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
    println!("Total: {} {}", rows.len(), label);
}
