//! Typed view of a job's argument string.

use std::fmt;

/// Ordered argument tokens of a scheduled job.
///
/// Parsed from the scheduler's `Args`/`Arguments` attribute; double quotes are
/// stripped and single-quoted groups form one token. Serialisation follows the
/// scheduler's new-style quoting: the whole string in double quotes, tokens with
/// whitespace in single quotes, embedded quotes doubled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentList {
    tokens: Vec<String>,
}

impl ArgumentList {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let raw = raw
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(raw)
            .replace("\"\"", "\"");

        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut in_group = false;
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\'' if in_group && chars.peek() == Some(&'\'') => {
                    chars.next();
                    current.push('\'');
                }
                '\'' => in_group = !in_group,
                '"' => {}
                c if c.is_whitespace() && !in_group => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Value following `flag`, if the flag is present and has one.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        let idx = self.tokens.iter().position(|t| t == flag)?;
        self.tokens.get(idx + 1).map(String::as_str)
    }

    /// Replace the value following `flag`, or append `flag value`.
    pub fn set(&mut self, flag: &str, value: impl Into<String>) {
        let value = value.into();
        match self.tokens.iter().position(|t| t == flag) {
            Some(idx) if idx + 1 < self.tokens.len() => self.tokens[idx + 1] = value,
            Some(_) => self.tokens.push(value),
            None => {
                self.tokens.push(flag.to_string());
                self.tokens.push(value);
            }
        }
    }

    pub fn push(&mut self, token: impl Into<String>) {
        self.tokens.push(token.into());
    }

    /// Quoted form suitable for a scheduler attribute edit.
    pub fn to_scheduler_value(&self) -> String {
        let body = self
            .tokens
            .iter()
            .map(|t| quote_token(t))
            .collect::<Vec<_>>()
            .join(" ");
        format!("\"{}\"", body.replace('"', "\"\""))
    }
}

fn quote_token(token: &str) -> String {
    if token.chars().any(char::is_whitespace) || token.contains('\'') {
        format!("'{}'", token.replace('\'', "''"))
    } else {
        token.to_string()
    }
}

impl fmt::Display for ArgumentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_quotes() {
        let args = ArgumentList::parse("\"-S step1.sh -x root://eos.cern.ch/ -N 5\"");
        assert_eq!(
            args.tokens(),
            &["-S", "step1.sh", "-x", "root://eos.cern.ch/", "-N", "5"]
        );
        assert_eq!(args.value_of("-x"), Some("root://eos.cern.ch/"));
        assert_eq!(args.value_of("-q"), None);
    }

    #[test]
    fn test_single_quoted_group_is_one_token() {
        let args = ArgumentList::parse("-E 'cmssw-el7 --bind /cvmfs' -I");
        assert_eq!(args.tokens(), &["-E", "cmssw-el7 --bind /cvmfs", "-I"]);
        assert_eq!(
            args.to_scheduler_value(),
            "\"-E 'cmssw-el7 --bind /cvmfs' -I\""
        );
    }

    #[test]
    fn test_set_replaces_existing_value() {
        let mut args = ArgumentList::parse("-x root://old/ -N 5");
        args.set("-x", "root://new/");
        assert_eq!(args.to_string(), "-x root://new/ -N 5");
    }

    #[test]
    fn test_set_appends_missing_flag() {
        let mut args = ArgumentList::parse("-N 5");
        args.set("-x", "root://new/");
        assert_eq!(args.to_string(), "-N 5 -x root://new/");

        let mut dangling = ArgumentList::parse("-N 5 -x");
        dangling.set("-x", "root://new/");
        assert_eq!(dangling.to_string(), "-N 5 -x root://new/");
    }

    #[test]
    fn test_round_trip_through_scheduler_value() {
        let mut args = ArgumentList::parse("-a 'it''s here' -b");
        assert_eq!(args.tokens(), &["-a", "it's here", "-b"]);
        args.push("-c");
        let reparsed = ArgumentList::parse(&args.to_scheduler_value());
        assert_eq!(reparsed, args);
    }
}
