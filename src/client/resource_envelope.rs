//! Resource envelope for chained jobs.
//!
//! A chain runs its subjobs one after another inside a single scheduler slot, so the
//! slot must satisfy the largest request of every subjob. The envelope keeps, for each
//! `request_*` directive, the maximum integer seen across all merged descriptions.

use log::debug;
use serde::Serialize;

use crate::client::errors::{ProdError, Result};

/// Elementwise maximum of resource requests, in first-seen key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceEnvelope {
    requests: Vec<(String, u64)>,
}

impl ResourceEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one request into the envelope.
    pub fn absorb(&mut self, key: &str, value: &str) -> Result<()> {
        let parsed = parse_request(key, value)?;
        let key = key.to_lowercase();
        match self.requests.iter_mut().find(|(k, _)| *k == key) {
            Some((_, current)) => {
                if parsed > *current {
                    debug!("Raising {} from {} to {}", key, current, parsed);
                    *current = parsed;
                }
            }
            None => self.requests.push((key, parsed)),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        let key = key.to_lowercase();
        self.requests
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.requests.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Parse a resource request value as a non-negative integer.
pub fn parse_request(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ProdError::MalformedResourceValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_takes_maximum() {
        let mut envelope = ResourceEnvelope::new();
        envelope.absorb("request_memory", "2000").unwrap();
        envelope.absorb("request_cpus", "1").unwrap();
        envelope.absorb("request_memory", "4000").unwrap();
        envelope.absorb("REQUEST_CPUS", "4").unwrap();
        envelope.absorb("request_memory", "3000").unwrap();
        assert_eq!(envelope.get("request_memory"), Some(4000));
        assert_eq!(envelope.get("request_cpus"), Some(4));
        let keys: Vec<&str> = envelope.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["request_memory", "request_cpus"]);
    }

    #[test]
    fn test_envelope_independent_of_order() {
        let values = ["100", "7", "2500", "42"];
        let mut forward = ResourceEnvelope::new();
        let mut backward = ResourceEnvelope::new();
        for v in values {
            forward.absorb("request_disk", v).unwrap();
        }
        for v in values.iter().rev() {
            backward.absorb("request_disk", v).unwrap();
        }
        assert_eq!(forward.get("request_disk"), Some(2500));
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_malformed_value() {
        let mut envelope = ResourceEnvelope::new();
        let err = envelope.absorb("request_memory", "2GB").unwrap_err();
        assert!(matches!(err, ProdError::MalformedResourceValue { .. }));
        assert!(envelope.is_empty());
    }
}
