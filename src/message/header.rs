//! Multi-valued metadata map carried next to every message body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Header carrying propagation metadata (request ids, trace context).
///
/// Keys are stored in canonical form (`x-trace-id` becomes `X-Trace-Id`), so
/// lookups are case-insensitive. Values keep their insertion order per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(BTreeMap<String, Vec<String>>);

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to the key.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.0.entry(canonical_key(key)).or_default().push(value.into());
    }

    /// Replace every value of the key with a single value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(canonical_key(key), vec![value.into()]);
    }

    /// First value of the key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(&canonical_key(key))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of the key in insertion order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0
            .get(&canonical_key(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&canonical_key(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(&canonical_key(key))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Copy every entry of `other` into this header, replacing keys present in both.
    pub fn merge(&mut self, other: &Header) {
        for (key, values) in &other.0 {
            self.0.insert(key.clone(), values.clone());
        }
    }
}

/// Canonical MIME-style header key.
///
/// Keys containing bytes that are not valid header token characters are left untouched.
pub fn canonical_key(key: &str) -> String {
    if !key.bytes().all(is_token_byte) {
        return key.to_string();
    }
    let mut upper = true;
    key.chars()
        .map(|c| {
            let out = if upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() };
            upper = c == '-';
            out
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_canonicalized() {
        assert_eq!(canonical_key("uber-trace-id"), "Uber-Trace-Id");
        assert_eq!(canonical_key("CONTENT-TYPE"), "Content-Type");
        assert_eq!(canonical_key("bad key"), "bad key");
    }

    #[test]
    fn multi_values_keep_order() {
        let mut header = Header::new();
        header.add("x-hop", "a");
        header.add("X-Hop", "b");
        header.add("x-HOP", "c");
        assert_eq!(header.get_all("X-Hop"), ["a", "b", "c"]);
        assert_eq!(header.get("x-hop"), Some("a"));

        header.set("x-hop", "z");
        assert_eq!(header.get_all("x-hop"), ["z"]);
        assert!(header.get_all("missing").is_empty());
    }

    #[test]
    fn merge_overrides_shared_keys() {
        let mut base = Header::new();
        base.set("a", "1");
        base.set("b", "2");
        let mut other = Header::new();
        other.add("b", "3");
        other.add("b", "4");
        base.merge(&other);
        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(base.get_all("b"), ["3", "4"]);
    }
}
