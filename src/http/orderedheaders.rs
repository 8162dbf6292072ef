use crate::base::neterror::NetError;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use std::str::FromStr;

/// A header multimap that strictly preserves insertion order.
///
/// A name may carry several values; values are kept in the order they were
/// added, and the relative order of different names is preserved too. Both
/// request serialization and response parsing go through this type, so the
/// order seen on the wire is the order seen by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedHeaderMap {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl OrderedHeaderMap {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    /// Set `name` to a single value.
    ///
    /// Update in place if the name exists (the first occurrence keeps its
    /// position, later occurrences are dropped), else append.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let (name, value) = Self::parse_pair(name, value)?;
        self.insert_typed(name, value);
        Ok(())
    }

    /// Add another value for `name` after any existing ones.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let (name, value) = Self::parse_pair(name, value)?;
        self.headers.push((name, value));
        Ok(())
    }

    pub fn insert_typed(&mut self, name: HeaderName, value: HeaderValue) {
        match self.headers.iter().position(|(n, _)| *n == name) {
            Some(first) => {
                self.headers[first].1 = value;
                let mut idx = 0;
                self.headers.retain(|(n, _)| {
                    let keep = idx <= first || *n != name;
                    idx += 1;
                    keep
                });
            }
            None => self.headers.push((name, value)),
        }
    }

    pub fn append_typed(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push((name, value));
    }

    pub fn remove(&mut self, name: &str) {
        if let Ok(target) = HeaderName::from_str(name) {
            self.headers.retain(|(n, _)| *n != target);
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        let target = HeaderName::from_str(name).ok()?;
        self.headers
            .iter()
            .find(|(n, _)| *n == target)
            .map(|(_, v)| v)
    }

    /// First value for `name` as a string, if it is visible ASCII.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        let target = HeaderName::from_str(name).ok();
        self.headers
            .iter()
            .filter(move |(n, _)| target.as_ref() == Some(n))
            .map(|(_, v)| v)
    }

    /// All values for `name`, each split on commas, trimmed, in order.
    ///
    /// `animals: mole, hedgehog` followed by `animals: bat` yields
    /// `["mole", "hedgehog", "bat"]`.
    pub fn get_all_split(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any value of `name` contains `token` as a comma-separated
    /// element, compared case-insensitively.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter().map(|(n, v)| (n, v))
    }

    /// Number of header lines (not distinct names).
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Consumes the map and returns a standard http::HeaderMap.
    /// Note: http::HeaderMap keeps per-name value order but groups by name.
    pub fn to_header_map(self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            map.append(name, value);
        }
        map
    }

    fn parse_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), NetError> {
        let name = HeaderName::from_str(name).map_err(|_| NetError::InvalidHeader)?;
        let value = HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)?;
        Ok((name, value))
    }
}
