//! Header multimap exchanged during the handshake.

use std::collections::BTreeMap;
use std::fmt;

/// Case-sensitive multimap of header names to trimmed values.
///
/// Names are stored exactly as received. Values for a repeated name keep
/// their insertion order; the order of distinct names is not significant and
/// iteration yields them sorted so written header blocks are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Appends a value under `name`, keeping any existing values.
    ///
    /// The value is trimmed of surrounding whitespace.
    pub fn add(&mut self, name: impl Into<String>, value: impl AsRef<str>) {
        self.entries
            .entry(name.into())
            .or_default()
            .push(value.as_ref().trim().to_owned());
    }

    /// Replaces every value under `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl AsRef<str>) {
        self.entries
            .insert(name.into(), vec![value.as_ref().trim().to_owned()]);
    }

    /// Returns the first value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value stored under `name` in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries.get(name).map_or(&[][..], Vec::as_slice)
    }

    /// Returns true when `name` has at least one value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over every `(name, value)` pair, one item per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: AsRef<str>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(formatter, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
