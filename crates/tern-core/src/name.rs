//! Normalized package and extra names.
//!
//! Names compare case-insensitively with runs of `-`, `_` and `.` treated as
//! a single `-`. The normalized form is what gets stored, hashed and
//! serialized, so `Foo_Bar` and `foo-bar` are the same package everywhere.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ConstraintError;

/// A normalized package name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageName(String);

/// A normalized extra (optional dependency group) or dependency-group name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtraName(String);

/// Lowercase and collapse separator runs. Idempotent.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.extend(ch.to_lowercase());
    }
    out
}

fn validate(raw: &str) -> Result<String, ConstraintError> {
    let trimmed = raw.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && trimmed
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
        && trimmed
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(normalize(trimmed))
    } else {
        Err(ConstraintError::Name(raw.to_string()))
    }
}

macro_rules! normalized_name {
    ($ty:ident) => {
        impl $ty {
            pub fn new(raw: &str) -> Result<Self, ConstraintError> {
                validate(raw).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = ConstraintError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::new(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

normalized_name!(PackageName);
normalized_name!(ExtraName);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_separators() {
        let n = PackageName::new("Foo__Bar.baz").unwrap();
        assert_eq!(n.as_str(), "foo-bar-baz");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize("Zope.Interface");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn equivalent_spellings_are_equal() {
        assert_eq!(
            PackageName::new("typing_extensions").unwrap(),
            PackageName::new("Typing-Extensions").unwrap()
        );
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(PackageName::new("").is_err());
        assert!(PackageName::new("-leading").is_err());
        assert!(PackageName::new("has space").is_err());
    }
}
