use miette::Diagnostic;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_with::DeserializeFromStr;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// The name of a Python distribution.
///
/// Keeps the spelling the name was parsed from next to the normalized form
/// described in [PEP 503](https://peps.python.org/pep-0503/#normalized-names).
/// Comparison, ordering and hashing all go through the normalized form, the
/// original spelling is only used for display purposes.
#[derive(Debug, Clone, Eq, DeserializeFromStr)]
pub struct PackageName {
    /// The spelling this instance was parsed from.
    source: Box<str>,

    /// Normalized form of `source`.
    normalized: Box<str>,
}

impl PackageName {
    /// Returns the name as it was originally spelled.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// Returns the normalized form of the name.
    pub fn as_str(&self) -> &str {
        self.normalized.as_ref()
    }
}

/// Error when parsing a package name.
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParsePackageNameError {
    #[error("invalid package name '{0}'")]
    InvalidPackageName(String),
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static NAME_VALIDATE: OnceLock<Regex> = OnceLock::new();
        let name_validate = NAME_VALIDATE.get_or_init(|| {
            // https://packaging.python.org/specifications/core-metadata/#name
            Regex::new(r"(?i-u)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$").unwrap()
        });

        if !name_validate.is_match(s) {
            return Err(ParsePackageNameError::InvalidPackageName(s.into()));
        }

        Ok(PackageName {
            source: s.to_owned().into_boxed_str(),
            normalized: normalize(s).into_boxed_str(),
        })
    }
}

/// Lowercases the name and collapses runs of `-`, `_` and `.` into a single
/// dash, per PEP 503.
fn normalize(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut last_was_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_was_separator {
                normalized.push('-');
            }
            last_was_separator = true;
        } else {
            normalized.extend(c.to_lowercase());
            last_was_separator = false;
        }
    }
    normalized
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized.eq(&other.normalized)
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Serialize for PackageName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.source.as_ref().serialize(serializer)
    }
}

/// A package name that only exists in its normalized form. Guaranteed to
/// follow [PEP 503 (Normalized Names)](https://peps.python.org/pep-0503/#normalized-names).
///
/// This is the key type used everywhere packages are compared or looked up.
#[repr(transparent)]
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, DeserializeFromStr)]
pub struct NormalizedPackageName(Box<str>);

impl From<PackageName> for NormalizedPackageName {
    fn from(value: PackageName) -> Self {
        Self(value.normalized)
    }
}

impl From<NormalizedPackageName> for PackageName {
    fn from(value: NormalizedPackageName) -> Self {
        Self {
            source: value.0.clone(),
            normalized: value.0,
        }
    }
}

impl Display for NormalizedPackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NormalizedPackageName {
    /// Returns a string reference.
    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl FromStr for NormalizedPackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PackageName::from_str(s)?.into())
    }
}

impl Borrow<str> for NormalizedPackageName {
    fn borrow(&self) -> &str {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalization() {
        let name1: PackageName = "Charset-Normalizer".parse().unwrap();
        assert_eq!(name1.as_source_str(), "Charset-Normalizer");
        assert_eq!(name1.as_str(), "charset-normalizer");

        let name2: PackageName = "charset_normalizer".parse().unwrap();
        assert_eq!(name2.as_str(), "charset-normalizer");
        assert_eq!(name1, name2);

        let name3: PackageName = "charset.__.normalizer".parse().unwrap();
        assert_eq!(name3.as_str(), "charset-normalizer");

        let other: PackageName = "charset-normalizer2".parse().unwrap();
        assert_ne!(name1, other);
    }

    #[test]
    fn rejects_invalid_names() {
        assert!("".parse::<PackageName>().is_err());
        assert!("-leading-dash".parse::<PackageName>().is_err());
        assert!("trailing-dash-".parse::<PackageName>().is_err());
        assert!("spaces in name".parse::<PackageName>().is_err());
    }
}
