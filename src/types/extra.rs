// The format of extra names is underspecified. pip runs them through
// pkg_resources.safe_extra, PEP 685 normalizes them like package names, and
// published metadata contains all sorts of historical spellings. Normalizing
// the same way as package names matches what the wider ecosystem converged on.

use serde::{Serialize, Serializer};
use serde_with::DeserializeFromStr;
use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// The name of an optional dependency group (an "extra") of a package.
///
/// Stores the original spelling for display and the normalized form for
/// comparison, just like [`super::PackageName`].
#[derive(Debug, Clone, Eq, DeserializeFromStr)]
pub struct Extra {
    /// The spelling this instance was parsed from.
    source: Box<str>,

    /// Normalized form of `source`.
    normalized: Box<str>,
}

impl Extra {
    /// Returns the extra name as it was originally spelled.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// Returns the normalized form of the extra name.
    pub fn as_str(&self) -> &str {
        self.normalized.as_ref()
    }
}

impl FromStr for Extra {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut normalized = s.replace(['-', '_', '.'], "-");
        while normalized.contains("--") {
            normalized = normalized.replace("--", "-");
        }
        normalized.make_ascii_lowercase();

        Ok(Self {
            source: s.to_owned().into_boxed_str(),
            normalized: normalized.into_boxed_str(),
        })
    }
}

impl Display for Extra {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Hash for Extra {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialEq for Extra {
    fn eq(&self, other: &Self) -> bool {
        self.normalized.eq(&other.normalized)
    }
}

impl PartialOrd for Extra {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Extra {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Serialize for Extra {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.source.as_ref().serialize(serializer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalization() {
        let a: Extra = "Dev_Tools".parse().unwrap();
        let b: Extra = "dev-tools".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "dev-tools");
        assert_eq!(a.as_source_str(), "Dev_Tools");
    }
}
