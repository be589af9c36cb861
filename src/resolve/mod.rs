//! The resolver: a single-assignment, round-based expansion loop over a
//! work set of merged requirements.

mod error;
mod graph;
mod requirement_queue;
mod solve;
mod solve_options;
mod version_select;

pub use error::{ResolveError, TriedVersions, VersionReasons};
pub use graph::{DependencyEdge, LockedPackage, SolutionGraph, SolutionNode};
pub use requirement_queue::RequiredBy;
pub use solve::resolve;
pub use solve_options::{PreReleaseResolution, ProvidedMetadata, ResolveOptions};

use crate::resolve::error::ResolveError as Error;
use crate::types::{Extra, NormalizedPackageName, PackageName, Requirement, VersionSpecifier};
use pep508_rs::{MarkerTree, VersionOrUrl};
use std::collections::BTreeSet;
use std::str::FromStr;
use url::Url;

/// A PEP 508 requirement broken down into the pieces the resolver works
/// with: canonical name, canonical extras, individual specifier clauses and
/// an optional direct-URL pin.
#[derive(Debug, Clone)]
pub struct NormalizedRequirement {
    /// The package name as spelled in the requirement.
    pub display_name: PackageName,

    /// The requested extras, canonicalized.
    pub extras: BTreeSet<Extra>,

    /// The specifier clauses of the requirement.
    pub specifiers: Vec<VersionSpecifier>,

    /// The direct-URL pin, when the requirement uses `name @ url`.
    pub url: Option<Url>,

    /// The environment marker, when present.
    pub marker: Option<MarkerTree>,
}

impl NormalizedRequirement {
    /// The canonical name of the required package.
    pub fn name(&self) -> NormalizedPackageName {
        self.display_name.clone().into()
    }

    /// Breaks a parsed PEP 508 requirement down.
    pub fn from_requirement(requirement: &Requirement) -> Result<Self, Error> {
        let display_name =
            PackageName::from_str(&requirement.name).map_err(|source| Error::InvalidRequirement {
                requirement: requirement.to_string(),
                source,
            })?;

        let extras = requirement
            .extras
            .iter()
            .flatten()
            .map(|extra| extra.parse().expect("extra parsing is infallible"))
            .collect();

        let (specifiers, url) = match &requirement.version_or_url {
            None => (Vec::new(), None),
            Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
                (specifiers.iter().cloned().collect(), None)
            }
            Some(VersionOrUrl::Url(url)) => (Vec::new(), Some(url.clone())),
        };

        Ok(Self {
            display_name,
            extras,
            specifiers,
            url,
            marker: requirement.marker.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn requirement_breakdown() {
        let requirement: Requirement = "Black[D,jupyter]>=23.0,<24; python_version >= \"3.8\""
            .parse()
            .unwrap();
        let normalized = NormalizedRequirement::from_requirement(&requirement).unwrap();
        assert_eq!(normalized.name().as_str(), "black");
        assert_eq!(normalized.extras.len(), 2);
        assert_eq!(normalized.specifiers.len(), 2);
        assert!(normalized.url.is_none());
        assert!(normalized.marker.is_some());
    }

    #[test]
    fn direct_url_breakdown() {
        let requirement: Requirement = "pip @ https://github.com/pypa/pip/archive/22.0.2.zip"
            .parse()
            .unwrap();
        let normalized = NormalizedRequirement::from_requirement(&requirement).unwrap();
        assert!(normalized.url.is_some());
        assert!(normalized.specifiers.is_empty());
    }
}
