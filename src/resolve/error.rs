use crate::index::{IndexError, MetadataError};
use crate::types::{NormalizedPackageName, ParsePackageNameError, Version};
use miette::Diagnostic;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use url::Url;

/// Per-version reasons why no candidate survived selection.
#[derive(Debug)]
pub struct VersionReasons(pub Vec<(Version, String)>);

impl Display for VersionReasons {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (version, reason) in &self.0 {
            write!(f, "\n  - {version}: {reason}")?;
        }
        Ok(())
    }
}

/// The versions that matched the requested specifiers before being rejected.
#[derive(Debug)]
pub struct TriedVersions(pub Vec<Version>);

impl Display for TriedVersions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for version in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{version}")?;
            first = false;
        }
        Ok(())
    }
}

/// The ways a resolution can fail. The first fatal error aborts the whole
/// resolution; a missing dependency is never silently dropped.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    /// The combined specifiers on a package exclude every published version.
    #[error(
        "the requirements on {name} cannot be satisfied: no published version matches {constraints} (candidates that matched: {tried})"
    )]
    VersionConflict {
        /// The package.
        name: NormalizedPackageName,
        /// The merged specifier set, for display.
        constraints: String,
        /// Versions that matched the specifiers but were rejected anyway.
        tried: TriedVersions,
    },

    /// Versions matched the specifiers but every one of them was rejected,
    /// typically because of `Requires-Python` or yanking.
    #[error("no usable version of {name}:{reasons}")]
    NoCompatibleVersion {
        /// The package.
        name: NormalizedPackageName,
        /// Why each candidate version was rejected.
        reasons: VersionReasons,
    },

    /// A requirement pinned a direct URL but the caller registered no
    /// metadata for it.
    #[error("{name} is pinned to {url}, but no metadata was provided for that URL")]
    MissingDirectUrlMetadata {
        /// The package.
        name: NormalizedPackageName,
        /// The pinned URL.
        url: Url,
    },

    /// A requirement string carried a name we cannot work with.
    #[error("invalid requirement '{requirement}'")]
    InvalidRequirement {
        /// The offending requirement, for display.
        requirement: String,
        /// The underlying parse error.
        #[source]
        source: ParsePackageNameError,
    },

    /// Fetching a file listing failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    /// Obtaining release metadata failed on every tier, or an sdist build
    /// failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Metadata(#[from] MetadataError),

    /// Context wrapper recording how resolution arrived at the package that
    /// failed.
    #[error("failed to resolve {name} (required via {chain})")]
    Dependency {
        /// The failing package.
        name: NormalizedPackageName,
        /// The requirement chain from a root, for display.
        chain: String,
        /// The underlying failure.
        #[source]
        source: Box<ResolveError>,
    },
}
