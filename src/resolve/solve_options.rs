//! Options that influence the [`super::resolve`] function. The defaults are
//! sensible for talking to a public registry; construct the struct and
//! override what you need.

use crate::types::{NormalizedPackageName, PackageMetadata, PackageName, Requirement};
use pep508_rs::VersionOrUrl;
use std::collections::HashMap;
use std::str::FromStr;
use url::Url;

/// How pre-release versions are treated during version selection.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PreReleaseResolution {
    /// Never select a pre-release.
    Disallow,

    /// Allow pre-releases only where something opted in. This mirrors pip's
    /// behavior rather than the letter of PEP 440, because pip's behavior is
    /// what the ecosystem expects:
    ///
    /// - a specifier that itself mentions a pre-release (`foo==4.1.0b0`)
    ///   enables pre-releases for that package,
    /// - a package that has published nothing but pre-releases may resolve
    ///   to one,
    /// - packages named in `allow_names` (usually derived from the root
    ///   requirements) allow pre-releases anywhere in the tree.
    AllowIfNoOtherVersionsOrEnabled {
        /// Packages for which pre-releases are globally enabled.
        allow_names: Vec<NormalizedPackageName>,
    },

    /// Any pre-release may be selected.
    Allow,
}

impl Default for PreReleaseResolution {
    fn default() -> Self {
        PreReleaseResolution::AllowIfNoOtherVersionsOrEnabled {
            allow_names: Vec::new(),
        }
    }
}

impl PreReleaseResolution {
    /// Derives the conditional policy from a set of root requirements:
    /// packages whose root specifier mentions a pre-release get pre-releases
    /// enabled for the whole resolution.
    pub fn from_requirements(requirements: &[Requirement]) -> Self {
        let mut allow_names = Vec::new();
        for requirement in requirements {
            if let Some(VersionOrUrl::VersionSpecifier(specifiers)) = &requirement.version_or_url {
                if specifiers.iter().any(|s| s.version().any_prerelease()) {
                    if let Ok(name) = PackageName::from_str(&requirement.name) {
                        allow_names.push(name.into());
                    }
                }
            }
        }
        PreReleaseResolution::AllowIfNoOtherVersionsOrEnabled { allow_names }
    }
}

/// Caller-supplied metadata for a requirement that pins a direct URL
/// (`name @ https://...`). Version selection is bypassed for such pins, so
/// the resolver cannot consult the registry for them; whoever introduces the
/// pin supplies the metadata.
#[derive(Debug, Clone)]
pub struct ProvidedMetadata {
    /// The pinned URL.
    pub url: Url,

    /// The dependency metadata of the artifact behind the URL.
    pub metadata: PackageMetadata,
}

/// Additional knobs for the resolver. `Default::default()` gives sane
/// behavior; the `with_` methods tweak individual fields.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// How pre-release versions are treated.
    pub pre_release_resolution: PreReleaseResolution,

    /// Upper bound on concurrently running metadata and file-listing
    /// fetches.
    pub max_concurrent_fetches: usize,

    /// Metadata for direct-URL requirements, keyed by package name.
    pub direct_url_metadata: HashMap<NormalizedPackageName, ProvidedMetadata>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            pre_release_resolution: PreReleaseResolution::default(),
            max_concurrent_fetches: 16,
            direct_url_metadata: HashMap::new(),
        }
    }
}

impl ResolveOptions {
    /// Sets the pre-release policy.
    pub fn with_pre_release_resolution(mut self, policy: PreReleaseResolution) -> Self {
        self.pre_release_resolution = policy;
        self
    }

    /// Sets the fetch parallelism bound.
    pub fn with_max_concurrent_fetches(mut self, bound: usize) -> Self {
        self.max_concurrent_fetches = bound.max(1);
        self
    }

    /// Registers metadata for a direct-URL requirement.
    pub fn with_direct_url_metadata(
        mut self,
        name: NormalizedPackageName,
        provided: ProvidedMetadata,
    ) -> Self {
        self.direct_url_metadata.insert(name, provided);
        self
    }
}
