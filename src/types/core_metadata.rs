use crate::types::{
    Extra, MetadataFields, MetadataFieldsError, PackageName, ParsePackageNameError,
};
use once_cell::sync::Lazy;
use pep440_rs::{Pep440Error, Version, VersionSpecifiers};
use pep508_rs::Requirement;
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

/// The dependency-relevant subset of a distribution's core metadata.
///
/// This is what the resolver consumes, regardless of whether the information
/// came from a release JSON document, a PEP 658 metadata file, or a freshly
/// built source distribution. Only the fields that feed into resolution are
/// retained.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    /// The distribution name as recorded in the metadata.
    pub name: PackageName,

    /// The version of the release.
    pub version: Version,

    /// The dependencies of the release (the `Requires-Dist` fields).
    pub requires_dist: Vec<Requirement>,

    /// Interpreter versions this release supports (`Requires-Python`).
    pub requires_python: Option<VersionSpecifiers>,

    /// Extras the release declares (`Provides-Extra`).
    pub provides_extras: HashSet<Extra>,
}

/// Error produced while interpreting a core-metadata document.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum PackageMetadataError {
    #[error(transparent)]
    ParseError(#[from] MetadataFieldsError),

    #[error("invalid Metadata-Version: {0}")]
    InvalidMetadataVersion(String),

    #[error("unsupported Metadata-Version {0}")]
    UnsupportedMetadataVersion(Version),

    #[error("invalid Version: {0}")]
    InvalidVersion(String),

    #[error("invalid Requires-Python: {0}")]
    InvalidRequiresPython(#[source] Pep440Error),

    #[error(transparent)]
    InvalidPackageName(#[from] ParsePackageNameError),
}

impl TryFrom<&[u8]> for PackageMetadata {
    type Error = PackageMetadataError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        // Mangled utf-8 exists on PyPI, replacement characters only ever land
        // in fields we don't interpret.
        let input = String::from_utf8_lossy(value);
        let mut parsed = MetadataFields::parse(&input)?;

        static NEXT_MAJOR_METADATA_VERSION: Lazy<Version> =
            Lazy::new(|| Version::from_str("3").unwrap());

        // Core-metadata says consumers MUST reject a higher major version
        // than they know. Minor revisions are compatible by definition, so
        // those pass through without comment.
        let metadata_version: Version = parsed
            .take("Metadata-Version")?
            .parse()
            .map_err(PackageMetadataError::InvalidMetadataVersion)?;
        if metadata_version >= *NEXT_MAJOR_METADATA_VERSION {
            return Err(PackageMetadataError::UnsupportedMetadataVersion(
                metadata_version,
            ));
        }

        let name: PackageName = parsed.take("Name")?.parse()?;
        let version: Version = parsed
            .take("Version")?
            .parse()
            .map_err(PackageMetadataError::InvalidVersion)?;

        let mut requires_dist = Vec::new();
        for req_str in parsed.take_all("Requires-Dist") {
            match req_str.parse() {
                Ok(req) => requires_dist.push(req),
                Err(e) => {
                    tracing::warn!("ignoring Requires-Dist: {req_str}, failed to parse: {e}")
                }
            }
        }

        let requires_python = parsed
            .maybe_take("Requires-Python")?
            .as_deref()
            .map(VersionSpecifiers::from_str)
            .transpose()
            .map_err(PackageMetadataError::InvalidRequiresPython)?;

        let provides_extras = parsed
            .take_all("Provides-Extra")
            .iter()
            .map(|extra| extra.parse().expect("extra parsing is infallible"))
            .collect();

        Ok(PackageMetadata {
            name,
            version,
            requires_dist,
            requires_python,
            provides_extras,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const METADATA: &str = "Metadata-Version: 2.1\r\nName: black\r\nVersion: 23.12.1\r\nRequires-Python: >=3.8\r\nProvides-Extra: d\r\nProvides-Extra: jupyter\r\nRequires-Dist: click >=8.0.0\r\nRequires-Dist: aiohttp >=3.7.4 ; extra == 'd'\r\nRequires-Dist: ipython >=7.8.0 ; extra == 'jupyter'\r\n\r\nThe uncompromising formatter.\r\n";

    #[test]
    fn parses_relevant_fields() {
        let metadata = PackageMetadata::try_from(METADATA.as_bytes()).unwrap();
        assert_eq!(metadata.name.as_str(), "black");
        assert_eq!(metadata.version, "23.12.1".parse().unwrap());
        assert_eq!(metadata.requires_dist.len(), 3);
        assert_eq!(metadata.provides_extras.len(), 2);
        assert!(metadata
            .provides_extras
            .contains(&"jupyter".parse().unwrap()));
        assert!(metadata.requires_python.is_some());
    }

    #[test]
    fn unparseable_requirements_are_skipped() {
        let metadata = PackageMetadata::try_from(
            "Metadata-Version: 2.1\nName: x\nVersion: 1.0\nRequires-Dist: ???not-a-req\nRequires-Dist: click\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(metadata.requires_dist.len(), 1);
    }

    #[test]
    fn future_major_version_is_rejected() {
        let err = PackageMetadata::try_from(
            "Metadata-Version: 3.0\nName: x\nVersion: 1.0\n".as_bytes(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PackageMetadataError::UnsupportedMetadataVersion(_)
        ));
    }
}
