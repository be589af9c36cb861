//! Serde representations of the registry documents we consume: the JSON
//! simple index (PEP 691) and the per-release JSON document, plus the
//! normalized [`ReleaseFile`] form the resolver works with.

use crate::types::{DistFilename, PackageMetadata, PackageName};
use pep440_rs::{Version, VersionSpecifiers};
use rattler_digest::{serde::SerializableHash, Sha256};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, skip_serializing_none, DisplayFromStr, VecSkipError};
use std::fmt::{self, Formatter};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// The response of a `{base}/simple/{name}/` request in the JSON flavor of
/// the simple repository API (PEP 691). Only the file list is consumed; the
/// `meta` block and the other optional keys of the response are ignored.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProjectInfo {
    /// All files published for this project. Entries that fail to
    /// deserialize are skipped rather than failing the whole listing.
    #[serde_as(as = "VecSkipError<_>")]
    pub files: Vec<RawFile>,
}

/// A single file entry of a simple-index listing, as served by the registry.
/// The filename is kept as an uninterpreted string here; parsing it requires
/// knowing the package it belongs to. See [`ReleaseFile`].
#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawFile {
    /// The filename of the distribution file.
    pub filename: String,

    /// Where the file can be downloaded.
    pub url: Url,

    /// Known digests of the file.
    pub hashes: Option<ArtifactHashes>,

    /// The `Requires-Python` of the file, when the index knows it.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, rename = "requires-python")]
    pub requires_python: Option<VersionSpecifiers>,

    /// Whether the file's core metadata can be fetched separately (PEP 658).
    #[serde(
        default,
        rename = "core-metadata",
        alias = "dist-info-metadata",
        alias = "data-dist-info-metadata"
    )]
    pub core_metadata: CoreMetadataFile,

    /// Whether the file has been withdrawn.
    #[serde(default)]
    pub yanked: Yanked,
}

/// A distribution file of a release, in the normalized form the resolver
/// consumes: the filename is parsed, so name, version and kind are available
/// without further lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFile {
    /// The parsed filename.
    pub filename: DistFilename,

    /// Where the file can be downloaded.
    pub url: Url,

    /// Known digests of the file.
    pub hashes: Option<ArtifactHashes>,

    /// The `Requires-Python` of the file, when the index knows it.
    pub requires_python: Option<VersionSpecifiers>,

    /// Whether the file's core metadata can be fetched separately (PEP 658).
    pub core_metadata: CoreMetadataFile,

    /// Whether the file has been withdrawn.
    pub yanked: Yanked,
}

/// Digests of a distribution file. Registries may expose any algorithm from
/// Python's `hashlib`, only sha256 is interpreted here.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ArtifactHashes {
    /// The sha256 digest, when present.
    #[serde_as(as = "Option<SerializableHash<Sha256>>")]
    pub sha256: Option<rattler_digest::Sha256Hash>,
}

impl ArtifactHashes {
    /// True when no digest is recorded.
    pub fn is_empty(&self) -> bool {
        self.sha256.is_none()
    }
}

/// Whether a separately fetchable core-metadata file exists for a
/// distribution file (PEP 658).
///
/// The wire value is a union: absent or `false` (no metadata file), `true`
/// (a metadata file exists) or a digest table (a metadata file exists and
/// these are its hashes). All three collapse into one optional digest set,
/// where `Some` means the `{file_url}.metadata` fetch is advertised to work.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoreMetadataFile(Option<ArtifactHashes>);

impl CoreMetadataFile {
    /// True when `{file_url}.metadata` can be fetched.
    pub fn is_available(&self) -> bool {
        self.0.is_some()
    }

    /// Digests of the metadata file, when the index provides them.
    pub fn hashes(&self) -> Option<&ArtifactHashes> {
        self.0.as_ref()
    }
}

impl<'de> Deserialize<'de> for CoreMetadataFile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CoreMetadataFileVisitor;

        impl<'de> Visitor<'de> for CoreMetadataFileVisitor {
            type Value = CoreMetadataFile;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean or a table of metadata-file digests")
            }

            fn visit_bool<E: de::Error>(self, available: bool) -> Result<Self::Value, E> {
                Ok(CoreMetadataFile(
                    available.then(ArtifactHashes::default),
                ))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(CoreMetadataFile(None))
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                let hashes =
                    ArtifactHashes::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(CoreMetadataFile(Some(hashes)))
            }
        }

        deserializer.deserialize_any(CoreMetadataFileVisitor)
    }
}

impl Serialize for CoreMetadataFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.0 {
            None => serializer.serialize_bool(false),
            Some(hashes) if hashes.is_empty() => serializer.serialize_bool(true),
            Some(hashes) => hashes.serialize(serializer),
        }
    }
}

/// Whether a file or release has been withdrawn.
///
/// On the wire either a boolean or a string carrying the withdrawal reason;
/// a reason implies the file is yanked, so the two collapse into one enum.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Yanked {
    /// The file is available.
    #[default]
    No,
    /// The file was withdrawn.
    Yes {
        /// The reason given for the withdrawal, if any.
        reason: Option<String>,
    },
}

impl Yanked {
    /// True when the file was withdrawn.
    pub fn is_yanked(&self) -> bool {
        matches!(self, Yanked::Yes { .. })
    }

    /// The withdrawal reason, when one was given.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Yanked::No => None,
            Yanked::Yes { reason } => reason.as_deref(),
        }
    }
}

impl<'de> Deserialize<'de> for Yanked {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct YankedVisitor;

        impl<'de> Visitor<'de> for YankedVisitor {
            type Value = Yanked;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean or a withdrawal reason")
            }

            fn visit_bool<E: de::Error>(self, yanked: bool) -> Result<Self::Value, E> {
                Ok(if yanked {
                    Yanked::Yes { reason: None }
                } else {
                    Yanked::No
                })
            }

            fn visit_str<E: de::Error>(self, reason: &str) -> Result<Self::Value, E> {
                Ok(Yanked::Yes {
                    reason: Some(reason.to_owned()),
                })
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(Yanked::No)
            }
        }

        deserializer.deserialize_any(YankedVisitor)
    }
}

impl Serialize for Yanked {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Yanked::No => serializer.serialize_bool(false),
            Yanked::Yes { reason: None } => serializer.serialize_bool(true),
            Yanked::Yes {
                reason: Some(reason),
            } => serializer.serialize_str(reason),
        }
    }
}

/// The response of a `{base}/pypi/{name}/{version}/json` request, restricted
/// to the part we read.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseDocument {
    /// The `info` block of the document.
    pub info: ReleaseInfo,
}

/// The `info` block of a per-release JSON document. `requires_dist` is
/// nullable on the wire: registries serve `null` when they never introspected
/// the release, which is different from an empty dependency list.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    /// Distribution name as recorded by the registry.
    pub name: String,

    /// The release version.
    pub version: String,

    /// Declared dependencies, or `None` when the registry does not know them.
    #[serde(default)]
    pub requires_dist: Option<Vec<String>>,

    /// The `Requires-Python` of the release.
    #[serde(default)]
    pub requires_python: Option<String>,

    /// Extras declared by the release.
    #[serde(default)]
    pub provides_extra: Option<Vec<String>>,

    /// Whether the release is yanked.
    #[serde(default)]
    pub yanked: bool,

    /// The reason for yanking, if any.
    #[serde(default)]
    pub yanked_reason: Option<String>,
}

/// Error converting a release JSON document into [`PackageMetadata`].
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ReleaseInfoError {
    #[error("invalid name in release document: {0}")]
    InvalidName(String),

    #[error("invalid version in release document: {0}")]
    InvalidVersion(String),

    #[error("invalid Requires-Python in release document: {0}")]
    InvalidRequiresPython(String),
}

impl ReleaseInfo {
    /// Converts the document into [`PackageMetadata`], or `None` when the
    /// registry did not record `requires_dist` and the document therefore
    /// cannot answer dependency queries.
    pub fn to_metadata(&self) -> Result<Option<PackageMetadata>, ReleaseInfoError> {
        let Some(requires_dist) = &self.requires_dist else {
            return Ok(None);
        };

        let name = PackageName::from_str(&self.name)
            .map_err(|_| ReleaseInfoError::InvalidName(self.name.clone()))?;
        let version = Version::from_str(&self.version)
            .map_err(|_| ReleaseInfoError::InvalidVersion(self.version.clone()))?;
        let requires_python = self
            .requires_python
            .as_deref()
            .map(VersionSpecifiers::from_str)
            .transpose()
            .map_err(|e| ReleaseInfoError::InvalidRequiresPython(e.to_string()))?;

        let mut parsed_requires_dist = Vec::with_capacity(requires_dist.len());
        for req_str in requires_dist {
            match req_str.parse() {
                Ok(req) => parsed_requires_dist.push(req),
                Err(e) => {
                    tracing::warn!("ignoring requires_dist entry {req_str}: {e}")
                }
            }
        }

        let provides_extras = self
            .provides_extra
            .iter()
            .flatten()
            .map(|extra| extra.parse().expect("extra parsing is infallible"))
            .collect();

        Ok(Some(PackageMetadata {
            name,
            version,
            requires_dist: parsed_requires_dist,
            requires_python,
            provides_extras,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_simple_index_listing() {
        let listing: ProjectInfo = serde_json::from_str(
            r#"{
                "meta": {"api-version": "1.0"},
                "files": [
                    {
                        "filename": "trio-0.18.0-py3-none-any.whl",
                        "url": "https://files.example/trio-0.18.0-py3-none-any.whl",
                        "hashes": {"sha256": "63b95365e757085e27f76557e6f04dcf1b5676e1c671b4e09a0ea4b1d1b3b4c4"},
                        "requires-python": ">=3.7",
                        "core-metadata": true,
                        "yanked": false
                    },
                    {
                        "filename": "trio-0.18.0.tar.gz",
                        "url": "https://files.example/trio-0.18.0.tar.gz",
                        "hashes": {},
                        "yanked": "broken release"
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(listing.files.len(), 2);
        assert!(listing.files[0].core_metadata.is_available());
        assert!(!listing.files[0].yanked.is_yanked());
        assert!(listing.files[1].yanked.is_yanked());
        assert_eq!(listing.files[1].yanked.reason(), Some("broken release"));
        assert!(!listing.files[1].core_metadata.is_available());
    }

    #[test]
    fn core_metadata_digest_table() {
        let file: RawFile = serde_json::from_str(
            r#"{
                "filename": "x-1.0-py3-none-any.whl",
                "url": "https://files.example/x-1.0-py3-none-any.whl",
                "hashes": {},
                "core-metadata": {"sha256": "63b95365e757085e27f76557e6f04dcf1b5676e1c671b4e09a0ea4b1d1b3b4c4"}
            }"#,
        )
        .unwrap();
        assert!(file.core_metadata.is_available());
        assert!(!file.core_metadata.hashes().unwrap().is_empty());
    }

    #[test]
    fn malformed_file_entries_are_skipped() {
        let listing: ProjectInfo = serde_json::from_str(
            r#"{
                "meta": {"api-version": "1.0"},
                "files": [
                    {"filename": "x-1.0.tar.gz", "url": "not a url"},
                    {"filename": "x-1.0-py3-none-any.whl", "url": "https://files.example/x-1.0-py3-none-any.whl"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(listing.files.len(), 1);
    }

    #[test]
    fn release_document_without_requires_dist() {
        let doc: ReleaseDocument = serde_json::from_str(
            r#"{"info": {"name": "pkg", "version": "1.2.3", "requires_dist": null}}"#,
        )
        .unwrap();
        assert!(doc.info.to_metadata().unwrap().is_none());
    }

    #[test]
    fn release_document_with_requires_dist() {
        let doc: ReleaseDocument = serde_json::from_str(
            r#"{"info": {
                "name": "pkg",
                "version": "1.2.3",
                "requires_dist": ["bar>=1", "baz; extra == 'x'"],
                "requires_python": ">=3.8",
                "provides_extra": ["x"]
            }}"#,
        )
        .unwrap();
        let metadata = doc.info.to_metadata().unwrap().unwrap();
        assert_eq!(metadata.requires_dist.len(), 2);
        assert_eq!(metadata.provides_extras.len(), 1);
        assert!(metadata.requires_python.is_some());
    }
}
