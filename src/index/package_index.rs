use crate::index::http::{Http, HttpError};
use crate::index::package_sources::PackageSources;
use crate::types::{
    DistFilename, NormalizedPackageName, PackageMetadata, ProjectInfo, ReleaseDocument,
    ReleaseFile, WheelFilename,
};
use crate::wheel_builder::{WheelBuildError, WheelBuilder};
use async_once_cell::OnceCell;
use indexmap::IndexMap;
use miette::Diagnostic;
use parking_lot::Mutex;
use pep440_rs::Version;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// The content type of the JSON flavor of the simple repository API.
pub const SIMPLE_V1_JSON: &str = "application/vnd.pypi.simple.v1+json";

/// All published files of a package, grouped by version and ordered from the
/// highest version to the lowest.
pub type ReleaseMap = IndexMap<Version, Vec<ReleaseFile>>;

/// Which source supplied the metadata of a release. Sources are tried from
/// cheapest to most expensive; the first one that yields a usable answer
/// wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataTier {
    /// The per-release JSON document of the registry.
    ReleaseJson,
    /// A separately served core-metadata file of a wheel (PEP 658).
    FileMetadata,
    /// Metadata produced by building a source distribution.
    SdistBuild,
    /// Metadata supplied by the caller, for direct-URL requirements.
    Provided,
}

impl Display for MetadataTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetadataTier::ReleaseJson => "release-json",
            MetadataTier::FileMetadata => "file-metadata",
            MetadataTier::SdistBuild => "sdist-build",
            MetadataTier::Provided => "provided",
        };
        write!(f, "{name}")
    }
}

/// Metadata of a release, together with the source that supplied it.
#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    /// The dependency metadata.
    pub metadata: PackageMetadata,

    /// Which source it came from.
    pub tier: MetadataTier,
}

/// Error fetching the file listing of a package.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum IndexError {
    #[error("failed to fetch the file listing of {name}")]
    ProjectListing {
        name: NormalizedPackageName,
        #[source]
        source: HttpError,
    },
}

/// The per-source failure reasons collected while trying to obtain metadata.
#[derive(Debug)]
pub struct TierReasons(pub Vec<(MetadataTier, String)>);

impl Display for TierReasons {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (tier, reason) in &self.0 {
            write!(f, "\n  - {tier}: {reason}")?;
        }
        Ok(())
    }
}

/// Error obtaining the metadata of a specific release.
#[derive(Debug, Error, Diagnostic)]
pub enum MetadataError {
    /// Every metadata source failed or was unavailable.
    #[error("no metadata source succeeded for {name}=={version}:{reasons}")]
    AllTiersFailed {
        /// The package.
        name: NormalizedPackageName,
        /// The release version.
        version: Version,
        /// Why each source failed.
        reasons: TierReasons,
    },

    /// The source distribution could not be built. This is not recoverable
    /// for the release: there is no cheaper source left to consult.
    #[error("failed to build source distribution of {name}=={version}")]
    BuildFailure {
        /// The package.
        name: NormalizedPackageName,
        /// The release version.
        version: Version,
        /// The build error.
        #[source]
        source: WheelBuildError,
    },
}

/// A single metadata source failing, internal to the tier loop.
#[derive(Debug, Error)]
enum TierError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Build(#[from] WheelBuildError),
}

type ReleaseCell = Arc<OnceCell<Arc<ReleaseMap>>>;
type MetadataCell = Arc<OnceCell<Arc<ResolvedMetadata>>>;

/// Cache of everything we learn from the registry during one resolution: the
/// published files of each package and the metadata of each release.
///
/// Every piece of information is fetched at most once; concurrent requests
/// for the same key share a single in-flight fetch. A failed fetch leaves the
/// cache slot empty so a later call can retry.
pub struct PackageIndex {
    http: Http,
    sources: PackageSources,
    releases: Mutex<HashMap<NormalizedPackageName, ReleaseCell>>,
    metadata: Mutex<HashMap<(NormalizedPackageName, Version), MetadataCell>>,
}

impl PackageIndex {
    /// Constructs a new index talking to the registry at `sources`.
    pub fn new(client: Client, sources: PackageSources, retries: super::RetryPolicy) -> Self {
        Self {
            http: Http::new(client, retries),
            sources,
            releases: Mutex::new(HashMap::new()),
            metadata: Mutex::new(HashMap::new()),
        }
    }

    /// The registry layout this index talks to.
    pub fn sources(&self) -> &PackageSources {
        &self.sources
    }

    /// Returns all published files of `name`, grouped by version, highest
    /// version first. An unknown package yields an empty map.
    pub async fn available_releases(
        &self,
        name: &NormalizedPackageName,
    ) -> Result<Arc<ReleaseMap>, IndexError> {
        let cell = self
            .releases
            .lock()
            .entry(name.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let releases = cell.get_or_try_init(self.fetch_releases(name)).await?;
        Ok(releases.clone())
    }

    async fn fetch_releases(
        &self,
        name: &NormalizedPackageName,
    ) -> Result<Arc<ReleaseMap>, IndexError> {
        let url = self.sources.simple_project_url(name);
        tracing::info!(package=%name, url=%url, "fetching file listing");

        let project: ProjectInfo = match self.http.get_json(url, Some(SIMPLE_V1_JSON)).await {
            Ok(project) => project,
            Err(e) if e.is_not_found() => {
                tracing::warn!(package=%name, "package does not exist on the index");
                ProjectInfo::default()
            }
            Err(e) => {
                return Err(IndexError::ProjectListing {
                    name: name.clone(),
                    source: e,
                })
            }
        };

        let mut releases = ReleaseMap::default();
        for raw in project.files {
            match DistFilename::from_filename(&raw.filename, name) {
                Ok(filename) => releases
                    .entry(filename.version().clone())
                    .or_default()
                    .push(ReleaseFile {
                        filename,
                        url: raw.url,
                        hashes: raw.hashes,
                        requires_python: raw.requires_python,
                        core_metadata: raw.core_metadata,
                        yanked: raw.yanked,
                    }),
                Err(e) => {
                    tracing::warn!(package=%name, "skipping file '{}': {e}", raw.filename)
                }
            }
        }

        // A stable file order within a version and a descending version
        // order make the resolution output independent of registry ordering.
        for files in releases.values_mut() {
            files.sort_by_cached_key(|file| file.filename.to_string());
        }
        releases.sort_unstable_by(|v1, _, v2, _| v2.cmp(v1));

        Ok(Arc::new(releases))
    }

    /// Returns the dependency metadata of `name=={version}`, consulting the
    /// metadata sources from cheapest to most expensive. `files` are the
    /// published files of that version; `builder` enables the sdist source
    /// when present.
    pub async fn get_metadata(
        &self,
        name: &NormalizedPackageName,
        version: &Version,
        files: &[ReleaseFile],
        builder: Option<&WheelBuilder>,
    ) -> Result<Arc<ResolvedMetadata>, MetadataError> {
        let cell = self
            .metadata
            .lock()
            .entry((name.clone(), version.clone()))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let resolved = cell
            .get_or_try_init(self.fetch_metadata(name, version, files, builder))
            .await?;
        Ok(resolved.clone())
    }

    async fn fetch_metadata(
        &self,
        name: &NormalizedPackageName,
        version: &Version,
        files: &[ReleaseFile],
        builder: Option<&WheelBuilder>,
    ) -> Result<Arc<ResolvedMetadata>, MetadataError> {
        let mut reasons = Vec::new();

        for tier in [
            MetadataTier::ReleaseJson,
            MetadataTier::FileMetadata,
            MetadataTier::SdistBuild,
        ] {
            let outcome = match tier {
                MetadataTier::ReleaseJson => self.release_json_tier(name, version).await,
                MetadataTier::FileMetadata => self.file_metadata_tier(name, files).await,
                MetadataTier::SdistBuild => {
                    self.sdist_build_tier(name, version, files, builder).await
                }
                MetadataTier::Provided => unreachable!("never consulted as a tier"),
            };

            match outcome {
                Ok(Some(metadata)) => {
                    tracing::debug!(package=%name, %version, %tier, "metadata resolved");
                    return Ok(Arc::new(ResolvedMetadata { metadata, tier }));
                }
                Ok(None) => reasons.push((tier, String::from("not available from this source"))),
                Err(TierError::Build(source)) => {
                    return Err(MetadataError::BuildFailure {
                        name: name.clone(),
                        version: version.clone(),
                        source,
                    })
                }
                Err(e) => reasons.push((tier, e.to_string())),
            }
        }

        Err(MetadataError::AllTiersFailed {
            name: name.clone(),
            version: version.clone(),
            reasons: TierReasons(reasons),
        })
    }

    /// Cheapest source: the release JSON document. Often present but not
    /// guaranteed to record `requires_dist`.
    async fn release_json_tier(
        &self,
        name: &NormalizedPackageName,
        version: &Version,
    ) -> Result<Option<PackageMetadata>, TierError> {
        let url = self.sources.release_document_url(name, version);
        let document: ReleaseDocument = match self.http.get_json(url, None).await {
            Ok(document) => document,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        document
            .info
            .to_metadata()
            .map_err(|e| TierError::Malformed(e.to_string()))
    }

    /// Second source: the separately served core metadata of a wheel
    /// (PEP 658). Tries the most broadly applicable wheel first.
    async fn file_metadata_tier(
        &self,
        name: &NormalizedPackageName,
        files: &[ReleaseFile],
    ) -> Result<Option<PackageMetadata>, TierError> {
        let mut wheels: Vec<&ReleaseFile> = files
            .iter()
            .filter(|file| file.filename.is_wheel())
            .collect();
        if wheels.is_empty() {
            return Ok(None);
        }
        wheels.sort_by_cached_key(|file| {
            (
                !file.core_metadata.is_available(),
                !file
                    .filename
                    .as_wheel()
                    .is_some_and(WheelFilename::is_any_platform),
                file.filename.to_string(),
            )
        });

        let mut last_error = None;
        for file in wheels {
            let url = PackageSources::file_metadata_url(&file.url);
            match self.http.get_bytes(url).await {
                Ok(bytes) => match PackageMetadata::try_from(bytes.as_slice()) {
                    Ok(metadata) => return Ok(Some(metadata)),
                    Err(e) => {
                        tracing::warn!(package=%name, file=%file.filename, "unparseable metadata file: {e}");
                        last_error = Some(TierError::Malformed(e.to_string()));
                    }
                },
                Err(e) if e.is_not_found() => continue,
                Err(e) => last_error = Some(e.into()),
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Last resort: download a source distribution and run the build backend
    /// to produce metadata.
    async fn sdist_build_tier(
        &self,
        name: &NormalizedPackageName,
        version: &Version,
        files: &[ReleaseFile],
        builder: Option<&WheelBuilder>,
    ) -> Result<Option<PackageMetadata>, TierError> {
        let Some(builder) = builder else {
            return Ok(None);
        };
        let Some(sdist) = files
            .iter()
            .filter(|file| {
                file.filename
                    .as_sdist()
                    .is_some_and(|sdist| sdist.format.is_supported())
            })
            .min_by_key(|file| file.filename.to_string())
        else {
            return Ok(None);
        };
        let filename = sdist
            .filename
            .as_sdist()
            .expect("filtered to source distributions above");

        tracing::info!(package=%name, %version, file=%sdist.filename, "building source distribution for metadata");
        let payload = self.http.get_bytes(sdist.url.clone()).await?;
        let metadata = builder.sdist_metadata(filename, payload).await?;
        Ok(Some(metadata))
    }

    /// Which source supplied the metadata of every release looked at so far,
    /// sorted by package and version. This is the machine-readable record of
    /// where each piece of dependency information came from.
    pub fn metadata_tiers(&self) -> Vec<(NormalizedPackageName, Version, MetadataTier)> {
        let guard = self.metadata.lock();
        let mut entries: Vec<_> = guard
            .iter()
            .filter_map(|((name, version), cell)| {
                cell.get()
                    .map(|resolved| (name.clone(), version.clone(), resolved.tier))
            })
            .collect();
        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        entries
    }

    /// Fetches the raw bytes of a distribution file. Exposed for callers
    /// that want to download the selected files after resolution.
    pub async fn get_file(&self, url: Url) -> Result<Vec<u8>, HttpError> {
        self.http.get_bytes(url).await
    }
}
