//! Talking to a PyPI-compatible registry: HTTP plumbing, the registry URL
//! layout, and the cached, tiered package index.

mod http;
mod package_index;
mod package_sources;

pub use http::{Http, HttpError, RetryPolicy};
pub use package_index::{
    IndexError, MetadataError, MetadataTier, PackageIndex, ReleaseMap, ResolvedMetadata,
    TierReasons, SIMPLE_V1_JSON,
};
pub use package_sources::PackageSources;
