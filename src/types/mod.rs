//! The vocabulary of the PyPA packaging ecosystem: names, extras,
//! distribution filenames, registry documents and core metadata.

mod core_metadata;
mod dist_filename;
mod extra;
mod metadata_fields;
mod package_name;
mod project_info;

pub use core_metadata::{PackageMetadata, PackageMetadataError};
pub use dist_filename::{
    DistFilename, ParseDistFilenameError, SDistFilename, SDistFormat, WheelFilename,
};
pub use extra::Extra;
pub use metadata_fields::{MetadataFields, MetadataFieldsError};
pub use package_name::{NormalizedPackageName, PackageName, ParsePackageNameError};
pub use project_info::{
    ArtifactHashes, CoreMetadataFile, ProjectInfo, RawFile, ReleaseDocument, ReleaseFile,
    ReleaseInfo, ReleaseInfoError, Yanked,
};

pub use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};
pub use pep508_rs::{MarkerEnvironment, Requirement};
