//! pinwheel resolves a set of PEP 508 requirements against a PyPI-compatible
//! registry into a concrete, reproducible set of package/version/file
//! selections, valid across one or more target environments at once.
//!
//! The resolver is deliberately simple in shape: single assignment (one
//! version per package), first fit (highest admissible version wins), no
//! backtracking. What it spends its effort on instead is metadata
//! acquisition: dependency information is pulled from progressively more
//! expensive sources (release JSON, then separately served wheel metadata,
//! then building a source distribution), many packages at a time, while the
//! dependency graph is expanded round by round until it stops changing.
//!
//! The PEP 440 and PEP 508 grammars come from [`pep440_rs`] and
//! [`pep508_rs`]; building source distributions goes through the
//! [`wheel_builder::BuildFrontend`] seam.

#![deny(missing_docs)]

pub mod index;
pub mod resolve;
pub mod types;
pub mod wheel_builder;

mod target_env;

pub use resolve::{
    resolve, LockedPackage, PreReleaseResolution, ResolveError, ResolveOptions, SolutionGraph,
    SolutionNode,
};
pub use target_env::{
    MarkerApplicability, TargetEnvironment, TargetEnvironments, TargetEnvironmentsError,
};

pub use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};
pub use pep508_rs::{MarkerEnvironment, Requirement};
