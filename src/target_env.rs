//! Target environments and marker evaluation across several of them at once.
//!
//! A resolution is carried out against an ordered sequence of concrete
//! environments (interpreter, version, OS, architecture). Every selected
//! package must be usable in all of them; a marker-gated dependency may apply
//! to only a subset, which the solution records.

use crate::types::Extra;
use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::{MarkerEnvironment, MarkerTree};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// A single concrete environment resolution must hold for: an interpreter
/// with a version on an OS and architecture, expressed as the PEP 508 marker
/// variables of that environment.
#[derive(Debug, Clone)]
pub struct TargetEnvironment {
    markers: MarkerEnvironment,
}

impl TargetEnvironment {
    /// Creates a target environment from its marker variables.
    pub fn new(markers: MarkerEnvironment) -> Self {
        Self { markers }
    }

    /// The marker variables of this environment.
    pub fn markers(&self) -> &MarkerEnvironment {
        &self.markers
    }

    /// The full interpreter version of this environment, used for
    /// `requires_python` checks.
    pub fn python_version(&self) -> &Version {
        &self.markers.python_full_version.version
    }
}

impl Display for TargetEnvironment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.markers.implementation_name,
            self.markers.python_full_version.string,
            self.markers.sys_platform,
            self.markers.platform_machine
        )
    }
}

/// Error constructing a [`TargetEnvironments`] sequence.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum TargetEnvironmentsError {
    #[error("at least one target environment is required")]
    Empty,
}

/// The ordered, non-empty sequence of environments a resolution targets.
#[derive(Debug, Clone)]
pub struct TargetEnvironments {
    environments: Vec<TargetEnvironment>,
}

impl TargetEnvironments {
    /// Creates the sequence. Fails when `environments` is empty.
    pub fn new(environments: Vec<TargetEnvironment>) -> Result<Self, TargetEnvironmentsError> {
        if environments.is_empty() {
            return Err(TargetEnvironmentsError::Empty);
        }
        Ok(Self { environments })
    }

    /// Convenience constructor for the common single-environment case.
    pub fn single(environment: TargetEnvironment) -> Self {
        Self {
            environments: vec![environment],
        }
    }

    /// The environments, in declaration order.
    pub fn environments(&self) -> &[TargetEnvironment] {
        &self.environments
    }

    /// Number of target environments.
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    /// Always false, the sequence is non-empty by construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Evaluates a marker expression against every environment.
    ///
    /// `extras` are the active extras of the *requiring* package: an
    /// `extra == "x"` clause refers to those, not to any property of the
    /// environments.
    pub fn evaluate_marker(
        &self,
        marker: Option<&MarkerTree>,
        extras: &BTreeSet<Extra>,
    ) -> MarkerApplicability {
        let Some(marker) = marker else {
            return MarkerApplicability::All;
        };

        let extra_strs: Vec<&str> = extras.iter().map(Extra::as_str).collect();
        let mut matching: SmallVec<[usize; 4]> = SmallVec::new();
        for (index, environment) in self.environments.iter().enumerate() {
            if marker.evaluate(&environment.markers, &extra_strs) {
                matching.push(index);
            }
        }

        if matching.len() == self.environments.len() {
            MarkerApplicability::All
        } else if matching.is_empty() {
            MarkerApplicability::Never
        } else {
            MarkerApplicability::Mixed(matching)
        }
    }

    /// Whether the given `Requires-Python` admits the interpreter of every
    /// environment.
    pub fn admits_python(&self, specifiers: &VersionSpecifiers) -> bool {
        self.environments
            .iter()
            .all(|env| specifiers.contains(env.python_version()))
    }

    /// The first environment whose interpreter is rejected by the given
    /// `Requires-Python`, used for diagnostics.
    pub fn python_mismatch(&self, specifiers: &VersionSpecifiers) -> Option<&TargetEnvironment> {
        self.environments
            .iter()
            .find(|env| !specifiers.contains(env.python_version()))
    }
}

/// The verdict of evaluating a marker against a sequence of environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerApplicability {
    /// The marker holds in every environment.
    All,
    /// The marker holds in none of the environments.
    Never,
    /// The marker holds in a strict, non-empty subset. Holds the sorted
    /// indices of the matching environments.
    Mixed(SmallVec<[usize; 4]>),
}

impl MarkerApplicability {
    /// True when the requirement should enter resolution at all.
    pub fn admits_any(&self) -> bool {
        !matches!(self, MarkerApplicability::Never)
    }

    /// Merges another verdict in, producing the applicability over the union
    /// of both. `total` is the number of target environments.
    pub fn union(&self, other: &MarkerApplicability, total: usize) -> MarkerApplicability {
        use MarkerApplicability::*;
        match (self, other) {
            (All, _) | (_, All) => All,
            (Never, other) => other.clone(),
            (this, Never) => this.clone(),
            (Mixed(a), Mixed(b)) => {
                let mut merged: SmallVec<[usize; 4]> = a.clone();
                for index in b {
                    if !merged.contains(index) {
                        merged.push(*index);
                    }
                }
                merged.sort_unstable();
                if merged.len() == total {
                    All
                } else {
                    Mixed(merged)
                }
            }
        }
    }

    /// The indices of the environments this applies to.
    pub fn environment_indices(&self, total: usize) -> Vec<usize> {
        match self {
            MarkerApplicability::All => (0..total).collect(),
            MarkerApplicability::Never => Vec::new(),
            MarkerApplicability::Mixed(indices) => indices.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pep508_rs::Requirement;
    use rstest::rstest;
    use std::str::FromStr;

    pub(crate) fn environment(python: &str, sys_platform: &str) -> TargetEnvironment {
        TargetEnvironment::new(MarkerEnvironment {
            implementation_name: "cpython".to_string(),
            implementation_version: python.parse().unwrap(),
            os_name: if sys_platform == "win32" {
                "nt".to_string()
            } else {
                "posix".to_string()
            },
            platform_machine: "x86_64".to_string(),
            platform_python_implementation: "CPython".to_string(),
            platform_release: "".to_string(),
            platform_system: if sys_platform == "win32" {
                "Windows".to_string()
            } else {
                "Linux".to_string()
            },
            platform_version: "".to_string(),
            python_full_version: python.parse().unwrap(),
            python_version: python.rsplit_once('.').unwrap().0.parse().unwrap(),
            sys_platform: sys_platform.to_string(),
        })
    }

    fn marker_of(requirement: &str) -> Option<MarkerTree> {
        Requirement::from_str(requirement).unwrap().marker
    }

    #[rstest]
    #[case("foo; python_version >= \"3.8\"", MarkerApplicability::All)]
    #[case("foo; python_version < \"3.9\"", MarkerApplicability::Never)]
    #[case(
        "foo; sys_platform == \"win32\"",
        MarkerApplicability::Mixed(SmallVec::from_slice(&[1]))
    )]
    fn marker_verdicts(#[case] requirement: &str, #[case] expected: MarkerApplicability) {
        let envs = TargetEnvironments::new(vec![
            environment("3.11.4", "linux"),
            environment("3.11.4", "win32"),
        ])
        .unwrap();
        let marker = marker_of(requirement);
        assert_eq!(
            envs.evaluate_marker(marker.as_ref(), &BTreeSet::new()),
            expected
        );
    }

    #[test]
    fn extra_markers_follow_the_requiring_package() {
        let envs = TargetEnvironments::single(environment("3.11.4", "linux"));
        let marker = marker_of("foo; extra == \"dev\"");

        assert_eq!(
            envs.evaluate_marker(marker.as_ref(), &BTreeSet::new()),
            MarkerApplicability::Never
        );

        let extras = BTreeSet::from(["dev".parse::<Extra>().unwrap()]);
        assert_eq!(
            envs.evaluate_marker(marker.as_ref(), &extras),
            MarkerApplicability::All
        );
    }

    #[test]
    fn union_covers_all_environments() {
        let a = MarkerApplicability::Mixed(SmallVec::from_slice(&[0]));
        let b = MarkerApplicability::Mixed(SmallVec::from_slice(&[1]));
        assert_eq!(a.union(&b, 2), MarkerApplicability::All);
        assert_eq!(
            a.union(&MarkerApplicability::Never, 3),
            MarkerApplicability::Mixed(SmallVec::from_slice(&[0]))
        );
    }

    #[test]
    fn python_admission() {
        let envs = TargetEnvironments::new(vec![
            environment("3.8.2", "linux"),
            environment("3.11.4", "linux"),
        ])
        .unwrap();
        let spec: VersionSpecifiers = ">=3.8".parse().unwrap();
        assert!(envs.admits_python(&spec));

        let spec: VersionSpecifiers = ">=3.9".parse().unwrap();
        assert!(!envs.admits_python(&spec));
        assert!(envs.python_mismatch(&spec).is_some());
    }
}
