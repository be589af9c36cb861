use crate::index::ReleaseMap;
use crate::resolve::requirement_queue::QueueEntry;
use crate::resolve::solve_options::PreReleaseResolution;
use crate::target_env::TargetEnvironments;
use crate::types::{ReleaseFile, Version, WheelFilename};
use pep440_rs::Operator;

/// A version that passed every registry-level check, together with the file
/// that makes it installable everywhere. Candidates are produced best-first;
/// the driver still has to confirm the authoritative metadata before a
/// candidate becomes the selection.
#[derive(Debug, Clone)]
pub(crate) struct CandidateVersion {
    pub version: Version,
    pub file: ReleaseFile,
}

/// The outcome of filtering a package's releases: the surviving candidates
/// in preference order, plus the reason each non-surviving,
/// specifier-matching version was rejected.
#[derive(Debug)]
pub(crate) struct VersionCandidates {
    pub candidates: Vec<CandidateVersion>,
    pub rejected: Vec<(Version, String)>,
}

/// Not a single published version matches the merged specifier set.
#[derive(Debug)]
pub(crate) struct SpecifierConflict;

/// Filters and orders the published versions of a package.
///
/// Versions arrive ordered highest-first and leave in the same order, so the
/// first candidate the driver confirms is the selection. A version survives
/// when it matches every collected specifier clause, is not yanked (unless
/// the specifiers pin it exactly), respects the pre-release policy, and has
/// at least one file whose `requires_python` admits the interpreter of every
/// target environment.
pub(crate) fn candidate_versions(
    entry: &QueueEntry,
    releases: &ReleaseMap,
    environments: &TargetEnvironments,
    policy: &PreReleaseResolution,
) -> Result<VersionCandidates, SpecifierConflict> {
    let allow_prerelease = match policy {
        PreReleaseResolution::Allow => true,
        PreReleaseResolution::Disallow => false,
        PreReleaseResolution::AllowIfNoOtherVersionsOrEnabled { allow_names } => {
            allow_names.contains(&entry.name)
                || entry
                    .specifiers
                    .iter()
                    .any(|s| s.version().any_prerelease())
                || (!releases.is_empty() && releases.keys().all(Version::any_prerelease))
        }
    };

    let mut candidates = Vec::new();
    let mut rejected = Vec::new();
    let mut any_specifier_match = false;

    for (version, files) in releases.iter() {
        if !entry.specifiers.iter().all(|s| s.contains(version)) {
            continue;
        }
        any_specifier_match = true;

        if version.any_prerelease() && !allow_prerelease {
            rejected.push((version.clone(), String::from("pre-releases are not enabled")));
            continue;
        }

        let exactly_pinned = entry.specifiers.iter().any(|s| {
            matches!(s.operator(), Operator::Equal | Operator::ExactEqual)
                && s.version() == version
        });
        let not_yanked: Vec<&ReleaseFile> = files
            .iter()
            .filter(|file| !file.yanked.is_yanked() || exactly_pinned)
            .collect();
        if not_yanked.is_empty() {
            rejected.push((version.clone(), String::from("every file is yanked")));
            continue;
        }

        let python_compatible: Vec<&ReleaseFile> = not_yanked
            .into_iter()
            .filter(|file| {
                file.requires_python
                    .as_ref()
                    .map_or(true, |spec| environments.admits_python(spec))
            })
            .collect();
        let Some(file) = preferred_file(&python_compatible, environments.len() > 1) else {
            rejected.push((
                version.clone(),
                String::from("no file supports the interpreter of every target environment"),
            ));
            continue;
        };

        candidates.push(CandidateVersion {
            version: version.clone(),
            file: file.clone(),
        });
    }

    if !any_specifier_match {
        return Err(SpecifierConflict);
    }

    Ok(VersionCandidates {
        candidates,
        rejected,
    })
}

/// Picks the file to install for a version: wheels beat sdists, platform
/// independent wheels beat platform specific ones when several environments
/// are targeted, and the lexicographically smallest filename settles the
/// rest.
fn preferred_file<'a>(files: &[&'a ReleaseFile], multiple_environments: bool) -> Option<&'a ReleaseFile> {
    files.iter().copied().min_by_key(|file| {
        (
            !file.filename.is_wheel(),
            multiple_environments
                && !file
                    .filename
                    .as_wheel()
                    .is_some_and(WheelFilename::is_any_platform),
            file.filename.to_string(),
        )
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolve::requirement_queue::{RequiredBy, RequirementQueue};
    use crate::target_env::MarkerApplicability;
    use crate::types::{CoreMetadataFile, DistFilename, Yanked};
    use std::str::FromStr;
    use url::Url;

    fn release_file(filename: &str, package: &str, requires_python: Option<&str>, yanked: bool) -> ReleaseFile {
        ReleaseFile {
            filename: DistFilename::from_filename(filename, &package.parse().unwrap()).unwrap(),
            url: Url::parse(&format!("https://files.example/{filename}")).unwrap(),
            hashes: None,
            requires_python: requires_python.map(|s| s.parse().unwrap()),
            core_metadata: CoreMetadataFile::default(),
            yanked: if yanked {
                Yanked::Yes { reason: None }
            } else {
                Yanked::No
            },
        }
    }

    fn release_map(entries: &[(&str, Vec<ReleaseFile>)]) -> ReleaseMap {
        let mut map = ReleaseMap::default();
        for (version, files) in entries {
            map.insert(Version::from_str(version).unwrap(), files.clone());
        }
        map.sort_unstable_by(|v1, _, v2, _| v2.cmp(v1));
        map
    }

    fn entry_for(name: &str, spec: &str) -> QueueEntry {
        let mut queue = RequirementQueue::new(1);
        let specifiers: Vec<_> = if spec.is_empty() {
            Vec::new()
        } else {
            pep440_rs::VersionSpecifiers::from_str(spec)
                .unwrap()
                .iter()
                .cloned()
                .collect()
        };
        queue.push(
            name.parse().unwrap(),
            [],
            specifiers,
            None,
            MarkerApplicability::All,
            RequiredBy::Root,
        );
        queue.take_pending().pop().unwrap()
    }

    fn environments() -> TargetEnvironments {
        TargetEnvironments::single(crate::target_env::test::environment("3.11.4", "linux"))
    }

    #[test]
    fn highest_matching_version_first() {
        let releases = release_map(&[
                ("1.0", vec![release_file("pkg-1.0-py3-none-any.whl", "pkg", None, false)]),
                ("2.0", vec![release_file("pkg-2.0-py3-none-any.whl", "pkg", None, false)]),
            ],
        );
        let result = candidate_versions(
            &entry_for("pkg", ""),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .unwrap();
        assert_eq!(result.candidates[0].version, "2.0".parse().unwrap());
        assert_eq!(result.candidates.len(), 2);
    }

    #[test]
    fn empty_intersection_is_a_conflict() {
        let releases = release_map(&[
                ("1.0", vec![release_file("pkg-1.0-py3-none-any.whl", "pkg", None, false)]),
                ("2.0", vec![release_file("pkg-2.0-py3-none-any.whl", "pkg", None, false)]),
            ],
        );
        assert!(candidate_versions(
            &entry_for("pkg", "==1.0, ==2.0"),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .is_err());
    }

    #[test]
    fn yanked_versions_are_skipped_unless_pinned() {
        let releases = release_map(&[
                ("1.0", vec![release_file("pkg-1.0-py3-none-any.whl", "pkg", None, false)]),
                ("2.0", vec![release_file("pkg-2.0-py3-none-any.whl", "pkg", None, true)]),
            ],
        );

        let open = candidate_versions(
            &entry_for("pkg", ""),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .unwrap();
        assert_eq!(open.candidates.len(), 1);
        assert_eq!(open.candidates[0].version, "1.0".parse().unwrap());
        assert_eq!(open.rejected.len(), 1);

        let pinned = candidate_versions(
            &entry_for("pkg", "==2.0"),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .unwrap();
        assert_eq!(pinned.candidates[0].version, "2.0".parse().unwrap());
    }

    #[test]
    fn prereleases_need_an_opt_in() {
        let releases = release_map(&[
                ("1.0", vec![release_file("pkg-1.0-py3-none-any.whl", "pkg", None, false)]),
                ("2.0a1", vec![release_file("pkg-2.0a1-py3-none-any.whl", "pkg", None, false)]),
            ],
        );

        let default = candidate_versions(
            &entry_for("pkg", ""),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .unwrap();
        assert_eq!(default.candidates[0].version, "1.0".parse().unwrap());
        assert_eq!(default.candidates.len(), 1);

        let opted_in = candidate_versions(
            &entry_for("pkg", ">=2.0a1"),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .unwrap();
        assert_eq!(opted_in.candidates[0].version, "2.0a1".parse().unwrap());
    }

    #[test]
    fn only_prerelease_packages_resolve_anyway() {
        let releases = release_map(&[("1.0b1", vec![release_file("pkg-1.0b1-py3-none-any.whl", "pkg", None, false)])],
        );
        let result = candidate_versions(
            &entry_for("pkg", ""),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .unwrap();
        assert_eq!(result.candidates.len(), 1);
    }

    #[test]
    fn requires_python_filters_versions() {
        let releases = release_map(&[
                ("1.0", vec![release_file("pkg-1.0-py3-none-any.whl", "pkg", Some(">=3.8"), false)]),
                ("2.0", vec![release_file("pkg-2.0-py3-none-any.whl", "pkg", Some(">=3.12"), false)]),
            ],
        );
        let result = candidate_versions(
            &entry_for("pkg", ""),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .unwrap();
        assert_eq!(result.candidates[0].version, "1.0".parse().unwrap());
        assert_eq!(result.rejected.len(), 1);
    }

    #[test]
    fn wheels_beat_sdists() {
        let releases = release_map(&[(
                "1.0",
                vec![
                    release_file("pkg-1.0.tar.gz", "pkg", None, false),
                    release_file("pkg-1.0-py3-none-any.whl", "pkg", None, false),
                ],
            )],
        );
        let result = candidate_versions(
            &entry_for("pkg", ""),
            &releases,
            &environments(),
            &PreReleaseResolution::default(),
        )
        .unwrap();
        assert!(result.candidates[0].file.filename.is_wheel());
    }
}
