use crate::target_env::MarkerApplicability;
use crate::types::{Extra, NormalizedPackageName, PackageName, VersionSpecifier};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::{BTreeSet, HashSet};
use url::Url;

/// Who asked for a package: the user directly, or another package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequiredBy {
    /// The package appears in the root requirements.
    Root,
    /// The package is a dependency of another selected package.
    Package(NormalizedPackageName),
}

/// The accumulated requirement state of one package: everything every
/// requirer has asked of it so far, merged.
///
/// Merging only ever grows the state (extras and specifier clauses are
/// unioned, applicability widens), which is what makes the queue's fixed
/// point well-defined.
#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    /// Canonical name, the key of the entry.
    pub name: NormalizedPackageName,
    /// A spelling of the name for display.
    pub display_name: PackageName,
    /// Union of all requested extras.
    pub extras: BTreeSet<Extra>,
    /// All specifier clauses collected so far. PEP 440 specifier sets are
    /// conjunctions, so the intersection of two sets is their concatenation.
    pub specifiers: Vec<VersionSpecifier>,
    /// A direct-URL pin, when any requirer used one.
    pub url: Option<Url>,
    /// The environments the package is needed in.
    pub applicability: MarkerApplicability,
    /// Everyone who asked for this package.
    pub required_by: Vec<RequiredBy>,

    /// Textual forms of `specifiers`, for dedup.
    specifier_keys: BTreeSet<String>,
    /// Bumped whenever a merge actually changes the entry.
    revision: u64,
    /// The revision the last applied selection was based on.
    selected_revision: Option<u64>,
}

impl QueueEntry {
    /// The revision of this snapshot, to be passed back to
    /// [`RequirementQueue::mark_selected`] once the selection is applied.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The merged specifier set, for display.
    pub fn constraints_display(&self) -> String {
        if self.specifiers.is_empty() {
            return String::from("*");
        }
        self.specifiers.iter().join(", ")
    }
}

/// The work set of the resolver: one entry per package, merged across all
/// requirers, with change tracking that tells the driver which entries need
/// (re-)selection.
pub(crate) struct RequirementQueue {
    entries: IndexMap<NormalizedPackageName, QueueEntry>,
    environment_count: usize,
}

impl RequirementQueue {
    pub fn new(environment_count: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            environment_count,
        }
    }

    /// Merges one requirement into the work set. Creates the entry on first
    /// sight; otherwise unions extras, appends unseen specifier clauses,
    /// widens applicability and records the requirer.
    pub fn push(
        &mut self,
        display_name: PackageName,
        extras: impl IntoIterator<Item = Extra>,
        specifiers: impl IntoIterator<Item = VersionSpecifier>,
        url: Option<Url>,
        applicability: MarkerApplicability,
        required_by: RequiredBy,
    ) {
        let name = NormalizedPackageName::from(display_name.clone());
        let entry = self
            .entries
            .entry(name.clone())
            .or_insert_with(|| QueueEntry {
                name,
                display_name,
                extras: BTreeSet::new(),
                specifiers: Vec::new(),
                url: None,
                applicability: MarkerApplicability::Never,
                required_by: Vec::new(),
                specifier_keys: BTreeSet::new(),
                revision: 0,
                selected_revision: None,
            });

        let mut changed = false;

        for extra in extras {
            changed |= entry.extras.insert(extra);
        }

        for specifier in specifiers {
            if entry.specifier_keys.insert(specifier.to_string()) {
                entry.specifiers.push(specifier);
                changed = true;
            }
        }

        if let Some(incoming) = url {
            match &entry.url {
                None => {
                    entry.url = Some(incoming);
                    changed = true;
                }
                Some(existing) if *existing != incoming => {
                    tracing::warn!(
                        package=%entry.name,
                        "conflicting direct-url pins, keeping {existing} and ignoring {incoming}"
                    );
                }
                _ => {}
            }
        }

        let widened = entry
            .applicability
            .union(&applicability, self.environment_count);
        if widened != entry.applicability {
            entry.applicability = widened;
            changed = true;
        }

        if !entry.required_by.contains(&required_by) {
            entry.required_by.push(required_by);
        }

        if changed {
            entry.revision += 1;
        }
    }

    /// Snapshots every entry whose state differs from what its last applied
    /// selection was based on (including entries never selected). An empty
    /// result means the work set has reached its fixed point.
    pub fn take_pending(&self) -> Vec<QueueEntry> {
        self.entries
            .values()
            .filter(|entry| entry.selected_revision != Some(entry.revision))
            .cloned()
            .collect()
    }

    /// Records that a selection based on the snapshot with `revision` has
    /// been applied for `name`. If the entry changed in the meantime it
    /// stays pending.
    pub fn mark_selected(&mut self, name: &NormalizedPackageName, revision: u64) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.selected_revision = Some(revision);
        }
    }

    /// A requirement chain from a root to `name`, for error context. Walks
    /// the first recorded requirer of each entry upwards.
    pub fn chain_to_root(&self, name: &NormalizedPackageName) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        let mut visited: HashSet<NormalizedPackageName> = HashSet::from([name.clone()]);
        let mut current = name.clone();

        while let Some(entry) = self.entries.get(&current) {
            match entry.required_by.first() {
                Some(RequiredBy::Package(parent)) if visited.insert(parent.clone()) => {
                    chain.push(parent.to_string());
                    current = parent.clone();
                }
                _ => break,
            }
        }

        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    fn specifiers(input: &str) -> Vec<VersionSpecifier> {
        if input.is_empty() {
            return Vec::new();
        }
        pep440_rs::VersionSpecifiers::from_str(input)
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    fn push_simple(queue: &mut RequirementQueue, name: &str, spec: &str, required_by: RequiredBy) {
        queue.push(
            name.parse().unwrap(),
            [],
            specifiers(spec),
            None,
            MarkerApplicability::All,
            required_by,
        );
    }

    #[test]
    fn new_entries_are_pending() {
        let mut queue = RequirementQueue::new(1);
        push_simple(&mut queue, "flask", ">=2", RequiredBy::Root);
        assert_eq!(queue.take_pending().len(), 1);
    }

    #[test]
    fn unchanged_merge_does_not_requeue() {
        let mut queue = RequirementQueue::new(1);
        push_simple(&mut queue, "flask", ">=2", RequiredBy::Root);

        let snapshot = &queue.take_pending()[0];
        let revision = snapshot.revision();
        queue.mark_selected(&"flask".parse().unwrap(), revision);
        assert!(queue.take_pending().is_empty());

        // The same clause again changes nothing.
        push_simple(
            &mut queue,
            "flask",
            ">=2",
            RequiredBy::Package("app".parse().unwrap()),
        );
        assert!(queue.take_pending().is_empty());
    }

    #[test]
    fn narrowing_the_specifier_requeues() {
        let mut queue = RequirementQueue::new(1);
        push_simple(&mut queue, "flask", ">=2", RequiredBy::Root);
        let revision = queue.take_pending()[0].revision();
        queue.mark_selected(&"flask".parse().unwrap(), revision);

        push_simple(
            &mut queue,
            "flask",
            "<3",
            RequiredBy::Package("app".parse().unwrap()),
        );
        let pending = queue.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].constraints_display(), ">=2, <3");
    }

    #[test]
    fn new_extra_requeues() {
        let mut queue = RequirementQueue::new(1);
        push_simple(&mut queue, "black", "", RequiredBy::Root);
        let revision = queue.take_pending()[0].revision();
        queue.mark_selected(&"black".parse().unwrap(), revision);

        queue.push(
            "black".parse().unwrap(),
            ["jupyter".parse::<Extra>().unwrap()],
            [],
            None,
            MarkerApplicability::All,
            RequiredBy::Root,
        );
        assert_eq!(queue.take_pending().len(), 1);
    }

    #[test]
    fn names_are_merged_case_insensitively() {
        let mut queue = RequirementQueue::new(1);
        push_simple(&mut queue, "Flask", ">=2", RequiredBy::Root);
        push_simple(&mut queue, "flask", "<3", RequiredBy::Root);
        assert_eq!(queue.take_pending().len(), 1);
    }

    #[test]
    fn chain_walks_to_a_root() {
        let mut queue = RequirementQueue::new(1);
        push_simple(&mut queue, "app", "", RequiredBy::Root);
        push_simple(
            &mut queue,
            "flask",
            "",
            RequiredBy::Package("app".parse().unwrap()),
        );
        push_simple(
            &mut queue,
            "werkzeug",
            "",
            RequiredBy::Package("flask".parse().unwrap()),
        );
        assert_eq!(
            queue.chain_to_root(&"werkzeug".parse().unwrap()),
            vec!["app", "flask", "werkzeug"]
        );
    }
}
