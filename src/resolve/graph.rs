use crate::index::MetadataTier;
use crate::resolve::requirement_queue::RequiredBy;
use crate::target_env::MarkerApplicability;
use crate::types::{Extra, NormalizedPackageName, PackageName, ReleaseFile, Version, VersionSpecifiers};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet, VecDeque};
use url::Url;

/// One selected package of a solution.
#[derive(Debug, Clone)]
pub struct SolutionNode {
    /// Canonical name of the package.
    pub name: NormalizedPackageName,

    /// A spelling of the name for display.
    pub display_name: PackageName,

    /// The selected version.
    pub version: Version,

    /// Union of every extra activated on the package.
    pub extras: BTreeSet<Extra>,

    /// The file chosen to install. Absent for direct-URL pins.
    pub file: Option<ReleaseFile>,

    /// The pinned URL, for direct-URL requirements.
    pub url: Option<Url>,

    /// The `Requires-Python` of the selected release.
    pub requires_python: Option<VersionSpecifiers>,

    /// Which target environments the package applies to.
    pub environments: MarkerApplicability,

    /// Which source supplied the dependency metadata.
    pub metadata_tier: MetadataTier,

    /// The admitted dependencies of this package.
    pub dependencies: Vec<DependencyEdge>,

    /// Everyone who required this package.
    pub required_by: Vec<RequiredBy>,
}

/// An edge of the solution graph. Carries the name only; cycles are allowed
/// and resolved through the graph's node table.
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    /// Canonical name of the dependency.
    pub name: NormalizedPackageName,

    /// The extras the dependent asked of the dependency.
    pub extras: BTreeSet<Extra>,
}

/// The result of a resolution: an adjacency-list dependency graph with at
/// most one node per canonical package name.
#[derive(Debug)]
pub struct SolutionGraph {
    nodes: IndexMap<NormalizedPackageName, SolutionNode>,
    environment_count: usize,
}

impl SolutionGraph {
    pub(crate) fn new(environment_count: usize) -> Self {
        Self {
            nodes: IndexMap::new(),
            environment_count,
        }
    }

    /// Inserts or replaces the node for a package, returning the previously
    /// selected version when there was one.
    pub(crate) fn upsert(&mut self, node: SolutionNode) -> Option<Version> {
        self.nodes
            .insert(node.name.clone(), node)
            .map(|previous| previous.version)
    }

    /// Drops every node that is not reachable from the given roots. Called
    /// once at the end of a resolution, where replaced selections may have
    /// left behind packages nothing depends on anymore.
    pub(crate) fn retain_reachable(&mut self, roots: &[NormalizedPackageName]) {
        let mut reachable: HashSet<NormalizedPackageName> = HashSet::new();
        let mut frontier: VecDeque<NormalizedPackageName> = roots.iter().cloned().collect();

        while let Some(name) = frontier.pop_front() {
            if !reachable.insert(name.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&name) {
                for edge in &node.dependencies {
                    frontier.push_back(edge.name.clone());
                }
            }
        }

        self.nodes.retain(|name, _| reachable.contains(name));
    }

    /// Looks up the node of a package.
    pub fn get(&self, name: &NormalizedPackageName) -> Option<&SolutionNode> {
        self.nodes.get(name)
    }

    /// Iterates over all nodes in insertion order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &SolutionNode> {
        self.nodes.values()
    }

    /// Iterates over all edges as `(dependent, edge)` pairs.
    pub fn iter_edges(&self) -> impl Iterator<Item = (&SolutionNode, &DependencyEdge)> {
        self.nodes
            .values()
            .flat_map(|node| node.dependencies.iter().map(move |edge| (node, edge)))
    }

    /// Number of selected packages.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A stable-sorted projection of the graph for lockfile writers: one
    /// record per package, ordered by name, with everything a lockfile needs
    /// in serializable form.
    pub fn to_lockfile_view(&self) -> Vec<LockedPackage> {
        let mut records: Vec<LockedPackage> = self
            .nodes
            .values()
            .map(|node| LockedPackage {
                name: node.name.to_string(),
                version: node.version.to_string(),
                extras: node.extras.iter().map(|e| e.as_str().to_owned()).collect(),
                file: node.file.as_ref().map(|f| f.filename.to_string()),
                url: node
                    .file
                    .as_ref()
                    .map(|f| f.url.to_string())
                    .or_else(|| node.url.as_ref().map(ToString::to_string)),
                sha256: node
                    .file
                    .as_ref()
                    .and_then(|f| f.hashes.as_ref())
                    .and_then(|h| h.sha256.as_ref())
                    .map(|digest| {
                        digest
                            .iter()
                            .map(|byte| format!("{byte:02x}"))
                            .collect::<String>()
                    }),
                requires_python: node.requires_python.as_ref().map(ToString::to_string),
                environments: node.environments.environment_indices(self.environment_count),
                metadata_tier: node.metadata_tier,
                dependencies: {
                    let mut names: Vec<String> = node
                        .dependencies
                        .iter()
                        .map(|edge| edge.name.to_string())
                        .collect();
                    names.sort();
                    names.dedup();
                    names
                },
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// The lockfile projection rendered as pretty-printed JSON, for callers
    /// that just want to write the solution somewhere.
    pub fn to_lockfile_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_lockfile_view())
    }
}

/// One record of the lockfile projection of a [`SolutionGraph`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockedPackage {
    /// Canonical package name.
    pub name: String,
    /// Selected version.
    pub version: String,
    /// Activated extras, sorted.
    pub extras: Vec<String>,
    /// Filename of the selected file, when one was selected.
    pub file: Option<String>,
    /// Download URL of the selected file or the direct-URL pin.
    pub url: Option<String>,
    /// Hex sha256 of the selected file, when known.
    pub sha256: Option<String>,
    /// The `Requires-Python` of the selected release.
    pub requires_python: Option<String>,
    /// Indices of the target environments the package applies to.
    pub environments: Vec<usize>,
    /// Which source supplied the dependency metadata.
    pub metadata_tier: MetadataTier,
    /// Canonical names of the package's dependencies, sorted.
    pub dependencies: Vec<String>,
}
