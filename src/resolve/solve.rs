use crate::index::{MetadataTier, PackageIndex};
use crate::resolve::error::{ResolveError, TriedVersions, VersionReasons};
use crate::resolve::graph::{DependencyEdge, SolutionGraph, SolutionNode};
use crate::resolve::requirement_queue::{QueueEntry, RequiredBy, RequirementQueue};
use crate::resolve::solve_options::ResolveOptions;
use crate::resolve::version_select::candidate_versions;
use crate::resolve::NormalizedRequirement;
use crate::target_env::TargetEnvironments;
use crate::types::{
    NormalizedPackageName, PackageMetadata, ReleaseFile, Requirement, Version,
};
use crate::wheel_builder::WheelBuilder;
use futures::{stream, StreamExt};
use std::collections::BTreeSet;
use url::Url;

/// The outcome of resolving one pending requirement: the chosen version and
/// file plus the metadata that will drive the next expansion.
struct ResolvedRequirement {
    entry: QueueEntry,
    version: Version,
    file: Option<ReleaseFile>,
    url: Option<Url>,
    metadata: PackageMetadata,
    tier: MetadataTier,
}

/// Resolves a set of root requirements into a [`SolutionGraph`] that
/// satisfies every version constraint, marker and extra across all target
/// environments.
///
/// The resolver is single-assignment and first-fit: each package gets
/// exactly one version, chosen highest-first under the merged constraints,
/// and a constraint set that admits no version is a hard failure rather than
/// a reason to backtrack.
///
/// Resolution proceeds in rounds. Every round snapshots the pending work,
/// resolves each pending package concurrently (bounded by
/// [`ResolveOptions::max_concurrent_fetches`]), then applies the completions
/// in name order: updating the graph, merging the discovered dependencies
/// back into the work set. A round that leaves no pending work means a fixed
/// point has been reached. Merges only ever narrow constraints and widen
/// extras, so the loop terminates.
pub async fn resolve(
    index: &PackageIndex,
    requirements: &[Requirement],
    environments: &TargetEnvironments,
    builder: Option<&WheelBuilder>,
    options: &ResolveOptions,
) -> Result<SolutionGraph, ResolveError> {
    let mut queue = RequirementQueue::new(environments.len());
    let mut graph = SolutionGraph::new(environments.len());
    let mut roots: Vec<NormalizedPackageName> = Vec::new();

    for requirement in requirements {
        let normalized = NormalizedRequirement::from_requirement(requirement)?;
        let applicability =
            environments.evaluate_marker(normalized.marker.as_ref(), &BTreeSet::new());
        if !applicability.admits_any() {
            tracing::debug!(
                requirement=%requirement,
                "root requirement applies to no target environment, skipping"
            );
            continue;
        }
        roots.push(normalized.name());
        queue.push(
            normalized.display_name,
            normalized.extras,
            normalized.specifiers,
            normalized.url,
            applicability,
            RequiredBy::Root,
        );
    }

    let mut round = 0u32;
    loop {
        let pending = queue.take_pending();
        if pending.is_empty() {
            break;
        }
        round += 1;
        tracing::debug!(round, pending = pending.len(), "starting resolution round");

        let mut outcomes: Vec<Result<ResolvedRequirement, (NormalizedPackageName, ResolveError)>> =
            stream::iter(pending.into_iter().map(|entry| {
                let name = entry.name.clone();
                async move {
                    resolve_requirement(index, environments, builder, options, entry)
                        .await
                        .map_err(|e| (name, e))
                }
            }))
            .buffer_unordered(options.max_concurrent_fetches)
            .collect()
            .await;

        // Completion order is whatever the network made of it; applying in
        // name order keeps the final graph a function of the inputs alone.
        outcomes.sort_by(|a, b| outcome_name(a).cmp(outcome_name(b)));

        for outcome in outcomes {
            match outcome {
                Ok(resolved) => apply_selection(&mut graph, &mut queue, environments, resolved)?,
                Err((name, error)) => return Err(with_requirement_chain(&queue, &name, error)),
            }
        }
    }

    graph.retain_reachable(&roots);
    tracing::info!(rounds = round, packages = graph.len(), "resolution converged");
    Ok(graph)
}

fn outcome_name(
    outcome: &Result<ResolvedRequirement, (NormalizedPackageName, ResolveError)>,
) -> &NormalizedPackageName {
    match outcome {
        Ok(resolved) => &resolved.entry.name,
        Err((name, _)) => name,
    }
}

/// Resolves one pending requirement: pick a version, fetch its metadata and
/// confirm the metadata's `Requires-Python` against every environment.
/// Suspends on registry I/O only; all bookkeeping happens in
/// [`apply_selection`] on the driver side.
async fn resolve_requirement(
    index: &PackageIndex,
    environments: &TargetEnvironments,
    builder: Option<&WheelBuilder>,
    options: &ResolveOptions,
    entry: QueueEntry,
) -> Result<ResolvedRequirement, ResolveError> {
    // Direct-URL pins bypass version selection; the caller supplies their
    // metadata.
    if let Some(url) = entry.url.clone() {
        let Some(provided) = options.direct_url_metadata.get(&entry.name) else {
            return Err(ResolveError::MissingDirectUrlMetadata {
                name: entry.name.clone(),
                url,
            });
        };
        if let Some(requires_python) = &provided.metadata.requires_python {
            if let Some(environment) = environments.python_mismatch(requires_python) {
                return Err(ResolveError::NoCompatibleVersion {
                    name: entry.name.clone(),
                    reasons: VersionReasons(vec![(
                        provided.metadata.version.clone(),
                        format!("Requires-Python {requires_python} rejects {environment}"),
                    )]),
                });
            }
        }
        return Ok(ResolvedRequirement {
            version: provided.metadata.version.clone(),
            file: None,
            url: Some(provided.url.clone()),
            metadata: provided.metadata.clone(),
            tier: MetadataTier::Provided,
            entry,
        });
    }

    let releases = index.available_releases(&entry.name).await?;
    let selection = candidate_versions(
        &entry,
        &releases,
        environments,
        &options.pre_release_resolution,
    )
    .map_err(|_| ResolveError::VersionConflict {
        name: entry.name.clone(),
        constraints: entry.constraints_display(),
        tried: TriedVersions(Vec::new()),
    })?;

    let mut reasons = selection.rejected;
    for candidate in selection.candidates {
        let files = releases
            .get(&candidate.version)
            .expect("candidates come from this release map");
        let resolved = index
            .get_metadata(&entry.name, &candidate.version, files, builder)
            .await?;

        // The index-reported requires_python can lag behind the authoritative
        // metadata, so the check is repeated on what the metadata says.
        if let Some(requires_python) = &resolved.metadata.requires_python {
            if let Some(environment) = environments.python_mismatch(requires_python) {
                reasons.push((
                    candidate.version.clone(),
                    format!("Requires-Python {requires_python} rejects {environment}"),
                ));
                continue;
            }
        }

        return Ok(ResolvedRequirement {
            version: candidate.version,
            file: Some(candidate.file),
            url: None,
            metadata: resolved.metadata.clone(),
            tier: resolved.tier,
            entry,
        });
    }

    Err(ResolveError::NoCompatibleVersion {
        name: entry.name.clone(),
        reasons: VersionReasons(reasons),
    })
}

/// Applies one completed selection: writes the node, expands the admitted
/// dependencies into the work set and marks the entry as selected. Runs in
/// the driver's execution context, never suspends.
fn apply_selection(
    graph: &mut SolutionGraph,
    queue: &mut RequirementQueue,
    environments: &TargetEnvironments,
    resolved: ResolvedRequirement,
) -> Result<(), ResolveError> {
    let ResolvedRequirement {
        entry,
        version,
        file,
        url,
        metadata,
        tier,
    } = resolved;

    for extra in &entry.extras {
        if !metadata.provides_extras.contains(extra) {
            tracing::warn!(
                package=%entry.name,
                %version,
                "extra [{extra}] was requested but the release does not declare it"
            );
        }
    }

    let mut edges = Vec::new();
    for requirement in &metadata.requires_dist {
        // `extra == ...` clauses see the extras selected on this package.
        let applicability =
            environments.evaluate_marker(requirement.marker.as_ref(), &entry.extras);
        if !applicability.admits_any() {
            continue;
        }

        let dependency = NormalizedRequirement::from_requirement(requirement)?;
        edges.push(DependencyEdge {
            name: dependency.name(),
            extras: dependency.extras.clone(),
        });
        queue.push(
            dependency.display_name,
            dependency.extras,
            dependency.specifiers,
            dependency.url,
            applicability,
            RequiredBy::Package(entry.name.clone()),
        );
    }

    let node = SolutionNode {
        name: entry.name.clone(),
        display_name: entry.display_name.clone(),
        version,
        extras: entry.extras.clone(),
        file,
        url,
        requires_python: metadata.requires_python.clone(),
        environments: entry.applicability.clone(),
        metadata_tier: tier,
        dependencies: edges,
        required_by: entry.required_by.clone(),
    };

    let new_version = node.version.clone();
    if let Some(previous) = graph.upsert(node) {
        if previous != new_version {
            tracing::info!(
                package=%entry.name,
                from=%previous,
                to=%new_version,
                "selection replaced, dependents re-validate on the next round"
            );
        }
    }

    queue.mark_selected(&entry.name, entry.revision());
    Ok(())
}

/// Attaches the requirement chain from a root to the failing package, so the
/// reported error shows how resolution got there.
fn with_requirement_chain(
    queue: &RequirementQueue,
    name: &NormalizedPackageName,
    error: ResolveError,
) -> ResolveError {
    let chain = queue.chain_to_root(name);
    if chain.len() <= 1 {
        return error;
    }
    ResolveError::Dependency {
        name: name.clone(),
        chain: chain.join(" -> "),
        source: Box::new(error),
    }
}
