use rustc_hash::FxHashMap;
use tracing::debug;

use kext_types::{BundleIdentifier, KextArena, KextId, LibraryRequirement};
use kext_version::Version;

use crate::index::CandidateIndex;

/// Find the candidate that satisfies a library requirement for
/// `identifier` at `version`.
///
/// Walks the spine head to tail. A loaded compatible node wins
/// immediately; otherwise the first compatible node seen is used, which
/// is the latest compatible version since the spine decreases.
pub(crate) fn find_compatible(
    arena: &KextArena,
    index: &CandidateIndex,
    identifier: &str,
    version: &Version,
) -> Option<KextId> {
    let head = index.head(identifier)?;
    let mut first = None;
    for node in CandidateIndex::spine(arena, head) {
        let kext = &arena[node];
        if kext.is_compatible_with(version) {
            if kext.loaded {
                return Some(node);
            }
            if first.is_none() {
                first = Some(node);
            }
        }
    }
    first
}

/// Resolve one kext's declared libraries against the index, recording the
/// result on the kext.
pub(crate) fn resolve_kext(arena: &mut KextArena, index: &CandidateIndex, id: KextId) {
    let requirements: Vec<LibraryRequirement> = arena[id].libraries.clone();
    let mut resolved = Vec::with_capacity(requirements.len());
    for requirement in &requirements {
        match find_compatible(
            arena,
            index,
            requirement.identifier.as_str(),
            &requirement.version,
        ) {
            Some(dependency) => resolved.push(dependency),
            None => {
                debug!(
                    kext = %arena[id].identifier,
                    library = %requirement.identifier,
                    version = %requirement.version,
                    "library requirement unsatisfied"
                );
            }
        }
    }
    arena[id].dependencies = Some(resolved);
}

/// Resolve every node in the index, then prune the nodes that came up
/// short. Pruned handles are appended to `missing`.
pub(crate) fn resolve_and_prune(
    arena: &mut KextArena,
    index: &mut CandidateIndex,
    missing: &mut Vec<KextId>,
) {
    let identifiers: Vec<BundleIdentifier> = index.identifiers().cloned().collect();

    // Phase 1: every spine node and every duplicate, in chain order.
    for identifier in &identifiers {
        let Some(head) = index.head(identifier.as_str()) else {
            continue;
        };
        for node in CandidateIndex::flatten(arena, head) {
            resolve_kext(arena, index, node);
        }
    }

    // Phase 2: prune, re-stitching both chains around the losses.
    for identifier in &identifiers {
        prune_chain(arena, index, identifier, missing);
    }
}

/// Walk one identifier's spine with `prev`/`cur` cursors, dropping nodes
/// without their dependencies.
///
/// A failing spine node with a duplicate promotes that duplicate into its
/// slot, and the promoted node is examined in the same pass, since it may
/// be missing dependencies itself. A failing node without one unlinks,
/// which can empty the chain and remove the identifier entirely.
fn prune_chain(
    arena: &mut KextArena,
    index: &mut CandidateIndex,
    identifier: &BundleIdentifier,
    missing: &mut Vec<KextId>,
) {
    let mut prev: Option<KextId> = None;
    let mut cur = index.head(identifier.as_str());
    while let Some(node) = cur {
        let next = arena[node].prior;
        if arena[node].has_all_dependencies() {
            // The spine node survives; sweep its duplicate list.
            let mut tail = node;
            while let Some(duplicate) = arena[tail].duplicate {
                if arena[duplicate].has_all_dependencies() {
                    tail = duplicate;
                } else {
                    debug!(kext = %arena[duplicate].identifier, version = %arena[duplicate].version,
                        "pruning duplicate with unresolved dependencies");
                    missing.push(duplicate);
                    arena[tail].duplicate = arena[duplicate].duplicate;
                    arena[duplicate].duplicate = None;
                }
            }
            prev = Some(node);
            cur = next;
            continue;
        }

        debug!(kext = %arena[node].identifier, version = %arena[node].version,
            "pruning candidate with unresolved dependencies");
        missing.push(node);
        match arena[node].duplicate {
            None => {
                match prev {
                    Some(prev) => arena[prev].prior = next,
                    None => index.set_head(identifier, next),
                }
                arena[node].prior = None;
                cur = next;
            }
            Some(promoted) => {
                // The duplicate takes over the spine slot and is itself
                // re-examined on the next iteration.
                arena[promoted].prior = next;
                match prev {
                    Some(prev) => arena[prev].prior = Some(promoted),
                    None => index.set_head(identifier, Some(promoted)),
                }
                arena[node].prior = None;
                arena[node].duplicate = None;
                cur = Some(promoted);
            }
        }
    }
}

/// Why a dependency closure could not be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClosureFailure {
    /// A member's library requirements did not all resolve.
    Missing(KextId),
    /// The graph loops through this kext.
    Cycle(KextId),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Resolve the target and its transitive dependencies, returning the
/// closure in dependency order with the target last.
pub(crate) fn dependency_closure(
    arena: &mut KextArena,
    index: &CandidateIndex,
    target: KextId,
) -> Result<Vec<KextId>, ClosureFailure> {
    let mut marks = FxHashMap::default();
    let mut closure = Vec::new();
    visit(arena, index, target, &mut marks, &mut closure)?;
    Ok(closure)
}

fn visit(
    arena: &mut KextArena,
    index: &CandidateIndex,
    id: KextId,
    marks: &mut FxHashMap<KextId, Mark>,
    closure: &mut Vec<KextId>,
) -> Result<(), ClosureFailure> {
    match marks.get(&id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => return Err(ClosureFailure::Cycle(id)),
        None => {}
    }
    marks.insert(id, Mark::InProgress);
    if arena[id].dependencies.is_none() {
        resolve_kext(arena, index, id);
    }
    if !arena[id].has_all_dependencies() {
        return Err(ClosureFailure::Missing(id));
    }
    let dependencies = arena[id].dependencies.clone().unwrap_or_default();
    for dependency in dependencies {
        if dependency != id {
            visit(arena, index, dependency, marks, closure)?;
        }
    }
    marks.insert(id, Mark::Done);
    closure.push(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use url::Url;

    use kext_types::{Kext, RepositoryId};

    use super::*;

    fn alloc(
        arena: &mut KextArena,
        index: &mut CandidateIndex,
        identifier: &str,
        version: &str,
        libraries: &[(&str, &str)],
    ) -> KextId {
        let mut kext = Kext::new(
            BundleIdentifier::from_str(identifier).unwrap(),
            Version::from_str(version).unwrap(),
            Url::parse("file:///tmp/repo/X.kext/").unwrap(),
            RepositoryId::new(0),
        );
        kext.compatible_version = Some(Version::from_str("1.0").unwrap());
        kext.libraries = libraries
            .iter()
            .map(|(identifier, version)| LibraryRequirement {
                identifier: BundleIdentifier::from_str(identifier).unwrap(),
                version: Version::from_str(version).unwrap(),
            })
            .collect();
        let id = arena.alloc(kext);
        index.insert(arena, id);
        id
    }

    #[test]
    fn promoted_duplicate_is_rechecked_in_the_same_pass() {
        let mut arena = KextArena::new();
        let mut index = CandidateIndex::new();
        // Both 1.0 bundles of com.example.b require a library that does
        // not exist; the whole chain must disappear, duplicate included.
        let first = alloc(&mut arena, &mut index, "com.example.b", "1.0", &[("com.example.none", "1.0")]);
        let second = alloc(&mut arena, &mut index, "com.example.b", "1.0", &[("com.example.none", "1.0")]);

        let mut missing = Vec::new();
        resolve_and_prune(&mut arena, &mut index, &mut missing);

        assert_eq!(index.head("com.example.b"), None);
        assert_eq!(missing, [first, second]);
    }

    #[test]
    fn closure_orders_dependencies_before_dependents() {
        let mut arena = KextArena::new();
        let mut index = CandidateIndex::new();
        let base = alloc(&mut arena, &mut index, "com.example.base", "1.0", &[]);
        let middle = alloc(
            &mut arena,
            &mut index,
            "com.example.middle",
            "1.0",
            &[("com.example.base", "1.0")],
        );
        let top = alloc(
            &mut arena,
            &mut index,
            "com.example.top",
            "1.0",
            &[("com.example.middle", "1.0"), ("com.example.base", "1.0")],
        );

        let closure = dependency_closure(&mut arena, &index, top).unwrap();
        assert_eq!(closure, [base, middle, top]);
    }

    #[test]
    fn closure_detects_cycles() {
        let mut arena = KextArena::new();
        let mut index = CandidateIndex::new();
        let a = alloc(
            &mut arena,
            &mut index,
            "com.example.a",
            "1.0",
            &[("com.example.b", "1.0")],
        );
        let _b = alloc(
            &mut arena,
            &mut index,
            "com.example.b",
            "1.0",
            &[("com.example.a", "1.0")],
        );

        assert!(matches!(
            dependency_closure(&mut arena, &index, a),
            Err(ClosureFailure::Cycle(_))
        ));
    }
}
