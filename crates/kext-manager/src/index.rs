use indexmap::IndexMap;

use kext_types::{BundleIdentifier, KextArena, KextId};

/// The mapping from bundle identifier to the head of its version chain.
///
/// Per identifier the chain is two-dimensional: `prior` links run down a
/// spine of strictly decreasing versions, and each spine node's
/// `duplicate` links run along bundles that share its version (same kext
/// discovered in several repositories). The head is always the greatest
/// known version; this map is the single point of truth for it.
#[derive(Debug, Default)]
pub(crate) struct CandidateIndex {
    map: IndexMap<BundleIdentifier, KextId>,
}

impl CandidateIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    pub(crate) fn head(&self, identifier: &str) -> Option<KextId> {
        self.map.get(identifier).copied()
    }

    /// Identifiers in discovery order.
    pub(crate) fn identifiers(&self) -> impl Iterator<Item = &BundleIdentifier> {
        self.map.keys()
    }

    /// Replace (or, with `None`, remove) an identifier's head.
    pub(crate) fn set_head(&mut self, identifier: &BundleIdentifier, head: Option<KextId>) {
        match head {
            Some(head) => {
                self.map.insert(identifier.clone(), head);
            }
            None => {
                // Chain order of the remaining identifiers must survive.
                self.map.shift_remove(identifier);
            }
        }
    }

    /// Insert an admitted kext into its identifier's chain.
    ///
    /// The three cases: a greater version becomes the new head; an equal
    /// version appends to that spine node's duplicate list; a smaller
    /// version splices into the spine so that versions keep strictly
    /// decreasing. Inserting a kext that is already in the chain is a
    /// no-op.
    pub(crate) fn insert(&mut self, arena: &mut KextArena, incoming: KextId) {
        let identifier = arena[incoming].identifier.clone();
        let Some(head) = self.head(identifier.as_str()) else {
            self.map.insert(identifier, incoming);
            return;
        };
        if head == incoming {
            return;
        }

        let version = arena[incoming].version;
        if version > arena[head].version {
            arena[incoming].prior = Some(head);
            self.map.insert(identifier, incoming);
            return;
        }

        let mut prev: Option<KextId> = None;
        let mut cursor = head;
        loop {
            if cursor == incoming {
                return;
            }
            let cursor_version = arena[cursor].version;
            if version == cursor_version {
                // Append to the duplicate list; discovery order is what
                // tie-breaks equal versions.
                let mut tail = cursor;
                while let Some(next) = arena[tail].duplicate {
                    if next == incoming {
                        return;
                    }
                    tail = next;
                }
                arena[tail].duplicate = Some(incoming);
                return;
            }
            if version > cursor_version {
                // Splice between prev and cursor. The head case was
                // handled above, so prev exists here.
                arena[incoming].prior = Some(cursor);
                if let Some(prev) = prev {
                    arena[prev].prior = Some(incoming);
                }
                return;
            }
            match arena[cursor].prior {
                Some(next) => {
                    prev = Some(cursor);
                    cursor = next;
                }
                None => {
                    arena[cursor].prior = Some(incoming);
                    return;
                }
            }
        }
    }

    /// The spine of an identifier, head to tail.
    pub(crate) fn spine<'a>(
        arena: &'a KextArena,
        head: KextId,
    ) -> impl Iterator<Item = KextId> + 'a {
        std::iter::successors(Some(head), move |id| arena[*id].prior)
    }

    /// A spine node's duplicate list, nearest first.
    pub(crate) fn duplicates<'a>(
        arena: &'a KextArena,
        node: KextId,
    ) -> impl Iterator<Item = KextId> + 'a {
        std::iter::successors(arena[node].duplicate, move |id| arena[*id].duplicate)
    }

    /// Every node of an identifier's chain: spine order, with each spine
    /// node's duplicates before the next spine node.
    pub(crate) fn flatten(arena: &KextArena, head: KextId) -> Vec<KextId> {
        let mut nodes = Vec::new();
        for spine_node in Self::spine(arena, head) {
            nodes.push(spine_node);
            nodes.extend(Self::duplicates(arena, spine_node));
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use url::Url;

    use kext_types::{Kext, RepositoryId};
    use kext_version::Version;

    use super::*;

    fn insert_version(
        index: &mut CandidateIndex,
        arena: &mut KextArena,
        version: &str,
    ) -> KextId {
        let kext = Kext::new(
            BundleIdentifier::from_str("com.example.a").unwrap(),
            Version::from_str(version).unwrap(),
            Url::parse("file:///tmp/repo/A.kext/").unwrap(),
            RepositoryId::new(0),
        );
        let id = arena.alloc(kext);
        index.insert(arena, id);
        id
    }

    fn spine_versions(index: &CandidateIndex, arena: &KextArena) -> Vec<String> {
        let head = index.head("com.example.a").unwrap();
        CandidateIndex::spine(arena, head)
            .map(|id| arena[id].version.to_string())
            .collect()
    }

    #[test]
    fn spine_stays_strictly_decreasing_whatever_the_insert_order() {
        let orders: &[&[&str]] = &[
            &["3.0", "2.0", "1.0"],
            &["1.0", "2.0", "3.0"],
            &["2.0", "3.0", "1.0"],
            &["2.0", "1.0", "3.0"],
        ];
        for order in orders {
            let mut arena = KextArena::new();
            let mut index = CandidateIndex::new();
            for version in *order {
                insert_version(&mut index, &mut arena, version);
            }
            assert_eq!(
                spine_versions(&index, &arena),
                ["3", "2", "1"],
                "insert order {order:?}"
            );
        }
    }

    #[test]
    fn equal_versions_chain_as_duplicates_in_discovery_order() {
        let mut arena = KextArena::new();
        let mut index = CandidateIndex::new();
        let first = insert_version(&mut index, &mut arena, "1.0");
        let second = insert_version(&mut index, &mut arena, "1.0");
        let third = insert_version(&mut index, &mut arena, "1.0");

        assert_eq!(index.head("com.example.a"), Some(first));
        let duplicates: Vec<KextId> = CandidateIndex::duplicates(&arena, first).collect();
        assert_eq!(duplicates, [second, third]);
        for id in duplicates {
            assert_eq!(arena[id].version, arena[first].version);
        }
    }

    #[test]
    fn duplicates_attach_to_mid_spine_nodes_too() {
        let mut arena = KextArena::new();
        let mut index = CandidateIndex::new();
        insert_version(&mut index, &mut arena, "2.0");
        let low = insert_version(&mut index, &mut arena, "1.0");
        let low_twin = insert_version(&mut index, &mut arena, "1.0");

        assert_eq!(spine_versions(&index, &arena), ["2", "1"]);
        assert_eq!(
            CandidateIndex::duplicates(&arena, low).collect::<Vec<_>>(),
            [low_twin]
        );
    }

    #[test]
    fn reinserting_the_same_kext_is_a_no_op() {
        let mut arena = KextArena::new();
        let mut index = CandidateIndex::new();
        let head = insert_version(&mut index, &mut arena, "2.0");
        let tail = insert_version(&mut index, &mut arena, "1.0");
        let twin = insert_version(&mut index, &mut arena, "1.0");

        for id in [head, tail, twin] {
            index.insert(&mut arena, id);
        }
        assert_eq!(spine_versions(&index, &arena), ["2", "1"]);
        assert_eq!(
            CandidateIndex::flatten(&arena, head),
            [head, tail, twin]
        );
    }

    #[test]
    fn flatten_interleaves_duplicates_before_advancing() {
        let mut arena = KextArena::new();
        let mut index = CandidateIndex::new();
        let high = insert_version(&mut index, &mut arena, "2.0");
        let high_twin = insert_version(&mut index, &mut arena, "2.0");
        let low = insert_version(&mut index, &mut arena, "1.0");

        assert_eq!(
            CandidateIndex::flatten(&arena, high),
            [high, high_twin, low]
        );
    }
}
