//! State hierarchy queries (§4.4): ancestor paths, descendant tests, LCCA,
//! parallel-region detection — each with a cached fast path over the
//! `HierarchyCache` built once in validation pass 7, and a slow fallback that
//! walks `Document` directly (used by the cache-builder itself, and as a
//! correctness cross-check in tests).

use std::collections::{HashMap, HashSet};

use crate::document::{Document, StateId, StateType};

/// Ancestor paths, descendant sets, the LCCA matrix, and per-parallel region
/// membership, computed once post-validation (§3 "HierarchyCache").
#[derive(Debug, Clone, Default)]
pub struct HierarchyCache {
    /// state id -> root-to-state path, inclusive of both ends.
    ancestor_paths: HashMap<StateId, Vec<StateId>>,
    /// ancestor id -> set of all descendants (not including itself).
    descendants: HashMap<StateId, HashSet<StateId>>,
    /// unordered pair key -> LCCA id (absent if no compound/parallel ancestor
    /// in common).
    lcca: HashMap<(StateId, StateId), Option<StateId>>,
    /// state id -> parallel ancestor ids, innermost first.
    parallel_ancestors: HashMap<StateId, Vec<StateId>>,
    /// parallel id -> region-child id -> descendants of that region child.
    parallel_regions: HashMap<StateId, HashMap<StateId, HashSet<StateId>>>,
}

fn pair_key(a: &str, b: &str) -> (StateId, StateId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl HierarchyCache {
    pub fn build(doc: &Document) -> Self {
        let mut cache = HierarchyCache::default();

        for state in doc.states_iter() {
            let path = slow_ancestor_path(doc, &state.id);
            cache.ancestor_paths.insert(state.id.clone(), path);
        }

        for state in doc.states_iter() {
            let mut desc = HashSet::new();
            collect_descendants(doc, &state.id, &mut desc);
            cache.descendants.insert(state.id.clone(), desc);
        }

        for state in doc.states_iter() {
            let path = &cache.ancestor_paths[&state.id];
            let parallels: Vec<StateId> = path
                .iter()
                .rev()
                .skip(1) // skip the state itself
                .filter(|id| doc.state(id).map(|s| s.is_parallel()).unwrap_or(false))
                .cloned()
                .collect();
            cache.parallel_ancestors.insert(state.id.clone(), parallels);
        }

        let ids: Vec<StateId> = doc.states_iter().map(|s| s.id.clone()).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i) {
                let result = slow_lcca(doc, a, b, &cache.ancestor_paths);
                cache.lcca.insert(pair_key(a, b), result);
            }
        }

        for state in doc.states_iter() {
            if state.is_parallel() {
                let mut regions = HashMap::new();
                for child in state.non_initial_children(doc) {
                    let mut desc = HashSet::new();
                    desc.insert(child.clone());
                    collect_descendants(doc, child, &mut desc);
                    regions.insert(child.clone(), desc);
                }
                cache.parallel_regions.insert(state.id.clone(), regions);
            }
        }

        cache
    }

    pub fn ancestor_path(&self, id: &str) -> &[StateId] {
        self.ancestor_paths
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_descendant(&self, a: &str, of_b: &str) -> bool {
        self.descendants
            .get(of_b)
            .map(|set| set.contains(a))
            .unwrap_or(false)
    }

    pub fn lcca(&self, a: &str, b: &str) -> Option<StateId> {
        self.lcca.get(&pair_key(a, b)).cloned().flatten()
    }

    pub fn parallel_ancestors(&self, id: &str) -> &[StateId] {
        self.parallel_ancestors
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The region-child ids of a parallel state, i.e. the direct children
    /// whose descendant sets partition that parallel's concurrent regions.
    pub fn parallel_regions_of(&self, parallel_id: &str) -> Vec<StateId> {
        self.parallel_regions
            .get(parallel_id)
            .map(|regions| regions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// True iff some parallel ancestor `p` has `a` and `b` descend through
    /// different children of `p`.
    pub fn in_different_regions(&self, a: &str, b: &str) -> bool {
        for parallel in self.parallel_ancestors(a) {
            if let Some(regions) = self.parallel_regions.get(parallel) {
                let region_of = |id: &str| -> Option<&StateId> {
                    regions
                        .iter()
                        .find(|(_, members)| members.contains(id))
                        .map(|(child, _)| child)
                };
                if let (Some(ra), Some(rb)) = (region_of(a), region_of(b)) {
                    if ra != rb {
                        return true;
                    }
                }
            }
        }
        false
    }
}

fn slow_ancestor_path(doc: &Document, id: &str) -> Vec<StateId> {
    let mut path = vec![id.to_string()];
    let mut current = id.to_string();
    while let Some(state) = doc.state(&current) {
        match &state.parent {
            Some(parent) => {
                path.push(parent.clone());
                current = parent.clone();
            }
            None => break,
        }
    }
    path.reverse();
    path
}

pub(crate) fn collect_descendants(doc: &Document, id: &str, out: &mut HashSet<StateId>) {
    if let Some(state) = doc.state(id) {
        for child in &state.children {
            out.insert(child.clone());
            collect_descendants(doc, child, out);
        }
    }
}

/// The deepest compound/parallel ancestor containing both `a` and `b` (or,
/// if `a == b`, their parent) — §4.4 `lcca(a, b)`. Candidates are drawn from
/// *proper* ancestors of each endpoint, never the endpoints themselves, so
/// `lcca(s, descendant_of_s)` returns an ancestor of `s`, not `s` (§4.4 "not
/// the states themselves").
fn slow_lcca(
    doc: &Document,
    a: &str,
    b: &str,
    paths: &HashMap<StateId, Vec<StateId>>,
) -> Option<StateId> {
    let path_a = paths.get(a)?;
    let path_b = paths.get(b)?;

    // Both endpoints are always excluded from the candidate set: `path[..len
    // - 1]` drops the trailing (self) entry regardless of whether `a == b`.
    let start_a = path_a.len().saturating_sub(1);
    let start_b = path_b.len().saturating_sub(1);

    let set_b: HashSet<&StateId> = path_b[..start_b].iter().collect();
    for candidate in path_a[..start_a].iter().rev() {
        if set_b.contains(candidate) {
            if let Some(state) = doc.state(candidate) {
                if matches!(state.state_type, StateType::Compound | StateType::Parallel) {
                    return Some(candidate.clone());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{State, StateType};

    fn build_doc() -> Document {
        // root(compound): a(compound): a1, a2 ; b(atomic)
        let mut doc = Document::new();
        let mut root = State::new("root".into(), StateType::Compound, 0);
        root.children = vec!["a".into(), "b".into()];
        let mut a = State::new("a".into(), StateType::Compound, 1);
        a.parent = Some("root".into());
        a.children = vec!["a1".into(), "a2".into()];
        let mut a1 = State::new("a1".into(), StateType::Atomic, 2);
        a1.parent = Some("a".into());
        let mut a2 = State::new("a2".into(), StateType::Atomic, 3);
        a2.parent = Some("a".into());
        let mut b = State::new("b".into(), StateType::Atomic, 4);
        b.parent = Some("root".into());

        doc.top_level.push("root".into());
        doc.insert_state(root);
        doc.insert_state(a);
        doc.insert_state(a1);
        doc.insert_state(a2);
        doc.insert_state(b);
        doc
    }

    #[test]
    fn lcca_is_symmetric_and_is_deepest_common_ancestor() {
        let doc = build_doc();
        let cache = HierarchyCache::build(&doc);
        assert_eq!(cache.lcca("a1", "a2"), Some("a".to_string()));
        assert_eq!(cache.lcca("a2", "a1"), Some("a".to_string()));
        assert_eq!(cache.lcca("a1", "b"), Some("root".to_string()));
    }

    #[test]
    fn is_descendant_works_transitively() {
        let doc = build_doc();
        let cache = HierarchyCache::build(&doc);
        assert!(cache.is_descendant("a1", "root"));
        assert!(cache.is_descendant("a1", "a"));
        assert!(!cache.is_descendant("b", "a"));
    }

    #[test]
    fn ancestor_path_is_root_to_state_inclusive() {
        let doc = build_doc();
        let cache = HierarchyCache::build(&doc);
        assert_eq!(cache.ancestor_path("a1"), &["root", "a", "a1"]);
    }

    #[test]
    fn parallel_regions_of_returns_direct_region_children() {
        let mut doc = Document::new();
        let mut p = State::new("p".into(), StateType::Parallel, 0);
        p.children = vec!["r1".into(), "r2".into()];
        let mut r1 = State::new("r1".into(), StateType::Compound, 1);
        r1.parent = Some("p".into());
        r1.children = vec!["r1a".into()];
        let mut r1a = State::new("r1a".into(), StateType::Atomic, 2);
        r1a.parent = Some("r1".into());
        let mut r2 = State::new("r2".into(), StateType::Atomic, 3);
        r2.parent = Some("p".into());

        doc.top_level.push("p".into());
        doc.insert_state(p);
        doc.insert_state(r1);
        doc.insert_state(r1a);
        doc.insert_state(r2);

        let cache = HierarchyCache::build(&doc);
        let mut regions = cache.parallel_regions_of("p");
        regions.sort();
        assert_eq!(regions, vec!["r1".to_string(), "r2".to_string()]);
        assert!(cache.parallel_regions_of("r1").is_empty());
    }
}
