//! Hierarchical reference data cache.
//!
//! Parent/child records are materialized into an arena-backed [`Forest`]
//! plus a name index, both derived from the underlying snapshot and rebuilt
//! whenever the snapshot version changes. Tree views handed to callers are
//! owned [`TreeNode`] values, so nothing borrows the cache.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use refdata_core::{
    CacheError, EntityId, ExecutorConfig, Record, RefDataConfig, RefDataResult,
};
use serde::Serialize;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::industry::compress_to_three_levels;
use super::policy::RefreshPolicy;
use super::snapshot::{Snapshot, SnapshotCache};
use super::tables::record_table;
use super::traits::{CacheStats, RefreshableCache};
use super::watermark::Watermark;
use crate::store::Store;

// ============================================================================
// FOREST
// ============================================================================

/// One record in the arena, linked by index.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyNode {
    pub record: Record,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// 1 for roots
    pub depth: usize,
}

/// Arena of records reachable from a root.
///
/// Records whose parent is missing, and records caught in parent cycles,
/// are never reached from a root and are left out.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    nodes: Vec<HierarchyNode>,
    roots: Vec<usize>,
    by_id: HashMap<EntityId, usize>,
    excluded: usize,
}

impl Forest {
    /// Build from flat records. Siblings are ordered by code, then id.
    pub fn build(records: impl IntoIterator<Item = Record>) -> Self {
        let mut records: Vec<Record> = records.into_iter().collect();
        records.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.id.cmp(&b.id)));
        let mut ids = HashSet::with_capacity(records.len());
        records.retain(|r| ids.insert(r.id));

        let mut children_of: HashMap<EntityId, Vec<usize>> = HashMap::new();
        let mut queue = VecDeque::new();
        for (position, record) in records.iter().enumerate() {
            match record.parent_id {
                Some(parent) => children_of.entry(parent).or_default().push(position),
                None => queue.push_back((position, None, 1)),
            }
        }

        let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
        let mut nodes: Vec<HierarchyNode> = Vec::with_capacity(slots.len());
        let mut roots = Vec::new();
        let mut by_id = HashMap::with_capacity(slots.len());

        while let Some((position, parent, depth)) = queue.pop_front() {
            let Some(record) = slots[position].take() else {
                continue;
            };
            let index = nodes.len();
            let id = record.id;
            by_id.insert(id, index);
            nodes.push(HierarchyNode {
                record,
                parent,
                children: Vec::new(),
                depth,
            });
            match parent {
                Some(p) => nodes[p].children.push(index),
                None => roots.push(index),
            }
            if let Some(children) = children_of.get(&id) {
                queue.extend(children.iter().map(|&c| (c, Some(index), depth + 1)));
            }
        }

        let excluded = slots.iter().filter(|s| s.is_some()).count();
        if excluded > 0 {
            debug!(excluded, "Unreachable records left out of hierarchy");
        }

        Self {
            nodes,
            roots,
            by_id,
            excluded,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of input records that were not reachable from a root.
    pub fn excluded(&self) -> usize {
        self.excluded
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn node(&self, index: usize) -> Option<&HierarchyNode> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[HierarchyNode] {
        &self.nodes
    }

    pub fn index_of(&self, id: EntityId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn get(&self, id: EntityId) -> Option<&HierarchyNode> {
        self.index_of(id).and_then(|i| self.nodes.get(i))
    }

    /// Ancestors of a node, nearest first.
    pub fn ancestors(&self, index: usize) -> impl Iterator<Item = &HierarchyNode> + '_ {
        let start = self.nodes.get(index).and_then(|n| n.parent);
        std::iter::successors(start, move |&i| self.nodes.get(i).and_then(|n| n.parent))
            .filter_map(move |i| self.nodes.get(i))
    }

    /// Owned subtree rooted at `index`, cut below `max_depth` when given.
    ///
    /// Built bottom-up without recursion, so chain depth is bounded only by
    /// memory.
    pub fn subtree(&self, index: usize, max_depth: Option<usize>) -> Option<TreeNode> {
        self.nodes.get(index)?;

        let mut order = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            order.push(i);
            if let Some(node) = self.nodes.get(i) {
                stack.extend(
                    node.children
                        .iter()
                        .copied()
                        .filter(|&c| self.within(c, max_depth)),
                );
            }
        }

        // Parents precede their children in `order`; walking it backwards
        // finishes every child before its parent needs it.
        let mut built: HashMap<usize, TreeNode> = HashMap::with_capacity(order.len());
        for &i in order.iter().rev() {
            let Some(node) = self.nodes.get(i) else {
                continue;
            };
            let children = node
                .children
                .iter()
                .filter_map(|c| built.remove(c))
                .collect();
            built.insert(
                i,
                TreeNode {
                    record: node.record.clone(),
                    depth: node.depth,
                    children,
                },
            );
        }
        built.remove(&index)
    }

    /// Every root with its descendants down to `max_depth`.
    pub fn tree(&self, max_depth: Option<usize>) -> Vec<TreeNode> {
        self.roots
            .iter()
            .filter(|&&r| self.within(r, max_depth))
            .filter_map(|&r| self.subtree(r, max_depth))
            .collect()
    }

    fn within(&self, index: usize, max_depth: Option<usize>) -> bool {
        match (max_depth, self.nodes.get(index)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(max), Some(node)) => node.depth <= max,
        }
    }
}

/// Owned tree view returned to callers.
///
/// Comparison, traversal and drop are iterative, so arbitrarily deep chains
/// are safe to hold.
#[derive(Debug, Serialize)]
pub struct TreeNode {
    pub record: Record,
    pub depth: usize,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Nodes in this subtree, itself included.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Depth-first search for a descendant (or self).
    pub fn find(&self, id: EntityId) -> Option<&TreeNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.record.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Ids in pre-order.
    pub fn ids(&self) -> Vec<EntityId> {
        let mut out = Vec::with_capacity(self.size());
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node.record.id);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.depth != b.depth
                || a.children.len() != b.children.len()
                || a.record != b.record
            {
                return false;
            }
            stack.extend(a.children.iter().zip(b.children.iter()));
        }
        true
    }
}

impl Clone for TreeNode {
    fn clone(&self) -> Self {
        // Pre-order slots with their parent slot, assembled back to front.
        let mut flat: Vec<(&TreeNode, usize)> = Vec::new();
        let mut stack: Vec<(&TreeNode, usize)> =
            self.children.iter().rev().map(|c| (c, 0)).collect();
        while let Some((node, parent)) = stack.pop() {
            let slot = flat.len() + 1;
            flat.push((node, parent));
            stack.extend(node.children.iter().rev().map(|c| (c, slot)));
        }

        let mut children: Vec<Vec<TreeNode>> = (0..=flat.len()).map(|_| Vec::new()).collect();
        for (position, (node, parent)) in flat.iter().enumerate().rev() {
            let mut own = std::mem::take(&mut children[position + 1]);
            own.reverse();
            children[*parent].push(TreeNode {
                record: node.record.clone(),
                depth: node.depth,
                children: own,
            });
        }

        let mut top = std::mem::take(&mut children[0]);
        top.reverse();
        TreeNode {
            record: self.record.clone(),
            depth: self.depth,
            children: top,
        }
    }
}

impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

// ============================================================================
// NAME INDEX
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    Exact,
    Prefix,
    Contains,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Hit<'a> {
    rank: MatchRank,
    collation: &'a str,
    name: &'a str,
    code: &'a str,
    index: usize,
}

#[derive(Debug, Clone, Default)]
struct IndexedName {
    collation: String,
    indices: Vec<usize>,
}

/// `(lowercased name, lowercased language) -> node indices`.
#[derive(Debug, Clone, Default)]
struct NameIndex {
    by_name: BTreeMap<(String, String), IndexedName>,
}

impl NameIndex {
    fn build(forest: &Forest) -> Self {
        let mut by_name: BTreeMap<(String, String), IndexedName> = BTreeMap::new();
        for (index, node) in forest.nodes().iter().enumerate() {
            for name in &node.record.names {
                let key = (name.name.to_lowercase(), name.language.to_lowercase());
                let entry = by_name.entry(key).or_insert_with(|| IndexedName {
                    collation: collation_key(&name.name),
                    indices: Vec::new(),
                });
                if entry.indices.last() != Some(&index) {
                    entry.indices.push(index);
                }
            }
        }
        Self { by_name }
    }

    /// Matching node indices, best first, at most `limit`.
    ///
    /// With a language hint only names in that language (or its regional
    /// variants) are considered, unless none of them match.
    fn search(&self, forest: &Forest, query: &str, language: Option<&str>, limit: usize) -> Vec<usize> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }
        let hint = language
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty());

        let mut hits = self.collect(forest, &needle, hint.as_deref());
        if hits.is_empty() && hint.is_some() {
            hits = self.collect(forest, &needle, None);
        }
        hits.sort();

        let mut seen = HashSet::new();
        hits.into_iter()
            .filter(|hit| seen.insert(hit.index))
            .take(limit)
            .map(|hit| hit.index)
            .collect()
    }

    fn collect<'a>(&'a self, forest: &'a Forest, needle: &str, hint: Option<&str>) -> Vec<Hit<'a>> {
        let mut hits = Vec::new();
        for ((name, language), entry) in &self.by_name {
            if hint.is_some_and(|h| !language_matches(language, h)) {
                continue;
            }
            let rank = if name == needle {
                MatchRank::Exact
            } else if name.starts_with(needle) {
                MatchRank::Prefix
            } else if name.contains(needle) {
                MatchRank::Contains
            } else {
                continue;
            };
            for &index in &entry.indices {
                let code = forest
                    .node(index)
                    .and_then(|n| n.record.code.as_deref())
                    .unwrap_or("");
                hits.push(Hit {
                    rank,
                    collation: &entry.collation,
                    name,
                    code,
                    index,
                });
            }
        }
        hits
    }
}

/// Sort key that orders accented letters with their base letter, so
/// "Österreich" sorts between "Niederlande" and "Polen".
fn collation_key(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn language_matches(language: &str, hint: &str) -> bool {
    language == hint || language.split(|c| c == '-' || c == '_').next() == Some(hint)
}

// ============================================================================
// HIERARCHY
// ============================================================================

/// How flat records are arranged before the forest is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HierarchyShape {
    /// Parent links as stored
    #[default]
    AsStored,
    /// Five-level industrial classification viewed as three levels
    IndustrialThreeLevel,
}

/// Forest and name index derived from one snapshot version.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    version: u64,
    watermark: Watermark,
    forest: Forest,
    names: NameIndex,
}

impl Hierarchy {
    fn build(snapshot: &Snapshot<EntityId, Record>, shape: HierarchyShape) -> Self {
        let records = snapshot.values().cloned();
        let forest = match shape {
            HierarchyShape::AsStored => Forest::build(records),
            HierarchyShape::IndustrialThreeLevel => {
                Forest::build(compress_to_three_levels(records))
            }
        };
        let names = NameIndex::build(&forest);
        Self {
            version: snapshot.version(),
            watermark: snapshot.watermark(),
            forest,
            names,
        }
    }

    /// Snapshot version this hierarchy was derived from.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn get_tree(&self, max_depth: Option<usize>) -> Vec<TreeNode> {
        self.forest.tree(max_depth)
    }

    pub fn get_top_level(&self) -> Vec<Record> {
        self.forest
            .roots()
            .iter()
            .filter_map(|&r| self.forest.node(r))
            .map(|n| n.record.clone())
            .collect()
    }

    pub fn search_by_name(&self, query: &str, language: Option<&str>, limit: usize) -> Vec<Record> {
        self.names
            .search(&self.forest, query, language, limit)
            .into_iter()
            .filter_map(|i| self.forest.node(i))
            .map(|n| n.record.clone())
            .collect()
    }

    pub fn search_by_id(&self, id: EntityId, include_children: bool) -> Option<TreeNode> {
        let index = self.forest.index_of(id)?;
        if include_children {
            self.forest.subtree(index, None)
        } else {
            let node = self.forest.node(index)?;
            Some(TreeNode {
                record: node.record.clone(),
                depth: node.depth,
                children: Vec::new(),
            })
        }
    }

    /// Path from the root down to `id`, inclusive.
    pub fn path_to(&self, id: EntityId) -> Vec<Record> {
        let Some(index) = self.forest.index_of(id) else {
            return Vec::new();
        };
        let mut path: Vec<Record> = self
            .forest
            .ancestors(index)
            .map(|n| n.record.clone())
            .collect();
        path.reverse();
        if let Some(node) = self.forest.node(index) {
            path.push(node.record.clone());
        }
        path
    }
}

/// Options for a [`HierarchicalCache`].
#[derive(Debug, Clone)]
pub struct HierarchyOptions {
    pub shape: HierarchyShape,
    pub policy: RefreshPolicy,
    pub executor: ExecutorConfig,
    pub max_search_results: usize,
}

impl Default for HierarchyOptions {
    fn default() -> Self {
        Self::from_config(&RefDataConfig::default())
    }
}

impl HierarchyOptions {
    pub fn from_config(config: &RefDataConfig) -> Self {
        Self {
            shape: HierarchyShape::AsStored,
            policy: RefreshPolicy::Eager,
            executor: config.executor.clone(),
            max_search_results: config.cache.max_search_results,
        }
    }

    pub fn with_shape(mut self, shape: HierarchyShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Cache over a parent/child table with tree and name-search views.
#[derive(Debug)]
pub struct HierarchicalCache {
    records: SnapshotCache<EntityId, Record>,
    shape: HierarchyShape,
    max_search_results: usize,
    derived: RwLock<Option<Arc<Hierarchy>>>,
    derive_lock: Mutex<()>,
}

impl HierarchicalCache {
    pub fn new(store: Arc<dyn Store>, table: &str, options: HierarchyOptions) -> RefDataResult<Self> {
        let records = record_table(store, table, options.policy, options.executor)?;
        Ok(Self {
            records,
            shape: options.shape,
            max_search_results: options.max_search_results,
            derived: RwLock::new(None),
            derive_lock: Mutex::new(()),
        })
    }

    /// Industrial classification table viewed as sections, divisions and classes.
    pub fn industrial(
        store: Arc<dyn Store>,
        table: &str,
        options: HierarchyOptions,
    ) -> RefDataResult<Self> {
        Self::new(
            store,
            table,
            options.with_shape(HierarchyShape::IndustrialThreeLevel),
        )
    }

    pub fn name(&self) -> &str {
        self.records.name()
    }

    pub fn shape(&self) -> HierarchyShape {
        self.shape
    }

    /// Underlying flat snapshot cache.
    pub fn records(&self) -> &SnapshotCache<EntityId, Record> {
        &self.records
    }

    /// Hierarchy for the current snapshot, rebuilt if the snapshot moved.
    pub fn hierarchy(&self) -> RefDataResult<Arc<Hierarchy>> {
        let snapshot = self.records.get_snapshot()?;
        if let Some(current) = self.derived_at(snapshot.version()) {
            return Ok(current);
        }

        let _guard = self.derive_lock.lock().map_err(|_| CacheError::LockPoisoned {
            cache: self.name().to_string(),
        })?;
        if let Some(current) = self.derived_at(snapshot.version()) {
            return Ok(current);
        }

        let built = Arc::new(Hierarchy::build(&snapshot, self.shape));
        debug!(
            cache = %self.name(),
            version = built.version(),
            nodes = built.forest().len(),
            excluded = built.forest().excluded(),
            "Hierarchy rebuilt"
        );

        let mut slot = self.derived.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map_or(true, |h| h.version() < built.version()) {
            *slot = Some(Arc::clone(&built));
        }
        Ok(built)
    }

    pub fn get_tree(&self, max_depth: Option<usize>) -> RefDataResult<Vec<TreeNode>> {
        Ok(self.hierarchy()?.get_tree(max_depth))
    }

    pub fn get_top_level(&self) -> RefDataResult<Vec<Record>> {
        Ok(self.hierarchy()?.get_top_level())
    }

    pub fn search_by_name(&self, query: &str, language_hint: Option<&str>) -> RefDataResult<Vec<Record>> {
        Ok(self
            .hierarchy()?
            .search_by_name(query, language_hint, self.max_search_results))
    }

    pub fn search_by_id(&self, id: EntityId, include_children: bool) -> RefDataResult<Option<TreeNode>> {
        Ok(self.hierarchy()?.search_by_id(id, include_children))
    }

    pub fn path_to(&self, id: EntityId) -> RefDataResult<Vec<Record>> {
        Ok(self.hierarchy()?.path_to(id))
    }

    fn derived_at(&self, version: u64) -> Option<Arc<Hierarchy>> {
        let slot = self.derived.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .filter(|h| h.version() == version)
            .map(Arc::clone)
    }
}

impl RefreshableCache for HierarchicalCache {
    fn name(&self) -> &str {
        self.records.name()
    }

    fn check_and_refresh(&self) -> RefDataResult<bool> {
        self.records.check_and_refresh()
    }

    fn rebuild(&self) -> RefDataResult<()> {
        self.records.rebuild()
    }

    fn watermark(&self) -> Watermark {
        self.records.current().watermark()
    }

    fn stats(&self) -> CacheStats {
        self.records.stats()
    }
}
