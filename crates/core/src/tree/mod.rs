//! The calling-context tree container.
//!
//! Nodes live in a slot arena and are addressed by generation-checked
//! [`NodeIndex`] handles. Children of a node form a circular sibling ring;
//! the navigation accessors cut the ring at its ends, so the last child has
//! no next sibling and the first child no previous one.

pub mod dump;
pub mod merge;

use std::cmp::Ordering;
use std::sync::Arc;

use log::trace;

use crate::config::CctConfig;
use crate::error::{CctError, MergeError, MetricError};
use crate::model::{
    DynPayload, MetricDescs, MetricValue, Node, NodeData, NodeIdAllocator, NodeKind,
    SharedStr, StructureRef, Vma,
};

pub use dump::DumpOptions;
pub use merge::MergeStats;

/// Handle to a node inside one [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex {
    slot: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// A calling-context tree: one optional root plus the metric vector every
/// dynamic node is laid out against.
#[derive(Debug)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: Option<NodeIndex>,
    len: usize,
    metric_descs: MetricDescs,
    ids: Arc<NodeIdAllocator>,
    config: CctConfig,
}

impl Tree {
    /// An empty tree using the process-wide id allocator and default config.
    pub fn new(metric_descs: MetricDescs) -> Self {
        Self::with_config(metric_descs, CctConfig::default())
    }

    pub fn with_config(metric_descs: MetricDescs, config: CctConfig) -> Self {
        Self::with_allocator(metric_descs, config, NodeIdAllocator::global())
    }

    pub fn with_allocator(
        metric_descs: MetricDescs,
        config: CctConfig,
        ids: Arc<NodeIdAllocator>,
    ) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
            metric_descs,
            ids,
            config,
        }
    }

    pub fn metric_descs(&self) -> &MetricDescs {
        &self.metric_descs
    }

    pub fn config(&self) -> &CctConfig {
        &self.config
    }

    pub fn ids(&self) -> &Arc<NodeIdAllocator> {
        &self.ids
    }

    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn get(&self, idx: NodeIndex) -> Option<&Node> {
        self.slots
            .get(idx.slot as usize)
            .filter(|s| s.generation == idx.generation)
            .and_then(|s| s.node.as_ref())
    }

    /// Mutable access to node contents. Linkage stays under the tree's control.
    pub fn get_mut(&mut self, idx: NodeIndex) -> Option<&mut Node> {
        self.slots
            .get_mut(idx.slot as usize)
            .filter(|s| s.generation == idx.generation)
            .and_then(|s| s.node.as_mut())
    }

    fn node(&self, idx: NodeIndex) -> Result<&Node, CctError> {
        self.get(idx).ok_or(CctError::StaleNode)
    }

    fn node_mut(&mut self, idx: NodeIndex) -> Result<&mut Node, CctError> {
        self.get_mut(idx).ok_or(CctError::StaleNode)
    }

    // ---------------------------------------------------------------------
    // Arena
    // ---------------------------------------------------------------------

    fn alloc(&mut self, node: Node) -> Result<NodeIndex, CctError> {
        if let Some(slot) = self.free.pop()
            && let Some(s) = self.slots.get_mut(slot as usize)
        {
            s.node = Some(node);
            self.len += 1;
            return Ok(NodeIndex {
                slot,
                generation: s.generation,
            });
        }
        let slot = u32::try_from(self.slots.len()).map_err(|_| CctError::ArenaFull)?;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        self.len += 1;
        Ok(NodeIndex {
            slot,
            generation: 0,
        })
    }

    /// Whether `extra` more nodes fit without exhausting slot handles.
    fn has_room_for(&self, extra: usize) -> bool {
        self.slots
            .len()
            .checked_add(extra)
            .is_some_and(|n| u32::try_from(n).is_ok())
    }

    /// Frees a slot without touching links of other nodes.
    fn release(&mut self, idx: NodeIndex) -> Option<Node> {
        let s = self
            .slots
            .get_mut(idx.slot as usize)
            .filter(|s| s.generation == idx.generation)?;
        let node = s.node.take()?;
        s.generation = s.generation.wrapping_add(1);
        self.free.push(idx.slot);
        self.len -= 1;
        Some(node)
    }

    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    /// Installs the root node, named after the profiled program.
    pub fn create_root(&mut self, name: impl Into<SharedStr>) -> Result<NodeIndex, CctError> {
        if self.root.is_some() {
            return Err(CctError::RootExists);
        }
        let id = self.ids.allocate().ok_or(CctError::IdsExhausted)?;
        let root = self.alloc(Node::new(id, NodeData::Root { name: name.into() }, None))?;
        self.root = Some(root);
        Ok(root)
    }

    /// Creates a node as the last child of `parent`.
    ///
    /// Dynamic payloads must match the tree's metric vector slot for slot;
    /// they are rebound to the tree's shared copy of it.
    pub fn insert(
        &mut self,
        parent: NodeIndex,
        mut data: NodeData,
        structure: Option<StructureRef>,
    ) -> Result<NodeIndex, CctError> {
        if matches!(data, NodeData::Root { .. }) {
            return Err(CctError::RootInsert);
        }
        self.node(parent)?;
        if let Some(payload) = data.payload_mut() {
            self.bind_payload(payload)?;
        }
        let id = self.ids.allocate().ok_or(CctError::IdsExhausted)?;
        let idx = self.alloc(Node::new(id, data, structure))?;
        self.link_last(parent, idx);
        trace!("inserted node {id} under {parent:?}");
        Ok(idx)
    }

    fn bind_payload(&self, payload: &mut DynPayload) -> Result<(), CctError> {
        let descs = &self.metric_descs;
        if payload.num_metrics() != descs.len() || payload.metric_descs().len() != descs.len() {
            return Err(MetricError::LengthMismatch {
                expected: descs.len(),
                actual: payload.num_metrics(),
            }
            .into());
        }
        for (slot, (ours, theirs)) in descs.iter().zip(payload.metric_descs().iter()).enumerate() {
            if ours.kind != theirs.kind {
                return Err(MergeError::MetricKindMismatch {
                    slot,
                    shared: ours.kind,
                    found: theirs.kind,
                }
                .into());
            }
        }
        // Same length, so inserting zero slots only swaps the descriptor vector.
        payload.expand_metrics(descs, 0, 0)?;
        Ok(())
    }

    /// Shallow copy of `src` (payload and structure, no children) placed
    /// under `parent` with a fresh id.
    pub fn duplicate(&mut self, src: NodeIndex, parent: NodeIndex) -> Result<NodeIndex, CctError> {
        let node = self.node(src)?;
        let data = node.data.clone();
        let structure = node.structure.clone();
        self.insert(parent, data, structure)
    }

    // ---------------------------------------------------------------------
    // Linkage
    // ---------------------------------------------------------------------

    /// Appends a detached node to `parent`'s ring.
    fn link_last(&mut self, parent: NodeIndex, child: NodeIndex) {
        let first = self.get(parent).and_then(|p| p.links.first_child);
        match first {
            None => {
                if let Some(p) = self.get_mut(parent) {
                    p.links.first_child = Some(child);
                }
                if let Some(c) = self.get_mut(child) {
                    c.links.next = Some(child);
                    c.links.prev = Some(child);
                }
            }
            Some(first) => {
                let last = self.get(first).and_then(|f| f.links.prev).unwrap_or(first);
                if let Some(c) = self.get_mut(child) {
                    c.links.prev = Some(last);
                    c.links.next = Some(first);
                }
                if let Some(l) = self.get_mut(last) {
                    l.links.next = Some(child);
                }
                if let Some(f) = self.get_mut(first) {
                    f.links.prev = Some(child);
                }
            }
        }
        if let Some(c) = self.get_mut(child) {
            c.links.parent = Some(parent);
        }
    }

    /// Takes `child` out of its parent's ring; its own subtree stays attached.
    fn unlink(&mut self, child: NodeIndex) {
        let Some(links) = self.get(child).map(|c| c.links) else {
            return;
        };
        if let Some(parent) = links.parent {
            if links.next == Some(child) {
                if let Some(p) = self.get_mut(parent) {
                    p.links.first_child = None;
                }
            } else if let (Some(next), Some(prev)) = (links.next, links.prev) {
                if let Some(n) = self.get_mut(next) {
                    n.links.prev = Some(prev);
                }
                if let Some(p) = self.get_mut(prev) {
                    p.links.next = Some(next);
                }
                if let Some(p) = self.get_mut(parent)
                    && p.links.first_child == Some(child)
                {
                    p.links.first_child = Some(next);
                }
            }
        }
        if let Some(c) = self.get_mut(child) {
            c.links.parent = None;
            c.links.next = None;
            c.links.prev = None;
        }
    }

    /// Removes `idx` and everything below it. Removing the root empties the
    /// tree. Returns the number of nodes removed.
    pub fn remove_subtree(&mut self, idx: NodeIndex) -> Result<usize, CctError> {
        self.node(idx)?;
        let doomed: Vec<NodeIndex> = self.descendants(idx).collect();
        self.unlink(idx);
        if self.root == Some(idx) {
            self.root = None;
        }
        for n in &doomed {
            self.release(*n);
        }
        Ok(doomed.len())
    }

    // ---------------------------------------------------------------------
    // Navigation
    // ---------------------------------------------------------------------

    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.get(idx)?.links.parent
    }

    pub fn first_child(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.get(idx)?.links.first_child
    }

    pub fn last_child(&self, idx: NodeIndex) -> Option<NodeIndex> {
        let first = self.first_child(idx)?;
        self.get(first)?.links.prev
    }

    /// `None` for the last child: the ring does not wrap here.
    pub fn next_sibling(&self, idx: NodeIndex) -> Option<NodeIndex> {
        let node = self.get(idx)?;
        let parent = node.links.parent?;
        if self.last_child(parent) == Some(idx) {
            return None;
        }
        node.links.next
    }

    /// `None` for the first child.
    pub fn prev_sibling(&self, idx: NodeIndex) -> Option<NodeIndex> {
        let node = self.get(idx)?;
        let parent = node.links.parent?;
        if self.first_child(parent) == Some(idx) {
            return None;
        }
        node.links.prev
    }

    pub fn is_leaf(&self, idx: NodeIndex) -> bool {
        self.first_child(idx).is_none()
    }

    pub fn children(&self, idx: NodeIndex) -> Children<'_> {
        Children {
            tree: self,
            next: self.first_child(idx),
        }
    }

    pub fn child_count(&self, idx: NodeIndex) -> usize {
        self.children(idx).count()
    }

    /// `idx` and all nodes below it, in pre-order.
    pub fn descendants(&self, idx: NodeIndex) -> Descendants<'_> {
        Descendants {
            tree: self,
            start: idx,
            next: self.get(idx).map(|_| idx),
        }
    }

    /// Number of edges between `idx` and the root.
    pub fn depth(&self, idx: NodeIndex) -> usize {
        std::iter::successors(self.parent(idx), |p| self.parent(*p)).count()
    }

    // ---------------------------------------------------------------------
    // Ancestors
    // ---------------------------------------------------------------------

    /// Nearest node of `kind` on the path from `idx` to the root, `idx`
    /// included.
    pub fn ancestor(&self, idx: NodeIndex, kind: NodeKind) -> Option<NodeIndex> {
        let mut cur = Some(idx);
        while let Some(n) = cur {
            let node = self.get(n)?;
            if node.kind() == kind {
                return Some(n);
            }
            cur = node.links.parent;
        }
        None
    }

    pub fn ancestor_root(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.ancestor(idx, NodeKind::Root)
    }

    pub fn ancestor_proc_frame(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.ancestor(idx, NodeKind::ProcFrame)
    }

    pub fn ancestor_proc(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.ancestor(idx, NodeKind::Proc)
    }

    pub fn ancestor_loop(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.ancestor(idx, NodeKind::Loop)
    }

    pub fn ancestor_stmt(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.ancestor(idx, NodeKind::Stmt)
    }

    pub fn ancestor_call(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.ancestor(idx, NodeKind::Call)
    }

    // ---------------------------------------------------------------------
    // Source-line order
    // ---------------------------------------------------------------------

    /// Orders two nodes by begin line; nodes without a line come first.
    /// Equal lines compare equal, there is no secondary key.
    pub fn line_cmp(&self, a: NodeIndex, b: NodeIndex) -> Ordering {
        let line = |n| self.get(n).and_then(Node::begin_line);
        line(a).cmp(&line(b))
    }

    /// Reorders `parent`'s children by begin line, keeping the current order
    /// among equal lines.
    pub fn sort_children_by_line(&mut self, parent: NodeIndex) -> Result<(), CctError> {
        self.node(parent)?;
        let mut kids: Vec<NodeIndex> = self.children(parent).collect();
        kids.sort_by(|a, b| self.line_cmp(*a, *b));
        for k in kids {
            self.unlink(k);
            self.link_last(parent, k);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Node payload helpers
    // ---------------------------------------------------------------------

    /// First dynamic child of `parent` at the same location as `payload`.
    pub fn find_dyn_child(&self, parent: NodeIndex, payload: &DynPayload) -> Option<NodeIndex> {
        self.children(parent).find(|c| {
            self.get(*c)
                .and_then(Node::payload)
                .is_some_and(|p| p.is_mergeable(payload))
        })
    }

    pub(crate) fn find_mergeable_child(&self, parent: NodeIndex, like: &Node) -> Option<NodeIndex> {
        self.children(parent)
            .find(|c| self.get(*c).is_some_and(|n| n.is_mergeable(like)))
    }

    fn payload_mut(&mut self, idx: NodeIndex) -> Result<&mut DynPayload, CctError> {
        let node = self.node_mut(idx)?;
        let kind = node.kind();
        node.payload_mut().ok_or(CctError::NotDynamic { kind })
    }

    pub fn metric(&self, idx: NodeIndex, i: usize) -> Result<MetricValue, CctError> {
        let node = self.node(idx)?;
        let payload = node
            .payload()
            .ok_or(CctError::NotDynamic { kind: node.kind() })?;
        Ok(payload.metric(i)?)
    }

    pub fn metric_incr(&mut self, idx: NodeIndex, i: usize, by: MetricValue) -> Result<(), CctError> {
        Ok(self.payload_mut(idx)?.metric_incr(i, by)?)
    }

    pub fn metric_decr(&mut self, idx: NodeIndex, i: usize, by: MetricValue) -> Result<(), CctError> {
        Ok(self.payload_mut(idx)?.metric_decr(i, by)?)
    }

    /// Call-site ip for call nodes, ip for statement nodes.
    pub fn reported_ip(&self, idx: NodeIndex) -> Option<Vma> {
        self.get(idx)?
            .reported_ip(self.config.ra_to_callsite_offset)
    }

    pub fn display_name(&self, idx: NodeIndex) -> Option<String> {
        Some(self.get(idx)?.display_name(&self.config.placeholder_name))
    }

    pub(crate) fn payloads_mut(&mut self) -> impl Iterator<Item = &mut DynPayload> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.node.as_mut())
            .filter_map(Node::payload_mut)
    }

    pub(crate) fn payloads(&self) -> impl Iterator<Item = &DynPayload> {
        self.slots
            .iter()
            .filter_map(|s| s.node.as_ref())
            .filter_map(Node::payload)
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().filter_map(|s| s.node.as_ref())
    }

    /// Inserts `count` zero slots at `at` in every dynamic node, for a
    /// profile that picked up new metrics mid-collection.
    ///
    /// `metric_descs` must be the current vector with `count` new entries at
    /// `at`; nothing changes if it is not.
    pub fn widen_metrics(
        &mut self,
        metric_descs: &MetricDescs,
        at: usize,
        count: usize,
    ) -> Result<(), CctError> {
        let old = &self.metric_descs;
        if at > old.len() {
            return Err(MetricError::InvalidOffset { at, len: old.len() }.into());
        }
        if metric_descs.len() != old.len() + count {
            return Err(MetricError::LengthMismatch {
                expected: metric_descs.len(),
                actual: old.len() + count,
            }
            .into());
        }
        for (i, desc) in old.iter().enumerate() {
            let slot = if i < at { i } else { i + count };
            let shared = metric_descs[slot].kind;
            if shared != desc.kind {
                return Err(MergeError::MetricKindMismatch {
                    slot,
                    shared,
                    found: desc.kind,
                }
                .into());
            }
        }
        for payload in self.payloads_mut() {
            payload.expand_metrics(metric_descs, at, count)?;
        }
        self.metric_descs = metric_descs.clone();
        Ok(())
    }
}

pub struct Children<'a> {
    tree: &'a Tree,
    next: Option<NodeIndex>,
}

impl Iterator for Children<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let cur = self.next?;
        self.next = self.tree.next_sibling(cur);
        Some(cur)
    }
}

pub struct Descendants<'a> {
    tree: &'a Tree,
    start: NodeIndex,
    next: Option<NodeIndex>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let cur = self.next?;
        self.next = self.tree.first_child(cur).or_else(|| {
            let mut n = cur;
            loop {
                if n == self.start {
                    return None;
                }
                if let Some(sib) = self.tree.next_sibling(n) {
                    return Some(sib);
                }
                n = self.tree.parent(n)?;
            }
        });
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{downgrade, CodeScope, MetricDesc, MetricKind};

    fn descs() -> MetricDescs {
        vec![MetricDesc::integer("SAMPLES")].into()
    }

    fn tree() -> (Tree, NodeIndex) {
        let mut t = Tree::with_allocator(
            descs(),
            CctConfig::default(),
            Arc::new(NodeIdAllocator::new()),
        );
        let root = t.create_root("a.out").expect("fresh tree has no root");
        (t, root)
    }

    fn stmt(t: &Tree, ip: Vma, value: u64) -> NodeData {
        let payload = DynPayload::new(0, t.metric_descs().clone())
            .with_location(1, ip, 0)
            .with_metrics(vec![MetricValue::from_int(value)])
            .expect("one value per metric slot");
        NodeData::Stmt(payload)
    }

    fn assert_ring(t: &Tree, parent: NodeIndex) {
        let n = t.child_count(parent);
        let mut cur = t.first_child(parent);
        for _ in 0..n {
            assert!(cur.is_some());
            cur = cur.and_then(|c| t.next_sibling(c));
        }
        assert_eq!(cur, None);

        let mut cur = t.last_child(parent);
        for _ in 0..n {
            assert!(cur.is_some());
            cur = cur.and_then(|c| t.prev_sibling(c));
        }
        assert_eq!(cur, None);
    }

    #[test]
    fn second_root_is_rejected() {
        let (mut t, root) = tree();
        assert!(matches!(t.create_root("again"), Err(CctError::RootExists)));
        assert!(matches!(
            t.insert(root, NodeData::Root { name: "x".into() }, None),
            Err(CctError::RootInsert)
        ));
    }

    #[test]
    fn ring_ends_do_not_wrap() -> Result<(), CctError> {
        let (mut t, root) = tree();
        assert_ring(&t, root);
        let a = t.insert(root, NodeData::ProcFrame, None)?;
        assert_eq!(t.next_sibling(a), None);
        assert_eq!(t.prev_sibling(a), None);
        let b = t.insert(root, NodeData::ProcFrame, None)?;
        let c = t.insert(root, NodeData::ProcFrame, None)?;
        assert_eq!(t.first_child(root), Some(a));
        assert_eq!(t.last_child(root), Some(c));
        assert_eq!(t.next_sibling(a), Some(b));
        assert_eq!(t.prev_sibling(c), Some(b));
        assert_eq!(t.next_sibling(c), None);
        assert_eq!(t.prev_sibling(a), None);
        assert_eq!(t.next_sibling(root), None);
        assert_ring(&t, root);
        Ok(())
    }

    #[test]
    fn removal_keeps_ring_consistent() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let a = t.insert(root, NodeData::ProcFrame, None)?;
        let b = t.insert(root, NodeData::ProcFrame, None)?;
        let c = t.insert(root, NodeData::ProcFrame, None)?;
        let s = stmt(&t, 0x10, 1);
        t.insert(b, s, None)?;

        assert_eq!(t.remove_subtree(b)?, 2);
        assert_eq!(t.len(), 3);
        assert_eq!(t.next_sibling(a), Some(c));
        assert_ring(&t, root);

        t.remove_subtree(a)?;
        assert_eq!(t.first_child(root), Some(c));
        assert_ring(&t, root);

        t.remove_subtree(c)?;
        assert!(t.is_leaf(root));
        assert!(t.get(b).is_none());
        assert!(matches!(t.remove_subtree(b), Err(CctError::StaleNode)));
        Ok(())
    }

    #[test]
    fn stale_handles_do_not_alias_reused_slots() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let a = t.insert(root, NodeData::Loop, None)?;
        t.remove_subtree(a)?;
        let b = t.insert(root, NodeData::Loop, None)?;
        assert!(t.get(a).is_none());
        assert!(t.get(b).is_some());
        assert!(matches!(t.insert(a, NodeData::Loop, None), Err(CctError::StaleNode)));
        Ok(())
    }

    #[test]
    fn removing_root_empties_tree() -> Result<(), CctError> {
        let (mut t, root) = tree();
        t.insert(root, NodeData::ProcFrame, None)?;
        t.remove_subtree(root)?;
        assert!(t.is_empty());
        assert_eq!(t.len(), 0);
        t.create_root("again")?;
        Ok(())
    }

    #[test]
    fn exhausted_ids_fail_insertion_cleanly() -> Result<(), CctError> {
        let ids = Arc::new(NodeIdAllocator::new());
        ids.observe(u32::MAX - 5);
        let mut t = Tree::with_allocator(descs(), CctConfig::default(), ids);
        let root = t.create_root("a.out")?;
        assert!(matches!(
            t.insert(root, NodeData::Loop, None),
            Err(CctError::IdsExhausted)
        ));
        assert!(t.is_leaf(root));
        assert_eq!(t.len(), 1);
        Ok(())
    }

    #[test]
    fn slot_handles_bound_the_arena() {
        let (t, _) = tree();
        assert!(t.has_room_for(1000));
        assert!(!t.has_room_for(u32::MAX as usize));
        assert!(!t.has_room_for(usize::MAX));
    }

    #[test]
    fn ancestors_include_self() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let pf = t.insert(root, NodeData::ProcFrame, None)?;
        let lp = t.insert(pf, NodeData::Loop, None)?;
        let s = stmt(&t, 0x20, 1);
        let st = t.insert(lp, s, None)?;
        assert_eq!(t.ancestor_loop(st), Some(lp));
        assert_eq!(t.ancestor_proc_frame(st), Some(pf));
        assert_eq!(t.ancestor_root(st), Some(root));
        assert_eq!(t.ancestor_stmt(st), Some(st));
        assert_eq!(t.ancestor_call(st), None);
        assert_eq!(t.ancestor_proc(st), None);
        assert_eq!(t.ancestor_loop(pf), None);
        assert_eq!(t.depth(st), 3);
        Ok(())
    }

    #[test]
    fn descendants_are_pre_order() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let a = t.insert(root, NodeData::ProcFrame, None)?;
        let a1 = t.insert(a, NodeData::Loop, None)?;
        let b = t.insert(root, NodeData::ProcFrame, None)?;
        let b1 = t.insert(b, NodeData::Loop, None)?;
        let order: Vec<_> = t.descendants(root).collect();
        assert_eq!(order, vec![root, a, a1, b, b1]);
        let sub: Vec<_> = t.descendants(a).collect();
        assert_eq!(sub, vec![a, a1]);
        Ok(())
    }

    #[test]
    fn insert_rejects_payloads_of_the_wrong_width() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let wide: MetricDescs =
            vec![MetricDesc::integer("A"), MetricDesc::integer("B")].into();
        let payload = NodeData::Stmt(DynPayload::new(0, wide));
        assert!(matches!(
            t.insert(root, payload, None),
            Err(CctError::Metric(MetricError::LengthMismatch { .. }))
        ));
        let real: MetricDescs = vec![MetricDesc::real("A")].into();
        let payload = NodeData::Stmt(DynPayload::new(0, real));
        assert!(matches!(
            t.insert(root, payload, None),
            Err(CctError::Merge(MergeError::MetricKindMismatch { slot: 0, .. }))
        ));
        assert!(t.is_leaf(root));
        Ok(())
    }

    #[test]
    fn duplicate_gets_a_fresh_id_and_no_children() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let pf = t.insert(root, NodeData::ProcFrame, None)?;
        let s = stmt(&t, 0x30, 7);
        let st = t.insert(pf, s, None)?;
        let copy = t.duplicate(st, root)?;
        let (orig_id, copy_id) = (t.node(st)?.id(), t.node(copy)?.id());
        assert_ne!(orig_id, copy_id);
        assert_eq!(t.metric(copy, 0)?.as_int(), 7);

        let pf_copy = t.duplicate(pf, root)?;
        assert!(t.is_leaf(pf_copy));
        assert!(matches!(t.duplicate(root, pf), Err(CctError::RootInsert)));
        Ok(())
    }

    #[test]
    fn metric_access_through_the_tree() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let s = stmt(&t, 0x40, 2);
        let st = t.insert(root, s, None)?;
        t.metric_incr(st, 0, MetricValue::from_int(3))?;
        assert_eq!(t.metric(st, 0)?.as_int(), 5);
        t.metric_decr(st, 0, MetricValue::from_int(1))?;
        assert_eq!(t.metric(st, 0)?.as_int(), 4);
        assert!(matches!(
            t.metric(st, 1),
            Err(CctError::Metric(MetricError::OutOfBounds { index: 1, len: 1 }))
        ));
        assert!(matches!(
            t.metric_incr(root, 0, MetricValue::from_int(1)),
            Err(CctError::NotDynamic {
                kind: NodeKind::Root
            })
        ));
        Ok(())
    }

    #[test]
    fn call_nodes_report_the_call_site() -> Result<(), CctError> {
        let mut t = Tree::with_allocator(
            descs(),
            CctConfig {
                ra_to_callsite_offset: 4,
                ..CctConfig::default()
            },
            Arc::new(NodeIdAllocator::new()),
        );
        let root = t.create_root("a.out")?;
        let call = DynPayload::new(9, t.metric_descs().clone()).with_location(1, 0x104, 0);
        let c = t.insert(root, NodeData::Call(call.clone()), None)?;
        assert_eq!(t.reported_ip(c), Some(0x100));
        assert_eq!(t.get(c).and_then(Node::ra), Some(0x104));

        let logical = call.with_lip(crate::model::LogicalIp::new(2, 0x2004));
        let l = t.insert(root, NodeData::Call(logical), None)?;
        assert_eq!(t.reported_ip(l), Some(0x2000));
        assert_eq!(t.get(l).and_then(Node::ra), Some(0x104));

        let s = stmt(&t, 0x104, 0);
        let st = t.insert(root, s, None)?;
        assert_eq!(t.reported_ip(st), Some(0x104));
        assert_eq!(t.reported_ip(root), None);
        Ok(())
    }

    #[test]
    fn find_dyn_child_matches_location_and_logical_identity() -> Result<(), CctError> {
        use crate::model::{AssocInfo, LogicalIp, LushAssoc};

        let (mut t, root) = tree();
        let descs = t.metric_descs().clone();
        let at = |ip| DynPayload::new(0, descs.clone()).with_location(1, ip, 0);
        let plain = at(0x10);
        let logical = at(0x10).with_lip(LogicalIp::new(3, 0x700));
        let unwound = at(0x10).with_assoc(AssocInfo::new(LushAssoc::OneToZero, 2));
        let elsewhere = at(0x20);

        t.insert(root, NodeData::ProcFrame, None)?;
        let with_lip = t.insert(root, NodeData::Stmt(logical.clone()), None)?;
        let with_assoc = t.insert(root, NodeData::Call(unwound), None)?;
        let first_plain = t.insert(root, NodeData::Stmt(plain.clone()), None)?;
        t.insert(root, NodeData::Call(plain.clone()), None)?;

        assert_eq!(t.find_dyn_child(root, &plain), Some(first_plain));
        assert_eq!(t.find_dyn_child(root, &logical), Some(with_lip));
        // M-to-0 shares the a-to-0 class with 1-to-0.
        let same_class = at(0x10).with_assoc(AssocInfo::new(LushAssoc::ManyToZero, 2));
        assert_eq!(t.find_dyn_child(root, &same_class), Some(with_assoc));
        let other_len = at(0x10).with_assoc(AssocInfo::new(LushAssoc::ManyToZero, 3));
        assert_eq!(t.find_dyn_child(root, &other_len), None);
        assert_eq!(t.find_dyn_child(root, &elsewhere), None);
        assert_eq!(t.find_dyn_child(first_plain, &plain), None);
        Ok(())
    }

    #[test]
    fn sort_by_line_is_stable_for_ties() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let l30 = Arc::new(CodeScope::procedure(1, "c").with_lines(30, 31));
        let l10a = Arc::new(CodeScope::procedure(2, "a").with_lines(10, 11));
        let l10b = Arc::new(CodeScope::procedure(3, "b").with_lines(10, 12));
        let x = t.insert(root, NodeData::ProcFrame, Some(downgrade(&l30)))?;
        let y = t.insert(root, NodeData::ProcFrame, Some(downgrade(&l10a)))?;
        let none = t.insert(root, NodeData::ProcFrame, None)?;
        let z = t.insert(root, NodeData::ProcFrame, Some(downgrade(&l10b)))?;
        assert_eq!(t.line_cmp(y, z), Ordering::Equal);
        assert_eq!(t.line_cmp(none, y), Ordering::Less);
        t.sort_children_by_line(root)?;
        let order: Vec<_> = t.children(root).collect();
        assert_eq!(order, vec![none, y, z, x]);
        assert_ring(&t, root);
        Ok(())
    }

    #[test]
    fn widen_metrics_inserts_zero_columns() -> Result<(), CctError> {
        let (mut t, root) = tree();
        let s = stmt(&t, 0x50, 6);
        let st = t.insert(root, s, None)?;
        let wide: MetricDescs =
            vec![MetricDesc::real("TIME"), MetricDesc::integer("SAMPLES")].into();
        t.widen_metrics(&wide, 0, 1)?;
        assert_eq!(t.metric(st, 0)?, MetricValue::ZERO);
        assert_eq!(t.metric(st, 1)?.as_int(), 6);
        assert!(Arc::ptr_eq(t.metric_descs(), &wide));

        // TIME is real; an integer column in its place is rejected.
        let bad: MetricDescs = vec![
            MetricDesc::integer("X"),
            MetricDesc::integer("SAMPLES"),
            MetricDesc::integer("Y"),
        ]
        .into();
        assert!(matches!(
            t.widen_metrics(&bad, 2, 1),
            Err(CctError::Merge(MergeError::MetricKindMismatch {
                slot: 0,
                shared: MetricKind::Integer,
                found: MetricKind::Real
            }))
        ));
        assert!(t.widen_metrics(&bad, 3, 1).is_err());
        assert_eq!(t.metric_descs().len(), 2);
        assert_eq!(t.metric(st, 1)?.as_int(), 6);
        Ok(())
    }
}
