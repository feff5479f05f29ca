//! Folding one calling-context tree into another.
//!
//! Both trees are walked top-down from their roots. A child of the incoming
//! tree either matches a child of the receiving node, in which case its
//! metrics are added in and the walk continues below the pair, or it has no
//! counterpart and its whole subtree moves over.
//!
//! Metric layout: the receiving tree's columns keep their positions and the
//! incoming tree's columns start at `x_beg` in the shared vector. Receiving
//! nodes are padded with `y_new` zero columns at the end; moved nodes get
//! `x_beg` zero columns in front.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use super::{NodeIndex, Tree};
use crate::error::{CctError, MergeError, MetricError};
use crate::model::{MetricDescs, Node};

/// Outcome of [`Tree::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Node pairs folded together, the two roots included.
    pub merged: usize,
    /// Nodes moved over from the other tree.
    pub moved: usize,
}

impl Tree {
    /// Merges `other` into `self`.
    ///
    /// `shared` is the metric vector both trees end up laid out against:
    /// `self`'s columns followed by `y_new` columns only `other` has.
    /// `other`'s columns occupy `x_beg..x_beg + other.metric_descs().len()`.
    ///
    /// Every check runs before the first node is touched, so an error leaves
    /// `self` unchanged. Node ids and call-path ids are never reassigned.
    /// Load-module ids must already agree between the trees; nodes whose
    /// load modules differ simply end up as separate siblings.
    pub fn merge(
        &mut self,
        mut other: Tree,
        shared: &MetricDescs,
        x_beg: usize,
        y_new: usize,
    ) -> Result<MergeStats, CctError> {
        self.check_layout(&other, shared, x_beg, y_new)?;
        if !self.has_room_for(other.len) {
            return Err(CctError::ArenaFull);
        }
        let foreign_ids = !Arc::ptr_eq(&self.ids, &other.ids);
        if foreign_ids {
            self.check_id_collisions(&other)?;
        }
        let max_other_id = other.nodes().map(Node::id).max();

        let x_len = self.metric_descs.len();
        for payload in self.payloads_mut() {
            payload.expand_metrics(shared, x_len, y_new)?;
        }
        self.metric_descs = shared.clone();

        let mut stats = MergeStats::default();
        match (self.root, other.root) {
            (_, None) => {}
            (None, Some(y_root)) => {
                let top = self.adopt_subtree(&mut other, y_root, x_beg, &mut stats)?;
                self.root = Some(top);
            }
            (Some(x_root), Some(y_root)) => {
                self.merge_from(x_root, &mut other, y_root, x_beg, &mut stats)?;
            }
        }

        if foreign_ids && let Some(id) = max_other_id {
            self.ids.observe(id);
        }
        debug!(
            "merged CCT: {} node pairs folded, {} nodes moved, {} metric columns",
            stats.merged,
            stats.moved,
            shared.len()
        );
        Ok(stats)
    }

    fn check_layout(
        &self,
        other: &Tree,
        shared: &MetricDescs,
        x_beg: usize,
        y_new: usize,
    ) -> Result<(), CctError> {
        let this = self.metric_descs.len();
        let theirs = other.metric_descs.len();
        if shared.len() != this + y_new || x_beg + theirs != shared.len() {
            return Err(MergeError::LayoutMismatch {
                shared: shared.len(),
                this,
                other: theirs,
                offset: x_beg,
                new_metrics: y_new,
            }
            .into());
        }
        let ours = self.metric_descs.iter().enumerate();
        let incoming = other
            .metric_descs
            .iter()
            .enumerate()
            .map(|(j, d)| (x_beg + j, d));
        for (slot, desc) in ours.chain(incoming) {
            let kind = shared[slot].kind;
            if desc.kind != kind {
                return Err(MergeError::MetricKindMismatch {
                    slot,
                    shared: kind,
                    found: desc.kind,
                }
                .into());
            }
        }
        for (tree, width) in [(self, this), (other, theirs)] {
            if let Some(p) = tree.payloads().find(|p| p.num_metrics() != width) {
                return Err(MetricError::LengthMismatch {
                    expected: width,
                    actual: p.num_metrics(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn check_id_collisions(&self, other: &Tree) -> Result<(), MergeError> {
        let ours: HashSet<u32> = self.nodes().map(Node::id).collect();
        match other.nodes().map(Node::id).find(|id| ours.contains(id)) {
            Some(id) => Err(MergeError::IdCollision { id }),
            None => Ok(()),
        }
    }

    fn merge_from(
        &mut self,
        x_root: NodeIndex,
        other: &mut Tree,
        y_root: NodeIndex,
        x_beg: usize,
        stats: &mut MergeStats,
    ) -> Result<(), CctError> {
        stats.merged += 1;
        let mut work = vec![(x_root, y_root)];
        while let Some((x, y)) = work.pop() {
            let y_children: Vec<NodeIndex> = other.children(y).collect();
            for cy in y_children {
                let Some(cy_node) = other.get(cy) else {
                    continue;
                };
                match self.find_mergeable_child(x, cy_node) {
                    Some(cx) => {
                        if let (Some(xp), Some(yp)) = (
                            self.get_mut(cx).and_then(Node::payload_mut),
                            cy_node.payload(),
                        ) {
                            xp.merge_metrics(yp, x_beg)?;
                        }
                        stats.merged += 1;
                        work.push((cx, cy));
                    }
                    None => {
                        let top = self.adopt_subtree(other, cy, x_beg, stats)?;
                        self.link_last(x, top);
                    }
                }
            }
        }
        Ok(())
    }

    /// Moves the subtree at `y` out of `other` and rebuilds it, detached,
    /// in `self`. Returns the new subtree root; the caller links it.
    fn adopt_subtree(
        &mut self,
        other: &mut Tree,
        y: NodeIndex,
        x_beg: usize,
        stats: &mut MergeStats,
    ) -> Result<NodeIndex, CctError> {
        let shared = self.metric_descs.clone();
        let mut top = None;
        let mut work: Vec<(NodeIndex, Option<NodeIndex>)> = vec![(y, None)];
        while let Some((y, x_parent)) = work.pop() {
            let y_children: Vec<NodeIndex> = other.children(y).collect();
            let Some(mut node) = other.release(y) else {
                continue;
            };
            node.links = Default::default();
            if let Some(payload) = node.payload_mut() {
                payload.expand_metrics_before(&shared, x_beg)?;
            }
            let x = self.alloc(node)?;
            stats.moved += 1;
            match x_parent {
                Some(parent) => self.link_last(parent, x),
                None => top = Some(x),
            }
            // Reversed so siblings pop, and get appended, in sibling order.
            work.extend(y_children.into_iter().rev().map(|c| (c, Some(x))));
        }
        top.ok_or(CctError::StaleNode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CctConfig;
    use crate::model::{
        AssocInfo, DynPayload, LogicalIp, LushAssoc, MetricDesc, MetricValue, NodeData,
        NodeIdAllocator, Vma,
    };

    fn samples() -> MetricDescs {
        vec![MetricDesc::integer("SAMPLES")].into()
    }

    fn stmt(descs: &MetricDescs, ip: Vma, v: u64) -> NodeData {
        NodeData::Stmt(
            DynPayload::new(0, descs.clone())
                .with_location(1, ip, 0)
                .with_metrics(vec![MetricValue::from_int(v)])
                .expect("one value per metric slot"),
        )
    }

    fn rooted(descs: &MetricDescs) -> (Tree, NodeIndex) {
        let mut t = Tree::new(descs.clone());
        let root = t.create_root("a.out").expect("fresh tree has no root");
        (t, root)
    }

    #[test]
    fn merging_into_an_empty_tree_adopts_everything() -> Result<(), CctError> {
        let d = samples();
        let mut x = Tree::new(d.clone());
        let (mut y, y_root) = rooted(&d);
        let s = y.insert(y_root, stmt(&d, 0x10, 3), None)?;
        let s_id = y.get(s).map(Node::id);

        let stats = x.merge(y, &d, 0, 0)?;
        assert_eq!(stats, MergeStats { merged: 0, moved: 2 });
        let root = x.root().ok_or(CctError::StaleNode)?;
        let child = x.first_child(root).ok_or(CctError::StaleNode)?;
        assert_eq!(x.get(child).map(Node::id), s_id);
        assert_eq!(x.metric(child, 0)?.as_int(), 3);
        assert_eq!(x.len(), 2);
        Ok(())
    }

    #[test]
    fn merging_an_empty_tree_changes_nothing() -> Result<(), CctError> {
        let d = samples();
        let (mut x, root) = rooted(&d);
        let s = x.insert(root, stmt(&d, 0x10, 3), None)?;
        let stats = x.merge(Tree::new(d.clone()), &d, 0, 0)?;
        assert_eq!(stats, MergeStats::default());
        assert_eq!(x.len(), 2);
        assert_eq!(x.metric(s, 0)?.as_int(), 3);
        assert_eq!(x.get(s).and_then(Node::payload).map(DynPayload::num_metrics), Some(1));
        Ok(())
    }

    #[test]
    fn logical_identity_keeps_nodes_apart() -> Result<(), CctError> {
        let d = samples();
        let (mut x, xr) = rooted(&d);
        let (mut y, yr) = rooted(&d);
        let plain = DynPayload::new(0, d.clone()).with_location(1, 0x10, 0);
        x.insert(xr, NodeData::Call(plain.clone()), None)?;
        let lip = plain.clone().with_lip(LogicalIp::new(4, 0x99));
        y.insert(yr, NodeData::Call(lip), None)?;
        let assoc = plain.with_assoc(AssocInfo::new(LushAssoc::OneToZero, 1));
        y.insert(yr, NodeData::Call(assoc), None)?;

        let stats = x.merge(y, &d, 0, 0)?;
        assert_eq!(stats.moved, 2);
        assert_eq!(x.child_count(xr), 3);
        Ok(())
    }

    #[test]
    fn stmt_and_call_at_the_same_address_do_not_match() -> Result<(), CctError> {
        let d = samples();
        let (mut x, xr) = rooted(&d);
        let (mut y, yr) = rooted(&d);
        x.insert(xr, stmt(&d, 0x10, 1), None)?;
        let call = DynPayload::new(0, d.clone()).with_location(1, 0x10, 0);
        y.insert(yr, NodeData::Call(call), None)?;
        x.merge(y, &d, 0, 0)?;
        assert_eq!(x.child_count(xr), 2);
        Ok(())
    }

    #[test]
    fn layout_errors_leave_the_tree_untouched() -> Result<(), CctError> {
        let d = samples();
        let (mut x, xr) = rooted(&d);
        let s = x.insert(xr, stmt(&d, 0x10, 5), None)?;

        let (y, _) = rooted(&d);
        let too_wide: MetricDescs =
            vec![MetricDesc::integer("SAMPLES"), MetricDesc::integer("X")].into();
        assert!(matches!(
            x.merge(y, &too_wide, 0, 0),
            Err(CctError::Merge(MergeError::LayoutMismatch { .. }))
        ));

        let (y, _) = rooted(&d);
        let kinds: MetricDescs = vec![MetricDesc::real("SAMPLES")].into();
        assert!(matches!(
            x.merge(y, &kinds, 0, 0),
            Err(CctError::Merge(MergeError::MetricKindMismatch { slot: 0, .. }))
        ));

        assert_eq!(x.metric(s, 0)?.as_int(), 5);
        assert!(Arc::ptr_eq(x.metric_descs(), &d));
        Ok(())
    }

    #[test]
    fn foreign_allocators_are_reconciled() -> Result<(), CctError> {
        let d = samples();
        let fresh = || {
            Tree::with_allocator(d.clone(), CctConfig::default(), Arc::new(NodeIdAllocator::new()))
        };

        let mut x = fresh();
        let xr = x.create_root("a.out")?;
        let mut y = fresh();
        let yr = y.create_root("a.out")?;
        y.insert(yr, stmt(&d, 0x10, 1), None)?;
        // Both allocators started at the same id.
        assert!(matches!(
            x.merge(y, &d, 0, 0),
            Err(CctError::Merge(MergeError::IdCollision { .. }))
        ));
        assert!(x.is_leaf(xr));

        let ids = Arc::new(NodeIdAllocator::new());
        ids.observe(1000);
        let mut z = Tree::with_allocator(d.clone(), CctConfig::default(), ids);
        let zr = z.create_root("a.out")?;
        let s = z.insert(zr, stmt(&d, 0x10, 1), None)?;
        let moved_id = z.get(s).map_or(0, Node::id);
        x.merge(z, &d, 0, 0)?;
        assert!(x.ids().peek() > moved_id);
        Ok(())
    }
}
