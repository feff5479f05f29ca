//! Plain-text rendering of a tree, one node per line.

use std::fmt::{self, Write};

use super::{NodeIndex, Tree};
use crate::model::{DynPayload, NodeData, SharedStr};

/// Output switches for [`Tree::dump`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpOptions {
    /// No indentation.
    pub compressed: bool,
    /// Print metric values on leaves only.
    pub leaf_metrics_only: bool,
    /// Append association, physical location and logical ip of dynamic nodes.
    pub debug: bool,
}

impl Tree {
    /// Writes the whole tree, pre-order, indented two spaces per level.
    pub fn dump(&self, out: &mut impl Write, opts: DumpOptions) -> fmt::Result {
        let mut stack: Vec<(NodeIndex, usize)> = self.root.map(|r| (r, 0)).into_iter().collect();
        let mut kids = Vec::new();
        while let Some((idx, depth)) = stack.pop() {
            if !opts.compressed {
                write!(out, "{:1$}", "", depth * 2)?;
            }
            self.write_node(out, idx, opts)?;
            out.write_char('\n')?;
            kids.extend(self.children(idx));
            stack.extend(kids.drain(..).rev().map(|c| (c, depth + 1)));
        }
        Ok(())
    }

    pub fn dump_string(&self, opts: DumpOptions) -> String {
        let mut s = String::new();
        // Writing into a String cannot fail.
        let _ = self.dump(&mut s, opts);
        s
    }

    /// The line [`Tree::dump`] prints for `idx`, without indentation.
    pub fn node_line(&self, idx: NodeIndex, opts: DumpOptions) -> Option<String> {
        self.get(idx)?;
        let mut s = String::new();
        let _ = self.write_node(&mut s, idx, opts);
        Some(s)
    }

    fn write_node(&self, out: &mut impl Write, idx: NodeIndex, opts: DumpOptions) -> fmt::Result {
        let Some(node) = self.get(idx) else {
            return Ok(());
        };
        let unknown = self.config.placeholder_name.as_str();
        write!(out, "{} i={}", node.kind(), node.id())?;
        let sid = node.structure_id();
        if sid != 0 {
            write!(out, " s={sid}")?;
        }
        if let Some(line) = node.begin_line() {
            write!(out, " l={line}")?;
        }

        match node.data() {
            NodeData::Root { name } => write!(out, " n=\"{name}\"")?,
            NodeData::ProcFrame => {
                if let Some(pf) = node.as_proc_frame() {
                    let or_unknown = |s: Option<SharedStr>| {
                        s.map_or_else(|| unknown.to_string(), |s| s.to_string())
                    };
                    write!(
                        out,
                        " n=\"{}\" f=\"{}\" lm=\"{}\"",
                        or_unknown(pf.proc_name()),
                        or_unknown(pf.file_name()),
                        or_unknown(pf.lm_name())
                    )?;
                    if pf.is_alien() {
                        out.write_str(" alien")?;
                    }
                }
            }
            NodeData::Stmt(_) | NodeData::Call(_) => {
                if let Some(ip) = node.reported_ip(self.config.ra_to_callsite_offset) {
                    write!(out, " ip={ip:#x}")?;
                }
                if let Some(ra) = node.ra() {
                    write!(out, " ra={ra:#x}")?;
                }
            }
            NodeData::Proc | NodeData::Loop => {}
        }

        if let Some(p) = node.payload() {
            if p.cp_id() != 0 {
                write!(out, " cp={}", p.cp_id())?;
            }
            if opts.debug {
                write!(out, " {}", p.name_dyn())?;
            }
            if p.has_metrics() && (!opts.leaf_metrics_only || self.is_leaf(idx)) {
                write_metrics(out, p)?;
            }
        }
        Ok(())
    }
}

fn write_metrics(out: &mut impl Write, p: &DynPayload) -> fmt::Result {
    out.write_str(" m=[")?;
    for (i, (v, d)) in p.metrics().iter().zip(p.metric_descs().iter()).enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write!(out, "{}", v.display(d.kind))?;
    }
    out.write_char(']')
}
