use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::dyn_node::{DynPayload, Vma};
use super::structure::{same_structure, CodeStructure, StructureKind, StructureRef};
use super::SharedStr;
use crate::tree::NodeIndex;

/// The six node variants of a calling-context tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    ProcFrame,
    /// Procedure scope without a frame. Kept for structure correlation.
    Proc,
    Loop,
    Stmt,
    Call,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        Self::Root,
        Self::ProcFrame,
        Self::Proc,
        Self::Loop,
        Self::Stmt,
        Self::Call,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "R",
            Self::ProcFrame => "PF",
            Self::Proc => "Pr",
            Self::Loop => "L",
            Self::Stmt => "S",
            Self::Call => "C",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: i64) -> Option<Self> {
        usize::try_from(i)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Statement and call nodes carry a [`DynPayload`].
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::Stmt | Self::Call)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific node contents.
#[derive(Debug, Clone)]
pub enum NodeData {
    Root { name: SharedStr },
    ProcFrame,
    Proc,
    Loop,
    Stmt(DynPayload),
    Call(DynPayload),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Root { .. } => NodeKind::Root,
            Self::ProcFrame => NodeKind::ProcFrame,
            Self::Proc => NodeKind::Proc,
            Self::Loop => NodeKind::Loop,
            Self::Stmt(_) => NodeKind::Stmt,
            Self::Call(_) => NodeKind::Call,
        }
    }

    pub fn payload(&self) -> Option<&DynPayload> {
        match self {
            Self::Stmt(p) | Self::Call(p) => Some(p),
            _ => None,
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut DynPayload> {
        match self {
            Self::Stmt(p) | Self::Call(p) => Some(p),
            _ => None,
        }
    }
}

/// Parent and sibling-ring links. `next`/`prev` wrap around inside the ring;
/// the tree's accessors cut the wrap at the first and last child.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Links {
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) first_child: Option<NodeIndex>,
    pub(crate) next: Option<NodeIndex>,
    pub(crate) prev: Option<NodeIndex>,
}

/// A node of the calling-context tree.
///
/// Nodes live in a [`crate::Tree`] arena and are addressed by [`NodeIndex`];
/// `id` is the separate, process-unique identity that survives merges.
#[derive(Debug)]
pub struct Node {
    pub(crate) id: u32,
    pub(crate) structure: Option<StructureRef>,
    pub(crate) data: NodeData,
    pub(crate) links: Links,
}

impl Node {
    pub(crate) fn new(id: u32, data: NodeData, structure: Option<StructureRef>) -> Self {
        Self {
            id,
            structure,
            data,
            links: Links::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn payload(&self) -> Option<&DynPayload> {
        self.data.payload()
    }

    pub fn payload_mut(&mut self) -> Option<&mut DynPayload> {
        self.data.payload_mut()
    }

    pub fn structure(&self) -> Option<&StructureRef> {
        self.structure.as_ref()
    }

    pub fn set_structure(&mut self, structure: Option<StructureRef>) {
        self.structure = structure;
    }

    fn strct(&self) -> Option<Arc<dyn CodeStructure>> {
        self.structure.as_ref().and_then(std::sync::Weak::upgrade)
    }

    /// 0 when no structure is attached.
    pub fn structure_id(&self) -> u32 {
        self.strct().map_or(0, |s| s.id())
    }

    pub fn begin_line(&self) -> Option<u32> {
        self.strct().and_then(|s| s.begin_line())
    }

    pub fn end_line(&self) -> Option<u32> {
        self.strct().and_then(|s| s.end_line())
    }

    /// Program name for the root, kind name otherwise.
    pub fn name(&self) -> SharedStr {
        match &self.data {
            NodeData::Root { name } => name.clone(),
            other => SharedStr::from(other.kind().as_str()),
        }
    }

    /// The name a report shows for this node.
    pub fn display_name(&self, placeholder: &str) -> String {
        match &self.data {
            NodeData::Root { name } => name.to_string(),
            NodeData::ProcFrame => self
                .strct()
                .map_or_else(|| placeholder.to_string(), |s| s.name().to_string()),
            other => other.kind().as_str().to_string(),
        }
    }

    /// `file:begin-end` from the static structure.
    pub fn code_location(&self, placeholder: &str) -> String {
        let Some(s) = self.strct() else {
            return placeholder.to_string();
        };
        let file = match s.kind() {
            StructureKind::Alien => s.alien_file_name(),
            _ => s.file().map(|f| f.name),
        };
        let file = file.map_or_else(|| placeholder.to_string(), |f| f.to_string());
        match (s.begin_line(), s.end_line()) {
            (Some(b), Some(e)) => format!("{file}:{b}-{e}"),
            (Some(b), None) => format!("{file}:{b}"),
            _ => file,
        }
    }

    /// Instruction pointer reported for statement and call nodes.
    ///
    /// Calls store return addresses; the call site is `ra_to_callsite_offset`
    /// bytes earlier, applied to the logical ip when one is valid.
    pub fn reported_ip(&self, ra_to_callsite_offset: u64) -> Option<Vma> {
        match &self.data {
            NodeData::Stmt(p) => Some(p.ip()),
            NodeData::Call(p) => Some(p.ip().wrapping_sub(ra_to_callsite_offset)),
            _ => None,
        }
    }

    /// Physical return address of a call node.
    pub fn ra(&self) -> Option<Vma> {
        match &self.data {
            NodeData::Call(p) => Some(p.ip_real()),
            _ => None,
        }
    }

    pub fn as_proc_frame(&self) -> Option<ProcFrameView<'_>> {
        match self.data {
            NodeData::ProcFrame => Some(ProcFrameView { node: self }),
            _ => None,
        }
    }

    /// Whether `self` and `other` are the same call-path element.
    ///
    /// Same kind and, for dynamic kinds, the same physical and logical
    /// location; for the other kinds, the identical structure node.
    pub fn is_mergeable(&self, other: &Node) -> bool {
        match (&self.data, &other.data) {
            (NodeData::Stmt(x), NodeData::Stmt(y)) | (NodeData::Call(x), NodeData::Call(y)) => {
                x.is_mergeable(y)
            }
            (x, y) if x.kind() == y.kind() && !x.kind().is_dynamic() => {
                same_structure(self.structure.as_ref(), other.structure.as_ref())
            }
            _ => false,
        }
    }
}

/// Procedure-frame accessors resolved through the static structure.
///
/// The structure is a procedure or an alien (inlined) record; for aliens the
/// file comes from the alien record instead of the enclosing file scope.
/// Without structure, names are `None` and ids 0.
#[derive(Debug, Clone, Copy)]
pub struct ProcFrameView<'a> {
    node: &'a Node,
}

impl ProcFrameView<'_> {
    pub fn is_alien(&self) -> bool {
        self.node
            .strct()
            .is_some_and(|s| s.kind() == StructureKind::Alien)
    }

    pub fn lm_name(&self) -> Option<SharedStr> {
        self.node.strct()?.load_module().map(|lm| lm.name)
    }

    pub fn lm_id(&self) -> u32 {
        self.node
            .strct()
            .and_then(|s| s.load_module())
            .map_or(0, |lm| lm.id)
    }

    pub fn file_name(&self) -> Option<SharedStr> {
        let s = self.node.strct()?;
        if s.kind() == StructureKind::Alien {
            s.alien_file_name()
        } else {
            s.file().map(|f| f.name)
        }
    }

    pub fn file_id(&self) -> u32 {
        let Some(s) = self.node.strct() else {
            return 0;
        };
        if s.kind() == StructureKind::Alien {
            s.id()
        } else {
            s.file().map_or(0, |f| f.id)
        }
    }

    pub fn proc_name(&self) -> Option<SharedStr> {
        self.node.strct().map(|s| s.name())
    }

    pub fn proc_id(&self) -> u32 {
        self.node.structure_id()
    }

    /// Procedure name qualified with file and first line.
    pub fn proc_name_dbg(&self, placeholder: &str) -> String {
        let name = self
            .proc_name()
            .map_or_else(|| placeholder.to_string(), |n| n.to_string());
        let file = self
            .file_name()
            .map_or_else(|| placeholder.to_string(), |f| f.to_string());
        match self.node.begin_line() {
            Some(line) => format!("{name} [{file}:{line}]"),
            None => format!("{name} [{file}]"),
        }
    }
}
