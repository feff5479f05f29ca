//! Read-only view of the static source-structure tree.
//!
//! CCT nodes point at structure nodes (procedures, loops, statements) to
//! recover names and line ranges. The structure tree lives elsewhere and
//! outlives nothing here: nodes hold a [`StructureRef`], a weak pointer that
//! behaves like "no structure" once its referent is gone.

use std::fmt;
use std::sync::{Arc, Weak};

use super::SharedStr;

/// What kind of source construct a structure node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    LoadModule,
    File,
    Proc,
    /// Code inlined from another file or procedure.
    Alien,
    Loop,
    Stmt,
}

/// An enclosing load module or file: id and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub id: u32,
    pub name: SharedStr,
}

impl Scope {
    pub fn new(id: u32, name: impl Into<SharedStr>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Interface the static-structure subsystem provides to the CCT.
pub trait CodeStructure: fmt::Debug + Send + Sync {
    fn id(&self) -> u32;
    fn kind(&self) -> StructureKind;
    fn name(&self) -> SharedStr;
    fn begin_line(&self) -> Option<u32>;
    fn end_line(&self) -> Option<u32>;
    /// Enclosing load module.
    fn load_module(&self) -> Option<Scope>;
    /// Enclosing file.
    fn file(&self) -> Option<Scope>;
    /// Source file of an alien (inlined) construct.
    fn alien_file_name(&self) -> Option<SharedStr> {
        None
    }
}

pub type StructureRef = Weak<dyn CodeStructure>;

pub fn downgrade<S: CodeStructure + 'static>(strct: &Arc<S>) -> StructureRef {
    let weak: Weak<S> = Arc::downgrade(strct);
    weak as StructureRef
}

/// Identity comparison: the same structure node, or both absent.
pub fn same_structure(a: Option<&StructureRef>, b: Option<&StructureRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Weak::ptr_eq(a, b),
        _ => false,
    }
}

/// A self-contained structure node, for tools that have no structure tree of
/// their own.
#[derive(Debug, Clone)]
pub struct CodeScope {
    pub id: u32,
    pub kind: StructureKind,
    pub name: SharedStr,
    pub begin_line: Option<u32>,
    pub end_line: Option<u32>,
    pub load_module: Option<Scope>,
    pub file: Option<Scope>,
    pub alien_file: Option<SharedStr>,
}

impl CodeScope {
    pub fn new(id: u32, kind: StructureKind, name: impl Into<SharedStr>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            begin_line: None,
            end_line: None,
            load_module: None,
            file: None,
            alien_file: None,
        }
    }

    pub fn procedure(id: u32, name: impl Into<SharedStr>) -> Self {
        Self::new(id, StructureKind::Proc, name)
    }

    /// Inlined code whose source lives in `file_name`.
    pub fn alien(id: u32, name: impl Into<SharedStr>, file_name: impl Into<SharedStr>) -> Self {
        Self {
            alien_file: Some(file_name.into()),
            ..Self::new(id, StructureKind::Alien, name)
        }
    }

    pub fn with_lines(mut self, begin: u32, end: u32) -> Self {
        self.begin_line = Some(begin);
        self.end_line = Some(end);
        self
    }

    pub fn in_file(mut self, file: Scope) -> Self {
        self.file = Some(file);
        self
    }

    pub fn in_load_module(mut self, lm: Scope) -> Self {
        self.load_module = Some(lm);
        self
    }
}

impl CodeStructure for CodeScope {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> StructureKind {
        self.kind
    }

    fn name(&self) -> SharedStr {
        self.name.clone()
    }

    fn begin_line(&self) -> Option<u32> {
        self.begin_line
    }

    fn end_line(&self) -> Option<u32> {
        self.end_line
    }

    fn load_module(&self) -> Option<Scope> {
        self.load_module.clone()
    }

    fn file(&self) -> Option<Scope> {
        self.file.clone()
    }

    fn alien_file_name(&self) -> Option<SharedStr> {
        self.alien_file.clone()
    }
}
