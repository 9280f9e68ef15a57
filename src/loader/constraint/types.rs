//! Symbolic types and the backtracking root of one constraint evaluation.
//!
//! The solver reasons over [`CtKind`] nodes: fully determined runtime types,
//! partially determined constructors, pending subtype lookups and
//! undetermined variables. All nodes live in an arena owned by the
//! [`ConstraintRoot`]; sharing is by id, and the two mutating deductions
//! (`deduct_fail`, `deduct_rt`) plus variable bindings are recorded in a
//! single undo log so overload search can roll the world back cheaply.

use crate::{
    metadata::generics::MultiList,
    runtime::TypeId,
    Error, Result,
};

/// Index of a symbolic type node in the root's arena.
pub(crate) type CtId = usize;
/// Index of a constraint cache in the solve context.
pub(crate) type CacheId = usize;

/// The shape of a symbolic type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CtKind {
    /// Evaluation failed; tolerated under a `Try` flag, fatal otherwise.
    Fail,
    /// The void type.
    Empty,
    /// An undetermined variable; the payload indexes the root's value table.
    Any(usize),
    /// A fully determined runtime type.
    Rt(TypeId),
    /// A partially determined constructor: template plus symbolic arguments.
    Generic {
        /// Assembly owning the template.
        assembly: String,
        /// Template id.
        template: usize,
    },
    /// A pending named-member lookup on a symbolic parent.
    Subtype {
        /// Member name.
        name: String,
    },
}

#[derive(Debug)]
struct CtNode {
    kind: CtKind,
    args: MultiList<CtId>,
    parent: Option<CtId>,
    try_constraint: bool,
    saved: Option<CtKind>,
    level: usize,
}

#[derive(Debug)]
enum UndoEntry {
    Node(CtId),
    Var(usize),
}

/// Arena, variable table and undo log of one constraint evaluation.
#[derive(Debug, Default)]
pub(crate) struct ConstraintRoot {
    nodes: Vec<CtNode>,
    determined: Vec<Option<TypeId>>,
    undo_log: Vec<UndoEntry>,
    marks: Vec<usize>,
    /// Number of caches created under this root.
    pub cache_count: usize,
}

impl ConstraintRoot {
    pub fn new() -> Self {
        ConstraintRoot::default()
    }

    fn alloc(&mut self, kind: CtKind, args: MultiList<CtId>, parent: Option<CtId>) -> CtId {
        let id = self.nodes.len();
        self.nodes.push(CtNode {
            kind,
            args,
            parent,
            try_constraint: false,
            saved: None,
            level: 0,
        });
        id
    }

    /// A failed node.
    pub fn fail(&mut self) -> CtId {
        self.alloc(CtKind::Fail, MultiList::new(), None)
    }

    /// The void node.
    pub fn empty(&mut self) -> CtId {
        self.alloc(CtKind::Empty, MultiList::new(), None)
    }

    /// A determined node.
    pub fn rt(&mut self, ty: TypeId) -> CtId {
        self.alloc(CtKind::Rt(ty), MultiList::new(), None)
    }

    /// A fresh undetermined variable.
    pub fn fresh_any(&mut self) -> CtId {
        let var = self.determined.len();
        self.determined.push(None);
        self.alloc(CtKind::Any(var), MultiList::new(), None)
    }

    /// A partially determined constructor without arguments yet.
    pub fn generic(&mut self, assembly: String, template: usize) -> CtId {
        self.alloc(CtKind::Generic { assembly, template }, MultiList::new(), None)
    }

    /// A pending subtype lookup.
    pub fn subtype(&mut self, name: String, parent: CtId) -> CtId {
        self.alloc(CtKind::Subtype { name }, MultiList::new(), Some(parent))
    }

    /// A shallow copy of `id` carrying the tolerated-failure flag.
    pub fn try_wrap(&mut self, id: CtId) -> CtId {
        let kind = self.nodes[id].kind.clone();
        let args = self.nodes[id].args.clone();
        let parent = self.nodes[id].parent;
        let copy = self.alloc(kind, args, parent);
        self.nodes[copy].try_constraint = true;
        copy
    }

    /// Late argument assignment for constructor and subtype nodes.
    pub fn set_args(&mut self, id: CtId, args: MultiList<CtId>) {
        self.nodes[id].args = args;
    }

    pub fn kind(&self, id: CtId) -> &CtKind {
        &self.nodes[id].kind
    }

    pub fn args(&self, id: CtId) -> &MultiList<CtId> {
        &self.nodes[id].args
    }

    pub fn parent(&self, id: CtId) -> Option<CtId> {
        self.nodes[id].parent
    }

    pub fn is_try(&self, id: CtId) -> bool {
        self.nodes[id].try_constraint
    }

    /// The runtime type behind a determined node.
    pub fn rt_of(&self, id: CtId) -> Option<TypeId> {
        match self.nodes[id].kind {
            CtKind::Rt(ty) => Some(ty),
            _ => None,
        }
    }

    /// Current binding of an undetermined variable.
    pub fn determined_value(&self, var: usize) -> Option<TypeId> {
        self.determined[var]
    }

    /// Bind an undetermined variable; recorded for backtracking.
    pub fn determine_var(&mut self, var: usize, ty: TypeId) {
        debug_assert!(self.determined[var].is_none());
        self.determined[var] = Some(ty);
        self.undo_log.push(UndoEntry::Var(var));
    }

    /// Deduce a node to failure; recorded for backtracking.
    pub fn deduct_fail(&mut self, id: CtId) {
        debug_assert_eq!(self.nodes[id].level, 0);
        let old = self.nodes[id].kind.clone();
        self.nodes[id].saved = Some(old);
        self.nodes[id].level = self.current_level();
        self.nodes[id].kind = CtKind::Fail;
        self.undo_log.push(UndoEntry::Node(id));
    }

    /// Deduce a node to a determined type; recorded for backtracking.
    pub fn deduct_rt(&mut self, id: CtId, ty: TypeId) {
        debug_assert_eq!(self.nodes[id].level, 0);
        let old = self.nodes[id].kind.clone();
        self.nodes[id].saved = Some(old);
        self.nodes[id].level = self.current_level();
        self.nodes[id].kind = CtKind::Rt(ty);
        self.undo_log.push(UndoEntry::Node(id));
    }

    /// Open a new backtrack point and return its handle.
    pub fn start_backtrack_point(&mut self) -> usize {
        let mark = self.marks.len();
        self.marks.push(self.undo_log.len());
        mark
    }

    /// Roll back every mutation recorded at or above `mark`.
    pub fn backtrack(&mut self, mark: usize) -> Result<()> {
        let Some(&size) = self.marks.get(mark) else {
            return Err(Error::Assertion(format!("unknown backtrack point {mark}")));
        };
        while self.undo_log.len() > size {
            match self.undo_log.pop().unwrap() {
                UndoEntry::Node(id) => {
                    if self.nodes[id].level > mark {
                        let saved = self.nodes[id].saved.take().ok_or_else(|| {
                            Error::Assertion("deduction without saved state".to_string())
                        })?;
                        self.nodes[id].kind = saved;
                        self.nodes[id].level = 0;
                    }
                }
                UndoEntry::Var(var) => {
                    self.determined[var] = None;
                }
            }
        }
        Ok(())
    }

    fn current_level(&self) -> usize {
        self.marks.len()
    }

    /// Whether any undetermined variable is reachable from `id`.
    pub fn is_undetermined(&self, id: CtId) -> bool {
        match &self.nodes[id].kind {
            CtKind::Rt(_) | CtKind::Empty | CtKind::Fail => false,
            CtKind::Any(var) => self.determined[*var].is_none(),
            CtKind::Subtype { .. } => {
                if let Some(parent) = self.nodes[id].parent {
                    if self.is_undetermined(parent) {
                        return true;
                    }
                }
                self.nodes[id].args.iter().any(|&a| self.is_undetermined(a))
            }
            CtKind::Generic { .. } => self.nodes[id].args.iter().any(|&a| self.is_undetermined(a)),
        }
    }
}
