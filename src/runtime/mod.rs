//! Loader-produced runtime objects.
//!
//! Where [`crate::metadata`] is what the parser produced, this module is what
//! the loader produces: fully specialized types and functions with computed
//! layouts, resolved references and monotonic ids. Committed objects are
//! shared as `Arc`s and immutable; links inside the object graph are ids, not
//! pointers, so the cyclic type graph stays representable without reference
//! cycles.
//!
//! # Key Components
//!
//! - [`types`] - [`RuntimeType`](types::RuntimeType) with layout, inheritance
//!   and static storage
//! - [`functions`] - [`RuntimeFunction`](functions::RuntimeFunction) and the
//!   shared [`RuntimeFunctionCode`](functions::RuntimeFunctionCode) records

pub mod functions;
pub mod types;

use std::fmt;

use crate::metadata::generics::MultiList;

/// Monotonic identifier of a loaded type.
///
/// Ids are assigned at object creation and never reused; a failed loading run
/// leaves holes in the id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The id as a table index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Monotonic identifier of a loaded function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl FunctionId {
    /// The id as a table index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// The identity key of a specialization.
///
/// Two loading requests with equal `LoadingArguments` always yield the same
/// runtime object; the loader compares the key componentwise against every
/// committed and in-flight object before creating anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingArguments {
    /// Name of the assembly owning the template.
    pub assembly: String,
    /// Template id inside the assembly.
    pub id: usize,
    /// Fully resolved generic arguments, segment by segment.
    pub arguments: MultiList<TypeId>,
}

impl LoadingArguments {
    /// A request without generic arguments.
    #[must_use]
    pub fn new(assembly: impl Into<String>, id: usize) -> Self {
        LoadingArguments {
            assembly: assembly.into(),
            id,
            arguments: MultiList::new(),
        }
    }

    /// A request with the given argument multilist.
    #[must_use]
    pub fn with_arguments(assembly: impl Into<String>, id: usize, arguments: MultiList<TypeId>) -> Self {
        LoadingArguments {
            assembly: assembly.into(),
            id,
            arguments,
        }
    }
}

impl fmt::Display for LoadingArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.assembly, self.id)?;
        if self.arguments.total_len() > 0 {
            write!(f, "<")?;
            for (i, t) in self.arguments.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{t}")?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

/// One entry recorded by the constraint export binder.
///
/// `index` is always the position of the consuming `Constraint` entry in the
/// owning declaration's respective reference list; the evaluator reads the
/// recorded object back when that entry is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintExportEntry {
    /// A type produced by constraint satisfaction.
    Type {
        /// Position in the declaration's Types list.
        index: usize,
        /// The recorded type.
        export: TypeId,
    },
    /// A function produced by constraint satisfaction.
    Function {
        /// Position in the declaration's Functions list.
        index: usize,
        /// The recorded function.
        export: FunctionId,
    },
    /// A field ordinal produced by constraint satisfaction.
    Field {
        /// Position in the declaration's Fields list.
        index: usize,
        /// The matched field ordinal on the target.
        field: usize,
    },
}

/// Exports recorded while a specialization's constraints were satisfied.
#[derive(Debug, Clone, Default)]
pub struct ConstraintExportList {
    /// Recorded entries, in binding order.
    pub entries: Vec<ConstraintExportEntry>,
}

impl ConstraintExportList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        ConstraintExportList { entries: Vec::new() }
    }

    /// The type recorded for Types-list position `index`, if any.
    #[must_use]
    pub fn find_type(&self, index: usize) -> Option<TypeId> {
        self.entries.iter().find_map(|e| match e {
            ConstraintExportEntry::Type { index: i, export } if *i == index => Some(*export),
            _ => None,
        })
    }

    /// The function recorded for Functions-list position `index`, if any.
    #[must_use]
    pub fn find_function(&self, index: usize) -> Option<FunctionId> {
        self.entries.iter().find_map(|e| match e {
            ConstraintExportEntry::Function { index: i, export } if *i == index => Some(*export),
            _ => None,
        })
    }

    /// The field ordinal recorded for Fields-list position `index`, if any.
    #[must_use]
    pub fn find_field(&self, index: usize) -> Option<usize> {
        self.entries.iter().find_map(|e| match e {
            ConstraintExportEntry::Field { index: i, field } if *i == index => Some(*field),
            _ => None,
        })
    }
}
