//! Fully specialized runtime functions and their shared code records.

use std::sync::Arc;

use crate::{
    metadata::template::{FunctionConst, FunctionLocal},
    runtime::{ConstraintExportList, FunctionId, LoadingArguments, TypeId},
};

/// A reference to a committed `RuntimeFunction`.
pub type RuntimeFunctionRc = Arc<RuntimeFunction>;

/// The immutable code record shared by all specializations of one function
/// template.
///
/// Built once per `(assembly, template)` pair: the instruction stream gets 16
/// trailing no-op bytes appended, and every import-constant slot of the
/// constant table is materialized into four little-endian bytes of fresh
/// constant data.
#[derive(Debug, Clone)]
pub struct RuntimeFunctionCode {
    /// Assembly owning the template.
    pub assembly: String,
    /// Template id inside the assembly.
    pub template_id: usize,
    /// Instruction bytes, padded with trailing no-ops.
    pub instructions: Vec<u8>,
    /// Constant data, including materialized import constants.
    pub constant_data: Vec<u8>,
    /// Constant-table entries over `constant_data`.
    pub constant_table: Vec<FunctionConst>,
    /// Local-variable descriptors.
    pub locals: Vec<FunctionLocal>,
}

/// A fully specialized function.
///
/// The referenced-object lists mirror the template's reference lists position
/// by position; entries that do not denote a loadable object (list
/// terminators, argument slots, void) are `None`.
#[derive(Debug)]
pub struct RuntimeFunction {
    /// Identity of this specialization.
    pub args: LoadingArguments,
    /// Monotonic id, the index into the loader's function table.
    pub function_id: FunctionId,
    /// Shared code record; `None` for codeless (abstract or native) templates.
    pub code: Option<Arc<RuntimeFunctionCode>>,
    /// Resolved Types-list entries of the template's declaration.
    pub referenced_types: Vec<Option<TypeId>>,
    /// Resolved Functions-list entries of the template's declaration.
    pub referenced_functions: Vec<Option<FunctionId>>,
    /// Return type; `None` is void.
    pub return_type: Option<TypeId>,
    /// Parameter types, in declaration order (`None` entries are void slots).
    pub parameters: Vec<Option<TypeId>>,
    /// Exports recorded while this specialization's constraints were checked.
    pub constraint_exports: ConstraintExportList,
}
