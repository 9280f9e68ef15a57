//! Uninstantiated type, function and trait templates.
//!
//! Templates are the immutable, parser-produced descriptions the loader
//! specializes. Every cross-template relation is expressed through the owning
//! [`GenericDeclaration`]'s reference lists; a template never holds a direct
//! pointer to another template.

use std::sync::Arc;

use crate::metadata::generics::{GenericDeclaration, RefKind};

/// A reference to a shared `TypeTemplate`.
pub type TypeTemplateRc = Arc<TypeTemplate>;
/// A reference to a shared `FunctionTemplate`.
pub type FunctionTemplateRc = Arc<FunctionTemplate>;
/// A reference to a shared `TraitTemplate`.
pub type TraitTemplateRc = Arc<TraitTemplate>;

/// How instances of a type are stored and managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StorageMode {
    /// Inline storage; size and alignment come from the field layout.
    Value,
    /// Heap storage behind a pointer; fields live in the referenced object.
    Reference,
    /// A single static instance; the loader allocates its storage.
    Global,
    /// No instances; participates only in virtual dispatch.
    Interface,
}

/// A name bound to a template-local id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedId {
    /// Public name of the member.
    pub name: String,
    /// Meaning depends on the table: field ordinal, function reference-list
    /// index, or sub-type template id.
    pub id: usize,
}

impl NamedId {
    /// Construct a named id.
    #[must_use]
    pub fn new(name: impl Into<String>, id: usize) -> Self {
        NamedId { name: name.into(), id }
    }
}

/// One virtual-method slot declared by a base or interface relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFunctionEntry {
    /// Slot name used for override matching and trait lookup.
    pub name: String,
    /// Reference-list index (Functions list) of the slot's declared function.
    pub virtual_function: usize,
    /// Reference-list index (Functions list) of the implementing function.
    pub implementation: usize,
}

/// A base-type or interface relation of a type template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritanceInfo {
    /// Reference-list index (Types list) of the inherited type; an `Empty`
    /// entry means there is none.
    pub inherited: usize,
    /// Virtual-method table contributed by this relation.
    pub virtual_functions: Vec<VirtualFunctionEntry>,
}

impl InheritanceInfo {
    /// A relation that inherits nothing, pointing at reference-list slot `empty_slot`.
    #[must_use]
    pub fn none(empty_slot: usize) -> Self {
        InheritanceInfo {
            inherited: empty_slot,
            virtual_functions: Vec::new(),
        }
    }
}

/// An uninstantiated type.
#[derive(Debug, Clone)]
pub struct TypeTemplate {
    /// Generic parameters, constraints and reference lists.
    pub generic: GenericDeclaration,
    /// Storage discipline of every specialization.
    pub storage: StorageMode,
    /// Field slots, as indices into `generic.types`.
    pub fields: Vec<usize>,
    /// Base-type relation.
    pub base: InheritanceInfo,
    /// Implemented interfaces, in declaration order.
    pub interfaces: Vec<InheritanceInfo>,
    /// Reference-list index (Functions list) of the initializer; `Empty` = none.
    pub initializer: usize,
    /// Reference-list index (Functions list) of the finalizer; `Empty` = none.
    pub finalizer: usize,
    /// Publicly visible fields, `id` = field ordinal.
    pub public_fields: Vec<NamedId>,
    /// Publicly visible functions, `id` = Functions reference-list index.
    pub public_functions: Vec<NamedId>,
    /// Named member types, `id` = template id in the owning assembly.
    pub public_sub_types: Vec<NamedId>,
}

impl TypeTemplate {
    /// A minimal template with the given storage mode.
    ///
    /// Slot 0 of both reference lists is pre-seeded with an `Empty` entry so
    /// that the base, initializer and finalizer references have somewhere to
    /// point until the builder fills them in.
    #[must_use]
    pub fn new(storage: StorageMode) -> Self {
        let mut generic = GenericDeclaration::default();
        generic.types.push(crate::metadata::generics::RefEntry::EMPTY);
        generic.functions.push(crate::metadata::generics::RefEntry::EMPTY);
        TypeTemplate {
            generic,
            storage,
            fields: Vec::new(),
            base: InheritanceInfo::none(0),
            interfaces: Vec::new(),
            initializer: 0,
            finalizer: 0,
            public_fields: Vec::new(),
            public_functions: Vec::new(),
            public_sub_types: Vec::new(),
        }
    }

    /// Whether the initializer slot holds an actual function reference.
    #[must_use]
    pub fn declares_initializer(&self) -> bool {
        self.generic
            .functions
            .get(self.initializer)
            .is_some_and(|e| e.kind != RefKind::Empty)
    }

    /// Whether the finalizer slot holds an actual function reference.
    #[must_use]
    pub fn declares_finalizer(&self) -> bool {
        self.generic
            .functions
            .get(self.finalizer)
            .is_some_and(|e| e.kind != RefKind::Empty)
    }
}

/// One constant-table entry of a function template.
///
/// A `length` of zero marks an import-constant slot: `offset` is then the
/// import id, and the loader materializes the value into the constant data
/// when the code record is first built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionConst {
    /// Byte offset into the constant data (or the import id, see above).
    pub offset: usize,
    /// Byte length of the constant; zero marks an import slot.
    pub length: usize,
}

/// A local-variable descriptor of a function template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionLocal {
    /// Reference-list index (Types list) of the variable's type.
    pub type_index: usize,
}

/// An uninstantiated function.
#[derive(Debug, Clone, Default)]
pub struct FunctionTemplate {
    /// Generic parameters, constraints and reference lists.
    pub generic: GenericDeclaration,
    /// Reference-list index (Types list) of the return type; `Empty` = void.
    pub return_type: usize,
    /// Reference-list indices (Types list) of the parameters.
    pub parameters: Vec<usize>,
    /// Raw instruction bytes.
    pub instructions: Vec<u8>,
    /// Raw constant data.
    pub constant_data: Vec<u8>,
    /// Constant-table entries over `constant_data`.
    pub constant_table: Vec<FunctionConst>,
    /// Local-variable descriptors.
    pub locals: Vec<FunctionLocal>,
}

impl FunctionTemplate {
    /// A codeless template whose return slot points at reference-list slot 0.
    #[must_use]
    pub fn new() -> Self {
        let mut generic = GenericDeclaration::default();
        generic.types.push(crate::metadata::generics::RefEntry::EMPTY);
        FunctionTemplate {
            generic,
            return_type: 0,
            parameters: Vec::new(),
            instructions: Vec::new(),
            constant_data: Vec::new(),
            constant_table: Vec::new(),
            locals: Vec::new(),
        }
    }

    /// Whether the template carries any code, constants or locals at all.
    #[must_use]
    pub fn has_code(&self) -> bool {
        !self.instructions.is_empty()
            || !self.constant_data.is_empty()
            || !self.constant_table.is_empty()
    }
}

/// A field requirement of a trait.
#[derive(Debug, Clone)]
pub struct TraitField {
    /// Name the target must expose publicly.
    pub element_name: String,
    /// Name under which the matched field is exported.
    pub export_name: String,
    /// Reference-list index (trait Types list) of the required field type.
    pub field_type: usize,
}

/// A function requirement of a trait.
#[derive(Debug, Clone)]
pub struct TraitFunction {
    /// Name the target must expose publicly (or virtually).
    pub element_name: String,
    /// Name under which the matched function is exported.
    pub export_name: String,
    /// Reference-list index (trait Types list) of the required return type.
    pub return_type: usize,
    /// Reference-list indices (trait Types list) of the required parameters.
    pub parameter_types: Vec<usize>,
}

/// A type a trait exports to its users once satisfied.
#[derive(Debug, Clone)]
pub struct TraitExportedType {
    /// Export name, matched against the tail of a constraint export path.
    pub export_name: String,
    /// Reference-list index (trait Types list) of the exported type.
    pub index: usize,
}

/// An uninstantiated trait.
#[derive(Debug, Clone, Default)]
pub struct TraitTemplate {
    /// Generic parameters, constraints and reference lists.
    pub generic: GenericDeclaration,
    /// Fields the target must expose.
    pub fields: Vec<TraitField>,
    /// Functions the target must expose.
    pub functions: Vec<TraitFunction>,
    /// Types the trait exports once satisfied.
    pub types: Vec<TraitExportedType>,
}
