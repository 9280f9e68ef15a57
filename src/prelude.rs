//! # lodestone Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! from the lodestone library. Import this module to get quick access to the
//! essential types for loading and inspecting specializations.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all lodestone operations
pub use crate::Error;

/// The result type used throughout lodestone
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Main entry point for loading specializations
pub use crate::RuntimeLoader;

/// Loader configuration and commit hooks
pub use crate::{LoaderObserver, LoaderOptions};

// ================================================================================================
// Identity and Requests
// ================================================================================================

/// Identity key of a specialization
pub use crate::runtime::LoadingArguments;

/// Monotonic object identifiers
pub use crate::runtime::{FunctionId, TypeId};

/// Segmented generic argument lists
pub use crate::metadata::generics::MultiList;

// ================================================================================================
// Parsed Metadata
// ================================================================================================

/// Assemblies and linkage tables
pub use crate::metadata::assembly::{Assembly, AssemblyExport, AssemblyImport, AssemblyRegistry};

/// Template descriptions
pub use crate::metadata::template::{
    FunctionTemplate, InheritanceInfo, NamedId, StorageMode, TraitTemplate, TypeTemplate,
    VirtualFunctionEntry,
};

/// Generic declarations and the reference-list encoding
pub use crate::metadata::generics::{
    Constraint, ConstraintKind, GenericDeclaration, ParamCountList, RefEntry, RefKind,
};

// ================================================================================================
// Loaded Objects
// ================================================================================================

/// Loaded types with layout and inheritance
pub use crate::runtime::types::{RuntimeFieldInfo, RuntimeType, RuntimeTypeRc};

/// Loaded functions and shared code records
pub use crate::runtime::functions::{RuntimeFunction, RuntimeFunctionCode, RuntimeFunctionRc};
