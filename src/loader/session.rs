//! Pipeline-local state of one loading run.
//!
//! Every public API call starts with empty worklists, drives the pipeline
//! until they drain, and clears them again on the way out - successful or
//! not. Nothing in here survives a call; committed objects live in the
//! loader's main tables.

use std::collections::VecDeque;

use crate::{
    metadata::generics::MultiList,
    runtime::{functions::RuntimeFunction, types::RuntimeType, FunctionId, LoadingArguments, TypeId},
};

use super::TypeSnapshot;

/// Identity of an in-flight subtype lookup, used for cycle detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubtypeKey {
    /// The parent type whose member is being looked up.
    pub parent: TypeId,
    /// The member name.
    pub name: String,
    /// The provided generic arguments.
    pub arguments: MultiList<TypeId>,
}

/// Worklists owned by the current pipeline run.
///
/// The deques keep creation order; the drain loop pops from the back, so each
/// list behaves as a stack within a run. The plain vectors are pure in-flight
/// markers for cycle detection.
#[derive(Debug, Default)]
pub(crate) struct LoadingSession {
    /// Value types currently inside field loading (cycle detector).
    pub loading_values: Vec<LoadingArguments>,
    /// Subtype lookups currently in flight (cycle detector).
    pub loading_subtypes: Vec<SubtypeKey>,
    /// Type keys currently under constraint evaluation (re-entrancy detector).
    pub constraint_checking_types: Vec<LoadingArguments>,
    /// Function keys currently under constraint evaluation.
    pub constraint_checking_functions: Vec<LoadingArguments>,
    /// Types whose virtual table is being assembled (cycle detector).
    pub vtable_stack: Vec<TypeId>,
    /// Snapshot of the type currently taken off a worklist for processing;
    /// keeps it findable while the drain step owns it.
    pub processing_types: Vec<TypeSnapshot>,
    /// Identity of the function currently taken off a worklist for
    /// processing.
    pub processing_functions: Vec<(LoadingArguments, FunctionId)>,

    /// Reference types with a published pointer, fields not yet laid out.
    pub loading_ref_types: VecDeque<RuntimeType>,
    /// Types with laid-out fields, pending post-load.
    pub post_loading_types: VecDeque<RuntimeType>,
    /// Functions with a published pointer, pending post-load.
    pub loading_functions: VecDeque<RuntimeFunction>,
    /// Types ready to commit.
    pub finished_types: VecDeque<RuntimeType>,
    /// Functions ready to commit.
    pub finished_functions: VecDeque<RuntimeFunction>,

    /// Objects created in this run, bounded by the configured loading limit.
    pub created_objects: usize,
}

impl LoadingSession {
    /// Reset every list; called at the start and end of each API call.
    pub fn clear(&mut self) {
        self.loading_values.clear();
        self.loading_subtypes.clear();
        self.constraint_checking_types.clear();
        self.constraint_checking_functions.clear();
        self.vtable_stack.clear();
        self.processing_types.clear();
        self.processing_functions.clear();
        self.loading_ref_types.clear();
        self.post_loading_types.clear();
        self.loading_functions.clear();
        self.finished_types.clear();
        self.finished_functions.clear();
        self.created_objects = 0;
    }

    /// Find an in-flight type by its identity key.
    pub fn find_type_by_args(&self, args: &LoadingArguments) -> Option<&RuntimeType> {
        self.finished_types
            .iter()
            .chain(self.post_loading_types.iter())
            .chain(self.loading_ref_types.iter())
            .find(|t| &t.args == args)
    }

    /// Find an in-flight type by id.
    pub fn find_type_by_id(&self, id: TypeId) -> Option<&RuntimeType> {
        self.finished_types
            .iter()
            .chain(self.post_loading_types.iter())
            .chain(self.loading_ref_types.iter())
            .find(|t| t.type_id == id)
    }

    /// Find an in-flight function by its identity key.
    pub fn find_function_by_args(&self, args: &LoadingArguments) -> Option<&RuntimeFunction> {
        self.finished_functions
            .iter()
            .chain(self.loading_functions.iter())
            .find(|f| &f.args == args)
    }

    /// Find the type currently under processing by its identity key.
    pub fn find_processing_type(&self, args: &LoadingArguments) -> Option<TypeId> {
        self.processing_types
            .iter()
            .find(|s| &s.args == args)
            .map(|s| s.id)
    }

    /// Find the type currently under processing by id.
    pub fn find_processing_type_by_id(&self, id: TypeId) -> Option<&TypeSnapshot> {
        self.processing_types.iter().find(|s| s.id == id)
    }

    /// Find the function currently under processing by its identity key.
    pub fn find_processing_function(&self, args: &LoadingArguments) -> Option<FunctionId> {
        self.processing_functions
            .iter()
            .find(|(a, _)| a == args)
            .map(|(_, id)| *id)
    }
}
