//! The generic-constraint solver.
//!
//! Every specialization attempt runs its template's constraints before the
//! object is created. Each constraint becomes a cache tree ([`CacheNode`]):
//! the constraint itself at the root, a trait's own constraints as children,
//! plus the symbolic state of its arguments and target. Solving alternates
//! fix-point deduction over undetermined variables with enumeration of trait
//! function overloads, backtracking the symbolic state between candidate
//! combinations.
//!
//! # Modules
//! - [`types`] - the symbolic type arena and undo log
//! - `solver` - cache construction, trait resolution, unification, fix-point
//! - `exports` - the export binder for satisfied constraints

pub(crate) mod exports;
pub(crate) mod solver;
pub(crate) mod types;

use std::sync::Arc;

use crate::{
    metadata::{
        generics::{Constraint, GenericDeclaration, MultiList},
        template::{FunctionTemplateRc, TraitTemplateRc, TypeTemplateRc},
    },
    runtime::{ConstraintExportList, LoadingArguments, TypeId},
    Error, Result,
};

use super::LoaderCore;
use types::{CacheId, ConstraintRoot, CtId};

/// The template whose declaration owns a constraint under evaluation.
///
/// Identity (pointer equality of the shared template) is part of structural
/// cache equality; two caches are only comparable when they evaluate the
/// same declared constraint.
#[derive(Clone)]
pub(crate) enum ConstraintOwner {
    Type(TypeTemplateRc),
    Function(FunctionTemplateRc),
    Trait(TraitTemplateRc),
}

impl ConstraintOwner {
    pub fn generic(&self) -> &GenericDeclaration {
        match self {
            ConstraintOwner::Type(t) => &t.generic,
            ConstraintOwner::Function(f) => &f.generic,
            ConstraintOwner::Trait(t) => &t.generic,
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstraintOwner::Type(a), ConstraintOwner::Type(b)) => Arc::ptr_eq(a, b),
            (ConstraintOwner::Function(a), ConstraintOwner::Function(b)) => Arc::ptr_eq(a, b),
            (ConstraintOwner::Trait(a), ConstraintOwner::Trait(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// One declared constraint, identified by owner and position.
#[derive(Clone)]
pub(crate) struct ConstraintSource {
    pub owner: ConstraintOwner,
    pub index: usize,
}

impl ConstraintSource {
    pub fn constraint(&self) -> &Constraint {
        &self.owner.generic().constraints[self.index]
    }

    pub fn same_as(&self, other: &Self) -> bool {
        self.index == other.index && self.owner.ptr_eq(&other.owner)
    }
}

/// Matched field information of a trait requirement.
#[derive(Debug)]
pub(crate) struct TraitFieldInfo {
    /// The type the trait declares for the field.
    pub declared: CtId,
    /// The type the target actually exposes.
    pub in_target: CtId,
    /// Matched field ordinal on the target.
    pub field_index: usize,
}

/// One overload candidate for a trait function requirement.
#[derive(Debug)]
pub(crate) struct TraitOverload {
    /// Functions-list index on the target template (virtual slot for
    /// interface and base matches).
    pub index: usize,
    /// Candidate return type, symbolically.
    pub return_type: CtId,
    /// Candidate parameter types, symbolically.
    pub parameters: Vec<CtId>,
}

/// Overload set of one trait function requirement.
#[derive(Debug)]
pub(crate) struct TraitFunctionInfo {
    /// Candidates passing the quick possibly-equal filter.
    pub overloads: Vec<TraitOverload>,
    /// Cursor into `overloads`, advanced by backtracking.
    pub current: usize,
    /// Return type the trait declares.
    pub declared_return: CtId,
    /// Parameter types the trait declares.
    pub declared_parameters: Vec<CtId>,
}

/// Trait-specific state of a cache node.
#[derive(Debug)]
pub(crate) struct TraitInfo {
    pub template: TraitTemplateRc,
    pub assembly: String,
    pub cache_created: bool,
    pub member_resolved: bool,
    pub fields: Vec<TraitFieldInfo>,
    pub functions: Vec<TraitFunctionInfo>,
    /// Variables introduced for overload candidates; they must all resolve
    /// before the constraint can be declared satisfied.
    pub undetermined: Vec<CtId>,
}

/// One node of the constraint cache tree.
pub(crate) struct CacheNode {
    pub parent: Option<CacheId>,
    pub source: ConstraintSource,
    pub src_assembly: String,
    /// Arguments of the surrounding evaluation (generic arguments of the
    /// specialization, or the parent trait's arguments).
    pub check_arguments: MultiList<CtId>,
    /// Target handed down by the surrounding evaluation.
    pub check_target: CtId,
    /// The constraint's own resolved target.
    pub target: CtId,
    /// The constraint's own resolved arguments.
    pub arguments: MultiList<CtId>,
    pub children: Vec<CacheId>,
    pub trait_info: Option<TraitInfo>,
}

/// Working state of one constraint evaluation.
pub(crate) struct SolveCtx {
    pub root: ConstraintRoot,
    pub caches: Vec<CacheNode>,
}

impl SolveCtx {
    pub fn new() -> Self {
        SolveCtx {
            root: ConstraintRoot::new(),
            caches: Vec::new(),
        }
    }
}

impl LoaderCore {
    /// Validate argument shape and constraints for a type specialization.
    ///
    /// Returns `Ok(false)` when a constraint is unsatisfiable; hard errors
    /// (malformed templates, broken linkage, circular constraints) propagate.
    pub(crate) fn check_type_generic_arguments(
        &mut self,
        template: &TypeTemplateRc,
        args: &LoadingArguments,
        exports: Option<&mut ConstraintExportList>,
    ) -> Result<bool> {
        if !template
            .generic
            .parameter_count
            .can_match(args.arguments.size_list())
        {
            return Err(Error::InvalidGenericArguments(args.to_string()));
        }
        if self.session.constraint_checking_types.iter().any(|a| a == args) {
            return Err(Error::CircularConstraint);
        }
        self.session.constraint_checking_types.push(args.clone());
        let owner = ConstraintOwner::Type(template.clone());
        let result = self.check_constraints_impl(&args.assembly, &owner, &args.arguments, exports);
        self.session.constraint_checking_types.pop();
        result
    }

    /// Validate argument shape and constraints for a function specialization.
    pub(crate) fn check_function_generic_arguments(
        &mut self,
        template: &FunctionTemplateRc,
        args: &LoadingArguments,
        exports: Option<&mut ConstraintExportList>,
    ) -> Result<bool> {
        if !template
            .generic
            .parameter_count
            .can_match(args.arguments.size_list())
        {
            return Err(Error::InvalidGenericArguments(args.to_string()));
        }
        if self
            .session
            .constraint_checking_functions
            .iter()
            .any(|a| a == args)
        {
            return Err(Error::CircularConstraint);
        }
        self.session.constraint_checking_functions.push(args.clone());
        let owner = ConstraintOwner::Function(template.clone());
        let result = self.check_constraints_impl(&args.assembly, &owner, &args.arguments, exports);
        self.session.constraint_checking_functions.pop();
        result
    }

    /// Evaluate every constraint of a declaration against concrete arguments,
    /// binding exports along the way.
    fn check_constraints_impl(
        &mut self,
        src_assembly: &str,
        owner: &ConstraintOwner,
        args: &MultiList<TypeId>,
        mut exports: Option<&mut ConstraintExportList>,
    ) -> Result<bool> {
        let count = owner.generic().constraints.len();
        for index in 0..count {
            let mut ctx = SolveCtx::new();
            let check_arguments = args.map(|&t| ctx.root.rt(t));
            let check_target = ctx.root.fail();
            let source = ConstraintSource {
                owner: owner.clone(),
                index,
            };
            let cache = self.create_constraint_cache(
                &mut ctx,
                source,
                src_assembly.to_string(),
                check_arguments,
                check_target,
                None,
            )?;
            if !self.check_constraint_cached(&mut ctx, cache)? {
                return Ok(false);
            }
            if let Some(list) = exports.as_deref_mut() {
                self.bind_constraint_exports(&mut ctx, cache, owner, index, list)?;
            }
        }
        Ok(true)
    }
}
