//! Cache construction, trait resolution, unification and the fix-point loop.
//!
//! The overall shape mirrors the loading pipeline's outer structure: build
//! symbolic state once, then iterate. `check_constraint_cached` opens a
//! backtrack point, runs one deterministic pass (`..._single_pass`), and on
//! failure rolls the symbolic state back and advances the overload cursors
//! like a nested counter until either a combination satisfies everything or
//! the candidate space is exhausted.

use crate::{
    metadata::{
        generics::{ConstraintKind, GenericDeclaration, MultiList, RefKind},
        template::TypeTemplateRc,
    },
    runtime::{LoadingArguments, TypeId},
    Error, Result,
};

use super::{
    types::{CacheId, CtId, CtKind},
    CacheNode, ConstraintOwner, ConstraintSource, SolveCtx, TraitFieldInfo, TraitFunctionInfo,
    TraitInfo, TraitOverload,
};
use crate::loader::{
    reflist::{argument_selector, entry_extent, scan_argument_list, RefListContext},
    session::SubtypeKey,
    LoaderCore, TypeSnapshot,
};

/// Outcome of one deduction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deduce {
    /// Something new was determined; run another pass.
    Progress,
    /// Nothing changed.
    NoChange,
    /// The current candidate combination cannot work.
    Fail,
}

/// Outcome of trait member resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Resolved,
    Undetermined,
    Failed,
}

impl LoaderCore {
    /// Build the cache node for one constraint evaluation.
    pub(crate) fn create_constraint_cache(
        &mut self,
        ctx: &mut SolveCtx,
        source: ConstraintSource,
        src_assembly: String,
        check_arguments: MultiList<CtId>,
        check_target: CtId,
        parent: Option<CacheId>,
    ) -> Result<CacheId> {
        ctx.root.cache_count += 1;
        // TODO bound the cache count by the loading limit (low priority)

        let cache_id = ctx.caches.len();
        ctx.caches.push(CacheNode {
            parent,
            source,
            src_assembly,
            check_arguments,
            check_target,
            target: check_target,
            arguments: MultiList::new(),
            children: Vec::new(),
            trait_info: None,
        });

        let owner = ctx.caches[cache_id].source.owner.clone();
        let constraint_index = ctx.caches[cache_id].source.index;
        let target_ref = owner.generic().constraints[constraint_index].target;
        let target = self.construct_constraint_argument_type(ctx, cache_id, target_ref)?;
        ctx.caches[cache_id].target = target;

        // TODO segment support for constraint argument lists
        let argument_refs = owner.generic().constraints[constraint_index].arguments.clone();
        let mut arguments = MultiList::new();
        arguments.new_list();
        for reference in argument_refs {
            let value = self.construct_constraint_argument_type(ctx, cache_id, reference)?;
            arguments.append_last(value);
        }
        ctx.caches[cache_id].arguments = arguments;

        if owner.generic().constraints[constraint_index].kind.is_trait() {
            self.init_trait_constraint_cache(ctx, cache_id)?;
        }
        Ok(cache_id)
    }

    /// Symbolic type for an entry of the constraint's private reference list.
    fn construct_constraint_argument_type(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        index: usize,
    ) -> Result<CtId> {
        let owner = ctx.caches[cache_id].source.owner.clone();
        let constraint_index = ctx.caches[cache_id].source.index;
        let src_assembly = ctx.caches[cache_id].src_assembly.clone();
        let check_target = ctx.caches[cache_id].check_target;
        let check_arguments = ctx.caches[cache_id].check_arguments.clone();
        let constraint = &owner.generic().constraints[constraint_index];
        self.construct_constraint_argument_inner(
            ctx,
            &constraint.type_references,
            &constraint.names,
            &src_assembly,
            &check_arguments,
            check_target,
            index,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn construct_constraint_argument_inner(
        &mut self,
        ctx: &mut SolveCtx,
        list: &[crate::metadata::generics::RefEntry],
        names: &[String],
        src_assembly: &str,
        check_arguments: &MultiList<CtId>,
        check_target: CtId,
        index: usize,
    ) -> Result<CtId> {
        let entry = list
            .get(index)
            .ok_or_else(|| malformed_error!("constraint reference {index} out of range"))?;
        match entry.kind {
            RefKind::Any => Ok(ctx.root.fresh_any()),
            RefKind::Try => {
                let inner = self.construct_constraint_argument_inner(
                    ctx,
                    list,
                    names,
                    src_assembly,
                    check_arguments,
                    check_target,
                    entry.index,
                )?;
                Ok(ctx.root.try_wrap(inner))
            }
            RefKind::Clone => {
                // TODO detect circular Clone chains on this path
                self.construct_constraint_argument_inner(
                    ctx,
                    list,
                    names,
                    src_assembly,
                    check_arguments,
                    check_target,
                    entry.index,
                )
            }
            RefKind::Argument => {
                let (segment, arg_index) = argument_selector(list, index, 0);
                check_arguments
                    .get(segment, arg_index)
                    .copied()
                    .ok_or_else(|| {
                        Error::InvalidConstraint(format!(
                            "argument {arg_index} of segment {segment} out of range"
                        ))
                    })
            }
            RefKind::SelfType => {
                if matches!(ctx.root.kind(check_target), CtKind::Fail) {
                    return Err(Error::InvalidConstraint(
                        "SelfType outside a trait".to_string(),
                    ));
                }
                Ok(check_target)
            }
            RefKind::Assembly => {
                let node = ctx.root.generic(src_assembly.to_string(), entry.index);
                let args = self.construct_argument_list(
                    ctx,
                    list,
                    names,
                    src_assembly,
                    check_arguments,
                    check_target,
                    index + 1,
                )?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            RefKind::Import => {
                let a = self.assemblies.find_or_err(src_assembly)?;
                let import = a.import_types.get(entry.index).ok_or_else(|| {
                    Error::InvalidTypeReference(format!("import {} out of range", entry.index))
                })?;
                let resolved = self.assemblies.resolve_export_type(import)?.ok_or_else(|| {
                    Error::LinkageFailure(format!(
                        "import type not found - {}::{}",
                        import.assembly, import.name
                    ))
                })?;
                let node = ctx.root.generic(resolved.assembly, resolved.id);
                let args = self.construct_argument_list(
                    ctx,
                    list,
                    names,
                    src_assembly,
                    check_arguments,
                    check_target,
                    index + 1,
                )?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            RefKind::Subtype => {
                let name = names.get(entry.index).cloned().ok_or_else(|| {
                    malformed_error!("subtype name {} out of range", entry.index)
                })?;
                let parent = self.construct_constraint_argument_inner(
                    ctx,
                    list,
                    names,
                    src_assembly,
                    check_arguments,
                    check_target,
                    index + 1,
                )?;
                let node = ctx.root.subtype(name, parent);
                let parent_end = entry_extent(list, index + 1)?;
                let args = self.construct_argument_list(
                    ctx,
                    list,
                    names,
                    src_assembly,
                    check_arguments,
                    check_target,
                    parent_end,
                )?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            _ => Err(Error::InvalidTypeReference(format!(
                "unexpected {} entry in a constraint",
                entry.kind
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn construct_argument_list(
        &mut self,
        ctx: &mut SolveCtx,
        list: &[crate::metadata::generics::RefEntry],
        names: &[String],
        src_assembly: &str,
        check_arguments: &MultiList<CtId>,
        check_target: CtId,
        start: usize,
    ) -> Result<MultiList<CtId>> {
        let scanned = scan_argument_list(list, start)?;
        let mut args = MultiList::new();
        for positions in &scanned.segments {
            args.new_list();
            for &pos in positions {
                let value = self.construct_constraint_argument_inner(
                    ctx,
                    list,
                    names,
                    src_assembly,
                    check_arguments,
                    check_target,
                    pos,
                )?;
                args.append_last(value);
            }
        }
        Ok(args)
    }

    /// Resolve the trait template a trait constraint names.
    fn init_trait_constraint_cache(&mut self, ctx: &mut SolveCtx, cache_id: CacheId) -> Result<()> {
        let (kind, trait_index) = {
            let constraint = ctx.caches[cache_id].source.constraint();
            (constraint.kind, constraint.index)
        };
        let src_assembly = ctx.caches[cache_id].src_assembly.clone();
        let (template, assembly) = match kind {
            ConstraintKind::TraitLocal => {
                let a = self.assemblies.find_or_err(&src_assembly)?;
                let template = a.traits.get(trait_index).cloned().ok_or_else(|| {
                    Error::InvalidConstraint(format!("invalid trait reference {trait_index}"))
                })?;
                (template, src_assembly)
            }
            ConstraintKind::TraitImport => {
                let a = self.assemblies.find_or_err(&src_assembly)?;
                let import = a.import_traits.get(trait_index).ok_or_else(|| {
                    Error::InvalidConstraint(format!("invalid trait reference {trait_index}"))
                })?;
                let resolved = self.assemblies.resolve_export_trait(import)?.ok_or_else(|| {
                    Error::LinkageFailure(format!(
                        "import trait not found - {}::{}",
                        import.assembly, import.name
                    ))
                })?;
                let template = self.assemblies.trait_template(&resolved.assembly, resolved.id)?;
                (template, resolved.assembly)
            }
            _ => {
                return Err(Error::Assertion(
                    "trait cache init on a non-trait constraint".to_string(),
                ))
            }
        };
        // Member caches are created lazily; most failures happen elsewhere first.
        ctx.caches[cache_id].trait_info = Some(TraitInfo {
            template,
            assembly,
            cache_created: false,
            member_resolved: false,
            fields: Vec::new(),
            functions: Vec::new(),
            undetermined: Vec::new(),
        });
        Ok(())
    }

    /// Create child caches and declared member types for a trait constraint.
    fn ensure_sub_constraint_cached(&mut self, ctx: &mut SolveCtx, cache_id: CacheId) -> Result<()> {
        let (template, trait_assembly, created) = {
            let info = ctx.caches[cache_id]
                .trait_info
                .as_ref()
                .ok_or_else(|| Error::Assertion("trait cache not initialized".to_string()))?;
            (info.template.clone(), info.assembly.clone(), info.cache_created)
        };
        if created {
            return Ok(());
        }
        let arguments = ctx.caches[cache_id].arguments.clone();
        let target = ctx.caches[cache_id].target;

        if !template
            .generic
            .parameter_count
            .can_match(arguments.size_list())
        {
            return Err(Error::InvalidGenericArguments(
                "trait argument shape".to_string(),
            ));
        }

        for index in 0..template.generic.constraints.len() {
            let source = ConstraintSource {
                owner: ConstraintOwner::Trait(template.clone()),
                index,
            };
            let child = self.create_constraint_cache(
                ctx,
                source,
                trait_assembly.clone(),
                arguments.clone(),
                target,
                Some(cache_id),
            )?;
            ctx.caches[cache_id].children.push(child);

            // Only trait-trait loops need checking here; trait-type and
            // trait-function loops end up in the type or function cycle
            // detectors instead.
            let mut ancestor = Some(cache_id);
            while let Some(a) = ancestor {
                if self.are_constraints_equal(ctx, a, child)? {
                    return Err(Error::CircularConstraint);
                }
                ancestor = ctx.caches[a].parent;
            }
        }

        let mut fields = Vec::with_capacity(template.fields.len());
        for field in &template.fields {
            let declared = self.construct_constraint_trait_type(ctx, cache_id, field.field_type)?;
            let placeholder = ctx.root.fail();
            fields.push(TraitFieldInfo {
                declared,
                in_target: placeholder,
                field_index: usize::MAX,
            });
        }
        let mut functions = Vec::with_capacity(template.functions.len());
        for function in &template.functions {
            let declared_return =
                self.construct_constraint_trait_type(ctx, cache_id, function.return_type)?;
            let mut declared_parameters = Vec::with_capacity(function.parameter_types.len());
            for &parameter in &function.parameter_types {
                declared_parameters
                    .push(self.construct_constraint_trait_type(ctx, cache_id, parameter)?);
            }
            functions.push(TraitFunctionInfo {
                overloads: Vec::new(),
                current: 0,
                declared_return,
                declared_parameters,
            });
        }

        let info = ctx.caches[cache_id].trait_info.as_mut().unwrap();
        info.fields = fields;
        info.functions = functions;
        info.member_resolved = false;
        info.cache_created = true;
        Ok(())
    }

    /// Structural equality of two cache nodes (same constraint, equal
    /// arguments after simplification).
    fn are_constraints_equal(
        &mut self,
        ctx: &mut SolveCtx,
        a: CacheId,
        b: CacheId,
    ) -> Result<bool> {
        if !ctx.caches[a].source.same_as(&ctx.caches[b].source) {
            return Ok(false);
        }
        let args_a = ctx.caches[a].check_arguments.clone();
        let args_b = ctx.caches[b].check_arguments.clone();
        if args_a.size_list() != args_b.size_list() {
            return Ok(false);
        }
        for (&x, &y) in args_a.iter().zip(args_b.iter()) {
            if !self.are_constraint_types_equal(ctx, x, y)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Structural equality of two symbolic types.
    fn are_constraint_types_equal(
        &mut self,
        ctx: &mut SolveCtx,
        a: CtId,
        b: CtId,
    ) -> Result<bool> {
        self.ct_simplify(ctx, a)?;
        self.ct_simplify(ctx, b)?;

        // Different shapes may still denote the same determined type, but a
        // circular evaluation stack repeats the exact same shape, which is
        // all this comparison needs to recognize.
        let (kind_a, kind_b) = (ctx.root.kind(a).clone(), ctx.root.kind(b).clone());
        match (&kind_a, &kind_b) {
            (CtKind::Empty, CtKind::Empty) | (CtKind::Fail, CtKind::Fail) => return Ok(true),
            (CtKind::Any(x), CtKind::Any(y)) => return Ok(x == y),
            (CtKind::Rt(x), CtKind::Rt(y)) => return Ok(x == y),
            (
                CtKind::Generic { assembly: aa, template: ta },
                CtKind::Generic { assembly: ab, template: tb },
            ) => {
                if aa != ab || ta != tb {
                    return Ok(false);
                }
            }
            (CtKind::Subtype { name: na }, CtKind::Subtype { name: nb }) => {
                if na != nb {
                    return Ok(false);
                }
                let (pa, pb) = (ctx.root.parent(a), ctx.root.parent(b));
                match (pa, pb) {
                    (Some(pa), Some(pb)) => {
                        if !self.are_constraint_types_equal(ctx, pa, pb)? {
                            return Ok(false);
                        }
                    }
                    _ => return Ok(false),
                }
            }
            _ => return Ok(false),
        }

        let args_a = ctx.root.args(a).clone();
        let args_b = ctx.root.args(b).clone();
        if args_a.size_list() != args_b.size_list() {
            return Ok(false);
        }
        for (&x, &y) in args_a.iter().zip(args_b.iter()) {
            if !self.are_constraint_types_equal(ctx, x, y)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Symbolic type for an entry of the trait's own Types list.
    pub(crate) fn construct_constraint_trait_type(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        index: usize,
    ) -> Result<CtId> {
        let (template, assembly) = {
            let info = ctx.caches[cache_id]
                .trait_info
                .as_ref()
                .ok_or_else(|| Error::Assertion("trait cache not initialized".to_string()))?;
            (info.template.clone(), info.assembly.clone())
        };
        let arguments = ctx.caches[cache_id].arguments.clone();
        let target = ctx.caches[cache_id].target;
        self.construct_trait_type_inner(ctx, &template.generic, &assembly, &arguments, target, index)
    }

    fn construct_trait_type_inner(
        &mut self,
        ctx: &mut SolveCtx,
        generic: &GenericDeclaration,
        assembly: &str,
        arguments: &MultiList<CtId>,
        target: CtId,
        index: usize,
    ) -> Result<CtId> {
        let list = &generic.types;
        let entry = list
            .get(index)
            .ok_or_else(|| Error::InvalidTypeReference(format!("entry {index} out of range")))?;
        match entry.kind {
            RefKind::Clone => {
                // TODO detect circular Clone chains on this path
                self.construct_trait_type_inner(ctx, generic, assembly, arguments, target, entry.index)
            }
            RefKind::Argument => {
                let (segment, arg_index) = argument_selector(list, index, 0);
                arguments.get(segment, arg_index).copied().ok_or_else(|| {
                    Error::InvalidTypeReference(format!(
                        "argument {arg_index} of segment {segment} out of range"
                    ))
                })
            }
            RefKind::SelfType => Ok(target),
            RefKind::Empty => Ok(ctx.root.empty()),
            RefKind::Assembly => {
                let node = ctx.root.generic(assembly.to_string(), entry.index);
                let args =
                    self.construct_trait_argument_list(ctx, generic, assembly, arguments, target, index + 1)?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            RefKind::Import => {
                let a = self.assemblies.find_or_err(assembly)?;
                let import = a.import_types.get(entry.index).ok_or_else(|| {
                    Error::InvalidTypeReference(format!("import {} out of range", entry.index))
                })?;
                let resolved = self.assemblies.resolve_export_type(import)?.ok_or_else(|| {
                    Error::LinkageFailure(format!(
                        "import type not found - {}::{}",
                        import.assembly, import.name
                    ))
                })?;
                let node = ctx.root.generic(resolved.assembly, resolved.id);
                let args =
                    self.construct_trait_argument_list(ctx, generic, assembly, arguments, target, index + 1)?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            RefKind::Subtype => {
                let name = generic.names.get(entry.index).cloned().ok_or_else(|| {
                    malformed_error!("subtype name {} out of range", entry.index)
                })?;
                let parent =
                    self.construct_trait_type_inner(ctx, generic, assembly, arguments, target, index + 1)?;
                let node = ctx.root.subtype(name, parent);
                let parent_end = entry_extent(list, index + 1)?;
                let args =
                    self.construct_trait_argument_list(ctx, generic, assembly, arguments, target, parent_end)?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            _ => Err(Error::InvalidTypeReference(format!(
                "unexpected {} entry in a trait type position",
                entry.kind
            ))),
        }
    }

    fn construct_trait_argument_list(
        &mut self,
        ctx: &mut SolveCtx,
        generic: &GenericDeclaration,
        assembly: &str,
        arguments: &MultiList<CtId>,
        target: CtId,
        start: usize,
    ) -> Result<MultiList<CtId>> {
        let scanned = scan_argument_list(&generic.types, start)?;
        let mut args = MultiList::new();
        for positions in &scanned.segments {
            args.new_list();
            for &pos in positions {
                let value =
                    self.construct_trait_type_inner(ctx, generic, assembly, arguments, target, pos)?;
                args.append_last(value);
            }
        }
        Ok(args)
    }

    /// Resolve the trait's members against the (now determined) target.
    fn try_calculate_trait_sub_member(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
    ) -> Result<Resolution> {
        let template = {
            let info = ctx.caches[cache_id]
                .trait_info
                .as_ref()
                .ok_or_else(|| Error::Assertion("trait cache not initialized".to_string()))?;
            if info.member_resolved {
                return Ok(Resolution::Resolved);
            }
            info.template.clone()
        };

        let target = ctx.caches[cache_id].target;
        self.ct_simplify(ctx, target)?;
        let Some(target_id) = ctx.root.rt_of(target) else {
            return Ok(Resolution::Undetermined);
        };
        let target_snap = self.type_snapshot_or_err(target_id)?;
        let target_template = self.find_type_template(&target_snap.args)?;

        for i in 0..template.fields.len() {
            let required = &template.fields[i];
            let Some(public) = target_template
                .public_fields
                .iter()
                .find(|p| p.name == required.element_name)
            else {
                return Ok(Resolution::Failed);
            };
            let ordinal = public.id;
            let in_target = if target_snap.fields.is_empty() {
                // Layout may not exist yet (reference targets); evaluate the
                // template slot in the target's own context instead. The
                // target has passed its own constraint check, so a failure
                // here is a program error, not a constraint violation.
                let slot = *target_template.fields.get(ordinal).ok_or_else(|| {
                    Error::InvalidFieldReference(format!("field {ordinal} out of range"))
                })?;
                let loaded = {
                    let target_ctx =
                        RefListContext::for_snapshot(&target_snap, &target_template.generic);
                    self.load_ref_type(&target_ctx, slot)?
                };
                let loaded = loaded.ok_or_else(|| {
                    Error::InvalidFieldReference(format!("void field {ordinal}"))
                })?;
                ctx.root.rt(loaded)
            } else {
                let info = target_snap.fields.get(ordinal).ok_or_else(|| {
                    Error::InvalidFieldReference(format!("field {ordinal} out of range"))
                })?;
                ctx.root.rt(info.field_type)
            };
            let info = ctx.caches[cache_id].trait_info.as_mut().unwrap();
            info.fields[i].field_index = ordinal;
            info.fields[i].in_target = in_target;
        }

        for i in 0..template.functions.len() {
            let name = template.functions[i].element_name.clone();
            let mut candidates: Vec<usize> = Vec::new();
            for public in &target_template.public_functions {
                if public.name == name {
                    candidates.push(public.id);
                }
            }
            // Base and interface matches bind to the virtual slot, not the
            // concrete implementation.
            for slot in &target_template.base.virtual_functions {
                if slot.name == name {
                    candidates.push(slot.virtual_function);
                }
            }
            for relation in &target_template.interfaces {
                for slot in &relation.virtual_functions {
                    if slot.name == name {
                        candidates.push(slot.virtual_function);
                    }
                }
            }

            let mut overloads = Vec::new();
            let mut undetermined = Vec::new();
            for candidate in candidates {
                let mut fresh = Vec::new();
                if let Some(overload) = self.build_trait_overload(
                    ctx,
                    cache_id,
                    i,
                    &target_template,
                    &target_snap,
                    candidate,
                    &mut fresh,
                )? {
                    overloads.push(overload);
                    undetermined.extend(fresh);
                }
            }
            if overloads.is_empty() {
                return Ok(Resolution::Failed);
            }
            let info = ctx.caches[cache_id].trait_info.as_mut().unwrap();
            info.functions[i].overloads = overloads;
            info.undetermined.extend(undetermined);
        }

        ctx.caches[cache_id].trait_info.as_mut().unwrap().member_resolved = true;
        Ok(Resolution::Resolved)
    }

    /// Build the symbolic signature of one overload candidate and run the
    /// quick possibly-equal filter against the trait's declared signature.
    #[allow(clippy::too_many_arguments)]
    fn build_trait_overload(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        function_index: usize,
        target_template: &TypeTemplateRc,
        target: &TypeSnapshot,
        candidate: usize,
        fresh_variables: &mut Vec<CtId>,
    ) -> Result<Option<TraitOverload>> {
        let generic = &target_template.generic;

        let mut id = candidate;
        loop {
            let entry = generic.functions.get(id).ok_or_else(|| {
                Error::InvalidFunctionReference(format!("entry {id} out of range"))
            })?;
            if entry.kind != RefKind::Clone {
                break;
            }
            // TODO detect circular Clone chains on this path
            id = entry.index;
        }

        let head = generic.functions[id];
        let (function_assembly, function_id) = match head.kind {
            RefKind::Assembly => (target.args.assembly.clone(), head.index),
            RefKind::Import => {
                let a = self.assemblies.find_or_err(&target.args.assembly)?;
                let import = a.import_functions.get(head.index).ok_or_else(|| {
                    Error::InvalidFunctionReference(format!("import {} out of range", head.index))
                })?;
                let resolved = self
                    .assemblies
                    .resolve_export_function(import)?
                    .ok_or_else(|| {
                        Error::LinkageFailure(format!(
                            "import function not found - {}::{}",
                            import.assembly, import.name
                        ))
                    })?;
                (resolved.assembly, resolved.id)
            }
            _ => {
                return Err(Error::InvalidFunctionReference(format!(
                    "unexpected {} entry in a function position",
                    head.kind
                )))
            }
        };

        // The candidate's argument list is the reference's own list plus
        // fresh variables for every segment beyond the target's.
        let additional = self.function_additional_arguments(generic, id)?;
        let target_sizes = target.args.arguments.size_list().to_vec();
        for (segment, &needed) in additional.iter().enumerate().take(target_sizes.len()) {
            if needed > target_sizes[segment] {
                return Err(Error::InvalidGenericArguments(format!(
                    "function reference consumes {needed} arguments of segment {segment}"
                )));
            }
        }
        let mut type_args: MultiList<CtId> = target.args.arguments.map(|&t| ctx.root.rt(t));
        for segment in target_sizes.len()..additional.len() {
            type_args.new_list();
            for _ in 0..additional[segment] {
                let variable = ctx.root.fresh_any();
                type_args.append_last(variable);
                fresh_variables.push(variable);
            }
        }

        let scanned = scan_argument_list(&generic.functions, id + 1)?;
        let mut function_args = MultiList::new();
        for positions in &scanned.segments {
            function_args.new_list();
            for &pos in positions {
                let entry = generic.functions[pos];
                if entry.kind != RefKind::CloneType {
                    return Err(Error::InvalidFunctionReference(format!(
                        "generic function argument must be CloneType, found {}",
                        entry.kind
                    )));
                }
                let value = self.construct_reflist_type(
                    ctx,
                    generic,
                    &target.args.assembly,
                    entry.index,
                    &type_args,
                    Some(target.id),
                )?;
                function_args.append_last(value);
            }
        }

        let function_template = self
            .assemblies
            .function_template(&function_assembly, function_id)?;
        let return_type = self.construct_reflist_type(
            ctx,
            &function_template.generic,
            &function_assembly,
            function_template.return_type,
            &function_args,
            None,
        )?;
        let mut parameters = Vec::with_capacity(function_template.parameters.len());
        for &parameter in &function_template.parameters {
            parameters.push(self.construct_reflist_type(
                ctx,
                &function_template.generic,
                &function_assembly,
                parameter,
                &function_args,
                None,
            )?);
        }

        let (declared_return, declared_parameters) = {
            let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
            (
                info.functions[function_index].declared_return,
                info.functions[function_index].declared_parameters.clone(),
            )
        };
        // TODO handle parameter packs in trait function requirements
        if parameters.len() != declared_parameters.len() {
            return Ok(None);
        }
        if !self.check_type_possibly_equal(ctx, return_type, declared_return)? {
            return Ok(None);
        }
        for (&have, &want) in parameters.iter().zip(&declared_parameters) {
            if !self.check_type_possibly_equal(ctx, have, want)? {
                return Ok(None);
            }
        }

        Ok(Some(TraitOverload {
            index: candidate,
            return_type,
            parameters,
        }))
    }

    /// Symbolic type for an entry of an arbitrary declaration's Types list,
    /// with explicit symbolic arguments and self substitution.
    fn construct_reflist_type(
        &mut self,
        ctx: &mut SolveCtx,
        generic: &GenericDeclaration,
        src_assembly: &str,
        index: usize,
        arguments: &MultiList<CtId>,
        self_type: Option<TypeId>,
    ) -> Result<CtId> {
        let list = &generic.types;
        let mut idx = index;
        loop {
            let entry = list
                .get(idx)
                .ok_or_else(|| Error::InvalidTypeReference(format!("entry {idx} out of range")))?;
            if entry.kind != RefKind::Clone {
                break;
            }
            // TODO detect circular Clone chains on this path
            idx = entry.index;
        }

        let entry = list[idx];
        match entry.kind {
            RefKind::Empty => Ok(ctx.root.empty()),
            RefKind::Argument => {
                let (segment, arg_index) = argument_selector(list, idx, 0);
                arguments.get(segment, arg_index).copied().ok_or_else(|| {
                    Error::InvalidTypeReference(format!(
                        "argument {arg_index} of segment {segment} out of range"
                    ))
                })
            }
            RefKind::SelfType => match self_type {
                Some(ty) => Ok(ctx.root.rt(ty)),
                None => Ok(ctx.root.fail()),
            },
            RefKind::Assembly => {
                let node = ctx.root.generic(src_assembly.to_string(), entry.index);
                let args = self.construct_reflist_argument_list(
                    ctx, generic, src_assembly, idx + 1, arguments, self_type,
                )?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            RefKind::Import => {
                let a = self.assemblies.find_or_err(src_assembly)?;
                let import = a.import_types.get(entry.index).ok_or_else(|| {
                    Error::InvalidTypeReference(format!("import {} out of range", entry.index))
                })?;
                let resolved = self.assemblies.resolve_export_type(import)?.ok_or_else(|| {
                    Error::LinkageFailure(format!(
                        "import type not found - {}::{}",
                        import.assembly, import.name
                    ))
                })?;
                let node = ctx.root.generic(resolved.assembly, resolved.id);
                let args = self.construct_reflist_argument_list(
                    ctx, generic, src_assembly, idx + 1, arguments, self_type,
                )?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            RefKind::Subtype => {
                let name = generic.names.get(entry.index).cloned().ok_or_else(|| {
                    malformed_error!("subtype name {} out of range", entry.index)
                })?;
                let parent = self.construct_reflist_type(
                    ctx, generic, src_assembly, idx + 1, arguments, self_type,
                )?;
                let node = ctx.root.subtype(name, parent);
                let parent_end = entry_extent(list, idx + 1)?;
                let args = self.construct_reflist_argument_list(
                    ctx, generic, src_assembly, parent_end, arguments, self_type,
                )?;
                ctx.root.set_args(node, args);
                Ok(node)
            }
            _ => Err(Error::InvalidTypeReference(format!(
                "unexpected {} entry in a type position",
                entry.kind
            ))),
        }
    }

    fn construct_reflist_argument_list(
        &mut self,
        ctx: &mut SolveCtx,
        generic: &GenericDeclaration,
        src_assembly: &str,
        start: usize,
        arguments: &MultiList<CtId>,
        self_type: Option<TypeId>,
    ) -> Result<MultiList<CtId>> {
        let scanned = scan_argument_list(&generic.types, start)?;
        let mut args = MultiList::new();
        for positions in &scanned.segments {
            args.new_list();
            for &pos in positions {
                let value = self.construct_reflist_type(
                    ctx, generic, src_assembly, pos, arguments, self_type,
                )?;
                args.append_last(value);
            }
        }
        Ok(args)
    }

    /// Cheap filter: could the two symbolic types ever denote the same
    /// runtime type? Never simplifies, never binds.
    fn check_type_possibly_equal(
        &mut self,
        ctx: &mut SolveCtx,
        a: CtId,
        b: CtId,
    ) -> Result<bool> {
        let (kind_a, kind_b) = (ctx.root.kind(a).clone(), ctx.root.kind(b).clone());
        if matches!(kind_a, CtKind::Fail) || matches!(kind_b, CtKind::Fail) {
            return Ok(false);
        }
        if matches!(kind_a, CtKind::Empty) || matches!(kind_b, CtKind::Empty) {
            return Ok(matches!(kind_a, CtKind::Empty) && matches!(kind_b, CtKind::Empty));
        }
        if matches!(kind_a, CtKind::Any(_)) || matches!(kind_b, CtKind::Any(_)) {
            return Ok(true);
        }
        if matches!(kind_a, CtKind::Subtype { .. }) || matches!(kind_b, CtKind::Subtype { .. }) {
            return Ok(true);
        }
        match (&kind_a, &kind_b) {
            (CtKind::Rt(x), CtKind::Rt(y)) => Ok(x == y),
            (
                CtKind::Generic { assembly: aa, template: ta },
                CtKind::Generic { assembly: ab, template: tb },
            ) => {
                let args_a = ctx.root.args(a).clone();
                let args_b = ctx.root.args(b).clone();
                // TODO support variable-size segment matching
                if aa != ab || ta != tb || args_a.size_list() != args_b.size_list() {
                    return Ok(false);
                }
                for (&x, &y) in args_a.iter().zip(args_b.iter()) {
                    if !self.check_type_possibly_equal(ctx, x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (CtKind::Rt(x), CtKind::Generic { assembly, template }) => {
                let snap = self.type_snapshot_or_err(*x)?;
                // TODO support variable-size segment matching
                if snap.args.assembly != *assembly
                    || snap.args.id != *template
                    || snap.args.arguments.size_list() != ctx.root.args(b).size_list()
                {
                    return Ok(false);
                }
                let rt_args: Vec<TypeId> = snap.args.arguments.iter().copied().collect();
                let sym_args: Vec<CtId> = ctx.root.args(b).iter().copied().collect();
                for (rt_arg, sym) in rt_args.into_iter().zip(sym_args) {
                    let node = ctx.root.rt(rt_arg);
                    if !self.check_type_possibly_equal(ctx, sym, node)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (CtKind::Generic { .. }, CtKind::Rt(_)) => self.check_type_possibly_equal(ctx, b, a),
            _ => Ok(false),
        }
    }

    /// Unification step: determine variables that two symbolic types force
    /// to be equal, or detect that equality is impossible.
    fn try_determine_equal_types(
        &mut self,
        ctx: &mut SolveCtx,
        a: CtId,
        b: CtId,
    ) -> Result<Deduce> {
        self.ct_simplify(ctx, a)?;
        self.ct_simplify(ctx, b)?;

        let (kind_a, kind_b) = (ctx.root.kind(a).clone(), ctx.root.kind(b).clone());
        // Variables never bind to void.
        if matches!(kind_a, CtKind::Empty) || matches!(kind_b, CtKind::Empty) {
            return Ok(Deduce::NoChange);
        }
        if matches!(kind_a, CtKind::Fail) || matches!(kind_b, CtKind::Fail) {
            return Ok(Deduce::Fail);
        }
        match (&kind_a, &kind_b) {
            (CtKind::Rt(x), CtKind::Any(v)) => {
                ctx.root.determine_var(*v, *x);
                return Ok(Deduce::Progress);
            }
            (CtKind::Any(v), CtKind::Rt(x)) => {
                ctx.root.determine_var(*v, *x);
                return Ok(Deduce::Progress);
            }
            (CtKind::Any(_), _) | (_, CtKind::Any(_)) => return Ok(Deduce::NoChange),
            _ => {}
        }
        if matches!(kind_a, CtKind::Subtype { .. }) || matches!(kind_b, CtKind::Subtype { .. }) {
            return Ok(Deduce::NoChange);
        }
        match (&kind_a, &kind_b) {
            (CtKind::Rt(x), CtKind::Rt(y)) => {
                if x != y {
                    Ok(Deduce::Fail)
                } else {
                    Ok(Deduce::NoChange)
                }
            }
            (
                CtKind::Generic { assembly: aa, template: ta },
                CtKind::Generic { assembly: ab, template: tb },
            ) => {
                let args_a = ctx.root.args(a).clone();
                let args_b = ctx.root.args(b).clone();
                // TODO support variable-size segment matching
                if aa != ab || ta != tb || args_a.size_list() != args_b.size_list() {
                    return Ok(Deduce::Fail);
                }
                for (&x, &y) in args_a.iter().zip(args_b.iter()) {
                    let result = self.try_determine_equal_types(ctx, x, y)?;
                    if result != Deduce::NoChange {
                        return Ok(result);
                    }
                }
                Ok(Deduce::NoChange)
            }
            (CtKind::Rt(x), CtKind::Generic { assembly, template }) => {
                let snap = self.type_snapshot_or_err(*x)?;
                // TODO support variable-size segment matching
                if snap.args.assembly != *assembly
                    || snap.args.id != *template
                    || snap.args.arguments.size_list() != ctx.root.args(b).size_list()
                {
                    return Ok(Deduce::Fail);
                }
                let rt_args: Vec<TypeId> = snap.args.arguments.iter().copied().collect();
                let sym_args: Vec<CtId> = ctx.root.args(b).iter().copied().collect();
                for (rt_arg, sym) in rt_args.into_iter().zip(sym_args) {
                    let node = ctx.root.rt(rt_arg);
                    let result = self.try_determine_equal_types(ctx, sym, node)?;
                    if result != Deduce::NoChange {
                        return Ok(result);
                    }
                }
                Ok(Deduce::NoChange)
            }
            (CtKind::Generic { .. }, CtKind::Rt(_)) => self.try_determine_equal_types(ctx, b, a),
            _ => Ok(Deduce::NoChange),
        }
    }

    /// One deduction step over a cache node, dispatched on constraint kind.
    fn try_determine_constraint_argument(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
    ) -> Result<Deduce> {
        let kind = ctx.caches[cache_id].source.constraint().kind;
        match kind {
            ConstraintKind::Exist | ConstraintKind::Base | ConstraintKind::Interface => {
                Ok(Deduce::NoChange)
            }
            ConstraintKind::Same => {
                if !ctx.caches[cache_id].arguments.is_single() {
                    return Err(Error::InvalidConstraint(
                        "Same takes exactly one argument".to_string(),
                    ));
                }
                let argument = *ctx.caches[cache_id].arguments.get(0, 0).unwrap();
                let target = ctx.caches[cache_id].target;
                self.try_determine_equal_types(ctx, argument, target)
            }
            ConstraintKind::TraitLocal | ConstraintKind::TraitImport => {
                self.ensure_sub_constraint_cached(ctx, cache_id)?;
                match self.try_calculate_trait_sub_member(ctx, cache_id)? {
                    Resolution::Failed => return Ok(Deduce::Fail),
                    Resolution::Undetermined => return Ok(Deduce::NoChange),
                    Resolution::Resolved => {}
                }

                // Sub-constraint caches exist but are not used for deduction:
                // linked traits with fresh variables can build an infinite,
                // non-circular constraint chain. Leaving those variables
                // undetermined fails the check at this level instead.

                let field_pairs: Vec<(CtId, CtId)> = {
                    let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
                    info.fields.iter().map(|f| (f.in_target, f.declared)).collect()
                };
                for (in_target, declared) in field_pairs {
                    let result = self.try_determine_equal_types(ctx, in_target, declared)?;
                    if result != Deduce::NoChange {
                        return Ok(result);
                    }
                }

                // Choosing overloads is a search; deterministic deduction can
                // only use functions with a single candidate. The rest apply
                // their current cursor and rely on backtracking.
                let function_count = {
                    let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
                    info.functions.len()
                };
                for i in 0..function_count {
                    let overload_count = {
                        let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
                        info.functions[i].overloads.len()
                    };
                    if overload_count == 0 {
                        return Ok(Deduce::Fail);
                    }
                    if overload_count == 1 {
                        let result = self.try_determine_equal_overload(ctx, cache_id, i, 0)?;
                        if result != Deduce::NoChange {
                            return Ok(result);
                        }
                    }
                }
                for i in 0..function_count {
                    let (overload_count, current) = {
                        let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
                        (info.functions[i].overloads.len(), info.functions[i].current)
                    };
                    if overload_count <= 1 {
                        continue;
                    }
                    let result = self.try_determine_equal_overload(ctx, cache_id, i, current)?;
                    if result != Deduce::NoChange {
                        return Ok(result);
                    }
                }
                Ok(Deduce::NoChange)
            }
        }
    }

    fn try_determine_equal_overload(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        function_index: usize,
        overload_index: usize,
    ) -> Result<Deduce> {
        let (declared_return, declared_parameters, overload_return, overload_parameters) = {
            let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
            let function = &info.functions[function_index];
            let overload = &function.overloads[overload_index];
            (
                function.declared_return,
                function.declared_parameters.clone(),
                overload.return_type,
                overload.parameters.clone(),
            )
        };

        let result = self.try_determine_equal_types(ctx, declared_return, overload_return)?;
        if result != Deduce::NoChange {
            return Ok(result);
        }
        debug_assert_eq!(declared_parameters.len(), overload_parameters.len());
        for (&declared, &have) in declared_parameters.iter().zip(&overload_parameters) {
            let result = self.try_determine_equal_types(ctx, declared, have)?;
            if result != Deduce::NoChange {
                return Ok(result);
            }
        }
        Ok(Deduce::NoChange)
    }

    /// Whether anything reachable from the cache is still undetermined.
    fn check_cache_contains_undetermined(&self, ctx: &SolveCtx, cache_id: CacheId) -> bool {
        let cache = &ctx.caches[cache_id];
        if cache.arguments.iter().any(|&a| ctx.root.is_undetermined(a)) {
            return true;
        }
        if let Some(info) = &cache.trait_info {
            if info.undetermined.iter().any(|&a| ctx.root.is_undetermined(a)) {
                return true;
            }
        }
        ctx.root.is_undetermined(cache.target)
    }

    /// Collapse a symbolic type to a determined one where possible, loading
    /// real specializations along the way.
    pub(crate) fn ct_simplify(&mut self, ctx: &mut SolveCtx, id: CtId) -> Result<()> {
        match ctx.root.kind(id).clone() {
            CtKind::Rt(_) | CtKind::Empty | CtKind::Fail => Ok(()),
            CtKind::Any(var) => {
                if let Some(determined) = ctx.root.determined_value(var) {
                    ctx.root.deduct_rt(id, determined);
                }
                Ok(())
            }
            CtKind::Generic { assembly, template } => {
                let Some(arguments) = self.simplify_argument_list(ctx, id)? else {
                    return Ok(());
                };
                let args = LoadingArguments::with_arguments(assembly, template, arguments);
                if ctx.root.is_try(id) {
                    let tt = self.find_type_template(&args)?;
                    if !self.check_type_generic_arguments(&tt, &args, None)? {
                        ctx.root.deduct_fail(id);
                        return Ok(());
                    }
                }
                let loaded = self.load_type_internal(args)?;
                ctx.root.deduct_rt(id, loaded);
                Ok(())
            }
            CtKind::Subtype { name } => {
                let parent = ctx.root.parent(id).ok_or_else(|| {
                    Error::Assertion("subtype node without parent".to_string())
                })?;
                self.ct_simplify(ctx, parent)?;
                let parent_rt = match ctx.root.kind(parent) {
                    CtKind::Rt(ty) => *ty,
                    CtKind::Fail => {
                        ctx.root.deduct_fail(id);
                        return Ok(());
                    }
                    _ => return Ok(()),
                };
                let Some(arguments) = self.simplify_argument_list(ctx, id)? else {
                    return Ok(());
                };
                let key = SubtypeKey {
                    parent: parent_rt,
                    name,
                    arguments,
                };
                let Some(args) = self.find_sub_type(&key)? else {
                    if ctx.root.is_try(id) {
                        ctx.root.deduct_fail(id);
                        return Ok(());
                    }
                    return Err(Error::InvalidTypeReference(format!(
                        "subtype {} not found on {}",
                        key.name, key.parent
                    )));
                };
                if ctx.root.is_try(id) {
                    let tt = self.find_type_template(&args)?;
                    if !self.check_type_generic_arguments(&tt, &args, None)? {
                        ctx.root.deduct_fail(id);
                        return Ok(());
                    }
                }
                let loaded = self.load_type_internal(args)?;
                ctx.root.deduct_rt(id, loaded);
                Ok(())
            }
        }
    }

    /// Simplify every argument of a constructor node; `None` when some
    /// argument is not determined yet (the node may have been deduced to
    /// failure along the way).
    fn simplify_argument_list(
        &mut self,
        ctx: &mut SolveCtx,
        id: CtId,
    ) -> Result<Option<MultiList<TypeId>>> {
        let arg_ids = ctx.root.args(id).clone();
        let mut determined = Vec::with_capacity(arg_ids.total_len());
        for &child in arg_ids.iter() {
            self.ct_simplify(ctx, child)?;
            match ctx.root.kind(child) {
                CtKind::Rt(ty) => determined.push(*ty),
                CtKind::Fail => {
                    ctx.root.deduct_fail(id);
                    return Ok(None);
                }
                // Undetermined or void arguments cannot build a real
                // argument list yet.
                _ => return Ok(None),
            }
        }
        let mut iter = determined.into_iter();
        Ok(Some(arg_ids.map(|_| iter.next().unwrap())))
    }

    /// Simplify and require a determined (or void) outcome.
    fn check_simplified(&mut self, ctx: &mut SolveCtx, id: CtId) -> Result<bool> {
        self.ct_simplify(ctx, id)?;
        Ok(matches!(
            ctx.root.kind(id),
            CtKind::Rt(_) | CtKind::Empty
        ))
    }

    fn check_determined_types_equal(
        &mut self,
        ctx: &mut SolveCtx,
        a: CtId,
        b: CtId,
    ) -> Result<bool> {
        if !self.check_simplified(ctx, a)? || !self.check_simplified(ctx, b)? {
            return Ok(false);
        }
        match (ctx.root.kind(a), ctx.root.kind(b)) {
            (CtKind::Rt(x), CtKind::Rt(y)) => Ok(x == y),
            (CtKind::Empty, CtKind::Empty) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Reflexive base-chain membership, loading bases on demand.
    fn check_loading_type_base(&mut self, checked: TypeId, base: TypeId) -> Result<bool> {
        if checked == base {
            return Ok(true);
        }
        let snap = self.type_snapshot_or_err(checked)?;
        if let Some(loaded_base) = snap.base {
            return self.check_loading_type_base(loaded_base, base);
        }
        let template = self.find_type_template(&snap.args)?;
        let loaded = {
            let target_ctx = RefListContext::for_snapshot(&snap, &template.generic);
            self.load_ref_type(&target_ctx, template.base.inherited)?
        };
        match loaded {
            Some(loaded_base) => self.check_loading_type_base(loaded_base, base),
            None => Ok(false),
        }
    }

    /// Transitive interface membership; value types check their template
    /// because their interfaces live on the box.
    fn check_loading_type_interface(&mut self, checked: TypeId, interface: TypeId) -> Result<bool> {
        if checked == interface {
            return Ok(true);
        }
        let snap = self.type_snapshot_or_err(checked)?;
        if !snap.interfaces.is_empty() || snap.storage == crate::metadata::template::StorageMode::Value
        {
            for implemented in snap.interfaces.clone() {
                if self.check_loading_type_interface(implemented, interface)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        let template = self.find_type_template(&snap.args)?;
        for relation in &template.interfaces {
            let loaded = {
                let target_ctx = RefListContext::for_snapshot(&snap, &template.generic);
                self.load_ref_type(&target_ctx, relation.inherited)?
            };
            if let Some(implemented) = loaded {
                if self.check_loading_type_interface(implemented, interface)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Trait verdict once every variable is determined.
    fn check_trait_determined(&mut self, ctx: &mut SolveCtx, cache_id: CacheId) -> Result<bool> {
        self.ensure_sub_constraint_cached(ctx, cache_id)?;
        if self.try_calculate_trait_sub_member(ctx, cache_id)? != Resolution::Resolved {
            return Ok(false);
        }

        let children = ctx.caches[cache_id].children.clone();
        for child in children {
            if !self.check_constraint_cached(ctx, child)? {
                return Ok(false);
            }
        }

        let field_pairs: Vec<(CtId, CtId)> = {
            let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
            info.fields.iter().map(|f| (f.declared, f.in_target)).collect()
        };
        for (declared, in_target) in field_pairs {
            if !self.check_determined_types_equal(ctx, declared, in_target)? {
                return Ok(false);
            }
        }

        let function_count = {
            let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
            info.functions.len()
        };
        for i in 0..function_count {
            let (declared_return, declared_parameters, overload_return, overload_parameters) = {
                let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
                let function = &info.functions[i];
                let overload = &function.overloads[function.current];
                (
                    function.declared_return,
                    function.declared_parameters.clone(),
                    overload.return_type,
                    overload.parameters.clone(),
                )
            };
            if !self.check_determined_types_equal(ctx, declared_return, overload_return)? {
                return Ok(false);
            }
            debug_assert_eq!(declared_parameters.len(), overload_parameters.len());
            for (&declared, &have) in declared_parameters.iter().zip(&overload_parameters) {
                if !self.check_determined_types_equal(ctx, declared, have)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Final verdict of one candidate combination.
    fn check_constraint_determined(&mut self, ctx: &mut SolveCtx, cache_id: CacheId) -> Result<bool> {
        let kind = ctx.caches[cache_id].source.constraint().kind;
        match kind {
            ConstraintKind::Exist => {
                if ctx.caches[cache_id].arguments.total_len() != 0 {
                    return Err(Error::InvalidConstraint(
                        "Exist takes no arguments".to_string(),
                    ));
                }
                let target = ctx.caches[cache_id].target;
                self.check_simplified(ctx, target)
            }
            ConstraintKind::Same => {
                if !ctx.caches[cache_id].arguments.is_single() {
                    return Err(Error::InvalidConstraint(
                        "Same takes exactly one argument".to_string(),
                    ));
                }
                let argument = *ctx.caches[cache_id].arguments.get(0, 0).unwrap();
                let target = ctx.caches[cache_id].target;
                self.check_determined_types_equal(ctx, target, argument)
            }
            ConstraintKind::Base => {
                let (target, argument) = self.single_argument_pair(ctx, cache_id)?;
                let Some((target, argument)) = self.determined_pair(ctx, target, argument)? else {
                    return Ok(false);
                };
                self.check_loading_type_base(target, argument)
            }
            ConstraintKind::Interface => {
                let (target, argument) = self.single_argument_pair(ctx, cache_id)?;
                let Some((target, argument)) = self.determined_pair(ctx, target, argument)? else {
                    return Ok(false);
                };
                self.check_loading_type_interface(target, argument)
            }
            ConstraintKind::TraitLocal | ConstraintKind::TraitImport => {
                self.check_trait_determined(ctx, cache_id)
            }
        }
    }

    fn single_argument_pair(&self, ctx: &SolveCtx, cache_id: CacheId) -> Result<(CtId, CtId)> {
        if !ctx.caches[cache_id].arguments.is_single() {
            return Err(Error::InvalidConstraint(
                "constraint takes exactly one argument".to_string(),
            ));
        }
        Ok((
            ctx.caches[cache_id].target,
            *ctx.caches[cache_id].arguments.get(0, 0).unwrap(),
        ))
    }

    fn determined_pair(
        &mut self,
        ctx: &mut SolveCtx,
        a: CtId,
        b: CtId,
    ) -> Result<Option<(TypeId, TypeId)>> {
        if !self.check_simplified(ctx, a)? || !self.check_simplified(ctx, b)? {
            return Ok(None);
        }
        match (ctx.root.rt_of(a), ctx.root.rt_of(b)) {
            (Some(x), Some(y)) => Ok(Some((x, y))),
            _ => Ok(None),
        }
    }

    /// One deterministic pass: deduce until no variable is left, then check.
    fn check_constraint_cached_single_pass(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
    ) -> Result<bool> {
        // First pass also builds the trait overload sets (introducing more
        // variables).
        if self.try_determine_constraint_argument(ctx, cache_id)? == Deduce::Fail {
            return Ok(false);
        }
        while self.check_cache_contains_undetermined(ctx, cache_id) {
            match self.try_determine_constraint_argument(ctx, cache_id)? {
                Deduce::Progress => continue,
                _ => return Ok(false),
            }
        }
        self.check_constraint_determined(ctx, cache_id)
    }

    /// Full search over overload combinations with backtracking.
    pub(crate) fn check_constraint_cached(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
    ) -> Result<bool> {
        loop {
            let mark = ctx.root.start_backtrack_point();
            if self.check_constraint_cached_single_pass(ctx, cache_id)? {
                return Ok(true);
            }
            ctx.root.backtrack(mark)?;
            if !Self::move_to_next_candidates(ctx, cache_id) {
                return Ok(false);
            }
        }
    }

    /// Advance the nested overload cursors: children first, then this
    /// cache's functions in reverse declaration order.
    fn move_to_next_candidates(ctx: &mut SolveCtx, cache_id: CacheId) -> bool {
        let children = ctx.caches[cache_id].children.clone();
        for child in children {
            if Self::move_to_next_candidates(ctx, child) {
                return true;
            }
        }
        if let Some(info) = ctx.caches[cache_id].trait_info.as_mut() {
            let count = info.functions.len();
            for i in 0..count {
                let function = &mut info.functions[count - 1 - i];
                function.current += 1;
                if function.current < function.overloads.len() {
                    return true;
                }
                function.current = 0;
            }
        }
        false
    }
}
