//! The reference-list evaluator.
//!
//! Templates describe the types and functions they depend on through flat
//! tagged lists (see [`crate::metadata::generics`]). This module walks those
//! lists and turns entries into loaded runtime objects, recursing through the
//! pipeline for anything not yet instantiated.
//!
//! Argument lists trail their head entry up to a matching `ListEnd` (an
//! `Empty` entry also terminates, which is the legacy encoding). `Segment`
//! entries inside a list start a new segment of the multilist being built,
//! except immediately after an `Argument` entry, where they select that
//! argument's segment instead.
//!
//! A pure shape-scan mode computes how many generic arguments an entry can
//! consume per segment, without instantiating anything; the constraint solver
//! uses it to allocate undetermined variables for overload candidates.

use smallvec::SmallVec;

use crate::{
    metadata::generics::{GenericDeclaration, MultiList, RefEntry, RefKind},
    runtime::{
        functions::RuntimeFunction, types::RuntimeType, ConstraintExportList, FunctionId,
        LoadingArguments, TypeId,
    },
    Error, Result,
};

use super::{session::SubtypeKey, LoaderCore, TypeSnapshot};

/// The evaluation environment of one reference list.
///
/// Everything here is borrowed from the object (and its template) on whose
/// behalf the list is being evaluated; the loader itself is passed separately
/// so evaluation can create new objects.
pub(crate) struct RefListContext<'a> {
    /// Assembly owning the declaration.
    pub assembly: &'a str,
    /// The declaration whose lists are evaluated.
    pub generic: &'a GenericDeclaration,
    /// Generic arguments of the current specialization.
    pub arguments: &'a MultiList<TypeId>,
    /// The object itself, for `SelfType` entries.
    pub self_type: Option<TypeId>,
    /// Constraint exports recorded for the object.
    pub exports: &'a ConstraintExportList,
}

impl<'a> RefListContext<'a> {
    /// Context for a type travelling through the pipeline.
    pub fn for_type(ty: &'a RuntimeType, generic: &'a GenericDeclaration) -> Self {
        RefListContext {
            assembly: &ty.args.assembly,
            generic,
            arguments: &ty.args.arguments,
            self_type: Some(ty.type_id),
            exports: &ty.constraint_exports,
        }
    }

    /// Context for a function travelling through the pipeline.
    pub fn for_function(func: &'a RuntimeFunction, generic: &'a GenericDeclaration) -> Self {
        RefListContext {
            assembly: &func.args.assembly,
            generic,
            arguments: &func.args.arguments,
            self_type: None,
            exports: &func.constraint_exports,
        }
    }

    /// Context for a snapshotted type (base-chain walks, trait targets).
    pub fn for_snapshot(snap: &'a TypeSnapshot, generic: &'a GenericDeclaration) -> Self {
        RefListContext {
            assembly: &snap.args.assembly,
            generic,
            arguments: &snap.args.arguments,
            self_type: Some(snap.id),
            exports: &snap.exports,
        }
    }
}

/// Positions of one scanned argument list, grouped by segment, plus the
/// position one past its terminator.
pub(crate) struct ScannedArguments {
    /// Entry positions per segment; no segments for an empty list.
    pub segments: Vec<Vec<usize>>,
    /// Position just past the list (after the terminator, if present).
    pub end: usize,
}

/// Scan the argument list starting at `start` (the position after a head
/// entry). Running off the end of the list counts as termination, matching
/// the legacy encoding.
pub(crate) fn scan_argument_list(list: &[RefEntry], start: usize) -> Result<ScannedArguments> {
    let mut segments: Vec<Vec<usize>> = Vec::new();
    let mut pos = start;
    loop {
        let Some(entry) = list.get(pos) else {
            return Ok(ScannedArguments { segments, end: pos });
        };
        match entry.kind {
            RefKind::ListEnd | RefKind::Empty => {
                return Ok(ScannedArguments { segments, end: pos + 1 });
            }
            RefKind::Segment => {
                segments.push(Vec::new());
                pos += 1;
            }
            _ => {
                if segments.is_empty() {
                    segments.push(Vec::new());
                }
                segments.last_mut().unwrap().push(pos);
                pos = entry_extent(list, pos)?;
            }
        }
    }
}

/// The position one past the inline representation of the entry at `index`.
///
/// Heads own their trailing argument list; an `Argument` entry owns an
/// immediately following `Segment` selector.
pub(crate) fn entry_extent(list: &[RefEntry], index: usize) -> Result<usize> {
    let entry = list
        .get(index)
        .ok_or_else(|| malformed_error!("reference list entry {index} out of range"))?;
    match entry.kind {
        RefKind::Assembly | RefKind::Import => Ok(scan_argument_list(list, index + 1)?.end),
        RefKind::Subtype => {
            let parent_end = entry_extent(list, index + 1)?;
            Ok(scan_argument_list(list, parent_end)?.end)
        }
        RefKind::Argument => {
            if list.get(index + 1).is_some_and(|e| e.kind == RefKind::Segment) {
                Ok(index + 2)
            } else {
                Ok(index + 1)
            }
        }
        _ => Ok(index + 1),
    }
}

/// Resolve an `Argument` entry to its `(segment, index)` selection.
pub(crate) fn argument_selector(
    list: &[RefEntry],
    index: usize,
    current_segment: usize,
) -> (usize, usize) {
    let segment = match list.get(index + 1) {
        Some(e) if e.kind == RefKind::Segment => e.index,
        _ => current_segment,
    };
    (segment, list[index].index)
}

impl LoaderCore {
    /// Evaluate a Types-list entry to a loaded type; `None` is void.
    pub(crate) fn load_ref_type(
        &mut self,
        ctx: &RefListContext<'_>,
        index: usize,
    ) -> Result<Option<TypeId>> {
        self.load_ref_type_at(ctx, index, 0)
    }

    pub(crate) fn load_ref_type_at(
        &mut self,
        ctx: &RefListContext<'_>,
        index: usize,
        current_segment: usize,
    ) -> Result<Option<TypeId>> {
        let list = &ctx.generic.types;
        let mut visited: SmallVec<[usize; 8]> = SmallVec::new();
        let mut idx = index;
        loop {
            let entry = list
                .get(idx)
                .ok_or_else(|| Error::InvalidTypeReference(format!("entry {idx} out of range")))?;
            if entry.kind != RefKind::Clone {
                break;
            }
            if visited.contains(&idx) {
                return Err(malformed_error!("cyclic Clone chain at entry {idx}"));
            }
            visited.push(idx);
            idx = entry.index;
        }

        let entry = list[idx];
        match entry.kind {
            RefKind::Empty => Ok(None),
            RefKind::Assembly => {
                self.load_dependent_type(ctx, ctx.assembly.to_string(), entry.index, idx, None)
            }
            RefKind::Import => {
                let a = self.assemblies.find_or_err(ctx.assembly)?;
                let import = a.import_types.get(entry.index).ok_or_else(|| {
                    Error::InvalidTypeReference(format!("import {} out of range", entry.index))
                })?;
                let resolved = self.assemblies.resolve_export_type(import)?.ok_or_else(|| {
                    Error::LinkageFailure(format!(
                        "import type not found - {}::{}",
                        import.assembly, import.name
                    ))
                })?;
                let expected = import.generic_parameters;
                self.load_dependent_type(ctx, resolved.assembly, resolved.id, idx, expected)
            }
            RefKind::Argument => {
                let (segment, arg_index) = argument_selector(list, idx, current_segment);
                ctx.arguments
                    .get(segment, arg_index)
                    .copied()
                    .map(Some)
                    .ok_or_else(|| {
                        Error::InvalidTypeReference(format!(
                            "argument {arg_index} of segment {segment} out of range"
                        ))
                    })
            }
            RefKind::SelfType => ctx
                .self_type
                .map(Some)
                .ok_or_else(|| Error::InvalidTypeReference("SelfType outside a type".to_string())),
            RefKind::Subtype => self.load_subtype(ctx, idx, current_segment),
            RefKind::Constraint => ctx.exports.find_type(idx).map(Some).ok_or_else(|| {
                Error::InvalidTypeReference(format!("no constraint export recorded for entry {idx}"))
            }),
            _ => Err(Error::InvalidTypeReference(format!(
                "unexpected {} entry in a type position",
                entry.kind
            ))),
        }
    }

    /// Load a type named by template id plus the argument list trailing `head`.
    fn load_dependent_type(
        &mut self,
        ctx: &RefListContext<'_>,
        assembly: String,
        template_id: usize,
        head: usize,
        expected_count: Option<usize>,
    ) -> Result<Option<TypeId>> {
        let arguments = self.load_type_argument_list(ctx, head + 1)?;
        if let Some(expected) = expected_count {
            if arguments.total_len() != expected {
                return Err(Error::InvalidGenericArguments(format!(
                    "{assembly}[{template_id}] expects {expected} arguments"
                )));
            }
        }
        let args = LoadingArguments::with_arguments(assembly, template_id, arguments);
        Ok(Some(self.load_type_internal(args)?))
    }

    /// Evaluate the argument list starting at `start` of the Types list.
    fn load_type_argument_list(
        &mut self,
        ctx: &RefListContext<'_>,
        start: usize,
    ) -> Result<MultiList<TypeId>> {
        let scanned = scan_argument_list(&ctx.generic.types, start)?;
        let mut arguments = MultiList::new();
        for (segment, positions) in scanned.segments.iter().enumerate() {
            arguments.new_list();
            for &pos in positions {
                let loaded = self.load_ref_type_at(ctx, pos, segment)?.ok_or_else(|| {
                    Error::InvalidGenericArguments("void generic argument".to_string())
                })?;
                arguments.append_last(loaded);
            }
        }
        Ok(arguments)
    }

    /// Resolve a `Subtype` entry: evaluate the parent, look the name up in the
    /// parent template's member-type table and load the result.
    fn load_subtype(
        &mut self,
        ctx: &RefListContext<'_>,
        head: usize,
        current_segment: usize,
    ) -> Result<Option<TypeId>> {
        let list = &ctx.generic.types;
        let name = ctx
            .generic
            .names
            .get(list[head].index)
            .cloned()
            .ok_or_else(|| malformed_error!("subtype name {} out of range", list[head].index))?;
        let parent = self
            .load_ref_type_at(ctx, head + 1, current_segment)?
            .ok_or_else(|| Error::InvalidTypeReference("subtype of void".to_string()))?;
        let parent_end = entry_extent(list, head + 1)?;

        let scanned = scan_argument_list(list, parent_end)?;
        let mut arguments = MultiList::new();
        for (segment, positions) in scanned.segments.iter().enumerate() {
            arguments.new_list();
            for &pos in positions {
                let loaded = self.load_ref_type_at(ctx, pos, segment)?.ok_or_else(|| {
                    Error::InvalidGenericArguments("void generic argument".to_string())
                })?;
                arguments.append_last(loaded);
            }
        }

        let key = SubtypeKey {
            parent,
            name,
            arguments,
        };
        if self.session.loading_subtypes.contains(&key) {
            return Err(Error::CyclicDependence(format!(
                "subtype {} of {parent}",
                key.name
            )));
        }
        self.session.loading_subtypes.push(key.clone());
        let result = self.load_subtype_resolved(&key);
        self.session.loading_subtypes.pop();
        result
    }

    fn load_subtype_resolved(&mut self, key: &SubtypeKey) -> Result<Option<TypeId>> {
        let args = self.find_sub_type(key)?.ok_or_else(|| {
            Error::InvalidTypeReference(format!("subtype {} not found on {}", key.name, key.parent))
        })?;
        Ok(Some(self.load_type_internal(args)?))
    }

    /// Translate an in-flight subtype lookup into a loading request, if the
    /// parent's template knows the name.
    pub(crate) fn find_sub_type(&self, key: &SubtypeKey) -> Result<Option<LoadingArguments>> {
        let parent = self.type_snapshot_or_err(key.parent)?;
        let template = self.find_type_template(&parent.args)?;
        let Some(entry) = template
            .public_sub_types
            .iter()
            .find(|n| n.name == key.name)
        else {
            return Ok(None);
        };
        Ok(Some(LoadingArguments::with_arguments(
            parent.args.assembly.clone(),
            entry.id,
            key.arguments.clone(),
        )))
    }

    /// Evaluate a Functions-list entry to a loaded function; `None` is empty.
    pub(crate) fn load_ref_function(
        &mut self,
        ctx: &RefListContext<'_>,
        index: usize,
    ) -> Result<Option<FunctionId>> {
        let list = &ctx.generic.functions;
        let mut visited: SmallVec<[usize; 8]> = SmallVec::new();
        let mut idx = index;
        loop {
            let entry = list.get(idx).ok_or_else(|| {
                Error::InvalidFunctionReference(format!("entry {idx} out of range"))
            })?;
            if entry.kind != RefKind::Clone {
                break;
            }
            if visited.contains(&idx) {
                return Err(malformed_error!("cyclic Clone chain at entry {idx}"));
            }
            visited.push(idx);
            idx = entry.index;
        }

        let entry = list[idx];
        match entry.kind {
            RefKind::Empty => Ok(None),
            RefKind::Assembly => {
                self.load_dependent_function(ctx, ctx.assembly.to_string(), entry.index, idx, None)
            }
            RefKind::Import => {
                let a = self.assemblies.find_or_err(ctx.assembly)?;
                let import = a.import_functions.get(entry.index).ok_or_else(|| {
                    Error::InvalidFunctionReference(format!("import {} out of range", entry.index))
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
                let expected = import.generic_parameters;
                self.load_dependent_function(ctx, resolved.assembly, resolved.id, idx, expected)
            }
            RefKind::Constraint => ctx.exports.find_function(idx).map(Some).ok_or_else(|| {
                Error::InvalidFunctionReference(format!(
                    "no constraint export recorded for entry {idx}"
                ))
            }),
            _ => Err(Error::InvalidFunctionReference(format!(
                "unexpected {} entry in a function position",
                entry.kind
            ))),
        }
    }

    /// Load a function named by template id plus the `CloneType` argument list
    /// trailing `head` in the Functions list.
    fn load_dependent_function(
        &mut self,
        ctx: &RefListContext<'_>,
        assembly: String,
        template_id: usize,
        head: usize,
        expected_count: Option<usize>,
    ) -> Result<Option<FunctionId>> {
        let scanned = scan_argument_list(&ctx.generic.functions, head + 1)?;
        let mut arguments = MultiList::new();
        for positions in &scanned.segments {
            arguments.new_list();
            for &pos in positions {
                let entry = ctx.generic.functions[pos];
                if entry.kind != RefKind::CloneType {
                    return Err(Error::InvalidFunctionReference(format!(
                        "generic function argument must be CloneType, found {}",
                        entry.kind
                    )));
                }
                let loaded = self.load_ref_type(ctx, entry.index)?.ok_or_else(|| {
                    Error::InvalidGenericArguments("void generic argument".to_string())
                })?;
                arguments.append_last(loaded);
            }
        }
        if let Some(expected) = expected_count {
            if arguments.total_len() != expected {
                return Err(Error::InvalidGenericArguments(format!(
                    "{assembly}[{template_id}] expects {expected} arguments"
                )));
            }
        }
        let args = LoadingArguments::with_arguments(assembly, template_id, arguments);
        Ok(Some(self.load_function_internal(args)?))
    }

    /// Shape scan: per segment, the largest `Argument` index (plus one) a
    /// Functions-list entry can consume. Nothing is instantiated.
    pub(crate) fn function_additional_arguments(
        &self,
        generic: &GenericDeclaration,
        index: usize,
    ) -> Result<Vec<usize>> {
        let mut result = Vec::new();
        self.function_additional_arguments_inner(generic, index, &mut result)?;
        Ok(result)
    }

    fn function_additional_arguments_inner(
        &self,
        generic: &GenericDeclaration,
        index: usize,
        result: &mut Vec<usize>,
    ) -> Result<()> {
        let entry = generic.functions.get(index).ok_or_else(|| {
            Error::InvalidFunctionReference(format!("entry {index} out of range"))
        })?;
        match entry.kind {
            RefKind::Clone => {
                // TODO detect circular Clone chains on this path
                self.function_additional_arguments_inner(generic, entry.index, result)
            }
            RefKind::Assembly | RefKind::Import => {
                let scanned = scan_argument_list(&generic.functions, index + 1)?;
                for positions in &scanned.segments {
                    for &pos in positions {
                        let arg = generic.functions[pos];
                        if arg.kind != RefKind::CloneType {
                            return Err(Error::InvalidFunctionReference(format!(
                                "generic function argument must be CloneType, found {}",
                                arg.kind
                            )));
                        }
                        self.type_additional_arguments_inner(generic, arg.index, result)?;
                    }
                }
                Ok(())
            }
            _ => Err(Error::InvalidFunctionReference(format!(
                "unexpected {} entry in a function position",
                entry.kind
            ))),
        }
    }

    fn type_additional_arguments_inner(
        &self,
        generic: &GenericDeclaration,
        index: usize,
        result: &mut Vec<usize>,
    ) -> Result<()> {
        let entry = generic
            .types
            .get(index)
            .ok_or_else(|| Error::InvalidTypeReference(format!("entry {index} out of range")))?;
        match entry.kind {
            RefKind::Clone => {
                // TODO detect circular Clone chains on this path
                self.type_additional_arguments_inner(generic, entry.index, result)
            }
            RefKind::Assembly | RefKind::Import => {
                let scanned = scan_argument_list(&generic.types, index + 1)?;
                for positions in &scanned.segments {
                    for &pos in positions {
                        self.type_additional_arguments_inner(generic, pos, result)?;
                    }
                }
                Ok(())
            }
            RefKind::Subtype => {
                self.type_additional_arguments_inner(generic, index + 1, result)?;
                let parent_end = entry_extent(&generic.types, index + 1)?;
                let scanned = scan_argument_list(&generic.types, parent_end)?;
                for positions in &scanned.segments {
                    for &pos in positions {
                        self.type_additional_arguments_inner(generic, pos, result)?;
                    }
                }
                Ok(())
            }
            RefKind::Argument => {
                let (segment, arg_index) = argument_selector(&generic.types, index, 0);
                while result.len() <= segment {
                    result.push(0);
                }
                if arg_index + 1 > result[segment] {
                    result[segment] = arg_index + 1;
                }
                Ok(())
            }
            RefKind::SelfType | RefKind::Constraint | RefKind::Empty => Ok(()),
            _ => Err(Error::InvalidTypeReference(format!(
                "unexpected {} entry in a type position",
                entry.kind
            ))),
        }
    }
}
