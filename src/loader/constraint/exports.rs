//! The constraint export binder.
//!
//! A satisfied constraint can publish what it proved: the target itself
//! (`.target`), trait-declared types, the matched functions and fields, and -
//! through `name/` path segments - anything a named sub-constraint publishes.
//! The binder walks the owning declaration's reference lists, matches every
//! `Constraint`-tagged entry whose name starts with the constraint's export
//! prefix, and records the resolved objects so later evaluation can read them
//! back by entry position.

use crate::{
    metadata::generics::RefKind,
    runtime::{ConstraintExportEntry, ConstraintExportList, FunctionId, TypeId},
    Result,
};

use super::{types::CacheId, ConstraintOwner, SolveCtx};
use crate::loader::{reflist::RefListContext, LoaderCore};

impl LoaderCore {
    /// Record every export the owning declaration requests from this
    /// constraint.
    pub(crate) fn bind_constraint_exports(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        owner: &ConstraintOwner,
        constraint_index: usize,
        list: &mut ConstraintExportList,
    ) -> Result<()> {
        let owner = owner.clone();
        let generic = owner.generic();
        let prefix = format!("{}/", generic.constraints[constraint_index].export_name);

        for (index, entry) in generic.types.iter().enumerate() {
            if entry.kind != RefKind::Constraint {
                continue;
            }
            let Some(name) = generic.names.get(entry.index) else {
                continue;
            };
            let Some(path) = name.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(export) = self.find_constraint_export_type(ctx, cache_id, path)? {
                list.entries.push(ConstraintExportEntry::Type { index, export });
            }
        }

        for (index, entry) in generic.functions.iter().enumerate() {
            if entry.kind != RefKind::Constraint {
                continue;
            }
            let Some(name) = generic.names.get(entry.index) else {
                continue;
            };
            let Some(path) = name.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(export) = self.find_constraint_export_function(ctx, cache_id, path)? {
                list.entries.push(ConstraintExportEntry::Function { index, export });
            }
        }

        for (index, entry) in generic.fields.iter().enumerate() {
            if entry.kind != RefKind::Constraint {
                continue;
            }
            let Some(name) = generic.names.get(entry.index) else {
                continue;
            };
            let Some(path) = name.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(field) = self.find_constraint_export_field(ctx, cache_id, path)? {
                list.entries.push(ConstraintExportEntry::Field { index, field });
            }
        }

        Ok(())
    }

    /// Resolve an export path to a type.
    fn find_constraint_export_type(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        path: &str,
    ) -> Result<Option<TypeId>> {
        if path.is_empty() {
            return Ok(None);
        }
        match path.find('/') {
            Some(0) => Ok(None),
            None => {
                if path == ".target" {
                    let target = ctx.caches[cache_id].target;
                    self.ct_simplify(ctx, target)?;
                    return Ok(ctx.root.rt_of(target));
                }
                let Some(template) = ctx.caches[cache_id]
                    .trait_info
                    .as_ref()
                    .map(|info| info.template.clone())
                else {
                    return Ok(None);
                };
                for exported in &template.types {
                    if exported.export_name == path {
                        let ct = self.construct_constraint_trait_type(ctx, cache_id, exported.index)?;
                        self.ct_simplify(ctx, ct)?;
                        if let Some(resolved) = ctx.root.rt_of(ct) {
                            return Ok(Some(resolved));
                        }
                    }
                }
                Ok(None)
            }
            Some(slash) => {
                let Some(child) = self.descend_export_path(ctx, cache_id, &path[..slash])? else {
                    return Ok(None);
                };
                self.find_constraint_export_type(ctx, child, &path[slash + 1..])
            }
        }
    }

    /// Resolve an export path to the function chosen by overload search.
    fn find_constraint_export_function(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        path: &str,
    ) -> Result<Option<FunctionId>> {
        if path.is_empty() {
            return Ok(None);
        }
        match path.find('/') {
            Some(0) => Ok(None),
            None => {
                let Some(template) = ctx.caches[cache_id]
                    .trait_info
                    .as_ref()
                    .map(|info| info.template.clone())
                else {
                    return Ok(None);
                };
                for (i, required) in template.functions.iter().enumerate() {
                    if required.export_name != path {
                        continue;
                    }
                    let overload_index = {
                        let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
                        let function = &info.functions[i];
                        function.overloads[function.current].index
                    };
                    let target = ctx.caches[cache_id].target;
                    let Some(target_id) = ctx.root.rt_of(target) else {
                        return Ok(None);
                    };
                    let snap = self.type_snapshot_or_err(target_id)?;
                    let target_template = self.find_type_template(&snap.args)?;
                    let target_ctx = RefListContext::for_snapshot(&snap, &target_template.generic);
                    return self.load_ref_function(&target_ctx, overload_index);
                }
                Ok(None)
            }
            Some(slash) => {
                let Some(child) = self.descend_export_path(ctx, cache_id, &path[..slash])? else {
                    return Ok(None);
                };
                self.find_constraint_export_function(ctx, child, &path[slash + 1..])
            }
        }
    }

    /// Resolve an export path to the matched field ordinal.
    fn find_constraint_export_field(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        path: &str,
    ) -> Result<Option<usize>> {
        if path.is_empty() {
            return Ok(None);
        }
        match path.find('/') {
            Some(0) => Ok(None),
            None => {
                let Some(template) = ctx.caches[cache_id]
                    .trait_info
                    .as_ref()
                    .map(|info| info.template.clone())
                else {
                    return Ok(None);
                };
                for (i, required) in template.fields.iter().enumerate() {
                    if required.export_name == path {
                        let info = ctx.caches[cache_id].trait_info.as_ref().unwrap();
                        return Ok(Some(info.fields[i].field_index));
                    }
                }
                Ok(None)
            }
            Some(slash) => {
                let Some(child) = self.descend_export_path(ctx, cache_id, &path[..slash])? else {
                    return Ok(None);
                };
                self.find_constraint_export_field(ctx, child, &path[slash + 1..])
            }
        }
    }

    /// Find the child cache behind a named sub-constraint.
    fn descend_export_path(
        &mut self,
        ctx: &mut SolveCtx,
        cache_id: CacheId,
        segment: &str,
    ) -> Result<Option<CacheId>> {
        let Some(template) = ctx.caches[cache_id]
            .trait_info
            .as_ref()
            .map(|info| info.template.clone())
        else {
            return Ok(None);
        };
        let children = ctx.caches[cache_id].children.clone();
        for (i, constraint) in template.generic.constraints.iter().enumerate() {
            if constraint.export_name == segment {
                return Ok(children.get(i).copied());
            }
        }
        Ok(None)
    }
}
