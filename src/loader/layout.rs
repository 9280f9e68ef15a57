//! Field layout, virtual tables and static storage.
//!
//! Layout walks the template's field list, resolves each field type and packs
//! them in declaration order: every offset is rounded up to the field's
//! alignment, the type's alignment is the maximum of its members', and the
//! total size is the running offset (never below one byte). Reference-storage
//! fields always occupy exactly one pointer.
//!
//! Reference types resolve their base during field loading, so the base
//! pointer exists before post-load assembles the virtual table: the table is
//! the base's table with name-and-slot matches overridden and new slots
//! appended.

use crate::{
    metadata::template::{StorageMode, TypeTemplateRc},
    runtime::{
        types::{RuntimeFieldInfo, RuntimeInterface, RuntimeType, StaticStorage, VirtualSlot},
        ConstraintExportList, LoadingArguments, TypeId,
    },
    Error, Result,
};

use super::{reflist::RefListContext, LoaderCore};

fn round_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) / alignment * alignment
}

impl LoaderCore {
    /// Resolve and lay out a type's fields, then queue it for post-load.
    ///
    /// `template` is passed by the value-type creation path which already
    /// fetched it; the drain loop passes `None`.
    pub(crate) fn load_fields(
        &mut self,
        mut ty: RuntimeType,
        template: Option<&TypeTemplateRc>,
    ) -> Result<TypeId> {
        let template = match template {
            Some(t) => t.clone(),
            None => self.find_type_template(&ty.args)?,
        };

        if self.is_pointer_specialization(&ty.args) {
            // The pointer intrinsic has loader-defined layout: one pointer,
            // no fields.
            ty.size = self.options.pointer_size;
            ty.alignment = self.options.pointer_size;
            let id = ty.type_id;
            self.session.post_loading_types.push_back(ty);
            return Ok(id);
        }

        let mut field_types = Vec::with_capacity(template.fields.len());
        let base;
        {
            let ctx = RefListContext::for_type(&ty, &template.generic);
            for &field_index in &template.fields {
                let field_type = self.load_ref_type(&ctx, field_index)?.ok_or_else(|| {
                    Error::InvalidFieldReference(format!("void field on {}", ty.args))
                })?;
                field_types.push(field_type);
            }
            base = self.load_ref_type(&ctx, template.base.inherited)?;
        }
        ty.base = base;

        let mut offset = 0usize;
        let mut total_alignment = 1usize;
        for field_type in field_types {
            let (length, alignment) = self.field_layout_of(field_type)?;
            offset = round_up(offset, alignment);
            total_alignment = total_alignment.max(alignment);
            ty.fields.push(RuntimeFieldInfo {
                field_type,
                offset,
                length,
            });
            offset += length;
        }
        ty.size = offset.max(1);
        ty.alignment = total_alignment;

        let id = ty.type_id;
        self.session.post_loading_types.push_back(ty);
        Ok(id)
    }

    /// Embedded size and alignment of a field of the given type.
    fn field_layout_of(&self, field_type: TypeId) -> Result<(usize, usize)> {
        let snap = self.type_snapshot_or_err(field_type)?;
        match snap.storage {
            StorageMode::Reference => {
                Ok((self.options.pointer_size, self.options.pointer_size))
            }
            StorageMode::Value => Ok((snap.size, snap.alignment)),
            StorageMode::Global | StorageMode::Interface => Err(Error::InvalidFieldReference(
                format!("{} storage cannot be a field", snap.storage),
            )),
        }
    }

    /// Resolve initializer, finalizer, interfaces and the virtual table, then
    /// queue the type for commit.
    pub(crate) fn post_load_type(&mut self, mut ty: RuntimeType) -> Result<()> {
        let template = self.find_type_template(&ty.args)?;

        let initializer;
        let finalizer;
        let mut interfaces = Vec::with_capacity(template.interfaces.len());
        {
            let ctx = RefListContext::for_type(&ty, &template.generic);
            initializer = self.load_ref_function(&ctx, template.initializer)?;
            finalizer = self.load_ref_function(&ctx, template.finalizer)?;
            for relation in &template.interfaces {
                let interface_type =
                    self.load_ref_type(&ctx, relation.inherited)?.ok_or_else(|| {
                        Error::InvalidTypeReference(format!("void interface on {}", ty.args))
                    })?;
                let mut bound = Vec::with_capacity(relation.virtual_functions.len());
                for entry in &relation.virtual_functions {
                    let implementation = self
                        .load_ref_function(&ctx, entry.implementation)?
                        .ok_or_else(|| {
                            Error::InvalidFunctionReference(format!(
                                "interface slot {} unbound on {}",
                                entry.name, ty.args
                            ))
                        })?;
                    bound.push(implementation);
                }
                interfaces.push(RuntimeInterface {
                    interface_type,
                    virtual_table: bound,
                });
            }
        }

        if initializer.is_some() && ty.storage != StorageMode::Global {
            return Err(malformed_error!(
                "only global types may declare an initializer - {}",
                ty.args
            ));
        }
        if finalizer.is_some() && ty.storage != StorageMode::Reference {
            return Err(malformed_error!(
                "only reference types may declare a finalizer - {}",
                ty.args
            ));
        }
        ty.initializer = initializer;
        ty.finalizer = finalizer;
        ty.interfaces = interfaces;

        if ty.base.is_some() || !template.base.virtual_functions.is_empty() {
            ty.virtual_table =
                self.build_virtual_table(ty.type_id, &ty.args, &ty.constraint_exports, ty.base)?;
        }

        if ty.storage == StorageMode::Global {
            let size = ty.storage_size(self.options.pointer_size);
            let alignment = ty.storage_alignment(self.options.pointer_size);
            ty.static_storage = Some(StaticStorage::allocate(size, alignment));
        }

        self.session.finished_types.push_back(ty);
        Ok(())
    }

    /// Assemble the virtual table for the type identified by `id`.
    ///
    /// The base chain is walked first; a chain that reaches back into the
    /// type currently being assembled cannot terminate and is rejected.
    pub(crate) fn build_virtual_table(
        &mut self,
        id: TypeId,
        args: &LoadingArguments,
        exports: &ConstraintExportList,
        base: Option<TypeId>,
    ) -> Result<Vec<VirtualSlot>> {
        if self.session.vtable_stack.contains(&id) {
            return Err(Error::CyclicDependence(format!("virtual table of {args}")));
        }
        self.session.vtable_stack.push(id);
        let result = self.build_virtual_table_inner(id, args, exports, base);
        self.session.vtable_stack.pop();
        result
    }

    fn build_virtual_table_inner(
        &mut self,
        id: TypeId,
        args: &LoadingArguments,
        exports: &ConstraintExportList,
        base: Option<TypeId>,
    ) -> Result<Vec<VirtualSlot>> {
        let mut table = match base {
            Some(base_id) => {
                let snap = self.type_snapshot_or_err(base_id)?;
                self.build_virtual_table(base_id, &snap.args, &snap.exports, snap.base)?
            }
            None => Vec::new(),
        };

        let template = self.find_type_template(args)?;
        let ctx = RefListContext {
            assembly: &args.assembly,
            generic: &template.generic,
            arguments: &args.arguments,
            self_type: Some(id),
            exports,
        };
        for entry in &template.base.virtual_functions {
            let slot = self
                .load_ref_function(&ctx, entry.virtual_function)?
                .ok_or_else(|| {
                    Error::InvalidFunctionReference(format!(
                        "virtual slot {} unbound on {args}",
                        entry.name
                    ))
                })?;
            let implementation = self
                .load_ref_function(&ctx, entry.implementation)?
                .ok_or_else(|| {
                    Error::InvalidFunctionReference(format!(
                        "implementation of {} unbound on {args}",
                        entry.name
                    ))
                })?;
            if let Some(existing) = table
                .iter_mut()
                .find(|s| s.name == entry.name && s.slot == slot)
            {
                existing.implementation = implementation;
            } else {
                table.push(VirtualSlot {
                    name: entry.name.clone(),
                    slot,
                    implementation,
                });
            }
        }
        Ok(table)
    }
}
