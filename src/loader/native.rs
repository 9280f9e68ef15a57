//! Host-provided (native) value types.
//!
//! Native types are primitives the host implements directly: the assembly
//! only carries a placeholder template, and the host supplies size and
//! alignment at registration time. The object commits immediately - it has no
//! fields to lay out and nothing to post-load.

use std::sync::Arc;

use crate::{
    metadata::{assembly::AssemblyRegistry, generics::RefKind, template::StorageMode},
    runtime::{
        types::{RuntimeType, RuntimeTypeRc},
        ConstraintExportList, LoadingArguments,
    },
    Error, Result,
};

use super::LoaderCore;

impl LoaderCore {
    /// Install the native type registered under `name` in the assembly's
    /// native-type table.
    pub(crate) fn add_native_type_internal(
        &mut self,
        assembly_name: &str,
        name: &str,
        size: usize,
        alignment: usize,
    ) -> Result<RuntimeTypeRc> {
        let assembly = self.assemblies.find_or_err(assembly_name)?;
        let Some(id) = AssemblyRegistry::find_export_id(&assembly.native_types, name) else {
            return Err(Error::LinkageFailure(format!(
                "native type not found - {assembly_name}::{name}"
            )));
        };
        let template = self.assemblies.type_template(assembly_name, id)?;

        if !template.generic.parameter_count.is_empty() {
            return Err(Error::NativeTypeUnsuitable(format!(
                "{name} is generic"
            )));
        }
        if template.storage != StorageMode::Value {
            return Err(Error::NativeTypeUnsuitable(format!(
                "{name} is not a value type"
            )));
        }
        for slot in [template.initializer, template.finalizer] {
            let entry = template.generic.functions.get(slot).ok_or_else(|| {
                Error::InvalidFunctionReference(format!("slot {slot} out of range"))
            })?;
            if entry.kind != RefKind::Empty {
                return Err(Error::NativeTypeUnsuitable(format!(
                    "{name} declares an initializer or finalizer"
                )));
            }
        }

        let ty = RuntimeType {
            args: LoadingArguments::new(assembly_name, id),
            type_id: self.next_type_id(),
            storage: StorageMode::Value,
            fields: Vec::new(),
            size,
            alignment,
            base: None,
            interfaces: Vec::new(),
            virtual_table: Vec::new(),
            initializer: None,
            finalizer: None,
            static_storage: None,
            pointer_type: std::sync::OnceLock::new(),
            constraint_exports: ConstraintExportList::new(),
        };
        let id = ty.type_id;
        let index = id.index();
        while self.loaded_types.len() <= index {
            self.loaded_types.push(None);
        }
        if self.loaded_types[index].is_some() {
            return Err(Error::Assertion(format!("table slot {index} already occupied")));
        }
        let ty = Arc::new(ty);
        self.loaded_types[index] = Some(ty.clone());
        tracing::debug!(%name, size, alignment, "native type installed");
        Ok(ty)
    }
}
