//! The multi-stage loading pipeline.
//!
//! A reference type moves through *created -> pointer published -> fields
//! laid out -> post-loaded -> finished -> committed*; a value type lays its
//! fields out eagerly inside creation (guarded by the value-loading stack,
//! which turns self-containment into an error); a function is post-loaded
//! once the type worklists drain. Commit happens for the whole run at once:
//! any failure discards every object the run created, and the committed
//! tables never see partial state.

use std::sync::Arc;

use crate::{
    metadata::{generics::RefKind, template::StorageMode},
    runtime::{
        functions::RuntimeFunction,
        types::RuntimeType,
        ConstraintExportList, FunctionId, LoadingArguments, TypeId,
    },
    Error, Result,
};

use super::{reflist::RefListContext, LoaderCore};

impl LoaderCore {
    /// Run one full pipeline for a type request: clear, load, drain, commit,
    /// clear. Returns the id of the requested type.
    pub(crate) fn run_type_pipeline(&mut self, args: &LoadingArguments) -> Result<TypeId> {
        self.session.clear();
        let result = self.run_type_pipeline_inner(args);
        self.session.clear();
        if let Err(error) = &result {
            tracing::debug!(request = %args, %error, "type loading failed");
        }
        result
    }

    fn run_type_pipeline_inner(&mut self, args: &LoadingArguments) -> Result<TypeId> {
        let id = self.load_type_internal(args.clone())?;
        self.process_loading_lists()?;
        self.move_finished_objects()?;
        Ok(id)
    }

    /// Run one full pipeline for a function request.
    pub(crate) fn run_function_pipeline(&mut self, args: &LoadingArguments) -> Result<FunctionId> {
        self.session.clear();
        let result = self.run_function_pipeline_inner(args);
        self.session.clear();
        if let Err(error) = &result {
            tracing::debug!(request = %args, %error, "function loading failed");
        }
        result
    }

    fn run_function_pipeline_inner(&mut self, args: &LoadingArguments) -> Result<FunctionId> {
        let id = self.load_function_internal(args.clone())?;
        self.process_loading_lists()?;
        self.move_finished_objects()?;
        Ok(id)
    }

    /// Search the committed table and every pipeline list for `args`.
    ///
    /// A hit on the value-loading stack means the request contains itself by
    /// value and can never complete.
    fn find_existing_type(&self, args: &LoadingArguments) -> Result<Option<TypeId>> {
        if let Some(t) = self.loaded_types.iter().flatten().find(|t| &t.args == args) {
            return Ok(Some(t.type_id));
        }
        if let Some(t) = self.session.find_type_by_args(args) {
            return Ok(Some(t.type_id));
        }
        if let Some(id) = self.session.find_processing_type(args) {
            return Ok(Some(id));
        }
        if self.session.loading_values.contains(args) {
            return Err(Error::CyclicDependence(args.to_string()));
        }
        Ok(None)
    }

    fn find_existing_function(&self, args: &LoadingArguments) -> Option<FunctionId> {
        if let Some(f) = self.loaded_functions.iter().flatten().find(|f| &f.args == args) {
            return Some(f.function_id);
        }
        if let Some(f) = self.session.find_function_by_args(args) {
            return Some(f.function_id);
        }
        self.session.find_processing_function(args)
    }

    /// Load (or find) the type specialization named by `args`.
    ///
    /// The returned id is usable immediately: reference types publish their
    /// pointer before their fields exist, value types are laid out on the
    /// spot.
    pub(crate) fn load_type_internal(&mut self, args: LoadingArguments) -> Result<TypeId> {
        if let Some(existing) = self.find_existing_type(&args)? {
            return Ok(existing);
        }

        let template = self.find_type_template(&args)?;
        let mut exports = ConstraintExportList::new();
        if !self.check_type_generic_arguments(&template, &args, Some(&mut exports))? {
            return Err(Error::ConstraintCheckFailure(args.to_string()));
        }
        self.charge_loading_limit()?;

        let ty = RuntimeType {
            args: args.clone(),
            type_id: self.next_type_id(),
            storage: template.storage,
            fields: Vec::new(),
            size: 0,
            alignment: 1,
            base: None,
            interfaces: Vec::new(),
            virtual_table: Vec::new(),
            initializer: None,
            finalizer: None,
            static_storage: None,
            pointer_type: std::sync::OnceLock::new(),
            constraint_exports: exports,
        };

        match template.storage {
            StorageMode::Reference | StorageMode::Interface => {
                let id = ty.type_id;
                self.session.loading_ref_types.push_back(ty);
                Ok(id)
            }
            StorageMode::Value | StorageMode::Global => {
                self.session.loading_values.push(args);
                let result = self.load_fields(ty, Some(&template));
                let popped = self.session.loading_values.pop();
                debug_assert!(popped.is_some());
                result
            }
        }
    }

    /// Load (or find) the function specialization named by `args`. The
    /// pointer is available immediately; references resolve at post-load.
    pub(crate) fn load_function_internal(&mut self, args: LoadingArguments) -> Result<FunctionId> {
        if let Some(existing) = self.find_existing_function(&args) {
            return Ok(existing);
        }

        let template = self.find_function_template(&args)?;
        let mut exports = ConstraintExportList::new();
        if !self.check_function_generic_arguments(&template, &args, Some(&mut exports))? {
            return Err(Error::ConstraintCheckFailure(args.to_string()));
        }
        self.charge_loading_limit()?;

        let code = self.get_code(&args.assembly, args.id)?;
        let func = RuntimeFunction {
            args,
            function_id: self.next_function_id(),
            code,
            referenced_types: Vec::new(),
            referenced_functions: Vec::new(),
            return_type: None,
            parameters: Vec::new(),
            constraint_exports: exports,
        };
        let id = func.function_id;
        self.session.loading_functions.push_back(func);
        Ok(id)
    }

    /// Drain the worklists in priority order until everything created by the
    /// current request is finished.
    pub(crate) fn process_loading_lists(&mut self) -> Result<()> {
        if !self.session.loading_values.is_empty() {
            return Err(Error::Assertion(
                "value-loading stack not empty between drain phases".to_string(),
            ));
        }
        loop {
            // Each object stays findable through a processing marker while
            // the drain step owns it; self-references must keep resolving to
            // the same id.
            if let Some(ty) = self.session.loading_ref_types.pop_back() {
                self.session.processing_types.push(super::snapshot_of(&ty));
                let result = self.load_fields(ty, None);
                self.session.processing_types.pop();
                result?;
                debug_assert!(self.session.loading_values.is_empty());
                continue;
            }
            if let Some(ty) = self.session.post_loading_types.pop_back() {
                self.session.processing_types.push(super::snapshot_of(&ty));
                let result = self.post_load_type(ty);
                self.session.processing_types.pop();
                result?;
                debug_assert!(self.session.loading_values.is_empty());
                continue;
            }
            if let Some(func) = self.session.loading_functions.pop_back() {
                self.session
                    .processing_functions
                    .push((func.args.clone(), func.function_id));
                let result = self.post_load_function(func);
                self.session.processing_functions.pop();
                result?;
                debug_assert!(self.session.loading_values.is_empty());
                continue;
            }
            break;
        }
        Ok(())
    }

    /// Resolve a finished function's references, return and parameter types.
    fn post_load_function(&mut self, mut func: RuntimeFunction) -> Result<()> {
        let template = self.find_function_template(&func.args)?;

        let mut referenced_types = Vec::with_capacity(template.generic.types.len());
        let mut referenced_functions = Vec::with_capacity(template.generic.functions.len());
        {
            let ctx = RefListContext::for_function(&func, &template.generic);
            for index in 0..template.generic.types.len() {
                let entry = template.generic.types[index];
                let resolved = match entry.kind {
                    // List plumbing has no object behind it.
                    RefKind::ListEnd | RefKind::Segment => None,
                    _ => self.load_ref_type(&ctx, index)?,
                };
                referenced_types.push(resolved);
            }
            for index in 0..template.generic.functions.len() {
                let entry = template.generic.functions[index];
                let resolved = match entry.kind {
                    RefKind::ListEnd | RefKind::Segment | RefKind::CloneType => None,
                    _ => self.load_ref_function(&ctx, index)?,
                };
                referenced_functions.push(resolved);
            }
        }

        func.return_type = referenced_types
            .get(template.return_type)
            .copied()
            .ok_or_else(|| {
                Error::InvalidTypeReference(format!(
                    "return slot {} out of range",
                    template.return_type
                ))
            })?;
        func.parameters = template
            .parameters
            .iter()
            .map(|&p| {
                referenced_types.get(p).copied().ok_or_else(|| {
                    Error::InvalidTypeReference(format!("parameter slot {p} out of range"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        func.referenced_types = referenced_types;
        func.referenced_functions = referenced_functions;

        self.session.finished_functions.push_back(func);
        Ok(())
    }

    /// Final structural checks, observer notification and the atomic commit.
    pub(crate) fn move_finished_objects(&mut self) -> Result<()> {
        let finished_types: Vec<RuntimeType> = self.session.finished_types.drain(..).collect();
        let finished_functions: Vec<RuntimeFunction> =
            self.session.finished_functions.drain(..).collect();

        for ty in &finished_types {
            self.final_check_type(ty, &finished_functions)?;
        }

        if let Some(mut observer) = self.observer.take() {
            let hook_result: Result<()> = (|| {
                for ty in &finished_types {
                    observer.on_type_loaded(ty)?;
                }
                for func in &finished_functions {
                    observer.on_function_loaded(func)?;
                }
                Ok(())
            })();
            self.observer = Some(observer);
            hook_result?;
        }

        // Pointer specializations register themselves on their target once
        // the whole batch is in the table.
        let pointer_back_refs: Vec<(TypeId, TypeId)> = finished_types
            .iter()
            .filter(|t| self.is_pointer_specialization(&t.args))
            .map(|t| {
                t.args
                    .arguments
                    .get(0, 0)
                    .copied()
                    .map(|target| (target, t.type_id))
                    .ok_or_else(|| {
                        Error::Assertion("pointer specialization without argument".to_string())
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let committed_types = finished_types.len();
        let committed_functions = finished_functions.len();
        for ty in finished_types {
            set_slot(&mut self.loaded_types, ty.type_id.index(), Arc::new(ty))?;
        }
        for func in finished_functions {
            set_slot(
                &mut self.loaded_functions,
                func.function_id.index(),
                Arc::new(func),
            )?;
        }

        for (target, pointer) in pointer_back_refs {
            let target_rc = self.committed_type(target)?;
            if target_rc.pointer_type.set(pointer).is_err() {
                return Err(Error::Assertion(format!(
                    "pointer type of {target} assigned twice"
                )));
            }
        }

        if committed_types > 0 || committed_functions > 0 {
            tracing::debug!(types = committed_types, functions = committed_functions, "committed");
        }
        Ok(())
    }

    /// Initializer/finalizer shape checks, run when every function of the
    /// batch has its signature resolved.
    fn final_check_type(&self, ty: &RuntimeType, batch: &[RuntimeFunction]) -> Result<()> {
        if let Some(init) = ty.initializer {
            let func = self.batch_function(init, batch)?;
            if !func.parameters.is_empty() || func.return_type.is_some() {
                return Err(malformed_error!(
                    "initializer of {} must take nothing and return void",
                    ty.args
                ));
            }
        }
        if let Some(finalizer) = ty.finalizer {
            let func = self.batch_function(finalizer, batch)?;
            let self_param = func.parameters.len() == 1 && func.parameters[0] == Some(ty.type_id);
            if !self_param || func.return_type.is_some() {
                return Err(malformed_error!(
                    "finalizer of {} must take the owning type and return void",
                    ty.args
                ));
            }
        }
        Ok(())
    }

    fn batch_function<'a>(
        &'a self,
        id: FunctionId,
        batch: &'a [RuntimeFunction],
    ) -> Result<&'a RuntimeFunction> {
        if let Some(func) = batch.iter().find(|f| f.function_id == id) {
            return Ok(func);
        }
        self.loaded_functions
            .get(id.index())
            .and_then(|slot| slot.as_deref())
            .ok_or_else(|| Error::Assertion(format!("{id} is not a known function")))
    }
}

/// Grow-and-set helper for the committed tables; the slot must be empty.
fn set_slot<T>(table: &mut Vec<Option<T>>, index: usize, value: T) -> Result<()> {
    while table.len() <= index {
        table.push(None);
    }
    if table[index].is_some() {
        return Err(Error::Assertion(format!("table slot {index} already occupied")));
    }
    table[index] = Some(value);
    Ok(())
}
