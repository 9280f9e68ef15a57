//! The instantiation engine.
//!
//! [`RuntimeLoader`] is the public entry point: it owns the immutable
//! assembly collection, the committed type/function tables and the shared
//! code storage, all behind one coarse lock. Each API call runs the loading
//! pipeline to completion and commits the whole object graph of that call
//! atomically - or discards it entirely on the first error.
//!
//! # Modules
//! - `session` - worklists of the current pipeline run
//! - `pipeline` - the multi-stage loading state machine
//! - `reflist` - the reference-list evaluator
//! - `layout` - field layout, virtual tables and static storage
//! - `code` - shared bytecode records and import constants
//! - `native` - host-provided value types
//! - `constraint` - the generic-constraint solver
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use lodestone::{LoadingArguments, RuntimeLoader};
//!
//! # fn assemblies() -> Vec<lodestone::Assembly> { Vec::new() }
//! let loader = RuntimeLoader::new(assemblies());
//! let int32 = loader.add_native_type("Core", "Core.Int32", 4, 4)?;
//! let pointer = loader.load_pointer_type(&int32)?;
//! assert_eq!(pointer.size, std::mem::size_of::<usize>());
//! # Ok::<(), lodestone::Error>(())
//! ```

pub(crate) mod code;
pub(crate) mod constraint;
pub(crate) mod layout;
pub(crate) mod native;
pub(crate) mod pipeline;
pub(crate) mod reflist;
pub(crate) mod session;

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::{
    metadata::{
        assembly::{Assembly, AssemblyRegistry},
        generics::MultiList,
        template::{FunctionTemplateRc, StorageMode, TypeTemplate, TypeTemplateRc},
    },
    runtime::{
        functions::{RuntimeFunction, RuntimeFunctionCode, RuntimeFunctionRc},
        types::{RuntimeFieldInfo, RuntimeType, RuntimeTypeRc},
        ConstraintExportList, FunctionId, LoadingArguments, TypeId,
    },
    Error, Result,
};

use session::LoadingSession;

/// Name of the assembly holding the intrinsic templates.
pub const CORE_ASSEMBLY: &str = "Core";
/// Export name of the pointer intrinsic.
pub const POINTER_EXPORT: &str = "Core.Pointer";
/// Export name of the box intrinsic.
pub const BOX_EXPORT: &str = "Core.Box";

/// Default per-call object budget.
pub const DEFAULT_LOADING_LIMIT: usize = 4096;

/// Configuration of a [`RuntimeLoader`].
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    /// Width of a reference field in bytes; defaults to the host pointer width.
    pub pointer_size: usize,
    /// Maximum number of objects a single API call may create.
    pub loading_limit: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            pointer_size: std::mem::size_of::<usize>(),
            loading_limit: DEFAULT_LOADING_LIMIT,
        }
    }
}

/// Commit-time notification hooks.
///
/// The observer is invoked for every object of a run right before the run
/// commits; an error from a hook aborts the commit and discards the run's
/// objects, exactly like any other loading failure.
pub trait LoaderObserver: Send {
    /// Called for each type about to be committed.
    ///
    /// # Errors
    /// Returning an error aborts the commit.
    fn on_type_loaded(&mut self, loaded: &RuntimeType) -> Result<()> {
        let _ = loaded;
        Ok(())
    }

    /// Called for each function about to be committed.
    ///
    /// # Errors
    /// Returning an error aborts the commit.
    fn on_function_loaded(&mut self, loaded: &RuntimeFunction) -> Result<()> {
        let _ = loaded;
        Ok(())
    }
}

/// A copied-out view of a type that may still be travelling through the
/// pipeline.
///
/// Snapshots break the borrow between the session's worklists and the loader
/// methods that need to read a dependency while creating more objects.
#[derive(Debug, Clone)]
pub(crate) struct TypeSnapshot {
    pub id: TypeId,
    pub args: LoadingArguments,
    pub storage: StorageMode,
    pub size: usize,
    pub alignment: usize,
    pub base: Option<TypeId>,
    pub fields: Vec<RuntimeFieldInfo>,
    pub interfaces: Vec<TypeId>,
    pub exports: ConstraintExportList,
}

/// Everything the loader owns, guarded by the public lock.
pub(crate) struct LoaderCore {
    pub(crate) assemblies: AssemblyRegistry,
    pub(crate) options: LoaderOptions,
    pub(crate) observer: Option<Box<dyn LoaderObserver + Send>>,

    pub(crate) loaded_types: Vec<Option<RuntimeTypeRc>>,
    pub(crate) loaded_functions: Vec<Option<RuntimeFunctionRc>>,
    pub(crate) code_storage: FxHashMap<(String, usize), Arc<RuntimeFunctionCode>>,

    pub(crate) next_type_id: u32,
    pub(crate) next_function_id: u32,

    pub(crate) pointer_template: Option<usize>,
    pub(crate) box_template: Option<usize>,

    pub(crate) session: LoadingSession,
}

impl LoaderCore {
    fn new(assemblies: Vec<Assembly>, options: LoaderOptions, observer: Option<Box<dyn LoaderObserver + Send>>) -> Self {
        let registry = AssemblyRegistry::new(assemblies);
        let (pointer_template, box_template) = find_intrinsic_templates(&registry);
        LoaderCore {
            assemblies: registry,
            options,
            observer,
            loaded_types: Vec::new(),
            loaded_functions: Vec::new(),
            code_storage: FxHashMap::default(),
            next_type_id: 1,
            next_function_id: 1,
            pointer_template,
            box_template,
            session: LoadingSession::default(),
        }
    }

    /// Fetch the template behind a loading request.
    pub(crate) fn find_type_template(&self, args: &LoadingArguments) -> Result<TypeTemplateRc> {
        self.assemblies.type_template(&args.assembly, args.id)
    }

    /// Fetch the function template behind a loading request.
    pub(crate) fn find_function_template(&self, args: &LoadingArguments) -> Result<FunctionTemplateRc> {
        self.assemblies.function_template(&args.assembly, args.id)
    }

    /// Allocate the next type id.
    pub(crate) fn next_type_id(&mut self) -> TypeId {
        let id = TypeId(self.next_type_id);
        self.next_type_id += 1;
        id
    }

    /// Allocate the next function id.
    pub(crate) fn next_function_id(&mut self) -> FunctionId {
        let id = FunctionId(self.next_function_id);
        self.next_function_id += 1;
        id
    }

    /// Charge one created object against the per-call budget.
    pub(crate) fn charge_loading_limit(&mut self) -> Result<()> {
        self.session.created_objects += 1;
        if self.session.created_objects > self.options.loading_limit {
            return Err(Error::LoadingLimitExceeded(self.options.loading_limit));
        }
        Ok(())
    }

    /// Whether the request names the pointer intrinsic.
    pub(crate) fn is_pointer_specialization(&self, args: &LoadingArguments) -> bool {
        args.assembly == CORE_ASSEMBLY && Some(args.id) == self.pointer_template
    }

    /// A committed type by id.
    pub(crate) fn committed_type(&self, id: TypeId) -> Result<RuntimeTypeRc> {
        self.loaded_types
            .get(id.index())
            .and_then(Clone::clone)
            .ok_or_else(|| Error::Assertion(format!("{id} missing from the committed table")))
    }

    /// A committed function by id.
    pub(crate) fn committed_function(&self, id: FunctionId) -> Result<RuntimeFunctionRc> {
        self.loaded_functions
            .get(id.index())
            .and_then(Clone::clone)
            .ok_or_else(|| Error::Assertion(format!("{id} missing from the committed table")))
    }

    /// Copy out the state of a committed or in-flight type.
    pub(crate) fn type_snapshot(&self, id: TypeId) -> Option<TypeSnapshot> {
        if let Some(t) = self.loaded_types.get(id.index()).and_then(|slot| slot.as_ref()) {
            return Some(snapshot_of(t));
        }
        if let Some(t) = self.session.find_type_by_id(id) {
            return Some(snapshot_of(t));
        }
        self.session.find_processing_type_by_id(id).cloned()
    }

    /// Copy out the state of a committed or in-flight type, failing on a
    /// dangling id (a loader bug).
    pub(crate) fn type_snapshot_or_err(&self, id: TypeId) -> Result<TypeSnapshot> {
        self.type_snapshot(id)
            .ok_or_else(|| Error::Assertion(format!("{id} is not a known type")))
    }
}

pub(crate) fn snapshot_of(t: &RuntimeType) -> TypeSnapshot {
    TypeSnapshot {
        id: t.type_id,
        args: t.args.clone(),
        storage: t.storage,
        size: t.size,
        alignment: t.alignment,
        base: t.base,
        fields: t.fields.clone(),
        interfaces: t.interfaces.iter().map(|i| i.interface_type).collect(),
        exports: t.constraint_exports.clone(),
    }
}

fn check_pointer_template(template: &TypeTemplate) -> bool {
    template.generic.parameter_count.is_single() && template.storage == StorageMode::Value
}

fn check_box_template(template: &TypeTemplate) -> bool {
    template.generic.parameter_count.is_single() && template.storage == StorageMode::Reference
}

/// Locate the intrinsic templates in the `Core` assembly.
///
/// A missing or malformed intrinsic is not an error here; the corresponding
/// slot stays empty and the failure surfaces when the intrinsic is first
/// requested.
fn find_intrinsic_templates(registry: &AssemblyRegistry) -> (Option<usize>, Option<usize>) {
    let mut pointer = None;
    let mut boxed = None;
    let Some(core) = registry.find(CORE_ASSEMBLY) else {
        return (pointer, boxed);
    };
    for e in &core.export_types {
        if e.name == POINTER_EXPORT {
            let suitable = core
                .types
                .get(e.internal_id)
                .is_some_and(|t| check_pointer_template(t));
            if !suitable || pointer.is_some() {
                return (pointer, boxed);
            }
            pointer = Some(e.internal_id);
        } else if e.name == BOX_EXPORT {
            let suitable = core
                .types
                .get(e.internal_id)
                .is_some_and(|t| check_box_template(t));
            if !suitable || boxed.is_some() {
                return (pointer, boxed);
            }
            boxed = Some(e.internal_id);
        }
    }
    (pointer, boxed)
}

/// The runtime loader.
///
/// Holds the immutable assembly collection and the tables of committed
/// objects. All entry points serialize on one internal lock; two concurrent
/// callers observe each other's results either fully committed or not at all.
pub struct RuntimeLoader {
    core: Mutex<LoaderCore>,
}

impl RuntimeLoader {
    /// Create a loader over the given assemblies with default options.
    #[must_use]
    pub fn new(assemblies: Vec<Assembly>) -> Self {
        Self::with_options(assemblies, LoaderOptions::default())
    }

    /// Create a loader with explicit options.
    #[must_use]
    pub fn with_options(assemblies: Vec<Assembly>, options: LoaderOptions) -> Self {
        RuntimeLoader {
            core: Mutex::new(LoaderCore::new(assemblies, options, None)),
        }
    }

    /// Create a loader with explicit options and a commit observer.
    #[must_use]
    pub fn with_observer(
        assemblies: Vec<Assembly>,
        options: LoaderOptions,
        observer: Box<dyn LoaderObserver + Send>,
    ) -> Self {
        RuntimeLoader {
            core: Mutex::new(LoaderCore::new(assemblies, options, Some(observer))),
        }
    }

    /// Load the specialization named by `args`, or return the cached object.
    ///
    /// # Errors
    /// Returns an error if any dependency of the request fails to load; in
    /// that case nothing is committed.
    pub fn get_type(&self, args: &LoadingArguments) -> Result<RuntimeTypeRc> {
        let mut core = self.core.lock();
        if let Some(existing) = core.loaded_types.iter().flatten().find(|t| &t.args == args) {
            return Ok(existing.clone());
        }
        let id = core.run_type_pipeline(args)?;
        core.committed_type(id)
    }

    /// Load the function specialization named by `args`, or return the cached
    /// object.
    ///
    /// # Errors
    /// Returns an error if any dependency of the request fails to load; in
    /// that case nothing is committed.
    pub fn get_function(&self, args: &LoadingArguments) -> Result<RuntimeFunctionRc> {
        let mut core = self.core.lock();
        if let Some(existing) = core.loaded_functions.iter().flatten().find(|f| &f.args == args) {
            return Ok(existing.clone());
        }
        let id = core.run_function_pipeline(args)?;
        core.committed_function(id)
    }

    /// A committed type by id, `None` when out of range.
    #[must_use]
    pub fn get_type_by_id(&self, id: TypeId) -> Option<RuntimeTypeRc> {
        let core = self.core.lock();
        core.loaded_types.get(id.index()).and_then(Clone::clone)
    }

    /// A committed function by id, `None` when out of range.
    #[must_use]
    pub fn get_function_by_id(&self, id: FunctionId) -> Option<RuntimeFunctionRc> {
        let core = self.core.lock();
        core.loaded_functions.get(id.index()).and_then(Clone::clone)
    }

    /// The internal id behind an exported type name, without following
    /// re-export chains.
    #[must_use]
    pub fn find_export_type(&self, assembly: &str, name: &str) -> Option<usize> {
        let core = self.core.lock();
        let a = core.assemblies.find(assembly)?;
        AssemblyRegistry::find_export_id(&a.export_types, name)
    }

    /// The internal id behind an exported function name.
    #[must_use]
    pub fn find_export_function(&self, assembly: &str, name: &str) -> Option<usize> {
        let core = self.core.lock();
        let a = core.assemblies.find(assembly)?;
        AssemblyRegistry::find_export_id(&a.export_functions, name)
    }

    /// Install a host-provided value type.
    ///
    /// The named slot of the assembly's native-type table must refer to a
    /// non-generic value-type template without initializer or finalizer; the
    /// object commits immediately, bypassing the pipeline.
    ///
    /// # Errors
    /// Returns an error if the slot is missing or the template is unsuitable.
    pub fn add_native_type(
        &self,
        assembly: &str,
        name: &str,
        size: usize,
        alignment: usize,
    ) -> Result<RuntimeTypeRc> {
        let mut core = self.core.lock();
        core.add_native_type_internal(assembly, name, size, alignment)
    }

    /// Load `Core.Pointer<T>` for the given committed type.
    ///
    /// # Errors
    /// Returns an error if the pointer intrinsic is absent or the load fails.
    pub fn load_pointer_type(&self, target: &RuntimeTypeRc) -> Result<RuntimeTypeRc> {
        let mut core = self.core.lock();
        if let Some(&existing) = target.pointer_type.get() {
            return core.committed_type(existing);
        }
        let Some(template_id) = core.pointer_template else {
            return Err(Error::InvalidIntrinsic(
                "Core.Pointer template is absent or malformed".to_string(),
            ));
        };
        let args = LoadingArguments::with_arguments(
            CORE_ASSEMBLY,
            template_id,
            MultiList::single(target.type_id),
        );
        if let Some(existing) = core.loaded_types.iter().flatten().find(|t| t.args == args) {
            return Ok(existing.clone());
        }
        let id = core.run_type_pipeline(&args)?;
        core.committed_type(id)
    }

    /// Load `Core.Box<T>` for the given committed type.
    ///
    /// # Errors
    /// Returns an error if the box intrinsic is absent or the load fails.
    pub fn load_box_type(&self, target: &RuntimeTypeRc) -> Result<RuntimeTypeRc> {
        let mut core = self.core.lock();
        let Some(template_id) = core.box_template else {
            return Err(Error::InvalidIntrinsic(
                "Core.Box template is absent or malformed".to_string(),
            ));
        };
        let args = LoadingArguments::with_arguments(
            CORE_ASSEMBLY,
            template_id,
            MultiList::single(target.type_id),
        );
        if let Some(existing) = core.loaded_types.iter().flatten().find(|t| t.args == args) {
            return Ok(existing.clone());
        }
        let id = core.run_type_pipeline(&args)?;
        core.committed_type(id)
    }

    /// Number of committed types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.core.lock().loaded_types.iter().flatten().count()
    }

    /// Number of committed functions.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.core.lock().loaded_functions.iter().flatten().count()
    }
}
