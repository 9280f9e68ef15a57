//! End-to-end pipeline tests: layout, cycles, intrinsics, natives, code
//! records and commit atomicity.

mod common;

use common::*;
use lodestone::prelude::*;
use lodestone::{Error, LoaderObserver, LoaderOptions, RuntimeLoader};

fn loader_with(app: Assembly) -> RuntimeLoader {
    RuntimeLoader::new(vec![core_assembly(), app])
}

#[test]
fn test_native_type_install() {
    let loader = RuntimeLoader::new(vec![core_assembly()]);
    let (int32, int64, uint8) = install_natives(&loader);

    assert_eq!(int32.size, 4);
    assert_eq!(int32.alignment, 4);
    assert_eq!(int64.size, 8);
    assert_eq!(uint8.size, 1);
    assert_eq!(loader.type_count(), 3);

    // Installing resolves through the native-type table, not the exports.
    assert!(matches!(
        loader.add_native_type("Core", "Core.Missing", 4, 4),
        Err(Error::LinkageFailure(_))
    ));
    // The pointer intrinsic is generic and therefore not installable.
    assert!(matches!(
        loader.add_native_type("Core", "Core.Pointer", 8, 8),
        Err(Error::LinkageFailure(_))
    ));
}

#[test]
fn test_native_type_rejects_unsuitable_templates() {
    let mut core = AssemblyBuilder::new("Core");
    let mut generic = TypeTemplate::new(StorageMode::Value);
    generic.generic.parameter_count = ParamCountList::fixed(1);
    let generic_id = core.add_type(generic);
    let reference_id = core.add_type(TypeTemplate::new(StorageMode::Reference));
    core.native_type("Generic", generic_id);
    core.native_type("Reference", reference_id);

    let loader = RuntimeLoader::new(vec![core.build()]);
    assert!(matches!(
        loader.add_native_type("Core", "Generic", 4, 4),
        Err(Error::NativeTypeUnsuitable(_))
    ));
    assert!(matches!(
        loader.add_native_type("Core", "Reference", 4, 4),
        Err(Error::NativeTypeUnsuitable(_))
    ));
}

#[test]
fn test_struct_layout_pair() {
    // struct Pair { i32 a; i64 b; } -> offsets {0, 8}, size 16, alignment 8
    let mut app = AssemblyBuilder::new("App");
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));
    let i64_import = app.import_type("Core", "Core.Int64", Some(0));
    let mut pair = TypeTemplate::new(StorageMode::Value);
    import_field(&mut pair, i32_import);
    import_field(&mut pair, i64_import);
    let pair_id = app.add_type(pair);

    let loader = loader_with(app.build());
    let (int32, int64, _) = install_natives(&loader);

    let pair = loader.get_type(&LoadingArguments::new("App", pair_id)).unwrap();
    assert_eq!(pair.fields.len(), 2);
    assert_eq!(pair.fields[0].offset, 0);
    assert_eq!(pair.fields[0].length, 4);
    assert_eq!(pair.fields[0].field_type, int32.type_id);
    assert_eq!(pair.fields[1].offset, 8);
    assert_eq!(pair.fields[1].length, 8);
    assert_eq!(pair.fields[1].field_type, int64.type_id);
    assert_eq!(pair.size, 16);
    assert_eq!(pair.alignment, 8);
}

#[test]
fn test_struct_layout_interior_padding() {
    // struct { u8 a; i32 b; u8 c; } -> offsets {0, 4, 8}, size 9, alignment 4
    let mut app = AssemblyBuilder::new("App");
    let u8_import = app.import_type("Core", "Core.UInt8", Some(0));
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));
    let mut mixed = TypeTemplate::new(StorageMode::Value);
    import_field(&mut mixed, u8_import);
    import_field(&mut mixed, i32_import);
    import_field(&mut mixed, u8_import);
    let mixed_id = app.add_type(mixed);

    let loader = loader_with(app.build());
    install_natives(&loader);

    let mixed = loader.get_type(&LoadingArguments::new("App", mixed_id)).unwrap();
    let offsets: Vec<usize> = mixed.fields.iter().map(|f| f.offset).collect();
    assert_eq!(offsets, vec![0, 4, 8]);
    assert_eq!(mixed.size, 9);
    assert_eq!(mixed.alignment, 4);

    // Every offset is a multiple of its field's alignment.
    for field in &mixed.fields {
        let field_type = loader.get_type_by_id(field.field_type).unwrap();
        assert_eq!(field.offset % field_type.alignment, 0);
    }
}

#[test]
fn test_empty_value_type_minimum_size() {
    let mut app = AssemblyBuilder::new("App");
    let empty_id = app.add_type(TypeTemplate::new(StorageMode::Value));

    let loader = loader_with(app.build());
    let empty = loader.get_type(&LoadingArguments::new("App", empty_id)).unwrap();
    assert_eq!(empty.size, 1);
    assert_eq!(empty.alignment, 1);
    assert!(empty.fields.is_empty());
}

#[test]
fn test_idempotent_loading() {
    let mut app = AssemblyBuilder::new("App");
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));
    let mut holder = TypeTemplate::new(StorageMode::Value);
    import_field(&mut holder, i32_import);
    let holder_id = app.add_type(holder);

    let loader = loader_with(app.build());
    install_natives(&loader);
    let before = loader.type_count();

    let request = LoadingArguments::new("App", holder_id);
    let first = loader.get_type(&request).unwrap();
    let after_first = loader.type_count();
    let second = loader.get_type(&request).unwrap();

    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(after_first, before + 1);
    assert_eq!(loader.type_count(), after_first);
}

#[test]
fn test_recursive_reference_list() {
    // class List<T> { T head; List<T> tail; } with T = i32
    let mut app = AssemblyBuilder::new("App");
    let mut list = TypeTemplate::new(StorageMode::Reference);
    list.generic.parameter_count = ParamCountList::fixed(1);
    argument_field(&mut list, 0);
    let list_id = 0;
    local_field(&mut list, list_id, &[(RefKind::Argument, 0)]);
    assert_eq!(app.add_type(list), list_id);

    let loader = loader_with(app.build());
    let (int32, _, _) = install_natives(&loader);

    let request =
        LoadingArguments::with_arguments("App", list_id, MultiList::single(int32.type_id));
    let list = loader.get_type(&request).unwrap();

    assert_eq!(list.fields.len(), 2);
    // head: inline i32
    assert_eq!(list.fields[0].offset, 0);
    assert_eq!(list.fields[0].length, 4);
    // tail: the list itself, stored as one pointer at pointer alignment
    assert_eq!(list.fields[1].field_type, list.type_id);
    assert_eq!(list.fields[1].offset, ptr());
    assert_eq!(list.fields[1].length, ptr());
    assert_eq!(list.size, 2 * ptr());
}

#[test]
fn test_value_cycle_detected() {
    // struct Direct { Direct inner; }
    let mut app = AssemblyBuilder::new("App");
    let mut direct = TypeTemplate::new(StorageMode::Value);
    local_field(&mut direct, 0, &[]);
    assert_eq!(app.add_type(direct), 0);

    let loader = loader_with(app.build());
    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", 0)),
        Err(Error::CyclicDependence(_))
    ));
}

#[test]
fn test_value_cycle_detected_transitively() {
    // struct A { B b; }  struct B { A a; }
    let mut app = AssemblyBuilder::new("App");
    let mut a = TypeTemplate::new(StorageMode::Value);
    local_field(&mut a, 1, &[]);
    let mut b = TypeTemplate::new(StorageMode::Value);
    local_field(&mut b, 0, &[]);
    assert_eq!(app.add_type(a), 0);
    assert_eq!(app.add_type(b), 1);

    let loader = loader_with(app.build());
    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", 0)),
        Err(Error::CyclicDependence(_))
    ));
}

#[test]
fn test_reference_cycle_loads() {
    // class Node { Node next; }
    let mut app = AssemblyBuilder::new("App");
    let mut node = TypeTemplate::new(StorageMode::Reference);
    local_field(&mut node, 0, &[]);
    assert_eq!(app.add_type(node), 0);

    let loader = loader_with(app.build());
    let node = loader.get_type(&LoadingArguments::new("App", 0)).unwrap();
    assert_eq!(node.fields.len(), 1);
    assert_eq!(node.fields[0].field_type, node.type_id);
    assert_eq!(node.fields[0].length, ptr());
    assert_eq!(node.size, ptr());
}

#[test]
fn test_pointer_intrinsic() {
    let loader = RuntimeLoader::new(vec![core_assembly()]);
    let (int32, _, _) = install_natives(&loader);

    let pointer = loader.load_pointer_type(&int32).unwrap();
    assert_eq!(pointer.size, ptr());
    assert_eq!(pointer.alignment, ptr());
    assert_eq!(pointer.storage, StorageMode::Value);
    assert!(pointer.fields.is_empty());

    // The back-reference is set at commit time, exactly once.
    assert_eq!(int32.pointer_type.get(), Some(&pointer.type_id));
    let again = loader.load_pointer_type(&int32).unwrap();
    assert!(std::sync::Arc::ptr_eq(&pointer, &again));
}

#[test]
fn test_pointer_intrinsic_missing() {
    let mut core = AssemblyBuilder::new("Core");
    let id = core.add_type(TypeTemplate::new(StorageMode::Value));
    core.native_type("Core.Int32", id);

    let loader = RuntimeLoader::new(vec![core.build()]);
    let int32 = loader.add_native_type("Core", "Core.Int32", 4, 4).unwrap();
    assert!(matches!(
        loader.load_pointer_type(&int32),
        Err(Error::InvalidIntrinsic(_))
    ));
}

#[test]
fn test_box_intrinsic_wraps_value() {
    let loader = RuntimeLoader::new(vec![core_assembly()]);
    let (int32, _, _) = install_natives(&loader);

    let boxed = loader.load_box_type(&int32).unwrap();
    assert_eq!(boxed.storage, StorageMode::Reference);
    assert_eq!(boxed.fields.len(), 1);
    assert_eq!(boxed.fields[0].field_type, int32.type_id);
    assert_eq!(boxed.size, 4);

    // The convenience accessor and a direct request agree.
    let request = LoadingArguments::with_arguments("Core", BOX, MultiList::single(int32.type_id));
    let direct = loader.get_type(&request).unwrap();
    assert!(std::sync::Arc::ptr_eq(&boxed, &direct));
}

#[test]
fn test_global_type_static_storage() {
    let mut app = AssemblyBuilder::new("App");
    let i64_import = app.import_type("Core", "Core.Int64", Some(0));
    let mut counter = TypeTemplate::new(StorageMode::Global);
    import_field(&mut counter, i64_import);
    let counter_id = app.add_type(counter);

    let loader = loader_with(app.build());
    install_natives(&loader);

    let counter = loader.get_type(&LoadingArguments::new("App", counter_id)).unwrap();
    assert_eq!(counter.size, 8);
    let storage = counter.static_storage.as_ref().unwrap();
    assert_eq!(storage.len(), 8);
    assert_eq!(storage.as_ptr() as usize % counter.alignment, 0);
}

#[test]
fn test_initializer_only_on_global_types() {
    // A value type declaring an initializer is malformed.
    let mut app = AssemblyBuilder::new("App");
    let init_fn = app.add_function(FunctionTemplate::new());
    let mut bad = TypeTemplate::new(StorageMode::Value);
    bad.initializer = local_function_ref(&mut bad.generic, init_fn);
    let bad_id = app.add_type(bad);

    let mut good = TypeTemplate::new(StorageMode::Global);
    good.initializer = local_function_ref(&mut good.generic, init_fn);
    let good_id = app.add_type(good);

    let loader = loader_with(app.build());
    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", bad_id)),
        Err(Error::Malformed { .. })
    ));
    let good = loader.get_type(&LoadingArguments::new("App", good_id)).unwrap();
    assert!(good.initializer.is_some());
}

#[test]
fn test_finalizer_shape_checked() {
    let mut app = AssemblyBuilder::new("App");

    // fn finalize(Node) -> void
    let mut finalize = FunctionTemplate::new();
    let self_ref = type_entry(&mut finalize.generic, RefKind::Assembly, 0);
    type_entry(&mut finalize.generic, RefKind::ListEnd, 0);
    finalize.parameters = vec![self_ref];
    let finalize_id = app.add_function(finalize);

    let mut node = TypeTemplate::new(StorageMode::Reference);
    node.finalizer = local_function_ref(&mut node.generic, finalize_id);
    assert_eq!(app.add_type(node), 0);

    // A finalizer that takes no argument is rejected.
    let bad_finalize_id = app.add_function(FunctionTemplate::new());
    let mut bad = TypeTemplate::new(StorageMode::Reference);
    bad.finalizer = local_function_ref(&mut bad.generic, bad_finalize_id);
    let bad_id = app.add_type(bad);

    let loader = loader_with(app.build());
    let node = loader.get_type(&LoadingArguments::new("App", 0)).unwrap();
    let finalizer = loader.get_function_by_id(node.finalizer.unwrap()).unwrap();
    assert_eq!(finalizer.parameters, vec![Some(node.type_id)]);
    assert_eq!(finalizer.return_type, None);

    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", bad_id)),
        Err(Error::Malformed { .. })
    ));
}

#[test]
fn test_virtual_table_override() {
    let mut app = AssemblyBuilder::new("App");

    // Slot declaration plus one implementation per class.
    let slot_fn = app.add_function(FunctionTemplate::new());
    let base_impl_fn = {
        let mut f = FunctionTemplate::new();
        f.instructions = vec![0x01];
        app.add_function(f)
    };
    let derived_impl_fn = {
        let mut f = FunctionTemplate::new();
        f.instructions = vec![0x02];
        app.add_function(f)
    };

    let mut base = TypeTemplate::new(StorageMode::Reference);
    let base_slot_ref = local_function_ref(&mut base.generic, slot_fn);
    let base_impl_ref = local_function_ref(&mut base.generic, base_impl_fn);
    base.base.virtual_functions.push(VirtualFunctionEntry {
        name: "greet".to_string(),
        virtual_function: base_slot_ref,
        implementation: base_impl_ref,
    });
    let base_id = app.add_type(base);

    let mut derived = TypeTemplate::new(StorageMode::Reference);
    let parent_ref = type_entry(&mut derived.generic, RefKind::Assembly, base_id);
    type_entry(&mut derived.generic, RefKind::ListEnd, 0);
    derived.base.inherited = parent_ref;
    let derived_slot_ref = local_function_ref(&mut derived.generic, slot_fn);
    let derived_impl_ref = local_function_ref(&mut derived.generic, derived_impl_fn);
    derived.base.virtual_functions.push(VirtualFunctionEntry {
        name: "greet".to_string(),
        virtual_function: derived_slot_ref,
        implementation: derived_impl_ref,
    });
    let derived_id = app.add_type(derived);

    let loader = loader_with(app.build());
    let derived = loader.get_type(&LoadingArguments::new("App", derived_id)).unwrap();
    let base = loader
        .get_type(&LoadingArguments::new("App", base_id))
        .unwrap();

    assert_eq!(base.virtual_table.len(), 1);
    assert_eq!(derived.virtual_table.len(), 1);
    // Same slot, overridden implementation.
    assert_eq!(derived.virtual_table[0].slot, base.virtual_table[0].slot);
    assert_ne!(
        derived.virtual_table[0].implementation,
        base.virtual_table[0].implementation
    );
    assert_eq!(derived.base, Some(base.type_id));

    let implementation = loader
        .get_function_by_id(derived.virtual_table[0].implementation)
        .unwrap();
    assert_eq!(implementation.code.as_ref().unwrap().instructions[0], 0x02);
}

#[test]
fn test_atomic_failure_commits_nothing() {
    let mut app = AssemblyBuilder::new("App");
    // Broken { Fine fine; Missing missing; } where template 99 does not exist.
    let mut fine = TypeTemplate::new(StorageMode::Value);
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));
    import_field(&mut fine, i32_import);
    let fine_id = app.add_type(fine);

    let mut broken = TypeTemplate::new(StorageMode::Value);
    local_field(&mut broken, fine_id, &[]);
    local_field(&mut broken, 99, &[]);
    let broken_id = app.add_type(broken);

    let loader = loader_with(app.build());
    install_natives(&loader);
    let before = loader.type_count();

    let result = loader.get_type(&LoadingArguments::new("App", broken_id));
    assert!(matches!(result, Err(Error::InvalidTypeReference(_))));
    // The dependency that did load in that run is discarded with it.
    assert_eq!(loader.type_count(), before);

    // The clean dependency still loads on its own afterwards.
    assert!(loader.get_type(&LoadingArguments::new("App", fine_id)).is_ok());
}

#[test]
fn test_loading_limit() {
    // chain: A { B } , B { C }, C {}
    let mut app = AssemblyBuilder::new("App");
    let mut a = TypeTemplate::new(StorageMode::Value);
    local_field(&mut a, 1, &[]);
    let mut b = TypeTemplate::new(StorageMode::Value);
    local_field(&mut b, 2, &[]);
    assert_eq!(app.add_type(a), 0);
    assert_eq!(app.add_type(b), 1);
    assert_eq!(app.add_type(TypeTemplate::new(StorageMode::Value)), 2);

    let loader = RuntimeLoader::with_options(
        vec![core_assembly(), app.build()],
        LoaderOptions {
            loading_limit: 2,
            ..LoaderOptions::default()
        },
    );
    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", 0)),
        Err(Error::LoadingLimitExceeded(2))
    ));
    // Within the budget the same chain loads.
    assert!(loader.get_type(&LoadingArguments::new("App", 1)).is_ok());
}

#[test]
fn test_function_code_padding_and_import_constants() {
    let mut app = AssemblyBuilder::new("App");
    let answer = app.import_constant("Core", "Answer");

    let mut compute = FunctionTemplate::new();
    compute.instructions = vec![1, 2, 3];
    compute.constant_data = vec![0xAA];
    compute.constant_table = vec![lodestone::metadata::template::FunctionConst {
        offset: answer,
        length: 0,
    }];
    let compute_id = app.add_function(compute);

    let loader = loader_with(app.build());
    let compute = loader
        .get_function(&LoadingArguments::new("App", compute_id))
        .unwrap();

    let code = compute.code.as_ref().unwrap();
    assert_eq!(code.instructions.len(), 3 + 16);
    assert_eq!(&code.instructions[..3], &[1, 2, 3]);
    assert!(code.instructions[3..].iter().all(|&b| b == 0));

    // The import slot was materialized into four fresh little-endian bytes.
    assert_eq!(code.constant_table[0].offset, 1);
    assert_eq!(code.constant_table[0].length, 4);
    assert_eq!(&code.constant_data[1..], &42u32.to_le_bytes());

    assert_eq!(compute.return_type, None);
}

#[test]
fn test_generic_function_shares_code() {
    let mut app = AssemblyBuilder::new("App");
    let mut identity = FunctionTemplate::new();
    identity.generic.parameter_count = ParamCountList::fixed(1);
    let t_ref = type_entry(&mut identity.generic, RefKind::Argument, 0);
    identity.return_type = t_ref;
    identity.parameters = vec![t_ref];
    identity.instructions = vec![9];
    let identity_id = app.add_function(identity);

    let loader = loader_with(app.build());
    let (int32, int64, _) = install_natives(&loader);

    let of_i32 = loader
        .get_function(&LoadingArguments::with_arguments(
            "App",
            identity_id,
            MultiList::single(int32.type_id),
        ))
        .unwrap();
    let of_i64 = loader
        .get_function(&LoadingArguments::with_arguments(
            "App",
            identity_id,
            MultiList::single(int64.type_id),
        ))
        .unwrap();

    assert_ne!(of_i32.function_id, of_i64.function_id);
    assert_eq!(of_i32.return_type, Some(int32.type_id));
    assert_eq!(of_i64.return_type, Some(int64.type_id));
    assert_eq!(of_i64.parameters, vec![Some(int64.type_id)]);
    assert!(std::sync::Arc::ptr_eq(
        of_i32.code.as_ref().unwrap(),
        of_i64.code.as_ref().unwrap()
    ));
}

#[test]
fn test_export_lookup() {
    let loader = RuntimeLoader::new(vec![core_assembly()]);
    assert_eq!(loader.find_export_type("Core", "Core.Int32"), Some(I32));
    assert_eq!(loader.find_export_type("Core", "Core.Pointer"), Some(POINTER));
    assert_eq!(loader.find_export_type("Core", "Nope"), None);
    assert_eq!(loader.find_export_type("Missing", "Core.Int32"), None);
    assert_eq!(loader.find_export_function("Core", "anything"), None);
}

#[test]
fn test_get_by_id_out_of_range() {
    let loader = RuntimeLoader::new(vec![core_assembly()]);
    assert!(loader.get_type_by_id(TypeId(0)).is_none());
    assert!(loader.get_type_by_id(TypeId(500)).is_none());
    assert!(loader.get_function_by_id(FunctionId(500)).is_none());

    let (int32, _, _) = install_natives(&loader);
    let found = loader.get_type_by_id(int32.type_id).unwrap();
    assert!(std::sync::Arc::ptr_eq(&int32, &found));
}

struct RecordingObserver {
    fail_types: bool,
    seen: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl LoaderObserver for RecordingObserver {
    fn on_type_loaded(&mut self, loaded: &RuntimeType) -> lodestone::Result<()> {
        if self.fail_types {
            return Err(Error::Assertion("rejected by observer".to_string()));
        }
        self.seen.lock().unwrap().push(loaded.args.to_string());
        Ok(())
    }
}

#[test]
fn test_observer_sees_commits() {
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let observer = RecordingObserver {
        fail_types: false,
        seen: seen.clone(),
    };
    let mut app = AssemblyBuilder::new("App");
    let id = app.add_type(TypeTemplate::new(StorageMode::Value));
    let loader = RuntimeLoader::with_observer(
        vec![core_assembly(), app.build()],
        LoaderOptions::default(),
        Box::new(observer),
    );

    loader.get_type(&LoadingArguments::new("App", id)).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![format!("App[{id}]")]);
}

#[test]
fn test_observer_failure_aborts_commit() {
    let observer = RecordingObserver {
        fail_types: true,
        seen: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
    };
    let mut app = AssemblyBuilder::new("App");
    let id = app.add_type(TypeTemplate::new(StorageMode::Value));
    let loader = RuntimeLoader::with_observer(
        vec![core_assembly(), app.build()],
        LoaderOptions::default(),
        Box::new(observer),
    );

    assert!(loader.get_type(&LoadingArguments::new("App", id)).is_err());
    assert_eq!(loader.type_count(), 0);
}
