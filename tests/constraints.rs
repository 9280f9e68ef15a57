//! Constraint solver tests: trait satisfaction, overload search with
//! backtracking, export binding and the cycle detectors.

mod common;

use common::*;
use lodestone::prelude::*;
use lodestone::runtime::ConstraintExportEntry;
use lodestone::{Error, RuntimeLoader};

/// Constraint record with sane defaults for the tests.
fn constraint(kind: ConstraintKind, index: usize) -> Constraint {
    Constraint {
        kind,
        index,
        type_references: Vec::new(),
        names: Vec::new(),
        target: 0,
        arguments: Vec::new(),
        export_name: String::new(),
    }
}

/// Trait `Addable { fn add(Self, Self) -> Self }`.
fn addable_trait() -> TraitTemplate {
    let mut addable = TraitTemplate::default();
    let self_ref = type_entry(&mut addable.generic, RefKind::SelfType, 0);
    addable.functions.push(
        lodestone::metadata::template::TraitFunction {
            element_name: "add".to_string(),
            export_name: "add".to_string(),
            return_type: self_ref,
            parameter_types: vec![self_ref, self_ref],
        },
    );
    addable
}

#[test]
fn test_trait_satisfied_and_export_bound() {
    let mut app = AssemblyBuilder::new("App");
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));
    let addable_id = app.add_trait(addable_trait());

    // struct AddUser with `Addable(i32)`, consuming the bound function.
    let mut user = TypeTemplate::new(StorageMode::Value);
    let mut require = constraint(ConstraintKind::TraitLocal, addable_id);
    require.type_references = vec![
        RefEntry::new(RefKind::Import, i32_import),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    require.target = 0;
    require.export_name = "add_impl".to_string();
    user.generic.constraints.push(require);
    user.generic.names.push("add_impl/add".to_string());
    let consumer = function_entry(&mut user.generic, RefKind::Constraint, 0);
    let user_id = app.add_type(user);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    let (int32, _, _) = install_natives(&loader);

    let user = loader.get_type(&LoadingArguments::new("App", user_id)).unwrap();
    let bound = user
        .constraint_exports
        .entries
        .iter()
        .find_map(|e| match e {
            ConstraintExportEntry::Function { index, export } if *index == consumer => Some(*export),
            _ => None,
        })
        .expect("constraint export recorded");

    let add = loader.get_function_by_id(bound).unwrap();
    assert_eq!(add.return_type, Some(int32.type_id));
    assert_eq!(add.parameters, vec![Some(int32.type_id), Some(int32.type_id)]);
}

#[test]
fn test_trait_violated() {
    let mut app = AssemblyBuilder::new("App");
    let u8_import = app.import_type("Core", "Core.UInt8", Some(0));
    let addable_id = app.add_trait(addable_trait());

    // UInt8 exposes no `add`.
    let mut user = TypeTemplate::new(StorageMode::Value);
    let mut require = constraint(ConstraintKind::TraitLocal, addable_id);
    require.type_references = vec![
        RefEntry::new(RefKind::Import, u8_import),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    user.generic.constraints.push(require);
    let user_id = app.add_type(user);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    install_natives(&loader);

    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", user_id)),
        Err(Error::ConstraintCheckFailure(_))
    ));
}

#[test]
fn test_trait_field_requirement() {
    // trait HasValue { i32 value; } against a struct with and without it.
    let mut app = AssemblyBuilder::new("App");
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));

    let mut has_value = TraitTemplate::default();
    let required_type = type_entry(&mut has_value.generic, RefKind::Import, i32_import);
    type_entry(&mut has_value.generic, RefKind::ListEnd, 0);
    has_value.fields.push(lodestone::metadata::template::TraitField {
        element_name: "value".to_string(),
        export_name: "value".to_string(),
        field_type: required_type,
    });
    let has_value_id = app.add_trait(has_value);

    let mut carrier = TypeTemplate::new(StorageMode::Value);
    import_field(&mut carrier, i32_import);
    carrier.public_fields.push(NamedId::new("value", 0));
    let carrier_id = app.add_type(carrier);

    let make_user = |app: &mut AssemblyBuilder, target_id: usize| {
        let mut user = TypeTemplate::new(StorageMode::Value);
        let mut require = constraint(ConstraintKind::TraitLocal, has_value_id);
        require.type_references = vec![
            RefEntry::new(RefKind::Assembly, target_id),
            RefEntry::new(RefKind::ListEnd, 0),
        ];
        user.generic.constraints.push(require);
        app.add_type(user)
    };
    let good_id = make_user(&mut app, carrier_id);
    let plain_id = app.add_type(TypeTemplate::new(StorageMode::Value));
    let bad_id = make_user(&mut app, plain_id);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    install_natives(&loader);

    assert!(loader.get_type(&LoadingArguments::new("App", good_id)).is_ok());
    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", bad_id)),
        Err(Error::ConstraintCheckFailure(_))
    ));
}

#[test]
fn test_same_constraint() {
    // struct Only32<T> where T == i32
    let mut app = AssemblyBuilder::new("App");
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));

    let mut only32 = TypeTemplate::new(StorageMode::Value);
    only32.generic.parameter_count = ParamCountList::fixed(1);
    let mut same = constraint(ConstraintKind::Same, 0);
    same.type_references = vec![
        RefEntry::new(RefKind::Argument, 0),
        RefEntry::new(RefKind::Import, i32_import),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    same.target = 0;
    same.arguments = vec![1];
    only32.generic.constraints.push(same);
    let only32_id = app.add_type(only32);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    let (int32, int64, _) = install_natives(&loader);

    assert!(loader
        .get_type(&LoadingArguments::with_arguments(
            "App",
            only32_id,
            MultiList::single(int32.type_id)
        ))
        .is_ok());
    assert!(matches!(
        loader.get_type(&LoadingArguments::with_arguments(
            "App",
            only32_id,
            MultiList::single(int64.type_id)
        )),
        Err(Error::ConstraintCheckFailure(_))
    ));
}

#[test]
fn test_exist_constraint() {
    // struct Probe<T> where Pair<T> exists; Pair { T value; } is unconstrained,
    // so existence only fails when instantiation fails.
    let mut app = AssemblyBuilder::new("App");

    let mut pair = TypeTemplate::new(StorageMode::Value);
    pair.generic.parameter_count = ParamCountList::fixed(1);
    argument_field(&mut pair, 0);
    let pair_id = app.add_type(pair);

    let mut probe = TypeTemplate::new(StorageMode::Value);
    probe.generic.parameter_count = ParamCountList::fixed(1);
    let mut exist = constraint(ConstraintKind::Exist, 0);
    exist.type_references = vec![
        RefEntry::new(RefKind::Assembly, pair_id),
        RefEntry::new(RefKind::Argument, 0),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    probe.generic.constraints.push(exist);
    let probe_id = app.add_type(probe);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    let (int32, _, _) = install_natives(&loader);

    let probe = loader
        .get_type(&LoadingArguments::with_arguments(
            "App",
            probe_id,
            MultiList::single(int32.type_id),
        ))
        .unwrap();
    assert!(probe.size >= 1);
}

#[test]
fn test_base_constraint() {
    let mut app = AssemblyBuilder::new("App");

    let base_id = app.add_type(TypeTemplate::new(StorageMode::Reference));
    let mut derived = TypeTemplate::new(StorageMode::Reference);
    let parent_ref = type_entry(&mut derived.generic, RefKind::Assembly, base_id);
    type_entry(&mut derived.generic, RefKind::ListEnd, 0);
    derived.base.inherited = parent_ref;
    let derived_id = app.add_type(derived);
    let unrelated_id = app.add_type(TypeTemplate::new(StorageMode::Reference));

    // struct NeedsBase<T> where Base is on T's base chain
    let mut needs = TypeTemplate::new(StorageMode::Value);
    needs.generic.parameter_count = ParamCountList::fixed(1);
    let mut base_req = constraint(ConstraintKind::Base, 0);
    base_req.type_references = vec![
        RefEntry::new(RefKind::Argument, 0),
        RefEntry::new(RefKind::Assembly, base_id),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    base_req.target = 0;
    base_req.arguments = vec![1];
    needs.generic.constraints.push(base_req);
    let needs_id = app.add_type(needs);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    let derived = loader.get_type(&LoadingArguments::new("App", derived_id)).unwrap();
    let base = loader.get_type(&LoadingArguments::new("App", base_id)).unwrap();
    let unrelated = loader
        .get_type(&LoadingArguments::new("App", unrelated_id))
        .unwrap();

    // Reflexive and through the chain.
    for ok in [derived.type_id, base.type_id] {
        assert!(loader
            .get_type(&LoadingArguments::with_arguments(
                "App",
                needs_id,
                MultiList::single(ok)
            ))
            .is_ok());
    }
    assert!(matches!(
        loader.get_type(&LoadingArguments::with_arguments(
            "App",
            needs_id,
            MultiList::single(unrelated.type_id)
        )),
        Err(Error::ConstraintCheckFailure(_))
    ));
}

#[test]
fn test_interface_constraint() {
    let mut app = AssemblyBuilder::new("App");

    let iface_id = app.add_type(TypeTemplate::new(StorageMode::Interface));
    let mut implementor = TypeTemplate::new(StorageMode::Reference);
    let iface_ref = type_entry(&mut implementor.generic, RefKind::Assembly, iface_id);
    type_entry(&mut implementor.generic, RefKind::ListEnd, 0);
    implementor.interfaces.push(InheritanceInfo {
        inherited: iface_ref,
        virtual_functions: Vec::new(),
    });
    let implementor_id = app.add_type(implementor);
    let plain_id = app.add_type(TypeTemplate::new(StorageMode::Reference));

    let mut needs = TypeTemplate::new(StorageMode::Value);
    needs.generic.parameter_count = ParamCountList::fixed(1);
    let mut iface_req = constraint(ConstraintKind::Interface, 0);
    iface_req.type_references = vec![
        RefEntry::new(RefKind::Argument, 0),
        RefEntry::new(RefKind::Assembly, iface_id),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    iface_req.target = 0;
    iface_req.arguments = vec![1];
    needs.generic.constraints.push(iface_req);
    let needs_id = app.add_type(needs);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    let implementor = loader
        .get_type(&LoadingArguments::new("App", implementor_id))
        .unwrap();
    assert_eq!(implementor.interfaces.len(), 1);
    let plain = loader.get_type(&LoadingArguments::new("App", plain_id)).unwrap();

    assert!(loader
        .get_type(&LoadingArguments::with_arguments(
            "App",
            needs_id,
            MultiList::single(implementor.type_id)
        ))
        .is_ok());
    assert!(matches!(
        loader.get_type(&LoadingArguments::with_arguments(
            "App",
            needs_id,
            MultiList::single(plain.type_id)
        )),
        Err(Error::ConstraintCheckFailure(_))
    ));
}

#[test]
fn test_overload_search_backtracks() {
    // trait Conv<T1> { fn conv() -> T1 } where T1 == i64, checked against
    // Core.Int32 which exposes conv() -> i32 and conv() -> i64. The solver
    // must reject the first overload and commit to the second.
    let mut app = AssemblyBuilder::new("App");
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));
    let i64_import = app.import_type("Core", "Core.Int64", Some(0));

    let mut conv = TraitTemplate::default();
    conv.generic.parameter_count = ParamCountList::fixed(1);
    let t1_ref = type_entry(&mut conv.generic, RefKind::Argument, 0);
    conv.functions.push(lodestone::metadata::template::TraitFunction {
        element_name: "conv".to_string(),
        export_name: "conv".to_string(),
        return_type: t1_ref,
        parameter_types: Vec::new(),
    });
    let mut pin = constraint(ConstraintKind::Same, 0);
    pin.type_references = vec![
        RefEntry::new(RefKind::Argument, 0),
        RefEntry::new(RefKind::Import, i64_import),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    pin.target = 0;
    pin.arguments = vec![1];
    conv.generic.constraints.push(pin);
    let conv_id = app.add_trait(conv);

    let mut user = TypeTemplate::new(StorageMode::Value);
    let mut require = constraint(ConstraintKind::TraitLocal, conv_id);
    require.type_references = vec![
        RefEntry::new(RefKind::Any, 0),
        RefEntry::new(RefKind::Import, i32_import),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    require.target = 1;
    require.arguments = vec![0];
    require.export_name = "c".to_string();
    user.generic.constraints.push(require);
    user.generic.names.push("c/conv".to_string());
    let consumer = function_entry(&mut user.generic, RefKind::Constraint, 0);
    let user_id = app.add_type(user);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    let (_, int64, _) = install_natives(&loader);

    let user = loader.get_type(&LoadingArguments::new("App", user_id)).unwrap();
    let bound = user
        .constraint_exports
        .entries
        .iter()
        .find_map(|e| match e {
            ConstraintExportEntry::Function { index, export } if *index == consumer => Some(*export),
            _ => None,
        })
        .expect("constraint export recorded");

    // The committed overload is the one returning i64.
    let conv = loader.get_function_by_id(bound).unwrap();
    assert_eq!(conv.return_type, Some(int64.type_id));
    assert!(conv.parameters.is_empty());
}

#[test]
fn test_circular_trait_detected() {
    // trait Loopy requires Loopy(Self) - the sub-constraint repeats its
    // parent with equal arguments.
    let mut app = AssemblyBuilder::new("App");
    let i32_import = app.import_type("Core", "Core.Int32", Some(0));

    let mut loopy = TraitTemplate::default();
    let mut again = constraint(ConstraintKind::TraitLocal, 0);
    again.type_references = vec![RefEntry::new(RefKind::SelfType, 0)];
    loopy.generic.constraints.push(again);
    assert_eq!(app.add_trait(loopy), 0);

    let mut user = TypeTemplate::new(StorageMode::Value);
    let mut require = constraint(ConstraintKind::TraitLocal, 0);
    require.type_references = vec![
        RefEntry::new(RefKind::Import, i32_import),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    user.generic.constraints.push(require);
    let user_id = app.add_type(user);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    install_natives(&loader);

    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", user_id)),
        Err(Error::CircularConstraint)
    ));
}

#[test]
fn test_reentrant_constraint_detected() {
    // A type whose own Exist constraint instantiates the type itself.
    let mut app = AssemblyBuilder::new("App");
    let mut selfish = TypeTemplate::new(StorageMode::Value);
    let mut exist = constraint(ConstraintKind::Exist, 0);
    exist.type_references = vec![
        RefEntry::new(RefKind::Assembly, 0),
        RefEntry::new(RefKind::ListEnd, 0),
    ];
    selfish.generic.constraints.push(exist);
    assert_eq!(app.add_type(selfish), 0);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", 0)),
        Err(Error::CircularConstraint)
    ));
}

#[test]
fn test_invalid_argument_shape() {
    let mut app = AssemblyBuilder::new("App");
    let mut pair = TypeTemplate::new(StorageMode::Value);
    pair.generic.parameter_count = ParamCountList::fixed(2);
    let pair_id = app.add_type(pair);

    let loader = RuntimeLoader::new(vec![core_assembly(), app.build()]);
    let (int32, _, _) = install_natives(&loader);

    assert!(matches!(
        loader.get_type(&LoadingArguments::with_arguments(
            "App",
            pair_id,
            MultiList::single(int32.type_id)
        )),
        Err(Error::InvalidGenericArguments(_))
    ));
    assert!(matches!(
        loader.get_type(&LoadingArguments::new("App", pair_id)),
        Err(Error::InvalidGenericArguments(_))
    ));
}
