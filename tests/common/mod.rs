//! Shared fixtures: an in-memory `Core` assembly plus helpers for building
//! templates entry by entry.
#![allow(dead_code)]

use lodestone::prelude::*;
use lodestone::RuntimeLoader;

// Template ids inside the fixture Core assembly.
pub const I32: usize = 0;
pub const I64: usize = 1;
pub const U8: usize = 2;
pub const POINTER: usize = 3;
pub const BOX: usize = 4;

// Function template ids inside the fixture Core assembly.
pub const FN_ADD: usize = 0;
pub const FN_CONV_I32: usize = 1;
pub const FN_CONV_I64: usize = 2;

/// Incremental assembly construction.
pub struct AssemblyBuilder {
    assembly: Assembly,
}

impl AssemblyBuilder {
    pub fn new(name: &str) -> Self {
        AssemblyBuilder {
            assembly: Assembly {
                name: name.to_string(),
                ..Assembly::default()
            },
        }
    }

    pub fn add_type(&mut self, template: TypeTemplate) -> usize {
        self.assembly.types.push(std::sync::Arc::new(template));
        self.assembly.types.len() - 1
    }

    pub fn add_function(&mut self, template: FunctionTemplate) -> usize {
        self.assembly.functions.push(std::sync::Arc::new(template));
        self.assembly.functions.len() - 1
    }

    pub fn add_trait(&mut self, template: TraitTemplate) -> usize {
        self.assembly.traits.push(std::sync::Arc::new(template));
        self.assembly.traits.len() - 1
    }

    pub fn import_type(&mut self, assembly: &str, name: &str, params: Option<usize>) -> usize {
        self.assembly
            .import_types
            .push(AssemblyImport::new(assembly, name, params));
        self.assembly.import_types.len() - 1
    }

    pub fn import_constant(&mut self, assembly: &str, name: &str) -> usize {
        self.assembly
            .import_constants
            .push(AssemblyImport::new(assembly, name, Some(0)));
        self.assembly.import_constants.len() - 1
    }

    pub fn export_type(&mut self, name: &str, id: usize) {
        self.assembly.export_types.push(AssemblyExport::new(name, id));
    }

    pub fn export_constant(&mut self, name: &str, value: usize) {
        self.assembly
            .export_constants
            .push(AssemblyExport::new(name, value));
    }

    pub fn native_type(&mut self, name: &str, id: usize) {
        self.assembly.native_types.push(AssemblyExport::new(name, id));
    }

    pub fn build(self) -> Assembly {
        self.assembly
    }
}

/// Append one entry to a declaration's Types list, returning its position.
pub fn type_entry(generic: &mut GenericDeclaration, kind: RefKind, index: usize) -> usize {
    generic.types.push(RefEntry::new(kind, index));
    generic.types.len() - 1
}

/// Append one entry to a declaration's Functions list, returning its position.
pub fn function_entry(generic: &mut GenericDeclaration, kind: RefKind, index: usize) -> usize {
    generic.functions.push(RefEntry::new(kind, index));
    generic.functions.len() - 1
}

/// Add a field typed by an import (head plus terminator).
pub fn import_field(template: &mut TypeTemplate, import_id: usize) {
    let head = type_entry(&mut template.generic, RefKind::Import, import_id);
    type_entry(&mut template.generic, RefKind::ListEnd, 0);
    template.fields.push(head);
}

/// Add a field typed by a template of the same assembly, with optional
/// argument entries.
pub fn local_field(template: &mut TypeTemplate, template_id: usize, args: &[(RefKind, usize)]) {
    let head = type_entry(&mut template.generic, RefKind::Assembly, template_id);
    for &(kind, index) in args {
        type_entry(&mut template.generic, kind, index);
    }
    type_entry(&mut template.generic, RefKind::ListEnd, 0);
    template.fields.push(head);
}

/// Add a field typed by a generic argument of the template itself.
pub fn argument_field(template: &mut TypeTemplate, argument: usize) {
    let head = type_entry(&mut template.generic, RefKind::Argument, argument);
    template.fields.push(head);
}

/// A function reference entry (head plus terminator) in the Functions list,
/// returning the head position.
pub fn local_function_ref(generic: &mut GenericDeclaration, function_id: usize) -> usize {
    let head = function_entry(generic, RefKind::Assembly, function_id);
    function_entry(generic, RefKind::ListEnd, 0);
    head
}

/// The fixture `Core` assembly: three native primitives, the pointer and box
/// intrinsics, and an `add`/`conv` function family on `Core.Int32` used by
/// the trait tests.
pub fn core_assembly() -> Assembly {
    let mut core = AssemblyBuilder::new("Core");

    // fn add(i32, i32) -> i32
    let mut add = FunctionTemplate::new();
    let i32_ref = type_entry(&mut add.generic, RefKind::Assembly, I32);
    type_entry(&mut add.generic, RefKind::ListEnd, 0);
    add.return_type = i32_ref;
    add.parameters = vec![i32_ref, i32_ref];
    add.instructions = vec![0x60];
    assert_eq!(core.add_function(add), FN_ADD);

    // fn conv() -> i32 and fn conv() -> i64, an overload pair
    let mut conv_i32 = FunctionTemplate::new();
    let r = type_entry(&mut conv_i32.generic, RefKind::Assembly, I32);
    type_entry(&mut conv_i32.generic, RefKind::ListEnd, 0);
    conv_i32.return_type = r;
    conv_i32.instructions = vec![0x70];
    assert_eq!(core.add_function(conv_i32), FN_CONV_I32);

    let mut conv_i64 = FunctionTemplate::new();
    let r = type_entry(&mut conv_i64.generic, RefKind::Assembly, I64);
    type_entry(&mut conv_i64.generic, RefKind::ListEnd, 0);
    conv_i64.return_type = r;
    conv_i64.instructions = vec![0x71];
    assert_eq!(core.add_function(conv_i64), FN_CONV_I64);

    // Core.Int32 exposes add and both conv overloads publicly.
    let mut int32 = TypeTemplate::new(StorageMode::Value);
    let add_ref = local_function_ref(&mut int32.generic, FN_ADD);
    let conv_a_ref = local_function_ref(&mut int32.generic, FN_CONV_I32);
    let conv_b_ref = local_function_ref(&mut int32.generic, FN_CONV_I64);
    int32.public_functions = vec![
        NamedId::new("add", add_ref),
        NamedId::new("conv", conv_a_ref),
        NamedId::new("conv", conv_b_ref),
    ];
    assert_eq!(core.add_type(int32), I32);
    assert_eq!(core.add_type(TypeTemplate::new(StorageMode::Value)), I64);
    assert_eq!(core.add_type(TypeTemplate::new(StorageMode::Value)), U8);

    let mut pointer = TypeTemplate::new(StorageMode::Value);
    pointer.generic.parameter_count = ParamCountList::fixed(1);
    assert_eq!(core.add_type(pointer), POINTER);

    let mut boxed = TypeTemplate::new(StorageMode::Reference);
    boxed.generic.parameter_count = ParamCountList::fixed(1);
    argument_field(&mut boxed, 0);
    assert_eq!(core.add_type(boxed), BOX);

    for (name, id) in [
        ("Core.Int32", I32),
        ("Core.Int64", I64),
        ("Core.UInt8", U8),
        ("Core.Pointer", POINTER),
        ("Core.Box", BOX),
    ] {
        core.export_type(name, id);
    }
    for (name, id) in [("Core.Int32", I32), ("Core.Int64", I64), ("Core.UInt8", U8)] {
        core.native_type(name, id);
    }
    core.export_constant("Answer", 42);

    core.build()
}

/// Register the Core natives with host sizes; returns (i32, i64, u8).
pub fn install_natives(loader: &RuntimeLoader) -> (RuntimeTypeRc, RuntimeTypeRc, RuntimeTypeRc) {
    let int32 = loader.add_native_type("Core", "Core.Int32", 4, 4).unwrap();
    let int64 = loader.add_native_type("Core", "Core.Int64", 8, 8).unwrap();
    let uint8 = loader.add_native_type("Core", "Core.UInt8", 1, 1).unwrap();
    (int32, int64, uint8)
}

/// Width of a reference field on this host.
pub fn ptr() -> usize {
    std::mem::size_of::<usize>()
}
