//! Fully specialized runtime types.

use std::sync::{Arc, OnceLock};

use crate::{
    metadata::template::StorageMode,
    runtime::{ConstraintExportList, FunctionId, LoadingArguments, TypeId},
};

/// A reference to a committed `RuntimeType`.
pub type RuntimeTypeRc = Arc<RuntimeType>;

/// Placement of one field inside a laid-out type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFieldInfo {
    /// The field's type.
    pub field_type: TypeId,
    /// Byte offset from the start of the instance.
    pub offset: usize,
    /// Bytes the field occupies: pointer width for reference-storage types,
    /// the type's size otherwise.
    pub length: usize,
}

/// One implemented interface with its bound virtual table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInterface {
    /// The interface type.
    pub interface_type: TypeId,
    /// Implementations bound to the interface's slots, in declaration order.
    pub virtual_table: Vec<FunctionId>,
}

/// One slot of a type's virtual-method table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualSlot {
    /// Slot name, used for override matching.
    pub name: String,
    /// The declared (virtual) function of the slot.
    pub slot: FunctionId,
    /// The implementation currently bound to the slot.
    pub implementation: FunctionId,
}

/// Owned backing storage of a `Global` type.
///
/// The buffer over-allocates by one alignment unit and records the first
/// aligned offset, so `as_ptr` is always correctly aligned regardless of
/// where the allocator placed the block.
#[derive(Debug)]
pub struct StaticStorage {
    buffer: Box<[u8]>,
    offset: usize,
    len: usize,
}

impl StaticStorage {
    /// Allocate zeroed storage of `size` bytes aligned to `alignment`.
    #[must_use]
    pub(crate) fn allocate(size: usize, alignment: usize) -> Self {
        let alignment = alignment.max(1);
        let buffer = vec![0u8; size + alignment].into_boxed_slice();
        let raw = buffer.as_ptr() as usize;
        let offset = (raw + alignment - 1) / alignment * alignment - raw;
        StaticStorage {
            buffer,
            offset,
            len: size,
        }
    }

    /// The aligned base of the storage.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer[self.offset..].as_ptr()
    }

    /// Usable storage size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the storage is zero-sized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A fully specialized, laid-out type.
///
/// Instances are mutated only while they travel through the loading pipeline;
/// once committed they are shared immutably, with the sole exception of
/// [`RuntimeType::pointer_type`], which is set when the type's pointer
/// specialization commits.
#[derive(Debug)]
pub struct RuntimeType {
    /// Identity of this specialization.
    pub args: LoadingArguments,
    /// Monotonic id, the index into the loader's type table.
    pub type_id: TypeId,
    /// Storage discipline.
    pub storage: StorageMode,
    /// Field placements, in template order.
    pub fields: Vec<RuntimeFieldInfo>,
    /// Instance size in bytes, at least 1.
    pub size: usize,
    /// Instance alignment in bytes, at least 1.
    pub alignment: usize,
    /// Base type, if the template declares one.
    pub base: Option<TypeId>,
    /// Implemented interfaces with bound virtual tables.
    pub interfaces: Vec<RuntimeInterface>,
    /// The type's own virtual-method table (base slots first).
    pub virtual_table: Vec<VirtualSlot>,
    /// Initializer function; only `Global` types may carry one.
    pub initializer: Option<FunctionId>,
    /// Finalizer function; only `Reference` types may carry one.
    pub finalizer: Option<FunctionId>,
    /// Backing storage; present exactly for `Global` storage.
    pub static_storage: Option<StaticStorage>,
    /// The `Core.Pointer<Self>` specialization, once one has been committed.
    pub pointer_type: OnceLock<TypeId>,
    /// Exports recorded while this specialization's constraints were checked.
    pub constraint_exports: ConstraintExportList,
}

impl RuntimeType {
    /// Bytes one occurrence of this type takes when embedded: pointer width
    /// for reference-like storage, the instance size otherwise.
    #[must_use]
    pub fn storage_size(&self, pointer_size: usize) -> usize {
        match self.storage {
            StorageMode::Reference | StorageMode::Interface => pointer_size,
            StorageMode::Value | StorageMode::Global => self.size,
        }
    }

    /// Alignment of one embedded occurrence of this type.
    #[must_use]
    pub fn storage_alignment(&self, pointer_size: usize) -> usize {
        match self.storage {
            StorageMode::Reference | StorageMode::Interface => pointer_size,
            StorageMode::Value | StorageMode::Global => self.alignment,
        }
    }
}
