//! Shared bytecode records.
//!
//! All specializations of one function template share a single
//! [`RuntimeFunctionCode`], memoized by `(assembly, template id)`. Building a
//! record pads the instruction stream with trailing no-ops (so the
//! interpreter can over-fetch at the end) and materializes import constants
//! into the constant data.

use std::sync::Arc;

use crate::{runtime::functions::RuntimeFunctionCode, Result};

use super::LoaderCore;

/// Encoding of the interpreter's no-op instruction.
const OP_NOP: u8 = 0x00;
/// Number of no-op bytes appended to every instruction stream.
const CODE_PADDING: usize = 16;

impl LoaderCore {
    /// The shared code record of a function template, or `None` when the
    /// template carries no code at all.
    pub(crate) fn get_code(
        &mut self,
        assembly: &str,
        id: usize,
    ) -> Result<Option<Arc<RuntimeFunctionCode>>> {
        let key = (assembly.to_string(), id);
        if let Some(code) = self.code_storage.get(&key) {
            return Ok(Some(code.clone()));
        }

        let template = self.assemblies.function_template(assembly, id)?;
        if !template.has_code() {
            return Ok(None);
        }

        let mut code = RuntimeFunctionCode {
            assembly: assembly.to_string(),
            template_id: id,
            instructions: template.instructions.clone(),
            constant_data: template.constant_data.clone(),
            constant_table: template.constant_table.clone(),
            locals: template.locals.clone(),
        };

        code.instructions
            .extend(std::iter::repeat(OP_NOP).take(CODE_PADDING));

        // A zero-length constant entry is an import slot: its offset is the
        // import id. The value becomes four fresh little-endian bytes.
        // TODO support field references in the constant table
        let owner = self.assemblies.find_or_err(assembly)?;
        for entry in &mut code.constant_table {
            if entry.length == 0 {
                let import_id = entry.offset;
                let value = self.assemblies.import_constant(&owner, import_id)?;
                let offset = code.constant_data.len();
                code.constant_data.extend_from_slice(&value.to_le_bytes());
                entry.offset = offset;
                entry.length = 4;
            }
        }

        let code = Arc::new(code);
        self.code_storage.insert(key, code.clone());
        Ok(Some(code))
    }
}
