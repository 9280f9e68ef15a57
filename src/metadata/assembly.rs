//! Assemblies and the assembly registry.
//!
//! An [`Assembly`] is the immutable unit of deployment: ordered template lists
//! plus the import/export tables that stitch assemblies together. The
//! [`AssemblyRegistry`] owns the full collection for one loader and resolves
//! name lookups and import/export chains.
//!
//! # Key Types
//! - [`Assembly`] - templates plus import/export tables
//! - [`AssemblyImport`] / [`AssemblyExport`] - one row of the linkage tables
//! - [`AssemblyRegistry`] - lookup over the immutable collection

use std::sync::Arc;

use crate::{
    metadata::template::{FunctionTemplateRc, TraitTemplateRc, TypeTemplateRc},
    Error, Result,
};

/// A reference to a shared `Assembly`.
pub type AssemblyRc = Arc<Assembly>;

/// One import-table row: a foreign assembly, an exported name and the
/// expected generic parameter count (`None` = unchecked).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyImport {
    /// Name of the assembly exporting the object.
    pub assembly: String,
    /// Export name to look up.
    pub name: String,
    /// Expected generic parameter count; `None` skips the check.
    pub generic_parameters: Option<usize>,
}

impl AssemblyImport {
    /// Construct an import row.
    #[must_use]
    pub fn new(assembly: impl Into<String>, name: impl Into<String>, generic_parameters: Option<usize>) -> Self {
        AssemblyImport {
            assembly: assembly.into(),
            name: name.into(),
            generic_parameters,
        }
    }
}

/// One export-table row: a public name bound to an internal id.
///
/// An id at or past the owning template array re-exports an import (the id
/// minus the array length indexes the import table). For constants the id
/// *is* the exported 32-bit value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyExport {
    /// Public name of the export.
    pub name: String,
    /// Internal template id, import offset, or constant value (see above).
    pub internal_id: usize,
}

impl AssemblyExport {
    /// Construct an export row.
    #[must_use]
    pub fn new(name: impl Into<String>, internal_id: usize) -> Self {
        AssemblyExport {
            name: name.into(),
            internal_id,
        }
    }
}

/// An immutable bundle of templates and linkage tables.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Unique assembly name.
    pub name: String,
    /// Type templates, indexed by template id.
    pub types: Vec<TypeTemplateRc>,
    /// Function templates, indexed by template id.
    pub functions: Vec<FunctionTemplateRc>,
    /// Trait templates, indexed by template id.
    pub traits: Vec<TraitTemplateRc>,
    /// Imported types.
    pub import_types: Vec<AssemblyImport>,
    /// Imported functions.
    pub import_functions: Vec<AssemblyImport>,
    /// Imported traits.
    pub import_traits: Vec<AssemblyImport>,
    /// Imported constants (must be non-generic).
    pub import_constants: Vec<AssemblyImport>,
    /// Exported types.
    pub export_types: Vec<AssemblyExport>,
    /// Exported functions.
    pub export_functions: Vec<AssemblyExport>,
    /// Exported traits.
    pub export_traits: Vec<AssemblyExport>,
    /// Exported constants; `internal_id` holds the value.
    pub export_constants: Vec<AssemblyExport>,
    /// Host-provided primitive slots; `internal_id` is the type template id.
    pub native_types: Vec<AssemblyExport>,
}

/// An import resolved to its defining assembly and template id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExport {
    /// Assembly the template lives in.
    pub assembly: String,
    /// Template id inside that assembly.
    pub id: usize,
}

/// Lookup over the immutable assembly collection of one loader.
#[derive(Debug, Default)]
pub struct AssemblyRegistry {
    assemblies: Vec<AssemblyRc>,
}

impl AssemblyRegistry {
    /// Build a registry from parsed assemblies.
    #[must_use]
    pub fn new(assemblies: Vec<Assembly>) -> Self {
        AssemblyRegistry {
            assemblies: assemblies.into_iter().map(Arc::new).collect(),
        }
    }

    /// Find an assembly by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<AssemblyRc> {
        self.assemblies.iter().find(|a| a.name == name).cloned()
    }

    /// Find an assembly by name, failing with [`Error::AssemblyNotFound`].
    ///
    /// # Errors
    /// Returns an error if no assembly of that name is registered.
    pub fn find_or_err(&self, name: &str) -> Result<AssemblyRc> {
        self.find(name)
            .ok_or_else(|| Error::AssemblyNotFound(name.to_string()))
    }

    /// Fetch a type template by assembly name and id.
    ///
    /// # Errors
    /// Returns an error if the assembly is unknown or the id is out of range.
    pub fn type_template(&self, assembly: &str, id: usize) -> Result<TypeTemplateRc> {
        let a = self.find_or_err(assembly)?;
        a.types
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidTypeReference(format!("{assembly}[{id}]")))
    }

    /// Fetch a function template by assembly name and id.
    ///
    /// # Errors
    /// Returns an error if the assembly is unknown or the id is out of range.
    pub fn function_template(&self, assembly: &str, id: usize) -> Result<FunctionTemplateRc> {
        let a = self.find_or_err(assembly)?;
        a.functions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidFunctionReference(format!("{assembly}[{id}]")))
    }

    /// Fetch a trait template by assembly name and id.
    ///
    /// # Errors
    /// Returns an error if the assembly is unknown or the id is out of range.
    pub fn trait_template(&self, assembly: &str, id: usize) -> Result<TraitTemplateRc> {
        let a = self.find_or_err(assembly)?;
        a.traits
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidConstraint(format!("invalid trait reference {assembly}[{id}]")))
    }

    /// Resolve a type import to its defining assembly and template id.
    ///
    /// Re-export chains are followed recursively; a missing name, a broken
    /// chain or a generic-parameter-count mismatch yields `None`.
    ///
    /// # Errors
    /// Returns an error if a named assembly is not registered.
    pub fn resolve_export_type(&self, import: &AssemblyImport) -> Result<Option<ResolvedExport>> {
        let a = self.find_or_err(&import.assembly)?;
        for e in &a.export_types {
            if e.name != import.name {
                continue;
            }
            if e.internal_id >= a.types.len() {
                let import_id = e.internal_id - a.types.len();
                let Some(next) = a.import_types.get(import_id) else {
                    return Ok(None);
                };
                return self.resolve_export_type(next);
            }
            if let Some(n) = import.generic_parameters {
                if !a.types[e.internal_id].generic.parameter_count.can_match(&[n]) {
                    return Ok(None);
                }
            }
            return Ok(Some(ResolvedExport {
                assembly: import.assembly.clone(),
                id: e.internal_id,
            }));
        }
        Ok(None)
    }

    /// Resolve a function import to its defining assembly and template id.
    ///
    /// # Errors
    /// Returns an error if a named assembly is not registered.
    pub fn resolve_export_function(&self, import: &AssemblyImport) -> Result<Option<ResolvedExport>> {
        let a = self.find_or_err(&import.assembly)?;
        for e in &a.export_functions {
            if e.name != import.name {
                continue;
            }
            if e.internal_id >= a.functions.len() {
                let import_id = e.internal_id - a.functions.len();
                let Some(next) = a.import_functions.get(import_id) else {
                    return Ok(None);
                };
                return self.resolve_export_function(next);
            }
            if let Some(n) = import.generic_parameters {
                if !a.functions[e.internal_id].generic.parameter_count.can_match(&[n]) {
                    return Ok(None);
                }
            }
            return Ok(Some(ResolvedExport {
                assembly: import.assembly.clone(),
                id: e.internal_id,
            }));
        }
        Ok(None)
    }

    /// Resolve a trait import to its defining assembly and template id.
    ///
    /// # Errors
    /// Returns an error if a named assembly is not registered.
    pub fn resolve_export_trait(&self, import: &AssemblyImport) -> Result<Option<ResolvedExport>> {
        let a = self.find_or_err(&import.assembly)?;
        for e in &a.export_traits {
            if e.name != import.name {
                continue;
            }
            if e.internal_id >= a.traits.len() {
                let import_id = e.internal_id - a.traits.len();
                let Some(next) = a.import_traits.get(import_id) else {
                    return Ok(None);
                };
                return self.resolve_export_trait(next);
            }
            if let Some(n) = import.generic_parameters {
                if !a.traits[e.internal_id].generic.parameter_count.can_match(&[n]) {
                    return Ok(None);
                }
            }
            return Ok(Some(ResolvedExport {
                assembly: import.assembly.clone(),
                id: e.internal_id,
            }));
        }
        Ok(None)
    }

    /// Look up an exported constant value by name.
    ///
    /// # Errors
    /// Returns an error if the assembly is unknown or the name is not exported.
    pub fn find_export_constant(&self, assembly: &str, name: &str) -> Result<u32> {
        let a = self.find_or_err(assembly)?;
        for e in &a.export_constants {
            if e.name == name {
                return Ok(e.internal_id as u32);
            }
        }
        Err(Error::LinkageFailure(format!(
            "constant export not found - {assembly}::{name}"
        )))
    }

    /// Resolve an import-constant slot of `assembly` to its value.
    ///
    /// # Errors
    /// Returns an error if the slot is out of range, the import declares
    /// generic parameters, or the export is missing.
    pub fn import_constant(&self, assembly: &Assembly, index: usize) -> Result<u32> {
        let Some(info) = assembly.import_constants.get(index) else {
            return Err(Error::LinkageFailure(format!(
                "invalid constant import reference - {}[{index}]",
                assembly.name
            )));
        };
        if info.generic_parameters != Some(0) {
            return Err(Error::LinkageFailure(format!(
                "constant import cannot be generic - {}::{}",
                info.assembly, info.name
            )));
        }
        self.find_export_constant(&info.assembly, &info.name)
    }

    /// Find the internal id behind an exported name in one of the export
    /// tables, without following re-export chains.
    #[must_use]
    pub fn find_export_id(list: &[AssemblyExport], name: &str) -> Option<usize> {
        list.iter().find(|e| e.name == name).map(|e| e.internal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::template::{StorageMode, TypeTemplate};

    fn assembly(name: &str) -> Assembly {
        Assembly {
            name: name.to_string(),
            ..Assembly::default()
        }
    }

    #[test]
    fn test_find_assembly() {
        let registry = AssemblyRegistry::new(vec![assembly("Core"), assembly("App")]);
        assert!(registry.find("Core").is_some());
        assert!(registry.find("Missing").is_none());
        assert!(matches!(
            registry.find_or_err("Missing"),
            Err(Error::AssemblyNotFound(_))
        ));
    }

    #[test]
    fn test_template_bounds() {
        let mut a = assembly("Core");
        a.types.push(Arc::new(TypeTemplate::new(StorageMode::Value)));
        let registry = AssemblyRegistry::new(vec![a]);

        assert!(registry.type_template("Core", 0).is_ok());
        assert!(matches!(
            registry.type_template("Core", 1),
            Err(Error::InvalidTypeReference(_))
        ));
        assert!(matches!(
            registry.function_template("Core", 0),
            Err(Error::InvalidFunctionReference(_))
        ));
    }

    #[test]
    fn test_resolve_export_type() {
        let mut core = assembly("Core");
        core.types.push(Arc::new(TypeTemplate::new(StorageMode::Value)));
        core.export_types.push(AssemblyExport::new("Core.Int32", 0));

        let registry = AssemblyRegistry::new(vec![core]);
        let resolved = registry
            .resolve_export_type(&AssemblyImport::new("Core", "Core.Int32", Some(0)))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.assembly, "Core");
        assert_eq!(resolved.id, 0);

        // Parameter-count mismatch fails the lookup.
        let miss = registry
            .resolve_export_type(&AssemblyImport::new("Core", "Core.Int32", Some(2)))
            .unwrap();
        assert!(miss.is_none());

        // Unknown name fails the lookup.
        let miss = registry
            .resolve_export_type(&AssemblyImport::new("Core", "Core.Missing", None))
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn test_resolve_export_reexport_chain() {
        // Core defines the type, Middle re-exports Core's export, App imports Middle.
        let mut core = assembly("Core");
        core.types.push(Arc::new(TypeTemplate::new(StorageMode::Value)));
        core.export_types.push(AssemblyExport::new("Core.Int32", 0));

        let mut middle = assembly("Middle");
        middle
            .import_types
            .push(AssemblyImport::new("Core", "Core.Int32", None));
        // No local types: id 0 points past the (empty) template array into import 0.
        middle.export_types.push(AssemblyExport::new("Middle.Int32", 0));

        let registry = AssemblyRegistry::new(vec![core, middle]);
        let resolved = registry
            .resolve_export_type(&AssemblyImport::new("Middle", "Middle.Int32", None))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.assembly, "Core");
        assert_eq!(resolved.id, 0);
    }

    #[test]
    fn test_constants() {
        let mut core = assembly("Core");
        core.export_constants.push(AssemblyExport::new("Answer", 42));

        let mut app = assembly("App");
        app.import_constants
            .push(AssemblyImport::new("Core", "Answer", Some(0)));
        app.import_constants
            .push(AssemblyImport::new("Core", "Answer", Some(1)));

        let registry = AssemblyRegistry::new(vec![core, app.clone()]);
        assert_eq!(registry.find_export_constant("Core", "Answer").unwrap(), 42);
        assert!(registry.find_export_constant("Core", "Question").is_err());

        assert_eq!(registry.import_constant(&app, 0).unwrap(), 42);
        // A generic constant import is a linkage error.
        assert!(registry.import_constant(&app, 1).is_err());
        // Out-of-range slot.
        assert!(registry.import_constant(&app, 5).is_err());
    }
}
