//! Parsed-assembly representation.
//!
//! This module holds everything the external parser hands to the loader:
//! assemblies with their linkage tables, the uninstantiated templates, and the
//! reference-list encoding templates use to describe each other. All of it is
//! immutable; the loader only reads.
//!
//! # Key Components
//!
//! - [`assembly`] - [`Assembly`](assembly::Assembly) values and the
//!   [`AssemblyRegistry`](assembly::AssemblyRegistry)
//! - [`template`] - type, function and trait templates
//! - [`generics`] - generic declarations, constraints and the reference-list
//!   encoding ([`RefEntry`](generics::RefEntry), [`MultiList`](generics::MultiList))

pub mod assembly;
pub mod generics;
pub mod template;
