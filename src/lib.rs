// Copyright 2025-2026 the lodestone contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # lodestone
//!
//! The runtime loader of a managed execution environment with generics,
//! traits, subtypes, inheritance and constraint-based generic specialization.
//! Given a set of pre-parsed *assemblies* (type, function and trait templates
//! plus import/export tables) and a loading request, `lodestone` produces a
//! fully instantiated [`RuntimeType`] or [`RuntimeFunction`] graph: field
//! layouts computed, virtual tables resolved, dependent types recursively
//! instantiated, static storage allocated and every generic constraint
//! satisfied.
//!
//! # Architecture
//!
//! The crate is organized into three layers that mirror the data flow:
//!
//! - **Metadata Layer**: the immutable, parser-produced model - assemblies,
//!   templates and the reference-list encoding they use to describe each other
//! - **Runtime Layer**: the loader-produced objects - specialized types and
//!   functions with monotonic ids and computed layouts
//! - **Loader Layer**: the instantiation engine - the loading pipeline, the
//!   reference-list evaluator, the layout engine and the constraint solver
//!
//! ## Key Components
//!
//! - [`RuntimeLoader`] - Main entry point; loads and caches specializations
//! - [`crate::metadata`] - Assemblies, templates and generic declarations
//! - [`crate::runtime`] - Loaded types, functions and code records
//! - [`crate::prelude`] - Convenient re-exports of commonly used types
//! - [`crate::Error`] and [`crate::Result`] - Comprehensive error handling
//!
//! # Features
//!
//! - **Full generic specialization** - every `(template, arguments)` pair
//!   becomes exactly one runtime object, cycles included
//! - **Deterministic layout** - aligned field offsets, computed sizes,
//!   pointer-sized reference fields
//! - **Trait constraints** - structural trait satisfaction with overload
//!   search, backtracking and associated-member export
//! - **Atomic loading** - an API call commits its whole object graph or
//!   nothing at all
//! - **No global state** - everything lives in a loader instance behind one
//!   coarse lock
//!
//! # Usage Examples
//!
//! ## Quick Start
//!
//! Add `lodestone` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! lodestone = "0.1.0"
//! ```
//!
//! ### Loading a specialization
//!
//! ```rust,no_run
//! use lodestone::prelude::*;
//!
//! # fn assemblies() -> Vec<lodestone::Assembly> { Vec::new() }
//! let loader = RuntimeLoader::new(assemblies());
//!
//! // Register the host-implemented primitives first.
//! let int32 = loader.add_native_type("Core", "Core.Int32", 4, 4)?;
//!
//! // Load a specialization by assembly, template id and arguments.
//! let request = LoadingArguments::with_arguments("App", 0, MultiList::single(int32.type_id));
//! let list_of_int = loader.get_type(&request)?;
//! println!("size = {}, alignment = {}", list_of_int.size, list_of_int.alignment);
//! # Ok::<(), lodestone::Error>(())
//! ```

#[macro_use]
mod error;

pub mod metadata;
pub mod prelude;
pub mod runtime;

mod loader;

pub use crate::error::{Error, Result};
pub use crate::loader::{
    LoaderObserver, LoaderOptions, RuntimeLoader, BOX_EXPORT, CORE_ASSEMBLY,
    DEFAULT_LOADING_LIMIT, POINTER_EXPORT,
};
pub use crate::metadata::assembly::Assembly;
pub use crate::metadata::generics::MultiList;
pub use crate::runtime::functions::{RuntimeFunction, RuntimeFunctionCode};
pub use crate::runtime::types::RuntimeType;
pub use crate::runtime::{FunctionId, LoadingArguments, TypeId};
