use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure inside a loading run unwinds through this enum to the API entry point; the
/// pipeline-local state is discarded and the caller receives the error unchanged. No partially
/// loaded object ever escapes into the committed tables.
///
/// # Error Categories
///
/// ## Linkage and Reference Errors
/// - [`Error::AssemblyNotFound`] - A referenced assembly is not part of the registry
/// - [`Error::InvalidTypeReference`] - A reference-list entry does not describe a type
/// - [`Error::InvalidFunctionReference`] - A reference-list entry does not describe a function
/// - [`Error::InvalidFieldReference`] - A field slot resolved to something that cannot be stored
/// - [`Error::LinkageFailure`] - An import could not be bound to a matching export
///
/// ## Specialization Errors
/// - [`Error::InvalidGenericArguments`] - Argument list shape does not match the template
/// - [`Error::CyclicDependence`] - A value type (or subtype chain) contains itself
/// - [`Error::CircularConstraint`] - A trait constraint transitively requires itself
/// - [`Error::InvalidConstraint`] - A constraint record is structurally unusable
/// - [`Error::ConstraintCheckFailure`] - A well-formed constraint could not be satisfied
///
/// ## Environment Errors
/// - [`Error::InvalidIntrinsic`] - A `Core` intrinsic template is absent or unsuitable
/// - [`Error::NativeTypeUnsuitable`] - A template does not qualify as a native type
/// - [`Error::LoadingLimitExceeded`] - The per-call object budget ran out
///
/// ## Internal Errors
/// - [`Error::Malformed`] - A template violates the reference-list encoding rules
/// - [`Error::Assertion`] - A loader invariant was broken (a bug, not a user error)
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced assembly is not present in the loader's registry.
    ///
    /// Raised whenever an import, a loading request or a template reference names
    /// an assembly the loader was not constructed with.
    #[error("Referenced assembly not found - {0}")]
    AssemblyNotFound(String),

    /// A reference-list entry could not be interpreted as a type.
    ///
    /// Covers out-of-range indices, tags that are not valid in a type position and
    /// constraint-export reads that were never recorded.
    #[error("Invalid type reference - {0}")]
    InvalidTypeReference(String),

    /// A reference-list entry could not be interpreted as a function.
    #[error("Invalid function reference - {0}")]
    InvalidFunctionReference(String),

    /// A field slot resolved to a type that cannot be stored inline.
    ///
    /// Only value-storage and reference-storage types can appear as fields; anything
    /// else (including a void slot) is rejected during layout.
    #[error("Invalid field type - {0}")]
    InvalidFieldReference(String),

    /// The generic argument list does not match the template's declared parameter shape.
    #[error("Invalid generic arguments - {0}")]
    InvalidGenericArguments(String),

    /// A value type contains itself without indirection, or a subtype lookup re-entered
    /// itself with identical arguments.
    ///
    /// Reference types may be self-referential; their pointer is published before their
    /// fields are laid out, so the cycle never materializes.
    #[error("Cyclic type dependence - {0}")]
    CyclicDependence(String),

    /// A trait constraint transitively required itself with equal arguments.
    ///
    /// This is a program error, not an unsatisfied constraint: the check can never
    /// terminate, so the template is rejected outright.
    #[error("Circular constraint check")]
    CircularConstraint,

    /// A constraint record is structurally broken (bad argument arity, a `SELF` target
    /// outside a trait, an unusable trait reference).
    #[error("Invalid constraint - {0}")]
    InvalidConstraint(String),

    /// A well-formed constraint was evaluated and could not be satisfied by any
    /// combination of overload candidates.
    #[error("Constraint check failed - {0}")]
    ConstraintCheckFailure(String),

    /// An import could not be bound to a matching export.
    ///
    /// Includes missing export names, generic-parameter-count mismatches and broken
    /// re-export chains.
    #[error("Linkage failure - {0}")]
    LinkageFailure(String),

    /// A `Core` intrinsic (`Core.Pointer`, `Core.Box`) is absent or its template does
    /// not match the required shape.
    ///
    /// Intrinsics are not validated at construction; the error surfaces when the
    /// intrinsic is first requested.
    #[error("Invalid intrinsic - {0}")]
    InvalidIntrinsic(String),

    /// A template does not qualify for native (host-provided) installation.
    ///
    /// Native types must be non-generic value types without initializer or finalizer.
    #[error("Native type unsuitable - {0}")]
    NativeTypeUnsuitable(String),

    /// The configured per-call object budget was exhausted.
    ///
    /// The associated value is the configured limit.
    #[error("Loading limit exceeded - {0} objects")]
    LoadingLimitExceeded(usize),

    /// A template violates the reference-list encoding rules.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A loader invariant was broken. This indicates a bug in the loader itself,
    /// never invalid input.
    #[error("Internal assertion - {0}")]
    Assertion(String),
}

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
