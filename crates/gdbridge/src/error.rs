//! Error types for `gdbridge`.
//!
//! [`Error`] covers the failures owned by the marshaling core: resolution,
//! layout/encoding and ownership. Errors the engine reports as ordinary
//! results of an operation are a separate, pass-through type,
//! [`EngineError`].

use crate::sys;
use crate::variant::VariantType;
use std::fmt;

/// Errors raised by the marshaling core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The runtime has not been initialized, or has been shut down.
    NotInitialized,

    /// `init` was called while a runtime is already active.
    AlreadyInitialized,

    /// The engine's function table lacks a required entry.
    MissingFunction {
        /// Entry name as passed to `get_proc_address`.
        name: &'static str,
    },

    /// The engine is older than the configured minimum.
    IncompatibleEngine {
        /// Version the engine reported, as (major, minor).
        found: (u32, u32),
        /// Minimum accepted version.
        required: (u32, u32),
    },

    /// The engine has no class with this name.
    ClassNotFound {
        /// Class name.
        class: String,
    },

    /// No method bind exists for this class, name and hash.
    ///
    /// The engine does not distinguish an unknown method from a hash
    /// mismatch, so both surface here.
    MethodNotFound {
        /// Class name.
        class: String,
        /// Method name.
        method: String,
        /// Hash the caller was compiled against.
        hash: i64,
    },

    /// No builtin method exists for this type, name and hash.
    BuiltinMethodNotFound {
        /// Builtin type owning the method.
        ty: VariantType,
        /// Method name.
        method: String,
        /// Hash the caller was compiled against.
        hash: i64,
    },

    /// No utility function exists for this name and hash.
    UtilityNotFound {
        /// Function name.
        name: String,
        /// Hash the caller was compiled against.
        hash: i64,
    },

    /// A vararg method was opened in a fixed-arity frame.
    VarargMethod {
        /// Owning class or type.
        class: &'static str,
        /// Method name.
        method: &'static str,
    },

    /// The engine rejected a Variant-argument call.
    CallFailed {
        /// Owning class or type.
        class: String,
        /// Method name.
        method: String,
        /// What went wrong.
        kind: CallErrorKind,
        /// Index of the offending argument, for argument errors.
        argument: i32,
        /// Expected type discriminant or argument count.
        expected: i32,
    },

    /// A Variant held a different type than the call site expected.
    TypeMismatch {
        /// Type the call site decodes.
        expected: VariantType,
        /// Type found in the Variant.
        got: VariantType,
    },

    /// An object is not an instance of the expected class.
    ClassMismatch {
        /// Class the call site expects.
        expected: &'static str,
    },

    /// An engine discriminant outside the known type range.
    UnknownVariantType {
        /// Raw discriminant.
        raw: u32,
    },

    /// A Variant kind that has no host-owned representation.
    UnsupportedValue {
        /// The kind encountered.
        ty: VariantType,
    },

    /// Number of pushed arguments differs from the method's arity.
    ArgumentCountMismatch {
        /// Arity of the method.
        expected: usize,
        /// Arguments supplied.
        got: usize,
    },

    /// A refcounted object was decoded into a non-owning reference.
    RefCountedObject {
        /// Class the call site asked for.
        class: &'static str,
    },

    /// A numeric value does not fit the host or engine type it is converted to.
    ValueOutOfRange {
        /// Target type.
        ty: &'static str,
        /// The value, as text.
        value: String,
    },

    /// A name the engine cannot accept.
    InvalidName {
        /// The offending name.
        name: String,
    },

    /// A non-nullable object position held null.
    NullObject,

    /// A handle was registered with a Lifetime that already ended.
    LifetimeEnded,

    /// The object behind a raw reference has been destroyed.
    ObjectFreed {
        /// Instance id the reference was taken with.
        instance_id: u64,
    },

    /// A refcount decrement without a matching increment.
    UnbalancedRelease {
        /// Instance id of the object.
        instance_id: u64,
    },

    /// A host class with this name is already registered.
    ClassAlreadyRegistered {
        /// Class name.
        class: &'static str,
    },

    /// A host instance is already borrowed, e.g. by its own virtual call.
    InstanceBusy {
        /// Host class name.
        class: &'static str,
    },

    /// A method's returned object is not documented as handed to the caller.
    NotTransferred {
        /// Class name.
        class: String,
        /// Method name.
        method: String,
    },

    /// A configuration value could not be parsed.
    InvalidConfig {
        /// Configuration key.
        key: &'static str,
        /// Rejected value.
        value: String,
    },

    /// An engine call the core makes on its own behalf reported failure.
    Engine(EngineError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotInitialized => write!(f, "runtime is not initialized"),
            Error::AlreadyInitialized => write!(f, "runtime is already initialized"),
            Error::MissingFunction { name } => {
                write!(f, "engine function table has no entry '{name}'")
            }
            Error::IncompatibleEngine { found, required } => write!(
                f,
                "engine version {}.{} is older than required {}.{}",
                found.0, found.1, required.0, required.1
            ),
            Error::ClassNotFound { class } => write!(f, "class '{class}' not found"),
            Error::MethodNotFound {
                class,
                method,
                hash,
            } => write!(
                f,
                "method '{class}::{method}' not found (hash {hash}, unknown method or hash mismatch)"
            ),
            Error::BuiltinMethodNotFound { ty, method, hash } => write!(
                f,
                "builtin method '{}::{method}' not found (hash {hash})",
                ty.name()
            ),
            Error::UtilityNotFound { name, hash } => {
                write!(f, "utility function '{name}' not found (hash {hash})")
            }
            Error::VarargMethod { class, method } => write!(
                f,
                "'{class}::{method}' takes variable arguments and has no ptrcall form"
            ),
            Error::CallFailed {
                class,
                method,
                kind,
                argument,
                expected,
            } => match kind {
                CallErrorKind::InvalidArgument => {
                    let expected = u32::try_from(*expected)
                        .ok()
                        .and_then(|raw| VariantType::from_raw(raw).ok())
                        .map_or("unknown type", VariantType::name);
                    write!(
                        f,
                        "call to '{class}::{method}' failed: argument {argument} should be {expected}"
                    )
                }
                CallErrorKind::TooManyArguments | CallErrorKind::TooFewArguments => write!(
                    f,
                    "call to '{class}::{method}' failed: {kind:?}, expected {expected}"
                ),
                _ => write!(f, "call to '{class}::{method}' failed: {kind:?}"),
            },
            Error::TypeMismatch { expected, got } => write!(
                f,
                "type mismatch: expected {}, got {}",
                expected.name(),
                got.name()
            ),
            Error::ClassMismatch { expected } => {
                write!(f, "object is not an instance of '{expected}'")
            }
            Error::UnknownVariantType { raw } => write!(f, "unknown variant type {raw}"),
            Error::UnsupportedValue { ty } => {
                write!(f, "{} has no host-owned representation", ty.name())
            }
            Error::ArgumentCountMismatch { expected, got } => write!(
                f,
                "argument count mismatch: expected {expected}, got {got}"
            ),
            Error::RefCountedObject { class } => write!(
                f,
                "refcounted object cannot be borrowed as ObjectRef<{class}>; decode it as Ref"
            ),
            Error::ValueOutOfRange { ty, value } => {
                write!(f, "value {value} is out of range for {ty}")
            }
            Error::InvalidName { name } => write!(f, "invalid engine name {name:?}"),
            Error::NullObject => write!(f, "unexpected null object"),
            Error::LifetimeEnded => write!(f, "lifetime has already ended"),
            Error::ObjectFreed { instance_id } => {
                write!(f, "object {instance_id} has been freed")
            }
            Error::UnbalancedRelease { instance_id } => write!(
                f,
                "release of object {instance_id} without a matching acquire"
            ),
            Error::ClassAlreadyRegistered { class } => {
                write!(f, "class '{class}' is already registered")
            }
            Error::InstanceBusy { class } => {
                write!(f, "instance of '{class}' is already in use")
            }
            Error::NotTransferred { class, method } => {
                write!(f, "'{class}::{method}' does not transfer its return value")
            }
            Error::InvalidConfig { key, value } => {
                write!(f, "invalid value {value:?} for {key}")
            }
            Error::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Engine(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::Engine(err)
    }
}

/// Result type for `gdbridge` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why the engine rejected a Variant-argument call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    InvalidMethod,
    InvalidArgument,
    TooManyArguments,
    TooFewArguments,
    InstanceIsNull,
    MethodNotConst,
    /// A code newer than this crate.
    Other(i32),
}

impl CallErrorKind {
    /// `None` for success.
    pub const fn from_raw(code: i32) -> Option<Self> {
        Some(match code {
            sys::CALL_OK => return None,
            sys::CALL_ERROR_INVALID_METHOD => CallErrorKind::InvalidMethod,
            sys::CALL_ERROR_INVALID_ARGUMENT => CallErrorKind::InvalidArgument,
            sys::CALL_ERROR_TOO_MANY_ARGUMENTS => CallErrorKind::TooManyArguments,
            sys::CALL_ERROR_TOO_FEW_ARGUMENTS => CallErrorKind::TooFewArguments,
            sys::CALL_ERROR_INSTANCE_IS_NULL => CallErrorKind::InstanceIsNull,
            sys::CALL_ERROR_METHOD_NOT_CONST => CallErrorKind::MethodNotConst,
            other => CallErrorKind::Other(other),
        })
    }

    pub const fn raw(self) -> i32 {
        match self {
            CallErrorKind::InvalidMethod => sys::CALL_ERROR_INVALID_METHOD,
            CallErrorKind::InvalidArgument => sys::CALL_ERROR_INVALID_ARGUMENT,
            CallErrorKind::TooManyArguments => sys::CALL_ERROR_TOO_MANY_ARGUMENTS,
            CallErrorKind::TooFewArguments => sys::CALL_ERROR_TOO_FEW_ARGUMENTS,
            CallErrorKind::InstanceIsNull => sys::CALL_ERROR_INSTANCE_IS_NULL,
            CallErrorKind::MethodNotConst => sys::CALL_ERROR_METHOD_NOT_CONST,
            CallErrorKind::Other(code) => code,
        }
    }
}

/// Converts the status block of a Variant-argument call.
pub(crate) fn check_call(class: &str, method: &str, status: sys::CallError) -> Result<()> {
    match CallErrorKind::from_raw(status.error) {
        None => Ok(()),
        Some(kind) => Err(Error::CallFailed {
            class: class.to_owned(),
            method: method.to_owned(),
            kind,
            argument: status.argument,
            expected: status.expected,
        }),
    }
}

/// The status block reporting `err` back to the engine from a host callback.
pub(crate) fn call_status(err: &Error) -> sys::CallError {
    let (kind, argument, expected) = match err {
        Error::ArgumentCountMismatch { expected, got } if got > expected => {
            (CallErrorKind::TooManyArguments, 0, *expected)
        }
        Error::ArgumentCountMismatch { expected, .. } => (CallErrorKind::TooFewArguments, 0, *expected),
        Error::TypeMismatch { expected, .. } => (CallErrorKind::InvalidArgument, 0, expected.raw() as usize),
        Error::CallFailed {
            kind,
            argument,
            expected,
            ..
        } => {
            return sys::CallError {
                error: kind.raw(),
                argument: *argument,
                expected: *expected,
            };
        }
        _ => (CallErrorKind::InvalidMethod, 0, 0),
    };
    sys::CallError {
        error: kind.raw(),
        argument,
        expected: i32::try_from(expected).unwrap_or(i32::MAX),
    }
}

/// Operation errors reported by the engine itself.
///
/// These travel through wrappers as ordinary return values; the core never
/// interprets them. Code 0 means success and has no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
#[allow(missing_docs)]
pub enum EngineError {
    Failed = 1,
    Unavailable = 2,
    Unconfigured = 3,
    Unauthorized = 4,
    ParameterRangeError = 5,
    OutOfMemory = 6,
    FileNotFound = 7,
    FileBadDrive = 8,
    FileBadPath = 9,
    FileNoPermission = 10,
    FileAlreadyInUse = 11,
    FileCantOpen = 12,
    FileCantWrite = 13,
    FileCantRead = 14,
    FileUnrecognized = 15,
    FileCorrupt = 16,
    FileMissingDependencies = 17,
    FileEof = 18,
    CantOpen = 19,
    CantCreate = 20,
    QueryFailed = 21,
    AlreadyInUse = 22,
    Locked = 23,
    Timeout = 24,
    CantConnect = 25,
    CantResolve = 26,
    ConnectionError = 27,
    CantAcquireResource = 28,
    CantFork = 29,
    InvalidData = 30,
    InvalidParameter = 31,
    AlreadyExists = 32,
    DoesNotExist = 33,
    DatabaseCantRead = 34,
    DatabaseCantWrite = 35,
    CompilationFailed = 36,
    MethodNotFound = 37,
    LinkFailed = 38,
    ScriptFailed = 39,
    CyclicLink = 40,
    InvalidDeclaration = 41,
    DuplicateSymbol = 42,
    ParseError = 43,
    Busy = 44,
    Skip = 45,
    Help = 46,
    Bug = 47,
    PrinterOnFire = 48,
}

impl EngineError {
    const ALL: [EngineError; 48] = [
        EngineError::Failed,
        EngineError::Unavailable,
        EngineError::Unconfigured,
        EngineError::Unauthorized,
        EngineError::ParameterRangeError,
        EngineError::OutOfMemory,
        EngineError::FileNotFound,
        EngineError::FileBadDrive,
        EngineError::FileBadPath,
        EngineError::FileNoPermission,
        EngineError::FileAlreadyInUse,
        EngineError::FileCantOpen,
        EngineError::FileCantWrite,
        EngineError::FileCantRead,
        EngineError::FileUnrecognized,
        EngineError::FileCorrupt,
        EngineError::FileMissingDependencies,
        EngineError::FileEof,
        EngineError::CantOpen,
        EngineError::CantCreate,
        EngineError::QueryFailed,
        EngineError::AlreadyInUse,
        EngineError::Locked,
        EngineError::Timeout,
        EngineError::CantConnect,
        EngineError::CantResolve,
        EngineError::ConnectionError,
        EngineError::CantAcquireResource,
        EngineError::CantFork,
        EngineError::InvalidData,
        EngineError::InvalidParameter,
        EngineError::AlreadyExists,
        EngineError::DoesNotExist,
        EngineError::DatabaseCantRead,
        EngineError::DatabaseCantWrite,
        EngineError::CompilationFailed,
        EngineError::MethodNotFound,
        EngineError::LinkFailed,
        EngineError::ScriptFailed,
        EngineError::CyclicLink,
        EngineError::InvalidDeclaration,
        EngineError::DuplicateSymbol,
        EngineError::ParseError,
        EngineError::Busy,
        EngineError::Skip,
        EngineError::Help,
        EngineError::Bug,
        EngineError::PrinterOnFire,
    ];

    /// Converts an engine status code.
    ///
    /// `Ok(())` for 0; codes outside the documented range map to
    /// [`EngineError::Failed`].
    pub fn check(code: i64) -> std::result::Result<(), EngineError> {
        match code {
            0 => Ok(()),
            1..=48 => Err(Self::ALL[(code - 1) as usize]),
            _ => Err(EngineError::Failed),
        }
    }

    /// The engine's integer code.
    pub const fn code(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine error {:?} ({})", self, self.code())
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MethodNotFound {
            class: "Node".into(),
            method: "fly".into(),
            hash: 42,
        };
        assert_eq!(
            err.to_string(),
            "method 'Node::fly' not found (hash 42, unknown method or hash mismatch)"
        );

        let err = Error::TypeMismatch {
            expected: VariantType::String,
            got: VariantType::Int,
        };
        assert_eq!(err.to_string(), "type mismatch: expected String, got int");

        let err = Error::ArgumentCountMismatch {
            expected: 2,
            got: 3,
        };
        assert_eq!(err.to_string(), "argument count mismatch: expected 2, got 3");

        let err = Error::ValueOutOfRange {
            ty: "u8",
            value: "300".into(),
        };
        assert_eq!(err.to_string(), "value 300 is out of range for u8");
    }

    #[test]
    fn test_call_status_round_trip() {
        assert_eq!(check_call("Object", "call", sys::CallError::default()), Ok(()));

        let status = sys::CallError {
            error: sys::CALL_ERROR_INVALID_ARGUMENT,
            argument: 1,
            expected: VariantType::Float.raw() as i32,
        };
        let err = check_call("Fixture", "sum_all", status).unwrap_err();
        assert_eq!(
            err.to_string(),
            "call to 'Fixture::sum_all' failed: argument 1 should be float"
        );
        assert_eq!(call_status(&err), status);

        let few = call_status(&Error::ArgumentCountMismatch {
            expected: 2,
            got: 1,
        });
        assert_eq!(few.error, sys::CALL_ERROR_TOO_FEW_ARGUMENTS);
        assert_eq!(few.expected, 2);
        assert_eq!(CallErrorKind::from_raw(42), Some(CallErrorKind::Other(42)));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::LifetimeEnded, Error::LifetimeEnded);
        assert_ne!(
            Error::ObjectFreed { instance_id: 1 },
            Error::ObjectFreed { instance_id: 2 }
        );
    }

    #[test]
    fn test_engine_error_codes_round_trip() {
        assert_eq!(EngineError::check(0), Ok(()));
        for code in 1..=48 {
            let err = EngineError::check(code).unwrap_err();
            assert_eq!(err.code(), code);
        }
        assert_eq!(EngineError::check(7), Err(EngineError::FileNotFound));
        assert_eq!(EngineError::check(-3), Err(EngineError::Failed));
        assert_eq!(EngineError::check(900), Err(EngineError::Failed));
    }
}
