//! `gdbridge`: marshaling and ownership core for binding Rust to a native
//! engine through its C function-table ABI.
//!
//! The engine hands an extension a table of opaque native functions at load
//! time. Everything a generated class wrapper needs to use that table
//! safely lives here:
//!
//! - **Resolution**: (class, method, hash) triples become cached
//!   [`MethodBind`]s.
//! - **Invocation**: fixed-arity [`CallFrame`]s stage arguments in the exact
//!   ptrcall layout and read the return slot. Vararg methods take a
//!   [`VariantFrame`] instead.
//! - **Ownership**: every native value is held through exactly one
//!   discipline ([`Local`], [`Ref`], [`Owned`] or [`ObjectRef`]) and released
//!   exactly once.
//! - **Variants**: [`Encode`] and [`Decode`] move host values in and out of
//!   the engine's tagged union.
//!
//! # Architecture
//!
//! - **`sys`**: raw ABI types and the function table
//! - **`runtime`**: the process-wide [`Runtime`] behind `init`/`shutdown`
//! - **`resolver`, `frame`**: method binds and call frames
//! - **`lifetime`, `ownership`, `object`, `refcount`**: handle disciplines
//! - **`builtin`, `variant`**: value types and the Variant codec
//! - **`classdb`, `entry`**: host classes and the extension entry point
//!
//! # Example
//!
//! ```rust,ignore
//! use gdbridge::{Decode, Encode, Lifetime};
//!
//! let lifetime = Lifetime::new()?;
//! let variant = "hello".encode(&lifetime)?;
//! assert_eq!(String::decode(&variant, &lifetime)?, "hello");
//! // Both engine strings and the Variant are released here.
//! drop(lifetime);
//! ```

pub mod builtin;
pub mod classdb;
pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod lifetime;
pub mod object;
pub mod ownership;
pub mod refcount;
pub mod resolver;
pub mod runtime;
pub mod sys;
pub mod variant;

// Re-export commonly used types
pub use builtin::{Array, Callable, Dictionary, GString, NodePath, Signal, StringName};
pub use classdb::{HostClass, Virtual, VirtualArgs, VirtualReturn};
pub use config::Config;
pub use entry::{Extension, InitLevel};
pub use error::{CallErrorKind, EngineError, Error, Result};
pub use frame::{BuiltinFrame, CallFrame, MethodFrame, Param, Signature, UtilityFrame, VariantFrame};
pub use lifetime::{Lifetime, Local};
pub use object::{Class, ManualMemory, Object, ObjectRef, RefCountedMemory};
pub use ownership::{ClassMemory, Discipline, Owned, Ownership, ReturnContract};
pub use refcount::{Ref, RefCounted};
pub use resolver::{BuiltinSpec, MethodBind, MethodSpec, UtilityFunction, UtilitySpec};
pub use runtime::{EngineVersion, Runtime};
pub use variant::{Decode, Encode, Value, Variant, VariantType};
