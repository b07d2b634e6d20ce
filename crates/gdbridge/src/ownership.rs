//! Ownership disciplines for engine handles.
//!
//! Every handle the core hands out is wrapped in exactly one discipline type,
//! and the wrapper alone decides how and when the native value is released:
//!
//! | discipline | wrapper | released by |
//! |---|---|---|
//! | [`Ownership::Arena`] | [`Local`](crate::lifetime::Local) | end of its [`Lifetime`](crate::lifetime::Lifetime) |
//! | [`Ownership::RefCounted`] | [`Ref`](crate::refcount::Ref) | last `Drop`, through the refcount bridge |
//! | [`Ownership::Transferred`] | [`Owned`] | its own `Drop` |
//! | [`Ownership::Raw`] | [`ObjectRef`](crate::object::ObjectRef), plain data | never (not owned) |
//!
//! None of the wrappers is `Copy`, and moving a value between disciplines
//! consumes the source wrapper, so a handle cannot reach two release paths.
//!
//! Which discipline governs a method's return value is usually implied by
//! its type. Where it is not, [`ReturnContract`] holds the per-method rule.

use crate::error::{Error, Result};
use crate::lifetime::{Lifetime, Local};
use crate::runtime::{self, Runtime};
use gdbridge_log::debug;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{OnceLock, PoisonError, RwLock};

/// The closed set of ownership disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Released in bulk when the owning Lifetime ends.
    Arena,
    /// Governed by the object's native reference count.
    RefCounted,
    /// Owned outright by the holder.
    Transferred,
    /// Not owned: plain data, or a borrowed manually managed object.
    Raw,
}

/// Static discipline tag of a wrapper type.
pub trait Discipline {
    const OWNERSHIP: Ownership;
}

/// A native value that can be released exactly once.
///
/// # Safety
///
/// `release` must free exactly the native resources the value owns.
pub unsafe trait Transfer: Sized {
    /// Releases the native value.
    ///
    /// # Safety
    ///
    /// Must be called at most once, and `self` must not be used afterwards.
    unsafe fn release(&mut self, runtime: &Runtime);
}

/// A value whose native storage belongs solely to the holder.
///
/// Dropping an `Owned` releases the value. To keep a transferred value
/// around for the rest of a unit of work instead, move it into a
/// [`Lifetime`] with [`into_local`](Owned::into_local). To give it to the
/// engine (adding a child node to a parent, for example) call
/// [`leak`](Owned::leak).
pub struct Owned<T: Transfer> {
    value: ManuallyDrop<T>,
}

impl<T: Transfer> Owned<T> {
    /// Takes ownership of a raw value.
    ///
    /// # Safety
    ///
    /// Nobody else may release `value`.
    pub unsafe fn from_raw(value: T) -> Self {
        Owned {
            value: ManuallyDrop::new(value),
        }
    }

    /// Gives up ownership without releasing.
    ///
    /// The caller (usually the engine) becomes responsible for the value.
    pub fn leak(self) -> T {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the value is moved out once.
        unsafe { ManuallyDrop::take(&mut this.value) }
    }

    /// Releases the value now, through `runtime`.
    pub fn release_with(self, runtime: &Runtime) {
        let mut value = self.leak();
        unsafe { value.release(runtime) };
    }
}

impl<T: crate::builtin::Builtin> Owned<T> {
    /// Moves the value under the arena discipline of `lifetime`.
    ///
    /// # Errors
    ///
    /// [`Error::LifetimeEnded`] if `lifetime` has ended; the value is
    /// released before returning.
    pub fn into_local(self, lifetime: &Lifetime) -> Result<Local<'_, T>> {
        lifetime.adopt(self)
    }

    /// Copies the value into a new owned handle.
    pub fn duplicate(&self) -> Result<Owned<T>> {
        let runtime = runtime::get()?;
        let copy = unsafe { self.value.copy_in(&runtime)? };
        Ok(unsafe { Owned::from_raw(copy) })
    }
}

impl<T: Transfer> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Transfer> DerefMut for Owned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Transfer> Drop for Owned<T> {
    fn drop(&mut self) {
        runtime::release_or_leak(&mut *self.value, std::any::type_name::<T>());
    }
}

impl<T: Transfer> Discipline for Owned<T> {
    const OWNERSHIP: Ownership = Ownership::Transferred;
}

impl<T: Transfer + fmt::Debug> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&*self.value).finish()
    }
}

/// Memory-management kind of an engine class, as declared by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassMemory {
    RefCounted,
    Manual,
}

/// Per-method ownership of returned values.
///
/// Explicit entries win. Otherwise builtin handles are `Arena`, objects of
/// refcounted classes are `RefCounted` and objects of manually managed
/// classes are `Raw` (borrowed from the engine's object graph).
///
/// The engine documents a handful of methods that hand a freshly created,
/// unparented object to the caller; those are seeded as `Transferred`.
/// Generated code registers any further exceptions with
/// [`ReturnContract::register`].
pub struct ReturnContract {
    entries: RwLock<hashbrown::HashMap<(String, String), Ownership>>,
}

const SEEDED: &[(&str, &str, Ownership)] = &[
    ("PackedScene", "instantiate", Ownership::Transferred),
    ("Node", "duplicate", Ownership::Transferred),
    ("ClassDB", "instantiate", Ownership::Transferred),
    ("Node3D", "duplicate", Ownership::Transferred),
    ("CanvasItem", "duplicate", Ownership::Transferred),
    ("Node", "get_node", Ownership::Raw),
    ("Node", "get_parent", Ownership::Raw),
    ("Node", "get_child", Ownership::Raw),
    ("Node", "get_tree", Ownership::Raw),
];

impl ReturnContract {
    /// The process-wide table.
    pub fn global() -> &'static ReturnContract {
        static TABLE: OnceLock<ReturnContract> = OnceLock::new();
        TABLE.get_or_init(|| {
            let entries = SEEDED
                .iter()
                .map(|&(class, method, ownership)| {
                    ((class.to_owned(), method.to_owned()), ownership)
                })
                .collect();
            ReturnContract {
                entries: RwLock::new(entries),
            }
        })
    }

    /// Records the discipline of `class::method`'s return value.
    pub fn register(&self, class: &str, method: &str, ownership: Ownership) {
        debug!("return contract {}::{} = {:?}", class, method, ownership);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((class.to_owned(), method.to_owned()), ownership);
    }

    /// Discipline of an object returned by `class::method`.
    pub fn for_object(&self, class: &str, method: &str, memory: ClassMemory) -> Ownership {
        if let Some(&ownership) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(class.to_owned(), method.to_owned()))
        {
            return ownership;
        }
        match memory {
            ClassMemory::RefCounted => Ownership::RefCounted,
            ClassMemory::Manual => Ownership::Raw,
        }
    }

    /// Discipline of a builtin handle returned by any method.
    pub const fn for_builtin(&self) -> Ownership {
        Ownership::Arena
    }

    /// Fails unless `class::method` is documented to transfer its result.
    pub fn expect_transferred(&self, class: &str, method: &str, memory: ClassMemory) -> Result<()> {
        match self.for_object(class, method, memory) {
            Ownership::Transferred => Ok(()),
            _ => Err(Error::NotTransferred {
                class: class.to_owned(),
                method: method.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_contracts() {
        let table = ReturnContract::global();
        assert_eq!(
            table.for_object("PackedScene", "instantiate", ClassMemory::Manual),
            Ownership::Transferred
        );
        assert_eq!(
            table.for_object("Node", "get_parent", ClassMemory::Manual),
            Ownership::Raw
        );
    }

    #[test]
    fn test_default_rule() {
        let table = ReturnContract::global();
        assert_eq!(
            table.for_object("Resource", "duplicate", ClassMemory::RefCounted),
            Ownership::RefCounted
        );
        assert_eq!(
            table.for_object("Window", "get_viewport", ClassMemory::Manual),
            Ownership::Raw
        );
        assert_eq!(table.for_builtin(), Ownership::Arena);
    }

    #[test]
    fn test_registered_entry_overrides_default() {
        let table = ReturnContract::global();
        table.register("Fixture", "spawn_child", Ownership::Transferred);
        assert_eq!(
            table.for_object("Fixture", "spawn_child", ClassMemory::Manual),
            Ownership::Transferred
        );
        assert!(table
            .expect_transferred("Fixture", "spawn_child", ClassMemory::Manual)
            .is_ok());
        assert!(table
            .expect_transferred("Fixture", "peek_child", ClassMemory::Manual)
            .is_err());
    }
}
