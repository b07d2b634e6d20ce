//! Scoped release of arena-discipline handles.
//!
//! A [`Lifetime`] is one unit of engine-side work. Every transient handle
//! produced during that work (decoded strings, returned arrays, temporary
//! Variants) is registered with it and handed back as a [`Local`], which
//! borrows the Lifetime. Ending the Lifetime releases every registered handle
//! exactly once, in reverse registration order.
//!
//! # Architecture
//!
//! - Each handle lives in its own boxed slot, so the address a `Local` points
//!   to never moves while more handles are registered.
//! - A slot stores the token bytes plus a release function monomorphized for
//!   the token's type; ending the Lifetime walks the slots back to front.
//! - `end` takes `&mut self`, so it cannot run while any `Local` is alive.
//!   A second `end` (or the implicit one on drop) releases nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut lifetime = Lifetime::new()?;
//! let greeting = GString::new(&lifetime, "hello")?;
//! let variant = greeting.encode(&lifetime)?;
//! assert_eq!(String::decode(&variant, &lifetime)?, "hello");
//! assert_eq!(lifetime.end(), 3);
//! ```

use crate::builtin::Builtin;
use crate::error::{Error, Result};
use crate::ownership::{Discipline, Owned, Ownership, Transfer};
use crate::runtime::{self, Runtime};
use gdbridge_log::{trace, warn};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

/// Largest token a Lifetime can hold (a `Variant`).
pub const PAYLOAD_BYTES: usize = 24;

type ReleaseFn = unsafe fn(NonNull<u8>, &Runtime);

struct ArenaSlot {
    payload: [u64; PAYLOAD_BYTES / 8],
    release: ReleaseFn,
    type_name: &'static str,
    #[cfg(feature = "lifetime_backtrace")]
    site: Option<backtrace::Backtrace>,
}

unsafe fn release_slot<T: Transfer>(ptr: NonNull<u8>, runtime: &Runtime) {
    unsafe { (*ptr.cast::<T>().as_ptr()).release(runtime) }
}

/// One scope of engine-side allocation.
///
/// `Lifetime` is neither `Send` nor `Sync`; use one per unit of work.
pub struct Lifetime {
    runtime: Arc<Runtime>,
    slots: RefCell<Vec<NonNull<ArenaSlot>>>,
    ended: Cell<bool>,
    released: Cell<usize>,
}

impl Lifetime {
    /// Opens a Lifetime against the active runtime.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] outside `init`/`shutdown`.
    pub fn new() -> Result<Self> {
        Ok(Self::with_runtime(runtime::get()?))
    }

    pub fn with_runtime(runtime: Arc<Runtime>) -> Self {
        Lifetime {
            runtime,
            slots: RefCell::new(Vec::new()),
            ended: Cell::new(false),
            released: Cell::new(0),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Takes ownership of `value` until the Lifetime ends.
    ///
    /// # Errors
    ///
    /// [`Error::LifetimeEnded`] after [`end`](Lifetime::end). The value is
    /// released immediately in that case, so it does not leak.
    pub fn register<T: Transfer + 'static>(&self, mut value: T) -> Result<Local<'_, T>> {
        const {
            assert!(size_of::<T>() <= PAYLOAD_BYTES, "token too large for a Lifetime slot");
            assert!(align_of::<T>() <= 8, "token over-aligned for a Lifetime slot");
        };

        if self.ended.get() {
            unsafe { value.release(&self.runtime) };
            return Err(Error::LifetimeEnded);
        }

        let slot = Box::new(ArenaSlot {
            payload: [0; PAYLOAD_BYTES / 8],
            release: release_slot::<T>,
            type_name: std::any::type_name::<T>(),
            #[cfg(feature = "lifetime_backtrace")]
            site: self
                .runtime
                .config()
                .track_lifetime_sites
                .then(backtrace::Backtrace::new_unresolved),
        });
        let slot = NonNull::from(Box::leak(slot));
        let payload = unsafe { NonNull::new_unchecked((*slot.as_ptr()).payload.as_mut_ptr()) }
            .cast::<T>();
        unsafe { payload.as_ptr().write(value) };

        self.slots.borrow_mut().push(slot);
        Ok(Local {
            ptr: payload,
            _lifetime: PhantomData,
        })
    }

    /// Moves a transferred value under this Lifetime.
    pub fn adopt<T: Builtin>(&self, owned: Owned<T>) -> Result<Local<'_, T>> {
        self.register(owned.leak())
    }

    /// Registers an empty token for the engine to construct into.
    pub fn empty<T: Builtin>(&self) -> Result<Local<'_, T>> {
        self.register(T::empty())
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ended(&self) -> bool {
        self.ended.get()
    }

    /// Total handles released by this Lifetime so far.
    pub fn released(&self) -> usize {
        self.released.get()
    }

    /// Releases every registered handle, newest first.
    ///
    /// Returns how many handles were released. Ending an ended Lifetime
    /// releases nothing and returns 0.
    pub fn end(&mut self) -> usize {
        if self.ended.replace(true) {
            return 0;
        }

        let slots = std::mem::take(self.slots.get_mut());
        let count = slots.len();
        for slot in slots.into_iter().rev() {
            // SAFETY: every slot came from Box::leak in `register` and is
            // visited once; no Local can be alive while `&mut self` is held.
            let mut slot = unsafe { Box::from_raw(slot.as_ptr()) };
            let payload = NonNull::from(&mut slot.payload).cast::<u8>();
            unsafe { (slot.release)(payload, &self.runtime) };
            trace!("lifetime released {}", slot.type_name);
        }

        self.released.set(self.released.get() + count);
        if count > 0 {
            trace!("lifetime ended; {} handles released", count);
        }
        count
    }

    /// Registration backtraces of the live handles, oldest first.
    ///
    /// Empty unless `Config::track_lifetime_sites` was set.
    #[cfg(feature = "lifetime_backtrace")]
    pub fn registration_sites(&self) -> Vec<(&'static str, String)> {
        self.slots
            .borrow()
            .iter()
            .filter_map(|slot| {
                let slot = unsafe { slot.as_ref() };
                let mut site = slot.site.clone()?;
                site.resolve();
                Some((slot.type_name, format!("{site:?}")))
            })
            .collect()
    }
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        if std::thread::panicking() && !self.ended.get() {
            warn!("lifetime dropped during a panic; releasing {} handles", self.len());
        }
        self.end();
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("live", &self.len())
            .field("released", &self.released.get())
            .field("ended", &self.ended.get())
            .finish()
    }
}

/// An arena-discipline handle, valid for the Lifetime it borrows.
///
/// A `Local` never releases anything itself. It is neither `Send` nor
/// `Clone`.
pub struct Local<'l, T: Transfer> {
    ptr: NonNull<T>,
    _lifetime: PhantomData<&'l Lifetime>,
}

impl<'l, T: Builtin> Local<'l, T> {
    /// Copies the value into `lifetime`.
    pub fn duplicate<'m>(&self, lifetime: &'m Lifetime) -> Result<Local<'m, T>> {
        let copy = unsafe { (**self).copy_in(lifetime.runtime())? };
        lifetime.register(copy)
    }

    /// Copies the value out into a handle that outlives the Lifetime.
    pub fn to_owned_handle(&self) -> Result<Owned<T>> {
        let runtime = runtime::get()?;
        let copy = unsafe { (**self).copy_in(&runtime)? };
        Ok(unsafe { Owned::from_raw(copy) })
    }
}

impl<T: Transfer> Deref for Local<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Transfer> DerefMut for Local<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: Transfer> Discipline for Local<'_, T> {
    const OWNERSHIP: Ownership = Ownership::Arena;
}

impl<T: Transfer + fmt::Debug> fmt::Debug for Local<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Local").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::GString;
    use crate::test_support;

    #[test]
    fn test_end_releases_every_handle_once() {
        let runtime = test_support::runtime();
        let mut lifetime = Lifetime::with_runtime(runtime);
        let words: Vec<u64> = (0..4)
            .map(|i| GString::new(&lifetime, &format!("s{i}")).unwrap().raw_word())
            .collect();
        assert_eq!(lifetime.len(), 4);
        assert!(words.iter().all(|&w| gdbridge_headless::string_is_live(w)));

        assert_eq!(lifetime.end(), 4);
        assert!(words.iter().all(|&w| !gdbridge_headless::string_is_live(w)));
        assert_eq!(lifetime.end(), 0);
        assert_eq!(lifetime.released(), 4);
    }

    #[test]
    fn test_register_after_end_fails_without_leaking() {
        let runtime = test_support::runtime();
        let mut lifetime = Lifetime::with_runtime(runtime.clone());
        lifetime.end();

        let raw = GString::new_raw(&runtime, "late");
        let word = raw.raw_word();
        assert!(gdbridge_headless::string_is_live(word));
        assert_eq!(lifetime.register(raw).err(), Some(Error::LifetimeEnded));
        assert!(!gdbridge_headless::string_is_live(word));
    }

    #[test]
    fn test_drop_ends_lifetime() {
        let runtime = test_support::runtime();
        let word = {
            let lifetime = Lifetime::with_runtime(runtime);
            GString::new(&lifetime, "scoped").unwrap().raw_word()
        };
        assert!(!gdbridge_headless::string_is_live(word));
    }

    #[test]
    fn test_local_addresses_are_stable() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let first = GString::new(&lifetime, "first").unwrap();
        let address = &*first as *const GString;
        for i in 0..64 {
            GString::new(&lifetime, &i.to_string()).unwrap();
        }
        assert_eq!(&*first as *const GString, address);
        assert_eq!(first.to_rust(&runtime), "first");
    }

    #[test]
    fn test_duplicate_into_other_lifetime() {
        let runtime = test_support::runtime();
        let outer = Lifetime::with_runtime(runtime.clone());
        let copy = {
            let mut inner = Lifetime::with_runtime(runtime.clone());
            let original = GString::new(&inner, "carried").unwrap();
            let copy = original.duplicate(&outer).unwrap();
            inner.end();
            copy
        };
        assert_eq!(copy.to_rust(&runtime), "carried");
    }

    #[test]
    fn test_discipline_tag() {
        assert_eq!(<Local<'_, GString> as Discipline>::OWNERSHIP, Ownership::Arena);
    }
}
