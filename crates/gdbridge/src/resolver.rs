//! Method-bind resolution and caching.
//!
//! Generated wrappers describe each engine method with a `static`
//! [`MethodSpec`] and ask the runtime for the matching [`MethodBind`]. The
//! first request goes to the engine; every later one is a cache lookup.
//!
//! # Architecture
//!
//! Binds are cached per (class, method, hash) in a sharded map:
//! - `NUM_SHARDS` (16) shards, each an `RwLock` around an FxHash map
//! - shard selection is `fxhash(key) & SHARD_MASK`
//! - a hit takes one read lock on one shard
//! - a miss resolves through the engine with no lock held, then takes one
//!   write lock to publish
//!
//! Class entries (engine class tag plus the class's interned engine name)
//! are cached separately and boxed, so raw pointers to their names stay
//! valid while the map grows. They are released at shutdown.
//!
//! Builtin value-type methods (`PackedInt64Array.resize` and friends) use
//! the same scheme through [`BuiltinSpec`] and [`BuiltinMethod`], and global
//! utility functions (`absi`, `maxi`) through [`UtilitySpec`] and
//! [`UtilityFunction`].

use crate::builtin::{Builtin, StringName};
use crate::error::{Error, Result};
use crate::frame::{Callee, Signature};
use crate::ownership::Transfer;
use crate::runtime::Runtime;
use crate::sys::{self, ClassTag, ConstStringNamePtr, MethodBindPtr};
use crate::variant::VariantType;
use fxhash::FxBuildHasher;
use gdbridge_log::{debug, error};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

const NUM_SHARDS: usize = 16;
const SHARD_MASK: usize = NUM_SHARDS - 1;

type FxMap<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;

/// Static description of one engine method, as emitted by generated code.
#[derive(Debug)]
pub struct MethodSpec {
    pub class: &'static str,
    pub method: &'static str,
    /// Engine hash of the method signature.
    pub hash: i64,
    pub signature: Signature,
}

impl MethodSpec {
    pub const fn new(
        class: &'static str,
        method: &'static str,
        hash: i64,
        signature: Signature,
    ) -> Self {
        MethodSpec {
            class,
            method,
            hash,
            signature,
        }
    }
}

/// Static description of one builtin value-type method.
#[derive(Debug)]
pub struct BuiltinSpec {
    pub ty: VariantType,
    pub method: &'static str,
    pub hash: i64,
    pub signature: Signature,
}

impl BuiltinSpec {
    pub const fn new(
        ty: VariantType,
        method: &'static str,
        hash: i64,
        signature: Signature,
    ) -> Self {
        BuiltinSpec {
            ty,
            method,
            hash,
            signature,
        }
    }
}

/// Static description of one global utility function.
#[derive(Debug)]
pub struct UtilitySpec {
    pub name: &'static str,
    pub hash: i64,
    pub signature: Signature,
}

impl UtilitySpec {
    pub const fn new(name: &'static str, hash: i64, signature: Signature) -> Self {
        UtilitySpec {
            name,
            hash,
            signature,
        }
    }
}

type PtrcallFn =
    unsafe extern "C" fn(MethodBindPtr, sys::ObjectPtr, *const sys::ConstTypePtr, sys::TypePtr);

/// A resolved engine method.
///
/// Immutable and freely copyable; valid until the runtime shuts down.
#[derive(Clone, Copy)]
pub struct MethodBind {
    ptr: NonNull<c_void>,
    ptrcall: PtrcallFn,
    spec: &'static MethodSpec,
}

// SAFETY: the engine guarantees method binds are immutable and callable
// from any thread for the lifetime of the class database.
unsafe impl Send for MethodBind {}
unsafe impl Sync for MethodBind {}

impl MethodBind {
    pub fn spec(&self) -> &'static MethodSpec {
        self.spec
    }

    pub fn as_ptr(&self) -> MethodBindPtr {
        self.ptr.as_ptr().cast_const()
    }

    /// Calls the engine's ptrcall entry for this bind.
    ///
    /// # Safety
    ///
    /// `args` must hold one valid pointer per declared argument and `ret`
    /// must point to storage for the declared return type.
    pub(crate) unsafe fn ptrcall(
        &self,
        target: sys::ObjectPtr,
        args: *const sys::ConstTypePtr,
        ret: sys::TypePtr,
    ) {
        unsafe { (self.ptrcall)(self.as_ptr(), target, args, ret) }
    }
}

impl Callee for MethodBind {
    fn signature(&self) -> &'static Signature {
        &self.spec.signature
    }

    fn describe(&self) -> (&'static str, &'static str) {
        (self.spec.class, self.spec.method)
    }
}

impl fmt::Debug for MethodBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MethodBind({}::{} #{} @ {:p})",
            self.spec.class, self.spec.method, self.spec.hash, self.ptr
        )
    }
}

type BuiltinFn = unsafe extern "C" fn(
    sys::TypePtr,
    *const sys::ConstTypePtr,
    sys::TypePtr,
    std::ffi::c_int,
);

/// A resolved builtin value-type method.
#[derive(Clone, Copy)]
pub struct BuiltinMethod {
    func: BuiltinFn,
    spec: &'static BuiltinSpec,
}

impl BuiltinMethod {
    pub fn spec(&self) -> &'static BuiltinSpec {
        self.spec
    }

    /// # Safety
    ///
    /// As [`MethodBind::ptrcall`], with `base` pointing to a live value of
    /// the method's builtin type.
    pub(crate) unsafe fn call(
        &self,
        base: sys::TypePtr,
        args: *const sys::ConstTypePtr,
        ret: sys::TypePtr,
        count: usize,
    ) {
        unsafe { (self.func)(base, args, ret, count as std::ffi::c_int) }
    }
}

impl Callee for BuiltinMethod {
    fn signature(&self) -> &'static Signature {
        &self.spec.signature
    }

    fn describe(&self) -> (&'static str, &'static str) {
        (self.spec.ty.name(), self.spec.method)
    }
}

impl fmt::Debug for BuiltinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BuiltinMethod({}::{} #{})",
            self.spec.ty.name(),
            self.spec.method,
            self.spec.hash
        )
    }
}

type UtilityFn = unsafe extern "C" fn(sys::TypePtr, *const sys::ConstTypePtr, std::ffi::c_int);

/// A resolved utility function.
#[derive(Clone, Copy)]
pub struct UtilityFunction {
    func: UtilityFn,
    spec: &'static UtilitySpec,
}

impl UtilityFunction {
    pub fn spec(&self) -> &'static UtilitySpec {
        self.spec
    }

    /// # Safety
    ///
    /// As [`MethodBind::ptrcall`].
    pub(crate) unsafe fn call(&self, ret: sys::TypePtr, args: *const sys::ConstTypePtr, count: usize) {
        unsafe { (self.func)(ret, args, count as std::ffi::c_int) }
    }
}

impl Callee for UtilityFunction {
    fn signature(&self) -> &'static Signature {
        &self.spec.signature
    }

    fn describe(&self) -> (&'static str, &'static str) {
        ("@GlobalScope", self.spec.name)
    }
}

impl fmt::Debug for UtilityFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UtilityFunction({} #{})", self.spec.name, self.spec.hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BindKey {
    class: &'static str,
    method: &'static str,
    hash: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BuiltinKey {
    ty: VariantType,
    method: &'static str,
    hash: i64,
}

/// Engine pointer of a resolved bind. The spec is not cached with it: two
/// call sites may describe the same (class, method, hash) with different
/// host signatures, and each keeps its own.
#[derive(Clone, Copy)]
struct RawBind(NonNull<c_void>);

// SAFETY: see `MethodBind`.
unsafe impl Send for RawBind {}
unsafe impl Sync for RawBind {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct UtilityKey {
    name: &'static str,
    hash: i64,
}

struct ClassEntry {
    tag: usize,
    name: StringName,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolverStats {
    pub hits: usize,
    pub misses: usize,
    pub binds: usize,
    pub classes: usize,
}

pub(crate) struct Resolver {
    shards: [RwLock<FxMap<BindKey, RawBind>>; NUM_SHARDS],
    builtins: RwLock<FxMap<BuiltinKey, BuiltinFn>>,
    utilities: RwLock<FxMap<UtilityKey, UtilityFn>>,
    classes: RwLock<FxMap<&'static str, Box<ClassEntry>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Resolver {
    pub(crate) fn new() -> Self {
        Resolver {
            shards: std::array::from_fn(|_| RwLock::new(FxMap::default())),
            builtins: RwLock::new(FxMap::default()),
            utilities: RwLock::new(FxMap::default()),
            classes: RwLock::new(FxMap::default()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn shard(&self, key: &BindKey) -> &RwLock<FxMap<BindKey, RawBind>> {
        &self.shards[fxhash::hash(key) & SHARD_MASK]
    }

    /// Drops every cached bind and releases cached class names.
    pub(crate) fn clear(&self, runtime: &Runtime) {
        for shard in &self.shards {
            shard.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
        self.builtins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.utilities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let entries: Vec<_> = self
            .classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, mut entry) in entries {
            unsafe { entry.name.release(runtime) };
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.is_ascii() || name.contains('\0') {
        return Err(Error::InvalidName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

impl Runtime {
    /// Resolves a method bind, consulting the cache first.
    ///
    /// # Errors
    ///
    /// - [`Error::ClassNotFound`] if the engine has no such class.
    /// - [`Error::MethodNotFound`] if the class has no method with this name
    ///   and hash.
    /// - [`Error::InvalidName`] for names that are not plain ASCII.
    pub fn resolve(&self, spec: &'static MethodSpec) -> Result<MethodBind> {
        let key = BindKey {
            class: spec.class,
            method: spec.method,
            hash: spec.hash,
        };
        let shard = self.resolver.shard(&key);

        let bind = |ptr| MethodBind {
            ptr,
            ptrcall: self.interface().object_method_bind_ptrcall,
            spec,
        };

        let cached = shard
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();
        if let Some(RawBind(ptr)) = cached {
            self.resolver.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(bind(ptr));
        }

        self.resolver.misses.fetch_add(1, Ordering::Relaxed);
        validate_name(spec.method)?;
        let class = self.class_name_ptr(spec.class)?;
        let method = StringName::scoped(self, spec.method);
        let raw = unsafe {
            (self.interface().classdb_get_method_bind)(class, method.as_ptr(), spec.hash)
        };
        let Some(ptr) = NonNull::new(raw.cast_mut()) else {
            return Err(Error::MethodNotFound {
                class: spec.class.to_owned(),
                method: spec.method.to_owned(),
                hash: spec.hash,
            });
        };

        shard
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, RawBind(ptr));
        debug!("resolved {}::{} (hash {})", spec.class, spec.method, spec.hash);
        Ok(bind(ptr))
    }

    /// Resolves a bind whose absence is a binding-generation bug.
    ///
    /// # Panics
    ///
    /// If resolution fails. The error is logged first.
    pub fn bind(&self, spec: &'static MethodSpec) -> MethodBind {
        match self.resolve(spec) {
            Ok(bind) => bind,
            Err(err) => {
                error!("fatal method resolution failure: {}", err);
                panic!("unresolvable method bind: {err}");
            }
        }
    }

    /// Resolves a builtin value-type method.
    ///
    /// # Errors
    ///
    /// [`Error::BuiltinMethodNotFound`] if the engine has no such method.
    pub fn resolve_builtin(&self, spec: &'static BuiltinSpec) -> Result<BuiltinMethod> {
        let key = BuiltinKey {
            ty: spec.ty,
            method: spec.method,
            hash: spec.hash,
        };

        let cached = self
            .resolver
            .builtins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();
        if let Some(func) = cached {
            self.resolver.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(BuiltinMethod { func, spec });
        }

        self.resolver.misses.fetch_add(1, Ordering::Relaxed);
        validate_name(spec.method)?;
        let name = StringName::scoped(self, spec.method);
        let func = unsafe {
            (self.interface().variant_get_ptr_builtin_method)(
                spec.ty.raw(),
                name.as_ptr(),
                spec.hash,
            )
        }
        .ok_or_else(|| Error::BuiltinMethodNotFound {
            ty: spec.ty,
            method: spec.method.to_owned(),
            hash: spec.hash,
        })?;

        self.resolver
            .builtins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, func);
        debug!("resolved builtin {}::{}", spec.ty.name(), spec.method);
        Ok(BuiltinMethod { func, spec })
    }

    /// Resolves a global utility function.
    ///
    /// # Errors
    ///
    /// [`Error::UtilityNotFound`] if the engine has no such function.
    pub fn resolve_utility(&self, spec: &'static UtilitySpec) -> Result<UtilityFunction> {
        let key = UtilityKey {
            name: spec.name,
            hash: spec.hash,
        };

        let cached = self
            .resolver
            .utilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();
        if let Some(func) = cached {
            self.resolver.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(UtilityFunction { func, spec });
        }

        self.resolver.misses.fetch_add(1, Ordering::Relaxed);
        validate_name(spec.name)?;
        let name = StringName::scoped(self, spec.name);
        let func = unsafe { (self.interface().variant_get_ptr_utility_function)(name.as_ptr(), spec.hash) }
            .ok_or_else(|| Error::UtilityNotFound {
                name: spec.name.to_owned(),
                hash: spec.hash,
            })?;

        self.resolver
            .utilities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, func);
        debug!("resolved utility {}", spec.name);
        Ok(UtilityFunction { func, spec })
    }

    /// The engine's tag for `class`, used for checked casts.
    pub fn class_tag(&self, class: &'static str) -> Result<ClassTag> {
        self.class_entry(class).map(|(tag, _)| tag)
    }

    /// Pointer to the cached engine name of `class`.
    ///
    /// Valid until shutdown.
    pub(crate) fn class_name_ptr(&self, class: &'static str) -> Result<ConstStringNamePtr> {
        self.class_entry(class).map(|(_, name)| name)
    }

    fn class_entry(&self, class: &'static str) -> Result<(ClassTag, ConstStringNamePtr)> {
        if let Some(entry) = self
            .resolver
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
        {
            return Ok((entry.tag as ClassTag, entry.name.type_ptr()));
        }

        validate_name(class)?;
        let mut name = StringName::new_raw(self, class);
        let tag = unsafe { (self.interface().classdb_get_class_tag)(name.type_ptr()) };
        if tag.is_null() {
            unsafe { name.release(self) };
            return Err(Error::ClassNotFound {
                class: class.to_owned(),
            });
        }

        let mut classes = self
            .resolver
            .classes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = classes.get(class) {
            // Lost a race with another resolver; keep the published entry.
            unsafe { name.release(self) };
            return Ok((existing.tag as ClassTag, existing.name.type_ptr()));
        }
        let entry = Box::new(ClassEntry {
            tag: tag as usize,
            name,
        });
        let result = (entry.tag as ClassTag, entry.name.type_ptr());
        classes.insert(class, entry);
        debug!("cached class {}", class);
        Ok(result)
    }

    /// Snapshot of the resolver cache counters.
    pub fn resolver_stats(&self) -> ResolverStats {
        let binds = self
            .resolver
            .shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum::<usize>()
            + self
                .resolver
                .builtins
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
            + self
                .resolver
                .utilities
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len();
        ResolverStats {
            hits: self.resolver.hits.load(Ordering::Relaxed),
            misses: self.resolver.misses.load(Ordering::Relaxed),
            binds,
            classes: self
                .resolver
                .classes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}
