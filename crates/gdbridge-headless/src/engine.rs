//! Global state of the headless engine.
//!
//! Every allocation the engine hands out is an integer id into one of the
//! tables below; tokens carry only those ids. All tables sit behind one
//! `Mutex`, taken through [`with_engine`]. Callbacks into the host (freeing a
//! host instance) are queued while the lock is held and run after it is
//! released, so host code may call straight back into the engine.

use crate::kinds::{self, ARRAY, CALLABLE, DICTIONARY, NODE_PATH, OBJECT, SIGNAL, STRING, STRING_NAME};
use fxhash::FxHashMap;
use gdbridge_log::{error, trace};
use std::ffi::c_void;
use std::sync::{Mutex, OnceLock, PoisonError};

/// A Variant: kind word plus two payload words.
pub(crate) type Slot = [u64; 3];

/// Two-word view of any handle token; one-word tokens leave `[1]` zero.
pub(crate) type Token = [u64; 2];

pub(crate) type CreateFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
pub(crate) type FreeFn = unsafe extern "C" fn(*mut c_void, *mut c_void);
pub(crate) type GetVirtualFn = unsafe extern "C" fn(*mut c_void, *const c_void) -> *mut c_void;
pub(crate) type CallVirtualFn = unsafe extern "C" fn(
    *mut c_void,
    *const c_void,
    *mut c_void,
    *const *const c_void,
    *mut c_void,
);
pub(crate) type CustomCallFn =
    unsafe extern "C" fn(*mut c_void, *const *const c_void, i64, *mut c_void, *mut CallError);
pub(crate) type CustomFreeFn = unsafe extern "C" fn(*mut c_void);

/// Outcome of a Variant-argument call, as the engine reports it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallError {
    pub error: i32,
    pub argument: i32,
    pub expected: i32,
}

/// Storage shared by every token copy that names it.
pub(crate) struct Shared<T> {
    pub refs: usize,
    pub data: T,
}

impl<T> Shared<T> {
    fn new(data: T) -> Self {
        Shared { refs: 1, data }
    }
}

pub(crate) enum Packed {
    /// Plain elements, packed back to back in 8-byte aligned storage.
    Pod {
        elem: usize,
        len: usize,
        words: Vec<u64>,
    },
    /// String ids, owned by the array.
    Strings(Vec<u64>),
}

impl Packed {
    fn empty(ty: u32) -> Packed {
        if ty == kinds::PACKED_STRING_ARRAY {
            Packed::Strings(Vec::new())
        } else {
            Packed::Pod {
                elem: kinds::packed_element_size(ty),
                len: 0,
                words: Vec::new(),
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Packed::Pod { len, .. } => *len,
            Packed::Strings(ids) => ids.len(),
        }
    }
}

struct Interned {
    text: String,
    refs: usize,
}

/// Host callbacks of an extension class.
#[derive(Clone, Copy)]
pub(crate) struct Extension {
    pub create: Option<CreateFn>,
    pub free: Option<FreeFn>,
    pub get_virtual: Option<GetVirtualFn>,
    pub call_virtual: Option<CallVirtualFn>,
    pub userdata: usize,
}

pub(crate) struct ClassInfo {
    pub parent: Option<String>,
    pub tag: usize,
    pub refcounted: bool,
    pub extension: Option<Extension>,
}

/// A callable implemented by the host.
pub(crate) struct CustomCallable {
    pub userdata: usize,
    pub call: CustomCallFn,
    pub free: Option<CustomFreeFn>,
}

pub(crate) struct ObjectData {
    pub class: String,
    /// `Some` for RefCounted descendants.
    pub refcount: Option<i64>,
    /// Host instance attached by `object_set_instance`.
    pub instance: Option<usize>,
}

enum Deferred {
    FreeInstance {
        free: FreeFn,
        userdata: usize,
        instance: usize,
    },
    FreeCallable {
        free: CustomFreeFn,
        userdata: usize,
    },
}

impl Deferred {
    fn run(self) {
        match self {
            Deferred::FreeInstance {
                free,
                userdata,
                instance,
            } => unsafe { free(userdata as *mut c_void, instance as *mut c_void) },
            Deferred::FreeCallable { free, userdata } => unsafe { free(userdata as *mut c_void) },
        }
    }
}

/// Counts of live engine allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub strings: usize,
    pub string_names: usize,
    pub node_paths: usize,
    pub arrays: usize,
    pub dictionaries: usize,
    pub packed_arrays: usize,
    pub boxed_values: usize,
    pub objects: usize,
    pub custom_callables: usize,
    pub raw_allocations: usize,
}

pub(crate) struct Engine {
    next_id: u64,
    next_tag: usize,
    strings: FxHashMap<u64, String>,
    names: FxHashMap<u64, Interned>,
    name_ids: FxHashMap<String, u64>,
    paths: FxHashMap<u64, String>,
    pub arrays: FxHashMap<u64, Shared<Vec<Slot>>>,
    pub dictionaries: FxHashMap<u64, Shared<Vec<(Slot, Slot)>>>,
    pub packed: FxHashMap<u64, Shared<Packed>>,
    boxed: FxHashMap<u64, Vec<u64>>,
    callables: FxHashMap<u64, Shared<CustomCallable>>,
    pub objects: FxHashMap<u64, ObjectData>,
    pub destroyed: FxHashMap<u64, u32>,
    pub classes: FxHashMap<String, ClassInfo>,
    pub singletons: FxHashMap<String, u64>,
    /// (object, signal, argument count) per `emit_signal`, oldest first.
    pub emitted: Vec<(u64, String, usize)>,
    pub raw_allocations: usize,
    deferred: Vec<Deferred>,
}

fn double_release(what: &str, id: u64) -> ! {
    error!("double release of {} {}", what, id);
    panic!("double release of {what} {id}");
}

pub(crate) fn object_ptr(id: u64) -> *mut c_void {
    (id << 4) as *mut c_void
}

pub(crate) fn object_id(ptr: *const c_void) -> u64 {
    ptr as u64 >> 4
}

impl Engine {
    fn new() -> Self {
        let mut engine = Engine {
            next_id: 0x1000,
            next_tag: 0,
            strings: FxHashMap::default(),
            names: FxHashMap::default(),
            name_ids: FxHashMap::default(),
            paths: FxHashMap::default(),
            arrays: FxHashMap::default(),
            dictionaries: FxHashMap::default(),
            packed: FxHashMap::default(),
            boxed: FxHashMap::default(),
            callables: FxHashMap::default(),
            objects: FxHashMap::default(),
            destroyed: FxHashMap::default(),
            classes: FxHashMap::default(),
            singletons: FxHashMap::default(),
            emitted: Vec::new(),
            raw_allocations: 0,
            deferred: Vec::new(),
        };

        for (class, parent) in [
            ("Object", None),
            ("RefCounted", Some("Object")),
            ("Node", Some("Object")),
            ("Resource", Some("RefCounted")),
            ("Engine", Some("Object")),
            ("Fixture", Some("Node")),
        ] {
            engine.add_class(class, parent, None);
        }
        let singleton = engine.new_object("Engine");
        engine.singletons.insert("Engine".to_owned(), singleton);
        engine
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn stats(&self) -> Stats {
        Stats {
            strings: self.strings.len(),
            string_names: self.names.len(),
            node_paths: self.paths.len(),
            arrays: self.arrays.len(),
            dictionaries: self.dictionaries.len(),
            packed_arrays: self.packed.len(),
            boxed_values: self.boxed.len(),
            // The singleton is not counted.
            objects: self.objects.len() - self.singletons.len(),
            custom_callables: self.callables.len(),
            raw_allocations: self.raw_allocations,
        }
    }

    // Strings.

    pub(crate) fn new_string(&mut self, text: String) -> u64 {
        let id = self.alloc_id();
        self.strings.insert(id, text);
        id
    }

    pub(crate) fn string_text(&self, id: u64) -> &str {
        if id == 0 {
            return "";
        }
        match self.strings.get(&id) {
            Some(text) => text.as_str(),
            None => {
                error!("read of released string {}", id);
                ""
            }
        }
    }

    pub(crate) fn string_is_live(&self, id: u64) -> bool {
        self.strings.contains_key(&id)
    }

    fn copy_string(&mut self, id: u64) -> u64 {
        if id == 0 {
            return 0;
        }
        let text = self.string_text(id).to_owned();
        self.new_string(text)
    }

    pub(crate) fn release_string(&mut self, id: u64) {
        if id != 0 && self.strings.remove(&id).is_none() {
            double_release("string", id);
        }
    }

    // Interned names. The empty name is the zero token.

    pub(crate) fn intern(&mut self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        if let Some(&id) = self.name_ids.get(text) {
            if let Some(entry) = self.names.get_mut(&id) {
                entry.refs += 1;
            }
            return id;
        }
        let id = self.alloc_id();
        self.names.insert(
            id,
            Interned {
                text: text.to_owned(),
                refs: 1,
            },
        );
        self.name_ids.insert(text.to_owned(), id);
        id
    }

    pub(crate) fn name_text(&self, id: u64) -> &str {
        self.names.get(&id).map_or("", |entry| entry.text.as_str())
    }

    fn retain_name(&mut self, id: u64) -> u64 {
        if let Some(entry) = self.names.get_mut(&id) {
            entry.refs += 1;
        }
        id
    }

    pub(crate) fn release_name(&mut self, id: u64) {
        if id == 0 {
            return;
        }
        let Some(entry) = self.names.get_mut(&id) else {
            double_release("string name", id);
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            if let Some(entry) = self.names.remove(&id) {
                self.name_ids.remove(&entry.text);
            }
        }
    }

    // Node paths.

    pub(crate) fn new_path(&mut self, text: String) -> u64 {
        let id = self.alloc_id();
        self.paths.insert(id, text);
        id
    }

    pub(crate) fn path_text(&self, id: u64) -> &str {
        self.paths.get(&id).map_or("", String::as_str)
    }

    fn release_path(&mut self, id: u64) {
        if id != 0 && self.paths.remove(&id).is_none() {
            double_release("node path", id);
        }
    }

    // Arrays and dictionaries, shared by reference.

    pub(crate) fn new_array(&mut self, items: Vec<Slot>) -> u64 {
        let id = self.alloc_id();
        self.arrays.insert(id, Shared::new(items));
        id
    }

    pub(crate) fn new_dictionary(&mut self) -> u64 {
        let id = self.alloc_id();
        self.dictionaries.insert(id, Shared::new(Vec::new()));
        id
    }

    fn release_array(&mut self, id: u64) {
        let Some(array) = self.arrays.get_mut(&id) else {
            double_release("array", id);
        };
        array.refs -= 1;
        if array.refs == 0 {
            if let Some(array) = self.arrays.remove(&id) {
                for slot in array.data {
                    self.release_variant(slot);
                }
            }
        }
    }

    fn release_dictionary(&mut self, id: u64) {
        let Some(dict) = self.dictionaries.get_mut(&id) else {
            double_release("dictionary", id);
        };
        dict.refs -= 1;
        if dict.refs == 0 {
            if let Some(dict) = self.dictionaries.remove(&id) {
                for (key, value) in dict.data {
                    self.release_variant(key);
                    self.release_variant(value);
                }
            }
        }
    }

    /// Resizes array `id`, filling with nil and releasing truncated slots.
    pub(crate) fn resize_array(&mut self, id: u64, len: usize) {
        let removed = match self.arrays.get_mut(&id) {
            Some(array) if len < array.data.len() => array.data.split_off(len),
            Some(array) => {
                array.data.resize(len, [0; 3]);
                Vec::new()
            }
            None => return,
        };
        for slot in removed {
            self.release_variant(slot);
        }
    }

    // Packed arrays, copy-on-write.

    pub(crate) fn new_packed(&mut self, ty: u32) -> u64 {
        let id = self.alloc_id();
        self.packed.insert(id, Shared::new(Packed::empty(ty)));
        id
    }

    fn release_packed(&mut self, id: u64) {
        let Some(array) = self.packed.get_mut(&id) else {
            double_release("packed array", id);
        };
        array.refs -= 1;
        if array.refs == 0 {
            if let Some(Shared {
                data: Packed::Strings(ids),
                ..
            }) = self.packed.remove(&id)
            {
                for string in ids {
                    self.release_string(string);
                }
            }
        }
    }

    /// Returns an id whose buffer no other token shares, copying if needed.
    pub(crate) fn make_unique(&mut self, id: u64) -> u64 {
        let Some(array) = self.packed.get_mut(&id) else {
            return id;
        };
        if array.refs == 1 {
            return id;
        }
        array.refs -= 1;
        let copy = match &array.data {
            Packed::Pod { elem, len, words } => Packed::Pod {
                elem: *elem,
                len: *len,
                words: words.clone(),
            },
            Packed::Strings(ids) => Packed::Strings(ids.clone()),
        };
        // Element strings are owned per array.
        let copy = match copy {
            Packed::Strings(ids) => {
                Packed::Strings(ids.into_iter().map(|s| self.copy_string(s)).collect())
            }
            pod => pod,
        };
        let unique = self.alloc_id();
        self.packed.insert(unique, Shared::new(copy));
        trace!("packed array {} split into {}", id, unique);
        unique
    }

    pub(crate) fn resize_packed(&mut self, id: u64, new_len: usize) {
        let mut released = Vec::new();
        if let Some(array) = self.packed.get_mut(&id) {
            match &mut array.data {
                Packed::Pod { elem, len, words } => {
                    let bytes = new_len * *elem;
                    let kept = (new_len.min(*len) * *elem).div_ceil(8);
                    // Clear bytes past the end so regrown elements read as zero.
                    words.truncate(kept);
                    if let Some(last) = words.last_mut() {
                        let tail = new_len.min(*len) * *elem % 8;
                        if tail != 0 {
                            *last &= u64::MAX >> (64 - tail * 8);
                        }
                    }
                    words.resize(bytes.div_ceil(8), 0);
                    *len = new_len;
                }
                Packed::Strings(ids) => {
                    if new_len < ids.len() {
                        released = ids.split_off(new_len);
                    } else {
                        ids.resize(new_len, 0);
                    }
                }
            }
        }
        for string in released {
            self.release_string(string);
        }
    }

    // Plain data too wide to sit inside a Variant.

    fn new_box(&mut self, words: Vec<u64>) -> u64 {
        let id = self.alloc_id();
        self.boxed.insert(id, words);
        id
    }

    pub(crate) fn boxed(&self, id: u64) -> &[u64] {
        self.boxed.get(&id).map_or(&[][..], Vec::as_slice)
    }

    // Custom callables. The token is (object id, callable id); the callable
    // id stands where a bound callable keeps its method name.

    pub(crate) fn new_custom_callable(&mut self, callable: CustomCallable) -> u64 {
        let id = self.alloc_id();
        self.callables.insert(id, Shared::new(callable));
        id
    }

    pub(crate) fn is_custom_callable(&self, id: u64) -> bool {
        self.callables.contains_key(&id)
    }

    /// Call function and userdata of a live custom callable.
    pub(crate) fn custom_callable(&self, id: u64) -> Option<(CustomCallFn, usize)> {
        self.callables
            .get(&id)
            .map(|callable| (callable.data.call, callable.data.userdata))
    }

    fn release_custom_callable(&mut self, id: u64) {
        let Some(callable) = self.callables.get_mut(&id) else {
            double_release("custom callable", id);
        };
        callable.refs -= 1;
        if callable.refs == 0 {
            if let Some(Shared { data, .. }) = self.callables.remove(&id) {
                if let Some(free) = data.free {
                    self.deferred.push(Deferred::FreeCallable {
                        free,
                        userdata: data.userdata,
                    });
                }
                trace!("custom callable {} released", id);
            }
        }
    }

    // Objects.

    pub(crate) fn new_object(&mut self, class: &str) -> u64 {
        let id = self.alloc_id();
        let refcounted = self.is_refcounted(class);
        self.objects.insert(
            id,
            ObjectData {
                class: class.to_owned(),
                refcount: refcounted.then_some(0),
                instance: None,
            },
        );
        trace!("object {} created as {}", id, class);
        id
    }

    pub(crate) fn destroy_object(&mut self, id: u64) {
        let Some(object) = self.objects.remove(&id) else {
            double_release("object", id);
        };
        *self.destroyed.entry(id).or_insert(0) += 1;
        if let Some(instance) = object.instance {
            let extension = self
                .classes
                .get(&object.class)
                .and_then(|class| class.extension);
            match extension {
                Some(Extension {
                    free: Some(free),
                    userdata,
                    ..
                }) => self.deferred.push(Deferred::FreeInstance {
                    free,
                    userdata,
                    instance,
                }),
                _ => error!("object {} freed with an instance of unknown class {}", id, object.class),
            }
        }
        trace!("object {} destroyed", id);
    }

    /// Takes a Variant's reference on a refcounted object.
    fn retain_object(&mut self, id: u64) {
        if let Some(ObjectData {
            refcount: Some(count),
            ..
        }) = self.objects.get_mut(&id)
        {
            *count += 1;
        }
    }

    /// Drops a Variant's reference, destroying the object at zero.
    fn release_object(&mut self, id: u64) {
        let Some(object) = self.objects.get_mut(&id) else {
            // Manually managed objects may be gone before the Variant.
            return;
        };
        if let Some(count) = object.refcount.as_mut() {
            if *count <= 0 {
                double_release("object reference", id);
            }
            *count -= 1;
            if *count == 0 {
                self.destroy_object(id);
            }
        }
    }

    // Classes.

    pub(crate) fn add_class(&mut self, class: &str, parent: Option<&str>, extension: Option<Extension>) {
        self.next_tag += 1;
        let refcounted = class == "RefCounted" || parent.is_some_and(|p| self.is_refcounted(p));
        self.classes.insert(
            class.to_owned(),
            ClassInfo {
                parent: parent.map(str::to_owned),
                tag: self.next_tag * 16,
                refcounted,
                extension,
            },
        );
    }

    fn is_refcounted(&self, class: &str) -> bool {
        self.classes.get(class).is_some_and(|info| info.refcounted)
    }

    /// `class` and its ancestors, nearest first.
    pub(crate) fn class_chain(&self, class: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(class.to_owned());
        while let Some(name) = current {
            let Some(info) = self.classes.get(&name) else {
                break;
            };
            current = info.parent.clone();
            chain.push(name);
        }
        chain
    }

    // Tokens and Variants.

    pub(crate) fn copy_token(&mut self, ty: u32, token: Token) -> Token {
        match ty {
            STRING => [self.copy_string(token[0]), 0],
            STRING_NAME => [self.retain_name(token[0]), 0],
            NODE_PATH => {
                if token[0] == 0 {
                    return [0, 0];
                }
                let text = self.path_text(token[0]).to_owned();
                [self.new_path(text), 0]
            }
            CALLABLE if self.is_custom_callable(token[1]) => {
                if let Some(callable) = self.callables.get_mut(&token[1]) {
                    callable.refs += 1;
                }
                token
            }
            CALLABLE | SIGNAL => [token[0], self.retain_name(token[1])],
            ARRAY => {
                if let Some(array) = self.arrays.get_mut(&token[0]) {
                    array.refs += 1;
                }
                token
            }
            DICTIONARY => {
                if let Some(dict) = self.dictionaries.get_mut(&token[0]) {
                    dict.refs += 1;
                }
                token
            }
            ty if kinds::is_packed(ty) => {
                if let Some(array) = self.packed.get_mut(&token[0]) {
                    array.refs += 1;
                }
                token
            }
            _ => token,
        }
    }

    pub(crate) fn release_token(&mut self, ty: u32, token: Token) {
        if token == [0, 0] {
            return;
        }
        match ty {
            STRING => self.release_string(token[0]),
            STRING_NAME => self.release_name(token[0]),
            NODE_PATH => self.release_path(token[0]),
            CALLABLE if self.is_custom_callable(token[1]) => self.release_custom_callable(token[1]),
            CALLABLE | SIGNAL => self.release_name(token[1]),
            ARRAY if token[0] != 0 => self.release_array(token[0]),
            DICTIONARY if token[0] != 0 => self.release_dictionary(token[0]),
            ty if kinds::is_packed(ty) && token[0] != 0 => self.release_packed(token[0]),
            _ => {}
        }
    }

    /// Builds the Variant payload for a value read from `value`.
    ///
    /// # Safety
    ///
    /// `value` must point to a live value of kind `ty`.
    pub(crate) unsafe fn variant_from_value(&mut self, ty: u32, value: *const u8) -> Slot {
        if let Some(size) = kinds::pod_size(ty) {
            let mut words = vec![0u64; size.div_ceil(8)];
            unsafe { std::ptr::copy_nonoverlapping(value, words.as_mut_ptr().cast(), size) };
            if size > kinds::INLINE_BYTES {
                return [u64::from(ty), self.new_box(words), 0];
            }
            words.resize(2, 0);
            return [u64::from(ty), words[0], words[1]];
        }
        if ty == OBJECT {
            let ptr = unsafe { value.cast::<*const c_void>().read() };
            if ptr.is_null() {
                return [u64::from(OBJECT), 0, 0];
            }
            let id = object_id(ptr);
            self.retain_object(id);
            return [u64::from(OBJECT), ptr as u64, id];
        }
        let token = unsafe { read_token(ty, value) };
        let copy = self.copy_token(ty, token);
        [u64::from(ty), copy[0], copy[1]]
    }

    /// Writes the value held by `variant` to `out` as a new copy.
    ///
    /// # Safety
    ///
    /// `out` must be valid for a value of the Variant's kind.
    pub(crate) unsafe fn value_from_variant(&mut self, variant: Slot, out: *mut u8) {
        let ty = variant[0] as u32;
        if let Some(size) = kinds::pod_size(ty) {
            let words: Vec<u64> = if size > kinds::INLINE_BYTES {
                self.boxed(variant[1]).to_vec()
            } else {
                vec![variant[1], variant[2]]
            };
            unsafe { std::ptr::copy_nonoverlapping(words.as_ptr().cast::<u8>(), out, size) };
            return;
        }
        if ty == OBJECT {
            let live = self.objects.contains_key(&variant[2]);
            let ptr = if live { variant[1] as *mut c_void } else { std::ptr::null_mut() };
            unsafe { out.cast::<*mut c_void>().write(ptr) };
            return;
        }
        let copy = self.copy_token(ty, [variant[1], variant[2]]);
        unsafe { write_token(ty, out, copy) };
    }

    pub(crate) fn copy_variant(&mut self, variant: Slot) -> Slot {
        let ty = variant[0] as u32;
        match kinds::pod_size(ty) {
            Some(size) if size > kinds::INLINE_BYTES => {
                let words = self.boxed(variant[1]).to_vec();
                [variant[0], self.new_box(words), 0]
            }
            Some(_) => variant,
            None if ty == OBJECT => {
                self.retain_object(variant[2]);
                variant
            }
            None => {
                let copy = self.copy_token(ty, [variant[1], variant[2]]);
                [variant[0], copy[0], copy[1]]
            }
        }
    }

    pub(crate) fn release_variant(&mut self, variant: Slot) {
        let ty = variant[0] as u32;
        match kinds::pod_size(ty) {
            Some(size) if size > kinds::INLINE_BYTES => {
                if self.boxed.remove(&variant[1]).is_none() {
                    double_release("boxed value", variant[1]);
                }
            }
            Some(_) => {}
            None if ty == OBJECT => {
                if variant[2] != 0 {
                    self.release_object(variant[2]);
                }
            }
            None => self.release_token(ty, [variant[1], variant[2]]),
        }
    }

    /// Key equality for dictionaries: same kind and same contents.
    pub(crate) fn variants_equal(&self, a: &Slot, b: &Slot) -> bool {
        if a[0] != b[0] {
            return false;
        }
        let ty = a[0] as u32;
        match ty {
            STRING => self.string_text(a[1]) == self.string_text(b[1]),
            NODE_PATH => self.path_text(a[1]) == self.path_text(b[1]),
            OBJECT => a[2] == b[2],
            _ => match kinds::pod_size(ty) {
                Some(size) if size > kinds::INLINE_BYTES => self.boxed(a[1]) == self.boxed(b[1]),
                _ => a[1..] == b[1..],
            },
        }
    }
}

/// Reads a handle token of kind `ty`.
///
/// # Safety
///
/// `ptr` must point to a token of kind `ty`.
pub(crate) unsafe fn read_token(ty: u32, ptr: *const u8) -> Token {
    let words = ptr.cast::<u64>();
    unsafe {
        if kinds::token_words(ty) == 2 {
            [words.read(), words.add(1).read()]
        } else {
            [words.read(), 0]
        }
    }
}

/// # Safety
///
/// `ptr` must be valid for a token of kind `ty`.
pub(crate) unsafe fn write_token(ty: u32, ptr: *mut u8, token: Token) {
    let words = ptr.cast::<u64>();
    unsafe {
        words.write(token[0]);
        if kinds::token_words(ty) == 2 {
            words.add(1).write(token[1]);
        }
    }
}

static ENGINE: OnceLock<Mutex<Engine>> = OnceLock::new();

/// Runs `f` with the engine locked, then any host callbacks it queued.
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    let (result, deferred) = {
        let mut engine = ENGINE
            .get_or_init(|| Mutex::new(Engine::new()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut engine);
        (result, std::mem::take(&mut engine.deferred))
    };
    for callback in deferred {
        callback.run();
    }
    result
}
