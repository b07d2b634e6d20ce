//! String-like builtins: `String`, `StringName` and `NodePath`.
//!
//! The engine's `String` is exposed as [`GString`] so it never shadows
//! `std::string::String`. Conversions between the three kinds go through the
//! engine's own pointer constructors.

use super::{Builtin, builtin_handle, construct_from};
use crate::error::Result;
use crate::lifetime::{Lifetime, Local};
use crate::ownership::{Owned, Transfer};
use crate::runtime::{self, Runtime};
use crate::sys::ConstStringNamePtr;
use std::ffi::c_char;

/// String constructor taking a StringName.
const STRING_FROM_STRING_NAME: i32 = 2;
/// String constructor taking a NodePath.
const STRING_FROM_NODE_PATH: i32 = 3;
/// StringName and NodePath constructor taking a String.
const FROM_STRING: i32 = 2;

builtin_handle!(
    /// The engine's reference-counted UTF-32 string.
    GString,
    String,
    1
);

builtin_handle!(
    /// An interned engine string, compared by pointer.
    StringName,
    StringName,
    1
);

builtin_handle!(
    /// A parsed scene-tree path.
    NodePath,
    NodePath,
    1
);

impl GString {
    /// Creates an engine string in `lifetime`.
    pub fn new<'l>(lifetime: &'l Lifetime, text: &str) -> Result<Local<'l, GString>> {
        lifetime.register(Self::new_raw(lifetime.runtime(), text))
    }

    /// Creates an engine string owned by the caller.
    pub fn owned(text: &str) -> Result<Owned<GString>> {
        let runtime = runtime::get()?;
        Ok(unsafe { Owned::from_raw(Self::new_raw(&runtime, text)) })
    }

    /// Creates an unmanaged engine string. The caller must release it.
    pub fn new_raw(runtime: &Runtime, text: &str) -> GString {
        let mut out = GString::empty();
        unsafe {
            (runtime.interface().string_new_with_utf8_chars_and_len)(
                out.type_ptr_mut(),
                text.as_ptr().cast::<c_char>(),
                text.len() as i64,
            )
        };
        out
    }

    /// Reads the contents back as UTF-8.
    pub fn to_rust(&self, runtime: &Runtime) -> String {
        let read = runtime.interface().string_to_utf8_chars;
        let len = unsafe { read(self.type_ptr(), std::ptr::null_mut(), 0) };
        if len <= 0 {
            return String::new();
        }
        let mut buf = vec![0u8; len as usize];
        let written = unsafe { read(self.type_ptr(), buf.as_mut_ptr().cast(), len) };
        buf.truncate(written.clamp(0, len) as usize);
        String::from_utf8(buf)
            .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
    }

    /// The token word, for diagnostics.
    pub fn raw_word(&self) -> u64 {
        self.opaque[0]
    }
}

impl StringName {
    /// Interns `text` in `lifetime`.
    pub fn new<'l>(lifetime: &'l Lifetime, text: &str) -> Result<Local<'l, StringName>> {
        lifetime.register(Self::new_raw(lifetime.runtime(), text))
    }

    /// Interns `text` without a managing wrapper. The caller must release it.
    pub fn new_raw(runtime: &Runtime, text: &str) -> StringName {
        let mut out = StringName::empty();
        unsafe {
            (runtime.interface().string_name_new_with_utf8_chars_and_len)(
                out.type_ptr_mut(),
                text.as_ptr().cast::<c_char>(),
                text.len() as i64,
            )
        };
        out
    }

    /// A name that lives for the current scope only.
    ///
    /// Used for the class, method and singleton names passed to lookups.
    pub fn scoped<'a>(runtime: &'a Runtime, text: &'a str) -> ScopedName<'a> {
        ScopedName {
            runtime,
            text,
            name: Self::new_raw(runtime, text),
        }
    }

    /// Converts an engine string.
    pub fn from_gstring(runtime: &Runtime, string: &GString) -> Result<StringName> {
        unsafe { construct_from(runtime, FROM_STRING, string.type_ptr()) }
    }

    pub fn to_rust(&self, runtime: &Runtime) -> Result<String> {
        let mut string: GString =
            unsafe { construct_from(runtime, STRING_FROM_STRING_NAME, self.type_ptr())? };
        let text = string.to_rust(runtime);
        unsafe { string.release(runtime) };
        Ok(text)
    }
}

impl NodePath {
    /// Parses `text` into a path in `lifetime`.
    pub fn new<'l>(lifetime: &'l Lifetime, text: &str) -> Result<Local<'l, NodePath>> {
        let runtime = lifetime.runtime();
        let mut string = GString::new_raw(runtime, text);
        let path = unsafe { construct_from(runtime, FROM_STRING, string.type_ptr()) };
        unsafe { string.release(runtime) };
        lifetime.register(path?)
    }

    pub fn to_rust(&self, runtime: &Runtime) -> Result<String> {
        let mut string: GString =
            unsafe { construct_from(runtime, STRING_FROM_NODE_PATH, self.type_ptr())? };
        let text = string.to_rust(runtime);
        unsafe { string.release(runtime) };
        Ok(text)
    }
}

/// A `StringName` released when the guard drops.
pub struct ScopedName<'a> {
    runtime: &'a Runtime,
    text: &'a str,
    name: StringName,
}

impl ScopedName<'_> {
    pub fn as_ptr(&self) -> ConstStringNamePtr {
        self.name.type_ptr()
    }

    /// The text the name was built from.
    pub fn text(&self) -> &str {
        self.text
    }
}

impl Drop for ScopedName<'_> {
    fn drop(&mut self) {
        unsafe { self.name.release(self.runtime) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_gstring_round_trip() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        for text in ["", "hello", "héllo wörld", "tab\tand\nnewline", "日本語"] {
            let s = GString::new(&lifetime, text).unwrap();
            assert_eq!(s.to_rust(&runtime), text);
        }
    }

    #[test]
    fn test_owned_gstring_is_released_on_drop() {
        let _runtime = test_support::runtime();
        let owned = GString::owned("transient").unwrap();
        let word = owned.raw_word();
        assert!(gdbridge_headless::string_is_live(word));
        drop(owned);
        assert!(!gdbridge_headless::string_is_live(word));
    }

    #[test]
    fn test_string_name_conversions() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let name = StringName::new(&lifetime, "process_frame").unwrap();
        assert_eq!(name.to_rust(&runtime).unwrap(), "process_frame");

        let string = GString::new(&lifetime, "ready").unwrap();
        let converted = lifetime
            .register(StringName::from_gstring(&runtime, &string).unwrap())
            .unwrap();
        assert_eq!(converted.to_rust(&runtime).unwrap(), "ready");
    }

    #[test]
    fn test_node_path_round_trip() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let path = NodePath::new(&lifetime, "Root/Player:position").unwrap();
        assert_eq!(path.to_rust(&runtime).unwrap(), "Root/Player:position");
    }

    #[test]
    fn test_scoped_name_exposes_text() {
        let runtime = test_support::runtime();
        let scoped = StringName::scoped(&runtime, "Engine");
        assert_eq!(scoped.text(), "Engine");
        assert!(!scoped.as_ptr().is_null());
    }
}
