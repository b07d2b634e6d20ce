//! `String`, `StringName` and `NodePath` entry points.

use crate::engine::{Token, read_token, with_engine, write_token};
use crate::kinds::{NODE_PATH, STRING, STRING_NAME};
use std::ffi::{CStr, c_char, c_void};

/// Reads `len` bytes of UTF-8 (or up to the NUL when `len` is negative).
unsafe fn utf8_arg(chars: *const c_char, len: i64) -> String {
    if chars.is_null() {
        return String::new();
    }
    let bytes = if len < 0 {
        unsafe { CStr::from_ptr(chars) }.to_bytes()
    } else {
        unsafe { std::slice::from_raw_parts(chars.cast::<u8>(), len as usize) }
    };
    String::from_utf8_lossy(bytes).into_owned()
}

pub(crate) unsafe extern "C" fn string_new_with_utf8_chars_and_len(
    out: *mut c_void,
    chars: *const c_char,
    len: i64,
) {
    let text = unsafe { utf8_arg(chars, len) };
    let id = with_engine(|engine| engine.new_string(text));
    unsafe { write_token(STRING, out.cast(), [id, 0]) };
}

pub(crate) unsafe extern "C" fn string_to_utf8_chars(
    string: *const c_void,
    buf: *mut c_char,
    max: i64,
) -> i64 {
    let [id, _] = unsafe { read_token(STRING, string.cast()) };
    with_engine(|engine| {
        let bytes = engine.string_text(id).as_bytes();
        if !buf.is_null() && max > 0 {
            let n = bytes.len().min(max as usize);
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), n) };
        }
        bytes.len() as i64
    })
}

pub(crate) unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(
    out: *mut c_void,
    chars: *const c_char,
    len: i64,
) {
    let text = unsafe { utf8_arg(chars, len) };
    let id = with_engine(|engine| engine.intern(&text));
    unsafe { write_token(STRING_NAME, out.cast(), [id, 0]) };
}

/// Reads the single argument of a one-argument pointer constructor.
unsafe fn only_arg(ty: u32, args: *const *const c_void) -> Token {
    unsafe { read_token(ty, (*args).cast()) }
}

pub(crate) unsafe extern "C" fn string_from_string_name(out: *mut c_void, args: *const *const c_void) {
    let [name, _] = unsafe { only_arg(STRING_NAME, args) };
    let id = with_engine(|engine| {
        let text = engine.name_text(name).to_owned();
        engine.new_string(text)
    });
    unsafe { write_token(STRING, out.cast(), [id, 0]) };
}

pub(crate) unsafe extern "C" fn string_from_node_path(out: *mut c_void, args: *const *const c_void) {
    let [path, _] = unsafe { only_arg(NODE_PATH, args) };
    let id = with_engine(|engine| {
        let text = engine.path_text(path).to_owned();
        engine.new_string(text)
    });
    unsafe { write_token(STRING, out.cast(), [id, 0]) };
}

pub(crate) unsafe extern "C" fn string_name_from_string(out: *mut c_void, args: *const *const c_void) {
    let [string, _] = unsafe { only_arg(STRING, args) };
    let id = with_engine(|engine| {
        let text = engine.string_text(string).to_owned();
        engine.intern(&text)
    });
    unsafe { write_token(STRING_NAME, out.cast(), [id, 0]) };
}

pub(crate) unsafe extern "C" fn node_path_from_string(out: *mut c_void, args: *const *const c_void) {
    let [string, _] = unsafe { only_arg(STRING, args) };
    let id = with_engine(|engine| {
        let text = engine.string_text(string).to_owned();
        engine.new_path(text)
    });
    unsafe { write_token(NODE_PATH, out.cast(), [id, 0]) };
}
