//! In-memory trie keyed by byte strings with arbitrary per-key
//! payloads, supporting exact lookup, prefix operations, and
//! approximate matching under Hamming distance (substitutions only,
//! equal-length keys).
//!
//! The safe core is [`Trie`]; searches run through [`TrieIter`]
//! handles that are driven explicitly against the store. The crate is
//! also built as a staticlib exposing the `htrie_*` / `htrieiter_*` C
//! entry points below, from which a foreign binding layer (with its
//! own value ownership model) can be written without touching the
//! core.
//!
//! All calls against one store must be serialized by the caller; the
//! core contains no synchronization and never suspends.

use std::ffi::CStr;
use std::ptr;

use libc::{c_char, c_int, c_void};
use once_cell::sync::OnceCell;

mod error;
mod iter;
mod node;
mod trie;
pub mod util;


pub use crate::error::TrieError;
pub use crate::iter::{IterStatus, SearchResult, TrieIter};
pub use crate::trie::Trie;

static LOG_INIT: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber once. `htrie_new` calls this
/// so foreign callers get diagnostics without extra setup; Rust
/// callers that want their own subscriber should install it before
/// touching this crate's C surface.
pub fn ensure_init() {
    LOG_INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt().without_time().try_init();
    });
}

/// Store instantiation used by the C surface: payloads are opaque
/// pointers whose ownership model lives entirely on the caller's side.
pub type CTrie = Trie<*mut c_void>;

/// Callback applied to displaced or evicted payloads. Passing no
/// handler transfers the payload's ownership back to the caller.
pub type DeallocHandler = Option<unsafe extern "C" fn(*mut c_void)>;

/// Borrowed view of one stored item. `key` points at a NUL-terminated
/// buffer of `keylen` bytes owned by the store; both it and `value`
/// stay valid until the next mutating call.
#[repr(C)]
pub struct HtrieItemRef {
    pub key: *const c_char,
    pub keylen: usize,
    pub value: *mut c_void,
}

/// One search result. Query fields are null/zero when the enumeration
/// was rooted at a structural node. Key pointers follow the
/// [`HtrieItemRef`] borrowing rules.
#[repr(C)]
pub struct HtrieSearchResult {
    pub query_key: *const c_char,
    pub query_keylen: usize,
    pub query_value: *mut c_void,
    pub target_key: *const c_char,
    pub target_keylen: usize,
    pub target_value: *mut c_void,
    pub hd: c_int,
}

/// Iterator handle for the C surface. Holds the store pointer weakly;
/// the caller must keep the store alive for the iterator's lifetime
/// and free all iterators before freeing the store.
pub struct CTrieIter {
    trie: *mut CTrie,
    inner: TrieIter,
}

unsafe fn key_bytes<'a>(key: *const c_char) -> Option<&'a [u8]> {
    if key.is_null() {
        return None;
    }
    Some(CStr::from_ptr(key).to_bytes())
}

#[no_mangle]
pub extern "C" fn htrie_new() -> *mut CTrie {
    ensure_init();
    Box::leak(Box::new(Trie::new()))
}

/// Free the store and every node in it. With a handler, every stored
/// payload is passed to it; without, payloads are left to the caller.
#[no_mangle]
pub unsafe extern "C" fn htrie_free(trie: *mut CTrie, dealloc: DeallocHandler) {
    if trie.is_null() {
        return;
    }
    let mut trie = Box::from_raw(trie);
    if let Some(dealloc) = dealloc {
        trie.clear_with(|value| dealloc(value));
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrie_num_nodes(trie: *const CTrie) -> usize {
    trie.as_ref().map_or(0, Trie::num_nodes)
}

#[no_mangle]
pub unsafe extern "C" fn htrie_num_items(trie: *const CTrie) -> usize {
    trie.as_ref().map_or(0, Trie::num_items)
}

#[no_mangle]
pub unsafe extern "C" fn htrie_mem_usage(trie: *const CTrie) -> usize {
    trie.as_ref().map_or(0, Trie::mem_usage)
}

/// Insert or overwrite. Returns 0 on success, -1 on a null store or
/// key. A displaced payload is passed to `dealloc` when provided.
#[no_mangle]
pub unsafe extern "C" fn htrie_set_item(
    trie: *mut CTrie,
    key: *const c_char,
    value: *mut c_void,
    dealloc: DeallocHandler,
) -> c_int {
    let trie = match trie.as_mut() {
        Some(trie) => trie,
        None => return -1,
    };
    let key = match key_bytes(key) {
        Some(key) => key,
        None => return -1,
    };
    match trie.set(key, value) {
        Ok(old) => {
            if let (Some(dealloc), Some(old)) = (dealloc, old) {
                dealloc(old);
            }
            0
        }
        Err(_) => -1,
    }
}

/// Remove a key, pruning nodes that served only it. Returns 0 on
/// success, -1 when the store or key is null or the key is absent.
#[no_mangle]
pub unsafe extern "C" fn htrie_del_item(
    trie: *mut CTrie,
    key: *const c_char,
    dealloc: DeallocHandler,
) -> c_int {
    let trie = match trie.as_mut() {
        Some(trie) => trie,
        None => return -1,
    };
    let key = match key_bytes(key) {
        Some(key) => key,
        None => return -1,
    };
    match trie.del(key) {
        Ok(value) => {
            if let Some(dealloc) = dealloc {
                dealloc(value);
            }
            0
        }
        Err(_) => -1,
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrie_has_key(trie: *const CTrie, key: *const c_char) -> bool {
    match (trie.as_ref(), key_bytes(key)) {
        (Some(trie), Some(key)) => trie.has_key(key),
        _ => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrie_has_node(trie: *const CTrie, key: *const c_char) -> bool {
    match (trie.as_ref(), key_bytes(key)) {
        (Some(trie), Some(key)) => trie.has_node(key),
        _ => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrie_get_item(
    trie: *const CTrie,
    key: *const c_char,
    out: *mut HtrieItemRef,
) -> bool {
    let (trie, key) = match (trie.as_ref(), key_bytes(key)) {
        (Some(trie), Some(key)) => (trie, key),
        _ => return false,
    };
    match trie.get_item(key) {
        Some((key, value)) if !out.is_null() => {
            *out = HtrieItemRef {
                key: key.as_ptr() as *const c_char,
                keylen: key.len(),
                value: *value,
            };
            true
        }
        _ => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrie_longest_prefix(
    trie: *const CTrie,
    key: *const c_char,
    out: *mut HtrieItemRef,
) -> bool {
    let (trie, key) = match (trie.as_ref(), key_bytes(key)) {
        (Some(trie), Some(key)) => (trie, key),
        _ => return false,
    };
    match trie.longest_prefix(key) {
        Some((key, value)) if !out.is_null() => {
            *out = HtrieItemRef {
                key: key.as_ptr() as *const c_char,
                keylen: key.len(),
                value: *value,
            };
            true
        }
        _ => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrieiter_suffixes(trie: *mut CTrie, key: *const c_char) -> *mut CTrieIter {
    let (store, key) = match (trie.as_mut(), key_bytes(key)) {
        (Some(store), Some(key)) => (store, key),
        _ => return ptr::null_mut(),
    };
    match store.iter_suffixes(key) {
        Ok(inner) => Box::into_raw(Box::new(CTrieIter { trie, inner })),
        Err(_) => ptr::null_mut(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrieiter_neighbors(
    trie: *mut CTrie,
    key: *const c_char,
    maxhd: c_int,
) -> *mut CTrieIter {
    let (store, key) = match (trie.as_mut(), key_bytes(key)) {
        (Some(store), Some(key)) => (store, key),
        _ => return ptr::null_mut(),
    };
    if maxhd < 1 {
        return ptr::null_mut();
    }
    match store.iter_neighbors(key, maxhd as u32) {
        Ok(inner) => Box::into_raw(Box::new(CTrieIter { trie, inner })),
        Err(_) => ptr::null_mut(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrieiter_hammingpairs(
    trie: *mut CTrie,
    keylen: usize,
    maxhd: c_int,
) -> *mut CTrieIter {
    let store = match trie.as_mut() {
        Some(store) => store,
        None => return ptr::null_mut(),
    };
    if maxhd < 1 {
        return ptr::null_mut();
    }
    match store.iter_hammingpairs(keylen, maxhd as u32) {
        Ok(inner) => Box::into_raw(Box::new(CTrieIter { trie, inner })),
        Err(_) => ptr::null_mut(),
    }
}

/// Write the next result into `out` and return true, or return false
/// at the end of the enumeration. After false, `htrieiter_errcode`
/// tells exhaustion (0) apart from invalidation.
#[no_mangle]
pub unsafe extern "C" fn htrieiter_next(it: *mut CTrieIter, out: *mut HtrieSearchResult) -> bool {
    let it = match it.as_mut() {
        Some(it) => it,
        None => return false,
    };
    let trie = match it.trie.as_mut() {
        Some(trie) => trie,
        None => return false,
    };
    match it.inner.next(trie) {
        Some(result) if !out.is_null() => {
            *out = HtrieSearchResult {
                query_key: result
                    .query
                    .map_or(ptr::null(), |(key, _)| key.as_ptr() as *const c_char),
                query_keylen: result.query.map_or(0, |(key, _)| key.len()),
                query_value: result.query.map_or(ptr::null_mut(), |(_, value)| *value),
                target_key: result.target.0.as_ptr() as *const c_char,
                target_keylen: result.target.0.len(),
                target_value: *result.target.1,
                hd: result.hd as c_int,
            };
            true
        }
        _ => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn htrieiter_len_query(it: *const CTrieIter) -> usize {
    it.as_ref().map_or(0, |it| it.inner.len_query())
}

#[no_mangle]
pub unsafe extern "C" fn htrieiter_errcode(it: *const CTrieIter) -> c_int {
    it.as_ref().map_or(0, |it| it.inner.status().into())
}

/// Tear the iterator down, wiping traversal marks if it owns the
/// store's dirty slot.
#[no_mangle]
pub unsafe extern "C" fn htrieiter_free(it: *mut CTrieIter) {
    if it.is_null() {
        return;
    }
    let CTrieIter { trie, inner } = *Box::from_raw(it);
    if let Some(trie) = trie.as_mut() {
        inner.close(trie);
    }
}
