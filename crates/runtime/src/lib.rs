//! Native runtime helpers the transformed IR calls at execution time.
//!
//! Built as a static library and linked into the final binary. All three
//! entry points use the platform C calling convention and are kept out of
//! line so the optimizer cannot fold their results back into call sites.
//! Buffers returned by [`__obf_decrypt`] must be released with
//! [`__obf_free`]; they come from this library's allocator.

use std::alloc::{alloc, dealloc, Layout};
use std::os::raw::c_char;
use std::sync::Mutex;

/// Serializes the XOR loop across threads to discourage timing-based
/// correlation of decrypt calls. Const-initialized, so it is ready before
/// `main` runs without an explicit constructor.
static DECRYPT_LOCK: Mutex<()> = Mutex::new(());

fn buffer_layout(len: usize) -> Option<Layout> {
    Layout::array::<u8>(len.checked_add(1)?).ok()
}

/// Decrypts `len` bytes of `enc` with the low byte of `key` into a freshly
/// allocated, NUL-terminated buffer. Returns null on a null input or a
/// non-positive length.
///
/// # Safety
/// `enc` must point to at least `len` readable bytes when non-null.
#[no_mangle]
#[inline(never)]
pub unsafe extern "C" fn __obf_decrypt(enc: *const c_char, len: i32, key: i32) -> *mut c_char {
    if len <= 0 || enc.is_null() {
        return std::ptr::null_mut();
    }
    let n = len as usize;
    let Some(layout) = buffer_layout(n) else {
        return std::ptr::null_mut();
    };
    let buf = alloc(layout);
    if buf.is_null() {
        return std::ptr::null_mut();
    }
    let k = (key & 0xFF) as u8;
    {
        let _guard = DECRYPT_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for i in 0..n {
            let v = std::ptr::read_volatile(enc.add(i)) as u8;
            buf.add(i).write(v ^ k);
        }
    }
    buf.add(n).write(0);
    buf as *mut c_char
}

/// Zeroes `len` bytes at `ptr` with volatile writes (so the stores survive
/// dead-store elimination) and releases the buffer.
///
/// # Safety
/// `ptr` must be null or a buffer of `len` bytes returned by
/// [`__obf_decrypt`] that has not been freed yet.
#[no_mangle]
#[inline(never)]
pub unsafe extern "C" fn __obf_free(ptr: *mut c_char, len: i32) {
    if ptr.is_null() {
        return;
    }
    let n = len.max(0) as usize;
    for i in 0..n {
        std::ptr::write_volatile(ptr.add(i), 0);
    }
    if let Some(layout) = buffer_layout(n) {
        dealloc(ptr as *mut u8, layout);
    }
}

/// Opaque predicate source: mixes `x` with the address of a local through
/// multiply-add-xor-rotate and returns the low 8 bits. The address is only
/// known at run time, so the result cannot be constant-folded statically.
#[no_mangle]
#[inline(never)]
pub extern "C" fn __obf_opaque(x: i32) -> i32 {
    let s = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    // Volatile read of the slot's own address keeps the mix opaque.
    let slot = s;
    let addr = std::ptr::addr_of!(slot) as usize as i32;
    let read = unsafe { std::ptr::read_volatile(&slot) };
    let mut v = read ^ addr;
    v = v.rotate_left(7) ^ x.wrapping_add(addr & 0xFF);
    v & 0xFF
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn decrypt_to_vec(enc: &[u8], key: i32) -> Option<Vec<u8>> {
        let out = __obf_decrypt(enc.as_ptr() as *const c_char, enc.len() as i32, key);
        if out.is_null() {
            return None;
        }
        let mut v = Vec::with_capacity(enc.len());
        for i in 0..enc.len() {
            v.push(*out.add(i) as u8);
        }
        assert_eq!(*out.add(enc.len()), 0, "missing NUL terminator");
        __obf_free(out, enc.len() as i32);
        Some(v)
    }

    #[test]
    fn decrypt_round_trips() {
        let key = 0x5A;
        let plain = b"hello";
        let enc: Vec<u8> = plain.iter().map(|&b| b ^ (key as u8)).collect();
        let out = unsafe { decrypt_to_vec(&enc, key) }.unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn decrypt_uses_only_low_key_byte() {
        let enc = [0x01u8, 0x02, 0x03];
        let a = unsafe { decrypt_to_vec(&enc, 0x7F) }.unwrap();
        let b = unsafe { decrypt_to_vec(&enc, 0x4242_7F00u32 as i32 | 0x7F) }.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decrypt_rejects_null_and_empty() {
        unsafe {
            assert!(__obf_decrypt(std::ptr::null(), 4, 1).is_null());
            let b = [0u8; 4];
            assert!(__obf_decrypt(b.as_ptr() as *const c_char, 0, 1).is_null());
            assert!(__obf_decrypt(b.as_ptr() as *const c_char, -3, 1).is_null());
        }
    }

    #[test]
    fn free_tolerates_null() {
        unsafe { __obf_free(std::ptr::null_mut(), 16) };
    }

    #[test]
    fn opaque_returns_low_byte() {
        for x in [-1000, -1, 0, 1, 0xFFFF, i32::MAX] {
            let v = __obf_opaque(x);
            assert!((0..=0xFF).contains(&v));
        }
    }

    #[test]
    fn decrypt_is_thread_safe() {
        let key = 7;
        let plain = b"concurrent";
        let enc: Vec<u8> = plain.iter().map(|&b| b ^ (key as u8)).collect();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let enc = enc.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let out = unsafe { decrypt_to_vec(&enc, key) }.unwrap();
                        assert_eq!(out, plain);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
