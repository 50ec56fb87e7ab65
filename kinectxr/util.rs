/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Helpers shared by the entry points: the OpenXR two-call enumeration
//! idiom and fixed-size C string handling.

use openxr_sys::Result;

use std::os::raw::c_char;
use std::ptr;

/// The two-call idiom over a slice of plain values.
///
/// Capacity 0 reports the count without touching the array; a non-zero
/// capacity smaller than the count fails with `ERROR_SIZE_INSUFFICIENT`
/// (count still reported); otherwise the items are copied out.
///
/// # Safety
/// `items_output` must point to `capacity` writable elements when
/// `capacity` is non-zero.
pub unsafe fn enumerate<T: Copy>(
    capacity: u32,
    count_output: *mut u32,
    items_output: *mut T,
    items: &[T],
) -> Result {
    enumerate_with(capacity, count_output, items_output, items.len(), |i, out| {
        *out = items[i];
    })
}

/// The two-call idiom with a per-element fill callback, for output records
/// that are built in place (extension properties, swapchain images, views).
///
/// # Safety
/// As [`enumerate`].
pub unsafe fn enumerate_with<T>(
    capacity: u32,
    count_output: *mut u32,
    items_output: *mut T,
    len: usize,
    fill: impl Fn(usize, &mut T),
) -> Result {
    if count_output.is_null() {
        return Result::ERROR_VALIDATION_FAILURE;
    }
    *count_output = len as u32;
    if capacity == 0 {
        return Result::SUCCESS;
    }
    if (capacity as usize) < len {
        return Result::ERROR_SIZE_INSUFFICIENT;
    }
    if items_output.is_null() {
        return Result::ERROR_VALIDATION_FAILURE;
    }
    for i in 0..len {
        fill(i, &mut *items_output.add(i));
    }
    Result::SUCCESS
}

/// NUL-terminate `src` into a fixed-size C char array, truncating if
/// needed.
pub fn write_cstr(dst: &mut [c_char], src: &str) {
    let bytes = src.as_bytes();
    let len = bytes.len().min(dst.len().saturating_sub(1));
    for (i, &byte) in bytes.iter().take(len).enumerate() {
        dst[i] = byte as c_char;
    }
    dst[len] = 0;
}

/// Read a NUL-terminated fixed-size C char array.
pub fn read_cstr(src: &[c_char]) -> String {
    let bytes: Vec<u8> = src
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Read a NUL-terminated string from a raw pointer.
///
/// # Safety
/// `src` must be null or point to a NUL-terminated string.
pub unsafe fn read_cstr_ptr(src: *const c_char) -> Option<String> {
    if src.is_null() {
        return None;
    }
    Some(
        std::ffi::CStr::from_ptr(src)
            .to_string_lossy()
            .into_owned(),
    )
}

/// Monotonic clock reading in nanoseconds; the time base for event
/// timestamps and predicted display times.
pub fn now_monotonic_ns() -> i64 {
    time::precise_time_ns() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_call_reports_count_without_writing() {
        let items = [10i64, 20, 30];
        let mut count = 0u32;
        let result =
            unsafe { enumerate(0, &mut count, ptr::null_mut(), &items) };
        assert_eq!(result, Result::SUCCESS);
        assert_eq!(count, 3);
    }

    #[test]
    fn two_call_rejects_short_buffers() {
        let items = [10i64, 20, 30];
        let mut count = 0u32;
        let mut out = [0i64; 2];
        let result = unsafe { enumerate(2, &mut count, out.as_mut_ptr(), &items) };
        assert_eq!(result, Result::ERROR_SIZE_INSUFFICIENT);
        assert_eq!(count, 3);
    }

    #[test]
    fn two_call_fills_sufficient_buffers() {
        let items = [10i64, 20, 30];
        let mut count = 0u32;
        let mut out = [0i64; 4];
        let result = unsafe { enumerate(4, &mut count, out.as_mut_ptr(), &items) };
        assert_eq!(result, Result::SUCCESS);
        assert_eq!(count, 3);
        assert_eq!(&out[..3], &items);
    }

    #[test]
    fn cstr_round_trip() {
        let mut buffer = [0 as c_char; 16];
        write_cstr(&mut buffer, "kinect");
        assert_eq!(read_cstr(&buffer), "kinect");
        // Truncation keeps the terminator.
        write_cstr(&mut buffer, "a very long runtime name indeed");
        assert_eq!(read_cstr(&buffer).len(), 15);
    }
}
