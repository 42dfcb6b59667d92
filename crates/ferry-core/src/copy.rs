//! The device copy primitive.
//!
//! One function, four copy directions.  Host→host is a plain memory copy
//! and completes before returning; any accelerator-involving combination is
//! enqueued asynchronously on a stream and the caller must synchronize
//! before relying on the destination.

use crate::accel;
use crate::descriptor::DeviceKind;
use crate::error::Result;

/// An accelerator stream handle for asynchronous copies.
///
/// Stored as an address so it is `Copy + Send` and can cross worker-thread
/// boundaries.  [`CopyStream::DEFAULT`] selects the device's default stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyStream(usize);

impl CopyStream {
    /// The device's default stream.
    pub const DEFAULT: CopyStream = CopyStream(0);

    /// Wrap a raw stream handle.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a valid stream handle in the context that will
    /// execute copies on it, and must outlive every copy enqueued on it.
    pub unsafe fn from_raw(raw: *mut std::ffi::c_void) -> Self {
        Self(raw as usize)
    }

    #[inline]
    pub(crate) fn as_raw(self) -> accel::sys::CUstream {
        self.0 as accel::sys::CUstream
    }
}

/// Copy `len` bytes from `src` to `dst`, selecting the copy direction from
/// the endpoints' device kinds.
///
/// Host→host runs synchronously.  Host→device, device→host, and
/// device→device are enqueued on `stream` and may still be in flight when
/// this returns; synchronize the stream (or the device's default stream)
/// before reading the destination.  Errors are fatal to the enclosing
/// operation and are never retried here.
///
/// # Safety
///
/// `src` must reference `len` readable bytes and `dst` `len` writable bytes
/// on their stated devices, the ranges must not overlap, and both must stay
/// valid until the copy has completed (for asynchronous variants: until the
/// stream is synchronized).
pub unsafe fn mem_copy(
    dst_kind: DeviceKind,
    dst: *mut u8,
    src_kind: DeviceKind,
    src: *const u8,
    len: usize,
    stream: CopyStream,
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    match (dst_kind, src_kind) {
        (DeviceKind::Host, DeviceKind::Host) => {
            // SAFETY: per this function's contract the ranges are valid,
            // disjoint host memory.
            unsafe { std::ptr::copy_nonoverlapping(src, dst, len) };
            Ok(())
        }
        _ => {
            // SAFETY: forwarded contract; dispatch handles the remaining
            // direction combinations.
            unsafe { accel::copy_raw(dst_kind, dst, src_kind, src, len, stream.as_raw()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_to_host_copies_bytes() {
        let src: Vec<u8> = (0u8..64).collect();
        let mut dst = vec![0u8; 64];
        // SAFETY: both ranges are valid, disjoint host allocations.
        unsafe {
            mem_copy(
                DeviceKind::Host,
                dst.as_mut_ptr(),
                DeviceKind::Host,
                src.as_ptr(),
                src.len(),
                CopyStream::DEFAULT,
            )
        }
        .expect("host copy");
        assert_eq!(dst, src);
    }

    #[test]
    fn zero_length_copy_is_a_no_op() {
        let mut dst = [7u8; 4];
        // SAFETY: length zero; no memory is touched.
        unsafe {
            mem_copy(
                DeviceKind::Host,
                dst.as_mut_ptr(),
                DeviceKind::Host,
                std::ptr::null(),
                0,
                CopyStream::DEFAULT,
            )
        }
        .expect("empty copy");
        assert_eq!(dst, [7u8; 4]);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn accelerator_copy_errors_without_cuda() {
        let src = [0u8; 8];
        let mut dst = [0u8; 8];
        // SAFETY: the stub rejects the copy without touching memory.
        let err = unsafe {
            mem_copy(
                DeviceKind::Accelerator,
                dst.as_mut_ptr(),
                DeviceKind::Host,
                src.as_ptr(),
                8,
                CopyStream::DEFAULT,
            )
        }
        .expect_err("stub must reject accelerator copies");
        assert_eq!(err.error_code(), 202);
    }
}
