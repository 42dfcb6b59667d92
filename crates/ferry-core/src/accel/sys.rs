//! Minimal CUDA driver FFI used by the copy primitive and device guard.
//!
//! `cudarc` covers device handles and owned allocations, but the copy engine
//! works on raw pointers supplied by the serving layer, so the async memcpy
//! variants and the current-context queries are declared here directly.
//! The symbols resolve against the same `libcuda` that `cudarc` links.

use std::ffi::c_void;

use crate::error::{FerryError, Result};

pub type CUresult = ::std::os::raw::c_int;
pub type CUcontext = *mut c_void;
pub type CUstream = *mut c_void;
pub type CUdeviceptr = u64;

pub const CUDA_SUCCESS: CUresult = 0;

extern "C" {
    fn cuCtxGetCurrent(pctx: *mut CUcontext) -> CUresult;
    fn cuCtxSetCurrent(ctx: CUcontext) -> CUresult;
    fn cuMemcpyHtoDAsync_v2(
        dst: CUdeviceptr,
        src: *const c_void,
        byte_count: usize,
        stream: CUstream,
    ) -> CUresult;
    fn cuMemcpyDtoHAsync_v2(
        dst: *mut c_void,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> CUresult;
    fn cuMemcpyDtoDAsync_v2(
        dst: CUdeviceptr,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> CUresult;
    fn cuStreamSynchronize(stream: CUstream) -> CUresult;
}

#[inline]
pub fn check_cu(result: CUresult, context: &str) -> Result<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(FerryError::Copy(format!(
            "{context} failed with CUDA error code {result}"
        )))
    }
}

/// Call `cuCtxGetCurrent`.
pub fn cu_ctx_get_current() -> Result<CUcontext> {
    let mut ctx: CUcontext = std::ptr::null_mut();
    // SAFETY: FFI call into the CUDA driver; `ctx` is valid writable storage.
    let rc = unsafe { cuCtxGetCurrent(&mut ctx) };
    check_cu(rc, "cuCtxGetCurrent")?;
    Ok(ctx)
}

/// Call `cuCtxSetCurrent`.  A null context unbinds the calling thread.
///
/// # Safety
/// `ctx` must be null or a valid CUDA context handle.
pub unsafe fn cu_ctx_set_current(ctx: CUcontext) -> Result<()> {
    // SAFETY: FFI call into the CUDA driver with a caller-validated handle.
    let rc = unsafe { cuCtxSetCurrent(ctx) };
    check_cu(rc, "cuCtxSetCurrent")
}

/// Enqueue a host→device copy on `stream`.
///
/// # Safety
/// `dst` must be `len` writable device bytes, `src` `len` readable host
/// bytes, both valid until the stream is synchronized.
pub unsafe fn cu_memcpy_htod_async(
    dst: CUdeviceptr,
    src: *const u8,
    len: usize,
    stream: CUstream,
) -> Result<()> {
    // SAFETY: FFI call into the CUDA driver under the caller's contract.
    let rc = unsafe { cuMemcpyHtoDAsync_v2(dst, src as *const c_void, len, stream) };
    check_cu(rc, "cuMemcpyHtoDAsync")
}

/// Enqueue a device→host copy on `stream`.
///
/// # Safety
/// `dst` must be `len` writable host bytes, `src` `len` readable device
/// bytes, both valid until the stream is synchronized.
pub unsafe fn cu_memcpy_dtoh_async(
    dst: *mut u8,
    src: CUdeviceptr,
    len: usize,
    stream: CUstream,
) -> Result<()> {
    // SAFETY: FFI call into the CUDA driver under the caller's contract.
    let rc = unsafe { cuMemcpyDtoHAsync_v2(dst as *mut c_void, src, len, stream) };
    check_cu(rc, "cuMemcpyDtoHAsync")
}

/// Enqueue a device→device copy on `stream`.
///
/// # Safety
/// Both pointers must reference `len` valid device bytes until the stream
/// is synchronized.
pub unsafe fn cu_memcpy_dtod_async(
    dst: CUdeviceptr,
    src: CUdeviceptr,
    len: usize,
    stream: CUstream,
) -> Result<()> {
    // SAFETY: FFI call into the CUDA driver under the caller's contract.
    let rc = unsafe { cuMemcpyDtoDAsync_v2(dst, src, len, stream) };
    check_cu(rc, "cuMemcpyDtoDAsync")
}

/// Block until all work enqueued on `stream` has completed.
///
/// # Safety
/// `stream` must be null (default stream) or a valid stream handle in the
/// current context.
pub unsafe fn cu_stream_synchronize(stream: CUstream) -> Result<()> {
    // SAFETY: FFI call into the CUDA driver with a caller-validated handle.
    let rc = unsafe { cuStreamSynchronize(stream) };
    check_cu(rc, "cuStreamSynchronize")
}
