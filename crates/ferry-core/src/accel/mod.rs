//! Accelerator backing — cudarc device handles, owned device allocations,
//! the scoped device guard, and raw-pointer async copies.
//!
//! Compiled when the `cuda` feature is enabled; `accel_stub.rs` provides
//! the same surface otherwise, with every operation reporting
//! [`FerryError::AcceleratorUnavailable`].

pub(crate) mod sys;

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaSlice, DevicePtr};
use tracing::info;

use crate::descriptor::DeviceKind;
use crate::error::{FerryError, Result};

// ─── Device handle ───────────────────────────────────────────────────────────

/// Long-lived accelerator handle, bound to one device ordinal.
///
/// All staging allocations for a pool go through one `AccelDevice`, so the
/// CUDA context outlives every buffer structurally (`CudaSlice` holds an
/// `Arc<CudaDevice>` internally).
pub struct AccelDevice {
    device: Arc<CudaDevice>,
    ordinal: usize,
}

impl AccelDevice {
    /// Initialize the accelerator on the given device ordinal.
    pub fn new(ordinal: usize) -> Result<Arc<Self>> {
        let device = CudaDevice::new(ordinal)?;
        info!(ordinal, "accelerator device initialized");
        Ok(Arc::new(Self { device, ordinal }))
    }

    /// Device ordinal this handle is bound to.
    #[inline]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Allocate `len` zeroed bytes of device memory.
    ///
    /// Runs under a [`DeviceGuard`] so the allocation lands on this handle's
    /// device regardless of the thread's previous context.
    pub fn alloc_bytes(&self, len: usize) -> Result<AccelBuffer> {
        let _guard = DeviceGuard::new(self)?;
        let slice = self.device.alloc_zeros::<u8>(len)?;
        Ok(AccelBuffer { slice })
    }

    /// Block until all work enqueued on the default stream has completed.
    pub fn sync_default_stream(&self) -> Result<()> {
        let _guard = DeviceGuard::new(self)?;
        // SAFETY: the null handle selects the default stream of the context
        // bound by the guard.
        unsafe { sys::cu_stream_synchronize(std::ptr::null_mut()) }
    }
}

// ─── Owned device allocation ─────────────────────────────────────────────────

/// An owned device allocation backing one staging buffer.
pub struct AccelBuffer {
    slice: CudaSlice<u8>,
}

impl AccelBuffer {
    /// Allocation length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    /// `true` if the allocation is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slice.len() == 0
    }

    /// Raw device pointer as a `u64`.
    ///
    /// Valid only while `self` is alive; callers must not free it or use it
    /// from a different CUDA context.
    #[inline]
    pub fn device_ptr(&self) -> u64 {
        *self.slice.device_ptr() as u64
    }
}

// ─── Scoped device guard ─────────────────────────────────────────────────────

/// Binds an accelerator's context to the calling thread and restores the
/// previous context on drop, on all exit paths.
pub struct DeviceGuard {
    previous: sys::CUcontext,
}

impl DeviceGuard {
    /// Save the current context and bind `device`'s context to this thread.
    pub fn new(device: &AccelDevice) -> Result<Self> {
        let previous = sys::cu_ctx_get_current()?;
        device.device.bind_to_thread()?;
        Ok(Self { previous })
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        // SAFETY: `previous` was returned by cuCtxGetCurrent; null unbinds.
        if let Err(err) = unsafe { sys::cu_ctx_set_current(self.previous) } {
            tracing::warn!(%err, "failed to restore previous device context");
        }
    }
}

// ─── Raw accelerator copies ──────────────────────────────────────────────────

/// Enqueue an accelerator-involving copy between two raw endpoints.
///
/// Dispatches on the (destination, source) device kinds; host→host pairs are
/// rejected — the caller routes those through the plain memory copy.  The
/// copy is asynchronous on `stream` (null = default stream); the caller must
/// synchronize before relying on the result.
///
/// # Safety
///
/// Both pointers must reference `len` valid bytes on their stated devices,
/// with `dst` exclusively writable, and stay valid until the stream is
/// synchronized.
pub unsafe fn copy_raw(
    dst_kind: DeviceKind,
    dst: *mut u8,
    src_kind: DeviceKind,
    src: *const u8,
    len: usize,
    stream: sys::CUstream,
) -> Result<()> {
    match (dst_kind, src_kind) {
        (DeviceKind::Accelerator, DeviceKind::Host) => {
            // SAFETY: per this function's contract.
            unsafe { sys::cu_memcpy_htod_async(dst as sys::CUdeviceptr, src, len, stream) }
        }
        (DeviceKind::Host, DeviceKind::Accelerator) => {
            // SAFETY: per this function's contract.
            unsafe { sys::cu_memcpy_dtoh_async(dst, src as sys::CUdeviceptr, len, stream) }
        }
        (DeviceKind::Accelerator, DeviceKind::Accelerator) => {
            // SAFETY: per this function's contract.
            unsafe {
                sys::cu_memcpy_dtod_async(
                    dst as sys::CUdeviceptr,
                    src as sys::CUdeviceptr,
                    len,
                    stream,
                )
            }
        }
        (DeviceKind::Host, DeviceKind::Host) => Err(FerryError::Copy(
            "host-to-host copy routed to the accelerator engine".into(),
        )),
    }
}
