//! Stub accelerator backing, compiled when the `cuda` feature is disabled.
//!
//! Mirrors the surface of `accel/mod.rs` so the rest of the crate compiles
//! unchanged.  Construction and copies report
//! [`FerryError::AcceleratorUnavailable`]; host-only workloads never reach
//! this module.

use std::sync::Arc;

use crate::descriptor::DeviceKind;
use crate::error::{FerryError, Result};

pub(crate) mod sys {
    use std::ffi::c_void;

    pub type CUstream = *mut c_void;
}

/// Accelerator handle placeholder.  Never constructed in stub builds.
pub struct AccelDevice {
    ordinal: usize,
}

impl AccelDevice {
    pub fn new(_ordinal: usize) -> Result<Arc<Self>> {
        Err(FerryError::AcceleratorUnavailable)
    }

    #[inline]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn alloc_bytes(&self, _len: usize) -> Result<AccelBuffer> {
        Err(FerryError::AcceleratorUnavailable)
    }

    pub fn sync_default_stream(&self) -> Result<()> {
        Err(FerryError::AcceleratorUnavailable)
    }
}

/// Device allocation placeholder.  Never constructed in stub builds.
pub struct AccelBuffer {
    never: std::convert::Infallible,
}

impl AccelBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        match self.never {}
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        match self.never {}
    }

    #[inline]
    pub fn device_ptr(&self) -> u64 {
        match self.never {}
    }
}

/// Device guard placeholder.  Never constructed in stub builds.
pub struct DeviceGuard {
    _private: (),
}

impl DeviceGuard {
    pub fn new(_device: &AccelDevice) -> Result<Self> {
        Err(FerryError::AcceleratorUnavailable)
    }
}

/// Accelerator-involving copies are unavailable without the `cuda` feature.
///
/// # Safety
///
/// Trivially safe — always returns an error without touching memory.  The
/// signature matches the real implementation.
pub unsafe fn copy_raw(
    _dst_kind: DeviceKind,
    _dst: *mut u8,
    _src_kind: DeviceKind,
    _src: *const u8,
    _len: usize,
    _stream: sys::CUstream,
) -> Result<()> {
    Err(FerryError::AcceleratorUnavailable)
}
