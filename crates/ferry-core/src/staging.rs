//! Reusable staging buffers and their keyed pool.
//!
//! # Reuse model
//!
//! A staging buffer separates *reservation* from *allocation*: `reserve`
//! grows the backing memory (only while no allocation is live), `allocate`
//! claims an append-style range inside the reservation, and `clear` resets
//! the fill mark without releasing memory.  The same backing region then
//! serves every invocation of a stable tensor name — after warm-up the hot
//! path performs no allocations, which matters because invocation rate is
//! the system's primary performance axis.
//!
//! # Invariants
//!
//! - `filled <= capacity` at all times.
//! - `allocate` past the reservation is a contract failure
//!   ([`FerryError::StagingOverflow`]).
//! - Capacity grows only while `filled == 0`
//!   ([`FerryError::ReserveWithLiveAllocations`] otherwise) — growth may
//!   move the backing memory, which would invalidate previously returned
//!   pointers.
//! - Buffers live until the owning pool is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::accel::AccelDevice;
#[cfg(feature = "cuda")]
use crate::accel::AccelBuffer;
use crate::descriptor::{BufferMut, BufferRef, DeviceKind};
use crate::error::{FerryError, Result};

// ─── Staging buffer interface ────────────────────────────────────────────────

/// A resizable, device-resident memory region with append-style allocation
/// inside an explicit reservation.
///
/// One interface, two backings (host and accelerator), selected at runtime
/// when the pool creates the buffer.
pub trait StagingBuffer {
    /// Claim `len` bytes starting at the current fill mark and advance it.
    ///
    /// Returns the origin of the claimed range.  Fails with
    /// [`FerryError::StagingOverflow`] if the range would exceed capacity.
    fn allocate(&mut self, len: usize) -> Result<*mut u8>;

    /// Cancel all allocations.  No memory is released.
    fn clear(&mut self);

    /// Grow capacity to at least `len` bytes.
    ///
    /// A no-op when capacity is already sufficient.  Fails with
    /// [`FerryError::ReserveWithLiveAllocations`] if any allocation is live.
    fn reserve(&mut self, len: usize) -> Result<()>;

    /// Reserved size in bytes.
    fn capacity(&self) -> usize;

    /// Bytes claimed by allocations since the last [`clear`](Self::clear).
    fn filled(&self) -> usize;

    /// Memory kind of the backing region.
    fn device_kind(&self) -> DeviceKind;

    /// Device ordinal of the backing region (0 for host).
    fn device_id(&self) -> usize;

    /// Immutable descriptor over the filled prefix.
    fn descr(&self) -> BufferRef;

    /// Mutable descriptor over the filled prefix.
    fn descr_mut(&mut self) -> BufferMut;
}

// ─── Host staging ────────────────────────────────────────────────────────────

/// Staging buffer backed by pageable host memory.
#[derive(Default)]
pub struct HostStaging {
    buf: Vec<u8>,
    filled: usize,
}

impl HostStaging {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StagingBuffer for HostStaging {
    fn allocate(&mut self, len: usize) -> Result<*mut u8> {
        if self.filled + len > self.buf.len() {
            return Err(FerryError::StagingOverflow {
                requested: len,
                filled: self.filled,
                capacity: self.buf.len(),
            });
        }
        // SAFETY: the range check above keeps the offset within the backing
        // allocation.
        let origin = unsafe { self.buf.as_mut_ptr().add(self.filled) };
        self.filled += len;
        Ok(origin)
    }

    fn clear(&mut self) {
        self.filled = 0;
    }

    fn reserve(&mut self, len: usize) -> Result<()> {
        if len > self.buf.len() {
            if self.filled != 0 {
                return Err(FerryError::ReserveWithLiveAllocations {
                    filled: self.filled,
                });
            }
            debug!(
                old_capacity = self.buf.len(),
                new_capacity = len,
                "growing host staging buffer"
            );
            self.buf.resize(len, 0);
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn filled(&self) -> usize {
        self.filled
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::Host
    }

    fn device_id(&self) -> usize {
        0
    }

    fn descr(&self) -> BufferRef {
        BufferRef {
            data: self.buf.as_ptr(),
            len: self.filled,
            device: DeviceKind::Host,
            device_id: 0,
        }
    }

    fn descr_mut(&mut self) -> BufferMut {
        BufferMut {
            data: self.buf.as_mut_ptr(),
            len: self.filled,
            device: DeviceKind::Host,
            device_id: 0,
        }
    }
}

// ─── Accelerator staging ─────────────────────────────────────────────────────

/// Staging buffer backed by accelerator device memory.
///
/// Requires the `cuda` feature; without it the pool refuses to create one.
#[cfg(feature = "cuda")]
pub struct AccelStaging {
    device: Arc<AccelDevice>,
    buffer: Option<AccelBuffer>,
    filled: usize,
}

#[cfg(feature = "cuda")]
impl AccelStaging {
    pub fn new(device: Arc<AccelDevice>) -> Self {
        Self {
            device,
            buffer: None,
            filled: 0,
        }
    }

    fn base_ptr(&self) -> *mut u8 {
        self.buffer
            .as_ref()
            .map(|b| b.device_ptr() as *mut u8)
            .unwrap_or(std::ptr::null_mut())
    }
}

#[cfg(feature = "cuda")]
impl StagingBuffer for AccelStaging {
    fn allocate(&mut self, len: usize) -> Result<*mut u8> {
        if self.filled + len > self.capacity() {
            return Err(FerryError::StagingOverflow {
                requested: len,
                filled: self.filled,
                capacity: self.capacity(),
            });
        }
        // Device pointers are plain addresses; offset arithmetic stays
        // within the allocation per the range check above.
        let origin = (self.base_ptr() as usize + self.filled) as *mut u8;
        self.filled += len;
        Ok(origin)
    }

    fn clear(&mut self) {
        self.filled = 0;
    }

    fn reserve(&mut self, len: usize) -> Result<()> {
        if len > self.capacity() {
            if self.filled != 0 {
                return Err(FerryError::ReserveWithLiveAllocations {
                    filled: self.filled,
                });
            }
            debug!(
                old_capacity = self.capacity(),
                new_capacity = len,
                ordinal = self.device.ordinal(),
                "growing accelerator staging buffer"
            );
            // The previous allocation (if any) is released on replacement.
            self.buffer = Some(self.device.alloc_bytes(len)?);
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buffer.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    fn filled(&self) -> usize {
        self.filled
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::Accelerator
    }

    fn device_id(&self) -> usize {
        self.device.ordinal()
    }

    fn descr(&self) -> BufferRef {
        BufferRef {
            data: self.base_ptr(),
            len: self.filled,
            device: DeviceKind::Accelerator,
            device_id: self.device.ordinal(),
        }
    }

    fn descr_mut(&mut self) -> BufferMut {
        BufferMut {
            data: self.base_ptr(),
            len: self.filled,
            device: DeviceKind::Accelerator,
            device_id: self.device.ordinal(),
        }
    }
}

// ─── Keyed pool ──────────────────────────────────────────────────────────────

/// Which direction a staging buffer serves.  Part of the pool key, so a
/// tensor name may have one input and one output buffer simultaneously.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoRole {
    Input,
    Output,
}

impl IoRole {
    fn suffix(self) -> &'static str {
        match self {
            IoRole::Input => "_inp",
            IoRole::Output => "_out",
        }
    }
}

/// Registry of staging buffers keyed by tensor name and role.
///
/// Entries are created empty on first use and persist until the pool is
/// dropped — the cache is keyed by name, not shape, so stable or growing
/// workloads hit warm buffers on every invocation.
///
/// The pool is exclusively owned by one executor and performs no internal
/// locking; only one invocation may use it at a time.
pub struct BufferPool {
    device: Option<Arc<AccelDevice>>,
    host: HashMap<String, HostStaging>,
    #[cfg(feature = "cuda")]
    accel: HashMap<String, AccelStaging>,
}

impl BufferPool {
    /// Create a pool.  `device` backs accelerator staging buffers; `None`
    /// restricts the pool to host staging.
    pub fn new(device: Option<Arc<AccelDevice>>) -> Self {
        Self {
            device,
            host: HashMap::new(),
            #[cfg(feature = "cuda")]
            accel: HashMap::new(),
        }
    }

    /// Fetch the staging buffer for `(name, role)` on the given memory kind,
    /// creating an empty one on first use.
    pub fn get(
        &mut self,
        name: &str,
        role: IoRole,
        kind: DeviceKind,
    ) -> Result<&mut dyn StagingBuffer> {
        let key = format!("{name}{}", role.suffix());
        match kind {
            DeviceKind::Host => Ok(self.host.entry(key).or_insert_with(HostStaging::new)),
            DeviceKind::Accelerator => {
                #[cfg(feature = "cuda")]
                {
                    let device = self
                        .device
                        .clone()
                        .ok_or(FerryError::AcceleratorUnavailable)?;
                    Ok(self
                        .accel
                        .entry(key)
                        .or_insert_with(|| AccelStaging::new(device)))
                }
                #[cfg(not(feature = "cuda"))]
                {
                    let _ = self.device.as_ref();
                    Err(FerryError::AcceleratorUnavailable)
                }
            }
        }
    }

    /// Capacity of a cached staging buffer, or `None` if the key has never
    /// been used.
    pub fn capacity_of(&self, name: &str, role: IoRole, kind: DeviceKind) -> Option<usize> {
        let key = format!("{name}{}", role.suffix());
        match kind {
            DeviceKind::Host => self.host.get(&key).map(|b| b.capacity()),
            DeviceKind::Accelerator => {
                #[cfg(feature = "cuda")]
                {
                    self.accel.get(&key).map(|b| b.capacity())
                }
                #[cfg(not(feature = "cuda"))]
                {
                    None
                }
            }
        }
    }

    /// Number of host staging buffers currently cached.
    pub fn host_entries(&self) -> usize {
        self.host.len()
    }

    /// Number of accelerator staging buffers currently cached.
    pub fn accel_entries(&self) -> usize {
        #[cfg(feature = "cuda")]
        {
            self.accel.len()
        }
        #[cfg(not(feature = "cuda"))]
        {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_append_style() {
        let mut buf = HostStaging::new();
        buf.reserve(100).expect("reserve");
        let a = buf.allocate(30).expect("first chunk");
        let b = buf.allocate(70).expect("second chunk");
        assert_eq!(b as usize - a as usize, 30);
        assert_eq!(buf.filled(), 100);
        assert_eq!(buf.capacity(), 100);
    }

    #[test]
    fn allocate_past_capacity_is_rejected() {
        let mut buf = HostStaging::new();
        buf.reserve(16).expect("reserve");
        buf.allocate(10).expect("fits");
        let err = buf.allocate(7).expect_err("overflow");
        assert!(matches!(
            err,
            FerryError::StagingOverflow {
                requested: 7,
                filled: 10,
                capacity: 16,
            }
        ));
        // A failed allocation leaves the fill mark untouched.
        assert_eq!(buf.filled(), 10);
    }

    #[test]
    fn reserve_with_live_allocations_is_rejected() {
        let mut buf = HostStaging::new();
        buf.reserve(8).expect("reserve");
        buf.allocate(4).expect("allocate");
        let err = buf.reserve(32).expect_err("growth with live allocation");
        assert!(matches!(
            err,
            FerryError::ReserveWithLiveAllocations { filled: 4 }
        ));
        // After clear, growth succeeds and capacity is monotone.
        buf.clear();
        buf.reserve(32).expect("grow after clear");
        assert_eq!(buf.capacity(), 32);
        buf.reserve(16).expect("shrink request is a no-op");
        assert_eq!(buf.capacity(), 32);
    }

    #[test]
    fn clear_keeps_backing_memory() {
        let mut buf = HostStaging::new();
        buf.reserve(64).expect("reserve");
        buf.allocate(64).expect("fill");
        let base = buf.descr().data;
        buf.clear();
        assert_eq!(buf.filled(), 0);
        assert_eq!(buf.capacity(), 64);
        buf.reserve(64).expect("no-op reserve");
        assert_eq!(buf.descr().data, base, "backing memory must be reused");
    }

    #[test]
    fn descr_reports_filled_prefix() {
        let mut buf = HostStaging::new();
        buf.reserve(128).expect("reserve");
        buf.allocate(40).expect("allocate");
        let descr = buf.descr();
        assert_eq!(descr.len, 40);
        assert_eq!(descr.device, DeviceKind::Host);
    }

    #[test]
    fn pool_reuses_entries_per_name_and_role() {
        let mut pool = BufferPool::new(None);
        {
            let buf = pool
                .get("image", IoRole::Input, DeviceKind::Host)
                .expect("create");
            buf.reserve(256).expect("reserve");
        }
        assert_eq!(pool.host_entries(), 1);

        // Same name, same role: the warm entry comes back.
        let capacity = pool
            .get("image", IoRole::Input, DeviceKind::Host)
            .expect("reuse")
            .capacity();
        assert_eq!(capacity, 256);

        // Same name, other role: a distinct buffer.
        pool.get("image", IoRole::Output, DeviceKind::Host)
            .expect("output entry");
        assert_eq!(pool.host_entries(), 2);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn accelerator_staging_requires_cuda_feature() {
        let mut pool = BufferPool::new(None);
        let err = pool
            .get("image", IoRole::Input, DeviceKind::Accelerator)
            .err()
            .expect("stub pool must refuse accelerator staging");
        assert_eq!(err.error_code(), 202);
    }
}
