//! Non-owning buffer and tensor descriptors.
//!
//! # Ownership model
//!
//! [`BufferRef`] and [`BufferMut`] are raw views over memory owned by the
//! caller (a serving layer, another process's shared region, a device
//! allocation).  They carry no lifetime and no ownership — the caller
//! guarantees the region stays valid and, for [`BufferMut`], unaliased for
//! the duration of the invocation that uses it.
//!
//! A logical tensor may be split across several fragments (for example one
//! buffer per source GPU versus a single host buffer).  [`InputDescr`] and
//! [`OutputDescr`] pair the fragment list with the tensor's metadata; the
//! executor decides whether the fragments can be handed to the pipeline
//! directly or must be staged into one contiguous region first.

use serde::{Deserialize, Serialize};

// ─── Device model ────────────────────────────────────────────────────────────

/// Which kind of memory a region lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Pageable or pinned system memory.
    Host,
    /// Device memory on an accelerator, identified by a device ordinal.
    Accelerator,
}

impl DeviceKind {
    /// `true` for [`DeviceKind::Host`].
    #[inline]
    pub fn is_host(self) -> bool {
        matches!(self, DeviceKind::Host)
    }
}

// ─── Element types ───────────────────────────────────────────────────────────

/// Element type of a tensor, with its byte width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F16,
    F32,
    F64,
    Bool,
}

impl ElementType {
    /// Size of one element in bytes.
    #[inline]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::U8 | Self::I8 | Self::Bool => 1,
            Self::U16 | Self::I16 | Self::F16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

// ─── Shapes ──────────────────────────────────────────────────────────────────

/// Shape of a batched tensor: one extent list per sample.
///
/// Samples may be ragged (different extents per sample); the batch size is
/// the number of samples.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorShape {
    samples: Vec<Vec<i64>>,
}

impl TensorShape {
    /// Shape from an explicit per-sample extent list.
    pub fn new(samples: Vec<Vec<i64>>) -> Self {
        Self { samples }
    }

    /// Uniform shape: `num_samples` samples, all with the same extents.
    pub fn uniform(num_samples: usize, sample_extents: &[i64]) -> Self {
        Self {
            samples: vec![sample_extents.to_vec(); num_samples],
        }
    }

    /// Number of samples (the batch size).
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Total element count across all samples.
    pub fn num_elements(&self) -> usize {
        self.samples
            .iter()
            .map(|extents| extents.iter().product::<i64>().max(0) as usize)
            .sum()
    }

    /// Per-sample extents.
    #[inline]
    pub fn samples(&self) -> &[Vec<i64>] {
        &self.samples
    }
}

// ─── Tensor metadata ─────────────────────────────────────────────────────────

/// Identity and layout of one logical tensor within an invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMeta {
    /// Tensor name, unique per direction within one invocation.
    pub name: String,
    /// Per-sample shape.
    pub shape: TensorShape,
    /// Element type.
    pub dtype: ElementType,
}

impl TensorMeta {
    pub fn new(name: impl Into<String>, shape: TensorShape, dtype: ElementType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }

    /// Number of samples carried by this tensor.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.shape.num_samples()
    }

    /// Total payload size in bytes.
    #[inline]
    pub fn num_bytes(&self) -> usize {
        self.shape.num_elements() * self.dtype.size_bytes()
    }
}

// ─── Buffer fragments ────────────────────────────────────────────────────────

/// Immutable view of one contiguous memory fragment.
#[derive(Clone, Copy, Debug)]
pub struct BufferRef {
    /// Start of the fragment.  Validity is the caller's contract.
    pub data: *const u8,
    /// Fragment length in bytes.
    pub len: usize,
    /// Memory kind of the fragment.
    pub device: DeviceKind,
    /// Device ordinal; meaningful only for [`DeviceKind::Accelerator`].
    pub device_id: usize,
}

impl BufferRef {
    /// View over a host slice.
    ///
    /// The returned descriptor does not borrow the slice; the caller must
    /// keep the backing memory alive and unmoved while the descriptor is in
    /// use.
    pub fn from_slice(slice: &[u8]) -> Self {
        Self {
            data: slice.as_ptr(),
            len: slice.len(),
            device: DeviceKind::Host,
            device_id: 0,
        }
    }

    /// View over foreign memory.
    ///
    /// # Safety
    ///
    /// `data` must point to `len` readable bytes on the stated device, valid
    /// for the duration of any invocation that consumes this descriptor.
    pub unsafe fn from_raw_parts(
        data: *const u8,
        len: usize,
        device: DeviceKind,
        device_id: usize,
    ) -> Self {
        Self {
            data,
            len,
            device,
            device_id,
        }
    }
}

/// Mutable view of one contiguous destination fragment.
#[derive(Clone, Copy, Debug)]
pub struct BufferMut {
    /// Start of the fragment.  Validity and exclusivity are the caller's
    /// contract.
    pub data: *mut u8,
    /// Fragment length in bytes.
    pub len: usize,
    /// Memory kind of the fragment.
    pub device: DeviceKind,
    /// Device ordinal; meaningful only for [`DeviceKind::Accelerator`].
    pub device_id: usize,
}

impl BufferMut {
    /// Mutable view over a host slice.
    ///
    /// The returned descriptor does not borrow the slice; the caller must
    /// keep the backing memory alive, unmoved, and otherwise untouched while
    /// the descriptor is in use.
    pub fn from_slice(slice: &mut [u8]) -> Self {
        Self {
            data: slice.as_mut_ptr(),
            len: slice.len(),
            device: DeviceKind::Host,
            device_id: 0,
        }
    }

    /// Mutable view over foreign memory.
    ///
    /// # Safety
    ///
    /// `data` must point to `len` writable bytes on the stated device, with
    /// no other reader or writer for the duration of any invocation that
    /// consumes this descriptor.
    pub unsafe fn from_raw_parts(
        data: *mut u8,
        len: usize,
        device: DeviceKind,
        device_id: usize,
    ) -> Self {
        Self {
            data,
            len,
            device,
            device_id,
        }
    }

    /// The same fragment as an immutable view.
    #[inline]
    pub fn as_ref(&self) -> BufferRef {
        BufferRef {
            data: self.data,
            len: self.len,
            device: self.device,
            device_id: self.device_id,
        }
    }
}

// ─── IO descriptors ──────────────────────────────────────────────────────────

/// One logical input tensor: metadata plus its (possibly fragmented) source
/// buffers, in logical concatenation order.
#[derive(Clone, Debug)]
pub struct InputDescr {
    pub meta: TensorMeta,
    pub buffers: Vec<BufferRef>,
}

impl InputDescr {
    pub fn new(meta: TensorMeta, buffers: Vec<BufferRef>) -> Self {
        Self { meta, buffers }
    }

    /// Sum of fragment lengths in bytes.
    pub fn fragment_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.len).sum()
    }
}

/// One logical output tensor: metadata plus its (possibly fragmented)
/// destination buffers, in logical concatenation order.
#[derive(Clone, Debug)]
pub struct OutputDescr {
    pub meta: TensorMeta,
    pub buffers: Vec<BufferMut>,
}

impl OutputDescr {
    pub fn new(meta: TensorMeta, buffers: Vec<BufferMut>) -> Self {
        Self { meta, buffers }
    }

    /// Sum of fragment lengths in bytes.
    pub fn fragment_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.len).sum()
    }
}

// ─── Output metadata ─────────────────────────────────────────────────────────

/// Shape, type, and placement of one pipeline output, reported after
/// execution so the serving layer can size destination buffers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputInfo {
    pub shape: TensorShape,
    pub dtype: ElementType,
    pub device: DeviceKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes() {
        assert_eq!(ElementType::U8.size_bytes(), 1);
        assert_eq!(ElementType::F16.size_bytes(), 2);
        assert_eq!(ElementType::F32.size_bytes(), 4);
        assert_eq!(ElementType::I64.size_bytes(), 8);
    }

    #[test]
    fn shape_counts_ragged_samples() {
        let shape = TensorShape::new(vec![vec![2, 3], vec![4, 3], vec![1, 3]]);
        assert_eq!(shape.num_samples(), 3);
        assert_eq!(shape.num_elements(), 6 + 12 + 3);
    }

    #[test]
    fn uniform_shape_matches_explicit() {
        let uniform = TensorShape::uniform(4, &[3, 224, 224]);
        let explicit = TensorShape::new(vec![vec![3, 224, 224]; 4]);
        assert_eq!(uniform, explicit);
        assert_eq!(uniform.num_elements(), 4 * 3 * 224 * 224);
    }

    #[test]
    fn meta_byte_size() {
        let meta = TensorMeta::new(
            "image",
            TensorShape::uniform(2, &[3, 4]),
            ElementType::F32,
        );
        assert_eq!(meta.batch_size(), 2);
        assert_eq!(meta.num_bytes(), 2 * 12 * 4);
    }

    #[test]
    fn fragment_bytes_sums_all_buffers() {
        let a = vec![0u8; 100];
        let b = vec![0u8; 200];
        let descr = InputDescr::new(
            TensorMeta::new("x", TensorShape::uniform(1, &[300]), ElementType::U8),
            vec![BufferRef::from_slice(&a), BufferRef::from_slice(&b)],
        );
        assert_eq!(descr.fragment_bytes(), 300);
    }

    #[test]
    fn output_info_round_trips_through_serde() {
        let info = OutputInfo {
            shape: TensorShape::uniform(2, &[16]),
            dtype: ElementType::F32,
            device: DeviceKind::Accelerator,
        };
        let json = serde_json::to_string(&info).expect("serialize");
        let back: OutputInfo = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, info);
    }
}
