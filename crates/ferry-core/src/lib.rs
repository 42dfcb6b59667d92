#![doc = include_str!("../README.md")]

pub mod copy;
pub mod descriptor;
pub mod error;
pub mod staging;

#[cfg(feature = "cuda")]
pub mod accel;
#[cfg(not(feature = "cuda"))]
#[path = "accel_stub.rs"]
pub mod accel;

pub use copy::{mem_copy, CopyStream};
pub use descriptor::{
    BufferMut, BufferRef, DeviceKind, ElementType, InputDescr, OutputDescr, OutputInfo,
    TensorMeta, TensorShape,
};
pub use error::{FerryError, Result};
pub use staging::{BufferPool, IoRole, StagingBuffer};
