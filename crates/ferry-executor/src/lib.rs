#![doc = include_str!("../README.md")]

pub mod executor;
pub mod pipeline;
pub mod scheduler;

pub use executor::{Executor, ExecutorConfig, ExecutorStats};
pub use pipeline::Pipeline;
pub use scheduler::{CopyScheduler, CopyTask, SchedulerStats};

// Re-export the core vocabulary so downstream callers depend on one crate.
pub use ferry_core::{
    mem_copy, BufferMut, BufferPool, BufferRef, CopyStream, DeviceKind, ElementType, FerryError,
    InputDescr, IoRole, OutputDescr, OutputInfo, Result, StagingBuffer, TensorMeta, TensorShape,
};
