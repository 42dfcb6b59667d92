//! The external pipeline collaborator.
//!
//! The executor treats the data-processing pipeline as a black box behind
//! this trait: it registers named inputs, runs the computation graph, reads
//! back output metadata, and writes each output into caller-supplied
//! memory.  Model loading, graph semantics, and the pipeline's own stream
//! management live entirely on the implementor's side.

use ferry_core::{BufferMut, DeviceKind, ElementType, InputDescr, Result, TensorShape};

/// A data-processing pipeline that consumes named input tensors and
/// produces named outputs.
///
/// # Invocation protocol
///
/// 1. [`set_input`](Self::set_input) once per tensor — fragments have
///    already been resolved to a single contiguous buffer by the executor.
/// 2. [`run`](Self::run) then [`output`](Self::output) to execute the graph
///    and prepare outputs for retrieval.
/// 3. Output metadata queries, then [`put_output`](Self::put_output) per
///    output slot.
/// 4. [`sync_output_stream`](Self::sync_output_stream) after all output
///    writes — the executor calls this before flushing its own deferred
///    copies out of staging memory.
///
/// After a failed [`run`](Self::run)/[`output`](Self::output), the executor
/// calls [`reset`](Self::reset) so the pipeline is usable for the next
/// invocation.
pub trait Pipeline {
    /// Register one tensor's data for the next run.
    ///
    /// The descriptor always carries exactly one fragment.  Host-resident
    /// data is acceptable for any pipeline placement; the pipeline's
    /// ingestion step owns that host→device handoff.
    fn set_input(&mut self, input: &InputDescr) -> Result<()>;

    /// Execute the computation graph.
    fn run(&mut self) -> Result<()>;

    /// Prepare outputs for retrieval after [`run`](Self::run).
    fn output(&mut self) -> Result<()>;

    /// Number of outputs produced by the last run.
    fn output_count(&self) -> usize;

    /// Per-output batched shapes from the last run.
    fn output_shapes(&self) -> Vec<TensorShape>;

    /// Element type of output `index`.
    fn output_dtype(&self, index: usize) -> ElementType;

    /// Memory kind the pipeline produced output `index` on.
    fn output_device(&self, index: usize) -> DeviceKind;

    /// Write output `index` into `dst`, which states the destination's
    /// placement.  Writes may be asynchronous on the pipeline's output
    /// stream until [`sync_output_stream`](Self::sync_output_stream).
    fn put_output(&mut self, dst: BufferMut, index: usize) -> Result<()>;

    /// Block until all output writes on the pipeline's stream are visible.
    fn sync_output_stream(&mut self) -> Result<()>;

    /// Recover pipeline state after an execution failure.
    fn reset(&mut self) -> Result<()>;

    /// Accelerator ordinal this pipeline executes on, or `None` for a
    /// host-only pipeline.  Fixed for the pipeline's lifetime; the executor
    /// uses it for zero-copy eligibility and staging placement.
    fn device_id(&self) -> Option<usize>;
}
