//! The execution orchestrator.
//!
//! # Input path
//!
//! For each input descriptor, the executor decides between a zero-copy
//! handoff and a staged copy.  Zero-copy is legal iff the input has exactly
//! one fragment and that fragment lives on the host or already on the
//! pipeline's execution device — host inputs never require staging because
//! the pipeline's ingestion step accepts host data for any placement.
//! Everything else is gathered into a pooled staging buffer by the parallel
//! copy scheduler, which is flushed to completion before the pipeline runs.
//!
//! # Output path
//!
//! Single-fragment destinations are handed to the pipeline directly.
//! Fragmented destinations route through a staging buffer: the pipeline
//! writes into staging, and one *deferred* copy task per destination
//! fragment scatters the bytes out.  All deferred tasks wait until every
//! output slot is processed and the pipeline's output stream is
//! synchronized, then flush together — one sync point, maximum overlap
//! across the worker pool.
//!
//! # Failure behavior
//!
//! A pipeline execution failure resets the pipeline before the error is
//! re-raised, so the executor stays usable for the next invocation.  Every
//! unwind path either runs or discards queued copy tasks; none are left
//! behind.
//!
//! # Concurrency contract
//!
//! One invocation in flight per executor — `run` and `put_outputs` take
//! `&mut self`, and the staging pool is mutated without internal locking.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use ferry_core::accel::AccelDevice;
use ferry_core::{
    BufferMut, BufferRef, BufferPool, DeviceKind, FerryError, InputDescr, IoRole, OutputDescr,
    OutputInfo, Result,
};

use crate::pipeline::Pipeline;
use crate::scheduler::{CopyScheduler, CopyTask, SchedulerStats};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime configuration for an [`Executor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of dedicated copy worker threads.
    pub copy_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            copy_threads: default_copy_threads(),
        }
    }
}

fn default_copy_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(4)
}

// ─── Statistics ──────────────────────────────────────────────────────────────

/// Per-executor counters for path selection and copy volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Invocations accepted (batch validation passed).
    pub invocations: u64,
    /// Pipeline execution failures that triggered a reset.
    pub pipeline_failures: u64,
    /// Inputs handed to the pipeline without copying.
    pub zero_copy_inputs: u64,
    /// Inputs gathered through a staging buffer.
    pub staged_inputs: u64,
    /// Outputs written directly into caller memory.
    pub zero_copy_outputs: u64,
    /// Outputs scattered from a staging buffer.
    pub staged_outputs: u64,
    /// Copy tasks enqueued (both directions).
    pub copy_tasks: u64,
    /// Bytes across all enqueued copy tasks.
    pub copy_bytes: u64,
}

// ─── Executor ────────────────────────────────────────────────────────────────

/// Buffer-orchestrating executor around one [`Pipeline`] instance.
///
/// Owns the staging pool and copy scheduler; both live as long as the
/// executor so staging capacity amortizes across invocations.
pub struct Executor<P: Pipeline> {
    pipeline: P,
    pool: BufferPool,
    scheduler: CopyScheduler,
    stats: ExecutorStats,
}

impl<P: Pipeline> Executor<P> {
    /// Create an executor around `pipeline`.
    ///
    /// If the pipeline reports an accelerator placement, the device context
    /// is established here and held for the executor's lifetime.
    pub fn new(pipeline: P, config: ExecutorConfig) -> Result<Self> {
        #[cfg(feature = "cuda")]
        let device = match pipeline.device_id() {
            Some(ordinal) => Some(AccelDevice::new(ordinal)?),
            None => None,
        };
        #[cfg(not(feature = "cuda"))]
        let device: Option<std::sync::Arc<AccelDevice>> = None;
        #[cfg(not(feature = "cuda"))]
        if pipeline.device_id().is_some() {
            warn!(
                device = ?pipeline.device_id(),
                "pipeline requests an accelerator but the `cuda` feature is disabled; \
                 accelerator staging will be rejected"
            );
        }

        let scheduler = CopyScheduler::new(config.copy_threads, device.clone())?;
        info!(
            copy_threads = config.copy_threads,
            device = ?pipeline.device_id(),
            "executor ready"
        );
        Ok(Self {
            pipeline,
            pool: BufferPool::new(device),
            scheduler,
            stats: ExecutorStats::default(),
        })
    }

    /// Execute the pipeline over a batch of inputs and return per-output
    /// metadata for sizing destination buffers.
    ///
    /// Fails on malformed batches (inconsistent batch sizes, empty or
    /// undersized descriptors) before any copy or pipeline call, and on
    /// copy-engine or pipeline errors.  All input copies complete strictly
    /// before the pipeline reads them.
    pub fn run(&mut self, inputs: &[InputDescr]) -> Result<Vec<OutputInfo>> {
        validate_batch(inputs)?;
        self.stats.invocations += 1;

        let effective = match self.prepare_inputs(inputs) {
            Ok(descrs) => descrs,
            Err(err) => {
                self.scheduler.clear();
                return Err(err);
            }
        };

        // All input copies must land before the pipeline reads them.
        self.scheduler.run_all()?;

        for descr in &effective {
            self.pipeline.set_input(descr)?;
        }

        if let Err(err) = self.pipeline.run().and_then(|()| self.pipeline.output()) {
            self.stats.pipeline_failures += 1;
            error!(%err, "pipeline execution failed; resetting");
            if let Err(reset_err) = self.pipeline.reset() {
                warn!(%reset_err, "pipeline reset after failure also failed");
            }
            return Err(err);
        }

        let shapes = self.pipeline.output_shapes();
        let mut infos = Vec::with_capacity(shapes.len());
        for (index, shape) in shapes.into_iter().enumerate() {
            infos.push(OutputInfo {
                shape,
                dtype: self.pipeline.output_dtype(index),
                device: self.pipeline.output_device(index),
            });
        }
        Ok(infos)
    }

    /// Materialize the pipeline's outputs into caller-supplied destination
    /// buffers.  Blocks until every copy — direct and staged — is complete.
    pub fn put_outputs(&mut self, outputs: &[OutputDescr]) -> Result<()> {
        let expected = self.pipeline.output_count();
        if outputs.len() != expected {
            return Err(FerryError::InvalidDescriptor(format!(
                "expected {expected} output descriptors, got {}",
                outputs.len()
            )));
        }

        if let Err(err) = self.stage_outputs(outputs) {
            self.scheduler.clear();
            return Err(err);
        }

        // The pipeline's output writes must be visible before the deferred
        // copy-out tasks read the staging buffers.
        if let Err(err) = self.pipeline.sync_output_stream() {
            self.scheduler.clear();
            return Err(err);
        }

        self.scheduler.run_all()
    }

    /// Path-selection and copy-volume counters.
    #[inline]
    pub fn stats(&self) -> ExecutorStats {
        self.stats
    }

    /// Lifetime counters of the copy scheduler.
    #[inline]
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Capacity of a cached staging buffer, if one exists for the key.
    pub fn staging_capacity(
        &self,
        name: &str,
        role: IoRole,
        kind: DeviceKind,
    ) -> Option<usize> {
        self.pool.capacity_of(name, role, kind)
    }

    /// The wrapped pipeline.
    #[inline]
    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// The wrapped pipeline, mutably.
    #[inline]
    pub fn pipeline_mut(&mut self) -> &mut P {
        &mut self.pipeline
    }

    // ── Input path ───────────────────────────────────────────────────

    fn is_zero_copy(&self, input: &InputDescr) -> bool {
        if input.buffers.len() != 1 {
            return false;
        }
        let fragment = &input.buffers[0];
        fragment.device.is_host() || Some(fragment.device_id) == self.pipeline.device_id()
    }

    fn prepare_inputs(&mut self, inputs: &[InputDescr]) -> Result<Vec<InputDescr>> {
        let mut effective = Vec::with_capacity(inputs.len());
        for input in inputs {
            let Some(first) = input.buffers.first() else {
                return Err(FerryError::InvalidDescriptor(format!(
                    "input `{}` has no buffer fragments",
                    input.meta.name
                )));
            };
            let needed = input.meta.num_bytes();

            if self.is_zero_copy(input) {
                if first.len < needed {
                    return Err(FerryError::InvalidDescriptor(format!(
                        "input `{}` needs {needed} bytes but its fragment holds {}",
                        input.meta.name, first.len
                    )));
                }
                debug!(name = %input.meta.name, bytes = needed, "zero-copy input handoff");
                self.stats.zero_copy_inputs += 1;
                effective.push(input.clone());
            } else {
                let total = input.fragment_bytes();
                if total < needed {
                    return Err(FerryError::InvalidDescriptor(format!(
                        "input `{}` needs {needed} bytes but its fragments hold {total}",
                        input.meta.name
                    )));
                }
                effective.push(self.schedule_input_copy(input, total)?);
                self.stats.staged_inputs += 1;
            }
        }
        Ok(effective)
    }

    fn schedule_input_copy(&mut self, input: &InputDescr, total: usize) -> Result<InputDescr> {
        // Stage on the incoming fragments' memory kind: host fragments
        // gather into a host buffer (the pipeline ingests host data
        // directly), device fragments gather on the execution device.
        let kind = input.buffers[0].device;
        let staging = self.pool.get(&input.meta.name, IoRole::Input, kind)?;
        staging.clear();
        staging.reserve(total)?;

        let staging_id = staging.device_id();
        let mut tasks = Vec::with_capacity(input.buffers.len());
        for fragment in &input.buffers {
            let origin = staging.allocate(fragment.len)?;
            // SAFETY: `origin` addresses `fragment.len` bytes inside the
            // staging reservation, exclusive to this fragment's task.
            let dst = unsafe { BufferMut::from_raw_parts(origin, fragment.len, kind, staging_id) };
            tasks.push(CopyTask::new(dst, *fragment)?);
        }
        let descr = staging.descr();
        debug!(
            name = %input.meta.name,
            fragments = input.buffers.len(),
            bytes = total,
            device = ?kind,
            "staging fragmented input"
        );

        for task in tasks {
            self.stats.copy_tasks += 1;
            self.stats.copy_bytes += task.len() as u64;
            self.scheduler.enqueue(task, true);
        }
        Ok(InputDescr::new(input.meta.clone(), vec![descr]))
    }

    // ── Output path ──────────────────────────────────────────────────

    fn stage_outputs(&mut self, outputs: &[OutputDescr]) -> Result<()> {
        for (index, output) in outputs.iter().enumerate() {
            match output.buffers.as_slice() {
                [] => {
                    return Err(FerryError::InvalidDescriptor(format!(
                        "output `{}` has no destination fragments",
                        output.meta.name
                    )));
                }
                [single] => {
                    debug!(
                        name = %output.meta.name,
                        index,
                        bytes = single.len,
                        "direct output write"
                    );
                    self.pipeline.put_output(*single, index)?;
                    self.stats.zero_copy_outputs += 1;
                }
                fragments => {
                    let total: usize = fragments.iter().map(|b| b.len).sum();
                    let kind = self.pipeline.output_device(index);
                    let staging = self.pool.get(&output.meta.name, IoRole::Output, kind)?;
                    staging.clear();
                    staging.reserve(total)?;

                    let staging_id = staging.device_id();
                    let mut tasks = Vec::with_capacity(fragments.len());
                    for fragment in fragments {
                        let origin = staging.allocate(fragment.len)?;
                        // SAFETY: `origin` addresses `fragment.len` bytes
                        // inside the staging reservation; the pipeline
                        // writes them before the deferred flush reads them.
                        let src = unsafe {
                            BufferRef::from_raw_parts(origin, fragment.len, kind, staging_id)
                        };
                        tasks.push(CopyTask::new(*fragment, src)?);
                    }
                    let staged = staging.descr_mut();
                    self.pipeline.put_output(staged, index)?;

                    debug!(
                        name = %output.meta.name,
                        index,
                        fragments = fragments.len(),
                        bytes = total,
                        device = ?kind,
                        "staging fragmented output"
                    );
                    for task in tasks {
                        self.stats.copy_tasks += 1;
                        self.stats.copy_bytes += task.len() as u64;
                        self.scheduler.enqueue(task, false);
                    }
                    self.stats.staged_outputs += 1;
                }
            }
        }
        Ok(())
    }
}

// ─── Batch validation ────────────────────────────────────────────────────────

fn validate_batch(inputs: &[InputDescr]) -> Result<()> {
    let first = inputs.first().ok_or_else(|| {
        FerryError::InvalidDescriptor("invocation carries no inputs".into())
    })?;
    let expected = first.meta.batch_size();
    for input in &inputs[1..] {
        let got = input.meta.batch_size();
        if got != expected {
            return Err(FerryError::BatchMismatch {
                name: input.meta.name.clone(),
                expected,
                got,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{BufferRef, ElementType, TensorMeta, TensorShape};

    fn input(name: &str, samples: usize, payload: &[u8]) -> InputDescr {
        InputDescr::new(
            TensorMeta::new(
                name,
                TensorShape::uniform(samples, &[payload.len() as i64 / samples as i64]),
                ElementType::U8,
            ),
            vec![BufferRef::from_slice(payload)],
        )
    }

    #[test]
    fn batch_validation_accepts_uniform_batches() {
        let a = vec![0u8; 8];
        let b = vec![0u8; 12];
        validate_batch(&[input("a", 4, &a), input("b", 4, &b)]).expect("uniform batch");
    }

    #[test]
    fn batch_validation_rejects_mismatch() {
        let a = vec![0u8; 8];
        let b = vec![0u8; 10];
        let err = validate_batch(&[input("a", 4, &a), input("b", 5, &b)])
            .expect_err("mismatched batch");
        match err {
            FerryError::BatchMismatch {
                name,
                expected,
                got,
            } => {
                assert_eq!(name, "b");
                assert_eq!(expected, 4);
                assert_eq!(got, 5);
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn batch_validation_rejects_empty_invocations() {
        let err = validate_batch(&[]).expect_err("empty invocation");
        assert!(matches!(err, FerryError::InvalidDescriptor(_)));
    }

    #[test]
    fn config_defaults_are_sane_and_round_trip() {
        let config = ExecutorConfig::default();
        assert!(config.copy_threads >= 1);

        let json = serde_json::to_string(&config).expect("serialize");
        let back: ExecutorConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);

        // Partial config falls back to defaults.
        let partial: ExecutorConfig = serde_json::from_str("{}").expect("empty object");
        assert_eq!(partial, ExecutorConfig::default());
    }
}
