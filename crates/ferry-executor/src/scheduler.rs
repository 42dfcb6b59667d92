//! Parallel copy scheduler — a fixed-size worker pool for byte-copy tasks.
//!
//! # Scheduling model
//!
//! Tasks are queued with their byte count as a cost hint, annotated as
//! *immediate* (input path — the caller flushes right after enqueuing) or
//! *deferred* (output path — the flush waits until every output slot has
//! been processed and the pipeline's output stream is synchronized).
//! [`CopyScheduler::run_all`] partitions the queue across the workers with a
//! greedy largest-first heuristic that minimizes the maximum per-worker byte
//! total, executes every task, and blocks until all of them complete.
//!
//! # Ordering
//!
//! Tasks queued for one invocation target disjoint memory ranges and carry
//! no order among themselves; the only guarantee is that all of them have
//! completed (including accelerator-side stream work) when `run_all`
//! returns.
//!
//! # Failure
//!
//! A failing task does not stop the others — the full queue is always
//! drained so no task is left in flight — and the first error is returned
//! once every worker has joined.

use std::sync::Mutex;

use tracing::debug;

use ferry_core::accel::AccelDevice;
use ferry_core::{mem_copy, BufferMut, BufferRef, CopyStream, DeviceKind, FerryError, Result};

// ─── Copy task ───────────────────────────────────────────────────────────────

/// One pending copy between two raw endpoints.
///
/// Addresses are stored as `usize` so tasks can cross worker-thread
/// boundaries; the descriptors they were built from carry the validity
/// contract.
#[derive(Clone, Copy, Debug)]
pub struct CopyTask {
    dst_addr: usize,
    dst_kind: DeviceKind,
    src_addr: usize,
    src_kind: DeviceKind,
    len: usize,
}

impl CopyTask {
    /// Build a task copying `src` into `dst`.  The fragments must have equal
    /// lengths.
    pub fn new(dst: BufferMut, src: BufferRef) -> Result<Self> {
        if dst.len != src.len {
            return Err(FerryError::InvalidDescriptor(format!(
                "copy task length mismatch: destination {} bytes, source {} bytes",
                dst.len, src.len
            )));
        }
        Ok(Self {
            dst_addr: dst.data as usize,
            dst_kind: dst.device,
            src_addr: src.data as usize,
            src_kind: src.device,
            len: dst.len,
        })
    }

    /// Task size in bytes — the load-balancing cost hint.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` for empty tasks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn touches_accelerator(&self) -> bool {
        !self.dst_kind.is_host() || !self.src_kind.is_host()
    }

    fn execute(&self) -> Result<()> {
        // SAFETY: the descriptors this task was built from guarantee `len`
        // valid bytes at both endpoints for the duration of the flush, and
        // tasks within one flush target disjoint ranges.
        unsafe {
            mem_copy(
                self.dst_kind,
                self.dst_addr as *mut u8,
                self.src_kind,
                self.src_addr as *const u8,
                self.len,
                CopyStream::DEFAULT,
            )
        }
    }
}

// ─── Scheduler statistics ────────────────────────────────────────────────────

/// Lifetime counters for scheduler activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total `run_all` flushes that executed at least one task.
    pub flushes: u64,
    /// Total tasks executed.
    pub tasks_executed: u64,
    /// Total bytes copied.
    pub bytes_copied: u64,
    /// Tasks discarded by [`CopyScheduler::clear`] during error unwinds.
    pub tasks_discarded: u64,
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Fixed-size worker pool executing queued copy tasks.
pub struct CopyScheduler {
    pool: rayon::ThreadPool,
    workers: usize,
    queue: Vec<CopyTask>,
    device: Option<std::sync::Arc<AccelDevice>>,
    stats: SchedulerStats,
}

impl CopyScheduler {
    /// Build a scheduler with `workers` dedicated copy threads.
    ///
    /// `device` is the accelerator whose default stream carries
    /// device-involving copies; pass `None` for host-only operation.
    pub fn new(workers: usize, device: Option<std::sync::Arc<AccelDevice>>) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ferry-copy-{i}"))
            .build()
            .map_err(|err| FerryError::Copy(format!("failed to build copy worker pool: {err}")))?;
        Ok(Self {
            pool,
            workers,
            queue: Vec::new(),
            device,
            stats: SchedulerStats::default(),
        })
    }

    /// Queue a task.  `immediate` records the caller's intent: input-path
    /// tasks are flushed right away by the caller, output-path tasks wait
    /// for the post-sync flush.  Both kinds drain at the next
    /// [`run_all`](Self::run_all).
    pub fn enqueue(&mut self, task: CopyTask, immediate: bool) {
        debug!(
            len = task.len(),
            immediate,
            queued = self.queue.len() + 1,
            "copy task enqueued"
        );
        self.queue.push(task);
    }

    /// Number of currently queued tasks.
    #[inline]
    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Total bytes across currently queued tasks.
    pub fn queued_bytes(&self) -> usize {
        self.queue.iter().map(|t| t.len()).sum()
    }

    /// Lifetime scheduler counters.
    #[inline]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Discard all queued tasks without running them.
    ///
    /// Used on error unwinds so a failed invocation leaves no stray tasks
    /// behind.
    pub fn clear(&mut self) {
        self.stats.tasks_discarded += self.queue.len() as u64;
        self.queue.clear();
    }

    /// Execute every queued task across the worker pool and block until all
    /// of them (including accelerator-side stream work) have completed, then
    /// clear the queue.
    ///
    /// Returns the first task error, after the full queue has drained.
    pub fn run_all(&mut self) -> Result<()> {
        let tasks = std::mem::take(&mut self.queue);
        if tasks.is_empty() {
            return Ok(());
        }

        let task_count = tasks.len();
        let byte_total: usize = tasks.iter().map(|t| t.len()).sum();
        let needs_accel_sync = tasks.iter().any(|t| t.touches_accelerator());
        let bins = partition(tasks, self.workers);

        debug!(
            tasks = task_count,
            bytes = byte_total,
            bins = bins.len(),
            "flushing copy queue"
        );

        let errors: Mutex<Vec<FerryError>> = Mutex::new(Vec::new());
        let device = self.device.as_deref();
        self.pool.scope(|scope| {
            for bin in &bins {
                let errors = &errors;
                scope.spawn(move |_| {
                    #[cfg(feature = "cuda")]
                    let _guard = match device.filter(|_| bin.iter().any(|t| t.touches_accelerator()))
                    {
                        Some(dev) => match ferry_core::accel::DeviceGuard::new(dev) {
                            Ok(guard) => Some(guard),
                            Err(err) => {
                                errors.lock().unwrap().push(err);
                                return;
                            }
                        },
                        None => None,
                    };
                    #[cfg(not(feature = "cuda"))]
                    let _ = device;

                    for task in bin {
                        if let Err(err) = task.execute() {
                            errors.lock().unwrap().push(err);
                        }
                    }
                });
            }
        });

        // Device-involving copies were only enqueued on the default stream;
        // the flush contract requires them complete before returning.
        if needs_accel_sync {
            if let Some(dev) = &self.device {
                dev.sync_default_stream()?;
            }
        }

        self.stats.flushes += 1;
        self.stats.tasks_executed += task_count as u64;
        self.stats.bytes_copied += byte_total as u64;

        let mut errors = errors.into_inner().unwrap();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.remove(0))
        }
    }
}

// ─── Load balancing ──────────────────────────────────────────────────────────

/// Partition tasks into at most `workers` bins, assigning each task
/// (largest first) to the currently lightest bin.  Greedy, but close enough
/// to optimal for the handful of fragments a real invocation carries.
fn partition(mut tasks: Vec<CopyTask>, workers: usize) -> Vec<Vec<CopyTask>> {
    let bin_count = workers.min(tasks.len()).max(1);
    tasks.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut bins: Vec<Vec<CopyTask>> = vec![Vec::new(); bin_count];
    let mut loads = vec![0usize; bin_count];
    for task in tasks {
        let lightest = loads
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| **load)
            .map(|(i, _)| i)
            .unwrap_or(0);
        loads[lightest] += task.len();
        bins[lightest].push(task);
    }
    bins
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_task(dst: &mut [u8], src: &[u8]) -> CopyTask {
        CopyTask::new(BufferMut::from_slice(dst), BufferRef::from_slice(src)).expect("task")
    }

    #[test]
    fn task_length_mismatch_is_rejected() {
        let src = [0u8; 4];
        let mut dst = [0u8; 8];
        let err = CopyTask::new(BufferMut::from_slice(&mut dst), BufferRef::from_slice(&src))
            .expect_err("length mismatch");
        assert!(matches!(err, FerryError::InvalidDescriptor(_)));
    }

    #[test]
    fn greedy_partition_minimizes_max_load() {
        let src = vec![0u8; 24];
        let mut dst = vec![0u8; 24];
        // Lengths {9, 8, 2, 2, 2, 1} over 2 workers: largest-first greedy
        // packs them as {9, 2, 1} and {8, 2, 2} — both 12 bytes.
        let (dst_a, dst_rest) = dst.split_at_mut(9);
        let (dst_b, dst_rest) = dst_rest.split_at_mut(8);
        let (dst_c, dst_rest) = dst_rest.split_at_mut(2);
        let (dst_d, dst_rest) = dst_rest.split_at_mut(2);
        let (dst_e, dst_f) = dst_rest.split_at_mut(2);
        let tasks = vec![
            host_task(dst_a, &src[..9]),
            host_task(dst_b, &src[..8]),
            host_task(dst_c, &src[..2]),
            host_task(dst_d, &src[..2]),
            host_task(dst_e, &src[..2]),
            host_task(dst_f, &src[..1]),
        ];

        let bins = partition(tasks, 2);
        let mut loads: Vec<usize> = bins
            .iter()
            .map(|bin| bin.iter().map(|t| t.len()).sum())
            .collect();
        loads.sort();
        assert_eq!(loads, vec![12, 12]);
    }

    #[test]
    fn partition_never_exceeds_worker_count() {
        let src = vec![0u8; 4];
        let mut dst = vec![0u8; 4];
        let tasks: Vec<CopyTask> = dst
            .chunks_mut(1)
            .map(|chunk| host_task(chunk, &src[..1]))
            .collect();
        assert_eq!(partition(tasks.clone(), 2).len(), 2);
        assert_eq!(partition(tasks, 16).len(), 4);
    }

    #[test]
    fn run_all_executes_disjoint_tasks_and_clears_queue() {
        let src: Vec<u8> = (0u8..100).collect();
        let mut dst = vec![0u8; 100];

        let mut scheduler = CopyScheduler::new(4, None).expect("scheduler");
        {
            let (lo, hi) = dst.split_at_mut(40);
            scheduler.enqueue(host_task(lo, &src[..40]), true);
            scheduler.enqueue(host_task(hi, &src[40..]), true);
        }
        assert_eq!(scheduler.queued_tasks(), 2);
        assert_eq!(scheduler.queued_bytes(), 100);

        scheduler.run_all().expect("flush");
        assert_eq!(dst, src);
        assert_eq!(scheduler.queued_tasks(), 0);
        assert_eq!(scheduler.stats().tasks_executed, 2);
        assert_eq!(scheduler.stats().bytes_copied, 100);
    }

    #[test]
    fn fragment_order_is_preserved_by_explicit_offsets() {
        // Three fragments {100, 200, 300} landing in one contiguous buffer:
        // whatever order the workers run in, each task writes its own range.
        let frag_a = vec![0xAAu8; 100];
        let frag_b = vec![0xBBu8; 200];
        let frag_c = vec![0xCCu8; 300];
        let mut staged = vec![0u8; 600];

        let mut scheduler = CopyScheduler::new(3, None).expect("scheduler");
        {
            let (a, rest) = staged.split_at_mut(100);
            let (b, c) = rest.split_at_mut(200);
            scheduler.enqueue(host_task(a, &frag_a), true);
            scheduler.enqueue(host_task(b, &frag_b), true);
            scheduler.enqueue(host_task(c, &frag_c), true);
        }
        scheduler.run_all().expect("flush");

        let mut expected = Vec::new();
        expected.extend_from_slice(&frag_a);
        expected.extend_from_slice(&frag_b);
        expected.extend_from_slice(&frag_c);
        assert_eq!(staged, expected);
    }

    #[test]
    fn clear_discards_queued_tasks() {
        let src = [1u8; 8];
        let mut dst = [0u8; 8];
        let mut scheduler = CopyScheduler::new(2, None).expect("scheduler");
        scheduler.enqueue(host_task(&mut dst, &src), false);
        scheduler.clear();

        scheduler.run_all().expect("empty flush");
        assert_eq!(dst, [0u8; 8], "discarded task must not run");
        assert_eq!(scheduler.stats().tasks_discarded, 1);
        assert_eq!(scheduler.stats().flushes, 0);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn failing_task_does_not_stop_the_drain() {
        let src = [5u8; 16];
        let mut dst = [0u8; 16];
        let mut accel_dst = [0u8; 4];

        let mut scheduler = CopyScheduler::new(1, None).expect("scheduler");
        // One impossible accelerator task (no `cuda` feature) plus a valid
        // host task, forced into the same bin by the single worker.
        let bad = CopyTask::new(
            // SAFETY: the stub copy engine rejects the task without
            // dereferencing either pointer.
            unsafe {
                BufferMut::from_raw_parts(accel_dst.as_mut_ptr(), 4, DeviceKind::Accelerator, 0)
            },
            BufferRef::from_slice(&src[..4]),
        )
        .expect("task");
        scheduler.enqueue(bad, true);
        scheduler.enqueue(host_task(&mut dst, &src), true);

        let err = scheduler.run_all().expect_err("accelerator task must fail");
        assert_eq!(err.error_code(), 202);
        assert_eq!(dst, [5u8; 16], "host task must still have run");
        assert_eq!(scheduler.queued_tasks(), 0, "queue drained despite error");
    }
}
