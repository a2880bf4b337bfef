/*!
 * Processor instance / PROC
 *
 * One worker thread, one input and one output `fifo::Fifo<Frame>`, a
 * fair lock on each side, and per-instance latency/IO counters.
 * `reset_on_new_settings` implements a nine-step teardown/reopen
 * protocol as a single operation on the instance — callers never see
 * the individual exit-flag/non-blocking/fair-lock toggles.
 */

use crate::core::errors::{MpResult, Status};
use crate::core::types::{ProcId, TIMESTAMP_UNSET};
use crate::descriptor::{Callbacks, FeatureFlags, ProcessOutcome, ProcessorDescriptor, ProcessorState};
use crate::fifo::{Fifo, OpenFlags};
use crate::frame::Frame;
use crate::settings::{wrap_envelope, SettingsTree};
use crate::sync::fair_lock::FairLock;
use crate::sync::sleep::InterruptibleSleep;

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Slot counts for a newly opened instance's two FIFOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoSizes {
    pub input_slots: usize,
    pub output_slots: usize,
}

impl Default for FifoSizes {
    fn default() -> Self {
        FifoSizes { input_slots: 8, output_slots: 8 }
    }
}

/// Running end-to-end latency accumulator (PTS-in to emit-out).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    count: u64,
    sum_us: u64,
    min_us: u64,
    max_us: u64,
    /// Most recently recorded sample. A bare running aggregate can't
    /// answer "is the pipeline currently healthy" as cheaply as a
    /// last-sample read can.
    last_us: u64,
}

impl LatencyStats {
    fn record(&mut self, us: u64) {
        self.count += 1;
        self.sum_us += us;
        self.min_us = if self.count == 1 { us } else { self.min_us.min(us) };
        self.max_us = self.max_us.max(us);
        self.last_us = us;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_us as f64 / self.count as f64
        }
    }

    pub fn min_us(&self) -> u64 {
        self.min_us
    }

    pub fn max_us(&self) -> u64 {
        self.max_us
    }

    pub fn last_us(&self) -> u64 {
        self.last_us
    }
}

/// Byte/frame throughput counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub frames_out: u64,
}

struct WorkerState {
    descriptor: Arc<ProcessorDescriptor>,
    state: Arc<Mutex<Option<ProcessorState>>>,
    input: Arc<Fifo<Frame>>,
    output: Arc<Fifo<Frame>>,
    exit_flag: Arc<AtomicBool>,
}

fn worker_loop(w: WorkerState) {
    let backoff = InterruptibleSleep::new();
    while !w.exit_flag.load(Ordering::Acquire) {
        let outcome = {
            let mut guard = w.state.lock();
            match guard.as_mut() {
                Some(state) => w.descriptor.callbacks().process_frame(state, &w.input, &w.output),
                None => break,
            }
        };
        match outcome {
            Ok(ProcessOutcome::Success) => {}
            Ok(ProcessOutcome::TryAgain) => {
                // Open question resolution: a bounded 1ms backoff rather
                // than an immediate re-loop, to avoid spinning a core
                // while the input FIFO is merely empty.
                backoff.sleep(Duration::from_millis(1));
            }
            Ok(ProcessOutcome::EndOfFile) => break,
            Err(e) => warn!("process_frame error on processor '{}': {e}", w.descriptor.name()),
        }
    }
    debug!("worker loop exiting for processor '{}'", w.descriptor.name());
}

/// One running processor: a descriptor reference, an id unique within
/// the owning registry, input/output FIFOs with independent fair locks,
/// a worker thread, and the latency/IO counters.
pub struct ProcessorInstance {
    id: ProcId,
    descriptor: Arc<ProcessorDescriptor>,
    input: Arc<Fifo<Frame>>,
    output: Arc<Fifo<Frame>>,
    input_lock: FairLock<()>,
    output_lock: FairLock<()>,
    exit_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<Mutex<Option<ProcessorState>>>,
    latency: Mutex<LatencyStats>,
    io_stats: Mutex<IoStats>,
    pending_pts: Mutex<HashMap<i64, Instant>>,
    /// Set when `reset_on_new_settings` fails to re-open the backend;
    /// subsequent `send_frame`/`recv_frame` then return `EndOfFile`
    /// rather than touching a half-initialized instance.
    poisoned: AtomicBool,
    closed: AtomicBool,
}

impl ProcessorInstance {
    /// Opens a new instance: allocates backend state via the
    /// descriptor's `open` callback, initializes both FIFOs and fair
    /// locks, applies `initial_settings`, and launches the worker
    /// thread.
    pub fn open(
        id: ProcId,
        descriptor: Arc<ProcessorDescriptor>,
        initial_settings: &str,
        fifo_sizes: FifoSizes,
    ) -> MpResult<ProcessorInstance> {
        let mut backend_state = descriptor.callbacks().open()?;
        if !initial_settings.trim().is_empty() {
            if let Err(e) = descriptor.callbacks().put_settings(&mut backend_state, initial_settings) {
                descriptor.callbacks().close(backend_state);
                return Err(e);
            }
        }

        let input = Arc::new(Fifo::open(fifo_sizes.input_slots, OpenFlags::default()));
        let output = Arc::new(Fifo::open(fifo_sizes.output_slots, OpenFlags::default()));
        let state = Arc::new(Mutex::new(Some(backend_state)));
        let exit_flag = Arc::new(AtomicBool::new(false));

        let instance = ProcessorInstance {
            id,
            descriptor: Arc::clone(&descriptor),
            input: Arc::clone(&input),
            output: Arc::clone(&output),
            input_lock: FairLock::new(()),
            output_lock: FairLock::new(()),
            exit_flag: Arc::clone(&exit_flag),
            worker: Mutex::new(None),
            state: Arc::clone(&state),
            latency: Mutex::new(LatencyStats::default()),
            io_stats: Mutex::new(IoStats::default()),
            pending_pts: Mutex::new(HashMap::new()),
            poisoned: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        instance.spawn_worker(descriptor, state, input, output, exit_flag)?;
        info!("opened processor instance {id} ('{}')", instance.descriptor.name());
        Ok(instance)
    }

    fn spawn_worker(
        &self,
        descriptor: Arc<ProcessorDescriptor>,
        state: Arc<Mutex<Option<ProcessorState>>>,
        input: Arc<Fifo<Frame>>,
        output: Arc<Fifo<Frame>>,
        exit_flag: Arc<AtomicBool>,
    ) -> MpResult<()> {
        let handle = std::thread::Builder::new()
            .name(format!("proc-{}-{}", descriptor.name(), self.id))
            .spawn(move || {
                worker_loop(WorkerState { descriptor, state, input, output, exit_flag });
            })
            .map_err(|e| Status::Error(format!("failed to spawn worker thread: {e}")))?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    pub fn id(&self) -> ProcId {
        self.id
    }

    pub fn descriptor(&self) -> &Arc<ProcessorDescriptor> {
        &self.descriptor
    }

    pub fn io_stats(&self) -> IoStats {
        *self.io_stats.lock()
    }

    pub fn latency_stats(&self) -> LatencyStats {
        *self.latency.lock()
    }

    fn track_latency_enabled(&self) -> bool {
        self.descriptor.feature_flags().contains(FeatureFlags::REPORTS_LATENCY_STATS)
            && self.descriptor.feature_flags().contains(FeatureFlags::TRACKS_INPUT_PTS)
    }

    /// Adapts `frame` via the descriptor's input-side converter
    /// (`Callbacks::input_dup`), releases the original via
    /// `Callbacks::input_release`, then pushes the adapted frame into
    /// the input FIFO under the input-side fair lock, updates input
    /// counters, and starts a latency timer keyed by the frame's PTS
    /// when latency tracking is enabled.
    pub fn send_frame(&self, frame: Frame) -> MpResult<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Status::EndOfFile);
        }
        if !self.descriptor.feature_flags().contains(FeatureFlags::ACCEPTS_WRITES) {
            return Err(Status::InvalidArgument("processor does not accept writes".into()));
        }

        let _guard = self.input_lock.acquire();
        let callbacks = self.descriptor.callbacks();
        let adapted = callbacks.input_dup(&frame);
        callbacks.input_release(frame);

        let size = crate::fifo::FifoElement::byte_size(&adapted);
        let pts = adapted.pts();

        if self.track_latency_enabled() && pts != TIMESTAMP_UNSET {
            self.pending_pts.lock().insert(pts, Instant::now());
        }

        self.input.push(adapted)?;

        if self.descriptor.feature_flags().contains(FeatureFlags::REPORTS_IO_STATS) {
            let mut stats = self.io_stats.lock();
            stats.bytes_in += size as u64;
            stats.frames_in += 1;
        }
        Ok(())
    }

    /// Pulls from the output FIFO under the output-side fair lock,
    /// adapts the result via the descriptor's output-side converter
    /// (`Callbacks::output_dup`) before returning it to the caller,
    /// updates output counters, and folds an end-to-end latency sample
    /// into the running accumulator when the pulled frame's PTS has a
    /// matching pending timer.
    pub fn recv_frame(&self, wait: crate::fifo::queue::Wait) -> MpResult<Frame> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Status::EndOfFile);
        }
        if !self.descriptor.feature_flags().contains(FeatureFlags::ACCEPTS_READS) {
            return Err(Status::InvalidArgument("processor does not accept reads".into()));
        }

        let _guard = self.output_lock.acquire();
        let frame = self.output.pull(wait)?;

        if self.track_latency_enabled() {
            if let Some(started) = self.pending_pts.lock().remove(&frame.pts()) {
                let us = started.elapsed().as_micros() as u64;
                self.latency.lock().record(us);
            }
        }

        let adapted = self.descriptor.callbacks().output_dup(&frame);

        if self.descriptor.feature_flags().contains(FeatureFlags::REPORTS_IO_STATS) {
            let mut stats = self.io_stats.lock();
            stats.bytes_out += crate::fifo::FifoElement::byte_size(&adapted) as u64;
            stats.frames_out += 1;
        }

        Ok(adapted)
    }

    /// Delegates to the descriptor's `put_settings`, then runs the
    /// nine-step reset-on-new-settings protocol.
    pub fn put_settings(&self, text: &str) -> MpResult<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Status::EndOfFile);
        }
        {
            let mut guard = self.state.lock();
            let state = guard.as_mut().ok_or(Status::EndOfFile)?;
            self.descriptor.callbacks().put_settings(state, text)?;
        }
        self.reset_on_new_settings()
    }

    /// Reads back the backend's settings, wrapped in the registry's
    /// GET envelope (`settings::wrap_envelope`).
    pub fn get_settings(&self) -> MpResult<SettingsTree> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Status::EndOfFile);
        }
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or(Status::EndOfFile)?;
        Ok(wrap_envelope(self.descriptor.callbacks().get_settings(state)))
    }

    /// Snapshot used by `registry::id_put`'s `proc_name` swap to carry
    /// settings across a full descriptor change.
    pub fn snapshot_settings(&self) -> MpResult<SettingsTree> {
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or(Status::EndOfFile)?;
        Ok(self.descriptor.callbacks().get_settings(state))
    }

    /// The nine-step reopen protocol: stop the worker, drain both
    /// FIFOs, let the backend re-allocate its state from a snapshot of
    /// its (already-updated) settings, then restart.
    fn reset_on_new_settings(&self) -> MpResult<()> {
        // 1. Set exit_flag.
        self.exit_flag.store(true, Ordering::Release);
        // 2. Non-blocking FIFOs so the worker's blocking wait unwinds.
        self.input.set_blocking(false);
        self.output.set_blocking(false);
        // Armed now so step 7 (back to blocking) fires on every exit
        // path from here on, including the early return via `?` below,
        // not just the happy path.
        let restore_blocking = crate::core::guard::Defer::new(|| {
            self.input.set_blocking(true);
            self.output.set_blocking(true);
        });
        // 3. Acquire both fair locks to exclude concurrent producers/consumers.
        let _input_guard = self.input_lock.acquire();
        let _output_guard = self.output_lock.acquire();
        // 4. Join the worker.
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        // 5. Empty both FIFOs, discarding in-flight data.
        self.input.empty();
        self.output.empty();

        // 6. deinit/re-init: snapshot current settings, close the old
        // backend state, open a fresh one, and replay the snapshot so
        // an already-applied field survives the re-allocation.
        let reopened = {
            let mut guard = self.state.lock();
            let old_state = guard.take().ok_or(Status::EndOfFile)?;
            let snapshot = self.descriptor.callbacks().get_settings(&old_state);
            self.descriptor.callbacks().close(old_state);

            match self.descriptor.callbacks().open() {
                Ok(mut fresh) => {
                    let replay = crate::settings::to_json_text(&snapshot);
                    if !replay.is_empty() && replay != "null" {
                        if let Err(e) = self.descriptor.callbacks().put_settings(&mut fresh, &replay) {
                            warn!(
                                "processor {} failed to replay settings after reset: {e}",
                                self.id
                            );
                        }
                    }
                    *guard = Some(fresh);
                    true
                }
                Err(e) => {
                    warn!("processor {} failed to reopen backend after reset: {e}", self.id);
                    *guard = None;
                    false
                }
            }
        };

        if !reopened {
            self.poisoned.store(true, Ordering::Release);
            self.input.close();
            self.output.close();
            return Err(Status::Error("reset_on_new_settings failed to re-init backend".into()));
        }

        // 7. Back to blocking, via the guard armed above.
        drop(restore_blocking);
        // 8. Clear exit_flag and restart the worker.
        self.exit_flag.store(false, Ordering::Release);
        self.spawn_worker(
            Arc::clone(&self.descriptor),
            Arc::clone(&self.state),
            Arc::clone(&self.input),
            Arc::clone(&self.output),
            Arc::clone(&self.exit_flag),
        )?;
        // 9. Fair locks released on drop of `_input_guard`/`_output_guard`.
        Ok(())
    }

    /// Stops the worker, drains both FIFOs, and releases the backend
    /// state. Idempotent: a second call is a no-op.
    pub fn close(&self) -> MpResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.exit_flag.store(true, Ordering::Release);
        self.input.set_blocking(false);
        self.output.set_blocking(false);

        let _input_guard = self.input_lock.acquire();
        let _output_guard = self.output_lock.acquire();

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.input.empty();
        self.output.empty();
        self.input.close();
        self.output.close();

        if let Some(state) = self.state.lock().take() {
            self.descriptor.callbacks().close(state);
        }
        info!("closed processor instance {} ('{}')", self.id, self.descriptor.name());
        Ok(())
    }
}

impl Drop for ProcessorInstance {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Callbacks, FeatureFlags, ProcessOutcome, ProcessorDescriptor, ProcessorState};
    use crate::fifo::queue::Wait;
    use crate::frame::{Frame, PlaneInput, SampleFormat};
    use crate::settings::{SettingsTree, Value};
    use std::time::Duration;

    #[derive(Default)]
    struct BypassState {
        setting1: i64,
    }

    struct BypassCallbacks;

    impl Callbacks for BypassCallbacks {
        fn open(&self) -> MpResult<ProcessorState> {
            Ok(Box::new(BypassState::default()))
        }

        fn close(&self, _state: ProcessorState) {}

        fn put_settings(&self, state: &mut ProcessorState, text: &str) -> MpResult<()> {
            let tree = crate::settings::parse_flat_or_json(text)?;
            let s = state.downcast_mut::<BypassState>().unwrap();
            if let Some(v) = tree.get("setting1") {
                s.setting1 = v.as_i64().ok_or_else(|| Status::InvalidArgument("setting1 must be numeric".into()))?;
            }
            Ok(())
        }

        fn get_settings(&self, state: &ProcessorState) -> SettingsTree {
            let s = state.downcast_ref::<BypassState>().unwrap();
            let mut tree = SettingsTree::empty_object();
            tree.set("setting1", Value::Number(s.setting1 as f64));
            tree
        }

        fn process_frame(
            &self,
            _state: &mut ProcessorState,
            input: &Fifo<Frame>,
            output: &Fifo<Frame>,
        ) -> MpResult<ProcessOutcome> {
            match input.pull(Wait::Timeout(Duration::from_millis(50))) {
                Ok(frame) => {
                    output.push(frame)?;
                    Ok(ProcessOutcome::Success)
                }
                Err(Status::TryAgain) | Err(Status::TimedOut) => Ok(ProcessOutcome::TryAgain),
                Err(Status::EndOfFile) => Ok(ProcessOutcome::EndOfFile),
                Err(e) => Err(e),
            }
        }
    }

    fn bypass_descriptor() -> Arc<ProcessorDescriptor> {
        Arc::new(ProcessorDescriptor::new(
            "bypass_processor",
            "transform",
            "video/raw",
            FeatureFlags::ACCEPTS_READS
                | FeatureFlags::ACCEPTS_WRITES
                | FeatureFlags::REPORTS_IO_STATS
                | FeatureFlags::TRACKS_INPUT_PTS
                | FeatureFlags::REPORTS_LATENCY_STATS,
            Arc::new(BypassCallbacks),
        ))
    }

    fn one_plane_frame(pts: i64) -> Frame {
        let rows = vec![1u8, 2, 3, 4];
        Frame::new(SampleFormat::Undefined, 0, pts, pts, 0, &[PlaneInput {
            width: 4,
            height: 1,
            stride: 4,
            rows: &rows,
        }])
        .unwrap()
    }

    #[test]
    fn send_then_recv_round_trips_a_frame() {
        let instance = ProcessorInstance::open(0, bypass_descriptor(), "", FifoSizes::default()).unwrap();
        instance.send_frame(one_plane_frame(10)).unwrap();
        let out = instance.recv_frame(Wait::Timeout(Duration::from_secs(2))).unwrap();
        assert_eq!(out.plane_bytes(0).unwrap(), &[1, 2, 3, 4]);
        instance.close().unwrap();
    }

    #[test]
    fn io_stats_increment_on_send_and_recv() {
        let instance = ProcessorInstance::open(1, bypass_descriptor(), "", FifoSizes::default()).unwrap();
        instance.send_frame(one_plane_frame(1)).unwrap();
        let _ = instance.recv_frame(Wait::Timeout(Duration::from_secs(2))).unwrap();
        let stats = instance.io_stats();
        assert_eq!(stats.frames_in, 1);
        assert_eq!(stats.frames_out, 1);
        assert_eq!(stats.bytes_in, 4);
        assert_eq!(stats.bytes_out, 4);
        instance.close().unwrap();
    }

    fn setting1_of(envelope: &SettingsTree) -> i64 {
        match envelope.get("settings").unwrap() {
            Value::Object(map) => map.get("setting1").unwrap().as_i64().unwrap(),
            other => panic!("expected settings object, got {other:?}"),
        }
    }

    #[test]
    fn put_settings_then_get_settings_reflects_new_value() {
        let instance = ProcessorInstance::open(2, bypass_descriptor(), "setting1=100", FifoSizes::default()).unwrap();
        assert_eq!(setting1_of(&instance.get_settings().unwrap()), 100);
        instance.put_settings("setting1=200").unwrap();
        assert_eq!(setting1_of(&instance.get_settings().unwrap()), 200);
        instance.close().unwrap();
    }

    #[test]
    fn close_is_idempotent_and_joins_the_worker() {
        let instance = ProcessorInstance::open(3, bypass_descriptor(), "", FifoSizes::default()).unwrap();
        instance.close().unwrap();
        instance.close().unwrap();
    }

    #[test]
    fn send_frame_after_close_returns_end_of_file() {
        let instance = ProcessorInstance::open(4, bypass_descriptor(), "", FifoSizes::default()).unwrap();
        instance.close().unwrap();
        let err = instance.send_frame(one_plane_frame(1)).unwrap_err();
        assert!(matches!(err, Status::EndOfFile));
    }

    /// A processor whose `input_dup`/`output_dup` overrides zero out the
    /// first plane byte, standing in for a codec's "convert to/from
    /// native representation" step.
    struct MarkingCallbacks;

    impl Callbacks for MarkingCallbacks {
        fn open(&self) -> MpResult<ProcessorState> {
            Ok(Box::new(BypassState::default()))
        }
        fn close(&self, _state: ProcessorState) {}
        fn put_settings(&self, _state: &mut ProcessorState, _text: &str) -> MpResult<()> {
            Ok(())
        }
        fn get_settings(&self, _state: &ProcessorState) -> SettingsTree {
            SettingsTree::empty_object()
        }
        fn process_frame(
            &self,
            _state: &mut ProcessorState,
            input: &Fifo<Frame>,
            output: &Fifo<Frame>,
        ) -> MpResult<ProcessOutcome> {
            match input.pull(Wait::Timeout(Duration::from_millis(50))) {
                Ok(frame) => {
                    output.push(frame)?;
                    Ok(ProcessOutcome::Success)
                }
                Err(Status::TryAgain) | Err(Status::TimedOut) => Ok(ProcessOutcome::TryAgain),
                Err(Status::EndOfFile) => Ok(ProcessOutcome::EndOfFile),
                Err(e) => Err(e),
            }
        }
        fn input_dup(&self, frame: &Frame) -> Frame {
            marked_copy(frame, 0xAA)
        }
        fn output_dup(&self, frame: &Frame) -> Frame {
            marked_copy(frame, 0xBB)
        }
    }

    /// Clones `frame` but overwrites plane 0's first byte, standing in
    /// for a codec converting into/out of its native representation.
    fn marked_copy(frame: &Frame, mark: u8) -> Frame {
        let layout = frame.plane_layout(0).unwrap();
        let mut rows = frame.plane_bytes(0).unwrap().to_vec();
        rows[0] = mark;
        Frame::new(SampleFormat::Undefined, 0, frame.pts(), frame.dts(), frame.stream_id(), &[PlaneInput {
            width: layout.width,
            height: layout.height,
            stride: layout.stride,
            rows: &rows,
        }])
        .unwrap()
    }

    fn marking_descriptor() -> Arc<ProcessorDescriptor> {
        Arc::new(ProcessorDescriptor::new(
            "marking_processor",
            "transform",
            "video/raw",
            FeatureFlags::ACCEPTS_READS | FeatureFlags::ACCEPTS_WRITES,
            Arc::new(MarkingCallbacks),
        ))
    }

    #[test]
    fn send_frame_applies_input_dup_and_recv_frame_applies_output_dup() {
        let instance = ProcessorInstance::open(5, marking_descriptor(), "", FifoSizes::default()).unwrap();
        instance.send_frame(one_plane_frame(1)).unwrap();
        let out = instance.recv_frame(Wait::Timeout(Duration::from_secs(2))).unwrap();
        // `input_dup` stamped 0xAA before the frame entered the input FIFO,
        // then `output_dup` overwrote it with 0xBB on the way out — so only
        // the output-side converter's mark should survive.
        assert_eq!(out.plane_bytes(0).unwrap()[0], 0xBB);
        instance.close().unwrap();
    }
}
