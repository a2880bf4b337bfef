/*!
 * `bypass_processor` / `bypass_processor2`: a processor family that
 * pulls a frame from its input FIFO and pushes it to the output FIFO
 * unchanged in content, but without propagating the input frame's
 * sample format or timing metadata — the emitted frame always reports
 * `SampleFormat::Undefined` and `pts == dts == TIMESTAMP_UNSET`.
 * Registering the same descriptor under two different names
 * (`descriptor("bypass_processor")` and
 * `descriptor("bypass_processor2")`) is how a `proc_name` swap between
 * two distinct registered types gets exercised end to end.
 */

use crate::core::errors::MpResult;
use crate::core::types::TIMESTAMP_UNSET;
use crate::descriptor::{Callbacks, FeatureFlags, ProcessOutcome, ProcessorDescriptor, ProcessorState};
use crate::fifo::Fifo;
use crate::fifo::queue::Wait;
use crate::frame::{Frame, SampleFormat};
use crate::settings::{SettingsTree, Value};
use std::sync::Arc;
use std::time::Duration;

/// The backend's only state: an arbitrary free-form integer exercised
/// by PUT/GET as `setting1`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BypassState {
    setting1: i64,
}

/// How long `process_frame` blocks on the input FIFO per iteration
/// before reporting `try_again`. Long enough to avoid busy-spinning,
/// short enough that `ProcessorInstance::close`/reset don't have to
/// wait long to observe the worker idle.
const INPUT_PULL_TIMEOUT: Duration = Duration::from_millis(200);

struct BypassCallbacks;

impl Callbacks for BypassCallbacks {
    fn open(&self) -> MpResult<ProcessorState> {
        Ok(Box::new(BypassState::default()))
    }

    fn close(&self, _state: ProcessorState) {}

    fn put_settings(&self, state: &mut ProcessorState, text: &str) -> MpResult<()> {
        let tree = crate::settings::parse_flat_or_json(text)?;
        let bypass = state
            .downcast_mut::<BypassState>()
            .expect("bypass descriptor always pairs with BypassState");
        if let Some(v) = tree.get("setting1") {
            bypass.setting1 = v.as_i64().ok_or_else(|| {
                crate::core::errors::Status::InvalidArgument("setting1 must be numeric".into())
            })?;
        }
        Ok(())
    }

    fn get_settings(&self, state: &ProcessorState) -> SettingsTree {
        let bypass = state
            .downcast_ref::<BypassState>()
            .expect("bypass descriptor always pairs with BypassState");
        let mut tree = SettingsTree::empty_object();
        tree.set("setting1", Value::Number(bypass.setting1 as f64));
        tree
    }

    fn process_frame(
        &self,
        _state: &mut ProcessorState,
        input: &Fifo<Frame>,
        output: &Fifo<Frame>,
    ) -> MpResult<ProcessOutcome> {
        use crate::core::errors::Status;

        let mut frame = match input.pull(Wait::Timeout(INPUT_PULL_TIMEOUT)) {
            Ok(frame) => frame,
            Err(Status::TryAgain) | Err(Status::TimedOut) => return Ok(ProcessOutcome::TryAgain),
            Err(Status::EndOfFile) => return Ok(ProcessOutcome::EndOfFile),
            Err(e) => return Err(e),
        };

        frame.set_format(SampleFormat::Undefined);
        frame.set_pts(TIMESTAMP_UNSET);
        frame.set_dts(TIMESTAMP_UNSET);

        output.push(frame)?;
        Ok(ProcessOutcome::Success)
    }
}

/// Builds a fresh `bypass_processor`-family descriptor under `name`.
/// Called twice with different names to populate both
/// `bypass_processor` and `bypass_processor2`, so a `proc_name` swap
/// between two distinct registered types can be exercised end to end.
pub fn descriptor(name: &str) -> ProcessorDescriptor {
    ProcessorDescriptor::new(
        name,
        "transform",
        "video/raw",
        FeatureFlags::ACCEPTS_READS
            | FeatureFlags::ACCEPTS_WRITES
            | FeatureFlags::REPORTS_IO_STATS
            | FeatureFlags::TRACKS_INPUT_PTS
            | FeatureFlags::REPORTS_LATENCY_STATS,
        Arc::new(BypassCallbacks),
    )
}
