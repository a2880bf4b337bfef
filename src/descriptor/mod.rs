/*!
 * Processor interface / PROC_IF
 *
 * `ProcessorDescriptor` is the immutable catalogue entry for one
 * processor family: its name, type tag, media type, feature flags, and
 * callback set. Concrete processor state is a trait object
 * (`Box<dyn Any + Send>`) rather than a struct that begins with the
 * generic processor's fields — inheritance-by-first-field-embedding is
 * replaced by composition: the registry and
 * `processor::ProcessorInstance` hold the opaque state and hand it back
 * to the descriptor's callbacks on every call, never cast it themselves.
 */

use crate::core::errors::MpResult;
use crate::fifo::Fifo;
use crate::frame::Frame;
use crate::settings::SettingsTree;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Per-instance backend state. An opaque box; only the descriptor's own
/// callbacks downcast it (typically via `Any::downcast_mut`).
pub type ProcessorState = Box<dyn Any + Send>;

/// Feature bits a processor family advertises. Modeled as a plain
/// bitset over `u8` rather than pulling in a dedicated flags crate,
/// the same small hand-rolled bitset style as `ipc::types::Permission`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags(u8);

impl FeatureFlags {
    pub const NONE: FeatureFlags = FeatureFlags(0);
    pub const ACCEPTS_READS: FeatureFlags = FeatureFlags(1 << 0);
    pub const ACCEPTS_WRITES: FeatureFlags = FeatureFlags(1 << 1);
    pub const REPORTS_IO_STATS: FeatureFlags = FeatureFlags(1 << 2);
    pub const TRACKS_INPUT_PTS: FeatureFlags = FeatureFlags(1 << 3);
    pub const REPORTS_LATENCY_STATS: FeatureFlags = FeatureFlags(1 << 4);

    pub const fn contains(self, flag: FeatureFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for FeatureFlags {
    type Output = FeatureFlags;
    fn bitor(self, rhs: FeatureFlags) -> FeatureFlags {
        FeatureFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FeatureFlags {
    fn bitor_assign(&mut self, rhs: FeatureFlags) {
        self.0 |= rhs.0;
    }
}

/// Outcome of one `process_frame` invocation: the worker loop's
/// return-code matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// At least one output frame was pushed.
    Success,
    /// No output yet; not an error (e.g. waiting for more input).
    TryAgain,
    /// The input or output FIFO was closed during shutdown.
    EndOfFile,
}

/// The callback set a processor family implements. Default
/// implementations cover the optional FIFO-element adaptors (input-dup,
/// input-release, output-dup) and `opt`, so a minimal processor only
/// needs `open`/`close`/`put_settings`/`get_settings`/`process_frame`.
pub trait Callbacks: Send + Sync {
    /// Allocates fresh backend state. Called once per instance, before
    /// any settings are applied.
    fn open(&self) -> MpResult<ProcessorState>;

    /// Releases backend state. Called once, with the worker already
    /// joined and both FIFOs empty.
    fn close(&self, state: ProcessorState);

    /// Applies a settings string (flat or JSON, see `settings`) to
    /// `state`. Unrecognized fields are ignored; recognized fields with
    /// invalid values fail the whole call without partial commit.
    fn put_settings(&self, state: &mut ProcessorState, text: &str) -> MpResult<()>;

    /// Reads back the backend's current settings as a structured tree.
    fn get_settings(&self, state: &ProcessorState) -> SettingsTree;

    /// One worker-loop iteration: block (with a long timeout) on
    /// `input`, transform, push zero or more results to `output`.
    fn process_frame(
        &self,
        state: &mut ProcessorState,
        input: &Fifo<Frame>,
        output: &Fifo<Frame>,
    ) -> MpResult<ProcessOutcome>;

    /// Backend-specific out-of-band option, keyed by a tag string (see
    /// `registry::OptTag` for the registry-level tags); the optional
    /// per-processor escape hatch.
    fn opt(&self, _state: &mut ProcessorState, tag: &str, _arg: &str) -> MpResult<String> {
        Err(crate::core::errors::Status::NotFound(format!(
            "processor does not support option '{tag}'"
        )))
    }

    /// Called by `processor::ProcessorInstance::send_frame` to adapt a
    /// frame into the processor's native representation before it enters
    /// the input FIFO. Defaults to an exact copy (`Frame::clone`, no
    /// restride) so a generic pass-through processor sees its frames
    /// unchanged; a codec-backed processor would override this to
    /// convert into its backend's native frame type.
    fn input_dup(&self, frame: &Frame) -> Frame {
        frame.clone()
    }

    /// Called by `send_frame` to release the caller-supplied frame once
    /// `input_dup` has produced its adapted replacement. The default
    /// relies on `Frame`'s own `Drop`; override only if the backend
    /// attaches external resources to a frame.
    fn input_release(&self, _frame: Frame) {}

    /// Called by `recv_frame` to adapt a frame pulled from the output
    /// FIFO before it is returned to the caller. Defaults to an exact
    /// copy (`Frame::clone`), for symmetry with `input_dup`; a
    /// codec-backed processor would override this to convert from its
    /// native frame representation back to `Frame`.
    fn output_dup(&self, frame: &Frame) -> Frame {
        frame.clone()
    }
}

/// The immutable catalogue entry for one processor family. Equality is
/// structural across every field, including the callback set, which is
/// compared by pointer identity — the callback pointers are treated as
/// static addresses.
#[derive(Clone)]
pub struct ProcessorDescriptor {
    name: String,
    type_tag: String,
    media_type: String,
    feature_flags: FeatureFlags,
    callbacks: Arc<dyn Callbacks>,
}

impl ProcessorDescriptor {
    pub fn new(
        name: impl Into<String>,
        type_tag: impl Into<String>,
        media_type: impl Into<String>,
        feature_flags: FeatureFlags,
        callbacks: Arc<dyn Callbacks>,
    ) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            media_type: media_type.into(),
            feature_flags,
            callbacks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn feature_flags(&self) -> FeatureFlags {
        self.feature_flags
    }

    pub fn callbacks(&self) -> &Arc<dyn Callbacks> {
        &self.callbacks
    }

    /// Deep-copies the name/type/media-type strings; the callback set
    /// is shared (its "address" is what's duplicated).
    pub fn duplicate(&self) -> ProcessorDescriptor {
        ProcessorDescriptor {
            name: self.name.clone(),
            type_tag: self.type_tag.clone(),
            media_type: self.media_type.clone(),
            feature_flags: self.feature_flags,
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

impl PartialEq for ProcessorDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.type_tag == other.type_tag
            && self.media_type == other.media_type
            && self.feature_flags == other.feature_flags
            && Arc::ptr_eq(&self.callbacks, &other.callbacks)
    }
}

impl Eq for ProcessorDescriptor {}

impl fmt::Debug for ProcessorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorDescriptor")
            .field("name", &self.name)
            .field("type_tag", &self.type_tag)
            .field("media_type", &self.media_type)
            .field("feature_flags", &self.feature_flags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{SettingsTree, Value};

    struct NoopCallbacks;

    impl Callbacks for NoopCallbacks {
        fn open(&self) -> MpResult<ProcessorState> {
            Ok(Box::new(()))
        }
        fn close(&self, _state: ProcessorState) {}
        fn put_settings(&self, _state: &mut ProcessorState, _text: &str) -> MpResult<()> {
            Ok(())
        }
        fn get_settings(&self, _state: &ProcessorState) -> SettingsTree {
            SettingsTree::new(Value::Null)
        }
        fn process_frame(
            &self,
            _state: &mut ProcessorState,
            _input: &Fifo<Frame>,
            _output: &Fifo<Frame>,
        ) -> MpResult<ProcessOutcome> {
            Ok(ProcessOutcome::TryAgain)
        }
    }

    #[test]
    fn duplicate_deep_copies_strings_but_shares_callbacks() {
        let cb: Arc<dyn Callbacks> = Arc::new(NoopCallbacks);
        let original = ProcessorDescriptor::new(
            "bypass_processor",
            "encoder",
            "video/raw",
            FeatureFlags::ACCEPTS_READS | FeatureFlags::ACCEPTS_WRITES,
            cb,
        );
        let dup = original.duplicate();

        assert_eq!(original, dup);
        assert!(Arc::ptr_eq(original.callbacks(), dup.callbacks()));
        assert_ne!(
            original.name().as_ptr(),
            dup.name().as_ptr(),
            "duplicate should own its own string allocation"
        );
    }

    #[test]
    fn equality_is_structural_across_every_field() {
        let cb: Arc<dyn Callbacks> = Arc::new(NoopCallbacks);
        let a = ProcessorDescriptor::new("p", "encoder", "audio/pcm", FeatureFlags::NONE, Arc::clone(&cb));
        let b = ProcessorDescriptor::new("p", "decoder", "audio/pcm", FeatureFlags::NONE, cb);
        assert_ne!(a, b, "differing type_tag must break equality");
    }

    #[test]
    fn feature_flags_union_and_contains() {
        let flags = FeatureFlags::ACCEPTS_READS | FeatureFlags::REPORTS_LATENCY_STATS;
        assert!(flags.contains(FeatureFlags::ACCEPTS_READS));
        assert!(flags.contains(FeatureFlags::REPORTS_LATENCY_STATS));
        assert!(!flags.contains(FeatureFlags::ACCEPTS_WRITES));
    }
}
