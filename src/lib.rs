/*!
 * MediaProcessors
 *
 * A generic, dynamically-extensible processor (PROC) runtime: a
 * registry and lifecycle manager for pluggable media-transformation
 * units, each running on its own worker thread, coupled through
 * bounded FIFO queues.
 */

pub mod core;
pub mod descriptor;
pub mod fifo;
pub mod frame;
pub mod processor;
pub mod processors;
pub mod registry;
pub mod settings;
pub mod sync;

pub use core::errors::{MpResult, Status};
pub use core::types::{ProcId, Timestamp, TIMESTAMP_UNSET};
pub use descriptor::{Callbacks, FeatureFlags, ProcessOutcome, ProcessorDescriptor, ProcessorState};
pub use fifo::queue::Wait;
pub use fifo::{Fifo, FifoElement, FifoStats, OpenFlags};
pub use frame::{Frame, SampleFormat};
pub use processor::{FifoSizes, IoStats, LatencyStats, ProcessorInstance};
pub use registry::{OptTag, ProcessorRegistry, RegistryConfig};
pub use settings::{Settings, SettingsTree, Value};
