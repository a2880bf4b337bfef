/*!
 * Core Types
 * Common type aliases used across the crate
 */

/// Processor instance id, assigned sequentially by the registry and
/// stable for the life of the instance.
pub type ProcId = u64;

/// Presentation/decode timestamp, in the unit the caller defines.
/// The bypass processor and the generic settings structs treat `-1`
/// as "unset".
pub type Timestamp = i64;

/// Timestamp value meaning "unset".
pub const TIMESTAMP_UNSET: Timestamp = -1;
