/*!
 * Core Module
 *
 * Fundamental types and error handling shared by every other module:
 * the status enum, id/size type aliases, and the scope-guard used to
 * keep `reset_on_new_settings` exception-safe.
 */

pub mod errors;
pub mod guard;
pub mod types;

pub use errors::{MpResult, Status};
pub use guard::Defer;
pub use types::{ProcId, Timestamp};
