//! Engine error types with stable error codes.
//!
//! These cover misuse of the engine API itself: handing the engine a stale
//! promise or zone handle. Promise *rejections* are not errors in this
//! sense; they are ordinary [`crate::value::Value`]s flowing through handler
//! chains. Nor is settling an already-settled promise: the single-settlement
//! guarantee makes the second settlement a silent no-op.

use serde::{Deserialize, Serialize};

use crate::promise::PromiseHandle;
use crate::zone::ZoneId;

/// Stable code for a stale or foreign promise handle.
pub const SE_INVALID_HANDLE: &str = "SE-1001";
/// Stable code for a stale or foreign zone id.
pub const SE_INVALID_ZONE: &str = "SE-1002";

/// Errors that can arise from the engine API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum EngineError {
    /// The promise handle does not belong to this engine.
    #[error("SE-1001: invalid promise handle {handle}")]
    InvalidHandle {
        /// The offending handle.
        handle: PromiseHandle,
    },
    /// The zone id does not belong to this engine.
    #[error("SE-1002: invalid zone id {zone}")]
    InvalidZone {
        /// The offending zone id.
        zone: ZoneId,
    },
}
