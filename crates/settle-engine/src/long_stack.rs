//! Long asynchronous stack traces (debug feature, off by default).
//!
//! Each promise created while the feature is enabled captures a frame via
//! the configured capture hook and back-links to the promise whose handler
//! produced it. The chain is bounded at [`MAX_BACK_LINKS`]; rendering is
//! lazy and walks at most [`MAX_RENDERED_FRAMES`] frames, joined by
//! [`FRAME_SEPARATOR`].
//!
//! The default capture hook is deterministic (creation sequence and zone);
//! embedders with a real stack source install their own.

use crate::engine::PromiseEngine;
use crate::promise::PromiseHandle;
use crate::zone::ZoneId;

/// Maximum number of promise-to-promise back-links kept in a chain.
pub const MAX_BACK_LINKS: u32 = 100;

/// Maximum number of frames assembled into one rendered stack.
pub const MAX_RENDERED_FRAMES: usize = 20;

/// Literal separator between rendered frames.
pub const FRAME_SEPARATOR: &str = "\nFrom previous: ";

/// Captures one frame of context for a newly created promise.
pub type FrameCapture = fn(creation_seq: u64, zone: ZoneId) -> String;

/// Default deterministic frame text.
pub fn default_frame(creation_seq: u64, zone: ZoneId) -> String {
    format!("promise #{creation_seq} created in {zone}")
}

/// Joins captured frames into the rendered stack text.
pub fn join_frames(frames: &[String]) -> String {
    frames.join(FRAME_SEPARATOR)
}

impl PromiseEngine {
    /// Renders the long stack for a promise by walking its back-link chain.
    ///
    /// Returns `None` when the feature is disabled or the handle is stale.
    pub fn long_stack(&self, promise: PromiseHandle) -> Option<String> {
        if !self.config().long_stacks || self.check(promise).is_err() {
            return None;
        }
        let mut frames = Vec::new();
        let mut cursor = Some(promise);
        while let Some(h) = cursor {
            if frames.len() >= MAX_RENDERED_FRAMES {
                break;
            }
            let rec = self.rec(h);
            match &rec.stack_holder {
                Some(frame) => frames.push(frame.clone()),
                None => break,
            }
            cursor = rec.prev;
        }
        if frames.is_empty() {
            None
        } else {
            Some(join_frames(&frames))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_frame_is_deterministic() {
        assert_eq!(default_frame(3, ZoneId(1)), "promise #3 created in zone:1");
        assert_eq!(default_frame(3, ZoneId(1)), default_frame(3, ZoneId(1)));
    }

    #[test]
    fn join_frames_uses_literal_separator() {
        let frames = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(join_frames(&frames), "a\nFrom previous: b\nFrom previous: c");
    }

    #[test]
    fn join_single_frame_has_no_separator() {
        assert_eq!(join_frames(&["only".to_string()]), "only");
    }
}
