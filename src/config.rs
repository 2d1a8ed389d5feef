//! Session configuration.
//!
//! Built once at startup and shared by reference across all connections;
//! nothing here is mutated at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default maximum size in bytes of a single STOMP frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Immutable configuration for STOMP sessions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum size in bytes of a STOMP frame, unless overridden per path.
    pub max_frame_size: usize,
    /// Per-endpoint-path overrides of the maximum frame size.
    pub max_frame_size_by_path: HashMap<String, usize>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_frame_size_by_path: HashMap::new(),
        }
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Override the maximum frame size for a specific endpoint path.
    pub fn with_path_max_frame_size(mut self, path: impl Into<String>, max: usize) -> Self {
        self.max_frame_size_by_path.insert(path.into(), max);
        self
    }

    /// Effective maximum frame size for a session connected on `path`.
    pub fn max_frame_size_for(&self, path: Option<&str>) -> usize {
        path.and_then(|p| self.max_frame_size_by_path.get(p).copied())
            .unwrap_or(self.max_frame_size)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
