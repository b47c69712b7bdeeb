//! Configuration types for TreeFS Core

use serde::{Deserialize, Serialize};

/// Worker thread settings for a [`crate::Bridge`]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub thread_name: String,
    /// Stack size of the worker thread in bytes; platform default when unset
    pub stack_size: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            thread_name: "treefs-bridge".to_string(),
            stack_size: None,
        }
    }
}

/// Main filesystem configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub bridge: BridgeConfig,
}
