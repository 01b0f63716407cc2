//! Transfer tuning knobs.
//!
//! Every field has a serde default so a partial TOML table still loads.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wisty_transfer::{
    DEFAULT_HARD_LIMIT_BYTES, DEFAULT_READ_CHUNK_BYTES, DEFAULT_SOFT_LIMIT_BYTES, SizePolicy,
};

const MIB: usize = 1024 * 1024;

/// Thresholds and delays used by the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTuning {
    /// Delay before the progress overlay appears.
    #[serde(default = "default_overlay_delay_ms")]
    pub overlay_delay_ms: u64,

    /// Bytes read without any newline before safe mode engages.
    #[serde(default = "default_safe_mode_probe_bytes")]
    pub safe_mode_probe_bytes: u64,

    /// Pending batch size that triggers a flush.
    #[serde(default = "default_batch_bytes")]
    pub batch_bytes: usize,

    /// Flush threshold once safe mode is on.
    #[serde(default = "default_safe_mode_batch_bytes")]
    pub safe_mode_batch_bytes: usize,

    /// An append slower than this yields twice.
    #[serde(default = "default_slow_append_ms")]
    pub slow_append_ms: u64,

    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,

    /// Chars written per save slice.
    #[serde(default = "default_save_slice_chars")]
    pub save_slice_chars: usize,

    #[serde(default = "default_soft_limit_bytes")]
    pub soft_limit_bytes: u64,

    #[serde(default = "default_hard_limit_bytes")]
    pub hard_limit_bytes: u64,

    /// Capacity of the engine's event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_overlay_delay_ms() -> u64 {
    500
}

fn default_safe_mode_probe_bytes() -> u64 {
    8 * MIB as u64
}

fn default_batch_bytes() -> usize {
    MIB
}

fn default_safe_mode_batch_bytes() -> usize {
    256 * 1024
}

fn default_slow_append_ms() -> u64 {
    24
}

fn default_read_chunk_bytes() -> usize {
    DEFAULT_READ_CHUNK_BYTES
}

fn default_save_slice_chars() -> usize {
    256 * 1024
}

fn default_soft_limit_bytes() -> u64 {
    DEFAULT_SOFT_LIMIT_BYTES
}

fn default_hard_limit_bytes() -> u64 {
    DEFAULT_HARD_LIMIT_BYTES
}

fn default_event_capacity() -> usize {
    256
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            overlay_delay_ms: default_overlay_delay_ms(),
            safe_mode_probe_bytes: default_safe_mode_probe_bytes(),
            batch_bytes: default_batch_bytes(),
            safe_mode_batch_bytes: default_safe_mode_batch_bytes(),
            slow_append_ms: default_slow_append_ms(),
            read_chunk_bytes: default_read_chunk_bytes(),
            save_slice_chars: default_save_slice_chars(),
            soft_limit_bytes: default_soft_limit_bytes(),
            hard_limit_bytes: default_hard_limit_bytes(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl TransferTuning {
    pub fn overlay_delay(&self) -> Duration {
        Duration::from_millis(self.overlay_delay_ms)
    }

    pub fn slow_append(&self) -> Duration {
        Duration::from_millis(self.slow_append_ms)
    }

    /// Flush threshold for the current safe-mode state. Never zero.
    pub fn batch_threshold(&self, safe_mode: bool) -> usize {
        let bytes = if safe_mode {
            self.safe_mode_batch_bytes
        } else {
            self.batch_bytes
        };
        bytes.max(1)
    }

    pub fn size_policy(&self) -> SizePolicy {
        SizePolicy::new(self.soft_limit_bytes, self.hard_limit_bytes)
    }
}
