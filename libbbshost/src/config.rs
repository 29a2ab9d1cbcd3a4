use crate::channel::ACCOUNT_RECORD_BYTES;
use crate::error::{BridgeError, BridgeResult};
use crate::segment_allocator::AllocationStrategy;

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DosVersion {
	pub major: u8,
	pub minor: u8,
}

/// Everything about the bridge an operator can tune. Loaded from JSON; any field left out takes its
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
	pub channel_count: u16,
	pub arena_start_segment: u16,
	pub arena_end_segment: u16,
	pub allocation_strategy: AllocationStrategy,
	pub dos_version: DosVersion,
	/// Reported by INT 21h/47h, without a drive or leading backslash.
	pub current_directory: String,
	/// Written back for a channel whose guest left its status alone.
	pub idle_status: u16,
	/// The status a channel has when fresh input is waiting to be parsed.
	pub input_status: u16,
	pub file_root: PathBuf,
}

impl Default for BridgeConfig {
	fn default() -> BridgeConfig {
		BridgeConfig {
			channel_count: 16,
			arena_start_segment: 0x1000,
			arena_end_segment: 0xa000,
			allocation_strategy: AllocationStrategy::BestFit,
			dos_version: DosVersion { major: 6, minor: 22 },
			current_directory: "BBSV6".to_string(),
			idle_status: 1,
			input_status: 3,
			file_root: PathBuf::from("."),
		}
	}
}

impl BridgeConfig {
	pub fn from_json(text: &str) -> BridgeResult<BridgeConfig> {
		let config: BridgeConfig = serde_json::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn load<P: AsRef<Path>>(path: P) -> BridgeResult<BridgeConfig> {
		let text = std::fs::read_to_string(path)?;
		BridgeConfig::from_json(&text)
	}

	pub fn validate(&self) -> BridgeResult<()> {
		if self.channel_count == 0 {
			return Err(BridgeError::InvalidConfig("channel_count must be at least 1".into()));
		}
		// The account array has to fit in a single segment.
		if self.channel_count as usize * ACCOUNT_RECORD_BYTES > 0xfff0 {
			return Err(BridgeError::InvalidConfig(format!("channel_count {} is too large", self.channel_count)));
		}
		if self.arena_start_segment >= self.arena_end_segment {
			return Err(BridgeError::InvalidConfig(format!(
				"arena 0x{:04x}..0x{:04x} is empty", self.arena_start_segment, self.arena_end_segment
			)));
		}
		if self.arena_end_segment == 0xffff {
			return Err(BridgeError::InvalidConfig("the arena may not reach the host segment".into()));
		}
		if self.current_directory.len() > 63 {
			return Err(BridgeError::InvalidConfig("current_directory is longer than 63 bytes".into()));
		}
		Ok(())
	}
}
