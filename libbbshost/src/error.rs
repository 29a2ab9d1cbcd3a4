use crate::far_ptr::FarPtr;

use thiserror::Error;

/// Which fatal tier an error belongs to. Guest-recoverable conditions never become a `BridgeError`:
/// they are reported through the carry flag, an error register or a null pointer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTier {
	/// The guest module or its data files disagree with what this host expects.
	DataDefect,
	/// The bridge itself is incomplete or broken.
	BridgeDefect,
}

#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("access of {len} bytes at {ptr} touches unmapped memory")]
	UnmappedAddress { ptr: FarPtr, len: usize },
	#[error("access of {len} bytes at {ptr} runs past the end of its segment")]
	SegmentOverrun { ptr: FarPtr, len: usize },
	#[error("unported exported function {module} ordinal {ordinal}")]
	UnknownOrdinal { module: &'static str, ordinal: u16 },
	#[error("no exported variable with ordinal {0}")]
	UnknownVariable(u16),
	#[error("far call target {0} is not in the host segment")]
	NotHostTarget(FarPtr),
	#[error("unsupported interrupt 0x{interrupt:02X} (AH=0x{ah:02X}, AL=0x{al:02X})")]
	UnsupportedInterrupt { interrupt: u8, ah: u8, al: u8 },
	#[error("free of {0}, which is not the start of a block")]
	MisalignedFree(FarPtr),
	#[error("host memory exhausted allocating {requested} bytes")]
	HostMemoryExhausted { requested: usize },
	#[error("guest memory exhausted allocating {paragraphs} paragraphs for {purpose}")]
	GuestMemoryExhausted { paragraphs: u16, purpose: &'static str },
	#[error("unsupported database operation {0}")]
	UnsupportedDatabaseOperation(u16),
	#[error("channel {requested} activated while channel {active} is still active")]
	ChannelAlreadyActive { active: u16, requested: u16 },
	#[error("no channel is active")]
	NoActiveChannel,

	#[error("option {msgnum} of {resource} is {value}, outside {floor}..={ceiling}")]
	OptionOutOfBounds { resource: String, msgnum: u16, value: i64, floor: i64, ceiling: i64 },
	#[error("message {msgnum} is missing from {resource}")]
	MissingMessage { resource: String, msgnum: u16 },
	#[error("option {msgnum} of {resource} is not a valid {expected}")]
	MalformedOption { resource: String, msgnum: u16, expected: &'static str },
	#[error("no configuration resource is current")]
	NoCurrentResource,
	#[error("no previous configuration resource to restore")]
	ResourceHistoryEmpty,
	#[error("unknown configuration resource handle {0}")]
	UnknownResourceHandle(FarPtr),
	#[error("unable to open configuration resource {name}: {reason}")]
	ResourceOpen { name: String, reason: String },
	#[error("no database file is current")]
	NoCurrentDatabase,
	#[error("unknown database handle {0}")]
	UnknownDatabaseHandle(FarPtr),
	#[error("unable to open database {name}: {reason}")]
	DatabaseOpen { name: String, reason: String },
	#[error("database {database} has no key {keynum}")]
	UnknownDatabaseKey { database: String, keynum: u16 },
	#[error("no program segment prefix has been established")]
	NoProgramSegmentPrefix,
	#[error("output buffer overflow: {requested} bytes requested, {available} available")]
	OutputOverflow { requested: usize, available: usize },
	#[error("channel {0} is not in the session store")]
	UnknownChannel(u16),
	#[error("division by zero in {0}")]
	DivideByZero(&'static str),
	#[error("guest module aborted: {0}")]
	GuestCatastrophe(String),
	#[error("invalid bridge configuration: {0}")]
	InvalidConfig(String),
	#[error("unable to parse bridge configuration")]
	ConfigParse(#[from] serde_json::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl BridgeError {
	pub fn tier(&self) -> ErrorTier {
		match self {
			BridgeError::UnmappedAddress { .. }
			| BridgeError::SegmentOverrun { .. }
			| BridgeError::UnknownOrdinal { .. }
			| BridgeError::UnknownVariable(_)
			| BridgeError::NotHostTarget(_)
			| BridgeError::UnsupportedInterrupt { .. }
			| BridgeError::MisalignedFree(_)
			| BridgeError::HostMemoryExhausted { .. }
			| BridgeError::GuestMemoryExhausted { .. }
			| BridgeError::UnsupportedDatabaseOperation(_)
			| BridgeError::ChannelAlreadyActive { .. }
			| BridgeError::NoActiveChannel => ErrorTier::BridgeDefect,
			_ => ErrorTier::DataDefect,
		}
	}
}

pub type BridgeResult<T> = Result<T, BridgeError>;
