pub mod bridge;
pub mod channel;
pub mod clock;
pub mod config;
pub mod config_resource;
pub mod console;
pub mod database;
pub mod dos_error_codes;
pub mod dos_file_system;
pub mod dos_interrupts;
pub mod error;
pub mod exports;
pub mod far_ptr;
pub mod memory;
pub mod output_buffer;
pub mod printf;
pub mod registers;
pub mod segment_allocator;

pub use crate::bridge::{AuditEntry, BridgeCollaborators, HostBridge};
pub use crate::config::BridgeConfig;
pub use crate::error::{BridgeError, BridgeResult, ErrorTier};
pub use crate::far_ptr::FarPtr;
pub use crate::registers::Registers;
