use super::frame::{FrameDisposition, StackArgs};
use super::return_far_ptr;
use crate::bridge::HostBridge;
use crate::error::BridgeResult;
use crate::far_ptr::FarPtr;
use crate::registers::Registers;
use crate::segment_allocator::{FreeOutcome, PARAGRAPH_BYTES};

use log::{debug, warn};

/// Null when the arena has no room left.
fn allocate(bridge: &mut HostBridge, bytes: u16) -> Option<FarPtr> {
	let paragraphs = ((bytes as u32 + PARAGRAPH_BYTES - 1) / PARAGRAPH_BYTES) as u16;
	let block = bridge.memory.allocator_mut().allocate(paragraphs);
	if block.is_none() {
		warn!("Guest allocation of {} bytes failed", bytes);
	}
	block
}

pub(super) fn alcmem(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let bytes = args.word(&bridge.memory, 0)?;
	let block = allocate(bridge, bytes).unwrap_or(FarPtr::NULL);
	return_far_ptr(regs, block);
	Ok(FrameDisposition::Retain)
}

pub(super) fn alczer(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let bytes = args.word(&bridge.memory, 0)?;
	let block = match allocate(bridge, bytes) {
		Some(block) => {
			bridge.memory.fill(block, bytes as usize, 0)?;
			block
		}
		None => FarPtr::NULL,
	};
	return_far_ptr(regs, block);
	Ok(FrameDisposition::Retain)
}

pub(super) fn free(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let block = args.far_ptr(&bridge.memory, 0)?;
	if block.is_null() {
		return Ok(FrameDisposition::Retain);
	}
	if block.is_host() {
		// Host blocks belong to the bridge and are released with whatever owns them.
		warn!("FREE of host block {} ignored", block);
		return Ok(FrameDisposition::Retain);
	}
	if let FreeOutcome::Released { paragraphs } = bridge.memory.allocator_mut().free_pointer(block)? {
		debug!("FREE released {} paragraphs at {}", paragraphs, block);
	}
	Ok(FrameDisposition::Retain)
}
