use super::frame::{FrameDisposition, StackArgs};
use crate::bridge::HostBridge;
use crate::error::BridgeResult;
use crate::registers::Registers;

pub(super) fn parsin(bridge: &mut HostBridge, _regs: &mut Registers, _args: StackArgs) -> BridgeResult<FrameDisposition> {
	bridge.channels.parse_input(&mut bridge.memory)?;
	Ok(FrameDisposition::Retain)
}

pub(super) fn rstrin(bridge: &mut HostBridge, _regs: &mut Registers, _args: StackArgs) -> BridgeResult<FrameDisposition> {
	bridge.channels.restore_input(&mut bridge.memory)?;
	Ok(FrameDisposition::Retain)
}
