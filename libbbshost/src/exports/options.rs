use super::frame::{FrameDisposition, StackArgs};
use super::{return_far_ptr, return_long, return_word};
use crate::bridge::HostBridge;
use crate::error::BridgeResult;
use crate::registers::Registers;

pub(super) fn opnmsg(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let name = args.far_ptr(&bridge.memory, 0)?;
	let name = String::from_utf8_lossy(&bridge.memory.read_cstring(name, false)?).into_owned();
	let handle = bridge.resources.open(&mut bridge.memory, bridge.config_reader.as_mut(), &name)?;
	return_far_ptr(regs, handle);
	Ok(FrameDisposition::Retain)
}

pub(super) fn setmbk(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let handle = args.far_ptr(&bridge.memory, 0)?;
	let accepted = bridge.resources.set_current(handle);
	return_word(regs, if accepted { 0 } else { 0xffff });
	Ok(FrameDisposition::Retain)
}

pub(super) fn rstmbk(bridge: &mut HostBridge, _regs: &mut Registers, _args: StackArgs) -> BridgeResult<FrameDisposition> {
	bridge.resources.restore()?;
	Ok(FrameDisposition::Retain)
}

pub(super) fn clsmsg(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let handle = args.far_ptr(&bridge.memory, 0)?;
	bridge.resources.close(&mut bridge.memory, handle);
	Ok(FrameDisposition::Retain)
}

pub(super) fn getmsg(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let msgnum = args.word(&bridge.memory, 0)?;
	let text = bridge.resources.string(&mut bridge.memory, msgnum)?;
	return_far_ptr(regs, text);
	Ok(FrameDisposition::Retain)
}

pub(super) fn stgopt(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	getmsg(bridge, regs, args)
}

pub(super) fn numopt(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let msgnum = args.word(&bridge.memory, 0)?;
	let floor = args.signed(&bridge.memory, 1)?;
	let ceiling = args.signed(&bridge.memory, 2)?;
	let value = bridge.resources.numeric(msgnum, floor, ceiling)?;
	return_word(regs, value as u16);
	Ok(FrameDisposition::Retain)
}

pub(super) fn lngopt(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let msgnum = args.word(&bridge.memory, 0)?;
	let floor = args.long(&bridge.memory, 1)? as i32;
	let ceiling = args.long(&bridge.memory, 3)? as i32;
	let value = bridge.resources.long(msgnum, floor, ceiling)?;
	return_long(regs, value as u32);
	Ok(FrameDisposition::Retain)
}

pub(super) fn ynopt(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let msgnum = args.word(&bridge.memory, 0)?;
	let value = bridge.resources.boolean(msgnum)?;
	return_word(regs, value as u16);
	Ok(FrameDisposition::Retain)
}
