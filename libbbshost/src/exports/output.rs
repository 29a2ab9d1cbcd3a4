use super::frame::{FrameDisposition, StackArgs};
use super::return_word;
use crate::bridge::HostBridge;
use crate::error::{BridgeError, BridgeResult};
use crate::printf;
use crate::registers::Registers;

use log::trace;

pub(super) fn clrprf(bridge: &mut HostBridge, _regs: &mut Registers, _args: StackArgs) -> BridgeResult<FrameDisposition> {
	bridge.output.clear();
	Ok(FrameDisposition::Retain)
}

pub(super) fn outprf(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let channel = args.word(&bridge.memory, 0)?;
	let bytes = bridge.output.take(&bridge.memory)?;
	let session = bridge.channel_store.session_mut(channel).ok_or(BridgeError::UnknownChannel(channel))?;
	trace!("OUTPRF {} bytes to channel {}", bytes.len(), channel);
	session.outbound.extend_from_slice(&bytes);
	Ok(FrameDisposition::Retain)
}

pub(super) fn prf(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let format = args.far_ptr(&bridge.memory, 0)?;
	let format = bridge.memory.read_cstring(format, false)?;
	let text = printf::format(&bridge.memory, &format, &mut args.varargs(2))?;
	bridge.output.write(&mut bridge.memory, &text)?;
	Ok(FrameDisposition::Retain)
}

pub(super) fn prfmsg(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let msgnum = args.word(&bridge.memory, 0)?;
	let format = bridge.resources.message(msgnum)?;
	let text = printf::format(&bridge.memory, &format, &mut args.varargs(1))?;
	bridge.output.write(&mut bridge.memory, &text)?;
	Ok(FrameDisposition::Retain)
}

pub(super) fn sprintf(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let destination = args.far_ptr(&bridge.memory, 0)?;
	let format = args.far_ptr(&bridge.memory, 2)?;
	let format = bridge.memory.read_cstring(format, false)?;
	let text = printf::format(&bridge.memory, &format, &mut args.varargs(4))?;
	bridge.memory.write_cstring(destination, &text)?;
	return_word(regs, text.len() as u16);
	Ok(FrameDisposition::Retain)
}
