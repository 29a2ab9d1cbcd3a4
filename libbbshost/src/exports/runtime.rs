use super::frame::{restore_caller_frame, FrameDisposition, StackArgs};
use super::{return_far_ptr, return_long, return_word};
use crate::bridge::{AuditEntry, HostBridge};
use crate::error::{BridgeError, BridgeResult};
use crate::printf;
use crate::registers::{Reg, Registers};

use log::{error, info};

// Borland's long arithmetic helpers return with `retf 8`.
const LONG_PAIR_ARGUMENT_BYTES: u16 = 8;

pub(super) fn catastro(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let format = args.far_ptr(&bridge.memory, 0)?;
	let format = bridge.memory.read_cstring(format, false)?;
	let text = printf::format(&bridge.memory, &format, &mut args.varargs(2))?;
	let message = String::from_utf8_lossy(&text).into_owned();
	error!("CATASTRO: {}", message);
	Err(BridgeError::GuestCatastrophe(message))
}

/// Random number in `min..=max`.
pub(super) fn genrdn(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let first = args.word(&bridge.memory, 0)?;
	let second = args.word(&bridge.memory, 1)?;
	let (min, max) = if first <= second { (first, second) } else { (second, first) };
	let span = max as u32 - min as u32 + 1;
	let value = min as u32 + bridge.next_random() % span;
	return_word(regs, value as u16);
	Ok(FrameDisposition::Retain)
}

pub(super) fn sameas(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let first = args.far_ptr(&bridge.memory, 0)?;
	let second = args.far_ptr(&bridge.memory, 2)?;
	let first = bridge.memory.read_cstring(first, false)?;
	let second = bridge.memory.read_cstring(second, false)?;
	return_word(regs, first.eq_ignore_ascii_case(&second) as u16);
	Ok(FrameDisposition::Retain)
}

pub(super) fn shocst(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let summary = args.far_ptr(&bridge.memory, 0)?;
	let detail = args.far_ptr(&bridge.memory, 2)?;
	let summary = String::from_utf8_lossy(&bridge.memory.read_cstring(summary, false)?).into_owned();
	let detail = String::from_utf8_lossy(&bridge.memory.read_cstring(detail, false)?).into_owned();
	info!("Audit trail: {} | {}", summary, detail);
	bridge.audit_trail.push(AuditEntry { summary, detail });
	Ok(FrameDisposition::Retain)
}

/// The seed is ignored. GENRDN draws from the host generator.
pub(super) fn srand(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let _seed = args.word(&bridge.memory, 0)?;
	Ok(FrameDisposition::Retain)
}

/// Copies at most `limit - 1` bytes, then NUL-fills the destination up to `limit`.
pub(super) fn stzcpy(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let destination = args.far_ptr(&bridge.memory, 0)?;
	let source = args.far_ptr(&bridge.memory, 2)?;
	let limit = args.signed(&bridge.memory, 4)?;
	if limit > 0 {
		let limit = limit as usize;
		let mut bytes = Vec::with_capacity(limit);
		for index in 0..limit - 1 {
			let byte = bridge.memory.read_u8(source.offset_by(index as u16))?;
			if byte == 0 {
				break;
			}
			bytes.push(byte);
		}
		bytes.resize(limit, 0);
		bridge.memory.write(destination, &bytes)?;
	}
	return_far_ptr(regs, destination);
	Ok(FrameDisposition::Retain)
}

/// Operands arrive in DX:AX and CX:BX, so there is nothing on the stack to pop.
pub(super) fn lxmul(_bridge: &mut HostBridge, regs: &mut Registers, _args: StackArgs) -> BridgeResult<FrameDisposition> {
	let first = regs.get_reg_pair(Reg::DX, Reg::AX);
	let second = regs.get_reg_pair(Reg::CX, Reg::BX);
	return_long(regs, first.wrapping_mul(second));
	Ok(FrameDisposition::Retain)
}

fn long_operands(bridge: &HostBridge, args: StackArgs) -> BridgeResult<(u32, u32)> {
	Ok((args.long(&bridge.memory, 0)?, args.long(&bridge.memory, 2)?))
}

fn finish_long(bridge: &HostBridge, regs: &mut Registers, value: u32) -> BridgeResult<FrameDisposition> {
	return_long(regs, value);
	restore_caller_frame(regs, &bridge.memory, LONG_PAIR_ARGUMENT_BYTES)?;
	Ok(FrameDisposition::Unwound)
}

pub(super) fn ldiv(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let (dividend, divisor) = long_operands(bridge, args)?;
	if divisor == 0 {
		return Err(BridgeError::DivideByZero("LDIV"));
	}
	finish_long(bridge, regs, (dividend as i32).wrapping_div(divisor as i32) as u32)
}

pub(super) fn lmod(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let (dividend, divisor) = long_operands(bridge, args)?;
	if divisor == 0 {
		return Err(BridgeError::DivideByZero("LMOD"));
	}
	finish_long(bridge, regs, (dividend as i32).wrapping_rem(divisor as i32) as u32)
}

pub(super) fn ludiv(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let (dividend, divisor) = long_operands(bridge, args)?;
	if divisor == 0 {
		return Err(BridgeError::DivideByZero("LUDIV"));
	}
	finish_long(bridge, regs, dividend / divisor)
}

pub(super) fn lumod(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let (dividend, divisor) = long_operands(bridge, args)?;
	if divisor == 0 {
		return Err(BridgeError::DivideByZero("LUMOD"));
	}
	finish_long(bridge, regs, dividend % divisor)
}
