use crate::error::BridgeResult;
use crate::far_ptr::FarPtr;
use crate::memory::GuestMemory;
use crate::printf::ArgumentSource;
use crate::registers::Registers;

// After the host frame is entered: [BP] saved BP, [BP+2] return IP, [BP+4] return CS.
const FIRST_ARGUMENT_OFFSET: u16 = 6;

/// How a routine left the guest stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameDisposition {
	/// The dispatcher still has to pop the host frame and return to the caller.
	Retain,
	/// The routine already restored the caller's frame itself.
	Unwound,
}

pub fn push_word(regs: &mut Registers, memory: &mut GuestMemory, value: u16) -> BridgeResult<()> {
	regs.sp = regs.sp.wrapping_sub(2);
	memory.write_u16(FarPtr::new(regs.ss, regs.sp), value)
}

pub fn pop_word(regs: &mut Registers, memory: &GuestMemory) -> BridgeResult<u16> {
	let value = memory.read_u16(FarPtr::new(regs.ss, regs.sp))?;
	regs.sp = regs.sp.wrapping_add(2);
	Ok(value)
}

/// Runs right after the far call pushed CS and IP: saves BP and points it at the new frame.
pub fn enter_host_frame(regs: &mut Registers, memory: &mut GuestMemory) -> BridgeResult<()> {
	let bp = regs.bp;
	push_word(regs, memory, bp)?;
	regs.bp = regs.sp;
	Ok(())
}

/// The host side of `leave; retf`: drops the frame, then restores BP, IP and CS. Arguments stay
/// on the stack for the caller to remove.
pub fn leave_host_frame(regs: &mut Registers, memory: &GuestMemory) -> BridgeResult<()> {
	regs.sp = regs.bp;
	regs.bp = pop_word(regs, memory)?;
	regs.ip = pop_word(regs, memory)?;
	regs.cs = pop_word(regs, memory)?;
	Ok(())
}

/// `leave; retf argument_bytes`, for runtime helpers that pop their own arguments.
pub fn restore_caller_frame(regs: &mut Registers, memory: &GuestMemory, argument_bytes: u16) -> BridgeResult<()> {
	leave_host_frame(regs, memory)?;
	regs.sp = regs.sp.wrapping_add(argument_bytes);
	Ok(())
}

/// Reads the caller's arguments relative to the host frame. Index `i` is the i-th 16-bit word the
/// caller pushed, counting from the last one pushed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackArgs {
	ss: u16,
	bp: u16,
	ds: u16,
}

impl StackArgs {
	pub fn new(regs: &Registers) -> StackArgs {
		StackArgs { ss: regs.ss, bp: regs.bp, ds: regs.ds }
	}

	fn slot(&self, index: u16) -> FarPtr {
		FarPtr::new(self.ss, self.bp.wrapping_add(FIRST_ARGUMENT_OFFSET).wrapping_add(index * 2))
	}

	pub fn word(&self, memory: &GuestMemory, index: u16) -> BridgeResult<u16> {
		memory.read_u16(self.slot(index))
	}

	pub fn signed(&self, memory: &GuestMemory, index: u16) -> BridgeResult<i16> {
		Ok(self.word(memory, index)? as i16)
	}

	/// Low word at `index`, high word at `index + 1`.
	pub fn long(&self, memory: &GuestMemory, index: u16) -> BridgeResult<u32> {
		let low = self.word(memory, index)? as u32;
		let high = self.word(memory, index + 1)? as u32;
		Ok((high << 16) | low)
	}

	/// Offset at `index`, segment at `index + 1`.
	pub fn far_ptr(&self, memory: &GuestMemory, index: u16) -> BridgeResult<FarPtr> {
		let offset = self.word(memory, index)?;
		let segment = self.word(memory, index + 1)?;
		Ok(FarPtr::new(segment, offset))
	}

	/// A cursor over the variadic arguments that start at `index`.
	pub fn varargs(&self, index: u16) -> VarArgs {
		VarArgs { args: *self, next: index }
	}
}

#[derive(Debug, Clone, Copy)]
pub struct VarArgs {
	args: StackArgs,
	next: u16,
}

impl ArgumentSource for VarArgs {
	fn next_word(&mut self, memory: &GuestMemory) -> BridgeResult<u16> {
		let value = self.args.word(memory, self.next)?;
		self.next += 1;
		Ok(value)
	}

	fn next_long(&mut self, memory: &GuestMemory) -> BridgeResult<u32> {
		let value = self.args.long(memory, self.next)?;
		self.next += 2;
		Ok(value)
	}

	fn next_far_ptr(&mut self, memory: &GuestMemory) -> BridgeResult<FarPtr> {
		let value = self.args.far_ptr(memory, self.next)?;
		self.next += 2;
		Ok(value)
	}

	fn data_segment(&self) -> u16 {
		self.args.ds
	}
}
