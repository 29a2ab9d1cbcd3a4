use crate::far_ptr::FarPtr;

const FLAG_CARRY: u16 = 0x0001;
const FLAG_ZERO: u16 = 0x0040;
// Bit 1 of FLAGS always reads as set on the 8086.
const FLAG_RESERVED: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reg {
	AX,
	BX,
	CX,
	DX,
	SI,
	DI,
	BP,
	SP,
	IP,
	CS,
	DS,
	ES,
	SS,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegHalf {
	High,
	Low,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Flag {
	Carry,
	Zero,
}

impl Flag {
	fn mask(self) -> u16 {
		match self {
			Flag::Carry => FLAG_CARRY,
			Flag::Zero => FLAG_ZERO,
		}
	}
}

/// The register file shared between the instruction executor and the host bridge. The executor
/// owns it; the interrupt and ordinal dispatchers read their inputs from it and write their results
/// back into it before control returns to the instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Registers {
	pub ax: u16,
	pub bx: u16,
	pub cx: u16,
	pub dx: u16,
	pub si: u16,
	pub di: u16,
	pub bp: u16,
	pub sp: u16,
	pub ip: u16,
	pub cs: u16,
	pub ds: u16,
	pub es: u16,
	pub ss: u16,
	pub flags: u16,
	/// Set when the guest asked to terminate. The executor must stop stepping once it sees this.
	pub halted: bool,
}

impl Default for Registers {
	fn default() -> Registers {
		Registers {
			ax: 0, bx: 0, cx: 0, dx: 0,
			si: 0, di: 0, bp: 0, sp: 0,
			ip: 0, cs: 0, ds: 0, es: 0, ss: 0,
			flags: FLAG_RESERVED,
			halted: false,
		}
	}
}

impl Registers {
	pub fn new() -> Registers {
		Registers::default()
	}

	pub fn get_reg_u16(&self, reg: Reg) -> u16 {
		match reg {
			Reg::AX => self.ax,
			Reg::BX => self.bx,
			Reg::CX => self.cx,
			Reg::DX => self.dx,
			Reg::SI => self.si,
			Reg::DI => self.di,
			Reg::BP => self.bp,
			Reg::SP => self.sp,
			Reg::IP => self.ip,
			Reg::CS => self.cs,
			Reg::DS => self.ds,
			Reg::ES => self.es,
			Reg::SS => self.ss,
		}
	}

	pub fn set_reg_u16(&mut self, reg: Reg, value: u16) {
		let slot = match reg {
			Reg::AX => &mut self.ax,
			Reg::BX => &mut self.bx,
			Reg::CX => &mut self.cx,
			Reg::DX => &mut self.dx,
			Reg::SI => &mut self.si,
			Reg::DI => &mut self.di,
			Reg::BP => &mut self.bp,
			Reg::SP => &mut self.sp,
			Reg::IP => &mut self.ip,
			Reg::CS => &mut self.cs,
			Reg::DS => &mut self.ds,
			Reg::ES => &mut self.es,
			Reg::SS => &mut self.ss,
		};
		*slot = value;
	}

	/// Only AX, BX, CX and DX have addressable halves; any other register is a bridge bug.
	pub fn get_reg_u8(&self, reg: Reg, half: RegHalf) -> u8 {
		debug_assert!(matches!(reg, Reg::AX | Reg::BX | Reg::CX | Reg::DX), "{:?} has no 8-bit halves", reg);
		let value = self.get_reg_u16(reg);
		match half {
			RegHalf::High => (value >> 8) as u8,
			RegHalf::Low => (value & 0xff) as u8,
		}
	}

	pub fn set_reg_u8(&mut self, reg: Reg, half: RegHalf, value: u8) {
		debug_assert!(matches!(reg, Reg::AX | Reg::BX | Reg::CX | Reg::DX), "{:?} has no 8-bit halves", reg);
		let current = self.get_reg_u16(reg);
		let updated = match half {
			RegHalf::High => (current & 0x00ff) | ((value as u16) << 8),
			RegHalf::Low => (current & 0xff00) | value as u16,
		};
		self.set_reg_u16(reg, updated);
	}

	pub fn get_flag(&self, flag: Flag) -> bool {
		self.flags & flag.mask() != 0
	}

	pub fn set_flag(&mut self, flag: Flag, value: bool) {
		if value {
			self.flags |= flag.mask();
		} else {
			self.flags &= !flag.mask();
		}
	}

	/// Reads a segment:offset register pair, e.g. DS:DX.
	pub fn get_seg_ptr(&self, segment: Reg, offset: Reg) -> FarPtr {
		FarPtr::new(self.get_reg_u16(segment), self.get_reg_u16(offset))
	}

	pub fn set_seg_ptr(&mut self, segment: Reg, offset: Reg, ptr: FarPtr) {
		self.set_reg_u16(segment, ptr.segment);
		self.set_reg_u16(offset, ptr.offset);
	}

	/// Splits a 32-bit value across two registers, e.g. DX:AX.
	pub fn set_reg_pair(&mut self, high: Reg, low: Reg, value: u32) {
		self.set_reg_u16(high, (value >> 16) as u16);
		self.set_reg_u16(low, (value & 0xffff) as u16);
	}

	pub fn get_reg_pair(&self, high: Reg, low: Reg) -> u32 {
		((self.get_reg_u16(high) as u32) << 16) | self.get_reg_u16(low) as u32
	}
}
