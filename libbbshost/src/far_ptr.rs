use byteorder::{ByteOrder, LittleEndian};

use std::fmt;

/// Segment value reserved for host-owned memory. Ordinal placeholders, host-allocated buffers and the
/// default DTA all live behind it, in a store that no guest segment can alias.
pub const HOST_SEGMENT: u16 = 0xffff;

/// Size of a far pointer when stored in guest memory: offset word then segment word.
pub const FAR_PTR_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FarPtr {
	pub segment: u16,
	pub offset: u16,
}

/// Where a far pointer actually lands. The encoded form keeps the raw 0xffff segment so guest code
/// comparing segment values still sees what it expects; inside the bridge the two spaces are kept
/// apart by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
	Guest { segment: u16, offset: u16 },
	Host { offset: u16 },
}

impl FarPtr {
	pub const NULL: FarPtr = FarPtr { segment: 0, offset: 0 };

	pub const fn new(segment: u16, offset: u16) -> FarPtr {
		FarPtr { segment, offset }
	}

	pub const fn host(offset: u16) -> FarPtr {
		FarPtr { segment: HOST_SEGMENT, offset }
	}

	pub fn is_null(&self) -> bool {
		self.segment == 0 && self.offset == 0
	}

	pub fn is_host(&self) -> bool {
		self.segment == HOST_SEGMENT
	}

	pub fn address(&self) -> Address {
		if self.is_host() {
			Address::Host { offset: self.offset }
		} else {
			Address::Guest { segment: self.segment, offset: self.offset }
		}
	}

	/// Real-mode linear address. Meaningless for host pointers.
	pub fn linear(&self) -> u32 {
		((self.segment as u32) << 4) + self.offset as u32
	}

	/// Moves the offset forward within the same segment.
	pub fn offset_by(&self, bytes: u16) -> FarPtr {
		FarPtr::new(self.segment, self.offset.wrapping_add(bytes))
	}

	/// Far pointers passed in a register pair or as a "long" stack argument carry the segment in
	/// the high word.
	pub fn from_u32(value: u32) -> FarPtr {
		FarPtr::new((value >> 16) as u16, (value & 0xffff) as u16)
	}

	pub fn to_u32(&self) -> u32 {
		((self.segment as u32) << 16) | self.offset as u32
	}

	pub fn decode(bytes: &[u8]) -> FarPtr {
		FarPtr::new(LittleEndian::read_u16(&bytes[2..4]), LittleEndian::read_u16(&bytes[0..2]))
	}

	pub fn encode(&self) -> [u8; FAR_PTR_BYTES] {
		let mut bytes = [0u8; FAR_PTR_BYTES];
		LittleEndian::write_u16(&mut bytes[0..2], self.offset);
		LittleEndian::write_u16(&mut bytes[2..4], self.segment);
		bytes
	}
}

impl From<Address> for FarPtr {
	fn from(address: Address) -> FarPtr {
		match address {
			Address::Guest { segment, offset } => FarPtr::new(segment, offset),
			Address::Host { offset } => FarPtr::host(offset),
		}
	}
}

impl fmt::Display for FarPtr {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:04X}:{:04X}", self.segment, self.offset)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_encoding_is_offset_then_segment() {
		let ptr = FarPtr::new(0x1234, 0xabcd);
		assert_eq!(ptr.encode(), [0xcd, 0xab, 0x34, 0x12]);
		assert_eq!(FarPtr::decode(&[0xcd, 0xab, 0x34, 0x12]), ptr);
	}

	#[test]
	fn test_host_pointers_are_tagged() {
		assert_eq!(FarPtr::host(0x20).address(), Address::Host { offset: 0x20 });
		assert_eq!(FarPtr::new(0x1000, 0x20).address(), Address::Guest { segment: 0x1000, offset: 0x20 });
		assert_eq!(FarPtr::from(Address::Host { offset: 7 }), FarPtr::new(0xffff, 7));
	}

	#[test]
	fn test_linear_and_long_forms() {
		assert_eq!(FarPtr::new(0x1000, 0x0010).linear(), 0x10010);
		assert_eq!(FarPtr::from_u32(0x2000_0004), FarPtr::new(0x2000, 0x0004));
		assert_eq!(FarPtr::new(0x2000, 0x0004).to_u32(), 0x2000_0004);
		assert_eq!(format!("{}", FarPtr::new(0xffff, 0x1d4)), "FFFF:01D4");
	}
}
