use crate::error::{BridgeError, BridgeResult};
use crate::far_ptr::{FarPtr, FAR_PTR_BYTES};
use crate::segment_allocator::{SegmentAllocator, PARAGRAPH_BYTES};

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use std::collections::{BTreeMap, HashMap};

/// 1 MiB plus the 64 KiB reachable above it through segment arithmetic.
pub const GUEST_MEMORY_BYTES: usize = 0x11_0000;
pub const SEGMENT_BYTES: usize = 0x1_0000;
// Keeps host offset zero unused so no host allocation can look like a near null.
const HOST_HEAP_START: u32 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Store {
	Guest,
	Host,
}

/// Allocations within the host segment. Named entries are the exported variables and fixed host
/// buffers; anonymous entries are scratch handed back to the guest.
#[derive(Debug, Default)]
struct HostHeap {
	blocks: BTreeMap<u32, u32>,
	variables: HashMap<String, (FarPtr, u16)>,
}

impl HostHeap {
	fn allocate(&mut self, len: usize) -> BridgeResult<FarPtr> {
		let size = ((len.max(2) + 1) & !1) as u32;
		let mut cursor = HOST_HEAP_START;
		let mut found = None;
		for (&offset, &block_len) in &self.blocks {
			if offset - cursor >= size {
				found = Some(cursor);
				break;
			}
			cursor = offset + block_len;
		}
		if found.is_none() && SEGMENT_BYTES as u32 - cursor >= size {
			found = Some(cursor);
		}
		match found {
			Some(offset) => {
				self.blocks.insert(offset, size);
				Ok(FarPtr::host(offset as u16))
			}
			None => Err(BridgeError::HostMemoryExhausted { requested: len }),
		}
	}

	fn free(&mut self, ptr: FarPtr) -> bool {
		self.blocks.remove(&(ptr.offset as u32)).is_some()
	}
}

/// The guest's view of memory: a flat real-mode address space plus the separate host segment.
/// Paragraphs inside the allocator arena only resolve while a block covers them.
#[derive(Debug)]
pub struct GuestMemory {
	guest: Vec<u8>,
	host: Vec<u8>,
	allocator: SegmentAllocator,
	host_heap: HostHeap,
}

impl GuestMemory {
	pub fn new(arena_start_segment: u16, arena_end_segment: u16) -> GuestMemory {
		GuestMemory {
			guest: vec![0; GUEST_MEMORY_BYTES],
			host: vec![0; SEGMENT_BYTES],
			allocator: SegmentAllocator::new(arena_start_segment, arena_end_segment),
			host_heap: HostHeap::default(),
		}
	}

	pub fn allocator(&self) -> &SegmentAllocator {
		&self.allocator
	}

	pub fn allocator_mut(&mut self) -> &mut SegmentAllocator {
		&mut self.allocator
	}

	/// The longest run of bytes starting at `ptr` that may be touched without leaving its segment
	/// or its mapping, as (store, start, end).
	fn span(&self, ptr: FarPtr) -> BridgeResult<(Store, usize, usize)> {
		let segment_remaining = SEGMENT_BYTES - ptr.offset as usize;
		if ptr.is_host() {
			let start = ptr.offset as usize;
			return Ok((Store::Host, start, start + segment_remaining));
		}
		let start = ptr.linear() as usize;
		let mut end = start + segment_remaining;
		let arena_start = (self.allocator.start_segment() as u32 * PARAGRAPH_BYTES) as usize;
		if self.allocator.in_arena(start as u32) {
			match self.allocator.block_containing(start as u32) {
				Some((segment, paragraphs)) => {
					let block_end = (segment as u32 + paragraphs as u32) * PARAGRAPH_BYTES;
					end = end.min(block_end as usize);
				}
				None => return Err(BridgeError::UnmappedAddress { ptr, len: 1 }),
			}
		} else if start < arena_start {
			end = end.min(arena_start);
		}
		Ok((Store::Guest, start, end.min(GUEST_MEMORY_BYTES)))
	}

	fn locate(&self, ptr: FarPtr, len: usize) -> BridgeResult<(Store, usize)> {
		if ptr.offset as usize + len > SEGMENT_BYTES {
			return Err(BridgeError::SegmentOverrun { ptr, len });
		}
		if len == 0 {
			let store = if ptr.is_host() { Store::Host } else { Store::Guest };
			let start = if ptr.is_host() { ptr.offset as usize } else { ptr.linear() as usize };
			return Ok((store, start));
		}
		let (store, start, end) = self.span(ptr).map_err(|_| BridgeError::UnmappedAddress { ptr, len })?;
		if start + len > end {
			return Err(BridgeError::UnmappedAddress { ptr, len });
		}
		Ok((store, start))
	}

	fn bytes(&self, store: Store) -> &[u8] {
		match store {
			Store::Guest => &self.guest,
			Store::Host => &self.host,
		}
	}

	fn bytes_mut(&mut self, store: Store) -> &mut [u8] {
		match store {
			Store::Guest => &mut self.guest,
			Store::Host => &mut self.host,
		}
	}

	pub fn read(&self, ptr: FarPtr, len: usize) -> BridgeResult<&[u8]> {
		let (store, start) = self.locate(ptr, len)?;
		Ok(&self.bytes(store)[start..start + len])
	}

	pub fn write(&mut self, ptr: FarPtr, data: &[u8]) -> BridgeResult<()> {
		let (store, start) = self.locate(ptr, data.len())?;
		self.bytes_mut(store)[start..start + data.len()].copy_from_slice(data);
		Ok(())
	}

	pub fn fill(&mut self, ptr: FarPtr, len: usize, value: u8) -> BridgeResult<()> {
		let (store, start) = self.locate(ptr, len)?;
		self.bytes_mut(store)[start..start + len].iter_mut().for_each(|b| *b = value);
		Ok(())
	}

	pub fn read_u8(&self, ptr: FarPtr) -> BridgeResult<u8> {
		Ok(self.read(ptr, 1)?[0])
	}

	pub fn read_u16(&self, ptr: FarPtr) -> BridgeResult<u16> {
		Ok(LittleEndian::read_u16(self.read(ptr, 2)?))
	}

	pub fn read_u32(&self, ptr: FarPtr) -> BridgeResult<u32> {
		Ok(LittleEndian::read_u32(self.read(ptr, 4)?))
	}

	pub fn read_far_ptr(&self, ptr: FarPtr) -> BridgeResult<FarPtr> {
		Ok(FarPtr::decode(self.read(ptr, FAR_PTR_BYTES)?))
	}

	pub fn write_u8(&mut self, ptr: FarPtr, value: u8) -> BridgeResult<()> {
		self.write(ptr, &[value])
	}

	pub fn write_u16(&mut self, ptr: FarPtr, value: u16) -> BridgeResult<()> {
		let mut bytes = [0u8; 2];
		LittleEndian::write_u16(&mut bytes, value);
		self.write(ptr, &bytes)
	}

	pub fn write_u32(&mut self, ptr: FarPtr, value: u32) -> BridgeResult<()> {
		let mut bytes = [0u8; 4];
		LittleEndian::write_u32(&mut bytes, value);
		self.write(ptr, &bytes)
	}

	pub fn write_far_ptr(&mut self, ptr: FarPtr, value: FarPtr) -> BridgeResult<()> {
		self.write(ptr, &value.encode())
	}

	/// Reads up to the first NUL. A string that runs off the end of its segment or mapping is an
	/// error rather than a silent truncation.
	pub fn read_cstring(&self, ptr: FarPtr, include_terminator: bool) -> BridgeResult<Vec<u8>> {
		let (store, start, end) = self.span(ptr)?;
		let bytes = &self.bytes(store)[start..end];
		match bytes.iter().position(|&b| b == 0) {
			Some(len) => {
				let len = if include_terminator { len + 1 } else { len };
				Ok(bytes[..len].to_vec())
			}
			None => Err(BridgeError::SegmentOverrun { ptr, len: bytes.len() + 1 }),
		}
	}

	/// Writes the bytes followed by a NUL.
	pub fn write_cstring(&mut self, ptr: FarPtr, text: &[u8]) -> BridgeResult<()> {
		let mut bytes = Vec::with_capacity(text.len() + 1);
		bytes.extend_from_slice(text);
		bytes.push(0);
		self.write(ptr, &bytes)
	}

	/// Anonymous zeroed scratch in the host segment.
	pub fn allocate_host(&mut self, len: usize) -> BridgeResult<FarPtr> {
		let ptr = self.host_heap.allocate(len)?;
		self.fill(ptr, len, 0)?;
		Ok(ptr)
	}

	pub fn free_host(&mut self, ptr: FarPtr) -> bool {
		ptr.is_host() && self.host_heap.free(ptr)
	}

	/// Allocates a named host variable, or returns the existing one of that name.
	pub fn allocate_variable(&mut self, name: &str, len: u16) -> BridgeResult<FarPtr> {
		let key = name.to_ascii_uppercase();
		if let Some(&(ptr, existing_len)) = self.host_heap.variables.get(&key) {
			debug_assert!(existing_len >= len, "variable {} reallocated larger", key);
			return Ok(ptr);
		}
		let ptr = self.allocate_host(len as usize)?;
		debug!("Host variable {} ({} bytes) at {}", key, len, ptr);
		self.host_heap.variables.insert(key, (ptr, len));
		Ok(ptr)
	}

	pub fn variable(&self, name: &str) -> Option<FarPtr> {
		self.host_heap.variables.get(&name.to_ascii_uppercase()).map(|&(ptr, _)| ptr)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn memory() -> GuestMemory {
		GuestMemory::new(0x1000, 0x2000)
	}

	#[test]
	fn test_host_segment_is_a_separate_store() {
		let mut memory = memory();
		let host = FarPtr::host(0x0020);
		memory.write_u16(host, 0xbeef).unwrap();
		assert_eq!(memory.read_u16(host).unwrap(), 0xbeef);
		// The linear alias of FFFF:0020 in guest memory is untouched.
		assert_eq!(memory.read_u16(FarPtr::new(0xfffe, 0x0030)).unwrap(), 0);
	}

	#[test]
	fn test_arena_is_unmapped_until_allocated() {
		let mut memory = memory();
		let probe = FarPtr::new(0x1000, 0);
		assert!(matches!(memory.read_u8(probe), Err(BridgeError::UnmappedAddress { .. })));
		let block = memory.allocator_mut().allocate(2).unwrap();
		assert_eq!(block, probe);
		memory.write(block, &[1; 32]).unwrap();
		assert!(matches!(memory.write(block, &[1; 33]), Err(BridgeError::UnmappedAddress { .. })));
		memory.allocator_mut().free(block.segment);
		assert!(memory.read_u8(block).is_err());
	}

	#[test]
	fn test_system_area_is_always_mapped() {
		let mut memory = memory();
		memory.write_far_ptr(FarPtr::new(0x0000, 0x0084), FarPtr::new(0x0800, 0x0123)).unwrap();
		assert_eq!(memory.read(FarPtr::NULL.offset_by(0x84), 4).unwrap(), &[0x23, 0x01, 0x00, 0x08]);
		assert!(memory.write_u8(FarPtr::new(0xb800, 0), 0x41).is_ok());
	}

	#[test]
	fn test_segment_overrun() {
		let memory = memory();
		let err = memory.read(FarPtr::new(0x0100, 0xfffe), 4).unwrap_err();
		assert!(matches!(err, BridgeError::SegmentOverrun { len: 4, .. }));
		assert!(memory.read(FarPtr::host(0xfffc), 4).is_ok());
	}

	#[test]
	fn test_cstrings() {
		let mut memory = memory();
		let ptr = FarPtr::new(0x0200, 0x10);
		memory.write_cstring(ptr, b"HELLO").unwrap();
		assert_eq!(memory.read_cstring(ptr, false).unwrap(), b"HELLO".to_vec());
		assert_eq!(memory.read_cstring(ptr, true).unwrap(), b"HELLO\0".to_vec());

		let block = memory.allocator_mut().allocate(1).unwrap();
		memory.fill(block, 16, b'A').unwrap();
		assert!(matches!(memory.read_cstring(block, false), Err(BridgeError::SegmentOverrun { .. })));
	}

	#[test]
	fn test_host_variables_and_scratch() {
		let mut memory = memory();
		let usrnum = memory.allocate_variable("usrnum", 2).unwrap();
		assert!(usrnum.is_host());
		assert_eq!(memory.allocate_variable("USRNUM", 2).unwrap(), usrnum);
		assert_eq!(memory.variable("UsrNum"), Some(usrnum));
		let scratch = memory.allocate_host(5).unwrap();
		assert_ne!(scratch, usrnum);
		assert!(memory.free_host(scratch));
		assert!(!memory.free_host(scratch));
		assert_eq!(memory.allocate_host(5).unwrap(), scratch);
	}

	#[test]
	fn test_host_heap_exhaustion() {
		let mut memory = memory();
		memory.allocate_host(0x8000).unwrap();
		let err = memory.allocate_host(0x8000).unwrap_err();
		assert!(matches!(err, BridgeError::HostMemoryExhausted { requested: 0x8000 }));
	}
}
