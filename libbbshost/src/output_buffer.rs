use crate::error::{BridgeError, BridgeResult};
use crate::far_ptr::FarPtr;
use crate::memory::GuestMemory;

use log::trace;

pub const OUTPUT_BUFFER_BYTES: usize = 8192;
const OUTPUT_BUFFER_VARIABLE: &str = "PRFBUF-DATA";

/// The shared formatted-output buffer. Writes land at the cursor and advance it; `take` hands back
/// everything since the last reset. Clearing only moves the cursor.
#[derive(Debug)]
pub struct OutputBuffer {
	buffer: FarPtr,
	cursor: usize,
}

impl OutputBuffer {
	pub fn new(memory: &mut GuestMemory) -> BridgeResult<OutputBuffer> {
		let buffer = memory.allocate_variable(OUTPUT_BUFFER_VARIABLE, OUTPUT_BUFFER_BYTES as u16)?;
		Ok(OutputBuffer { buffer, cursor: 0 })
	}

	pub fn buffer(&self) -> FarPtr {
		self.buffer
	}

	pub fn cursor(&self) -> usize {
		self.cursor
	}

	pub fn remaining(&self) -> usize {
		OUTPUT_BUFFER_BYTES - self.cursor
	}

	/// Appends at the cursor. Guest code reads the buffer as a C string, so a terminator follows the
	/// text whenever there is room for one.
	pub fn write(&mut self, memory: &mut GuestMemory, bytes: &[u8]) -> BridgeResult<()> {
		if bytes.len() > self.remaining() {
			return Err(BridgeError::OutputOverflow { requested: bytes.len(), available: self.remaining() });
		}
		memory.write(self.buffer.offset_by(self.cursor as u16), bytes)?;
		self.cursor += bytes.len();
		if self.cursor < OUTPUT_BUFFER_BYTES {
			memory.write_u8(self.buffer.offset_by(self.cursor as u16), 0)?;
		}
		trace!("Output buffer cursor at {}", self.cursor);
		Ok(())
	}

	pub fn clear(&mut self) {
		self.cursor = 0;
	}

	pub fn take(&mut self, memory: &GuestMemory) -> BridgeResult<Vec<u8>> {
		let bytes = memory.read(self.buffer, self.cursor)?.to_vec();
		self.cursor = 0;
		Ok(bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_overflow_is_rejected() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut output = OutputBuffer::new(&mut memory).unwrap();
		output.write(&mut memory, &[b'a'; 100]).unwrap();
		let err = output.write(&mut memory, &vec![b'b'; OUTPUT_BUFFER_BYTES - 100 + 1]).unwrap_err();
		assert!(matches!(err, BridgeError::OutputOverflow { requested: 8093, available: 8092 }));
		assert_eq!(output.cursor(), 100);
		output.write(&mut memory, &vec![b'b'; OUTPUT_BUFFER_BYTES - 100]).unwrap();
		assert_eq!(output.remaining(), 0);
	}

	#[test]
	fn test_clear_keeps_contents() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut output = OutputBuffer::new(&mut memory).unwrap();
		output.write(&mut memory, b"hello").unwrap();
		output.clear();
		assert_eq!(output.cursor(), 0);
		assert_eq!(memory.read(output.buffer(), 5).unwrap(), b"hello");
	}

	#[test]
	fn test_take_returns_bytes_since_reset() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut output = OutputBuffer::new(&mut memory).unwrap();
		output.write(&mut memory, b"stale").unwrap();
		output.clear();
		output.write(&mut memory, b"one ").unwrap();
		output.write(&mut memory, b"two").unwrap();
		assert_eq!(memory.read_cstring(output.buffer(), false).unwrap(), b"one two".to_vec());
		assert_eq!(output.take(&memory).unwrap(), b"one two".to_vec());
		assert_eq!(output.cursor(), 0);
		assert_eq!(output.take(&memory).unwrap(), Vec::<u8>::new());
	}
}
