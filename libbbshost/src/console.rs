use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

/// The operator-facing console: DOS standard input/output for the hosted program.
pub trait Console: std::fmt::Debug + Send {
	fn write(&mut self, bytes: &[u8]);
	/// Returns `None` when no more input will arrive.
	fn read_char(&mut self) -> Option<u8>;
}

#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
	fn write(&mut self, bytes: &[u8]) {
		let stdout = std::io::stdout();
		let mut handle = stdout.lock();
		handle.write_all(bytes).and_then(|_| handle.flush()).ok();
	}

	fn read_char(&mut self) -> Option<u8> {
		let mut byte = [0u8; 1];
		match std::io::stdin().read(&mut byte) {
			Ok(1) => Some(byte[0]),
			_ => None,
		}
	}
}

#[derive(Debug, Default)]
struct ConsoleBuffers {
	input: VecDeque<u8>,
	output: Vec<u8>,
}

/// Console fed from a queue and captured into memory. Clones share the same buffers, so a copy
/// kept outside the bridge can inspect what the guest printed.
#[derive(Debug, Default, Clone)]
pub struct BufferedConsole {
	buffers: Arc<Mutex<ConsoleBuffers>>,
}

impl BufferedConsole {
	pub fn with_input(input: &[u8]) -> BufferedConsole {
		let console = BufferedConsole::default();
		console.push_input(input);
		console
	}

	pub fn push_input(&self, input: &[u8]) {
		if let Ok(mut buffers) = self.buffers.lock() {
			buffers.input.extend(input.iter().cloned());
		}
	}

	pub fn output(&self) -> Vec<u8> {
		self.buffers.lock().map(|buffers| buffers.output.clone()).unwrap_or_default()
	}
}

impl Console for BufferedConsole {
	fn write(&mut self, bytes: &[u8]) {
		if let Ok(mut buffers) = self.buffers.lock() {
			buffers.output.extend_from_slice(bytes);
		}
	}

	fn read_char(&mut self) -> Option<u8> {
		self.buffers.lock().ok().and_then(|mut buffers| buffers.input.pop_front())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_buffered_console_clones_share_buffers() {
		let observer = BufferedConsole::with_input(b"y");
		let mut console = observer.clone();
		assert_eq!(console.read_char(), Some(b'y'));
		assert_eq!(console.read_char(), None);
		console.write(b"hello");
		assert_eq!(observer.output(), b"hello".to_vec());
	}
}
