use crate::error::{BridgeError, BridgeResult};
use crate::far_ptr::FarPtr;
use crate::memory::GuestMemory;

use log::{debug, warn};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Handle value meaning "no configuration resource is current". Host allocations are always even,
/// so it can never collide with a real handle.
pub const NO_RESOURCE: FarPtr = FarPtr::new(0xffff, 0xffff);
// Each handle is a small host block so that handles are unique, stable pointers.
const HANDLE_BYTES: usize = 2;

/// Why an option's text could not be read as the requested type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValueError {
	NotANumber,
	NotYesNo,
}

/// One opened configuration resource, keyed by message number.
pub trait ConfigResource: std::fmt::Debug + Send {
	fn name(&self) -> &str;
	fn get_string(&self, msgnum: u16) -> Option<Vec<u8>>;

	fn get_numeric(&self, msgnum: u16) -> Option<Result<i64, OptionValueError>> {
		self.get_string(msgnum).map(|value| {
			let text = String::from_utf8_lossy(&value);
			text.trim().parse::<i64>().map_err(|_| OptionValueError::NotANumber)
		})
	}

	fn get_long(&self, msgnum: u16) -> Option<Result<i64, OptionValueError>> {
		self.get_numeric(msgnum)
	}

	fn get_bool(&self, msgnum: u16) -> Option<Result<bool, OptionValueError>> {
		self.get_string(msgnum).map(|value| match value.iter().find(|c| !c.is_ascii_whitespace()) {
			Some(b'Y') | Some(b'y') => Ok(true),
			Some(b'N') | Some(b'n') => Ok(false),
			_ => Err(OptionValueError::NotYesNo),
		})
	}
}

pub trait ConfigResourceReader: std::fmt::Debug + Send {
	fn open(&mut self, name: &str) -> Result<Box<dyn ConfigResource>, String>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConfigResource {
	name: String,
	values: BTreeMap<u16, Vec<u8>>,
}

impl MemoryConfigResource {
	pub fn new(name: &str) -> MemoryConfigResource {
		MemoryConfigResource { name: name.to_ascii_uppercase(), values: BTreeMap::new() }
	}

	pub fn with(mut self, msgnum: u16, value: &[u8]) -> MemoryConfigResource {
		self.values.insert(msgnum, value.to_vec());
		self
	}
}

impl ConfigResource for MemoryConfigResource {
	fn name(&self) -> &str {
		&self.name
	}

	fn get_string(&self, msgnum: u16) -> Option<Vec<u8>> {
		self.values.get(&msgnum).cloned()
	}
}

/// Hands out copies of resources registered up front.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigReader {
	resources: HashMap<String, MemoryConfigResource>,
}

impl MemoryConfigReader {
	pub fn new() -> MemoryConfigReader {
		MemoryConfigReader::default()
	}

	pub fn insert(&mut self, resource: MemoryConfigResource) {
		self.resources.insert(resource.name.clone(), resource);
	}
}

impl ConfigResourceReader for MemoryConfigReader {
	fn open(&mut self, name: &str) -> Result<Box<dyn ConfigResource>, String> {
		match self.resources.get(&name.to_ascii_uppercase()) {
			Some(resource) => Ok(Box::new(resource.clone())),
			None => Err("no such resource".to_string()),
		}
	}
}

/// Reads resources from text files of `msgnum=value` lines under one directory. Blank lines and
/// lines starting with `#` are skipped; `\n`, `\r`, `\t` and `\\` escapes are expanded.
#[derive(Debug, Clone)]
pub struct DirectoryConfigReader {
	root_path: PathBuf,
}

impl DirectoryConfigReader {
	pub fn new(root_path: PathBuf) -> DirectoryConfigReader {
		DirectoryConfigReader { root_path }
	}
}

fn unescape(value: &str) -> Vec<u8> {
	let mut result = Vec::with_capacity(value.len());
	let mut chars = value.bytes();
	while let Some(c) = chars.next() {
		if c != b'\\' {
			result.push(c);
			continue;
		}
		match chars.next() {
			Some(b'n') => result.push(b'\n'),
			Some(b'r') => result.push(b'\r'),
			Some(b't') => result.push(b'\t'),
			Some(other) => result.push(other),
			None => result.push(b'\\'),
		}
	}
	result
}

fn parse_resource(name: &str, text: &str) -> Result<MemoryConfigResource, String> {
	let mut resource = MemoryConfigResource::new(name);
	for (line_index, line) in text.lines().enumerate() {
		let trimmed = line.trim_start();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		let (key, value) = match trimmed.find('=') {
			Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
			None => return Err(format!("line {} has no '='", line_index + 1)),
		};
		let msgnum = key.trim().parse::<u16>().map_err(|_| format!("line {} has a bad message number", line_index + 1))?;
		resource.values.insert(msgnum, unescape(value));
	}
	Ok(resource)
}

impl ConfigResourceReader for DirectoryConfigReader {
	fn open(&mut self, name: &str) -> Result<Box<dyn ConfigResource>, String> {
		let candidates = [name.to_string(), name.to_ascii_uppercase(), name.to_ascii_lowercase()];
		let path = candidates
			.iter()
			.map(|candidate| self.root_path.join(candidate))
			.find(|path| path.is_file())
			.ok_or_else(|| format!("not found under {}", self.root_path.display()))?;
		let text = std::fs::read_to_string(&path).map_err(|err| err.to_string())?;
		Ok(Box::new(parse_resource(name, &text)?))
	}
}

/// The current configuration resource plus the history of those it displaced. Restoring pops the
/// most recently displaced handle.
#[derive(Debug)]
pub struct ConfigResourceStack {
	resources: HashMap<FarPtr, Box<dyn ConfigResource>>,
	current: FarPtr,
	history: Vec<FarPtr>,
	strings: HashMap<(FarPtr, u16), FarPtr>,
}

impl Default for ConfigResourceStack {
	fn default() -> ConfigResourceStack {
		ConfigResourceStack {
			resources: HashMap::new(),
			current: NO_RESOURCE,
			history: vec![],
			strings: HashMap::new(),
		}
	}
}

impl ConfigResourceStack {
	pub fn new() -> ConfigResourceStack {
		ConfigResourceStack::default()
	}

	pub fn current_handle(&self) -> FarPtr {
		self.current
	}

	pub fn history_len(&self) -> usize {
		self.history.len()
	}

	pub fn open(&mut self, memory: &mut GuestMemory, reader: &mut dyn ConfigResourceReader, name: &str) -> BridgeResult<FarPtr> {
		let resource = reader
			.open(name)
			.map_err(|reason| BridgeError::ResourceOpen { name: name.to_string(), reason })?;
		let handle = memory.allocate_host(HANDLE_BYTES)?;
		debug!("Opened configuration resource {} as {}", resource.name(), handle);
		self.resources.insert(handle, resource);
		if self.current != NO_RESOURCE {
			self.history.push(self.current);
		}
		self.current = handle;
		Ok(handle)
	}

	/// Returns false, changing nothing, when the handle is neither open nor `NO_RESOURCE`.
	pub fn set_current(&mut self, handle: FarPtr) -> bool {
		if handle != NO_RESOURCE && !self.resources.contains_key(&handle) {
			warn!("Ignoring switch to unknown configuration resource {}", handle);
			return false;
		}
		self.history.push(self.current);
		self.current = handle;
		true
	}

	pub fn restore(&mut self) -> BridgeResult<FarPtr> {
		let previous = self.history.pop().ok_or(BridgeError::ResourceHistoryEmpty)?;
		debug!("Configuration resource {} restored over {}", previous, self.current);
		self.current = previous;
		Ok(previous)
	}

	/// Returns false for a handle that is not open.
	pub fn close(&mut self, memory: &mut GuestMemory, handle: FarPtr) -> bool {
		if self.resources.remove(&handle).is_none() {
			warn!("Close of unknown configuration resource {}", handle);
			return false;
		}
		let cached: Vec<(u16, FarPtr)> = self
			.strings
			.iter()
			.filter(|((owner, _), _)| *owner == handle)
			.map(|(&(_, msgnum), &ptr)| (msgnum, ptr))
			.collect();
		for (msgnum, ptr) in cached {
			self.strings.remove(&(handle, msgnum));
			memory.free_host(ptr);
		}
		self.history.retain(|&entry| entry != handle);
		if self.current == handle {
			self.current = NO_RESOURCE;
		}
		memory.free_host(handle);
		true
	}

	pub fn current(&self) -> BridgeResult<&dyn ConfigResource> {
		self.resources
			.get(&self.current)
			.map(|resource| resource.as_ref())
			.ok_or(BridgeError::NoCurrentResource)
	}

	fn missing(&self, msgnum: u16) -> BridgeError {
		let resource = self.current().map(|resource| resource.name().to_string()).unwrap_or_default();
		BridgeError::MissingMessage { resource, msgnum }
	}

	fn malformed(&self, msgnum: u16, expected: &'static str) -> BridgeError {
		let resource = self.current().map(|resource| resource.name().to_string()).unwrap_or_default();
		BridgeError::MalformedOption { resource, msgnum, expected }
	}

	fn bounded(&self, msgnum: u16, value: i64, floor: i64, ceiling: i64) -> BridgeResult<i64> {
		if value < floor || value > ceiling {
			let resource = self.current()?.name().to_string();
			return Err(BridgeError::OptionOutOfBounds { resource, msgnum, value, floor, ceiling });
		}
		Ok(value)
	}

	pub fn numeric(&self, msgnum: u16, floor: i16, ceiling: i16) -> BridgeResult<i16> {
		let value = match self.current()?.get_numeric(msgnum) {
			Some(Ok(value)) => value,
			Some(Err(_)) => return Err(self.malformed(msgnum, "number")),
			None => return Err(self.missing(msgnum)),
		};
		Ok(self.bounded(msgnum, value, floor as i64, ceiling as i64)? as i16)
	}

	pub fn long(&self, msgnum: u16, floor: i32, ceiling: i32) -> BridgeResult<i32> {
		let value = match self.current()?.get_long(msgnum) {
			Some(Ok(value)) => value,
			Some(Err(_)) => return Err(self.malformed(msgnum, "long")),
			None => return Err(self.missing(msgnum)),
		};
		Ok(self.bounded(msgnum, value, floor as i64, ceiling as i64)? as i32)
	}

	pub fn boolean(&self, msgnum: u16) -> BridgeResult<bool> {
		match self.current()?.get_bool(msgnum) {
			Some(Ok(value)) => Ok(value),
			Some(Err(_)) => Err(self.malformed(msgnum, "yes/no answer")),
			None => Err(self.missing(msgnum)),
		}
	}

	pub fn message(&self, msgnum: u16) -> BridgeResult<Vec<u8>> {
		self.current()?.get_string(msgnum).ok_or_else(|| self.missing(msgnum))
	}

	/// The message as a C string in host memory. Repeated lookups of the same message in the same
	/// resource return the same block.
	pub fn string(&mut self, memory: &mut GuestMemory, msgnum: u16) -> BridgeResult<FarPtr> {
		if let Some(&ptr) = self.strings.get(&(self.current, msgnum)) {
			return Ok(ptr);
		}
		let text = self.message(msgnum)?;
		let ptr = memory.allocate_host(text.len() + 1)?;
		memory.write_cstring(ptr, &text)?;
		self.strings.insert((self.current, msgnum), ptr);
		Ok(ptr)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn reader() -> MemoryConfigReader {
		let mut reader = MemoryConfigReader::new();
		reader.insert(MemoryConfigResource::new("A.MCV").with(1, b"15").with(2, b"Yes").with(3, b"Welcome!"));
		reader.insert(MemoryConfigResource::new("B.MCV").with(1, b"70000").with(2, b"maybe"));
		reader
	}

	#[test]
	fn test_open_open_restore() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut reader = reader();
		let mut stack = ConfigResourceStack::new();
		let a = stack.open(&mut memory, &mut reader, "a.mcv").unwrap();
		let b = stack.open(&mut memory, &mut reader, "B.MCV").unwrap();
		assert_ne!(a, b);
		assert_eq!(stack.current_handle(), b);
		assert_eq!(stack.restore().unwrap(), a);
		assert_eq!(stack.current_handle(), a);
		assert!(matches!(stack.restore(), Err(BridgeError::ResourceHistoryEmpty)));
	}

	#[test]
	fn test_set_current_validates_handles() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut reader = reader();
		let mut stack = ConfigResourceStack::new();
		let a = stack.open(&mut memory, &mut reader, "A.MCV").unwrap();
		assert!(!stack.set_current(FarPtr::host(0x7770)));
		assert_eq!(stack.current_handle(), a);
		assert_eq!(stack.history_len(), 0);
		assert!(stack.set_current(NO_RESOURCE));
		assert!(matches!(stack.numeric(1, 0, 100), Err(BridgeError::NoCurrentResource)));
		stack.restore().unwrap();
		assert_eq!(stack.numeric(1, 0, 100).unwrap(), 15);
	}

	#[test]
	fn test_bounds_are_fatal() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut reader = reader();
		let mut stack = ConfigResourceStack::new();
		stack.open(&mut memory, &mut reader, "A.MCV").unwrap();
		let err = stack.numeric(1, 0, 10).unwrap_err();
		assert!(matches!(err, BridgeError::OptionOutOfBounds { msgnum: 1, value: 15, floor: 0, ceiling: 10, .. }));
		assert!(stack.boolean(2).unwrap());
		assert!(matches!(stack.numeric(9, 0, 10), Err(BridgeError::MissingMessage { msgnum: 9, .. })));

		stack.open(&mut memory, &mut reader, "B.MCV").unwrap();
		assert_eq!(stack.long(1, 0, 100_000).unwrap(), 70000);
		assert!(matches!(stack.numeric(1, -100, 100), Err(BridgeError::OptionOutOfBounds { .. })));
		assert!(matches!(stack.boolean(2), Err(BridgeError::MalformedOption { .. })));
	}

	#[test]
	fn test_strings_are_cached_per_handle() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut reader = reader();
		let mut stack = ConfigResourceStack::new();
		let a = stack.open(&mut memory, &mut reader, "A.MCV").unwrap();
		let first = stack.string(&mut memory, 3).unwrap();
		assert_eq!(stack.string(&mut memory, 3).unwrap(), first);
		assert_eq!(memory.read_cstring(first, false).unwrap(), b"Welcome!".to_vec());
		assert!(stack.close(&mut memory, a));
		assert!(!stack.close(&mut memory, a));
		assert_eq!(stack.current_handle(), NO_RESOURCE);
	}

	#[test]
	fn test_parse_resource_file() {
		let resource = parse_resource("X.MCV", "# comment\n1=10\n\n2=Line one\\r\\nLine two\n").unwrap();
		assert_eq!(resource.get_numeric(1), Some(Ok(10)));
		assert_eq!(resource.get_numeric(2), Some(Err(OptionValueError::NotANumber)));
		assert_eq!(resource.get_bool(1), Some(Err(OptionValueError::NotYesNo)));
		assert_eq!(resource.get_bool(3), None);
		assert_eq!(resource.get_string(2), Some(b"Line one\r\nLine two".to_vec()));
		assert!(parse_resource("X.MCV", "garbage").is_err());
	}
}
