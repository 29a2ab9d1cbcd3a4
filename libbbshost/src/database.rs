use crate::error::{BridgeError, BridgeResult};
use crate::far_ptr::FarPtr;
use crate::memory::GuestMemory;

use log::debug;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const HANDLE_BYTES: usize = 2;

// Btrieve operation codes: http://www.nomad.ee/btrieve/errors/index.html
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOperation {
	First,
	Last,
	Next,
	Previous,
}

impl StepOperation {
	pub fn from_btrieve(operation: u16) -> BridgeResult<StepOperation> {
		match operation {
			24 => Ok(StepOperation::Next),
			33 => Ok(StepOperation::First),
			34 => Ok(StepOperation::Last),
			35 => Ok(StepOperation::Previous),
			_ => Err(BridgeError::UnsupportedDatabaseOperation(operation)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyOperation {
	Equal,
	Greater,
	GreaterOrEqual,
	Less,
	LessOrEqual,
	First,
	Last,
}

impl KeyOperation {
	pub fn from_btrieve(operation: u16) -> BridgeResult<KeyOperation> {
		match operation {
			5 => Ok(KeyOperation::Equal),
			8 => Ok(KeyOperation::Greater),
			9 => Ok(KeyOperation::GreaterOrEqual),
			10 => Ok(KeyOperation::Less),
			11 => Ok(KeyOperation::LessOrEqual),
			12 => Ok(KeyOperation::First),
			13 => Ok(KeyOperation::Last),
			_ => Err(BridgeError::UnsupportedDatabaseOperation(operation)),
		}
	}

	/// First and last ignore the key value.
	pub fn needs_key(self) -> bool {
		!matches!(self, KeyOperation::First | KeyOperation::Last)
	}
}

/// An open record file with its own cursor.
pub trait DatabaseFile: std::fmt::Debug + Send {
	fn name(&self) -> &str;
	fn record_length(&self) -> u16;
	fn key_length(&self, keynum: u16) -> Option<u16>;
	/// Moves the cursor in physical order and returns the record under it.
	fn step(&mut self, operation: StepOperation) -> Option<Vec<u8>>;
	fn get_by_key(&mut self, keynum: u16, key: &[u8], operation: KeyOperation) -> Option<Vec<u8>>;
	fn insert(&mut self, record: &[u8]) -> bool;
	/// Replaces the record under the cursor.
	fn update(&mut self, record: &[u8]) -> bool;
}

pub trait DatabaseEngine: std::fmt::Debug + Send {
	fn open(&mut self, name: &str, record_length: u16) -> Result<Box<dyn DatabaseFile>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeySegment {
	pub offset: u16,
	pub length: u16,
	/// Duplicate key values are rejected on insert and update.
	pub unique: bool,
}

#[derive(Debug, Default)]
struct Table {
	record_length: u16,
	keys: Vec<KeySegment>,
	records: Vec<Vec<u8>>,
}

impl Table {
	fn key_of<'a>(&self, record: &'a [u8], keynum: usize) -> &'a [u8] {
		let key = self.keys[keynum];
		let start = (key.offset as usize).min(record.len());
		let end = (start + key.length as usize).min(record.len());
		&record[start..end]
	}

	fn violates_unique_key(&self, record: &[u8], skip: Option<usize>) -> bool {
		(0..self.keys.len()).filter(|&keynum| self.keys[keynum].unique).any(|keynum| {
			let key = self.key_of(record, keynum);
			self.records
				.iter()
				.enumerate()
				.any(|(index, existing)| Some(index) != skip && self.key_of(existing, keynum) == key)
		})
	}
}

/// Tables held in memory and shared between every file opened on them.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabaseEngine {
	tables: HashMap<String, Arc<Mutex<Table>>>,
}

impl MemoryDatabaseEngine {
	pub fn new() -> MemoryDatabaseEngine {
		MemoryDatabaseEngine::default()
	}

	pub fn define(&mut self, name: &str, record_length: u16, keys: Vec<KeySegment>) {
		let table = Table { record_length, keys, records: vec![] };
		self.tables.insert(name.to_ascii_uppercase(), Arc::new(Mutex::new(table)));
	}

	/// Adds a record directly, padded or cut to the table's record length.
	pub fn seed(&mut self, name: &str, record: &[u8]) -> bool {
		match self.tables.get(&name.to_ascii_uppercase()).and_then(|table| table.lock().ok()) {
			Some(mut table) => {
				let mut record = record.to_vec();
				record.resize(table.record_length as usize, 0);
				table.records.push(record);
				true
			}
			None => false,
		}
	}

	pub fn records(&self, name: &str) -> Vec<Vec<u8>> {
		self.tables
			.get(&name.to_ascii_uppercase())
			.and_then(|table| table.lock().ok().map(|table| table.records.clone()))
			.unwrap_or_default()
	}
}

impl DatabaseEngine for MemoryDatabaseEngine {
	fn open(&mut self, name: &str, record_length: u16) -> Result<Box<dyn DatabaseFile>, String> {
		let table = self.tables.get(&name.to_ascii_uppercase()).ok_or_else(|| "no such table".to_string())?;
		let table_record_length = table.lock().map_err(|_| "table lock poisoned".to_string())?.record_length;
		if record_length != 0 && record_length != table_record_length {
			return Err(format!("record length {} does not match {}", record_length, table_record_length));
		}
		Ok(Box::new(MemoryDatabaseFile {
			name: name.to_ascii_uppercase(),
			table: table.clone(),
			cursor: None,
		}))
	}
}

#[derive(Debug)]
pub struct MemoryDatabaseFile {
	name: String,
	table: Arc<Mutex<Table>>,
	cursor: Option<usize>,
}

impl MemoryDatabaseFile {
	fn with_table<T, F: FnOnce(&mut Table, &mut Option<usize>) -> T>(&mut self, f: F) -> Option<T> {
		let cursor = &mut self.cursor;
		self.table.lock().ok().map(|mut table| f(&mut *table, cursor))
	}
}

impl DatabaseFile for MemoryDatabaseFile {
	fn name(&self) -> &str {
		&self.name
	}

	fn record_length(&self) -> u16 {
		self.table.lock().map(|table| table.record_length).unwrap_or(0)
	}

	fn key_length(&self, keynum: u16) -> Option<u16> {
		let table = self.table.lock().ok()?;
		table.keys.get(keynum as usize).map(|key| key.length)
	}

	fn step(&mut self, operation: StepOperation) -> Option<Vec<u8>> {
		self.with_table(|table, cursor| {
			let count = table.records.len();
			let position = match (operation, *cursor) {
				(_, _) if count == 0 => None,
				(StepOperation::First, _) => Some(0),
				(StepOperation::Last, _) => Some(count - 1),
				(StepOperation::Next, Some(current)) if current + 1 < count => Some(current + 1),
				(StepOperation::Previous, Some(current)) if current > 0 => Some(current - 1),
				_ => None,
			};
			position.map(|position| {
				*cursor = Some(position);
				table.records[position].clone()
			})
		})
		.flatten()
	}

	fn get_by_key(&mut self, keynum: u16, key: &[u8], operation: KeyOperation) -> Option<Vec<u8>> {
		self.with_table(|table, cursor| {
			let table: &Table = table;
			let keynum = keynum as usize;
			if keynum >= table.keys.len() {
				return None;
			}
			let mut ordered: Vec<usize> = (0..table.records.len()).collect();
			ordered.sort_by(|&a, &b| table.key_of(&table.records[a], keynum).cmp(table.key_of(&table.records[b], keynum)));
			let key_at = move |index: usize| table.key_of(&table.records[index], keynum);
			let found = match operation {
				KeyOperation::First => ordered.first().cloned(),
				KeyOperation::Last => ordered.last().cloned(),
				KeyOperation::Equal => ordered.iter().cloned().find(|&index| key_at(index) == key),
				KeyOperation::Greater => ordered.iter().cloned().find(|&index| key_at(index) > key),
				KeyOperation::GreaterOrEqual => ordered.iter().cloned().find(|&index| key_at(index) >= key),
				KeyOperation::Less => ordered.iter().rev().cloned().find(|&index| key_at(index) < key),
				KeyOperation::LessOrEqual => ordered.iter().rev().cloned().find(|&index| key_at(index) <= key),
			};
			found.map(|index| {
				*cursor = Some(index);
				table.records[index].clone()
			})
		})
		.flatten()
	}

	fn insert(&mut self, record: &[u8]) -> bool {
		self.with_table(|table, cursor| {
			if table.violates_unique_key(record, None) {
				return false;
			}
			table.records.push(record.to_vec());
			*cursor = Some(table.records.len() - 1);
			true
		})
		.unwrap_or(false)
	}

	fn update(&mut self, record: &[u8]) -> bool {
		self.with_table(|table, cursor| match *cursor {
			Some(position) if position < table.records.len() && !table.violates_unique_key(record, Some(position)) => {
				table.records[position] = record.to_vec();
				true
			}
			_ => false,
		})
		.unwrap_or(false)
	}
}

/// The current database file and the one it displaced. Only one displaced handle is remembered.
#[derive(Debug, Default)]
pub struct DatabaseStack {
	files: HashMap<FarPtr, Box<dyn DatabaseFile>>,
	current: Option<FarPtr>,
	previous: Option<FarPtr>,
}

impl DatabaseStack {
	pub fn new() -> DatabaseStack {
		DatabaseStack::default()
	}

	pub fn current_handle(&self) -> Option<FarPtr> {
		self.current
	}

	pub fn open(&mut self, memory: &mut GuestMemory, engine: &mut dyn DatabaseEngine, name: &str, record_length: u16) -> BridgeResult<FarPtr> {
		let file = engine
			.open(name, record_length)
			.map_err(|reason| BridgeError::DatabaseOpen { name: name.to_string(), reason })?;
		let handle = memory.allocate_host(HANDLE_BYTES)?;
		debug!("Opened database {} as {}", file.name(), handle);
		self.files.insert(handle, file);
		self.current = Some(handle);
		Ok(handle)
	}

	pub fn set_current(&mut self, handle: FarPtr) -> BridgeResult<()> {
		if !self.files.contains_key(&handle) {
			return Err(BridgeError::UnknownDatabaseHandle(handle));
		}
		self.previous = self.current;
		self.current = Some(handle);
		Ok(())
	}

	/// Does nothing when no handle was displaced.
	pub fn restore(&mut self) {
		if let Some(previous) = self.previous.take() {
			debug!("Database {} restored", previous);
			self.current = Some(previous);
		}
	}

	pub fn close(&mut self, memory: &mut GuestMemory, handle: FarPtr) -> BridgeResult<()> {
		if self.files.remove(&handle).is_none() {
			return Err(BridgeError::UnknownDatabaseHandle(handle));
		}
		if self.current == Some(handle) {
			self.current = None;
		}
		if self.previous == Some(handle) {
			self.previous = None;
		}
		memory.free_host(handle);
		Ok(())
	}

	pub fn current(&mut self) -> BridgeResult<&mut dyn DatabaseFile> {
		let handle = self.current.ok_or(BridgeError::NoCurrentDatabase)?;
		match self.files.get_mut(&handle) {
			Some(file) => Ok(file.as_mut()),
			None => Err(BridgeError::NoCurrentDatabase),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn engine() -> MemoryDatabaseEngine {
		let mut engine = MemoryDatabaseEngine::new();
		engine.define("USERS.DAT", 8, vec![KeySegment { offset: 0, length: 4, unique: true }]);
		engine.seed("USERS.DAT", b"CCCCdata");
		engine.seed("USERS.DAT", b"AAAAdata");
		engine.seed("USERS.DAT", b"BBBBdata");
		engine.define("LOG.DAT", 4, vec![]);
		engine
	}

	#[test]
	fn test_set_current_restore() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut engine = engine();
		let mut stack = DatabaseStack::new();
		let a = stack.open(&mut memory, &mut engine, "users.dat", 8).unwrap();
		let b = stack.open(&mut memory, &mut engine, "LOG.DAT", 4).unwrap();
		stack.set_current(a).unwrap();
		stack.set_current(b).unwrap();
		stack.restore();
		assert_eq!(stack.current_handle(), Some(a));
		stack.restore();
		assert_eq!(stack.current_handle(), Some(a));
		assert!(matches!(stack.set_current(FarPtr::host(0x4000)), Err(BridgeError::UnknownDatabaseHandle(_))));
	}

	#[test]
	fn test_no_current_database_is_fatal() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		let mut engine = engine();
		let mut stack = DatabaseStack::new();
		assert!(matches!(stack.current(), Err(BridgeError::NoCurrentDatabase)));
		let a = stack.open(&mut memory, &mut engine, "USERS.DAT", 8).unwrap();
		stack.close(&mut memory, a).unwrap();
		assert!(matches!(stack.current(), Err(BridgeError::NoCurrentDatabase)));
		assert!(matches!(stack.open(&mut memory, &mut engine, "NOPE.DAT", 8), Err(BridgeError::DatabaseOpen { .. })));
	}

	#[test]
	fn test_step_and_key_access() {
		let mut engine = engine();
		let mut file = engine.open("USERS.DAT", 8).unwrap();
		assert_eq!(file.step(StepOperation::First).unwrap(), b"CCCCdata".to_vec());
		assert_eq!(file.step(StepOperation::Next).unwrap(), b"AAAAdata".to_vec());
		assert_eq!(file.step(StepOperation::Last).unwrap(), b"BBBBdata".to_vec());
		assert_eq!(file.step(StepOperation::Next), None);

		assert_eq!(file.get_by_key(0, b"BBBB", KeyOperation::Equal).unwrap(), b"BBBBdata".to_vec());
		assert_eq!(file.get_by_key(0, b"BBBB", KeyOperation::Greater).unwrap(), b"CCCCdata".to_vec());
		assert_eq!(file.get_by_key(0, b"AB", KeyOperation::GreaterOrEqual).unwrap(), b"BBBBdata".to_vec());
		assert_eq!(file.get_by_key(0, b"", KeyOperation::First).unwrap(), b"AAAAdata".to_vec());
		assert_eq!(file.get_by_key(0, b"ZZZZ", KeyOperation::Equal), None);
		assert_eq!(file.get_by_key(1, b"AAAA", KeyOperation::Equal), None);
		assert_eq!(StepOperation::from_btrieve(33).unwrap(), StepOperation::First);
		assert!(matches!(KeyOperation::from_btrieve(99), Err(BridgeError::UnsupportedDatabaseOperation(99))));
	}

	#[test]
	fn test_insert_and_update() {
		let mut engine = engine();
		let mut file = engine.open("USERS.DAT", 8).unwrap();
		assert!(file.insert(b"DDDDnew!"));
		assert!(!file.insert(b"AAAAdupe"));
		file.get_by_key(0, b"AAAA", KeyOperation::Equal).unwrap();
		assert!(file.update(b"AAAAedit"));
		assert!(!file.update(b"BBBBedit"));
		assert_eq!(engine.records("USERS.DAT")[1], b"AAAAedit".to_vec());
		assert_eq!(engine.records("USERS.DAT").len(), 4);
	}
}
