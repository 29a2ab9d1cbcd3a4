use crate::clock::date_time_from_unix;
use crate::dos_error_codes::DosErrorCode;

use byteorder::{ByteOrder, LittleEndian};

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Seek, Write};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// Handles 0 to 4 are stdin, stdout, stderr, aux and prn.
pub const FIRST_FILE_HANDLE: u16 = 5;
// http://stanislavs.org/helppc/int_21-4e.html
pub const DTA_RECORD_BYTES: usize = 43;
const DTA_ATTRIBUTE_OFFSET: usize = 0x15;
const DTA_TIME_OFFSET: usize = 0x16;
const DTA_DATE_OFFSET: usize = 0x18;
const DTA_SIZE_OFFSET: usize = 0x1a;
const DTA_NAME_OFFSET: usize = 0x1e;

pub trait DosFileSystem: std::fmt::Debug + Send {
	/// Returns a file handle if successful. Error code if not.
	fn create(&mut self, filename: &[u8], attributes: u16) -> Result<u16, DosErrorCode>;
	/// Returns a file handle if successful. Error code if not.
	fn open(&mut self, filename: &[u8], access_mode: DosFileAccessMode) -> Result<u16, DosErrorCode>;
	fn close(&mut self, handle: u16) -> Result<(), DosErrorCode>;
	/// Returns the byte count read.
	fn read(&mut self, handle: u16, destination: &mut [u8]) -> Result<u16, DosErrorCode>;
	/// Returns the byte count written.
	fn write(&mut self, handle: u16, data: &[u8]) -> Result<u16, DosErrorCode>;
	/// Returns the new position within the file relative to the start.
	fn seek(&mut self, handle: u16, offset: u32, origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode>;
	fn is_open(&self, handle: u16) -> bool;
	/// Resolves a search path such as `*.DAT` and returns the first match.
	fn find_first_file(&mut self, search_spec: &[u8], attributes: u16) -> Result<DosDirectoryEntry, DosErrorCode>;
	fn find_next_file(&mut self) -> Result<DosDirectoryEntry, DosErrorCode>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DosFileAccessMode {
	ReadOnly,
	WriteOnly,
	ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DosFileSeekOrigin {
	Start,
	Current,
	End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DosDirectoryEntry {
	/// The 8.3 name, e.g. `MODULE.MSG`.
	pub name: Vec<u8>,
	pub attributes: u8,
	pub size: u32,
	pub time: u16,
	pub date: u16,
}

impl DosDirectoryEntry {
	/// The find-first/find-next result block as it is laid out in the DTA.
	pub fn to_dta_record(&self) -> [u8; DTA_RECORD_BYTES] {
		let mut record = [0u8; DTA_RECORD_BYTES];
		record[DTA_ATTRIBUTE_OFFSET] = self.attributes;
		LittleEndian::write_u16(&mut record[DTA_TIME_OFFSET..], self.time);
		LittleEndian::write_u16(&mut record[DTA_DATE_OFFSET..], self.date);
		LittleEndian::write_u32(&mut record[DTA_SIZE_OFFSET..], self.size);
		let name_len = self.name.len().min(12);
		record[DTA_NAME_OFFSET..DTA_NAME_OFFSET + name_len].copy_from_slice(&self.name[..name_len]);
		record
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DosFileName {
	title: Vec<u8>,
	ext: Vec<u8>,
}

impl DosFileName {
	fn parse(dos_filename: &[u8]) -> DosFileName {
		let (title, ext) = split_filename(dos_filename);
		DosFileName { title: title.to_ascii_uppercase(), ext: ext.unwrap_or(&[]).to_ascii_uppercase() }
	}

	fn real_dos_name(&self) -> Vec<u8> {
		let mut result = self.title.clone();
		if !self.ext.is_empty() {
			result.push(b'.');
			result.extend(&self.ext);
		}
		result
	}
}

/// Remembers which short name each host file was given so the mapping stays stable while the
/// program runs.
#[derive(Debug)]
struct DirListingCache {
	dir_path: PathBuf,
	real_to_dos_names: HashMap<String, DosFileName>,
	dos_to_real_names: HashMap<DosFileName, String>,
}

impl DirListingCache {
	fn new(dir_path: PathBuf) -> DirListingCache {
		DirListingCache {
			dir_path,
			real_to_dos_names: HashMap::new(),
			dos_to_real_names: HashMap::new(),
		}
	}

	fn get_dos_name(&mut self, real_filename: &str) -> DosFileName {
		if let Some(existing_dos_name) = self.real_to_dos_names.get(real_filename) {
			return existing_dos_name.clone();
		}
		let mut dos_name = real_to_dos_name(real_filename, None);
		let mut name_index = 1;
		while self.dos_to_real_names.contains_key(&dos_name) {
			dos_name = real_to_dos_name(real_filename, Some(name_index));
			name_index += 1;
		}
		self.dos_to_real_names.insert(dos_name.clone(), real_filename.to_string());
		self.real_to_dos_names.insert(real_filename.to_string(), dos_name.clone());
		dos_name
	}

	fn get_real_name(&mut self, dos_filename: &DosFileName) -> String {
		self.list_dir();
		if let Some(existing_real_name) = self.dos_to_real_names.get(dos_filename) {
			return existing_real_name.clone();
		}
		let real_name = String::from_utf8_lossy(&dos_filename.real_dos_name()).into_owned();
		self.dos_to_real_names.insert(dos_filename.clone(), real_name.clone());
		self.real_to_dos_names.insert(real_name.clone(), dos_filename.clone());
		real_name
	}

	/// Returns (dos name, real name) for every plain file in the directory.
	fn list_dir(&mut self) -> Vec<(DosFileName, String)> {
		let mut found = vec![];
		if let Ok(read_dir) = std::fs::read_dir(&self.dir_path) {
			let mut names: Vec<String> = read_dir
				.filter_map(|entry| entry.ok())
				.filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
				.filter_map(|entry| entry.file_name().into_string().ok())
				.collect();
			names.sort();
			for name in names {
				found.push((self.get_dos_name(&name), name));
			}
		}
		found
	}
}

fn real_to_dos_name(filename: &str, extra_index: Option<usize>) -> DosFileName {
	let ascii_name: Vec<u8> = filename
		.chars()
		.map(|c| if c.is_ascii() && c != ' ' { (c as u8).to_ascii_uppercase() } else { b'_' })
		.collect();
	let (file_title, file_ext) = split_filename(&ascii_name);
	let mut short_title = file_title.to_vec();
	short_title.truncate(8);
	let mut short_ext = file_ext.unwrap_or(&[]).to_vec();
	short_ext.truncate(3);

	if let Some(extra_index) = extra_index {
		let suffix = format!("~{}", extra_index).into_bytes();
		short_title.truncate(8 - suffix.len());
		short_title.extend(suffix);
	}

	DosFileName { title: short_title, ext: short_ext }
}

fn split_filename(filename: &[u8]) -> (&[u8], Option<&[u8]>) {
	match filename.iter().rposition(|c| *c == b'.') {
		Some(dot_pos) => {
			let after_dot = &filename[dot_pos + 1..];
			(&filename[..dot_pos], Some(&after_dot[..after_dot.len().min(3)]))
		}
		None => (filename, None),
	}
}

// `*` swallows the rest of the component; `?` matches any one character or the end of the name.
fn component_matches(text: &[u8], spec: &[u8]) -> bool {
	match spec.split_first() {
		None => text.is_empty(),
		Some((b'*', _)) => true,
		Some((b'?', rest)) => match text.split_first() {
			Some((_, text_rest)) => component_matches(text_rest, rest),
			None => rest.iter().all(|&c| c == b'?' || c == b'*'),
		},
		Some((&c, rest)) => match text.split_first() {
			Some((&t, text_rest)) => t == c && component_matches(text_rest, rest),
			None => false,
		},
	}
}

// https://ss64.com/nt/syntax-wildcards.html
fn filename_matches_spec(filename: &DosFileName, search_spec: &[u8]) -> bool {
	let spec = DosFileName::parse(search_spec);
	let has_ext = search_spec.contains(&b'.');
	component_matches(&filename.title, &spec.title) && (!has_ext || component_matches(&filename.ext, &spec.ext))
}

/// The last path component of a DOS path, e.g. `C:\BBSV6\*.MSG` becomes `*.MSG`.
fn search_file_component(path: &[u8]) -> &[u8] {
	match path.iter().rposition(|&c| c == b'\\' || c == b'/' || c == b':') {
		Some(pos) => &path[pos + 1..],
		None => path,
	}
}

/// DOS file system backed by one directory on the host.
#[derive(Debug)]
pub struct HostDosFileSystem {
	root_path: PathBuf,
	file_handles: Vec<Option<std::fs::File>>,
	dir_listing: DirListingCache,
	current_file_queue: Option<VecDeque<DosDirectoryEntry>>,
}

impl HostDosFileSystem {
	pub fn new(root_path: PathBuf) -> HostDosFileSystem {
		HostDosFileSystem {
			root_path: root_path.clone(),
			file_handles: vec![],
			current_file_queue: None,
			dir_listing: DirListingCache::new(root_path),
		}
	}

	fn get_empty_slot(&mut self) -> usize {
		match self.file_handles.iter().position(|slot| slot.is_none()) {
			Some(pos) => pos,
			None => {
				self.file_handles.push(None);
				self.file_handles.len() - 1
			}
		}
	}

	fn get_real_filepath(&mut self, filename: &[u8]) -> PathBuf {
		let dos_name = DosFileName::parse(search_file_component(filename));
		let real_name = self.dir_listing.get_real_name(&dos_name);
		self.root_path.join(real_name)
	}

	fn file_mut(&mut self, handle: u16) -> Result<&mut std::fs::File, DosErrorCode> {
		if handle < FIRST_FILE_HANDLE {
			return Err(DosErrorCode::InvalidFileHandle);
		}
		match self.file_handles.get_mut((handle - FIRST_FILE_HANDLE) as usize) {
			Some(Some(file)) => Ok(file),
			_ => Err(DosErrorCode::InvalidFileHandle),
		}
	}

	fn install(&mut self, file: std::fs::File) -> u16 {
		let slot = self.get_empty_slot();
		self.file_handles[slot] = Some(file);
		slot as u16 + FIRST_FILE_HANDLE
	}
}

fn directory_entry(name: &DosFileName, metadata: &std::fs::Metadata) -> DosDirectoryEntry {
	let modified = metadata
		.modified()
		.ok()
		.and_then(|time| time.duration_since(UNIX_EPOCH).ok())
		.map(|elapsed| date_time_from_unix(elapsed.as_secs(), 0))
		.unwrap_or_else(|| date_time_from_unix(315_532_800, 0));
	DosDirectoryEntry {
		name: name.real_dos_name(),
		attributes: if metadata.permissions().readonly() { 0x01 } else { 0x00 },
		size: metadata.len().min(u32::MAX as u64) as u32,
		time: ((modified.hour as u16) << 11) | ((modified.minute as u16) << 5) | (modified.second as u16 / 2),
		date: ((modified.year.saturating_sub(1980)) << 9) | ((modified.month as u16) << 5) | modified.day as u16,
	}
}

impl DosFileSystem for HostDosFileSystem {
	fn create(&mut self, filename: &[u8], _attributes: u16) -> Result<u16, DosErrorCode> {
		let real_filepath = self.get_real_filepath(filename);
		match std::fs::File::create(real_filepath) {
			Ok(file) => Ok(self.install(file)),
			Err(err) => Err(err.into()),
		}
	}

	fn open(&mut self, filename: &[u8], access_mode: DosFileAccessMode) -> Result<u16, DosErrorCode> {
		let real_filepath = self.get_real_filepath(filename);
		let mut open_options = std::fs::OpenOptions::new();
		open_options
			.read(access_mode != DosFileAccessMode::WriteOnly)
			.write(access_mode != DosFileAccessMode::ReadOnly);
		match open_options.open(real_filepath) {
			Ok(file) => Ok(self.install(file)),
			Err(err) => Err(err.into()),
		}
	}

	fn close(&mut self, handle: u16) -> Result<(), DosErrorCode> {
		self.file_mut(handle)?;
		self.file_handles[(handle - FIRST_FILE_HANDLE) as usize] = None;
		Ok(())
	}

	fn read(&mut self, handle: u16, destination: &mut [u8]) -> Result<u16, DosErrorCode> {
		let file = self.file_mut(handle)?;
		file.read(destination).map(|count| count as u16).map_err(DosErrorCode::from)
	}

	fn write(&mut self, handle: u16, data: &[u8]) -> Result<u16, DosErrorCode> {
		let file = self.file_mut(handle)?;
		file.write(data).map(|count| count as u16).map_err(DosErrorCode::from)
	}

	fn seek(&mut self, handle: u16, offset: u32, origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode> {
		let file = self.file_mut(handle)?;
		// Relative seeks take CX:DX as a signed distance.
		let seek_from = match origin {
			DosFileSeekOrigin::Start => std::io::SeekFrom::Start(offset as u64),
			DosFileSeekOrigin::Current => std::io::SeekFrom::Current(offset as i32 as i64),
			DosFileSeekOrigin::End => std::io::SeekFrom::End(offset as i32 as i64),
		};
		file.seek(seek_from).map(|pos| pos as u32).map_err(DosErrorCode::from)
	}

	fn is_open(&self, handle: u16) -> bool {
		handle >= FIRST_FILE_HANDLE
			&& matches!(self.file_handles.get((handle - FIRST_FILE_HANDLE) as usize), Some(Some(_)))
	}

	fn find_first_file(&mut self, search_spec: &[u8], _attributes: u16) -> Result<DosDirectoryEntry, DosErrorCode> {
		let file_spec = search_file_component(search_spec).to_ascii_uppercase();
		let mut file_queue = VecDeque::new();
		for (dos_name, real_name) in self.dir_listing.list_dir() {
			if !filename_matches_spec(&dos_name, &file_spec) {
				continue;
			}
			if let Ok(metadata) = std::fs::metadata(self.root_path.join(&real_name)) {
				file_queue.push_back(directory_entry(&dos_name, &metadata));
			}
		}
		self.current_file_queue = Some(file_queue);
		self.find_next_file()
	}

	fn find_next_file(&mut self) -> Result<DosDirectoryEntry, DosErrorCode> {
		self.current_file_queue
			.as_mut()
			.and_then(|queue| queue.pop_front())
			.ok_or(DosErrorCode::NoMoreFiles)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn scratch_dir(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join(format!("libbbshost-{}-{}", name, std::process::id()));
		std::fs::remove_dir_all(&dir).ok();
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[test]
	fn test_dir_listing_cache() {
		let mut dir_listing = DirListingCache::new(std::env::temp_dir().join("libbbshost-no-such-dir"));
		assert_eq!(dir_listing.get_dos_name("foot.text").real_dos_name(), b"FOOT.TEX".to_vec());
		assert_eq!(dir_listing.get_dos_name("foot.text2").real_dos_name(), b"FOOT~1.TEX".to_vec());
		assert_eq!(dir_listing.get_dos_name("filewithlongname.txt").real_dos_name(), b"FILEWITH.TXT".to_vec());
		assert_eq!(dir_listing.get_dos_name("filewithlongername.txt").real_dos_name(), b"FILEWI~1.TXT".to_vec());
		assert_eq!(dir_listing.get_dos_name("filewithlongerername.txt").real_dos_name(), b"FILEWI~2.TXT".to_vec());
	}

	#[test]
	fn test_wildcards() {
		let name = DosFileName::parse(b"MODULE.MSG");
		assert!(filename_matches_spec(&name, b"*.*"));
		assert!(filename_matches_spec(&name, b"*.MSG"));
		assert!(filename_matches_spec(&name, b"MOD*.M?G"));
		assert!(filename_matches_spec(&name, b"MODULE??.MSG"));
		assert!(!filename_matches_spec(&name, b"*.DAT"));
		assert!(!filename_matches_spec(&name, b"MOD.MSG"));
	}

	#[test]
	fn test_create_write_seek_read() {
		let dir = scratch_dir("rw");
		let mut fs = HostDosFileSystem::new(dir.clone());
		let handle = fs.create(b"C:\\BBSV6\\notes.txt", 0).unwrap();
		assert_eq!(handle, FIRST_FILE_HANDLE);
		assert_eq!(fs.write(handle, b"hello world").unwrap(), 11);
		assert_eq!(fs.seek(handle, 6, DosFileSeekOrigin::Start).unwrap(), 6);
		fs.close(handle).unwrap();
		assert!(!fs.is_open(handle));

		let handle = fs.open(b"NOTES.TXT", DosFileAccessMode::ReadOnly).unwrap();
		let mut buffer = [0u8; 5];
		fs.seek(handle, 6, DosFileSeekOrigin::Start).unwrap();
		assert_eq!(fs.read(handle, &mut buffer).unwrap(), 5);
		assert_eq!(&buffer, b"world");
		assert_eq!(fs.close(3), Err(DosErrorCode::InvalidFileHandle));
		assert_eq!(fs.open(b"MISSING.DAT", DosFileAccessMode::ReadOnly), Err(DosErrorCode::FileNotFound));
		std::fs::remove_dir_all(dir).ok();
	}

	#[test]
	fn test_find_first_and_next() {
		let dir = scratch_dir("find");
		std::fs::write(dir.join("alpha.msg"), b"12345").unwrap();
		std::fs::write(dir.join("beta.msg"), b"1").unwrap();
		std::fs::write(dir.join("gamma.dat"), b"").unwrap();
		let mut fs = HostDosFileSystem::new(dir.clone());

		let first = fs.find_first_file(b"*.MSG", 0).unwrap();
		assert_eq!(first.name, b"ALPHA.MSG".to_vec());
		assert_eq!(first.size, 5);
		let record = first.to_dta_record();
		assert_eq!(&record[DTA_NAME_OFFSET..DTA_NAME_OFFSET + 10], b"ALPHA.MSG\0");
		assert_eq!(fs.find_next_file().unwrap().name, b"BETA.MSG".to_vec());
		assert_eq!(fs.find_next_file(), Err(DosErrorCode::NoMoreFiles));
		assert_eq!(fs.find_first_file(b"*.EXE", 0), Err(DosErrorCode::NoMoreFiles));
		std::fs::remove_dir_all(dir).ok();
	}
}
