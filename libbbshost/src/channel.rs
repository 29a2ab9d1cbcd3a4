use crate::error::{BridgeError, BridgeResult};
use crate::far_ptr::{FarPtr, FAR_PTR_BYTES};
use crate::memory::GuestMemory;
use crate::segment_allocator::PARAGRAPH_BYTES;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use std::collections::BTreeMap;

pub const USER_RECORD_BYTES: usize = 41;
pub const ACCOUNT_RECORD_BYTES: usize = 338;
pub const INPUT_BUFFER_BYTES: usize = 256;
pub const MAX_INPUT_WORDS: usize = 50;
const USERID_BYTES: usize = 30;
const PASSWORD_OFFSET: usize = 30;
const PASSWORD_BYTES: usize = 10;

/// The per-channel `struct user` guest code sees in the `user` array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRecord {
	pub class: u16,
	pub keys: FarPtr,
	pub state: u16,
	pub substt: u16,
	pub lofstt: u16,
	pub usetmr: u16,
	pub minut4: u16,
	pub countr: u16,
	pub pfnacc: u16,
	pub flags: u32,
	pub baud: u16,
	pub crdrat: u16,
	pub nazapc: u16,
	pub linlim: u16,
	pub clsptr: FarPtr,
	pub polrou: FarPtr,
	pub lcstat: u8,
}

impl UserRecord {
	pub fn encode(&self) -> [u8; USER_RECORD_BYTES] {
		let mut bytes = [0u8; USER_RECORD_BYTES];
		LittleEndian::write_u16(&mut bytes[0..], self.class);
		bytes[2..6].copy_from_slice(&self.keys.encode());
		LittleEndian::write_u16(&mut bytes[6..], self.state);
		LittleEndian::write_u16(&mut bytes[8..], self.substt);
		LittleEndian::write_u16(&mut bytes[10..], self.lofstt);
		LittleEndian::write_u16(&mut bytes[12..], self.usetmr);
		LittleEndian::write_u16(&mut bytes[14..], self.minut4);
		LittleEndian::write_u16(&mut bytes[16..], self.countr);
		LittleEndian::write_u16(&mut bytes[18..], self.pfnacc);
		LittleEndian::write_u32(&mut bytes[20..], self.flags);
		LittleEndian::write_u16(&mut bytes[24..], self.baud);
		LittleEndian::write_u16(&mut bytes[26..], self.crdrat);
		LittleEndian::write_u16(&mut bytes[28..], self.nazapc);
		LittleEndian::write_u16(&mut bytes[30..], self.linlim);
		bytes[32..36].copy_from_slice(&self.clsptr.encode());
		bytes[36..40].copy_from_slice(&self.polrou.encode());
		bytes[40] = self.lcstat;
		bytes
	}

	pub fn decode(bytes: &[u8]) -> UserRecord {
		UserRecord {
			class: LittleEndian::read_u16(&bytes[0..]),
			keys: FarPtr::decode(&bytes[2..6]),
			state: LittleEndian::read_u16(&bytes[6..]),
			substt: LittleEndian::read_u16(&bytes[8..]),
			lofstt: LittleEndian::read_u16(&bytes[10..]),
			usetmr: LittleEndian::read_u16(&bytes[12..]),
			minut4: LittleEndian::read_u16(&bytes[14..]),
			countr: LittleEndian::read_u16(&bytes[16..]),
			pfnacc: LittleEndian::read_u16(&bytes[18..]),
			flags: LittleEndian::read_u32(&bytes[20..]),
			baud: LittleEndian::read_u16(&bytes[24..]),
			crdrat: LittleEndian::read_u16(&bytes[26..]),
			nazapc: LittleEndian::read_u16(&bytes[28..]),
			linlim: LittleEndian::read_u16(&bytes[30..]),
			clsptr: FarPtr::decode(&bytes[32..36]),
			polrou: FarPtr::decode(&bytes[36..40]),
			lcstat: bytes[40],
		}
	}
}

/// The `usracc` account record. Only the user id and password are interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
	bytes: Vec<u8>,
}

impl AccountRecord {
	pub fn new(userid: &[u8], password: &[u8]) -> AccountRecord {
		let mut bytes = vec![0u8; ACCOUNT_RECORD_BYTES];
		let userid_len = userid.len().min(USERID_BYTES - 1);
		bytes[..userid_len].copy_from_slice(&userid[..userid_len]);
		let password_len = password.len().min(PASSWORD_BYTES - 1);
		bytes[PASSWORD_OFFSET..PASSWORD_OFFSET + password_len].copy_from_slice(&password[..password_len]);
		AccountRecord { bytes }
	}

	pub fn from_bytes(bytes: &[u8]) -> AccountRecord {
		let mut bytes = bytes.to_vec();
		bytes.resize(ACCOUNT_RECORD_BYTES, 0);
		AccountRecord { bytes }
	}

	pub fn bytes(&self) -> &[u8] {
		&self.bytes
	}

	pub fn userid(&self) -> &[u8] {
		let field = &self.bytes[..USERID_BYTES];
		let len = field.iter().position(|&b| b == 0).unwrap_or(USERID_BYTES);
		&field[..len]
	}
}

impl Default for AccountRecord {
	fn default() -> AccountRecord {
		AccountRecord::new(b"", b"")
	}
}

/// Authoritative state of one connected channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
	pub status: u16,
	pub user: UserRecord,
	pub account: AccountRecord,
	/// The last line received, without its line ending.
	pub input: Vec<u8>,
	/// Bytes waiting to be sent to the user.
	pub outbound: Vec<u8>,
}

pub trait ChannelStore: std::fmt::Debug + Send {
	fn session(&self, channel: u16) -> Option<&Session>;
	fn session_mut(&mut self, channel: u16) -> Option<&mut Session>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryChannelStore {
	sessions: BTreeMap<u16, Session>,
}

impl MemoryChannelStore {
	pub fn new() -> MemoryChannelStore {
		MemoryChannelStore::default()
	}

	pub fn insert(&mut self, channel: u16, session: Session) {
		self.sessions.insert(channel, session);
	}
}

impl ChannelStore for MemoryChannelStore {
	fn session(&self, channel: u16) -> Option<&Session> {
		self.sessions.get(&channel)
	}

	fn session_mut(&mut self, channel: u16) -> Option<&mut Session> {
		self.sessions.get_mut(&channel)
	}
}

#[derive(Debug, Clone, Copy)]
struct ActiveChannel {
	channel: u16,
	projected_status: u16,
}

/// Host-store slots backing the exported session variables.
#[derive(Debug, Clone, Copy)]
struct SessionVariables {
	usrnum: FarPtr,
	status: FarPtr,
	usrptr: FarPtr,
	usaptr: FarPtr,
	input: FarPtr,
	inplen: FarPtr,
	margc: FarPtr,
	margv: FarPtr,
	margn: FarPtr,
}

fn allocate_array(memory: &mut GuestMemory, bytes: usize, purpose: &'static str) -> BridgeResult<FarPtr> {
	let paragraphs = ((bytes as u32 + PARAGRAPH_BYTES - 1) / PARAGRAPH_BYTES) as u16;
	memory
		.allocator_mut()
		.allocate(paragraphs)
		.ok_or(BridgeError::GuestMemoryExhausted { paragraphs, purpose })
}

/// Mirrors the active channel's session into the guest arrays and variables, and copies it back
/// once the guest's turn is over. At most one channel is projected at a time.
#[derive(Debug)]
pub struct ChannelProjection {
	channel_count: u16,
	user_array: FarPtr,
	account_array: FarPtr,
	variables: SessionVariables,
	active: Option<ActiveChannel>,
}

impl ChannelProjection {
	pub fn new(memory: &mut GuestMemory, channel_count: u16) -> BridgeResult<ChannelProjection> {
		let count = channel_count as usize;
		let user_array = allocate_array(memory, count * USER_RECORD_BYTES, "user array")?;
		let account_array = allocate_array(memory, count * ACCOUNT_RECORD_BYTES, "account array")?;
		let channel_array = allocate_array(memory, count * 2, "channel array")?;
		for channel in 0..channel_count {
			memory.write_u16(channel_array.offset_by(channel * 2), channel)?;
		}

		let user = memory.allocate_variable("USER", FAR_PTR_BYTES as u16)?;
		memory.write_far_ptr(user, user_array)?;
		let usracc = memory.allocate_variable("USRACC", FAR_PTR_BYTES as u16)?;
		memory.write_far_ptr(usracc, account_array)?;
		let channel = memory.allocate_variable("CHANNEL", FAR_PTR_BYTES as u16)?;
		memory.write_far_ptr(channel, channel_array)?;
		let nterms = memory.allocate_variable("NTERMS", 2)?;
		memory.write_u16(nterms, channel_count)?;

		let variables = SessionVariables {
			usrnum: memory.allocate_variable("USRNUM", 2)?,
			status: memory.allocate_variable("STATUS", 2)?,
			usrptr: memory.allocate_variable("USRPTR", FAR_PTR_BYTES as u16)?,
			usaptr: memory.allocate_variable("USAPTR", FAR_PTR_BYTES as u16)?,
			input: memory.allocate_variable("INPUT", INPUT_BUFFER_BYTES as u16)?,
			inplen: memory.allocate_variable("INPLEN", 2)?,
			margc: memory.allocate_variable("MARGC", 2)?,
			margv: memory.allocate_variable("MARGV", (MAX_INPUT_WORDS * FAR_PTR_BYTES) as u16)?,
			margn: memory.allocate_variable("MARGN", (MAX_INPUT_WORDS * FAR_PTR_BYTES) as u16)?,
		};
		debug!("Channel arrays: user {}, account {}, channel {}", user_array, account_array, channel_array);
		Ok(ChannelProjection { channel_count, user_array, account_array, variables, active: None })
	}

	pub fn active_channel(&self) -> Option<u16> {
		self.active.map(|active| active.channel)
	}

	pub fn user_record(&self, channel: u16) -> FarPtr {
		self.user_array.offset_by(channel.wrapping_mul(USER_RECORD_BYTES as u16))
	}

	pub fn account_record(&self, channel: u16) -> FarPtr {
		self.account_array.offset_by(channel.wrapping_mul(ACCOUNT_RECORD_BYTES as u16))
	}

	pub fn activate(&mut self, memory: &mut GuestMemory, store: &dyn ChannelStore, channel: u16, input_status: u16) -> BridgeResult<()> {
		if let Some(active) = self.active {
			return Err(BridgeError::ChannelAlreadyActive { active: active.channel, requested: channel });
		}
		if channel >= self.channel_count {
			return Err(BridgeError::UnknownChannel(channel));
		}
		let session = store.session(channel).ok_or(BridgeError::UnknownChannel(channel))?;

		let user_record = self.user_record(channel);
		let account_record = self.account_record(channel);
		memory.write(user_record, &session.user.encode())?;
		memory.write(account_record, session.account.bytes())?;
		memory.write_u16(self.variables.usrnum, channel)?;
		memory.write_u16(self.variables.status, session.status)?;
		memory.write_far_ptr(self.variables.usrptr, user_record)?;
		memory.write_far_ptr(self.variables.usaptr, account_record)?;

		if session.status == input_status {
			let len = session.input.len().min(INPUT_BUFFER_BYTES - 1);
			if len < session.input.len() {
				warn!("Channel {} input of {} bytes cut to {}", channel, session.input.len(), len);
			}
			memory.write_cstring(self.variables.input, &session.input[..len])?;
			memory.write_u16(self.variables.inplen, len as u16)?;
			self.parse_input(memory)?;
		} else {
			memory.write_u8(self.variables.input, 0)?;
			memory.write_u16(self.variables.inplen, 0)?;
			memory.write_u16(self.variables.margc, 0)?;
		}

		debug!("Channel {} active with status {}", channel, session.status);
		self.active = Some(ActiveChannel { channel, projected_status: session.status });
		Ok(())
	}

	/// Copies the guest's view back into the store and returns the channel that was active.
	pub fn deactivate(&mut self, memory: &mut GuestMemory, store: &mut dyn ChannelStore, idle_status: u16) -> BridgeResult<u16> {
		let active = self.active.take().ok_or(BridgeError::NoActiveChannel)?;
		let channel = active.channel;
		let user = UserRecord::decode(memory.read(self.user_record(channel), USER_RECORD_BYTES)?);
		let account = AccountRecord::from_bytes(memory.read(self.account_record(channel), ACCOUNT_RECORD_BYTES)?);
		let status = memory.read_u16(self.variables.status)?;
		let status = if status == active.projected_status { idle_status } else { status };

		let session = store.session_mut(channel).ok_or(BridgeError::UnknownChannel(channel))?;
		session.user = user;
		session.account = account;
		session.status = status;
		debug!("Channel {} written back with status {}", channel, status);
		Ok(channel)
	}

	/// Splits `input` into words in place: each word gets a NUL after it, `margv[i]` points at its
	/// first byte and `margn[i]` at that NUL. Returns the word count.
	pub fn parse_input(&self, memory: &mut GuestMemory) -> BridgeResult<u16> {
		let inplen = (memory.read_u16(self.variables.inplen)? as usize).min(INPUT_BUFFER_BYTES - 1);
		let text = memory.read(self.variables.input, inplen)?.to_vec();
		let is_separator = |c: u8| c == b' ' || c == 0;

		let mut count = 0usize;
		let mut pos = 0usize;
		while count < MAX_INPUT_WORDS {
			while pos < text.len() && is_separator(text[pos]) {
				pos += 1;
			}
			if pos >= text.len() {
				break;
			}
			let start = pos;
			while pos < text.len() && !is_separator(text[pos]) {
				pos += 1;
			}
			let slot = (count * FAR_PTR_BYTES) as u16;
			memory.write_far_ptr(self.variables.margv.offset_by(slot), self.variables.input.offset_by(start as u16))?;
			memory.write_far_ptr(self.variables.margn.offset_by(slot), self.variables.input.offset_by(pos as u16))?;
			memory.write_u8(self.variables.input.offset_by(pos as u16), 0)?;
			count += 1;
		}
		memory.write_u16(self.variables.margc, count as u16)?;
		Ok(count as u16)
	}

	/// Undoes `parse_input`: every NUL inside the first `inplen` bytes of `input` becomes a space again.
	pub fn restore_input(&self, memory: &mut GuestMemory) -> BridgeResult<()> {
		let inplen = (memory.read_u16(self.variables.inplen)? as usize).min(INPUT_BUFFER_BYTES - 1);
		let text = memory.read(self.variables.input, inplen)?.to_vec();
		for (pos, _) in text.iter().enumerate().filter(|&(_, &c)| c == 0) {
			memory.write_u8(self.variables.input.offset_by(pos as u16), b' ')?;
		}
		Ok(())
	}
}
