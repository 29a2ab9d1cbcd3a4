use crate::channel::{ChannelProjection, ChannelStore, MemoryChannelStore};
use crate::clock::{HostClock, SystemClock};
use crate::config::BridgeConfig;
use crate::config_resource::{ConfigResourceReader, ConfigResourceStack, DirectoryConfigReader, MemoryConfigReader};
use crate::console::{BufferedConsole, Console, StdConsole};
use crate::database::{DatabaseEngine, DatabaseStack, MemoryDatabaseEngine};
use crate::dos_file_system::{DosFileSystem, HostDosFileSystem};
use crate::error::{BridgeError, BridgeResult};
use crate::exports::frame::{enter_host_frame, leave_host_frame, FrameDisposition, StackArgs};
use crate::exports::{self, ExportedFunction, MODULE_NAME};
use crate::far_ptr::{FarPtr, FAR_PTR_BYTES};
use crate::memory::GuestMemory;
use crate::output_buffer::OutputBuffer;
use crate::registers::Registers;
use crate::segment_allocator::SegmentAllocator;

use log::{debug, trace};

use std::collections::HashMap;

const DTA_BYTES: u16 = 128;

/// One SHOCST entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
	pub summary: String,
	pub detail: String,
}

/// Everything outside the bridge that it talks to.
#[derive(Debug)]
pub struct BridgeCollaborators {
	pub console: Box<dyn Console>,
	pub clock: Box<dyn HostClock>,
	pub file_system: Box<dyn DosFileSystem>,
	pub config_reader: Box<dyn ConfigResourceReader>,
	pub database_engine: Box<dyn DatabaseEngine>,
	pub channel_store: Box<dyn ChannelStore>,
}

impl BridgeCollaborators {
	/// Process stdio, the system clock, and files and resources under `file_root`.
	pub fn host(config: &BridgeConfig) -> BridgeCollaborators {
		BridgeCollaborators {
			console: Box::new(StdConsole),
			clock: Box::new(SystemClock),
			file_system: Box::new(HostDosFileSystem::new(config.file_root.clone())),
			config_reader: Box::new(DirectoryConfigReader::new(config.file_root.clone())),
			database_engine: Box::new(MemoryDatabaseEngine::new()),
			channel_store: Box::new(MemoryChannelStore::new()),
		}
	}

	/// Nothing touches the disk or the terminal except DOS file calls, which go under `file_root`.
	pub fn in_memory(config: &BridgeConfig) -> BridgeCollaborators {
		BridgeCollaborators {
			console: Box::new(BufferedConsole::default()),
			clock: Box::new(SystemClock),
			file_system: Box::new(HostDosFileSystem::new(config.file_root.clone())),
			config_reader: Box::new(MemoryConfigReader::new()),
			database_engine: Box::new(MemoryDatabaseEngine::new()),
			channel_store: Box::new(MemoryChannelStore::new()),
		}
	}
}

/// The host side of a running BBS module: guest memory, the DOS and MAJORBBS services, and the
/// per-turn channel projection. One bridge serves every channel, one turn at a time.
#[derive(Debug)]
pub struct HostBridge {
	pub(crate) config: BridgeConfig,
	pub(crate) memory: GuestMemory,
	pub(crate) console: Box<dyn Console>,
	pub(crate) clock: Box<dyn HostClock>,
	pub(crate) file_system: Box<dyn DosFileSystem>,
	pub(crate) config_reader: Box<dyn ConfigResourceReader>,
	pub(crate) database_engine: Box<dyn DatabaseEngine>,
	pub(crate) channel_store: Box<dyn ChannelStore>,
	functions: HashMap<u16, &'static ExportedFunction>,
	pub(crate) interrupt_vectors: [FarPtr; 256],
	pub(crate) disk_transfer_area: FarPtr,
	pub(crate) program_segment_prefix: Option<u16>,
	pub(crate) exit_code: Option<u8>,
	pub(crate) output: OutputBuffer,
	pub(crate) resources: ConfigResourceStack,
	pub(crate) databases: DatabaseStack,
	pub(crate) channels: ChannelProjection,
	pub(crate) audit_trail: Vec<AuditEntry>,
	rng_state: u32,
}

impl HostBridge {
	pub fn new(config: BridgeConfig, collaborators: BridgeCollaborators) -> BridgeResult<HostBridge> {
		config.validate()?;
		let mut memory = GuestMemory::new(config.arena_start_segment, config.arena_end_segment);
		memory.allocator_mut().set_strategy(config.allocation_strategy);

		let disk_transfer_area = memory.allocate_variable("DTA", DTA_BYTES)?;
		let output = OutputBuffer::new(&mut memory)?;
		let prfbuf = memory.allocate_variable("PRFBUF", FAR_PTR_BYTES as u16)?;
		memory.write_far_ptr(prfbuf, output.buffer())?;
		let channels = ChannelProjection::new(&mut memory, config.channel_count)?;

		// xorshift must not start from zero.
		let rng_state = collaborators.clock.now().ticks_since_midnight() | 1;
		debug!("Host bridge ready: {} channels, arena {:04X}..{:04X}", config.channel_count, config.arena_start_segment, config.arena_end_segment);

		Ok(HostBridge {
			config,
			memory,
			console: collaborators.console,
			clock: collaborators.clock,
			file_system: collaborators.file_system,
			config_reader: collaborators.config_reader,
			database_engine: collaborators.database_engine,
			channel_store: collaborators.channel_store,
			functions: exports::function_table(),
			interrupt_vectors: [FarPtr::NULL; 256],
			disk_transfer_area,
			program_segment_prefix: None,
			exit_code: None,
			output,
			resources: ConfigResourceStack::new(),
			databases: DatabaseStack::new(),
			channels,
			audit_trail: vec![],
			rng_state,
		})
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.config
	}

	pub fn memory(&self) -> &GuestMemory {
		&self.memory
	}

	pub fn memory_mut(&mut self) -> &mut GuestMemory {
		&mut self.memory
	}

	pub fn allocator(&self) -> &SegmentAllocator {
		self.memory.allocator()
	}

	pub fn output(&self) -> &OutputBuffer {
		&self.output
	}

	pub fn resources(&self) -> &ConfigResourceStack {
		&self.resources
	}

	pub fn databases(&self) -> &DatabaseStack {
		&self.databases
	}

	pub fn channel_store(&self) -> &dyn ChannelStore {
		self.channel_store.as_ref()
	}

	pub fn channel_store_mut(&mut self) -> &mut dyn ChannelStore {
		self.channel_store.as_mut()
	}

	pub fn audit_trail(&self) -> &[AuditEntry] {
		&self.audit_trail
	}

	pub fn disk_transfer_area(&self) -> FarPtr {
		self.disk_transfer_area
	}

	pub fn interrupt_vector(&self, interrupt: u8) -> FarPtr {
		self.interrupt_vectors[interrupt as usize]
	}

	/// Set by the loader when the program is an EXE with a PSP.
	pub fn set_program_segment_prefix(&mut self, segment: u16) {
		self.program_segment_prefix = Some(segment);
	}

	/// The code passed to INT 21h/4Ch, once the guest has exited.
	pub fn exit_code(&self) -> Option<u8> {
		self.exit_code
	}

	/// Link-time target for an imported function: the host segment with the ordinal as offset.
	pub fn resolve_import(&self, ordinal: u16) -> FarPtr {
		if !self.functions.contains_key(&ordinal) {
			debug!("Import of unported {} ordinal {}", MODULE_NAME, ordinal);
		}
		FarPtr::host(ordinal)
	}

	/// Link-time address of an imported variable.
	pub fn resolve_variable(&self, ordinal: u16) -> BridgeResult<FarPtr> {
		exports::variable_name(ordinal)
			.and_then(|name| self.memory.variable(name))
			.ok_or(BridgeError::UnknownVariable(ordinal))
	}

	/// Called by the executor after a far call into the host segment has pushed the return address.
	/// On return CS:IP and SP are back in the caller.
	pub fn invoke(&mut self, regs: &mut Registers, target: FarPtr) -> BridgeResult<()> {
		if !target.is_host() {
			return Err(BridgeError::NotHostTarget(target));
		}
		self.invoke_ordinal(regs, target.offset)
	}

	pub fn invoke_ordinal(&mut self, regs: &mut Registers, ordinal: u16) -> BridgeResult<()> {
		let function = *self
			.functions
			.get(&ordinal)
			.ok_or(BridgeError::UnknownOrdinal { module: MODULE_NAME, ordinal })?;
		trace!("{} {} ({})", MODULE_NAME, function.name, ordinal);
		enter_host_frame(regs, &mut self.memory)?;
		let args = StackArgs::new(regs);
		match (function.routine)(self, regs, args)? {
			FrameDisposition::Retain => leave_host_frame(regs, &self.memory),
			FrameDisposition::Unwound => Ok(()),
		}
	}

	pub fn activate_channel(&mut self, channel: u16) -> BridgeResult<()> {
		let input_status = self.config.input_status;
		self.channels.activate(&mut self.memory, self.channel_store.as_ref(), channel, input_status)
	}

	/// Writes the active channel back and returns its number.
	pub fn deactivate_channel(&mut self) -> BridgeResult<u16> {
		let idle_status = self.config.idle_status;
		self.channels.deactivate(&mut self.memory, self.channel_store.as_mut(), idle_status)
	}

	pub fn active_channel(&self) -> Option<u16> {
		self.channels.active_channel()
	}

	/// Projects `channel`, runs the guest's turn, and writes the channel back even when the turn
	/// fails. The turn's error wins over a write-back error.
	pub fn run_turn<T, F>(&mut self, channel: u16, turn: F) -> BridgeResult<T>
	where
		F: FnOnce(&mut HostBridge) -> BridgeResult<T>,
	{
		self.activate_channel(channel)?;
		let result = turn(self);
		let written_back = self.deactivate_channel();
		let value = result?;
		written_back?;
		Ok(value)
	}

	// https://en.wikipedia.org/wiki/Xorshift
	pub(crate) fn next_random(&mut self) -> u32 {
		let mut x = self.rng_state;
		x ^= x << 13;
		x ^= x >> 17;
		x ^= x << 5;
		self.rng_state = x;
		x
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::channel::Session;
	use crate::clock::{date_time_from_unix, FixedClock};
	use crate::config_resource::MemoryConfigResource;
	use crate::exports::frame::tests::{far_call, RETURN_CS, RETURN_IP, STACK_TOP};
	use crate::registers::Reg;

	fn bridge_with(config_reader: MemoryConfigReader) -> (HostBridge, BufferedConsole) {
		let config = BridgeConfig { channel_count: 4, ..BridgeConfig::default() };
		let console = BufferedConsole::default();
		let mut store = MemoryChannelStore::new();
		for channel in 0..4 {
			store.insert(channel, Session { status: 5, ..Session::default() });
		}
		let mut collaborators = BridgeCollaborators::in_memory(&config);
		collaborators.console = Box::new(console.clone());
		collaborators.clock = Box::new(FixedClock(date_time_from_unix(951_831_930, 0)));
		collaborators.config_reader = Box::new(config_reader);
		collaborators.channel_store = Box::new(store);
		(HostBridge::new(config, collaborators).unwrap(), console)
	}

	fn call(bridge: &mut HostBridge, regs: &mut Registers, ordinal: u16, arguments: &[u16]) -> BridgeResult<()> {
		far_call(regs, &mut bridge.memory, arguments);
		bridge.invoke(regs, FarPtr::host(ordinal))
	}

	fn guest_string(bridge: &mut HostBridge, offset: u16, text: &[u8]) -> FarPtr {
		let ptr = FarPtr::new(0x0900, offset);
		bridge.memory.write_cstring(ptr, text).unwrap();
		ptr
	}

	#[test]
	fn test_bridge_can_move_between_threads() {
		fn assert_send<T: Send>() {}
		assert_send::<HostBridge>();
	}

	#[test]
	fn test_invoke_returns_to_the_caller() {
		let (mut bridge, _) = bridge_with(MemoryConfigReader::new());
		let mut regs = Registers::new();
		call(&mut bridge, &mut regs, 68, &[100]).unwrap();
		let block = FarPtr::new(regs.dx, regs.ax);
		assert!(!block.is_null());
		assert_eq!(block.offset, 0);
		assert_eq!((regs.cs, regs.ip, regs.sp), (RETURN_CS, RETURN_IP, STACK_TOP - 2));
	}

	#[test]
	fn test_unknown_ordinal_is_fatal() {
		let (mut bridge, _) = bridge_with(MemoryConfigReader::new());
		let mut regs = Registers::new();
		let err = call(&mut bridge, &mut regs, 9999, &[]).unwrap_err();
		assert!(matches!(err, BridgeError::UnknownOrdinal { ordinal: 9999, .. }));
		assert!(matches!(bridge.invoke(&mut regs, FarPtr::new(0x1234, 68)), Err(BridgeError::NotHostTarget(_))));
		assert_eq!(bridge.resolve_import(9999), FarPtr::new(0xffff, 9999));
	}

	#[test]
	fn test_long_division_unwinds_its_own_frame() {
		let (mut bridge, _) = bridge_with(MemoryConfigReader::new());
		let mut regs = Registers::new();
		// -100000 / 7
		let dividend = (-100_000i32) as u32;
		call(&mut bridge, &mut regs, 655, &[dividend as u16, (dividend >> 16) as u16, 7, 0]).unwrap();
		assert_eq!(regs.get_reg_pair(Reg::DX, Reg::AX) as i32, -14285);
		assert_eq!((regs.cs, regs.ip, regs.sp), (RETURN_CS, RETURN_IP, STACK_TOP));

		call(&mut bridge, &mut regs, 658, &[100, 0, 7, 0]).unwrap();
		assert_eq!(regs.get_reg_pair(Reg::DX, Reg::AX), 2);
		let err = call(&mut bridge, &mut regs, 657, &[1, 0, 0, 0]).unwrap_err();
		assert!(matches!(err, BridgeError::DivideByZero("LUDIV")));

		regs.set_reg_pair(Reg::DX, Reg::AX, 70_000);
		regs.set_reg_pair(Reg::CX, Reg::BX, 3);
		call(&mut bridge, &mut regs, 654, &[]).unwrap();
		assert_eq!(regs.get_reg_pair(Reg::DX, Reg::AX), 210_000);
	}

	#[test]
	fn test_prf_and_outprf() {
		let (mut bridge, _) = bridge_with(MemoryConfigReader::new());
		let mut regs = Registers::new();
		let format = guest_string(&mut bridge, 0x0000, b"Hi %s, you have %d credits.\r\n");
		let name = guest_string(&mut bridge, 0x0100, b"Sysop");
		call(&mut bridge, &mut regs, 474, &[format.offset, format.segment, name.offset, name.segment, 42]).unwrap();
		assert_eq!(bridge.output().cursor(), 32);
		call(&mut bridge, &mut regs, 463, &[2]).unwrap();
		assert_eq!(bridge.output().cursor(), 0);
		assert_eq!(bridge.channel_store().session(2).unwrap().outbound, b"Hi Sysop, you have 42 credits.\r\n".to_vec());
		assert!(bridge.channel_store().session(1).unwrap().outbound.is_empty());
	}

	#[test]
	fn test_message_options() {
		let mut reader = MemoryConfigReader::new();
		reader.insert(MemoryConfigResource::new("GAME.MCV").with(1, b"15").with(2, b"Welcome, %s!").with(3, b"N"));
		let (mut bridge, _) = bridge_with(reader);
		let mut regs = Registers::new();
		let name = guest_string(&mut bridge, 0x0000, b"GAME.MCV");
		call(&mut bridge, &mut regs, 456, &[name.offset, name.segment]).unwrap();
		let handle = FarPtr::new(regs.dx, regs.ax);
		assert!(handle.is_host());

		call(&mut bridge, &mut regs, 441, &[1, 0, 20]).unwrap();
		assert_eq!(regs.ax, 15);
		call(&mut bridge, &mut regs, 650, &[3]).unwrap();
		assert_eq!(regs.ax, 0);
		let err = call(&mut bridge, &mut regs, 441, &[1, 0, 10]).unwrap_err();
		assert!(matches!(err, BridgeError::OptionOutOfBounds { value: 15, .. }));

		call(&mut bridge, &mut regs, 543, &[0x1230, 0x0900]).unwrap();
		assert_eq!(regs.ax, 0xffff);
		assert_eq!(bridge.resources().current_handle(), handle);

		let user = guest_string(&mut bridge, 0x0100, b"Sysop");
		call(&mut bridge, &mut regs, 475, &[2, user.offset, user.segment]).unwrap();
		assert_eq!(bridge.memory().read_cstring(bridge.output().buffer(), false).unwrap(), b"Welcome, Sysop!".to_vec());
	}

	#[test]
	fn test_variables_resolve_into_the_host_segment() {
		let (mut bridge, _) = bridge_with(MemoryConfigReader::new());
		let nterms = bridge.resolve_variable(440).unwrap();
		assert!(nterms.is_host());
		assert_eq!(bridge.memory().read_u16(nterms).unwrap(), 4);
		let prfbuf = bridge.resolve_variable(473).unwrap();
		assert_eq!(bridge.memory().read_far_ptr(prfbuf).unwrap(), bridge.output().buffer());
		assert!(matches!(bridge.resolve_variable(1), Err(BridgeError::UnknownVariable(1))));

		bridge.activate_channel(2).unwrap();
		let usrnum = bridge.resolve_variable(636).unwrap();
		assert_eq!(bridge.memory().read_u16(usrnum).unwrap(), 2);
		bridge.deactivate_channel().unwrap();
	}

	#[test]
	fn test_run_turn_writes_back_after_a_failed_turn() {
		let (mut bridge, _) = bridge_with(MemoryConfigReader::new());
		let result: BridgeResult<()> = bridge.run_turn(1, |bridge| {
			let status = bridge.resolve_variable(565)?;
			bridge.memory_mut().write_u16(status, 9)?;
			Err(BridgeError::GuestCatastrophe("boom".into()))
		});
		assert!(matches!(result, Err(BridgeError::GuestCatastrophe(_))));
		assert_eq!(bridge.active_channel(), None);
		assert_eq!(bridge.channel_store().session(1).unwrap().status, 9);
	}

	#[test]
	fn test_shocst_keeps_both_strings() {
		let (mut bridge, _) = bridge_with(MemoryConfigReader::new());
		let mut regs = Registers::new();
		let summary = guest_string(&mut bridge, 0x0000, b"GAME: WON");
		let detail = guest_string(&mut bridge, 0x0100, b"Sysop won 500 credits");
		call(&mut bridge, &mut regs, 550, &[summary.offset, summary.segment, detail.offset, detail.segment]).unwrap();
		assert_eq!(
			bridge.audit_trail(),
			&[AuditEntry { summary: "GAME: WON".into(), detail: "Sysop won 500 credits".into() }]
		);
	}

	#[test]
	fn test_runtime_helpers() {
		let (mut bridge, _) = bridge_with(MemoryConfigReader::new());
		let mut regs = Registers::new();
		for _ in 0..50 {
			call(&mut bridge, &mut regs, 324, &[10, 12]).unwrap();
			assert!((10..=12).contains(&regs.ax));
		}
		call(&mut bridge, &mut regs, 561, &[1234]).unwrap();
		assert_eq!(regs.sp, STACK_TOP - 2);

		let first = guest_string(&mut bridge, 0x0000, b"Hello");
		let second = guest_string(&mut bridge, 0x0100, b"hELLO");
		call(&mut bridge, &mut regs, 520, &[first.offset, first.segment, second.offset, second.segment]).unwrap();
		assert_eq!(regs.ax, 1);

		let destination = FarPtr::new(0x0900, 0x0200);
		bridge.memory.fill(destination, 8, b'x').unwrap();
		call(&mut bridge, &mut regs, 589, &[destination.offset, destination.segment, first.offset, first.segment, 4]).unwrap();
		assert_eq!(bridge.memory().read(destination, 6).unwrap(), b"Hel\0xx");
		assert_eq!(FarPtr::new(regs.dx, regs.ax), destination);

		let message = guest_string(&mut bridge, 0x0300, b"bad file %d");
		let err = call(&mut bridge, &mut regs, 84, &[message.offset, message.segment, 3]).unwrap_err();
		assert!(matches!(err, BridgeError::GuestCatastrophe(ref text) if text == "bad file 3"));
	}
}
