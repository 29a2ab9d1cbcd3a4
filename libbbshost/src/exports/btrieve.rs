use super::frame::{FrameDisposition, StackArgs};
use super::{return_far_ptr, return_word};
use crate::bridge::HostBridge;
use crate::database::{KeyOperation, StepOperation};
use crate::error::{BridgeError, BridgeResult};
use crate::far_ptr::FarPtr;
use crate::registers::Registers;

use log::trace;

fn store_record(bridge: &mut HostBridge, regs: &mut Registers, destination: FarPtr, record: Option<Vec<u8>>) -> BridgeResult<()> {
	match record {
		Some(record) => {
			if !destination.is_null() {
				bridge.memory.write(destination, &record)?;
			}
			return_word(regs, 1);
		}
		None => return_word(regs, 0),
	}
	Ok(())
}

fn load_record(bridge: &mut HostBridge, source: FarPtr) -> BridgeResult<Vec<u8>> {
	let record_length = bridge.databases.current()?.record_length();
	Ok(bridge.memory.read(source, record_length as usize)?.to_vec())
}

pub(super) fn opnbtv(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let name = args.far_ptr(&bridge.memory, 0)?;
	let record_length = args.word(&bridge.memory, 2)?;
	let name = String::from_utf8_lossy(&bridge.memory.read_cstring(name, false)?).into_owned();
	let handle = bridge.databases.open(&mut bridge.memory, bridge.database_engine.as_mut(), &name, record_length)?;
	return_far_ptr(regs, handle);
	Ok(FrameDisposition::Retain)
}

pub(super) fn setbtv(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let handle = args.far_ptr(&bridge.memory, 0)?;
	bridge.databases.set_current(handle)?;
	Ok(FrameDisposition::Retain)
}

pub(super) fn rstbtv(bridge: &mut HostBridge, _regs: &mut Registers, _args: StackArgs) -> BridgeResult<FrameDisposition> {
	bridge.databases.restore();
	Ok(FrameDisposition::Retain)
}

pub(super) fn clsbtv(bridge: &mut HostBridge, _regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let handle = args.far_ptr(&bridge.memory, 0)?;
	bridge.databases.close(&mut bridge.memory, handle)?;
	Ok(FrameDisposition::Retain)
}

pub(super) fn stpbtv(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let destination = args.far_ptr(&bridge.memory, 0)?;
	let operation = StepOperation::from_btrieve(args.word(&bridge.memory, 2)?)?;
	let record = bridge.databases.current()?.step(operation);
	trace!("STPBTV {:?} found: {}", operation, record.is_some());
	store_record(bridge, regs, destination, record)?;
	Ok(FrameDisposition::Retain)
}

pub(super) fn obtbtv(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let destination = args.far_ptr(&bridge.memory, 0)?;
	let key_ptr = args.far_ptr(&bridge.memory, 2)?;
	let keynum = args.word(&bridge.memory, 4)?;
	let operation = KeyOperation::from_btrieve(args.word(&bridge.memory, 5)?)?;

	let (database, key_length) = {
		let file = bridge.databases.current()?;
		(file.name().to_string(), file.key_length(keynum))
	};
	let key_length = key_length.ok_or(BridgeError::UnknownDatabaseKey { database, keynum })?;
	let key = if operation.needs_key() {
		bridge.memory.read(key_ptr, key_length as usize)?.to_vec()
	} else {
		vec![]
	};
	let record = bridge.databases.current()?.get_by_key(keynum, &key, operation);
	trace!("OBTBTV {:?} on key {} found: {}", operation, keynum, record.is_some());
	store_record(bridge, regs, destination, record)?;
	Ok(FrameDisposition::Retain)
}

pub(super) fn insbtv(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let source = args.far_ptr(&bridge.memory, 0)?;
	let record = load_record(bridge, source)?;
	let inserted = bridge.databases.current()?.insert(&record);
	return_word(regs, inserted as u16);
	Ok(FrameDisposition::Retain)
}

pub(super) fn updbtv(bridge: &mut HostBridge, regs: &mut Registers, args: StackArgs) -> BridgeResult<FrameDisposition> {
	let source = args.far_ptr(&bridge.memory, 0)?;
	let record = load_record(bridge, source)?;
	let updated = bridge.databases.current()?.update(&record);
	return_word(regs, updated as u16);
	Ok(FrameDisposition::Retain)
}
