//! The MAJORBBS exports: host routines reached by far calls into the host segment, and the
//! variables the loader links against.

pub mod frame;

mod btrieve;
mod heap;
mod options;
mod output;
mod runtime;
mod session;

use crate::bridge::HostBridge;
use crate::error::BridgeResult;
use crate::far_ptr::FarPtr;
use crate::registers::{Reg, Registers};

use self::frame::{FrameDisposition, StackArgs};

use std::collections::HashMap;

pub const MODULE_NAME: &str = "MAJORBBS";

pub type Routine = fn(&mut HostBridge, &mut Registers, StackArgs) -> BridgeResult<FrameDisposition>;

#[derive(Clone, Copy)]
pub struct ExportedFunction {
	pub ordinal: u16,
	pub name: &'static str,
	pub routine: Routine,
}

impl std::fmt::Debug for ExportedFunction {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}@{}", self.name, self.ordinal)
	}
}

macro_rules! export {
	($ordinal:expr, $name:expr, $routine:path) => {
		ExportedFunction { ordinal: $ordinal, name: $name, routine: $routine }
	};
}

pub static FUNCTIONS: &[ExportedFunction] = &[
	export!(68, "ALCMEM", heap::alcmem),
	export!(69, "ALCZER", heap::alczer),
	export!(84, "CATASTRO", runtime::catastro),
	export!(117, "CLRPRF", output::clrprf),
	export!(118, "CLSBTV", btrieve::clsbtv),
	export!(119, "CLSMSG", options::clsmsg),
	export!(312, "FREE", heap::free),
	export!(324, "GENRDN", runtime::genrdn),
	export!(334, "GETMSG", options::getmsg),
	export!(351, "INSBTV", btrieve::insbtv),
	export!(389, "LNGOPT", options::lngopt),
	export!(441, "NUMOPT", options::numopt),
	export!(452, "OBTBTV", btrieve::obtbtv),
	export!(455, "OPNBTV", btrieve::opnbtv),
	export!(456, "OPNMSG", options::opnmsg),
	export!(463, "OUTPRF", output::outprf),
	export!(466, "PARSIN", session::parsin),
	export!(474, "PRF", output::prf),
	export!(475, "PRFMSG", output::prfmsg),
	export!(505, "RSTBTV", btrieve::rstbtv),
	export!(510, "RSTMBK", options::rstmbk),
	export!(512, "RSTRIN", session::rstrin),
	export!(520, "SAMEAS", runtime::sameas),
	export!(534, "SETBTV", btrieve::setbtv),
	export!(543, "SETMBK", options::setmbk),
	export!(550, "SHOCST", runtime::shocst),
	export!(560, "SPRINTF", output::sprintf),
	export!(561, "SRAND", runtime::srand),
	export!(566, "STGOPT", options::stgopt),
	export!(569, "STPBTV", btrieve::stpbtv),
	export!(589, "STZCPY", runtime::stzcpy),
	export!(626, "UPDBTV", btrieve::updbtv),
	export!(650, "YNOPT", options::ynopt),
	export!(654, "LXMUL", runtime::lxmul),
	export!(655, "LDIV", runtime::ldiv),
	export!(656, "LMOD", runtime::lmod),
	export!(657, "LUDIV", runtime::ludiv),
	export!(658, "LUMOD", runtime::lumod),
];

/// Exported data, by ordinal. Each name is the host-store variable that holds it.
pub static VARIABLES: &[(u16, &str)] = &[
	(97, "CHANNEL"),
	(349, "INPLEN"),
	(350, "INPUT"),
	(401, "MARGC"),
	(402, "MARGN"),
	(403, "MARGV"),
	(440, "NTERMS"),
	(473, "PRFBUF"),
	(565, "STATUS"),
	(624, "USER"),
	(629, "USAPTR"),
	(633, "USRACC"),
	(636, "USRNUM"),
	(637, "USRPTR"),
];

pub fn function_table() -> HashMap<u16, &'static ExportedFunction> {
	FUNCTIONS.iter().map(|function| (function.ordinal, function)).collect()
}

pub fn variable_name(ordinal: u16) -> Option<&'static str> {
	VARIABLES.iter().find(|(candidate, _)| *candidate == ordinal).map(|&(_, name)| name)
}

/// Pointers come back with the segment in DX and the offset in AX.
pub(crate) fn return_far_ptr(regs: &mut Registers, ptr: FarPtr) {
	regs.set_seg_ptr(Reg::DX, Reg::AX, ptr);
}

pub(crate) fn return_long(regs: &mut Registers, value: u32) {
	regs.set_reg_pair(Reg::DX, Reg::AX, value);
}

pub(crate) fn return_word(regs: &mut Registers, value: u16) {
	regs.set_reg_u16(Reg::AX, value);
}
