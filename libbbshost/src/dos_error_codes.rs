use log::warn;

use std::io::ErrorKind;

// http://stanislavs.org/helppc/dos_error_codes.html
/// The error codes DOS services put in AX when they return with carry set.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum DosErrorCode {
	InvalidFunction = 0x01,
	FileNotFound = 0x02,
	PathNotFound = 0x03,
	NoFileHandlesLeft = 0x04,
	AccessDenied = 0x05,
	InvalidFileHandle = 0x06,
	InsufficientMemory = 0x08,
	InvalidMemoryBlockAddress = 0x09,
	InvalidFileAccessMode = 0x0c,
	InvalidData = 0x0d,
	NoMoreFiles = 0x12,
	FileAlreadyExists = 0x50,
}

impl From<std::io::Error> for DosErrorCode {
	fn from(err: std::io::Error) -> DosErrorCode {
		match err.kind() {
			ErrorKind::NotFound => DosErrorCode::FileNotFound,
			ErrorKind::PermissionDenied => DosErrorCode::AccessDenied,
			ErrorKind::AlreadyExists => DosErrorCode::FileAlreadyExists,
			ErrorKind::InvalidData | ErrorKind::UnexpectedEof => DosErrorCode::InvalidData,
			_ => {
				warn!("Unexpected file error: {:?}", err);
				DosErrorCode::PathNotFound
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_host_errors_map_to_dos_codes() {
		let code = DosErrorCode::from(std::io::Error::from(ErrorKind::NotFound));
		assert_eq!(code, DosErrorCode::FileNotFound);
		assert_eq!(code as u16, 2);
		assert_eq!(DosErrorCode::from(std::io::Error::from(ErrorKind::PermissionDenied)), DosErrorCode::AccessDenied);
		assert_eq!(DosErrorCode::from(std::io::Error::from(ErrorKind::Other)), DosErrorCode::PathNotFound);
	}
}
