use crate::bridge::HostBridge;
use crate::dos_error_codes::DosErrorCode;
use crate::dos_file_system::{DosDirectoryEntry, DosFileAccessMode, DosFileSeekOrigin};
use crate::error::{BridgeError, BridgeResult};
use crate::far_ptr::FarPtr;
use crate::memory::SEGMENT_BYTES;
use crate::registers::{Flag, Reg, RegHalf, Registers};
use crate::segment_allocator::{AllocationStrategy, FreeOutcome, ResizeError};

use log::{info, trace, warn};

// Handles 0 to 2 are stdin, stdout and stderr.
const STDIN_HANDLE: u16 = 0;
const STDOUT_HANDLE: u16 = 1;
const STDERR_HANDLE: u16 = 2;
// http://stanislavs.org/helppc/int_21-44-0.html: character device, not at EOF, stdin and stdout capable.
const STD_DEVICE_INFO: u16 = 0x80d3;
const DISK_FILE_INFO: u16 = 0x0002;
const DRIVE_C: u8 = 2;

fn succeed(regs: &mut Registers) {
	regs.set_flag(Flag::Carry, false);
}

fn fail(regs: &mut Registers, error_code: DosErrorCode) {
	regs.set_flag(Flag::Carry, true);
	regs.set_reg_u16(Reg::AX, error_code as u16);
}

impl HostBridge {
	/// Runs the host side of a software interrupt against the guest registers.
	pub fn handle_interrupt(&mut self, regs: &mut Registers, interrupt: u8) -> BridgeResult<()> {
		trace!(
			"INT 0x{:02X} AX=0x{:04X} BX=0x{:04X} CX=0x{:04X} DX=0x{:04X}",
			interrupt, regs.ax, regs.bx, regs.cx, regs.dx
		);
		match interrupt {
			0x1a => self.handle_clock_interrupt(regs),
			// http://stanislavs.org/helppc/int_21.html
			0x21 => self.handle_dos_interrupt(regs),
			_ => Err(unsupported(interrupt, regs)),
		}
	}

	fn handle_clock_interrupt(&mut self, regs: &mut Registers) -> BridgeResult<()> {
		match regs.get_reg_u8(Reg::AX, RegHalf::High) {
			0x00 => {
				// Read system clock counter.
				let ticks = self.clock.now().ticks_since_midnight();
				regs.set_reg_pair(Reg::CX, Reg::DX, ticks);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, 0);
				Ok(())
			}
			_ => Err(unsupported(0x1a, regs)),
		}
	}

	fn handle_dos_interrupt(&mut self, regs: &mut Registers) -> BridgeResult<()> {
		let dos_int = regs.get_reg_u8(Reg::AX, RegHalf::High);
		match dos_int {
			0x01 => {
				// Read character from stdin with echo.
				let c = self.console.read_char().unwrap_or(0);
				if c != 0 {
					self.console.write(&[c]);
				}
				regs.set_reg_u8(Reg::AX, RegHalf::Low, c);
			}
			0x02 => {
				// Display character in DL.
				let c = regs.get_reg_u8(Reg::DX, RegHalf::Low);
				self.console.write(&[c]);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, c);
			}
			0x09 => {
				// Print the '$'-terminated string at DS:DX.
				let text = self.read_dollar_string(regs.get_seg_ptr(Reg::DS, Reg::DX))?;
				self.console.write(&text);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, b'$');
			}
			0x19 => {
				regs.set_reg_u8(Reg::AX, RegHalf::Low, DRIVE_C);
			}
			0x1a => {
				self.disk_transfer_area = regs.get_seg_ptr(Reg::DS, Reg::DX);
			}
			0x25 => {
				// Set interrupt vector AL to DS:DX.
				let vector = regs.get_reg_u8(Reg::AX, RegHalf::Low);
				self.interrupt_vectors[vector as usize] = regs.get_seg_ptr(Reg::DS, Reg::DX);
			}
			0x2a => {
				// Get system date.
				let now = self.clock.now();
				regs.set_reg_u16(Reg::CX, now.year);
				regs.set_reg_u8(Reg::DX, RegHalf::High, now.month);
				regs.set_reg_u8(Reg::DX, RegHalf::Low, now.day);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, now.weekday);
			}
			0x2c => {
				// Get system time.
				let now = self.clock.now();
				regs.set_reg_u8(Reg::CX, RegHalf::High, now.hour);
				regs.set_reg_u8(Reg::CX, RegHalf::Low, now.minute);
				regs.set_reg_u8(Reg::DX, RegHalf::High, now.second);
				regs.set_reg_u8(Reg::DX, RegHalf::Low, now.hundredths);
			}
			0x2f => {
				regs.set_seg_ptr(Reg::ES, Reg::BX, self.disk_transfer_area);
			}
			0x30 => {
				// Get DOS version: AL major, AH minor, BX:CX serial.
				regs.set_reg_u8(Reg::AX, RegHalf::Low, self.config.dos_version.major);
				regs.set_reg_u8(Reg::AX, RegHalf::High, self.config.dos_version.minor);
				regs.set_reg_u16(Reg::BX, 0);
				regs.set_reg_u16(Reg::CX, 0);
			}
			0x35 => {
				// Get interrupt vector AL into ES:BX.
				let vector = regs.get_reg_u8(Reg::AX, RegHalf::Low);
				regs.set_seg_ptr(Reg::ES, Reg::BX, self.interrupt_vectors[vector as usize]);
			}
			0x3c => {
				// CREATE
				let filename = self.memory.read_cstring(regs.get_seg_ptr(Reg::DS, Reg::DX), false)?;
				let attributes = regs.get_reg_u16(Reg::CX);
				match self.file_system.create(&filename, attributes) {
					Ok(handle) => {
						succeed(regs);
						regs.set_reg_u16(Reg::AX, handle);
					}
					Err(error_code) => fail(regs, error_code),
				}
			}
			0x3d => {
				// OPEN
				let filename = self.memory.read_cstring(regs.get_seg_ptr(Reg::DS, Reg::DX), false)?;
				let access_mode = match regs.get_reg_u8(Reg::AX, RegHalf::Low) & 0x07 {
					0 => Some(DosFileAccessMode::ReadOnly),
					1 => Some(DosFileAccessMode::WriteOnly),
					2 => Some(DosFileAccessMode::ReadWrite),
					_ => None,
				};
				match access_mode {
					Some(access_mode) => match self.file_system.open(&filename, access_mode) {
						Ok(handle) => {
							succeed(regs);
							regs.set_reg_u16(Reg::AX, handle);
						}
						Err(error_code) => fail(regs, error_code),
					},
					None => fail(regs, DosErrorCode::InvalidFileAccessMode),
				}
			}
			0x3e => {
				// CLOSE
				let handle = regs.get_reg_u16(Reg::BX);
				if handle <= STDERR_HANDLE {
					succeed(regs);
				} else {
					match self.file_system.close(handle) {
						Ok(()) => succeed(regs),
						Err(error_code) => fail(regs, error_code),
					}
				}
			}
			0x3f => {
				// READ
				let handle = regs.get_reg_u16(Reg::BX);
				let count = regs.get_reg_u16(Reg::CX) as usize;
				let destination = regs.get_seg_ptr(Reg::DS, Reg::DX);
				let mut buffer = vec![0u8; count];
				let result = if handle == STDIN_HANDLE {
					Ok(self.read_console_line(&mut buffer))
				} else {
					self.file_system.read(handle, &mut buffer)
				};
				match result {
					Ok(read_count) => {
						self.memory.write(destination, &buffer[..read_count as usize])?;
						succeed(regs);
						regs.set_reg_u16(Reg::AX, read_count);
					}
					Err(error_code) => fail(regs, error_code),
				}
			}
			0x40 => {
				// WRITE
				let handle = regs.get_reg_u16(Reg::BX);
				let count = regs.get_reg_u16(Reg::CX) as usize;
				let data = self.memory.read(regs.get_seg_ptr(Reg::DS, Reg::DX), count)?.to_vec();
				let result = if handle == STDOUT_HANDLE || handle == STDERR_HANDLE {
					self.console.write(&data);
					Ok(count as u16)
				} else {
					self.file_system.write(handle, &data)
				};
				match result {
					Ok(written) => {
						succeed(regs);
						regs.set_reg_u16(Reg::AX, written);
					}
					Err(error_code) => fail(regs, error_code),
				}
			}
			0x42 => {
				// SEEK
				let handle = regs.get_reg_u16(Reg::BX);
				let offset = regs.get_reg_pair(Reg::CX, Reg::DX);
				let origin = match regs.get_reg_u8(Reg::AX, RegHalf::Low) {
					0 => Some(DosFileSeekOrigin::Start),
					1 => Some(DosFileSeekOrigin::Current),
					2 => Some(DosFileSeekOrigin::End),
					_ => None,
				};
				match origin {
					Some(origin) => match self.file_system.seek(handle, offset, origin) {
						Ok(position) => {
							succeed(regs);
							regs.set_reg_pair(Reg::DX, Reg::AX, position);
						}
						Err(error_code) => fail(regs, error_code),
					},
					None => fail(regs, DosErrorCode::InvalidFunction),
				}
			}
			0x44 => {
				// I/O control
				match regs.get_reg_u8(Reg::AX, RegHalf::Low) {
					0x00 => {
						// Get device information
						let handle = regs.get_reg_u16(Reg::BX);
						if handle <= STDERR_HANDLE {
							succeed(regs);
							regs.set_reg_u16(Reg::DX, STD_DEVICE_INFO);
							regs.set_reg_u16(Reg::AX, STD_DEVICE_INFO);
						} else if self.file_system.is_open(handle) {
							succeed(regs);
							regs.set_reg_u16(Reg::DX, DISK_FILE_INFO);
							regs.set_reg_u16(Reg::AX, DISK_FILE_INFO);
						} else {
							fail(regs, DosErrorCode::InvalidFileHandle);
						}
					}
					_ => return Err(unsupported(0x21, regs)),
				}
			}
			0x47 => {
				// Get current directory into DS:SI (64 bytes, no drive or leading backslash).
				let destination = regs.get_seg_ptr(Reg::DS, Reg::SI);
				let directory = self.config.current_directory.clone().into_bytes();
				self.memory.write_cstring(destination, &directory)?;
				succeed(regs);
				regs.set_reg_u16(Reg::AX, 0x0100);
			}
			0x48 => {
				// Allocate BX paragraphs.
				let paragraphs = regs.get_reg_u16(Reg::BX);
				match self.memory.allocator_mut().allocate(paragraphs) {
					Some(block) => {
						succeed(regs);
						regs.set_reg_u16(Reg::AX, block.segment);
					}
					None => {
						let largest = self.memory.allocator().largest_free_block();
						fail(regs, DosErrorCode::InsufficientMemory);
						regs.set_reg_u16(Reg::BX, largest);
					}
				}
			}
			0x49 => {
				// Free the block at ES. Unknown segments still report success.
				let segment = regs.get_reg_u16(Reg::ES);
				if let FreeOutcome::Released { paragraphs } = self.memory.allocator_mut().free(segment) {
					trace!("Freed {} paragraphs at {:04X}", paragraphs, segment);
				}
				succeed(regs);
			}
			0x4a => {
				// Resize the block at ES to BX paragraphs. A failed grow reports the most the block can hold.
				let segment = regs.get_reg_u16(Reg::ES);
				let paragraphs = regs.get_reg_u16(Reg::BX);
				match self.memory.allocator_mut().resize(segment, paragraphs) {
					Ok(()) => succeed(regs),
					Err(ResizeError::NoRoom { largest }) => {
						warn!("Unable to grow block {:04X} to {} paragraphs, {} available", segment, paragraphs, largest);
						fail(regs, DosErrorCode::InsufficientMemory);
						regs.set_reg_u16(Reg::BX, largest);
					}
					Err(ResizeError::UnknownBlock) => {
						warn!("Resize of unknown block {:04X}", segment);
						fail(regs, DosErrorCode::InvalidMemoryBlockAddress);
					}
				}
			}
			0x4c => {
				// Terminate with return code AL.
				let exit_code = regs.get_reg_u8(Reg::AX, RegHalf::Low);
				info!("Program exited with code {}", exit_code);
				self.console.write(format!("Program exited with code {}\r\n", exit_code).as_bytes());
				self.exit_code = Some(exit_code);
				regs.halted = true;
			}
			0x4e => {
				// Find first matching file, result into the DTA.
				let search_spec = self.memory.read_cstring(regs.get_seg_ptr(Reg::DS, Reg::DX), false)?;
				let attributes = regs.get_reg_u16(Reg::CX);
				let found = self.file_system.find_first_file(&search_spec, attributes);
				self.finish_find(regs, found)?;
			}
			0x4f => {
				let found = self.file_system.find_next_file();
				self.finish_find(regs, found)?;
			}
			0x51 | 0x62 => {
				// Get PSP segment.
				let psp = self.program_segment_prefix.ok_or(BridgeError::NoProgramSegmentPrefix)?;
				regs.set_reg_u16(Reg::BX, psp);
			}
			0x58 => {
				// Get/set memory allocation strategy.
				match regs.get_reg_u8(Reg::AX, RegHalf::Low) {
					0x00 => {
						succeed(regs);
						regs.set_reg_u16(Reg::AX, self.memory.allocator().strategy().dos_value());
					}
					0x01 => {
						let strategy = AllocationStrategy::from_dos_value(regs.get_reg_u16(Reg::BX));
						self.memory.allocator_mut().set_strategy(strategy);
						succeed(regs);
					}
					_ => fail(regs, DosErrorCode::InvalidFunction),
				}
			}
			0x67 => {
				// Set handle count. There is no real limit to raise.
				succeed(regs);
			}
			_ => return Err(unsupported(0x21, regs)),
		}
		Ok(())
	}

	fn finish_find(&mut self, regs: &mut Registers, found: Result<DosDirectoryEntry, DosErrorCode>) -> BridgeResult<()> {
		match found {
			Ok(entry) => {
				self.memory.write(self.disk_transfer_area, &entry.to_dta_record())?;
				succeed(regs);
				regs.set_reg_u16(Reg::AX, 0);
			}
			Err(error_code) => fail(regs, error_code),
		}
		Ok(())
	}

	fn read_dollar_string(&self, ptr: FarPtr) -> BridgeResult<Vec<u8>> {
		let mut text = vec![];
		let mut offset = ptr.offset as u32;
		while (offset as usize) < SEGMENT_BYTES {
			let c = self.memory.read_u8(FarPtr::new(ptr.segment, offset as u16))?;
			if c == b'$' {
				return Ok(text);
			}
			text.push(c);
			offset += 1;
		}
		Err(BridgeError::SegmentOverrun { ptr, len: text.len() + 1 })
	}

	/// Reads from the console up to and including a line feed.
	fn read_console_line(&mut self, buffer: &mut [u8]) -> u16 {
		let mut count = 0;
		while count < buffer.len() {
			match self.console.read_char() {
				Some(c) => {
					buffer[count] = c;
					count += 1;
					if c == b'\n' {
						break;
					}
				}
				None => break,
			}
		}
		count as u16
	}
}

fn unsupported(interrupt: u8, regs: &Registers) -> BridgeError {
	BridgeError::UnsupportedInterrupt {
		interrupt,
		ah: regs.get_reg_u8(Reg::AX, RegHalf::High),
		al: regs.get_reg_u8(Reg::AX, RegHalf::Low),
	}
}
