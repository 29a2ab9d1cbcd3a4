use crate::error::BridgeResult;
use crate::far_ptr::FarPtr;
use crate::memory::GuestMemory;

/// Where the variadic arguments of a formatting call come from. Each read consumes the argument.
pub trait ArgumentSource {
	fn next_word(&mut self, memory: &GuestMemory) -> BridgeResult<u16>;
	/// Low word first.
	fn next_long(&mut self, memory: &GuestMemory) -> BridgeResult<u32>;
	/// Offset word then segment word.
	fn next_far_ptr(&mut self, memory: &GuestMemory) -> BridgeResult<FarPtr>;
	/// Segment that near (`N`) pointer arguments are relative to.
	fn data_segment(&self) -> u16;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Size {
	Default,
	Short,
	Long,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PointerSize {
	Far,
	Near,
}

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
	left_justify: bool,
	zero_pad: bool,
	plus_sign: bool,
	space_sign: bool,
	alternate: bool,
	width: usize,
	precision: Option<usize>,
}

impl Spec {
	fn pad(&self, output: &mut Vec<u8>, prefix: &[u8], body: &[u8], numeric: bool) {
		let len = prefix.len() + body.len();
		let padding = self.width.saturating_sub(len);
		if self.left_justify {
			output.extend_from_slice(prefix);
			output.extend_from_slice(body);
			output.extend(std::iter::repeat(b' ').take(padding));
		} else if self.zero_pad && numeric && self.precision.is_none() {
			output.extend_from_slice(prefix);
			output.extend(std::iter::repeat(b'0').take(padding));
			output.extend_from_slice(body);
		} else {
			output.extend(std::iter::repeat(b' ').take(padding));
			output.extend_from_slice(prefix);
			output.extend_from_slice(body);
		}
	}

	fn digits(&self, value: u32, radix: u32, upper: bool) -> Vec<u8> {
		let mut digits = if value == 0 && self.precision == Some(0) {
			vec![]
		} else {
			let text = match (radix, upper) {
				(16, true) => format!("{:X}", value),
				(16, false) => format!("{:x}", value),
				(8, _) => format!("{:o}", value),
				_ => value.to_string(),
			};
			text.into_bytes()
		};
		if let Some(precision) = self.precision {
			while digits.len() < precision {
				digits.insert(0, b'0');
			}
		}
		digits
	}
}

fn parse_number(format: &[u8], pos: &mut usize) -> usize {
	let mut value = 0usize;
	while let Some(&c) = format.get(*pos) {
		if !c.is_ascii_digit() {
			break;
		}
		value = value * 10 + (c - b'0') as usize;
		*pos += 1;
	}
	value
}

/// Renders a C `printf` format string whose arguments live in guest memory. Unknown conversions
/// are copied through untouched, `%` included.
pub fn format(memory: &GuestMemory, format: &[u8], args: &mut dyn ArgumentSource) -> BridgeResult<Vec<u8>> {
	let mut output = Vec::with_capacity(format.len());
	let mut pos = 0;
	while pos < format.len() {
		let c = format[pos];
		if c != b'%' {
			output.push(c);
			pos += 1;
			continue;
		}
		let start = pos;
		pos += 1;

		let mut spec = Spec::default();
		while let Some(&flag) = format.get(pos) {
			match flag {
				b'-' => spec.left_justify = true,
				b'0' => spec.zero_pad = true,
				b'+' => spec.plus_sign = true,
				b' ' => spec.space_sign = true,
				b'#' => spec.alternate = true,
				_ => break,
			}
			pos += 1;
		}

		if format.get(pos) == Some(&b'*') {
			let width = args.next_word(memory)? as i16;
			if width < 0 {
				spec.left_justify = true;
			}
			spec.width = width.unsigned_abs() as usize;
			pos += 1;
		} else {
			spec.width = parse_number(format, &mut pos);
		}

		if format.get(pos) == Some(&b'.') {
			pos += 1;
			if format.get(pos) == Some(&b'*') {
				let precision = args.next_word(memory)? as i16;
				// A negative precision is taken as if it were omitted.
				spec.precision = if precision < 0 { None } else { Some(precision as usize) };
				pos += 1;
			} else {
				spec.precision = Some(parse_number(format, &mut pos));
			}
		}

		let mut size = Size::Default;
		let mut pointer_size = PointerSize::Far;
		while let Some(&modifier) = format.get(pos) {
			match modifier {
				b'l' => size = Size::Long,
				b'h' => size = Size::Short,
				b'N' => pointer_size = PointerSize::Near,
				b'F' => pointer_size = PointerSize::Far,
				_ => break,
			}
			pos += 1;
		}

		let conversion = match format.get(pos) {
			Some(&conversion) => conversion,
			None => {
				output.extend_from_slice(&format[start..]);
				break;
			}
		};
		pos += 1;

		match conversion {
			b'd' | b'i' => {
				let value = match size {
					Size::Long => args.next_long(memory)? as i32,
					_ => args.next_word(memory)? as i16 as i32,
				};
				let sign: &[u8] = if value < 0 {
					b"-"
				} else if spec.plus_sign {
					b"+"
				} else if spec.space_sign {
					b" "
				} else {
					b""
				};
				let body = spec.digits(value.unsigned_abs(), 10, false);
				spec.pad(&mut output, sign, &body, true);
			}
			b'u' | b'x' | b'X' | b'o' => {
				let value = match size {
					Size::Long => args.next_long(memory)?,
					_ => args.next_word(memory)? as u32,
				};
				let (radix, prefix): (u32, &[u8]) = match conversion {
					b'x' => (16, b"0x"),
					b'X' => (16, b"0X"),
					b'o' => (8, b"0"),
					_ => (10, b""),
				};
				let body = spec.digits(value, radix, conversion == b'X');
				let prefix = if spec.alternate && value != 0 && !body.starts_with(b"0") { prefix } else { b"" };
				spec.pad(&mut output, prefix, &body, true);
			}
			b'c' => {
				let value = args.next_word(memory)? as u8;
				spec.pad(&mut output, b"", &[value], false);
			}
			b's' => {
				let ptr = match pointer_size {
					PointerSize::Far => args.next_far_ptr(memory)?,
					PointerSize::Near => FarPtr::new(args.data_segment(), args.next_word(memory)?),
				};
				let mut text = if ptr.is_null() { b"(null)".to_vec() } else { memory.read_cstring(ptr, false)? };
				if let Some(precision) = spec.precision {
					text.truncate(precision);
				}
				spec.pad(&mut output, b"", &text, false);
			}
			b'p' => {
				let text = match pointer_size {
					PointerSize::Far => args.next_far_ptr(memory)?.to_string(),
					PointerSize::Near => format!("{:04X}", args.next_word(memory)?),
				};
				spec.pad(&mut output, b"", text.as_bytes(), false);
			}
			b'%' => output.push(b'%'),
			_ => output.extend_from_slice(&format[start..pos]),
		}
	}
	Ok(output)
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Arguments taken from a plain list of stack words.
	struct Words(Vec<u16>);

	impl ArgumentSource for Words {
		fn next_word(&mut self, _memory: &GuestMemory) -> BridgeResult<u16> {
			Ok(self.0.remove(0))
		}

		fn next_long(&mut self, memory: &GuestMemory) -> BridgeResult<u32> {
			let low = self.next_word(memory)? as u32;
			let high = self.next_word(memory)? as u32;
			Ok((high << 16) | low)
		}

		fn next_far_ptr(&mut self, memory: &GuestMemory) -> BridgeResult<FarPtr> {
			let offset = self.next_word(memory)?;
			let segment = self.next_word(memory)?;
			Ok(FarPtr::new(segment, offset))
		}

		fn data_segment(&self) -> u16 {
			0x0200
		}
	}

	fn render(memory: &GuestMemory, format_text: &str, words: &[u16]) -> String {
		let mut args = Words(words.to_vec());
		String::from_utf8(format(memory, format_text.as_bytes(), &mut args).unwrap()).unwrap()
	}

	#[test]
	fn test_integers() {
		let memory = GuestMemory::new(0x1000, 0x2000);
		assert_eq!(render(&memory, "%d|%5d|%-5d|%05d", &[(-42i16) as u16, 7, 7, 42]), "-42|    7|7    |00042");
		assert_eq!(render(&memory, "%u %x %X %#x %o", &[65535, 255, 255, 255, 8]), "65535 ff FF 0xff 10");
		assert_eq!(render(&memory, "%ld %lu", &[0x0000, 0x8000, 0x86a0, 0x0001]), "-2147483648 100000");
		assert_eq!(render(&memory, "%+d % d %.3d", &[5, 5, 5]), "+5  5 005");
		assert_eq!(render(&memory, "%*d|%-*d|", &[4, 1, 3, 2]), "   1|2  |");
	}

	#[test]
	fn test_strings_and_pointers() {
		let mut memory = GuestMemory::new(0x1000, 0x2000);
		memory.write_cstring(FarPtr::new(0x0300, 0x10), b"sysop").unwrap();
		memory.write_cstring(FarPtr::new(0x0200, 0x40), b"near").unwrap();
		assert_eq!(render(&memory, "hi %s!", &[0x10, 0x0300]), "hi sysop!");
		assert_eq!(render(&memory, "[%-8.3s]", &[0x10, 0x0300]), "[sys     ]");
		assert_eq!(render(&memory, "%Ns", &[0x40]), "near");
		assert_eq!(render(&memory, "%s", &[0, 0]), "(null)");
		assert_eq!(render(&memory, "%p %Np", &[0x10, 0x0300, 0x40]), "0300:0010 0040");
		assert_eq!(render(&memory, "%c%c", &[b'o' as u16, b'k' as u16]), "ok");
	}

	#[test]
	fn test_unknown_conversions_pass_through() {
		let memory = GuestMemory::new(0x1000, 0x2000);
		assert_eq!(render(&memory, "100%% %q %", &[]), "100% %q %");
	}
}
