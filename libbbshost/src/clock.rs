use std::time::{SystemTime, UNIX_EPOCH};

/// Calendar time in the shape the DOS date/time services report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
	pub year: u16,
	pub month: u8,
	pub day: u8,
	/// 0 is Sunday.
	pub weekday: u8,
	pub hour: u8,
	pub minute: u8,
	pub second: u8,
	pub hundredths: u8,
}

impl DateTime {
	// The BIOS timer ticks 1193180 / 65536 times per second.
	pub fn ticks_since_midnight(&self) -> u32 {
		let centiseconds = ((self.hour as u64 * 60 + self.minute as u64) * 60 + self.second as u64) * 100
			+ self.hundredths as u64;
		(centiseconds * 1_193_180 / (65_536 * 100)) as u32
	}
}

pub trait HostClock: std::fmt::Debug + Send {
	fn now(&self) -> DateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl HostClock for SystemClock {
	fn now(&self) -> DateTime {
		let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
		date_time_from_unix(elapsed.as_secs(), elapsed.subsec_millis())
	}
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime);

impl HostClock for FixedClock {
	fn now(&self) -> DateTime {
		self.0
	}
}

// http://howardhinnant.github.io/date_algorithms.html#civil_from_days
fn civil_from_days(days: i64) -> (i64, u8, u8) {
	let z = days + 719_468;
	let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
	let day_of_era = z - era * 146_097;
	let year_of_era = (day_of_era - day_of_era / 1460 + day_of_era / 36524 - day_of_era / 146_096) / 365;
	let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
	let mp = (5 * day_of_year + 2) / 153;
	let day = (day_of_year - (153 * mp + 2) / 5 + 1) as u8;
	let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
	let year = year_of_era + era * 400 + if month <= 2 { 1 } else { 0 };
	(year, month, day)
}

pub fn date_time_from_unix(seconds: u64, millis: u32) -> DateTime {
	let days = (seconds / 86_400) as i64;
	let seconds_of_day = seconds % 86_400;
	let (year, month, day) = civil_from_days(days);
	DateTime {
		year: year as u16,
		month,
		day,
		// 1970-01-01 was a Thursday.
		weekday: ((days + 4) % 7) as u8,
		hour: (seconds_of_day / 3600) as u8,
		minute: (seconds_of_day / 60 % 60) as u8,
		second: (seconds_of_day % 60) as u8,
		hundredths: (millis / 10) as u8,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unix_conversion() {
		let epoch = date_time_from_unix(0, 0);
		assert_eq!((epoch.year, epoch.month, epoch.day, epoch.weekday), (1970, 1, 1, 4));

		// 2000-02-29 13:45:30.250, a Tuesday.
		let leap = date_time_from_unix(951_831_930, 250);
		assert_eq!((leap.year, leap.month, leap.day, leap.weekday), (2000, 2, 29, 2));
		assert_eq!((leap.hour, leap.minute, leap.second, leap.hundredths), (13, 45, 30, 25));
	}

	#[test]
	fn test_ticks_since_midnight() {
		let mut time = date_time_from_unix(0, 0);
		assert_eq!(time.ticks_since_midnight(), 0);
		time.hour = 1;
		// 18.2065 ticks per second.
		assert_eq!(time.ticks_since_midnight(), 65_543);
	}
}
