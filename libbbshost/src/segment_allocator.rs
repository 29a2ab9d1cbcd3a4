use crate::error::{BridgeError, BridgeResult};
use crate::far_ptr::FarPtr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

pub const PARAGRAPH_BYTES: u32 = 16;

// http://stanislavs.org/helppc/int_21-58.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStrategy {
	FirstFit,
	BestFit,
	LastFit,
}

impl AllocationStrategy {
	/// Anything at or above the last-fit value collapses to last-fit.
	pub fn from_dos_value(value: u16) -> AllocationStrategy {
		match value {
			0 => AllocationStrategy::FirstFit,
			1 => AllocationStrategy::BestFit,
			_ => AllocationStrategy::LastFit,
		}
	}

	pub fn dos_value(self) -> u16 {
		match self {
			AllocationStrategy::FirstFit => 0,
			AllocationStrategy::BestFit => 1,
			AllocationStrategy::LastFit => 2,
		}
	}
}

impl Default for AllocationStrategy {
	fn default() -> AllocationStrategy {
		AllocationStrategy::BestFit
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
	Released { paragraphs: u16 },
	/// Nothing was allocated at that segment. The guest still sees success.
	Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeError {
	/// No block starts at that segment.
	UnknownBlock,
	/// The paragraphs after the block are taken. `largest` is the most the block can hold in place.
	NoRoom { largest: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gap {
	segment: u16,
	paragraphs: u32,
}

/// Paragraph allocator over the arena `[start_segment, end_segment)`. Every block begins at offset
/// zero of its own segment, so a block is identified by its segment alone.
#[derive(Debug, Clone)]
pub struct SegmentAllocator {
	start_segment: u16,
	end_segment: u16,
	blocks: BTreeMap<u16, u16>,
	strategy: AllocationStrategy,
	stray_frees: usize,
}

impl SegmentAllocator {
	pub fn new(start_segment: u16, end_segment: u16) -> SegmentAllocator {
		SegmentAllocator {
			start_segment,
			end_segment,
			blocks: BTreeMap::new(),
			strategy: AllocationStrategy::default(),
			stray_frees: 0,
		}
	}

	pub fn strategy(&self) -> AllocationStrategy {
		self.strategy
	}

	pub fn set_strategy(&mut self, strategy: AllocationStrategy) {
		debug!("Allocation strategy {:?} -> {:?}", self.strategy, strategy);
		self.strategy = strategy;
	}

	fn gaps(&self) -> Vec<Gap> {
		let mut gaps = vec![];
		let mut cursor = self.start_segment as u32;
		for (&segment, &paragraphs) in &self.blocks {
			if segment as u32 > cursor {
				gaps.push(Gap { segment: cursor as u16, paragraphs: segment as u32 - cursor });
			}
			cursor = segment as u32 + paragraphs as u32;
		}
		if (self.end_segment as u32) > cursor {
			gaps.push(Gap { segment: cursor as u16, paragraphs: self.end_segment as u32 - cursor });
		}
		gaps
	}

	/// Returns `None` when no gap can hold the request; the block table is left untouched.
	pub fn allocate(&mut self, paragraphs: u16) -> Option<FarPtr> {
		let paragraphs = paragraphs.max(1);
		let needed = paragraphs as u32;
		let mut fitting = self.gaps().into_iter().filter(|gap| gap.paragraphs >= needed);
		let segment = match self.strategy {
			AllocationStrategy::FirstFit => fitting.next().map(|gap| gap.segment),
			AllocationStrategy::BestFit => fitting
				.min_by_key(|gap| (gap.paragraphs, gap.segment))
				.map(|gap| gap.segment),
			// Last-fit carves the block from the top of the highest gap.
			AllocationStrategy::LastFit => fitting
				.last()
				.map(|gap| (gap.segment as u32 + gap.paragraphs - needed) as u16),
		};
		match segment {
			Some(segment) => {
				self.blocks.insert(segment, paragraphs);
				debug!("Allocated {} paragraphs at segment 0x{:04x} ({:?})", paragraphs, segment, self.strategy);
				Some(FarPtr::new(segment, 0))
			}
			None => {
				debug!("Unable to allocate {} paragraphs, largest gap is {}", paragraphs, self.largest_free_block());
				None
			}
		}
	}

	pub fn largest_free_block(&self) -> u16 {
		self.gaps().iter().map(|gap| gap.paragraphs).max().unwrap_or(0).min(0xffff) as u16
	}

	pub fn free(&mut self, segment: u16) -> FreeOutcome {
		match self.blocks.remove(&segment) {
			Some(paragraphs) => {
				debug!("Freed {} paragraphs at segment 0x{:04x}", paragraphs, segment);
				FreeOutcome::Released { paragraphs }
			}
			None => {
				self.stray_frees += 1;
				warn!("Free of segment 0x{:04x}, which was never allocated", segment);
				FreeOutcome::Unknown
			}
		}
	}

	/// Frees the block a pointer refers to. The pointer must be exactly what `allocate` returned.
	pub fn free_pointer(&mut self, ptr: FarPtr) -> BridgeResult<FreeOutcome> {
		if ptr.offset != 0 {
			return Err(BridgeError::MisalignedFree(ptr));
		}
		Ok(self.free(ptr.segment))
	}

	/// Grows or shrinks a block in place. Growth only succeeds into free paragraphs directly after
	/// it; on failure the block keeps its old size.
	pub fn resize(&mut self, segment: u16, paragraphs: u16) -> Result<(), ResizeError> {
		let paragraphs = paragraphs.max(1);
		let current = *self.blocks.get(&segment).ok_or(ResizeError::UnknownBlock)?;
		if paragraphs > current {
			let limit = self.blocks
				.range(segment.saturating_add(1)..)
				.next()
				.map(|(&next, _)| next as u32)
				.unwrap_or(self.end_segment as u32);
			let largest = (limit - segment as u32).min(0xffff) as u16;
			if paragraphs > largest {
				return Err(ResizeError::NoRoom { largest });
			}
		}
		self.blocks.insert(segment, paragraphs);
		debug!("Resized block at segment 0x{:04x} from {} to {} paragraphs", segment, current, paragraphs);
		Ok(())
	}

	pub fn block_size(&self, segment: u16) -> Option<u16> {
		self.blocks.get(&segment).cloned()
	}

	pub fn start_segment(&self) -> u16 {
		self.start_segment
	}

	pub fn end_segment(&self) -> u16 {
		self.end_segment
	}

	pub fn in_arena(&self, linear: u32) -> bool {
		linear >= self.start_segment as u32 * PARAGRAPH_BYTES && linear < self.end_segment as u32 * PARAGRAPH_BYTES
	}

	/// The block covering a linear arena address, as (segment, paragraphs).
	pub fn block_containing(&self, linear: u32) -> Option<(u16, u16)> {
		if !self.in_arena(linear) {
			return None;
		}
		let paragraph = (linear / PARAGRAPH_BYTES) as u16;
		self.blocks
			.range(..=paragraph)
			.next_back()
			.filter(|&(&segment, &paragraphs)| segment as u32 + paragraphs as u32 > paragraph as u32)
			.map(|(&segment, &paragraphs)| (segment, paragraphs))
	}

	pub fn blocks(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
		self.blocks.iter().map(|(&segment, &paragraphs)| (segment, paragraphs))
	}

	/// How many frees named a segment that was never handed out.
	pub fn stray_frees(&self) -> usize {
		self.stray_frees
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn allocator(strategy: AllocationStrategy) -> SegmentAllocator {
		let mut allocator = SegmentAllocator::new(0x1000, 0x1100);
		allocator.set_strategy(strategy);
		allocator
	}

	#[test]
	fn test_first_fit_reuses_freed_hole() {
		let mut allocator = allocator(AllocationStrategy::FirstFit);
		let s1 = allocator.allocate(1).unwrap();
		let s2 = allocator.allocate(2).unwrap();
		let s3 = allocator.allocate(1).unwrap();
		assert_eq!((s1.segment, s2.segment, s3.segment), (0x1000, 0x1001, 0x1003));
		allocator.free(s2.segment);
		assert_eq!(allocator.allocate(1).unwrap(), s2);
	}

	#[test]
	fn test_best_fit_picks_tightest_gap() {
		let mut allocator = allocator(AllocationStrategy::BestFit);
		let a = allocator.allocate(4).unwrap();
		let _b = allocator.allocate(1).unwrap();
		let c = allocator.allocate(2).unwrap();
		let _d = allocator.allocate(1).unwrap();
		allocator.free(a.segment);
		allocator.free(c.segment);
		// Gaps are 4 paragraphs at a, 2 at c and the tail. Two paragraphs fit c exactly.
		assert_eq!(allocator.allocate(2).unwrap(), c);
		assert_eq!(allocator.allocate(3).unwrap(), a);
	}

	#[test]
	fn test_last_fit_takes_top_of_highest_gap() {
		let mut allocator = allocator(AllocationStrategy::LastFit);
		let top = allocator.allocate(1).unwrap();
		assert_eq!(top.segment, 0x10ff);
		let below = allocator.allocate(0x10).unwrap();
		assert_eq!(below.segment, 0x10ef);
	}

	#[test]
	fn test_every_block_starts_at_offset_zero() {
		for &strategy in &[AllocationStrategy::FirstFit, AllocationStrategy::BestFit, AllocationStrategy::LastFit] {
			let mut allocator = allocator(strategy);
			for size in 1..20 {
				let ptr = allocator.allocate(size).unwrap();
				assert_eq!(ptr.offset, 0);
			}
		}
	}

	#[test]
	fn test_exhaustion_leaves_table_unchanged() {
		let mut allocator = allocator(AllocationStrategy::BestFit);
		allocator.allocate(0x80).unwrap();
		let before: Vec<_> = allocator.blocks().collect();
		assert_eq!(allocator.allocate(0x81), None);
		assert_eq!(allocator.blocks().collect::<Vec<_>>(), before);
		assert_eq!(allocator.largest_free_block(), 0x80);
	}

	#[test]
	fn test_strategy_values_collapse_to_last_fit() {
		assert_eq!(AllocationStrategy::from_dos_value(0), AllocationStrategy::FirstFit);
		assert_eq!(AllocationStrategy::from_dos_value(1), AllocationStrategy::BestFit);
		assert_eq!(AllocationStrategy::from_dos_value(2), AllocationStrategy::LastFit);
		assert_eq!(AllocationStrategy::from_dos_value(0x80), AllocationStrategy::LastFit);
		assert_eq!(SegmentAllocator::new(0x1000, 0x2000).strategy(), AllocationStrategy::BestFit);
	}

	#[test]
	fn test_free_unknown_and_misaligned() {
		let mut allocator = allocator(AllocationStrategy::FirstFit);
		let block = allocator.allocate(3).unwrap();
		assert_eq!(allocator.free(0x1050), FreeOutcome::Unknown);
		assert_eq!(allocator.stray_frees(), 1);
		assert!(matches!(allocator.free_pointer(block.offset_by(2)), Err(BridgeError::MisalignedFree(_))));
		assert_eq!(allocator.free_pointer(block).unwrap(), FreeOutcome::Released { paragraphs: 3 });
	}

	#[test]
	fn test_resize_in_place() {
		let mut allocator = allocator(AllocationStrategy::FirstFit);
		let a = allocator.allocate(2).unwrap();
		let b = allocator.allocate(2).unwrap();
		assert_eq!(allocator.resize(a.segment, 3), Err(ResizeError::NoRoom { largest: 2 }));
		assert_eq!(allocator.block_size(a.segment), Some(2));
		assert_eq!(allocator.resize(a.segment, 1), Ok(()));
		assert_eq!(allocator.resize(a.segment, 2), Ok(()));
		assert_eq!(allocator.resize(b.segment, 0x20), Ok(()));
		assert_eq!(allocator.block_size(b.segment), Some(0x20));
		assert_eq!(allocator.resize(b.segment, 0x200), Err(ResizeError::NoRoom { largest: 0xfe }));
		assert_eq!(allocator.resize(0x10f0, 1), Err(ResizeError::UnknownBlock));
	}

	#[test]
	fn test_block_containing() {
		let mut allocator = allocator(AllocationStrategy::FirstFit);
		let a = allocator.allocate(2).unwrap();
		assert_eq!(allocator.block_containing(a.linear() + 31), Some((a.segment, 2)));
		assert_eq!(allocator.block_containing(a.linear() + 32), None);
		assert_eq!(allocator.block_containing(0x500), None);
	}
}
