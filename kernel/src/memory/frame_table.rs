//! Frame table backing the free-list allocation policy.
//!
//! One free bit per physical frame plus, for the first frame of every
//! allocated run, the length of that run. A frame whose bit is clear and is
//! not covered by a recorded run is "unpooled": taken by the kernel image or
//! still owned by the boot allocator. Unpooled frames join the pool only when
//! somebody frees them.

use alloc::{boxed::Box, vec};
use core::ops::Range;

use crate::constants::memory::{BITMAP_ENTRY_SIZE, EMPTY_BITMAP_ENTRY};

pub struct FrameTable {
    total_frames: usize,
    free_frames: usize,
    bitmap: Box<[u64]>,
    run_length: Box<[usize]>,
}

impl FrameTable {
    /// Creates a table for `total_frames` frames, none of them free.
    pub fn new(total_frames: usize) -> Self {
        let bitmap_size = total_frames.div_ceil(BITMAP_ENTRY_SIZE);

        FrameTable {
            total_frames,
            free_frames: 0,
            bitmap: vec![EMPTY_BITMAP_ENTRY; bitmap_size].into_boxed_slice(),
            run_length: vec![0; total_frames].into_boxed_slice(),
        }
    }

    /// Creates a table whose every frame is free.
    pub fn all_free(total_frames: usize) -> Self {
        let mut table = Self::new(total_frames);
        table.add_to_pool(0..total_frames);
        table
    }

    /// Hands the unpooled frames in `frames` to the free pool.
    pub fn add_to_pool(&mut self, frames: Range<usize>) {
        assert!(frames.end <= self.total_frames, "pool range out of bounds");
        for index in frames {
            assert!(
                !self.is_free(index) && self.run_length[index] == 0,
                "frame {} is already pooled",
                index
            );
            self.set_free(index);
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    /// Run length recorded at `index`; zero unless a run starts there.
    pub fn run_length(&self, index: usize) -> usize {
        self.run_length[index]
    }

    /// Sum of the lengths of every recorded run.
    pub fn allocated_frames(&self) -> usize {
        self.run_length.iter().sum()
    }

    /// Lowest-addressed run of `count` contiguous free frames.
    pub fn find_first_fit(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.free_frames {
            return None;
        }

        let mut start = 0;
        let mut length = 0;
        for index in 0..self.total_frames {
            if !self.is_free(index) {
                length = 0;
                continue;
            }
            if length == 0 {
                start = index;
            }
            length += 1;
            if length == count {
                return Some(start);
            }
        }
        None
    }

    /// Takes `count` free frames starting at `first` and records the run.
    pub fn claim(&mut self, first: usize, count: usize) {
        self.check_range(first, count);
        for index in first..first + count {
            assert!(self.is_free(index), "claiming frame {} which is in use", index);
            self.clear_free(index);
        }
        self.run_length[first] = count;
    }

    /// Records a run the boot allocator handed out, so it can later be freed
    /// by its first frame alone.
    pub fn record_run(&mut self, first: usize, count: usize) {
        self.check_range(first, count);
        for index in first..first + count {
            assert!(
                !self.is_free(index) && self.run_length[index] == 0,
                "boot run overlaps tracked frame {}",
                index
            );
        }
        self.run_length[first] = count;
    }

    /// Returns the run of `count` frames at `first` to the free pool.
    ///
    /// The run must either be the one recorded at `first` or an untracked run
    /// taken before the table existed.
    pub fn release(&mut self, first: usize, count: usize) {
        self.check_range(first, count);
        let recorded = self.run_length[first];
        assert!(
            recorded == count || recorded == 0,
            "freeing {} frames at {} but the run holds {}",
            count,
            first,
            recorded
        );
        if recorded == 0 {
            if let Some(owner) = self.run_covering(first) {
                panic!(
                    "freeing frame {} inside the run of {} frames at {}",
                    first, self.run_length[owner], owner
                );
            }
        }

        for index in first..first + count {
            assert!(!self.is_free(index), "double free of frame {}", index);
            assert!(
                index == first || self.run_length[index] == 0,
                "free of {} frames at {} swallows the run at {}",
                count,
                first,
                index
            );
            self.set_free(index);
        }
        self.run_length[first] = 0;
    }

    /// Largest recorded run as `(first frame, length)`. Ties go to the lowest address.
    pub fn largest_run(&self) -> Option<(usize, usize)> {
        self.run_length
            .iter()
            .enumerate()
            .filter(|&(_, &length)| length > 0)
            .fold(None, |best, (index, &length)| match best {
                Some((_, best_length)) if best_length >= length => best,
                _ => Some((index, length)),
            })
    }

    /// check if the free bit is set at frame_index
    pub fn is_free(&self, frame_index: usize) -> bool {
        assert!(frame_index < self.total_frames);

        let word = frame_index / BITMAP_ENTRY_SIZE;
        let bit = frame_index % BITMAP_ENTRY_SIZE;
        (self.bitmap[word] & (1 << bit)) != 0
    }

    /// Start of the recorded run that covers `index` without starting there.
    ///
    /// Recorded runs never overlap, so only the nearest run start below
    /// `index` can cover it.
    fn run_covering(&self, index: usize) -> Option<usize> {
        let owner = (0..index).rev().find(|&j| self.run_length[j] > 0)?;
        (owner + self.run_length[owner] > index).then_some(owner)
    }

    fn check_range(&self, first: usize, count: usize) {
        assert!(count > 0, "empty run at frame {}", first);
        assert!(
            first
                .checked_add(count)
                .is_some_and(|end| end <= self.total_frames),
            "run {}+{} is outside the {} frames of RAM",
            first,
            count,
            self.total_frames
        );
    }

    fn set_free(&mut self, frame_index: usize) {
        let word = frame_index / BITMAP_ENTRY_SIZE;
        let bit = frame_index % BITMAP_ENTRY_SIZE;
        self.bitmap[word] |= 1 << bit;
        self.free_frames += 1;
    }

    fn clear_free(&mut self, frame_index: usize) {
        let word = frame_index / BITMAP_ENTRY_SIZE;
        let bit = frame_index % BITMAP_ENTRY_SIZE;
        self.bitmap[word] &= !(1 << bit);
        self.free_frames -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(table: &FrameTable) -> alloc::vec::Vec<bool> {
        (0..table.total_frames()).map(|i| table.is_free(i)).collect()
    }

    #[test]
    fn first_fit_prefers_lowest_address() {
        let mut table = FrameTable::all_free(10);
        table.claim(0, 4);
        table.claim(4, 3);
        table.release(0, 4);

        assert_eq!(table.find_first_fit(2), Some(0));
        assert_eq!(table.find_first_fit(5), None);
        assert_eq!(table.find_first_fit(4), Some(0));
    }

    #[test]
    fn run_starting_at_frame_zero_is_found() {
        let table = FrameTable::all_free(3);
        assert_eq!(table.find_first_fit(3), Some(0));
        assert_eq!(table.find_first_fit(1), Some(0));
    }

    #[test]
    fn run_after_used_frame_zero_is_found() {
        let mut table = FrameTable::all_free(6);
        table.claim(0, 1);
        assert_eq!(table.find_first_fit(5), Some(1));

        let mut table = FrameTable::all_free(6);
        table.claim(2, 1);
        assert_eq!(table.find_first_fit(2), Some(0));
        assert_eq!(table.find_first_fit(3), Some(3));
    }

    #[test]
    fn claim_release_round_trip_restores_bits() {
        let mut table = FrameTable::all_free(130);
        table.claim(5, 2);
        let before = bits(&table);

        let first = table.find_first_fit(70).expect("fits");
        table.claim(first, 70);
        assert_eq!(table.run_length(first), 70);
        table.release(first, 70);

        assert_eq!(bits(&table), before);
        assert_eq!(table.run_length(first), 0);
    }

    #[test]
    fn unpooled_frames_are_neither_free_nor_allocated() {
        let mut table = FrameTable::new(8);
        assert_eq!(table.free_frames(), 0);
        assert_eq!(table.find_first_fit(1), None);

        table.record_run(2, 3);
        assert_eq!(table.allocated_frames(), 3);
        table.release(2, 3);
        assert_eq!(table.free_frames(), 3);
        assert_eq!(table.find_first_fit(3), Some(2));
    }

    #[test]
    fn untracked_run_can_be_released() {
        let mut table = FrameTable::new(4);
        table.release(1, 2);
        assert!(table.is_free(1) && table.is_free(2));
        assert!(!table.is_free(0) && !table.is_free(3));
    }

    #[test]
    fn largest_run_includes_frame_zero() {
        let mut table = FrameTable::all_free(10);
        table.claim(0, 4);
        table.claim(4, 3);
        assert_eq!(table.largest_run(), Some((0, 4)));

        table.release(0, 4);
        assert_eq!(table.largest_run(), Some((4, 3)));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut table = FrameTable::all_free(4);
        table.claim(0, 2);
        table.release(0, 2);
        table.release(0, 2);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn release_out_of_range_panics() {
        let mut table = FrameTable::all_free(4);
        table.release(3, 2);
    }

    #[test]
    #[should_panic(expected = "inside the run of 4 frames at 2")]
    fn release_from_inside_a_live_run_panics() {
        let mut table = FrameTable::all_free(8);
        table.claim(0, 2);
        table.claim(2, 4);
        // frames 3..5 belong to the run at 2; pooling them would let the
        // next first-fit hand them out twice
        table.release(3, 2);
    }

    #[test]
    fn untracked_release_next_to_a_live_run_is_accepted() {
        let mut table = FrameTable::new(8);
        table.record_run(0, 2);
        table.release(2, 3);
        assert_eq!(table.free_frames(), 3);
        assert_eq!(table.run_length(0), 2);
        assert_eq!(table.find_first_fit(3), Some(2));
    }

    #[test]
    #[should_panic(expected = "run holds")]
    fn release_with_wrong_length_panics() {
        let mut table = FrameTable::all_free(8);
        table.claim(0, 4);
        table.release(0, 2);
    }
}
