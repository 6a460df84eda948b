//! Replay window over received block counters.
//!
//! A sliding bitmap tracks the most recent counters accepted on the
//! receive path: counters at or below `highest - size` are stale,
//! counters already marked are replays, everything else is admitted.
//! `check` is pure and `check_and_update` commits, so a counter is
//! only remembered once its block has actually authenticated —
//! unauthenticated garbage cannot slide the window.

/// Sliding bitmap against replayed or stale nonce counters.
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    highest: u32,
    bitmap: u128,
    size: u32,
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayWindow {
    /// Default window: 64 counters behind the highest seen.
    pub const DEFAULT_SIZE: u32 = 64;

    pub fn new() -> Self {
        Self::with_size(Self::DEFAULT_SIZE)
    }

    /// # Panics
    /// Panics if `size` is 0 or greater than 128 (the bitmap width).
    pub fn with_size(size: u32) -> Self {
        assert!(size > 0 && size <= 128, "window size must be 1-128");
        Self {
            highest: 0,
            bitmap: 0,
            size,
        }
    }

    /// Would `counter` be admitted? Does not commit.
    pub fn check(&self, counter: u32) -> bool {
        if self.is_untouched() {
            return true;
        }
        if u64::from(counter) + u64::from(self.size) <= u64::from(self.highest) {
            return false;
        }
        if counter > self.highest {
            return true;
        }
        self.bitmap & Self::mask(self.highest - counter) == 0
    }

    /// Admit and remember `counter`; false if stale or replayed.
    pub fn check_and_update(&mut self, counter: u32) -> bool {
        if self.is_untouched() {
            self.highest = counter;
            self.bitmap = 1;
            return true;
        }
        if u64::from(counter) + u64::from(self.size) <= u64::from(self.highest) {
            return false;
        }
        if counter > self.highest {
            let shift = counter - self.highest;
            if shift >= 128 {
                self.bitmap = 1;
            } else {
                self.bitmap = (self.bitmap << shift) | 1;
            }
            self.highest = counter;
            return true;
        }
        let mask = Self::mask(self.highest - counter);
        if self.bitmap & mask != 0 {
            return false;
        }
        self.bitmap |= mask;
        true
    }

    /// Highest counter accepted so far.
    pub fn highest(&self) -> u32 {
        self.highest
    }

    fn is_untouched(&self) -> bool {
        self.highest == 0 && self.bitmap == 0
    }

    fn mask(offset: u32) -> u128 {
        1u128 << offset
    }
}
