use std::time::Instant;

/// Mutable cost tally carried through one request. Producers check and
/// decrement it; exhaustion degrades output (an image is skipped, a page is
/// truncated) instead of failing the request.
#[derive(Debug, Clone)]
pub struct Budget {
    bytes_remaining: usize,
    images_remaining: u32,
    deadline: Instant,
}

/// Upper bound on inline images per page. Keeps a pathological page from
/// hogging the worker pool even when it stays under the byte budget.
const MAX_IMAGES_PER_PAGE: u32 = 64;

impl Budget {
    pub fn new(max_bytes: usize, deadline: Instant) -> Self {
        Self {
            bytes_remaining: max_bytes,
            images_remaining: MAX_IMAGES_PER_PAGE,
            deadline,
        }
    }

    pub fn bytes_remaining(&self) -> usize {
        self.bytes_remaining
    }

    /// Charges `amount` bytes if they fit. Returns whether the charge was
    /// applied; callers skip the corresponding output when it was not.
    pub fn try_charge_bytes(&mut self, amount: usize) -> bool {
        if amount <= self.bytes_remaining {
            self.bytes_remaining -= amount;
            true
        } else {
            false
        }
    }

    /// Reserves one image slot.
    pub fn try_take_image(&mut self) -> bool {
        if self.images_remaining > 0 {
            self.images_remaining -= 1;
            true
        } else {
            false
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
