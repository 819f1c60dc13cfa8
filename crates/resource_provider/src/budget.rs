use crate::ResourceError;

/// Byte ceiling for tile resources. Owned by the scheduler and handed to
/// the provider by `&mut` for every allocate and free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    limit: u64,
    used: u64,
}

impl MemoryBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn is_over_limit(&self) -> bool {
        self.used > self.limit
    }

    pub fn fits(&self, bytes: u64) -> bool {
        bytes <= self.available()
    }

    /// Lowering the limit below current usage is allowed; the owner is
    /// expected to evict until `is_over_limit` clears.
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    pub(crate) fn reserve(&mut self, bytes: u64) -> Result<(), ResourceError> {
        if !self.fits(bytes) {
            return Err(ResourceError::OutOfMemory {
                requested: bytes,
                available: self.available(),
            });
        }
        self.used += bytes;
        Ok(())
    }

    pub(crate) fn release(&mut self, bytes: u64) {
        self.used = self
            .used
            .checked_sub(bytes)
            .unwrap_or_else(|| {
                panic!("memory budget underflow: releasing {bytes} of {}", self.used)
            });
    }
}
