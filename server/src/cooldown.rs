//! Single-timestamp rate limiter.

/// A gate that stays closed until the clock passes a stored timestamp.
///
/// Timestamps are milliseconds since the Unix epoch. A fresh or reset gate is
/// always expired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cooldown {
    until: Option<u64>,
}

impl Cooldown {
    pub fn new() -> Self {
        Self { until: None }
    }

    /// Close the gate until `until`
    pub fn set(&mut self, until: u64) {
        self.until = Some(until);
    }

    /// True iff `now` is strictly past the stored timestamp
    pub fn is_expired(&self, now: u64) -> bool {
        match self.until {
            Some(until) => now > until,
            None => true,
        }
    }

    pub fn reset(&mut self) {
        self.until = None;
    }

    pub fn until(&self) -> Option<u64> {
        self.until
    }
}

/// Current wall clock in milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
