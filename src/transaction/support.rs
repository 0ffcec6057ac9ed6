// ============================================================================
// Resource Holder Support
// ============================================================================
//
// Bookkeeping carried by every transactional resource holder: whether the
// holder is synchronized with a transaction, the rollback-only mark, an
// optional deadline and a reference count for nested requests.
//
// The deadline is informational. The holder never enforces it on delegated
// calls; the owning transaction manager reads it.
//
// ============================================================================

use crate::core::{MqError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct HolderSupport {
    synchronized_with_transaction: bool,
    rollback_only: bool,
    deadline: Option<DateTime<Utc>>,
    reference_count: u32,
    is_void: bool,
}

impl HolderSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_synchronized_with_transaction(&mut self, synchronized: bool) {
        self.synchronized_with_transaction = synchronized;
    }

    pub fn is_synchronized_with_transaction(&self) -> bool {
        self.synchronized_with_transaction
    }

    /// Mark the resource transaction as rollback-only
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Set the deadline `timeout` from now
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let delta = TimeDelta::from_std(timeout).map_err(|_| {
            MqError::InvalidArgument(format!("Timeout {:?} is out of range", timeout))
        })?;
        let deadline = Utc::now()
            .checked_add_signed(delta)
            .ok_or_else(|| MqError::InvalidArgument(format!("Timeout {:?} is out of range", timeout)))?;
        self.deadline = Some(deadline);
        Ok(())
    }

    pub fn set_timeout_in_seconds(&mut self, seconds: u64) -> Result<()> {
        self.set_timeout(Duration::from_secs(seconds))
    }

    pub fn has_timeout(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Time left until the deadline
    ///
    /// # Errors
    /// `IllegalState` without a deadline. `TransactionTimedOut` once the
    /// deadline has been reached, in which case the holder is also marked
    /// rollback-only.
    pub fn time_to_live(&mut self) -> Result<Duration> {
        let deadline = self
            .deadline
            .ok_or_else(|| MqError::IllegalState("No timeout specified for this resource holder".into()))?;

        let remaining = deadline - Utc::now();
        if remaining <= TimeDelta::zero() {
            return Err(self.timed_out(deadline));
        }
        remaining.to_std().map_err(|_| self.timed_out(deadline))
    }

    /// Time left until the deadline, rounded up to whole seconds
    pub fn time_to_live_in_seconds(&mut self) -> Result<u64> {
        let remaining = self.time_to_live()?;
        let millis = remaining.as_millis();
        let seconds = millis.div_ceil(1000) as u64;
        if seconds == 0 {
            let deadline = self.deadline.unwrap_or_else(Utc::now);
            return Err(self.timed_out(deadline));
        }
        Ok(seconds)
    }

    fn timed_out(&mut self, deadline: DateTime<Utc>) -> MqError {
        self.set_rollback_only();
        MqError::TransactionTimedOut(format!("deadline was {}", deadline))
    }

    /// Note that the resource was requested once more
    pub fn requested(&mut self) {
        self.reference_count += 1;
    }

    /// Note that one request for the resource was released
    pub fn released(&mut self) {
        self.reference_count = self.reference_count.saturating_sub(1);
    }

    /// Whether there are still open references
    pub fn is_open(&self) -> bool {
        self.reference_count > 0
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    /// Reset the transactional state, keeping the reference count
    pub fn clear(&mut self) {
        self.synchronized_with_transaction = false;
        self.rollback_only = false;
        self.deadline = None;
    }

    /// Reset the transactional state and the reference count
    pub fn reset(&mut self) {
        self.clear();
        self.reference_count = 0;
    }

    /// Note that the holder was unbound from its scope
    pub fn unbound(&mut self) {
        self.is_void = true;
    }

    pub fn is_void(&self) -> bool {
        self.is_void
    }
}
