//! Bus lock tracking.
//!
//! A master holding the lock owns the bus across a multi-transfer sequence
//! (atomic read-modify-write); arbitration is gated so no other master can
//! reach the address phase until the lock is dropped.

/// Who, if anyone, holds the bus lock.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct LockState {
    owner: Option<u32>,
}

impl LockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `master_id`. Returns `false` (and changes nothing)
    /// if another master already holds it; taking a lock already held by
    /// `master_id` succeeds and is a no-op.
    pub fn acquire(&mut self, master_id: u32) -> bool {
        match self.owner {
            None => {
                self.owner = Some(master_id);
                true
            }
            Some(owner) => owner == master_id,
        }
    }

    /// Drop the lock held by `master_id`.
    ///
    /// # Panics
    ///
    /// Panics if `master_id` does not hold the lock. Releasing a foreign
    /// lock is a protocol violation by a collaborator, not a bus condition,
    /// and must not be silently tolerated.
    pub fn release(&mut self, master_id: u32) {
        assert_eq!(
            self.owner,
            Some(master_id),
            "master {} released a bus lock it does not hold (owner: {:?})",
            master_id,
            self.owner
        );
        self.owner = None;
    }

    pub fn is_locked(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_locked_by(&self, master_id: u32) -> bool {
        self.owner == Some(master_id)
    }

    /// Arbitration gate: `true` if the lock is held by someone else.
    pub fn is_locked_by_other(&self, master_id: u32) -> bool {
        self.owner.is_some_and(|owner| owner != master_id)
    }

    pub fn owner(&self) -> Option<u32> {
        self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive() {
        let mut lock = LockState::new();
        assert!(!lock.is_locked());
        assert!(lock.acquire(1));
        assert!(lock.is_locked_by(1));
        assert!(!lock.acquire(2));
        assert!(lock.is_locked_by(1));
        // Re-acquiring one's own lock is fine.
        assert!(lock.acquire(1));
    }

    #[test]
    fn release_then_reacquire() {
        let mut lock = LockState::new();
        assert!(lock.acquire(1));
        lock.release(1);
        assert!(!lock.is_locked());
        assert!(lock.acquire(2));
        assert!(lock.is_locked_by_other(1));
        assert!(!lock.is_locked_by_other(2));
    }

    #[test]
    #[should_panic(expected = "released a bus lock it does not hold")]
    fn foreign_release_is_fatal() {
        let mut lock = LockState::new();
        assert!(lock.acquire(1));
        lock.release(2);
    }

    #[test]
    #[should_panic(expected = "released a bus lock it does not hold")]
    fn release_without_lock_is_fatal() {
        let mut lock = LockState::new();
        lock.release(0);
    }
}
