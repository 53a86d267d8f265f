//! Bounded concurrency admission for coin-state validation (spec.md §4.B).
//! Grounded on `chia.util.limited_semaphore.LimitedSemaphore`: a counting
//! semaphore for the `active` slots plus a separate `waiting` budget so
//! producers can be rejected outright instead of queuing unboundedly.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("no waiting slot available")]
    Full,
}

/// `active + waiting <= active_cap + waiting_cap`, `active <= active_cap`.
pub struct BoundedAdmission {
    semaphore: Semaphore,
    active_cap: usize,
    waiting_cap: usize,
    waiting: AtomicUsize,
    /// Labels of currently-active permits, keyed by a monotonic id, so the
    /// diagnostics monitor can name anything held past its threshold
    /// (spec.md §4.I's "dump stacks of long-held validations").
    holds: StdMutex<HashMap<u64, (String, Instant)>>,
    next_hold_id: AtomicU64,
}

impl BoundedAdmission {
    pub fn new(active_cap: usize, waiting_cap: usize) -> Self {
        Self {
            semaphore: Semaphore::new(active_cap),
            active_cap,
            waiting_cap,
            waiting: AtomicUsize::new(0),
            holds: StdMutex::new(HashMap::new()),
            next_hold_id: AtomicU64::new(0),
        }
    }

    /// Labels (and how long each has been held) of every active permit held
    /// longer than `threshold`.
    pub fn long_held(&self, threshold: Duration) -> Vec<(String, Duration)> {
        let now = Instant::now();
        self.holds
            .lock()
            .expect("admission holds poisoned")
            .values()
            .filter_map(|(label, started_at)| {
                let held_for = now.duration_since(*started_at);
                (held_for >= threshold).then(|| (label.clone(), held_for))
            })
            .collect()
    }

    pub fn active_cap(&self) -> usize {
        self.active_cap
    }

    /// Number of entrants that have reserved a waiting slot but not yet been
    /// granted an active one. Producers outside this module must back off
    /// once this exceeds the high watermark (spec.md §4.B).
    pub fn pending(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn active(&self) -> usize {
        self.active_cap - self.semaphore.available_permits()
    }

    /// Reserves a waiting slot, failing immediately if the admission is
    /// already full. On success, await the returned future to obtain the
    /// active slot.
    pub fn try_enter(&self) -> Result<Admission<'_>, AdmissionError> {
        if self.active() + self.pending() >= self.active_cap + self.waiting_cap {
            return Err(AdmissionError::Full);
        }
        self.waiting.fetch_add(1, Ordering::SeqCst);
        Ok(Admission { admission: self })
    }
}

/// A reserved waiting slot, not yet an active permit.
pub struct Admission<'a> {
    admission: &'a BoundedAdmission,
}

impl<'a> Admission<'a> {
    /// Waits for an active slot. On grant, `waiting -= 1; active += 1`.
    pub async fn enter(self) -> ActivePermit<'a> {
        self.enter_labeled(String::new()).await
    }

    /// Like `enter`, but records `label` so the diagnostics monitor can
    /// name this permit if it is held past `DIAGNOSTICS_LONG_HELD_THRESHOLD`.
    pub async fn enter_labeled(self, label: impl Into<String>) -> ActivePermit<'a> {
        let permit = self
            .admission
            .semaphore
            .acquire()
            .await
            .expect("semaphore is never closed");
        self.admission.waiting.fetch_sub(1, Ordering::SeqCst);
        // `permit` borrows `self.admission`'s semaphore; detach it from
        // `self` so our `Drop` (which only decrements `waiting`) does not
        // also try to release it.
        let admission = self.admission;
        std::mem::forget(self);

        let hold_id = admission.next_hold_id.fetch_add(1, Ordering::SeqCst);
        admission
            .holds
            .lock()
            .expect("admission holds poisoned")
            .insert(hold_id, (label.into(), Instant::now()));

        ActivePermit {
            admission,
            permit,
            hold_id,
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.admission.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An active validation slot. Dropping it frees the slot (`active -= 1`)
/// and clears this permit's diagnostics hold entry.
pub struct ActivePermit<'a> {
    admission: &'a BoundedAdmission,
    permit: SemaphorePermit<'a>,
    hold_id: u64,
}

impl std::fmt::Debug for ActivePermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivePermit").finish()
    }
}

impl Drop for ActivePermit<'_> {
    fn drop(&mut self) {
        // SemaphorePermit's own Drop releases the active slot; we only need
        // to clear our own hold entry here.
        let _ = &self.permit;
        self.admission
            .holds
            .lock()
            .expect("admission holds poisoned")
            .remove(&self.hold_id);
    }
}

/// Convenience alias used by callers that just want "give me a slot".
pub type SharedAdmission = Arc<BoundedAdmission>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_when_full_then_accepts_after_a_leave() {
        let admission = BoundedAdmission::new(2, 1);

        let a = admission.try_enter().unwrap().enter().await;
        let b = admission.try_enter().unwrap().enter().await;
        // Both active slots taken; one waiting slot remains available for a
        // reservation (not yet granted).
        let c = admission.try_enter().unwrap();

        // 4th try_enter: active(2) + waiting(1, held by `c`) == cap(3) -> Full.
        assert!(matches!(admission.try_enter(), Err(AdmissionError::Full)));

        drop(a);
        // After a leave, c can be granted, and a new try_enter succeeds.
        let _c_active = c.enter().await;
        drop(b);
        assert!(admission.try_enter().is_ok());
    }

    #[tokio::test]
    async fn pending_reflects_reserved_but_ungranted_waiters() {
        let admission = BoundedAdmission::new(0, 3);
        let _r1 = admission.try_enter().unwrap();
        let _r2 = admission.try_enter().unwrap();
        assert_eq!(admission.pending(), 2);
    }

    #[tokio::test]
    async fn long_held_names_permits_past_the_threshold_and_forgets_them_on_drop() {
        let admission = BoundedAdmission::new(2, 1);
        let permit = admission
            .try_enter()
            .unwrap()
            .enter_labeled("peer=aaaa coin_state=bbbb")
            .await;

        assert!(admission.long_held(Duration::from_secs(0)).iter().any(|(label, _)| label == "peer=aaaa coin_state=bbbb"));
        assert!(admission.long_held(Duration::from_secs(3600)).is_empty());

        drop(permit);
        assert!(admission.long_held(Duration::from_secs(0)).is_empty());
    }
}
