//! Periodic monitor of lock/admission state (spec.md §4.I, elaborated in
//! SPEC_FULL.md §4.I). Grounded on `LimitedSemaphore.monitor` in
//! `chia/util/limited_semaphore.py`. Does not implement that coroutine's
//! commented-out cancel-a-random-task branch (spec.md §9 Open Question).

use crate::{
    admission::BoundedAdmission,
    config::{DIAGNOSTICS_LONG_HELD_THRESHOLD, DIAGNOSTICS_TICK},
    priority_lock::PriorityLock,
};
use log::{info, log_enabled, warn, Level};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::interval;

/// Runs until `running` is set to `false`. Callers spawn this on a
/// background task and flip the flag to stop it (spec.md §9:
/// cooperative-task cancellation is plumbed through an explicit signal
/// rather than relying on ambient task-abort). Any admission permit held
/// longer than `long_held_threshold` is named in a warning log (spec.md §2
/// component I: "dump stacks of long-held validations").
pub async fn run(
    lock: Arc<PriorityLock>,
    admission: Arc<BoundedAdmission>,
    running: Arc<AtomicBool>,
    tick: Duration,
    long_held_threshold: Duration,
) {
    let mut ticker = interval(tick);
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if log_enabled!(Level::Info) {
            let depths = lock.queue_depths();
            info!(
                "priority lock queues: ultra={} high={} low={}; admission: active_cap={} pending={}",
                depths[0],
                depths[1],
                depths[2],
                admission.active_cap(),
                admission.pending(),
            );
        }

        for (label, held_for) in admission.long_held(long_held_threshold) {
            warn!("validation held {held_for:?} past threshold: {label}");
        }
    }
}

/// Default-tick, default-threshold convenience wrapper.
pub async fn run_default(lock: Arc<PriorityLock>, admission: Arc<BoundedAdmission>, running: Arc<AtomicBool>) {
    run(lock, admission, running, DIAGNOSTICS_TICK, DIAGNOSTICS_LONG_HELD_THRESHOLD).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stops_promptly_once_running_flag_clears() {
        let lock = Arc::new(PriorityLock::new(10));
        let admission = Arc::new(BoundedAdmission::new(6, 20));
        let running = Arc::new(AtomicBool::new(true));
        let running2 = running.clone();

        let handle = tokio::spawn(async move {
            run(lock, admission, running2, Duration::from_millis(10), DIAGNOSTICS_LONG_HELD_THRESHOLD).await;
        });

        tokio::time::sleep(Duration::from_millis(25)).await;
        running.store(false, Ordering::SeqCst);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor task should stop shortly after the flag clears")
            .unwrap();
    }

    #[tokio::test]
    async fn runs_a_tick_with_a_long_held_permit_without_panicking() {
        let lock = Arc::new(PriorityLock::new(10));
        let admission = Arc::new(BoundedAdmission::new(6, 20));
        let running = Arc::new(AtomicBool::new(true));
        let running2 = running.clone();

        let permit = admission
            .try_enter()
            .unwrap()
            .enter_labeled("peer=aaaa coin_state=bbbb")
            .await;
        assert!(!admission.long_held(Duration::from_millis(1)).is_empty());

        let admission2 = admission.clone();
        let handle = tokio::spawn(async move {
            // A 1ms threshold guarantees the held permit is flagged on the
            // very first tick.
            run(lock, admission2, running2, Duration::from_millis(5), Duration::from_millis(1)).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        running.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        drop(permit);
        assert!(admission.long_held(Duration::from_millis(1)).is_empty());
    }
}
