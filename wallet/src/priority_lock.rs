//! Single-owner critical section served to three waiter classes by strict
//! priority (spec.md §4.A). Grounded in the same spirit as the teacher's
//! `tokio::sync::{Mutex, Semaphore}` usage throughout `daemon/src/p2p`
//! (see `peer_list/peer.rs`'s `objects_semaphore`), but hand-rolled because
//! neither `tokio::sync::Mutex` nor `Semaphore` expose priority classes.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum PriorityLockError {
    #[error("priority lock queue is full")]
    QueueFull,
}

/// Waiter classes, in descending priority. Ultra is reserved for
/// subscription installation, High for coin-state-update application, Low
/// for peak advancement (spec.md §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Priority {
    Ultra = 0,
    High = 1,
    Low = 2,
}

const CLASSES: usize = 3;

struct Waiter {
    id: u64,
    sender: oneshot::Sender<()>,
}

struct Inner {
    held: bool,
    queues: [VecDeque<Waiter>; CLASSES],
    in_queue: usize,
    next_id: u64,
}

pub struct PriorityLock {
    inner: Mutex<Inner>,
    max_queue: usize,
}

impl PriorityLock {
    pub fn new(max_queue: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                held: false,
                queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                in_queue: 0,
                next_id: 0,
            }),
            max_queue,
        }
    }

    /// Current depth of each class's waiter queue, for diagnostics.
    pub fn queue_depths(&self) -> [usize; CLASSES] {
        let inner = self.inner.lock().expect("priority lock poisoned");
        [
            inner.queues[0].len(),
            inner.queues[1].len(),
            inner.queues[2].len(),
        ]
    }

    pub async fn acquire(&self, class: Priority) -> Result<Guard<'_>, PriorityLockError> {
        let pending = {
            let mut inner = self.inner.lock().expect("priority lock poisoned");
            if !inner.held && inner.queues.iter().all(VecDeque::is_empty) {
                inner.held = true;
                None
            } else {
                if inner.in_queue >= self.max_queue {
                    return Err(PriorityLockError::QueueFull);
                }
                let (tx, rx) = oneshot::channel();
                let id = inner.next_id;
                inner.next_id += 1;
                inner.queues[class as usize].push_back(Waiter { id, sender: tx });
                inner.in_queue += 1;
                Some(PendingAcquire {
                    lock: self,
                    id,
                    class,
                    rx,
                    done: false,
                })
            }
        };

        if let Some(pending) = pending {
            pending.await;
        }

        Ok(Guard { lock: self })
    }

    /// Selection rule on release: scan classes 0,1,2; the head of the first
    /// non-empty queue becomes the next holder. No fairness across classes.
    fn release(&self) {
        let mut inner = self.inner.lock().expect("priority lock poisoned");
        loop {
            let mut chosen = None;
            for queue in inner.queues.iter_mut() {
                if let Some(waiter) = queue.pop_front() {
                    chosen = Some(waiter);
                    break;
                }
            }
            match chosen {
                None => {
                    inner.held = false;
                    break;
                }
                Some(waiter) => {
                    inner.in_queue -= 1;
                    // Ownership transfers to `waiter` whether or not it is
                    // still listening; `held` stays true either way.
                    if waiter.sender.send(()).is_ok() {
                        break;
                    }
                    // Waiter was cancelled after being handed the permit but
                    // before observing it; keep scanning for the next one.
                }
            }
        }
    }
}

/// Future returned while a waiter is queued. Its `Drop` implements the
/// cancellation discipline of spec.md §4.A: if dropped before acquiring, it
/// removes itself from its queue and decrements the queue-depth counter; if
/// dropped after being handed the permit (but before this future observed
/// it), it releases the lock on the waiter's behalf.
struct PendingAcquire<'a> {
    lock: &'a PriorityLock,
    id: u64,
    class: Priority,
    rx: oneshot::Receiver<()>,
    done: bool,
}

impl Future for PendingAcquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(_) => {
                this.done = true;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = self.lock.inner.lock().expect("priority lock poisoned");
        let queue = &mut inner.queues[self.class as usize];
        if let Some(pos) = queue.iter().position(|w| w.id == self.id) {
            queue.remove(pos);
            inner.in_queue -= 1;
            return;
        }
        // Already popped by `release()` (we hold the permit) but cancelled
        // before observing it: release on our own behalf.
        drop(inner);
        self.lock.release();
    }
}

/// RAII holder of the critical section. Release is guaranteed on every
/// exit path, including cancellation of the holding task.
pub struct Guard<'a> {
    lock: &'a PriorityLock,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
