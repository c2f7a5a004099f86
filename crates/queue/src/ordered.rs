//! Ordered concurrency queue.
//!
//! Each task submitted with [`OrderedQueue::add`] has two phases:
//!
//! 1. **work**: runs concurrently with other admitted tasks, at most
//!    `concurrency` at a time, and may finish in any order;
//! 2. **commit**: runs strictly in ascending index order `0, 1, 2, ...`,
//!    each commit starting only after the previous one has returned.
//!
//! A task is admitted to its work phase only when it is the smallest index
//! still waiting, a concurrency slot is free, and its index is inside the
//! tolerance window `index < committed + tolerance`. The window bounds how
//! far producers can run ahead of the ordered consumer.
//!
//! All counters live in one [`watch`] channel: every mutation happens in a
//! single critical section and wakes every waiter, which then re-checks its
//! own condition. Point-to-point waits ("work N started", "commit N done")
//! are predicates over that shared state.
//!
//! The queue has no opinion about errors. A failing work phase hands its
//! error to the commit phase like any other value; callers decide whether
//! to stop scheduling.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

/// Concurrency limit and tolerance window of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Maximum number of work phases running at once.
    pub concurrency: usize,
    /// Maximum distance past the last committed index a task may be admitted.
    pub tolerance: u64,
}

impl QueueSettings {
    pub const fn new(concurrency: usize, tolerance: u64) -> Self {
        Self {
            concurrency,
            tolerance,
        }
    }

    /// Settings with no tolerance window, only a concurrency limit.
    pub const fn unbounded(concurrency: usize) -> Self {
        Self::new(concurrency, u64::MAX)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::unbounded(1)
    }
}

/// Point-in-time counters of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Work phases currently running.
    pub running: usize,
    /// Tasks added but not yet admitted.
    pub waiting: usize,
    /// Number of committed indices; also the next index to commit.
    pub committed: u64,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    running: usize,
    next_commit: u64,
    waitlist: BinaryHeap<Reverse<u64>>,
    // Only uncommitted indices are tracked; anything below `next_commit`
    // has started and finished by construction.
    started: HashSet<u64>,
    finished: HashSet<u64>,
    closed: bool,
}

impl QueueState {
    fn can_admit(&self, index: u64, settings: &QueueSettings) -> bool {
        self.running < settings.concurrency
            && self.waitlist.peek() == Some(&Reverse(index))
            && index < self.next_commit.saturating_add(settings.tolerance)
    }

    /// True while `index` waits for admission or has not yet committed.
    fn is_pending(&self, index: u64) -> bool {
        self.started.contains(&index) || self.waitlist.iter().any(|Reverse(i)| *i == index)
    }

    fn work_started(&self, index: u64) -> bool {
        index < self.next_commit || self.started.contains(&index)
    }

    fn work_finished(&self, index: u64) -> bool {
        index < self.next_commit || self.finished.contains(&index)
    }
}

struct Shared {
    name: &'static str,
    settings: QueueSettings,
    state: watch::Sender<QueueState>,
}

/// Bounded-concurrency queue with strictly ordered commits.
///
/// Cloning is cheap and yields a handle to the same queue.
#[derive(Clone)]
pub struct OrderedQueue {
    shared: Arc<Shared>,
}

impl OrderedQueue {
    /// Creates a queue. `name` only labels trace output.
    pub fn new(name: &'static str, settings: QueueSettings) -> Self {
        let settings = QueueSettings {
            concurrency: settings.concurrency.max(1),
            tolerance: settings.tolerance.max(1),
        };
        let (state, _) = watch::channel(QueueState::default());
        Self {
            shared: Arc::new(Shared {
                name,
                settings,
                state,
            }),
        }
    }

    pub fn settings(&self) -> QueueSettings {
        self.shared.settings
    }

    /// Submits task `index`.
    ///
    /// `work(index)` runs once the task is admitted; its output is passed to
    /// `commit(output, index)`, which runs after every lower index has
    /// committed. Returns the commit result, or `None` if the queue was
    /// already closed or `index` was already added, in which case neither
    /// closure runs.
    pub async fn add<W, WF, C, CF, T>(&self, index: u64, work: W, commit: C) -> Option<T>
    where
        W: FnOnce(u64) -> WF,
        WF: Future,
        C: FnOnce(WF::Output, u64) -> CF,
        CF: Future<Output = T>,
    {
        let shared = &*self.shared;
        let mut rx = shared.state.subscribe();

        let queued = shared.state.send_if_modified(|s| {
            if s.closed || index < s.next_commit || s.is_pending(index) {
                return false;
            }
            s.waitlist.push(Reverse(index));
            true
        });
        if !queued {
            trace!(queue = shared.name, index, "add ignored");
            return None;
        }
        let mut ticket = Ticket {
            shared,
            index,
            phase: Phase::Waiting,
        };

        // Admission.
        loop {
            drop(rx.borrow_and_update());
            let admitted = shared.state.send_if_modified(|s| {
                if !s.can_admit(index, &shared.settings) {
                    return false;
                }
                s.waitlist.pop();
                s.running += 1;
                s.started.insert(index);
                true
            });
            if admitted {
                break;
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
        ticket.phase = Phase::Running;
        trace!(queue = shared.name, index, "work started");

        let output = work(index).await;

        shared.state.send_modify(|s| {
            s.running -= 1;
            s.finished.insert(index);
        });
        ticket.phase = Phase::Done;
        trace!(queue = shared.name, index, "work finished");

        if rx.wait_for(|s| s.next_commit == index).await.is_err() {
            return None;
        }

        let result = commit(output, index).await;

        shared.state.send_modify(|s| {
            s.next_commit += 1;
            s.started.remove(&index);
            s.finished.remove(&index);
        });
        trace!(queue = shared.name, index, "committed");

        Some(result)
    }

    /// Waits until the work phase of `index` has begun.
    pub async fn wait_for_work_started(&self, index: u64) {
        self.wait_until(|s| s.work_started(index)).await;
    }

    /// Waits until the work phase of `index` has returned.
    pub async fn wait_for_work(&self, index: u64) {
        self.wait_until(|s| s.work_finished(index)).await;
    }

    /// Waits until the commit phase of `index` has returned.
    pub async fn wait_for_commit(&self, index: u64) {
        self.wait_until(|s| index < s.next_commit).await;
    }

    /// Waits until fewer than `size` tasks are waiting for admission.
    pub async fn wait_for_line(&self, size: usize) {
        self.wait_until(|s| s.waitlist.len() < size).await;
    }

    /// Marks the queue closed. Later calls to [`add`](Self::add) do nothing;
    /// tasks already added still run to completion.
    pub fn close(&self) {
        self.shared.state.send_if_modified(|s| {
            let changed = !s.closed;
            s.closed = true;
            changed
        });
    }

    /// Resolves once the queue has been closed.
    pub async fn closed(&self) {
        self.wait_until(|s| s.closed).await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.borrow().closed
    }

    pub fn stats(&self) -> QueueStats {
        let s = self.shared.state.borrow();
        QueueStats {
            running: s.running,
            waiting: s.waitlist.len(),
            committed: s.next_commit,
            closed: s.closed,
        }
    }

    async fn wait_until(&self, mut predicate: impl FnMut(&QueueState) -> bool) {
        let mut rx = self.shared.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|s| predicate(s)).await;
    }
}

enum Phase {
    Waiting,
    Running,
    Done,
}

/// Releases the waitlist entry or concurrency slot of an `add` future that
/// is dropped before its work phase returns.
struct Ticket<'a> {
    shared: &'a Shared,
    index: u64,
    phase: Phase,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let index = self.index;
        match self.phase {
            Phase::Waiting => self.shared.state.send_modify(|s| {
                s.waitlist.retain(|Reverse(i)| *i != index);
            }),
            Phase::Running => self.shared.state.send_modify(|s| {
                s.running -= 1;
                s.started.remove(&index);
            }),
            Phase::Done => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PauseGate;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn spawn_task(
        queue: &OrderedQueue,
        index: u64,
        delay_ms: u64,
        log: Arc<Mutex<Vec<u64>>>,
    ) -> tokio::task::JoinHandle<Option<u64>> {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .add(
                    index,
                    move |i| async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        i * 10
                    },
                    move |out, i| async move {
                        log.lock().unwrap().push(i);
                        out
                    },
                )
                .await
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn commits_in_index_order_despite_reverse_completion() {
        let queue = OrderedQueue::new("test", QueueSettings::unbounded(8));
        let log = Arc::new(Mutex::new(Vec::new()));

        // Later indices finish first; submission order is scrambled too.
        let order = [7u64, 3, 0, 5, 1, 6, 2, 4, 9, 8, 11, 10];
        let handles: Vec<_> = order
            .iter()
            .map(|&i| spawn_task(&queue, i, 60 - i * 5, Arc::clone(&log)))
            .collect();

        for (handle, &i) in handles.into_iter().zip(order.iter()) {
            assert_eq!(handle.await.unwrap(), Some(i * 10));
        }
        assert_eq!(*log.lock().unwrap(), (0..12).collect::<Vec<_>>());
        assert_eq!(queue.stats().committed, 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_limit() {
        let queue = OrderedQueue::new("test", QueueSettings::unbounded(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..30u64)
            .map(|i| {
                let queue = queue.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    queue
                        .add(
                            i,
                            move |_| async move {
                                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(5)).await;
                                active.fetch_sub(1, Ordering::SeqCst);
                            },
                            |(), _| async {},
                        )
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2, "work never overlapped");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn tolerance_window_bounds_admission() {
        let tolerance = 2;
        let queue = OrderedQueue::new("test", QueueSettings::new(10, tolerance));
        let violations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20u64)
            .map(|i| {
                let queue = queue.clone();
                let probe = queue.clone();
                let violations = Arc::clone(&violations);
                tokio::spawn(async move {
                    queue
                        .add(
                            i,
                            move |i| async move {
                                if i >= probe.stats().committed + tolerance {
                                    violations.fetch_add(1, Ordering::SeqCst);
                                }
                            },
                            |(), _| async {
                                // Slow consumer.
                                tokio::time::sleep(Duration::from_millis(3)).await;
                            },
                        )
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn work_errors_reach_commit() {
        let queue = OrderedQueue::new("test", QueueSettings::default());
        let result = queue
            .add(
                0,
                |_| async { Err::<u8, _>("boom") },
                |out, _| async move { out.map_err(|e| e.to_uppercase()) },
            )
            .await;
        assert_eq!(result, Some(Err("BOOM".to_string())));
    }

    #[tokio::test]
    async fn add_after_close_is_ignored() {
        let queue = OrderedQueue::new("test", QueueSettings::default());
        queue.close();
        assert!(queue.is_closed());

        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let result = queue
            .add(
                0,
                move |_| async move {
                    r.fetch_add(1, Ordering::SeqCst);
                },
                |(), _| async {},
            )
            .await;
        assert!(result.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn already_committed_index_is_ignored() {
        let queue = OrderedQueue::new("test", QueueSettings::default());
        assert_eq!(queue.add(0, |_| async {}, |(), i| async move { i }).await, Some(0));
        assert_eq!(queue.add(0, |_| async {}, |(), i| async move { i }).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_of_pending_index_is_ignored() {
        let queue = OrderedQueue::new("test", QueueSettings::unbounded(1));
        let gate = PauseGate::new();
        gate.pause();
        let log = Arc::new(Mutex::new(Vec::new()));

        let gated = |index: u64| {
            let queue = queue.clone();
            let gate = gate.clone();
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                queue
                    .add(
                        index,
                        move |_| async move { gate.wait().await },
                        move |(), i| async move { log.lock().unwrap().push(i) },
                    )
                    .await
            })
        };

        let running = gated(0);
        queue.wait_for_work_started(0).await;
        let waiting = gated(2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.stats().waiting, 1);

        // Neither copy may run or block.
        let dup_running = tokio::time::timeout(
            Duration::from_millis(200),
            queue.add(0, |_| async {}, |(), i| async move { i }),
        );
        assert_eq!(dup_running.await.unwrap(), None);
        let dup_waiting = tokio::time::timeout(
            Duration::from_millis(200),
            queue.add(2, |_| async {}, |(), i| async move { i }),
        );
        assert_eq!(dup_waiting.await.unwrap(), None);

        gate.unpause();
        let middle = gated(1);
        for handle in [running, middle, waiting] {
            assert_eq!(handle.await.unwrap(), Some(()));
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(queue.stats().committed, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gated_work_resumes_in_index_order() {
        let queue = OrderedQueue::new("test", QueueSettings::unbounded(1));
        let gate = PauseGate::new();
        gate.pause();
        let worked = Arc::new(Mutex::new(Vec::new()));

        let gated = |index: u64| {
            let queue = queue.clone();
            let gate = gate.clone();
            let worked = Arc::clone(&worked);
            tokio::spawn(async move {
                queue
                    .add(
                        index,
                        move |i| async move {
                            gate.wait().await;
                            worked.lock().unwrap().push(i);
                        },
                        |(), _| async {},
                    )
                    .await
            })
        };

        let mut handles = vec![gated(0)];
        queue.wait_for_work_started(0).await;
        handles.extend([3u64, 1, 4, 2].map(gated));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(worked.lock().unwrap().is_empty());
        assert_eq!(queue.stats().running, 1);
        assert_eq!(queue.stats().waiting, 4);

        gate.unpause();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*worked.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn sentinel_commit_closes_queue() {
        let queue = OrderedQueue::new("test", QueueSettings::unbounded(2));
        let closer = queue.clone();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.closed().await })
        };

        let q = queue.clone();
        let first = tokio::spawn(async move { q.add(0, |_| async {}, |(), _| async {}).await });
        queue
            .add(1, |_| async {}, move |(), _| async move { closer.close() })
            .await;
        first.await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() did not resolve")
            .unwrap();
        assert_eq!(queue.stats().committed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn point_to_point_waits() {
        let queue = OrderedQueue::new("test", QueueSettings::unbounded(2));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let q = queue.clone();
        let task = tokio::spawn(async move {
            q.add(
                0,
                |_| async move {
                    let _ = release_rx.await;
                },
                |(), _| async {},
            )
            .await
        });

        tokio::time::timeout(Duration::from_secs(1), queue.wait_for_work_started(0))
            .await
            .expect("work 0 never started");
        assert_eq!(queue.stats().running, 1);

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), queue.wait_for_work(0))
            .await
            .expect("work 0 never finished");
        tokio::time::timeout(Duration::from_secs(1), queue.wait_for_commit(0))
            .await
            .expect("commit 0 never finished");
        assert!(task.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn wait_for_line_tracks_waitlist() {
        let queue = OrderedQueue::new("test", QueueSettings::new(1, 1));

        // Index 1 cannot be admitted until index 0 commits.
        let q = queue.clone();
        let parked = tokio::spawn(async move { q.add(1, |_| async {}, |(), _| async {}).await });
        tokio::task::yield_now().await;
        while queue.stats().waiting == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.stats().waiting, 1);

        let q = queue.clone();
        let line = tokio::spawn(async move { q.wait_for_line(1).await });

        queue.add(0, |_| async {}, |(), _| async {}).await;
        tokio::time::timeout(Duration::from_secs(1), line)
            .await
            .expect("line never cleared")
            .unwrap();
        assert!(parked.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_task_releases_its_slot() {
        let queue = OrderedQueue::new("test", QueueSettings::unbounded(1));

        let q = queue.clone();
        let stuck = tokio::spawn(async move {
            q.add(0, |_| std::future::pending::<()>(), |(), _| async {})
                .await
        });
        queue.wait_for_work_started(0).await;
        assert_eq!(queue.stats().running, 1);

        stuck.abort();
        let _ = stuck.await;
        assert_eq!(queue.stats().running, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn commits_follow_index_order_for_any_schedule(
            (order, delays) in (1usize..16).prop_flat_map(|n| (
                Just((0..n as u64).collect::<Vec<_>>()).prop_shuffle(),
                prop::collection::vec(0u64..6, n),
            )),
            concurrency in 1usize..5,
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();
            let log = Arc::new(Mutex::new(Vec::new()));
            rt.block_on(async {
                let queue = OrderedQueue::new("test", QueueSettings::unbounded(concurrency));
                let handles: Vec<_> = order
                    .iter()
                    .map(|&i| spawn_task(&queue, i, delays[i as usize], Arc::clone(&log)))
                    .collect();
                for (handle, &i) in handles.into_iter().zip(order.iter()) {
                    assert_eq!(handle.await.unwrap(), Some(i * 10));
                }
            });
            let committed = log.lock().unwrap().clone();
            prop_assert_eq!(committed, (0..order.len() as u64).collect::<Vec<_>>());
        }
    }
}
