//! Rate-limited queue.
//!
//! Per key, the queue bounds the number of works in flight and the number of
//! admissions within a sliding window. Works that cannot start immediately
//! wait, highest priority first and FIFO among equal priorities. A key that
//! exceeds its window is blocked for a while and rejected outright. Keys
//! whose history has expired are forgotten as other works complete.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use super::{OperationQueue, QueueOptions, QueueWork};
use crate::errors::QueueError;

/// Configuration of a [`RateLimitQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// When `false`, window checks are skipped. The concurrency bound stays.
    pub enabled: bool,
    /// Length of the sliding request window.
    pub window: Duration,
    /// Admissions allowed per key within `window`.
    pub max_requests: usize,
    /// Works allowed in flight per key.
    pub max_concurrent: usize,
    /// How long a key stays blocked after exceeding its window.
    pub block_duration: Duration,
    /// Keys that bypass window checks.
    pub whitelist: HashSet<String>,
    /// Remove successful works from the window history.
    pub skip_successful: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(60),
            max_requests: 100,
            max_concurrent: 10,
            block_duration: Duration::from_secs(300),
            whitelist: HashSet::new(),
            skip_successful: false,
        }
    }
}

/// Snapshot of queue-wide counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueMetrics {
    /// Works admitted since creation.
    pub total_requests: u64,
    /// Works rejected by the window checks.
    pub blocked_requests: u64,
    /// Works currently running.
    pub active_requests: usize,
    /// Works currently waiting for admission.
    pub queued_requests: usize,
    /// Smoothed work duration.
    pub average_response_time: Duration,
}

/// Snapshot of a single key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyStatus {
    pub requests_in_window: usize,
    pub active: usize,
    pub queued: usize,
    /// Set while the key is blocked.
    pub blocked_until: Option<Instant>,
    /// Admissions left in the current window.
    pub remaining: usize,
}

struct Waiter {
    priority: u8,
    seq: u64,
    slot: oneshot::Sender<OwnedSemaphorePermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: highest priority first, then lowest sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct KeyState {
    permits: usize,
    semaphore: Arc<Semaphore>,
    waiting: BinaryHeap<Waiter>,
    history: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl KeyState {
    fn new(permits: usize) -> Self {
        Self {
            permits,
            semaphore: Arc::new(Semaphore::new(permits)),
            waiting: BinaryHeap::new(),
            history: VecDeque::new(),
            blocked_until: None,
        }
    }

    fn prune_history(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.history.front() {
            if now.duration_since(*oldest) >= window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn active(&self) -> usize {
        self.permits - self.semaphore.available_permits()
    }

    fn queued(&self) -> usize {
        self.waiting.iter().filter(|w| !w.slot.is_closed()).count()
    }

    /// Give free permits to waiters, highest priority first.
    fn hand_out(&mut self) {
        self.waiting.retain(|w| !w.slot.is_closed());
        while !self.waiting.is_empty() {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            if let Some(waiter) = self.waiting.pop() {
                // A waiter that just gave up drops the permit, returning it.
                let _ = waiter.slot.send(permit);
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.active() == 0
            && self.waiting.is_empty()
            && self.history.is_empty()
            && self.blocked_until.is_none()
    }
}

#[derive(Default)]
struct QueueState {
    keys: HashMap<String, KeyState>,
    next_seq: u64,
    total_requests: u64,
    blocked_requests: u64,
    average_response_time: Option<Duration>,
}

impl QueueState {
    /// Count an admission for `key`.
    fn record_admission(&mut self, key: &str, now: Instant) {
        self.total_requests += 1;
        if let Some(entry) = self.keys.get_mut(key) {
            entry.history.push_back(now);
        }
    }

    /// Drop expired history and blocks of every key, then forget idle keys.
    fn sweep(&mut self, now: Instant, window: Duration) {
        self.keys.retain(|_, entry| {
            entry.prune_history(now, window);
            entry.blocked_until = entry.blocked_until.filter(|until| *until > now);
            !entry.is_idle()
        });
    }
}

struct QueueInner {
    config: RateLimitConfig,
    state: Mutex<QueueState>,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn permits(&self) -> usize {
        self.config.max_concurrent.clamp(1, Semaphore::MAX_PERMITS)
    }

    /// Pass free permits of `key` on to its waiters.
    fn dispatch(&self, key: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.keys.get_mut(key) {
            entry.hand_out();
        }
        state.sweep(Instant::now(), self.config.window);
    }
}

/// Queue bounding concurrency and request rate per key.
///
/// Every key owns a semaphore sized to `max_concurrent`. Cheap to clone;
/// clones share state.
#[derive(Clone)]
pub struct RateLimitQueue {
    inner: Arc<QueueInner>,
}

impl Default for RateLimitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitQueue {
    /// Create a queue with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a queue with a custom configuration.
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    /// Snapshot of queue-wide counters.
    pub fn metrics(&self) -> QueueMetrics {
        let state = self.inner.lock();
        QueueMetrics {
            total_requests: state.total_requests,
            blocked_requests: state.blocked_requests,
            active_requests: state.keys.values().map(KeyState::active).sum(),
            queued_requests: state.keys.values().map(KeyState::queued).sum(),
            average_response_time: state.average_response_time.unwrap_or_default(),
        }
    }

    /// Number of keys the queue currently keeps state for.
    pub fn tracked_keys(&self) -> usize {
        self.inner.lock().keys.len()
    }

    /// Snapshot of a single key.
    pub fn status(&self, key: &str) -> KeyStatus {
        let now = Instant::now();
        let window = self.inner.config.window;
        let state = self.inner.lock();

        let Some(entry) = state.keys.get(key) else {
            return KeyStatus {
                requests_in_window: 0,
                active: 0,
                queued: 0,
                blocked_until: None,
                remaining: self.inner.config.max_requests,
            };
        };

        let requests_in_window = entry
            .history
            .iter()
            .filter(|ts| now.duration_since(**ts) < window)
            .count();
        KeyStatus {
            requests_in_window,
            active: entry.active(),
            queued: entry.queued(),
            blocked_until: entry.blocked_until.filter(|until| *until > now),
            remaining: self
                .inner
                .config
                .max_requests
                .saturating_sub(requests_in_window),
        }
    }

    /// Forget the window history and any block of `key`.
    ///
    /// Running and waiting works are not affected.
    pub fn clear_history(&self, key: &str) {
        let mut state = self.inner.lock();
        if let Some(entry) = state.keys.get_mut(key) {
            entry.history.clear();
            entry.blocked_until = None;
            if entry.is_idle() {
                state.keys.remove(key);
            }
        }
    }

    fn bypasses_window(&self, key: &str, options: &QueueOptions) -> bool {
        let config = &self.inner.config;
        !config.enabled || options.skip_rate_limit || config.whitelist.contains(key)
    }

    /// Wait for a concurrency permit of `key`, or fail.
    async fn acquire(
        &self,
        key: &str,
        options: &QueueOptions,
    ) -> Result<OwnedSemaphorePermit, QueueError> {
        let config = &self.inner.config;
        let bypass = self.bypasses_window(key, options);
        let permits = self.inner.permits();

        let receiver = {
            let now = Instant::now();
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            let entry = state
                .keys
                .entry(key.to_string())
                .or_insert_with(|| KeyState::new(permits));

            if !bypass {
                if let Some(until) = entry.blocked_until {
                    if until > now {
                        state.blocked_requests += 1;
                        return Err(QueueError::RateLimited {
                            key: key.to_string(),
                            retry_after: until - now,
                        });
                    }
                    entry.blocked_until = None;
                }

                entry.prune_history(now, config.window);
                if entry.history.len() >= config.max_requests {
                    entry.blocked_until = Some(now + config.block_duration);
                    state.blocked_requests += 1;
                    warn!(
                        key = %key,
                        requests = entry.history.len(),
                        block_secs = config.block_duration.as_secs(),
                        "Rate limit exceeded, blocking key"
                    );
                    return Err(QueueError::RateLimited {
                        key: key.to_string(),
                        retry_after: config.block_duration,
                    });
                }
            }

            // Waiters ahead of us get free permits first.
            entry.hand_out();
            if entry.waiting.is_empty() {
                if let Ok(permit) = Arc::clone(&entry.semaphore).try_acquire_owned() {
                    state.record_admission(key, now);
                    return Ok(permit);
                }
            }

            let (slot, receiver) = oneshot::channel();
            entry.waiting.push(Waiter {
                priority: options.priority,
                seq: state.next_seq,
                slot,
            });
            state.next_seq += 1;
            debug!(key = %key, priority = options.priority, "Work queued");
            receiver
        };

        let admitted = timeout(options.timeout, receiver).await;
        match admitted {
            Ok(Ok(permit)) => {
                self.inner.lock().record_admission(key, Instant::now());
                Ok(permit)
            }
            _ => {
                // A permit sent as the deadline hit went back to the semaphore.
                self.inner.dispatch(key);
                Err(QueueError::Timeout(options.timeout))
            }
        }
    }

    fn complete(&self, key: &str, elapsed: Duration, success: bool) {
        let mut state = self.inner.lock();
        state.average_response_time = Some(match state.average_response_time {
            Some(average) => (average + elapsed) / 2,
            None => elapsed,
        });
        if success && self.inner.config.skip_successful {
            if let Some(entry) = state.keys.get_mut(key) {
                entry.history.pop_back();
            }
        }
    }
}

#[async_trait]
impl OperationQueue for RateLimitQueue {
    async fn queue_operation<'a>(
        &self,
        key: &str,
        work: QueueWork<'a>,
        options: QueueOptions,
    ) -> Result<(), QueueError> {
        let permit = self.acquire(key, &options).await?;

        let started = Instant::now();
        let result = work.await;
        self.complete(key, started.elapsed(), result.is_ok());
        drop(permit);
        self.inner.dispatch(key);

        result.map_err(QueueError::Work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulk_operations_repository::StoreError;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tokio::time::sleep;

    fn config(max_requests: usize, max_concurrent: usize) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            max_concurrent,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_per_key() {
        let queue = RateLimitQueue::with_config(config(100, 2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let queue = queue.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    queue
                        .queue_operation(
                            "bulk-update-u1",
                            async move {
                                let now = running.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                                peak.fetch_max(now, AtomicOrdering::SeqCst);
                                sleep(Duration::from_millis(50)).await;
                                running.fetch_sub(1, AtomicOrdering::SeqCst);
                                Ok(())
                            }
                            .boxed(),
                            QueueOptions::default(),
                        )
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(AtomicOrdering::SeqCst), 2);
        let metrics = queue.metrics();
        assert_eq!(metrics.total_requests, 6);
        assert_eq!(metrics.active_requests, 0);
        assert_eq!(metrics.queued_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_admitted_by_priority() {
        let queue = RateLimitQueue::with_config(config(100, 1));
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupy the only slot.
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let holder = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .queue_operation(
                        "k",
                        async move {
                            let _ = release_rx.await;
                            Ok(())
                        }
                        .boxed(),
                        QueueOptions::default(),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        let mut waiters = Vec::new();
        for (label, priority) in [("low", 1u8), ("high", 9), ("mid", 5), ("high-2", 9)] {
            let queue = queue.clone();
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                queue
                    .queue_operation(
                        "k",
                        async move {
                            order.lock().unwrap().push(label);
                            Ok(())
                        }
                        .boxed(),
                        QueueOptions::new(priority, Duration::from_secs(30)),
                    )
                    .await
            }));
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.status("k").queued, 4);

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["high", "high-2", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_work_times_out() {
        let queue = RateLimitQueue::with_config(config(100, 1));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .queue_operation(
                        "k",
                        async move {
                            let _ = release_rx.await;
                            Ok(())
                        }
                        .boxed(),
                        QueueOptions::default(),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_work = Arc::clone(&ran);
        let err = queue
            .queue_operation(
                "k",
                async move {
                    ran_in_work.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
                .boxed(),
                QueueOptions::new(5, Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Timeout(_)));
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);

        // The slot is still usable after the timed out waiter left.
        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        queue
            .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap();
        assert_eq!(queue.metrics().active_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_blocks_key() {
        let queue = RateLimitQueue::with_config(RateLimitConfig {
            block_duration: Duration::from_secs(10),
            ..config(2, 10)
        });

        for _ in 0..2 {
            queue
                .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
                .await
                .unwrap();
        }

        let err = queue
            .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(10)
        ));
        assert!(queue.status("k").blocked_until.is_some());

        // Other keys are unaffected.
        queue
            .queue_operation("other", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap();

        // Skipping the rate limit bypasses the block.
        queue
            .queue_operation(
                "k",
                async { Ok(()) }.boxed(),
                QueueOptions::default().skip_rate_limit(),
            )
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        queue
            .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap();
        assert_eq!(queue.metrics().blocked_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_whitelist_and_disabled_bypass_window() {
        let mut whitelisted = config(1, 10);
        whitelisted.whitelist.insert("admin".to_string());
        let queue = RateLimitQueue::with_config(whitelisted);
        for _ in 0..5 {
            queue
                .queue_operation("admin", async { Ok(()) }.boxed(), QueueOptions::default())
                .await
                .unwrap();
        }

        let queue = RateLimitQueue::with_config(RateLimitConfig {
            enabled: false,
            ..config(1, 10)
        });
        for _ in 0..5 {
            queue
                .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_successful_keeps_window_free() {
        let queue = RateLimitQueue::with_config(RateLimitConfig {
            skip_successful: true,
            ..config(1, 10)
        });

        for _ in 0..3 {
            queue
                .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
                .await
                .unwrap();
        }

        let err = queue
            .queue_operation(
                "k",
                async { Err(StoreError::unavailable("down")) }.boxed(),
                QueueOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Work(_)));
        assert_eq!(queue.status("k").requests_in_window, 1);

        let err = queue
            .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::RateLimited { .. }));

        queue.clear_history("k");
        queue
            .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_are_forgotten() {
        let queue = RateLimitQueue::with_config(RateLimitConfig {
            window: Duration::from_secs(1),
            ..config(10, 2)
        });

        queue
            .queue_operation("bulk-update-a", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap();
        assert_eq!(queue.tracked_keys(), 1);
        assert_eq!(queue.status("bulk-update-a").requests_in_window, 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        queue
            .queue_operation("bulk-update-b", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap();

        assert_eq!(queue.tracked_keys(), 1);
        assert_eq!(queue.status("bulk-update-a"), queue.status("never-used"));
        assert_eq!(queue.status("bulk-update-b").requests_in_window, 1);
        assert_eq!(queue.metrics().total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_response_time() {
        let queue = RateLimitQueue::new();
        for millis in [100, 300] {
            queue
                .queue_operation(
                    "k",
                    async move {
                        sleep(Duration::from_millis(millis)).await;
                        Ok(())
                    }
                    .boxed(),
                    QueueOptions::default(),
                )
                .await
                .unwrap();
        }
        let average = queue.metrics().average_response_time;
        assert!(average >= Duration::from_millis(200), "{:?}", average);
        assert!(average < Duration::from_millis(210), "{:?}", average);
    }
}
