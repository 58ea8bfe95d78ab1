use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{Mutex, Notify, Semaphore};

use patan_core::error::{Error, Result};
use patan_core::request::Request;

pub mod filter;

pub use filter::DuplicateFilter;

/// What a non-blocking enqueue does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Fail fast with [`Error::QueueFull`]
    #[default]
    Reject,
    /// Log a warning and discard the request
    Drop,
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bounded queue capacity
    pub capacity: usize,
    /// Overflow behavior of [`Scheduler::try_enqueue`]
    pub on_full: OverflowPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            on_full: OverflowPolicy::Reject,
        }
    }
}

/// A bounded, deduplicating FIFO queue of requests with in-flight accounting.
///
/// Producers suspend on [`Scheduler::enqueue`] while the queue is at capacity
/// (backpressure); consumers suspend on [`Scheduler::dequeue`] while it is
/// empty. Every dequeued request comes paired with an [`AckGuard`] that
/// acknowledges completion exactly once, on every exit path; [`Scheduler::join`]
/// resolves once every admitted request has been acknowledged.
pub struct Scheduler {
    queue: Mutex<VecDeque<Request>>,
    filter: DuplicateFilter,
    capacity: usize,
    on_full: OverflowPolicy,
    /// Free queue slots; acquired by enqueue, released by dequeue
    slots: Semaphore,
    /// Queued requests; released by enqueue, acquired by dequeue
    ready: Semaphore,
    /// Admitted requests not yet acknowledged (queued or being processed)
    in_flight: AtomicUsize,
    drained: Notify,
}

impl Scheduler {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        // A capacity of zero would suspend every producer forever
        let capacity = config.capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            filter: DuplicateFilter::new(),
            capacity,
            on_full: config.on_full,
            slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Enqueue a request, suspending while the queue is at capacity.
    ///
    /// Duplicates are dropped silently and return `Ok(false)`; admission
    /// returns `Ok(true)`. Duplication is never an error.
    pub async fn enqueue(&self, request: Request) -> Result<bool> {
        if self.filter.seen(&request) {
            debug!("dropping duplicate request: {}", request.url);
            return Ok(false);
        }

        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| Error::config("scheduler is closed"))?;
        self.push(request, permit).await;
        Ok(true)
    }

    /// Enqueue a request without suspending on a full queue; used for
    /// bootstrap seeding so that seeding never deadlocks against
    /// not-yet-started workers.
    ///
    /// When the queue is full the configured [`OverflowPolicy`] decides
    /// between failing fast and discarding.
    pub async fn try_enqueue(&self, request: Request) -> Result<bool> {
        if self.filter.seen(&request) {
            debug!("dropping duplicate request: {}", request.url);
            return Ok(false);
        }

        let permit = match self.slots.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                return match self.on_full {
                    OverflowPolicy::Reject => Err(Error::QueueFull {
                        capacity: self.capacity,
                    }),
                    OverflowPolicy::Drop => {
                        warn!("queue full, dropping request: {}", request.url);
                        Ok(false)
                    }
                };
            }
        };

        self.push(request, permit).await;
        Ok(true)
    }

    // Holds the slot permit across the lock await so a cancelled enqueue
    // cannot leak capacity; everything after the lock is synchronous.
    async fn push(&self, request: Request, permit: tokio::sync::SemaphorePermit<'_>) {
        let mut queue = self.queue.lock().await;
        queue.push_back(request);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        permit.forget();
        drop(queue);
        self.ready.add_permits(1);
    }

    /// Remove and return the oldest queued request, suspending while the
    /// queue is empty. Returns `None` once the scheduler has been closed.
    ///
    /// The returned [`AckGuard`] must stay alive for the whole processing of
    /// the request; dropping it acknowledges completion.
    pub async fn dequeue(self: &Arc<Self>) -> Option<(Request, AckGuard)> {
        let permit = self.ready.acquire().await.ok()?;
        // The permit is only forgotten once the request is actually popped;
        // cancellation at the lock returns it and leaves the queue intact.
        let mut queue = self.queue.lock().await;
        let request = queue.pop_front()?;
        permit.forget();
        drop(queue);
        self.slots.add_permits(1);
        Some((request, AckGuard::new(Arc::clone(self))))
    }

    /// Suspend until every admitted request has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so an ack between the check and the
            // await cannot be missed.
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Close the scheduler: pending and future `dequeue` calls return `None`
    /// and blocked producers fail. Idempotent.
    pub fn close(&self) {
        self.ready.close();
        self.slots.close();
    }

    /// Whether the queue currently holds no requests
    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Number of requests currently queued
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Number of admitted requests not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether every admitted request has been acknowledged. Implies the
    /// queue is empty, since queued requests count as in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    fn ack_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Scoped acknowledgement of one dequeued request.
///
/// The acknowledgement fires when the guard is dropped, so it is released on
/// every exit path of the holder: normal completion, error, or task
/// cancellation.
pub struct AckGuard {
    scheduler: Arc<Scheduler>,
}

impl AckGuard {
    fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Acknowledge explicitly by consuming the guard
    pub fn ack(self) {}
}

impl Drop for AckGuard {
    fn drop(&mut self) {
        self.scheduler.ack_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn scheduler_with_capacity(capacity: usize) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(SchedulerConfig {
            capacity,
            ..SchedulerConfig::default()
        }))
    }

    fn request(url: &str) -> Request {
        Request::get(url).unwrap()
    }

    #[tokio::test]
    async fn test_dedup_invariant() {
        let scheduler = scheduler_with_capacity(8);

        assert!(scheduler.enqueue(request("http://a/")).await.unwrap());
        let duplicate = request("http://a/").with_header("X-Other", "field");
        assert!(!scheduler.enqueue(duplicate).await.unwrap());

        assert_eq!(scheduler.len().await, 1);
        let (first, ack) = scheduler.dequeue().await.unwrap();
        assert_eq!(first.url.as_str(), "http://a/");
        ack.ack();

        // Permanent dedup: no re-admission even after dequeue and ack
        assert!(!scheduler.enqueue(request("http://a/")).await.unwrap());
        assert!(scheduler.is_empty().await);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let scheduler = scheduler_with_capacity(8);
        for url in ["http://a/", "http://b/", "http://c/"] {
            scheduler.enqueue(request(url)).await.unwrap();
        }

        for expected in ["http://a/", "http://b/", "http://c/"] {
            let (next, ack) = scheduler.dequeue().await.unwrap();
            assert_eq!(next.url.as_str(), expected);
            ack.ack();
        }
    }

    #[tokio::test]
    async fn test_backpressure_blocks_until_dequeue() {
        let scheduler = scheduler_with_capacity(2);

        assert!(scheduler.enqueue(request("http://a/")).await.unwrap());
        assert!(scheduler.enqueue(request("http://b/")).await.unwrap());

        // The queue is at capacity: a third blocking enqueue must suspend
        let mut overflow = task::spawn(scheduler.enqueue(request("http://c/")));
        assert_pending!(overflow.poll());

        // Still suspended until a slot frees up
        assert_pending!(overflow.poll());

        let (_, ack) = scheduler.dequeue().await.unwrap();
        ack.ack();

        assert!(assert_ready!(overflow.poll()).unwrap());
        assert_eq!(scheduler.len().await, 2);
    }

    #[tokio::test]
    async fn test_try_enqueue_reject_policy() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
            capacity: 1,
            on_full: OverflowPolicy::Reject,
        }));

        assert!(scheduler.try_enqueue(request("http://a/")).await.unwrap());
        let err = scheduler.try_enqueue(request("http://b/")).await.unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 1 }));
    }

    #[tokio::test]
    async fn test_try_enqueue_drop_policy() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
            capacity: 1,
            on_full: OverflowPolicy::Drop,
        }));

        assert!(scheduler.try_enqueue(request("http://a/")).await.unwrap());
        assert!(!scheduler.try_enqueue(request("http://b/")).await.unwrap());
        assert_eq!(scheduler.len().await, 1);
    }

    #[tokio::test]
    async fn test_join_waits_for_all_acks() {
        let scheduler = scheduler_with_capacity(8);
        scheduler.enqueue(request("http://a/")).await.unwrap();
        scheduler.enqueue(request("http://b/")).await.unwrap();

        let mut join = task::spawn(scheduler.join());
        assert_pending!(join.poll());

        let (_, ack_a) = scheduler.dequeue().await.unwrap();
        let (_, ack_b) = scheduler.dequeue().await.unwrap();

        // Dequeued but unacknowledged work keeps join suspended
        assert_pending!(join.poll());

        ack_a.ack();
        assert_pending!(join.poll());

        ack_b.ack();
        assert_ready!(join.poll());
    }

    #[tokio::test]
    async fn test_ack_fires_on_failure_path() {
        let scheduler = scheduler_with_capacity(8);
        scheduler.enqueue(request("http://a/")).await.unwrap();

        {
            let (_request, _ack) = scheduler.dequeue().await.unwrap();
            // Simulated processing failure: the guard is dropped without an
            // explicit ack when this scope unwinds.
        }

        assert!(scheduler.is_idle());
        scheduler.join().await;
    }

    #[tokio::test]
    async fn test_ack_fires_on_task_cancellation() {
        let scheduler = scheduler_with_capacity(8);
        scheduler.enqueue(request("http://a/")).await.unwrap();

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                let (_request, _ack) = scheduler.dequeue().await.unwrap();
                // Simulate a long fetch so cancellation lands mid-processing
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            })
        };

        // Give the worker a chance to dequeue, then cancel it
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        worker.abort();
        let _ = worker.await;

        scheduler.join().await;
        assert!(scheduler.is_idle());
    }

    #[tokio::test]
    async fn test_dont_filter_is_admitted_again() {
        let scheduler = scheduler_with_capacity(8);
        assert!(scheduler.enqueue(request("http://a/")).await.unwrap());

        let retry = request("http://a/").with_dont_filter(true);
        assert!(scheduler.enqueue(retry).await.unwrap());
        assert_eq!(scheduler.len().await, 2);
    }

    #[tokio::test]
    async fn test_close_unblocks_dequeue() {
        let scheduler = scheduler_with_capacity(8);

        let mut pending = task::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.dequeue().await.is_none() }
        });
        assert_pending!(pending.poll());

        scheduler.close();
        assert!(assert_ready!(pending.poll()));
    }
}
