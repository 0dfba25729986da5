//! Time-window coalescing of batchable messages.
//!
//! Items enqueued while a window is open are buffered and released together,
//! one `release` call per item in arrival order, when the window elapses.
//! The coalescer only controls *when* an item is released; it never merges
//! items or changes what happens to them afterwards.
//!
//! In [`CoalesceMode::Debounce`] every arrival restarts the window, trading
//! latency for batch density under bursty input. [`CoalesceMode::Fixed`]
//! bounds the added latency to one window. A zero window disables buffering
//! entirely.

use crate::config::CoalesceMode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type ReleaseFn<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Bucket<T> {
    items: Vec<T>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the pending timer is replaced or the bucket is drained.
    generation: u64,
}

impl<T> Bucket<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            timer: None,
            generation: 0,
        }
    }
}

/// Buffers items for a time window and releases them in order.
pub struct Coalescer<T: Send + 'static> {
    window: Duration,
    mode: CoalesceMode,
    bucket: Arc<Mutex<Bucket<T>>>,
    release: ReleaseFn<T>,
}

impl<T: Send + 'static> Coalescer<T> {
    pub fn new(window: Duration, mode: CoalesceMode, release: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            window,
            mode,
            bucket: Arc::new(Mutex::new(Bucket::new())),
            release: Arc::new(release),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer an item, or release it immediately when coalescing is disabled.
    ///
    /// Must be called from within a tokio runtime when the window is non-zero.
    pub fn enqueue(&self, item: T) {
        if !self.is_enabled() {
            (self.release)(item);
            return;
        }

        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.items.push(item);

        let restart = match self.mode {
            CoalesceMode::Debounce => true,
            CoalesceMode::Fixed => bucket.timer.is_none(),
        };
        if restart {
            if let Some(timer) = bucket.timer.take() {
                timer.abort();
            }
            bucket.generation += 1;
            bucket.timer = Some(self.spawn_timer(bucket.generation));
        }
    }

    /// Release everything buffered right now and cancel the pending timer.
    pub fn flush(&self) {
        let items = {
            let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(timer) = bucket.timer.take() {
                timer.abort();
            }
            bucket.generation += 1;
            std::mem::take(&mut bucket.items)
        };
        if !items.is_empty() {
            debug!("Flushing {} coalesced messages", items.len());
        }
        for item in items {
            (self.release)(item);
        }
    }

    fn spawn_timer(&self, generation: u64) -> JoinHandle<()> {
        let bucket = Arc::clone(&self.bucket);
        let release = Arc::clone(&self.release);
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let items = {
                let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
                // A newer timer or a flush owns the bucket now.
                if bucket.generation != generation {
                    return;
                }
                bucket.timer = None;
                std::mem::take(&mut bucket.items)
            };

            debug!("Coalescing window elapsed, releasing {} messages", items.len());
            for item in items {
                release(item);
            }
        })
    }
}

impl<T: Send + 'static> Drop for Coalescer<T> {
    fn drop(&mut self) {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = bucket.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    type Released = Arc<Mutex<Vec<(u32, Instant)>>>;

    fn recording(window: Duration, mode: CoalesceMode) -> (Coalescer<u32>, Released) {
        let released: Released = Arc::new(Mutex::new(Vec::new()));
        let sink = released.clone();
        let coalescer = Coalescer::new(window, mode, move |item| {
            sink.lock().unwrap().push((item, Instant::now()));
        });
        (coalescer, released)
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_passes_through() {
        let (coalescer, released) = recording(Duration::ZERO, CoalesceMode::Debounce);
        let start = Instant::now();

        coalescer.enqueue(1);
        coalescer.enqueue(2);

        let released = released.lock().unwrap();
        assert_eq!(released.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1, 2]);
        assert!(released.iter().all(|(_, at)| *at == start));
        assert!(coalescer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_releases_together_after_last_window() {
        let window = Duration::from_millis(50);
        let (coalescer, released) = recording(window, CoalesceMode::Debounce);

        coalescer.enqueue(1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        coalescer.enqueue(2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let last = Instant::now();
        coalescer.enqueue(3);

        // 60ms after the first arrival nothing has been released yet.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(released.lock().unwrap().is_empty());
        assert_eq!(coalescer.len(), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let released = released.lock().unwrap();
        assert_eq!(released.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1, 2, 3]);
        for (_, at) in released.iter() {
            assert_eq!(*at, last + window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_is_not_extended() {
        let window = Duration::from_millis(50);
        let (coalescer, released) = recording(window, CoalesceMode::Fixed);
        let first = Instant::now();

        coalescer.enqueue(1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        coalescer.enqueue(2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let released = released.lock().unwrap();
        assert_eq!(released.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1, 2]);
        assert!(released.iter().all(|(_, at)| *at == first + window));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_releases_immediately() {
        let (coalescer, released) = recording(Duration::from_secs(10), CoalesceMode::Debounce);

        coalescer.enqueue(7);
        coalescer.enqueue(8);
        coalescer.flush();

        assert_eq!(
            released.lock().unwrap().iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![7, 8]
        );

        // The cancelled timer must not release anything later.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(released.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_windows() {
        let window = Duration::from_millis(20);
        let (coalescer, released) = recording(window, CoalesceMode::Debounce);

        coalescer.enqueue(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        coalescer.enqueue(2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let released = released.lock().unwrap();
        assert_eq!(released.len(), 2);
        assert!(released[1].1 > released[0].1);
    }
}
