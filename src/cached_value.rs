//! # Cached Value
//!
//! [`PeriodicRefresher`] keeps the latest result of an async fetch (typically an
//! on-chain read) and refreshes it on a jittered fixed interval in a background
//! tokio task.
//!
//! `start` and `stop` each take effect exactly once. `stop` cancels the task
//! through its `CancellationToken` and waits for the loop to exit, so no fetch
//! result is stored after `stop` returns.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use arc_swap::ArcSwapOption;
use log::{debug, warn};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub type FetchFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;
pub type FetchFn<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

pub struct PeriodicRefresher<T> {
    name: String,
    interval: Duration,
    jitter: Duration,
    fetch: FetchFn<T>,
    value: Arc<ArcSwapOption<T>>,
    started: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn jittered(jitter: Duration) -> Duration {
    let max_ms = jitter.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

impl<T: Send + Sync + 'static> PeriodicRefresher<T> {
    pub fn new(name: impl Into<String>, interval: Duration, jitter: Duration, fetch: FetchFn<T>) -> Self {
        Self {
            name: name.into(),
            interval: interval.max(Duration::from_millis(1)),
            jitter,
            fetch,
            value: Arc::new(ArcSwapOption::empty()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Latest successfully fetched value, `None` before the first success.
    pub fn get(&self) -> Option<Arc<T>> {
        self.value.load_full()
    }

    /// Fetches once in the caller's task and stores the result.
    pub async fn refresh_now(&self) -> Result<Arc<T>> {
        let fresh = Arc::new((self.fetch)().await?);
        self.value.store(Some(fresh.clone()));
        Ok(fresh)
    }

    /// Spawns the refresh loop. Returns `false` if it was already started.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let name = self.name.clone();
        let interval = self.interval;
        let jitter = self.jitter;
        let fetch = self.fetch.clone();
        let value = self.value.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let delay = jittered(jitter);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                let fetched = tokio::select! {
                    _ = cancel.cancelled() => break,
                    fetched = fetch() => fetched,
                };
                match fetched {
                    Ok(v) => value.store(Some(Arc::new(v))),
                    Err(e) => warn!("⚠️ Refresh of {} failed: {:#}", name, e),
                }
            }
            debug!("Refresher {} stopped", name);
        });

        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Cancels the loop and waits for it to exit. Returns `false` if it was never
    /// started or already stopped.
    pub async fn stop(&self) -> bool {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("⚠️ Refresher {} task ended abnormally: {}", self.name, e);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counting_fetch(counter: Arc<AtomicU64>) -> FetchFn<u64> {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }) as FetchFuture<u64>
        })
    }

    #[tokio::test]
    async fn refresh_now_stores_value() {
        let counter = Arc::new(AtomicU64::new(0));
        let refresher = PeriodicRefresher::new(
            "test",
            Duration::from_secs(60),
            Duration::ZERO,
            counting_fetch(counter),
        );
        assert!(refresher.get().is_none());
        assert_eq!(*refresher.refresh_now().await.unwrap(), 1);
        assert_eq!(refresher.get().map(|v| *v), Some(1));
    }

    #[tokio::test]
    async fn start_and_stop_take_effect_once() {
        let counter = Arc::new(AtomicU64::new(0));
        let refresher = PeriodicRefresher::new(
            "test",
            Duration::from_millis(10),
            Duration::from_millis(2),
            counting_fetch(counter.clone()),
        );

        assert!(!refresher.stop().await);
        assert!(refresher.start());
        assert!(!refresher.start());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2);
        assert!(refresher.get().is_some());

        assert!(refresher.stop().await);
        assert!(!refresher.stop().await);

        let after_stop = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
        assert!(!refresher.start());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_value() {
        let calls = Arc::new(AtomicU64::new(0));
        let c = calls.clone();
        let fetch: FetchFn<u64> = Arc::new(move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    Ok(7u64)
                } else {
                    Err(anyhow::anyhow!("rpc down"))
                }
            }) as FetchFuture<u64>
        });
        let refresher = PeriodicRefresher::new("test", Duration::from_millis(5), Duration::ZERO, fetch);

        refresher.refresh_now().await.unwrap();
        refresher.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        refresher.stop().await;

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(refresher.get().map(|v| *v), Some(7));
    }
}
