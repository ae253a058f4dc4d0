use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

const DEFAULT_BURST: usize = 32;
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct SourceState {
    hits: VecDeque<Instant>,
    last_seen: Instant,
}

/// Per-peer-address admission control for the accept loop.
///
/// Each source address may open at most `burst` connections within `window`;
/// anything beyond is refused. A cooperative sweep task clears sources that
/// have gone quiet so the state map does not grow without bound.
#[derive(Debug)]
pub struct ConnectionLimiter {
    burst: usize,
    window: Duration,
    states: Mutex<HashMap<IpAddr, SourceState>>,
}

impl Default for ConnectionLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BURST, DEFAULT_WINDOW)
    }
}

impl ConnectionLimiter {
    pub fn new(burst: usize, window: Duration) -> Self {
        Self {
            burst,
            window,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if `address` is under its quota; records the hit if so.
    pub async fn allow(&self, address: IpAddr) -> bool {
        let now = Instant::now();
        let mut guard = self.states.lock().await;
        let entry = guard.entry(address).or_insert_with(|| SourceState {
            hits: VecDeque::new(),
            last_seen: now,
        });
        while let Some(front) = entry.hits.front() {
            if now.duration_since(*front) > self.window {
                entry.hits.pop_front();
            } else {
                break;
            }
        }
        entry.last_seen = now;
        if entry.hits.len() < self.burst {
            entry.hits.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drops state for sources idle longer than the window.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut guard = self.states.lock().await;
        let before = guard.len();
        guard.retain(|_, state| now.duration_since(state.last_seen) <= self.window);
        let removed = before - guard.len();
        if removed > 0 {
            debug!(removed, "rate limiter swept stale sources");
        }
    }

    #[cfg(test)]
    async fn tracked_sources(&self) -> usize {
        self.states.lock().await.len()
    }
}

/// Runs the sweep on a fixed cadence until shutdown is signalled.
pub fn spawn_sweeper(
    limiter: Arc<ConnectionLimiter>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => limiter.sweep().await,
                _ = shutdown.changed() => break,
            }
        }
    })
}
