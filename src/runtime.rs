use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::ChainConfig;

struct RuntimeInner {
    /// Difference between coordinated chain time and the local clock.
    offset: Duration,
    /// Height of the next block to produce.
    next_turn: i32,
}

/// Coordinated chain clock shared by the engine and the producer loop.
pub struct ChainRuntime {
    period: Duration,
    time_resolution: Duration,
    chain_init_time: DateTime<Utc>,
    query_ttl: i32,
    inner: RwLock<RuntimeInner>,
    stop: watch::Sender<bool>,
}

impl ChainRuntime {
    pub fn new(cfg: &ChainConfig, chain_init_time: DateTime<Utc>, next_turn: i32) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            period: cfg.period(),
            time_resolution: cfg.time_resolution(),
            chain_init_time,
            query_ttl: cfg.query_ttl,
            inner: RwLock::new(RuntimeInner {
                offset: Duration::zero(),
                next_turn,
            }),
            stop,
        }
    }

    /// Current coordinated chain time.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.inner.read().offset
    }

    /// Re-anchors the clock offset from a coordinated time reading.
    pub fn update_time(&self, now: DateTime<Utc>) {
        self.inner.write().offset = now - Utc::now();
    }

    pub fn next_turn(&self) -> i32 {
        self.inner.read().next_turn
    }

    pub fn advance_turn(&self) {
        self.inner.write().next_turn += 1;
    }

    /// Returns the current time reading and the duration till the next
    /// turn, clamped to the configured time resolution. A non-positive
    /// duration means the caller should run the current turn with the
    /// returned reading.
    pub fn till_next_turn(&self) -> (DateTime<Utc>, Duration) {
        let inner = self.inner.read();
        let now = Utc::now() + inner.offset;
        let mut wait = self.chain_init_time + self.period * inner.next_turn - now;
        if wait > self.time_resolution {
            wait = self.time_resolution;
        }
        (now, wait)
    }

    /// Height of the period that contains `t`. Euclidean division keeps
    /// pre-genesis timestamps on negative heights.
    pub fn height_from_time(&self, t: DateTime<Utc>) -> i32 {
        let span = t - self.chain_init_time;
        span.num_milliseconds()
            .div_euclid(self.period.num_milliseconds()) as i32
    }

    /// Whether a query stamped at `t` has outlived the TTL window of the
    /// pending turn.
    pub fn query_time_is_expired(&self, t: DateTime<Utc>) -> bool {
        self.height_from_time(t) < self.next_turn() - self.query_ttl
    }

    /// Signals the producer loop to exit. Idempotent, and effective
    /// even before the loop has subscribed.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }
}
