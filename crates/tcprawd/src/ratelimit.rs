//! Per-IP download throttling — sliding window plus ban window.
//!
//! Every download attempt, TCP or HTTP, passes through one limiter, so the
//! window is shared across surfaces. Uploads are not limited: their cost is
//! bounded by the blob size cap and the one-connection-per-upload model.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub struct RateLimiter {
    max: u32,
    window: Duration,
    ban: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    attempts: HashMap<IpAddr, Attempt>,
    banned: HashMap<IpAddr, Instant>,
}

struct Attempt {
    count: u32,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, ban: Duration) -> Self {
        Self {
            max,
            window,
            ban,
            state: Mutex::new(State::default()),
        }
    }

    /// Record an attempt from `ip` and decide whether to serve it.
    pub async fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now()).await
    }

    async fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut state = self.state.lock().await;

        if let Some(&until) = state.banned.get(&ip) {
            if now < until {
                return false;
            }
            state.banned.remove(&ip);
        }

        let attempt = state.attempts.entry(ip).or_insert(Attempt {
            count: 0,
            window_start: now,
        });
        if now.duration_since(attempt.window_start) > self.window {
            attempt.count = 0;
            attempt.window_start = now;
        }

        attempt.count += 1;
        if attempt.count > self.max {
            state.attempts.remove(&ip);
            state.banned.insert(ip, now + self.ban);
            tracing::info!(%ip, "download rate exceeded, banning");
            return false;
        }
        true
    }
}
