use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Lets at most one update through per interval. Updates arriving inside the
/// window replace whatever is pending, so the most recent one wins.
#[derive(Debug)]
pub struct RateLimiter<T> {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<T>,
}

impl<T> RateLimiter<T> {
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            last_emit: None,
            pending: None,
        }
    }

    /// Returns the update to apply now, if the window allows one.
    pub fn offer(&mut self, now: Instant, update: T) -> Option<T> {
        if self.window_open(now) {
            self.last_emit = Some(now);
            self.pending = None;
            Some(update)
        } else {
            self.pending = Some(update);
            None
        }
    }

    /// Releases the pending update once its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        if self.pending.is_some() && self.window_open(now) {
            self.last_emit = Some(now);
            self.pending.take()
        } else {
            None
        }
    }

    /// When [`RateLimiter::poll`] will next release the pending update.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(self.last_emit.map_or_else(Instant::now, |t| t + self.interval))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn window_open(&self, now: Instant) -> bool {
        match self.last_emit {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= self.interval,
        }
    }
}

/// Center and zoom shared by both map panels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// `[lat, lon]`
    pub center: [f64; 2],
    pub zoom: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        // Great Britain
        ViewState {
            center: [54.5, -4.0],
            zoom: 6.0,
        }
    }
}

/// Keeps the two panels on the same view, coalescing bursts of pan/zoom.
#[derive(Debug)]
pub struct ViewSync {
    current: ViewState,
    limiter: RateLimiter<ViewState>,
}

impl ViewSync {
    pub fn new(interval: Duration) -> Self {
        ViewSync {
            current: ViewState::default(),
            limiter: RateLimiter::new(interval),
        }
    }

    pub fn current(&self) -> ViewState {
        self.current
    }

    /// Returns the view both panels should now show, if it changed.
    pub fn update(&mut self, now: Instant, view: ViewState) -> Option<ViewState> {
        let applied = self.limiter.offer(now, view)?;
        self.current = applied;
        Some(applied)
    }

    pub fn flush(&mut self, now: Instant) -> Option<ViewState> {
        let applied = self.limiter.poll(now)?;
        self.current = applied;
        Some(applied)
    }

    pub fn has_pending(&self) -> bool {
        self.limiter.has_pending()
    }
}
