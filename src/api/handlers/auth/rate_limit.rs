//! Rate limiting primitives for auth flows and the per-IP request throttle.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    /// Any API request, keyed by client IP.
    Request,
    SendCode,
    VerifyCode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Hits allowed per window for each action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimits {
    pub requests_per_ip: u32,
    pub send_code_per_ip: u32,
    pub send_code_per_email: u32,
    pub verify_code_per_ip: u32,
    pub verify_code_per_email: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_ip: 100,
            send_code_per_ip: 20,
            send_code_per_email: 5,
            verify_code_per_ip: 50,
            verify_code_per_email: 20,
        }
    }
}

impl RateLimits {
    const fn for_ip(&self, action: RateLimitAction) -> u32 {
        match action {
            RateLimitAction::Request => self.requests_per_ip,
            RateLimitAction::SendCode => self.send_code_per_ip,
            RateLimitAction::VerifyCode => self.verify_code_per_ip,
        }
    }

    const fn for_email(&self, action: RateLimitAction) -> u32 {
        match action {
            RateLimitAction::Request => u32::MAX,
            RateLimitAction::SendCode => self.send_code_per_email,
            RateLimitAction::VerifyCode => self.verify_code_per_email,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Subject {
    Ip,
    Email,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Fixed-window limiter kept in process memory.
///
/// Requests without a resolvable client IP are not limited by IP.
#[derive(Debug)]
pub struct MemoryRateLimiter {
    window: Duration,
    limits: RateLimits,
    counters: Mutex<HashMap<(Subject, RateLimitAction, String), Window>>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new(window: Duration, limits: RateLimits) -> Self {
        Self {
            window,
            limits,
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn hit(&self, subject: Subject, action: RateLimitAction, key: &str, limit: u32) -> RateLimitDecision {
        if limit == 0 {
            return RateLimitDecision::Limited;
        }
        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop stale windows so the map does not grow without bound.
        if counters.len() > 10_000 {
            counters.retain(|_, window| now.duration_since(window.started) < self.window);
        }
        let window = counters
            .entry((subject, action, key.to_string()))
            .or_insert(Window {
                started: now,
                hits: 0,
            });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.hits = 0;
        }
        if window.hits >= limit {
            return RateLimitDecision::Limited;
        }
        window.hits += 1;
        RateLimitDecision::Allowed
    }
}

impl RateLimiter for MemoryRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        match ip {
            Some(ip) => self.hit(Subject::Ip, action, ip, self.limits.for_ip(action)),
            None => RateLimitDecision::Allowed,
        }
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.hit(Subject::Email, action, email, self.limits.for_email(action))
    }
}
