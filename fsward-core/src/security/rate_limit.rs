use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{ToolError, ToolResult};
use crate::settings::{RateLimit, RateLimitSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_in_ms: Option<u64>,
}

impl RateDecision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            reason: None,
            limit: None,
            remaining: None,
            reset_in_ms: None,
        }
    }
}

/// Current consumption of one (operation, agent) pair, without recording a
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateUsage {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    Pair { operation: String, agent: String },
    Agent(String),
    All,
}

/// Sliding window limiter keyed by (operation, agent).
///
/// Each window lives in its own map entry; holding the entry guard for the
/// whole prune, compare and record sequence makes a check atomic for its key
/// without serializing unrelated keys.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    limits: BTreeMap<String, RateLimit>,
    windows: DashMap<(String, String), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            limits: settings.limits.clone(),
            windows: DashMap::new(),
        }
    }

    pub fn check(&self, operation: &str, agent: &str) -> RateDecision {
        self.check_at(operation, agent, Instant::now())
    }

    pub fn check_at(&self, operation: &str, agent: &str, now: Instant) -> RateDecision {
        if !self.enabled {
            return RateDecision::unlimited();
        }
        let Some(limit) = self.limits.get(operation) else {
            return RateDecision::unlimited();
        };
        let window = Duration::from_millis(limit.per_ms);

        let mut timestamps = self
            .windows
            .entry((operation.to_string(), agent.to_string()))
            .or_default();
        prune(&mut timestamps, now, window);

        if timestamps.len() >= limit.max as usize {
            let reset_in_ms = reset_in(&timestamps, now, window);
            tracing::debug!(operation, agent, reset_in_ms, "Rate limit exceeded");
            return RateDecision {
                allowed: false,
                reason: Some(format!(
                    "{operation} allows {} requests per {}ms, retry in {reset_in_ms}ms",
                    limit.max, limit.per_ms
                )),
                limit: Some(limit.max),
                remaining: Some(0),
                reset_in_ms: Some(reset_in_ms),
            };
        }

        timestamps.push_back(now);
        let remaining = limit.max - timestamps.len() as u32;
        RateDecision {
            allowed: true,
            reason: None,
            limit: Some(limit.max),
            remaining: Some(remaining),
            reset_in_ms: Some(reset_in(&timestamps, now, window)),
        }
    }

    /// Checks and converts a denial into [`ToolError::RateLimited`].
    pub fn enforce(&self, operation: &str, agent: &str) -> ToolResult<RateDecision> {
        let decision = self.check(operation, agent);
        if decision.allowed {
            return Ok(decision);
        }
        Err(ToolError::RateLimited(
            decision
                .reason
                .unwrap_or_else(|| operation.to_string()),
        ))
    }

    pub fn usage(&self, operation: &str, agent: &str) -> Option<RateUsage> {
        self.usage_at(operation, agent, Instant::now())
    }

    pub fn usage_at(&self, operation: &str, agent: &str, now: Instant) -> Option<RateUsage> {
        let limit = self.limits.get(operation)?;
        let window = Duration::from_millis(limit.per_ms);
        let count = self
            .windows
            .get(&(operation.to_string(), agent.to_string()))
            .map(|timestamps| {
                timestamps
                    .iter()
                    .filter(|ts| now.saturating_duration_since(**ts) < window)
                    .count() as u32
            })
            .unwrap_or(0);

        Some(RateUsage {
            count,
            limit: limit.max,
            remaining: limit.max.saturating_sub(count),
        })
    }

    pub fn reset(&self, scope: ResetScope) {
        match scope {
            ResetScope::Pair { operation, agent } => {
                self.windows.remove(&(operation, agent));
            }
            ResetScope::Agent(agent) => self.windows.retain(|(_, a), _| *a != agent),
            ResetScope::All => self.windows.clear(),
        }
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// Drops every window whose newest request is older than the longest
    /// configured window. Returns how many windows were removed.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let longest = self
            .limits
            .values()
            .map(|limit| Duration::from_millis(limit.per_ms))
            .max()
            .unwrap_or_default();

        let before = self.windows.len();
        self.windows.retain(|_, timestamps| {
            timestamps
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < longest)
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up idle rate windows");
        }
        removed
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) < window {
            break;
        }
        timestamps.pop_front();
    }
}

fn reset_in(timestamps: &VecDeque<Instant>, now: Instant, window: Duration) -> u64 {
    timestamps
        .front()
        .map(|oldest| (*oldest + window).saturating_duration_since(now).as_millis() as u64)
        .unwrap_or(0)
}
