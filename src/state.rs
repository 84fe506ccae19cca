//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket connection.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Every actix worker thread holds a clone of `AppState`; the `Arc`s inside make those
//!   clones point at the same registry and metrics.
//!
//! ### RwLock (Reader-Writer Lock)
//! - Metrics are written on every session and turn event and read by `/api/v1/metrics`.
//! - Critical sections are a few integer increments, so a std lock is fine even from
//!   async code: it is never held across an `.await`.
//!
//! ## What lives here:
//! - **config**: the effective configuration (read-only after startup)
//! - **registry**: the session registry, the only way to reach a live call
//! - **metrics**: session and turn counters
//! - **start_time**: for uptime reporting

use crate::config::AppConfig;
use crate::session::SessionRegistry;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Effective configuration. Never changes after startup, so no lock is needed
    pub config: Arc<AppConfig>,

    /// Registry of live call sessions
    pub registry: Arc<SessionRegistry>,

    /// Counters shared with the registry and every session actor
    pub metrics: Arc<BridgeMetrics>,

    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<SessionRegistry>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            metrics,
            start_time: Instant::now(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Point-in-time copy of the bridge counters, as served by `/api/v1/metrics`.
///
/// ## Counters:
/// - **sessions_created / sessions_ended**: lifecycle totals since startup
/// - **session_failures**: `create` calls that returned an error
/// - **active_sessions**: sessions currently registered
/// - **turns_***: one increment per turn start and per turn outcome
/// - **barge_ins**: turns the caller talked over
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_ended: u64,
    pub session_failures: u64,
    pub active_sessions: u64,
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_interrupted: u64,
    pub barge_ins: u64,
}

/// Thread-safe bridge counters.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    counters: RwLock<MetricsSnapshot>,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update under the write lock.
    ///
    /// A poisoned lock only means another thread panicked mid-increment; the counters
    /// are still usable, so we take them back instead of propagating the panic.
    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut counters);
    }

    pub fn record_session_created(&self) {
        self.update(|m| {
            m.sessions_created += 1;
            m.active_sessions += 1;
        });
    }

    pub fn record_session_ended(&self) {
        self.update(|m| {
            m.sessions_ended += 1;
            m.active_sessions = m.active_sessions.saturating_sub(1);
        });
    }

    pub fn record_session_failure(&self) {
        self.update(|m| m.session_failures += 1);
    }

    pub fn record_turn_started(&self) {
        self.update(|m| m.turns_started += 1);
    }

    pub fn record_turn_completed(&self) {
        self.update(|m| m.turns_completed += 1);
    }

    pub fn record_turn_interrupted(&self) {
        self.update(|m| m.turns_interrupted += 1);
    }

    pub fn record_barge_in(&self) {
        self.update(|m| m.barge_ins += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
