//! # Application State Management
//!
//! Shared state accessed by every HTTP handler and every live WebSocket
//! connection at the same time.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Many handlers and connection tasks hold a reference to the same data
//! - **RwLock**: Many readers OR one writer at a time
//! - **T**: The configuration or metrics being protected
//!
//! ### Lock Poisoning
//! A lock is "poisoned" when a thread panics while holding it. The data here
//! is plain counters and config values that are never left half-updated, so
//! we recover the guard with `PoisonError::into_inner` instead of panicking.
//!
//! ## What lives here:
//! - The runtime configuration (readable and updatable through `/api/v1/config`)
//! - Live session metrics (connections, sessions, frame counters)
//! - Admission control for new live connections

use crate::config::AppConfig;
use crate::live::session::SessionStats;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across all handlers.
///
/// Cloning is cheap: only the `Arc` pointers are copied.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Counters updated by live connections
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all live connections since server start.
///
/// ## Gauges vs Counters:
/// - **connections** and **active_sessions** go up and down
/// - Everything else only ever increases
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    /// Live WebSocket connections currently admitted
    pub connections: u32,

    /// Live voice sessions currently open
    pub active_sessions: u32,

    /// Connections refused because the server was at capacity
    pub connections_rejected: u64,

    pub sessions_opened: u64,

    /// Opens that failed (permission denied, endpoint unreachable)
    pub sessions_failed: u64,

    /// Capture frames forwarded to the endpoint
    pub frames_sent: u64,

    /// Capture frames suppressed while muted
    pub frames_muted: u64,

    /// Synthesized frames received from the endpoint
    pub frames_received: u64,

    pub decode_errors: u64,

    pub interruptions: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Only newly opened sessions pick up the change; open sessions keep the
    /// settings they were opened with.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    /// Admit a new live connection if there is capacity for it.
    ///
    /// The check and the increment happen under one write lock, so two
    /// connections racing for the last slot cannot both get in.
    pub fn try_acquire_connection(&self) -> bool {
        let limit = self.get_config().performance.max_concurrent_sessions;
        let mut metrics = self.write_metrics();
        if (metrics.connections as usize) < limit {
            metrics.connections += 1;
            true
        } else {
            metrics.connections_rejected += 1;
            false
        }
    }

    pub fn release_connection(&self) {
        let mut metrics = self.write_metrics();
        metrics.connections = metrics.connections.saturating_sub(1);
    }

    pub fn record_session_opened(&self) {
        let mut metrics = self.write_metrics();
        metrics.sessions_opened += 1;
        metrics.active_sessions += 1;
    }

    pub fn record_session_failed(&self) {
        self.write_metrics().sessions_failed += 1;
    }

    /// Fold a finished session's counters into the totals.
    pub fn record_session_closed(&self, stats: &SessionStats) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
        metrics.frames_sent += stats.frames_sent;
        metrics.frames_muted += stats.frames_muted;
        metrics.frames_received += stats.frames_received;
        metrics.decode_errors += stats.decode_errors;
        metrics.interruptions += stats.interruptions;
    }

    /// Get a consistent copy of the metrics without holding the lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_limit(limit: usize) -> AppState {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = limit;
        AppState::new(config)
    }

    #[test]
    fn test_connection_admission_respects_limit() {
        let state = state_with_limit(2);
        assert!(state.try_acquire_connection());
        assert!(state.try_acquire_connection());
        assert!(!state.try_acquire_connection());

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.connections, 2);
        assert_eq!(metrics.connections_rejected, 1);

        state.release_connection();
        assert!(state.try_acquire_connection());
    }

    #[test]
    fn test_release_never_underflows() {
        let state = state_with_limit(1);
        state.release_connection();
        assert_eq!(state.get_metrics_snapshot().connections, 0);
    }

    #[test]
    fn test_session_stats_fold_into_totals() {
        let state = state_with_limit(4);
        state.record_session_opened();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);

        let stats = SessionStats {
            frames_captured: 12,
            frames_sent: 10,
            frames_muted: 2,
            frames_received: 7,
            decode_errors: 1,
            interruptions: 3,
        };
        state.record_session_closed(&stats);
        state.record_session_failed();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.sessions_opened, 1);
        assert_eq!(metrics.sessions_failed, 1);
        assert_eq!(metrics.frames_sent, 10);
        assert_eq!(metrics.frames_muted, 2);
        assert_eq!(metrics.frames_received, 7);
        assert_eq!(metrics.decode_errors, 1);
        assert_eq!(metrics.interruptions, 3);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let state = state_with_limit(4);
        let mut config = state.get_config();
        config.server.port = 0;
        assert!(state.update_config(config).is_err());
        assert_ne!(state.get_config().server.port, 0);

        let mut config = state.get_config();
        config.live.voice_name = "Kore".to_string();
        assert!(state.update_config(config).is_ok());
        assert_eq!(state.get_config().live.voice_name, "Kore");
    }
}
