use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "genie-voice-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "live": {
            "connections": metrics.connections,
            "active_sessions": metrics.active_sessions,
            "sessions_opened": metrics.sessions_opened,
            "sessions_failed": metrics.sessions_failed
        },
        "endpoint": {
            "model": config.live.model,
            "voice_name": config.live.voice_name,
            "api_key_configured": config.has_api_key()
        },
        "system": get_system_status(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let failure_rate = {
        let attempts = metrics.sessions_opened + metrics.sessions_failed;
        if attempts > 0 {
            metrics.sessions_failed as f64 / attempts as f64
        } else {
            0.0
        }
    };

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "connections": {
            "current": metrics.connections,
            "rejected": metrics.connections_rejected,
            "max": config.performance.max_concurrent_sessions
        },
        "sessions": {
            "active": metrics.active_sessions,
            "opened": metrics.sessions_opened,
            "failed": metrics.sessions_failed,
            "failure_rate": failure_rate
        },
        "audio": {
            "frames_sent": metrics.frames_sent,
            "frames_muted": metrics.frames_muted,
            "frames_received": metrics.frames_received,
            "decode_errors": metrics.decode_errors,
            "interruptions": metrics.interruptions
        },
        "system": get_system_status(&config, &metrics)
    }))
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let usage = if config.performance.max_concurrent_sessions > 0 {
        metrics.connections as f64 / config.performance.max_concurrent_sessions as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "connection_usage_percent": (usage * 100.0).round(),
        "max_connections": config.performance.max_concurrent_sessions,
        "current_connections": metrics.connections,
        "load_warnings": if usage > 0.8 {
            vec!["High connection usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}
