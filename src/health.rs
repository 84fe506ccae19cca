use crate::state::{AppState, MetricsSnapshot};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let config = &state.config;
    let active = state.registry.session_count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "voice-bridge-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "sessions": {
            "active": active,
            "created": metrics.sessions_created,
            "failed": metrics.session_failures
        },
        "system": session_load(active, state.registry.capacity())
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "sessions": {
            "created": metrics.sessions_created,
            "ended": metrics.sessions_ended,
            "failed": metrics.session_failures,
            "active": metrics.active_sessions,
            "max_concurrent": state.registry.capacity()
        },
        "turns": {
            "started": metrics.turns_started,
            "completed": metrics.turns_completed,
            "interrupted": metrics.turns_interrupted,
            "barge_ins": metrics.barge_ins,
            "interruption_rate": interruption_rate(&metrics)
        }
    }))
}

fn interruption_rate(metrics: &MetricsSnapshot) -> f64 {
    let finished = metrics.turns_completed + metrics.turns_interrupted;
    if finished > 0 {
        metrics.turns_interrupted as f64 / finished as f64
    } else {
        0.0
    }
}

fn session_load(active: usize, capacity: usize) -> serde_json::Value {
    let session_usage = if capacity > 0 {
        active as f64 / capacity as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": capacity,
        "current_sessions": active,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_load_levels() {
        assert_eq!(session_load(0, 10)["status"], "normal");
        assert_eq!(session_load(8, 10)["status"], "moderate_load");
        assert_eq!(session_load(10, 10)["status"], "high_load");
        assert_eq!(session_load(9, 10)["load_warnings"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_interruption_rate() {
        let mut metrics = MetricsSnapshot::default();
        assert_eq!(interruption_rate(&metrics), 0.0);
        metrics.turns_completed = 3;
        metrics.turns_interrupted = 1;
        assert_eq!(interruption_rate(&metrics), 0.25);
    }
}
