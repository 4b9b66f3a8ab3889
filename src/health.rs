//! Process-local component health registry.
//!
//! Supervised components call [`mark_component_ok`] / [`mark_component_error`]
//! as they run; the gateway serves [`snapshot_json`] to external probes.
//! Nothing here persists — the registry describes the current process only.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
struct ComponentHealth {
    status: String,
    last_ok: Option<String>,
    last_error: Option<String>,
    restart_count: u64,
}

static STARTED_AT: OnceLock<Instant> = OnceLock::new();
static REGISTRY: OnceLock<Mutex<HashMap<String, ComponentHealth>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, ComponentHealth>> {
    STARTED_AT.get_or_init(Instant::now);
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Record that a component is running normally.
pub fn mark_component_ok(name: &str) {
    let mut components = registry().lock();
    let entry = components.entry(name.to_string()).or_default();
    entry.status = "ok".to_string();
    entry.last_ok = Some(now_rfc3339());
}

/// Record a component failure with a human-readable detail.
pub fn mark_component_error(name: &str, detail: impl Into<String>) {
    let mut components = registry().lock();
    let entry = components.entry(name.to_string()).or_default();
    entry.status = "error".to_string();
    entry.last_error = Some(detail.into());
}

/// Count a supervisor-driven restart of a component.
pub fn bump_component_restart(name: &str) {
    let mut components = registry().lock();
    let entry = components.entry(name.to_string()).or_default();
    entry.restart_count = entry.restart_count.saturating_add(1);
}

/// Uptime plus the per-component status map, as served by the gateway.
pub fn snapshot_json() -> serde_json::Value {
    let uptime = STARTED_AT.get_or_init(Instant::now).elapsed().as_secs();
    let components = registry().lock();

    let mut map = serde_json::Map::new();
    for (name, health) in components.iter() {
        map.insert(
            name.clone(),
            serde_json::json!({
                "status": health.status,
                "last_ok": health.last_ok,
                "last_error": health.last_error,
                "restart_count": health.restart_count,
            }),
        );
    }

    serde_json::json!({
        "uptime_seconds": uptime,
        "components": serde_json::Value::Object(map),
    })
}
