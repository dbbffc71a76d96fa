//! Prometheus-style `/metrics` text endpoint (§12 supplement): install and
//! uninstall counters, active plugin counts by status, and Event Bus drop
//! counters.
//!
//! Grounded on the teacher's `metrics.rs` for the overall shape — a
//! process-global collector behind a `OnceLock`, rendered to the Prometheus
//! text exposition format on demand — trimmed to the counters this system
//! actually has: there are no providers, tokens, or costs to track here, and
//! plugin-status gauges are derived live from the store rather than
//! accumulated, since the store is already the source of truth for "how many
//! plugins are in each state right now".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use flowforge_runtime::model::PluginStatus;

use crate::event_bus::EventBus;
use crate::store::{PluginFilter, Store};

static COUNTERS: OnceLock<Arc<Counters>> = OnceLock::new();

struct Counters {
    installs_total: AtomicU64,
    install_failures_total: AtomicU64,
    uninstalls_total: AtomicU64,
}

fn counters() -> &'static Arc<Counters> {
    COUNTERS.get_or_init(|| {
        Arc::new(Counters {
            installs_total: AtomicU64::new(0),
            install_failures_total: AtomicU64::new(0),
            uninstalls_total: AtomicU64::new(0),
        })
    })
}

pub fn record_install_success() {
    counters().installs_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_install_failure() {
    counters().install_failures_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_uninstall() {
    counters().uninstalls_total.fetch_add(1, Ordering::Relaxed);
}

const ALL_STATUSES: [PluginStatus; 8] = [
    PluginStatus::Installing,
    PluginStatus::Installed,
    PluginStatus::Starting,
    PluginStatus::Running,
    PluginStatus::Stopping,
    PluginStatus::Stopped,
    PluginStatus::Error,
    PluginStatus::Uninstalling,
];

fn status_label(status: PluginStatus) -> String {
    format!("{status:?}").to_lowercase()
}

/// Renders the current state as Prometheus exposition-format text.
pub async fn render(store: &Store, event_bus: &EventBus) -> String {
    let counters = counters();
    let mut out = String::new();

    out.push_str("# HELP flowforge_plugin_installs_total Total successful plugin installs.\n");
    out.push_str("# TYPE flowforge_plugin_installs_total counter\n");
    out.push_str(&format!(
        "flowforge_plugin_installs_total {}\n",
        counters.installs_total.load(Ordering::Relaxed)
    ));

    out.push_str("# HELP flowforge_plugin_install_failures_total Total failed plugin installs.\n");
    out.push_str("# TYPE flowforge_plugin_install_failures_total counter\n");
    out.push_str(&format!(
        "flowforge_plugin_install_failures_total {}\n",
        counters.install_failures_total.load(Ordering::Relaxed)
    ));

    out.push_str("# HELP flowforge_plugin_uninstalls_total Total plugin uninstalls.\n");
    out.push_str("# TYPE flowforge_plugin_uninstalls_total counter\n");
    out.push_str(&format!(
        "flowforge_plugin_uninstalls_total {}\n",
        counters.uninstalls_total.load(Ordering::Relaxed)
    ));

    out.push_str("# HELP flowforge_plugins_by_status Active plugin instances per lifecycle status.\n");
    out.push_str("# TYPE flowforge_plugins_by_status gauge\n");
    let by_status = match store.list_plugins(&PluginFilter::default()).await {
        Ok(instances) => {
            let mut counts: HashMap<PluginStatus, u64> = HashMap::new();
            for instance in instances {
                *counts.entry(instance.status).or_insert(0) += 1;
            }
            counts
        }
        Err(_) => HashMap::new(),
    };
    for status in ALL_STATUSES {
        out.push_str(&format!(
            "flowforge_plugins_by_status{{status=\"{}\"}} {}\n",
            status_label(status),
            by_status.get(&status).copied().unwrap_or(0)
        ));
    }

    out.push_str("# HELP flowforge_event_bus_dropped_total Events dropped across all subscribers due to queue overflow.\n");
    out.push_str("# TYPE flowforge_event_bus_dropped_total counter\n");
    out.push_str(&format!(
        "flowforge_event_bus_dropped_total {}\n",
        event_bus.total_dropped()
    ));

    out.push_str("# HELP flowforge_event_bus_subscribers Current Event Bus subscriber count.\n");
    out.push_str("# TYPE flowforge_event_bus_subscribers gauge\n");
    out.push_str(&format!(
        "flowforge_event_bus_subscribers {}\n",
        event_bus.subscriber_count()
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_label_is_lowercase() {
        assert_eq!(status_label(PluginStatus::Running), "running");
        assert_eq!(status_label(PluginStatus::Uninstalling), "uninstalling");
    }
}
