//! Label-based gauge sink. Every exported field is its own pre-registered
//! gauge carrying `{clusterName, groupName, hostName}` labels; the registry
//! behind it is served by the HTTP exposition endpoint.

use crate::metrics::MetricSink;
use crate::models::NodeStatus;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::HashMap;
use tracing::warn;

const GAUGES: [(&str, &str); 9] = [
    ("opcache_scripts_count", "Cached scripts on the host"),
    ("opcache_memory_free_bytes", "Free opcache memory"),
    ("opcache_memory_used_bytes", "Used opcache memory"),
    ("opcache_memory_wasted_bytes", "Wasted opcache memory"),
    ("opcache_keys_free", "Free key slots in the hash table"),
    ("opcache_keys_usedKeys", "Used keys in the hash table"),
    ("opcache_keys_usedScripts", "Keys holding cached scripts"),
    ("opcache_keyHits_misses", "Cache key misses"),
    ("apcu_memory_free_bytes", "Available APCu shared memory"),
];

const NODE_LABELS: [&str; 3] = ["clusterName", "groupName", "hostName"];

pub struct PrometheusSink {
    gauges: HashMap<String, GaugeVec>,
    prefix: String,
}

impl PrometheusSink {
    /// Registers the fixed gauge set against the given registry. Only names
    /// registered here can ever be set; anything else is a logged no-op.
    pub fn new(registry: &Registry, prefix: &str) -> Result<Self, prometheus::Error> {
        let mut gauges = HashMap::new();
        for (name, help) in GAUGES {
            let full_name = prefixed(prefix, name);
            let gauge = GaugeVec::new(Opts::new(full_name.clone(), help), &NODE_LABELS)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(full_name, gauge);
        }
        Ok(Self {
            gauges,
            prefix: prefix.to_string(),
        })
    }

    fn set(&self, name: &str, cluster: &str, group: &str, host: &str, value: f64) {
        let full_name = prefixed(&self.prefix, name);
        match self.gauges.get(&full_name) {
            Some(gauge) => gauge.with_label_values(&[cluster, group, host]).set(value),
            None => warn!("gauge {full_name} not declared but used"),
        }
    }
}

impl MetricSink for PrometheusSink {
    fn send(&self, cluster: &str, group: &str, host: &str, status: &NodeStatus) {
        let mut values: Vec<(&str, f64)> = vec![
            ("opcache_scripts_count", status.scripts.len() as f64),
            ("opcache_memory_free_bytes", status.memory.free as f64),
            ("opcache_memory_used_bytes", status.memory.used as f64),
            ("opcache_memory_wasted_bytes", status.memory.wasted as f64),
            ("opcache_keys_free", status.keys.free as f64),
            ("opcache_keys_usedKeys", status.keys.used_keys as f64),
            ("opcache_keys_usedScripts", status.keys.used_scripts as f64),
            ("opcache_keyHits_misses", status.key_hits.misses as f64),
        ];

        if let Some(apcu) = status.apcu.as_ref().filter(|a| a.enabled) {
            if let Some(sma) = &apcu.sma_info {
                values.push(("apcu_memory_free_bytes", sma.avail_mem as f64));
            }
        }

        for (name, value) in values {
            self.set(name, cluster, group, host, value);
        }
    }
}

fn prefixed(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}_{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApcuSmaInfo, ApcuStatus, ScriptStatus};

    fn sample_status() -> NodeStatus {
        let mut status = NodeStatus::default();
        status
            .scripts
            .insert("/var/www/index.php".into(), ScriptStatus::default());
        status.memory.free = 4096;
        status.keys.free = 283;
        status.key_hits.misses = 11;
        status
    }

    fn gauge_value(registry: &Registry, name: &str, host: &str) -> Option<f64> {
        registry
            .gather()
            .iter()
            .find(|family| family.get_name() == name)?
            .get_metric()
            .iter()
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|label| label.get_name() == "hostName" && label.get_value() == host)
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    #[test]
    fn sets_labelled_gauges_per_host() {
        let registry = Registry::new();
        let sink = PrometheusSink::new(&registry, "").unwrap();

        sink.send("prod", "web", "h1", &sample_status());

        assert_eq!(gauge_value(&registry, "opcache_scripts_count", "h1"), Some(1.0));
        assert_eq!(
            gauge_value(&registry, "opcache_memory_free_bytes", "h1"),
            Some(4096.0)
        );
        assert_eq!(gauge_value(&registry, "opcache_keys_free", "h1"), Some(283.0));
        assert_eq!(
            gauge_value(&registry, "opcache_keyHits_misses", "h1"),
            Some(11.0)
        );
        // no apcu reported, so the gauge has no sample for this host
        assert_eq!(gauge_value(&registry, "apcu_memory_free_bytes", "h1"), None);
    }

    #[test]
    fn prefix_is_prepended_to_every_gauge() {
        let registry = Registry::new();
        let sink = PrometheusSink::new(&registry, "dashboard").unwrap();

        sink.send("prod", "web", "h1", &sample_status());

        assert_eq!(
            gauge_value(&registry, "dashboard_opcache_scripts_count", "h1"),
            Some(1.0)
        );
        assert_eq!(gauge_value(&registry, "opcache_scripts_count", "h1"), None);
    }

    #[test]
    fn enabled_apcu_fills_the_free_memory_gauge() {
        let registry = Registry::new();
        let sink = PrometheusSink::new(&registry, "").unwrap();

        let mut status = sample_status();
        status.apcu = Some(ApcuStatus {
            enabled: true,
            sma_info: Some(ApcuSmaInfo {
                num_seg: 1,
                seg_size: 33_554_432,
                avail_mem: 9_999_999,
            }),
            settings: None,
        });
        sink.send("prod", "web", "h1", &status);

        assert_eq!(
            gauge_value(&registry, "apcu_memory_free_bytes", "h1"),
            Some(9_999_999.0)
        );
    }

    #[test]
    fn unregistered_gauge_is_a_logged_noop() {
        let registry = Registry::new();
        let sink = PrometheusSink::new(&registry, "").unwrap();

        sink.set("opcache_bogus_metric", "prod", "web", "h1", 1.0);

        assert!(registry
            .gather()
            .iter()
            .all(|family| family.get_name() != "opcache_bogus_metric"));
    }
}
