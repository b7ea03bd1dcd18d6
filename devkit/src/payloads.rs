/*!
Builders for realistic agent payloads.

[`AgentPayloadBuilder`] starts from a complete, parseable payload for one
healthy host and lets each test bend exactly the part it cares about:
directive values, script counts, key statistics, the APCu section.
*/

use serde_json::{json, Map, Value};

/// PHP's stock `opcache.optimization_level`.
const DEFAULT_OPTIMIZATION_LEVEL: u64 = 0x7FFE_BFFF;

#[derive(Debug, Clone)]
pub struct AgentPayloadBuilder {
    php_version: String,
    directives: Map<String, Value>,
    script_count: usize,
    hits: u64,
    misses: u64,
    cached_keys: Option<(u64, u64)>,
    apcu: Option<Value>,
}

impl AgentPayloadBuilder {
    pub fn new() -> Self {
        let mut directives = Map::new();
        directives.insert("opcache.enable".into(), json!(true));
        directives.insert(
            "opcache.optimization_level".into(),
            json!(DEFAULT_OPTIMIZATION_LEVEL),
        );
        directives.insert("opcache.memory_consumption".into(), json!(134_217_728u64));
        directives.insert("opcache.max_wasted_percentage".into(), json!(5.0));
        directives.insert("opcache.interned_strings_buffer".into(), json!(8));
        directives.insert("opcache.max_accelerated_files".into(), json!(10_000));

        Self {
            php_version: "8.2.12".into(),
            directives,
            script_count: 1,
            hits: 5_000,
            misses: 0,
            cached_keys: None,
            apcu: None,
        }
    }

    pub fn php_version(mut self, version: &str) -> Self {
        self.php_version = version.into();
        self
    }

    /// Sets or overrides one directive in the configuration bag.
    pub fn directive(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.directives.insert(name.to_string(), value.into());
        self
    }

    /// Drops one directive entirely, as a misconfigured agent would.
    pub fn without_directive(mut self, name: &str) -> Self {
        self.directives.remove(name);
        self
    }

    /// Seeds the script table with `count` entries.
    pub fn scripts(mut self, count: usize) -> Self {
        self.script_count = count;
        self
    }

    /// Empties the script table, the shape of a host not serving yet.
    pub fn no_scripts(self) -> Self {
        self.scripts(0)
    }

    pub fn hits(mut self, hits: u64) -> Self {
        self.hits = hits;
        self
    }

    pub fn misses(mut self, misses: u64) -> Self {
        self.misses = misses;
        self
    }

    pub fn cached_keys(mut self, max: u64, used: u64) -> Self {
        self.cached_keys = Some((max, used));
        self
    }

    /// Attaches an enabled APCu section reporting this much free shared
    /// memory. Sizes are floats, as `apcu_sma_info()` reports them.
    pub fn apcu_available(mut self, bytes: u64) -> Self {
        self.apcu = Some(json!({
            "enabled": true,
            "sma_info": {
                "num_seg": 1.0,
                "seg_size": 33_554_432.0,
                "avail_mem": bytes as f64,
            },
            "settings": {
                "apc.enabled": {"global_value": "1", "local_value": "1", "access": 7},
            },
        }));
        self
    }

    pub fn build(&self) -> Value {
        let mut scripts = Map::new();
        for index in 0..self.script_count {
            scripts.insert(
                format!("/var/www/app/script_{index}.php"),
                json!({
                    "hits": 120 + index as u64,
                    "timestamp": 1_700_000_000i64,
                    "last_used_timestamp": 1_700_000_100i64,
                    "memory_consumption": 65_536u64,
                }),
            );
        }

        let (max_cached_keys, num_cached_keys) = self
            .cached_keys
            .unwrap_or((16_229, self.script_count as u64));

        let mut payload = json!({
            "configuration": {
                "directives": Value::Object(self.directives.clone()),
                "version": {"version": self.php_version.clone()},
            },
            "status": {
                "cache_full": false,
                "opcache_statistics": {
                    "start_time": 1_700_000_000i64,
                    "max_cached_keys": max_cached_keys,
                    "num_cached_keys": num_cached_keys,
                    "num_cached_scripts": self.script_count as u64,
                    "hits": self.hits,
                    "misses": self.misses,
                    "oom_restarts": 0,
                    "hash_restarts": 0,
                    "manual_restarts": 0,
                    "last_restart_time": 0,
                },
                "memory_usage": {
                    "used_memory": 52_428_800u64,
                    "free_memory": 81_788_928u64,
                    "wasted_memory": 0u64,
                    "current_wasted_percentage": 0.0,
                },
                "interned_strings_usage": {
                    "buffer_size": 8_388_608u64,
                    "used_memory": 2_097_152u64,
                    "free_memory": 6_291_456u64,
                    "number_of_strings": 15_000u64,
                },
                "scripts": Value::Object(scripts),
            },
        });

        if let Some(apcu) = &self.apcu {
            payload["apcu"] = apcu.clone();
        }
        payload
    }

    /// The payload as raw bytes, the way the HTTP client hands it over.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_string().into_bytes()
    }

    /// The payload as a response body for a stub agent.
    pub fn to_body(&self) -> String {
        self.build().to_string()
    }
}

impl Default for AgentPayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
