//! Decodes the raw agent payload into a `NodeStatus`.
//!
//! The payload carries two mandatory sections, `configuration` (directive bag
//! plus runtime version) and `status` (counters plus the per-script table),
//! and an optional `apcu` section. Sections and fields the agent omits decode
//! to their zero values; an empty script table is the one payload-level
//! rejection (`NoData`), since such a host is not serving the monitored
//! workload yet.

use crate::agent::AgentError;
use crate::models::{
    ApcuSetting, ApcuSmaInfo, ApcuStatus, InternedStringsStatus, KeyHitStatus, KeyStatus,
    MemoryStatus, NodeStatus, RestartStatus, ScriptStatus,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Optimization passes live in bits 0 through 16 of
/// `opcache.optimization_level`; higher bits are reserved.
const OPTIMIZATION_BITS: std::ops::RangeInclusive<u8> = 0..=16;

const BYTES_PER_MEGABYTE: u64 = 1_048_576;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AgentPayload {
    configuration: PayloadConfiguration,
    status: PayloadStatus,
    apcu: Option<PayloadApcu>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadConfiguration {
    directives: HashMap<String, Value>,
    version: PayloadVersion,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadVersion {
    version: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadStatus {
    cache_full: bool,
    opcache_statistics: PayloadOpcacheStatistics,
    memory_usage: PayloadMemoryUsage,
    interned_strings_usage: PayloadInternedStringsUsage,
    scripts: HashMap<String, PayloadScript>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadOpcacheStatistics {
    start_time: i64,
    max_cached_keys: u64,
    num_cached_keys: u64,
    num_cached_scripts: u64,
    hits: u64,
    misses: u64,
    oom_restarts: u64,
    hash_restarts: u64,
    manual_restarts: u64,
    last_restart_time: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadMemoryUsage {
    used_memory: u64,
    free_memory: u64,
    wasted_memory: u64,
    current_wasted_percentage: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadInternedStringsUsage {
    buffer_size: u64,
    used_memory: u64,
    free_memory: u64,
    number_of_strings: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadScript {
    hits: u64,
    timestamp: i64,
    last_used_timestamp: i64,
    memory_consumption: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadApcu {
    enabled: bool,
    // apcu_sma_info() reports sizes as floats on some builds
    sma_info: Option<PayloadApcuSmaInfo>,
    settings: Option<HashMap<String, PayloadApcuSetting>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadApcuSmaInfo {
    num_seg: f64,
    seg_size: f64,
    avail_mem: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PayloadApcuSetting {
    global_value: Option<String>,
    local_value: Option<String>,
    access: u32,
}

/// Expands the optimization bitmask into the list of enabled pass indices,
/// ascending.
pub fn decode_optimizations(level: u64) -> Vec<u8> {
    OPTIMIZATION_BITS
        .filter(|bit| level & (1u64 << bit) != 0)
        .collect()
}

fn numeric_directive(directives: &HashMap<String, Value>, name: &str) -> Result<f64, AgentError> {
    directives.get(name).and_then(Value::as_f64).ok_or_else(|| {
        AgentError::MalformedPayload(format!("directive {name} is missing or not numeric"))
    })
}

fn integer_directive(directives: &HashMap<String, Value>, name: &str) -> Result<u64, AgentError> {
    Ok(numeric_directive(directives, name)? as u64)
}

/// Parses one raw agent response into a `NodeStatus`.
pub fn parse(raw: &[u8]) -> Result<NodeStatus, AgentError> {
    let payload: AgentPayload =
        serde_json::from_slice(raw).map_err(|e| AgentError::MalformedPayload(e.to_string()))?;

    if payload.status.scripts.is_empty() {
        return Err(AgentError::NoData);
    }

    let directives = payload.configuration.directives;
    let optimization_level = integer_directive(&directives, "opcache.optimization_level")?;
    let memory_total = integer_directive(&directives, "opcache.memory_consumption")?;
    let max_wasted_percentage = numeric_directive(&directives, "opcache.max_wasted_percentage")?;
    let interned_buffer_mb = integer_directive(&directives, "opcache.interned_strings_buffer")?;
    let configured_max_files = integer_directive(&directives, "opcache.max_accelerated_files")?;

    let stats = payload.status.opcache_statistics;
    let memory = payload.status.memory_usage;
    let interned = payload.status.interned_strings_usage;

    let scripts = payload
        .status
        .scripts
        .into_iter()
        .map(|(path, script)| {
            (
                path,
                ScriptStatus {
                    hits: script.hits,
                    timestamp: script.timestamp,
                    last_used_timestamp: script.last_used_timestamp,
                    memory_consumption: script.memory_consumption,
                },
            )
        })
        .collect();

    Ok(NodeStatus {
        php_version: payload.configuration.version.version,
        configuration: directives,
        scripts,
        optimizations: decode_optimizations(optimization_level),
        start_time: stats.start_time,
        cache_full: payload.status.cache_full,
        memory: MemoryStatus {
            total: memory_total,
            used: memory.used_memory,
            free: memory.free_memory,
            wasted: memory.wasted_memory,
            max_wasted_percentage,
            current_wasted_percentage: memory.current_wasted_percentage,
        },
        interned_strings: InternedStringsStatus {
            total: interned_buffer_mb * BYTES_PER_MEGABYTE,
            buffer_size: interned.buffer_size,
            used: interned.used_memory,
            free: interned.free_memory,
            number_of_strings: interned.number_of_strings,
        },
        keys: KeyStatus {
            configured_max: configured_max_files,
            capacity: stats.max_cached_keys,
            used_keys: stats.num_cached_keys,
            used_scripts: stats.num_cached_scripts,
            free: stats.max_cached_keys.saturating_sub(stats.num_cached_keys),
        },
        key_hits: KeyHitStatus {
            hits: stats.hits,
            misses: stats.misses,
        },
        restarts: RestartStatus {
            oom: stats.oom_restarts,
            hash: stats.hash_restarts,
            manual: stats.manual_restarts,
            last_restart_time: stats.last_restart_time,
        },
        apcu: payload.apcu.map(convert_apcu),
    })
}

fn convert_apcu(apcu: PayloadApcu) -> ApcuStatus {
    ApcuStatus {
        enabled: apcu.enabled,
        sma_info: apcu.sma_info.map(|sma| ApcuSmaInfo {
            num_seg: sma.num_seg as u64,
            seg_size: sma.seg_size as u64,
            avail_mem: sma.avail_mem as u64,
        }),
        settings: apcu.settings.map(|settings| {
            settings
                .into_iter()
                .map(|(name, setting)| {
                    (
                        name,
                        ApcuSetting {
                            global_value: setting.global_value.unwrap_or_default(),
                            local_value: setting.local_value.unwrap_or_default(),
                            access: setting.access,
                        },
                    )
                })
                .collect()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opwatch_devkit::AgentPayloadBuilder;

    #[test]
    fn bitmap_expands_to_ascending_indices() {
        assert_eq!(decode_optimizations(5), vec![0, 2]);
        assert_eq!(decode_optimizations(0), Vec::<u8>::new());
        assert_eq!(decode_optimizations(1 << 16), vec![16]);
        // bits above 16 are ignored
        assert_eq!(decode_optimizations(1 << 17), Vec::<u8>::new());
    }

    #[test]
    fn parses_a_full_payload() {
        let raw = AgentPayloadBuilder::new()
            .php_version("8.3.2")
            .directive("opcache.optimization_level", 5)
            .scripts(3)
            .hits(9_000)
            .misses(1)
            .cached_keys(983, 700)
            .to_bytes();

        let status = parse(&raw).unwrap();
        assert_eq!(status.php_version, "8.3.2");
        assert_eq!(status.scripts.len(), 3);
        assert_eq!(status.optimizations, vec![0, 2]);
        assert_eq!(status.keys.capacity, 983);
        assert_eq!(status.keys.used_keys, 700);
        assert_eq!(status.keys.free, 283);
        assert_eq!(status.key_hits.hits, 9_000);
        assert_eq!(status.key_hits.misses, 1);
        assert_eq!(status.interned_strings.total, 8 * 1_048_576);
        assert_eq!(status.memory.total, 134_217_728);
        assert!(status.configuration.contains_key("opcache.enable"));
        assert!(status.apcu.is_none());
    }

    #[test]
    fn empty_script_table_is_no_data() {
        let raw = AgentPayloadBuilder::new().no_scripts().to_bytes();
        assert!(matches!(parse(&raw), Err(AgentError::NoData)));
    }

    #[test]
    fn non_numeric_directive_is_malformed() {
        let raw = AgentPayloadBuilder::new()
            .directive("opcache.optimization_level", "everything")
            .to_bytes();

        match parse(&raw) {
            Err(AgentError::MalformedPayload(msg)) => {
                assert!(msg.contains("opcache.optimization_level"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_directive_is_malformed() {
        let raw = AgentPayloadBuilder::new()
            .without_directive("opcache.memory_consumption")
            .to_bytes();

        match parse(&raw) {
            Err(AgentError::MalformedPayload(msg)) => {
                assert!(msg.contains("opcache.memory_consumption"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        assert!(matches!(
            parse(b"<html>boom</html>"),
            Err(AgentError::MalformedPayload(_))
        ));
    }

    #[test]
    fn apcu_section_is_optional_but_parsed() {
        let raw = AgentPayloadBuilder::new().apcu_available(104_857_600).to_bytes();

        let status = parse(&raw).unwrap();
        let apcu = status.apcu.expect("apcu section should parse");
        assert!(apcu.enabled);
        assert_eq!(apcu.sma_info.unwrap().avail_mem, 104_857_600);
    }
}
