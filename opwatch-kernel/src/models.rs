use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Latest parsed sample for one monitored host. Replaced wholesale on every
/// successful fetch, never mutated field by field. The zero value doubles as
/// the pre-first-fetch placeholder.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NodeStatus {
    pub php_version: String,
    /// Raw `opcache.*` directive bag as reported by the agent. The handful of
    /// directives the parser consumes are also narrowed into the typed fields
    /// below; everything else passes through untouched for display.
    pub configuration: HashMap<String, serde_json::Value>,
    pub scripts: HashMap<String, ScriptStatus>,
    /// Optimization pass indices decoded from `opcache.optimization_level`.
    pub optimizations: Vec<u8>,
    pub start_time: i64,
    pub cache_full: bool,
    pub memory: MemoryStatus,
    pub interned_strings: InternedStringsStatus,
    pub keys: KeyStatus,
    pub key_hits: KeyHitStatus,
    pub restarts: RestartStatus,
    /// Companion APCu status, when the agent reports one.
    pub apcu: Option<ApcuStatus>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ScriptStatus {
    pub hits: u64,
    pub timestamp: i64,
    pub last_used_timestamp: i64,
    pub memory_consumption: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MemoryStatus {
    /// Configured total, from the `opcache.memory_consumption` directive.
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub wasted: u64,
    pub max_wasted_percentage: f64,
    pub current_wasted_percentage: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct InternedStringsStatus {
    /// `opcache.interned_strings_buffer` (megabytes) converted to bytes.
    pub total: u64,
    pub buffer_size: u64,
    pub used: u64,
    pub free: u64,
    pub number_of_strings: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct KeyStatus {
    /// Configured ceiling, from `opcache.max_accelerated_files`.
    pub configured_max: u64,
    /// Prime-sized hash capacity actually allocated by the runtime.
    pub capacity: u64,
    pub used_keys: u64,
    pub used_scripts: u64,
    /// `capacity - used_keys`.
    pub free: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct KeyHitStatus {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RestartStatus {
    pub oom: u64,
    pub hash: u64,
    pub manual: u64,
    pub last_restart_time: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ApcuStatus {
    pub enabled: bool,
    pub sma_info: Option<ApcuSmaInfo>,
    pub settings: Option<HashMap<String, ApcuSetting>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ApcuSmaInfo {
    pub num_seg: u64,
    pub seg_size: u64,
    pub avail_mem: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ApcuSetting {
    pub global_value: String,
    pub local_value: String,
    pub access: u32,
}

pub type GroupStatusMap = HashMap<String, NodeStatus>;
pub type ClusterStatusMap = HashMap<String, GroupStatusMap>;
pub type FleetStatusMap = HashMap<String, ClusterStatusMap>;
