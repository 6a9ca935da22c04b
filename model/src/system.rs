use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot of the host a test plan was generated against.
///
/// The engine never inspects these fields; they travel from the planner to
/// the execution record so that analyzers and reports can refer to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub platform: String,
    pub system: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub processor: String,
    #[serde(default)]
    pub cpu_count: u32,
    /// Bytes
    #[serde(default)]
    pub memory_total: u64,
    /// Bytes
    #[serde(default)]
    pub memory_available: u64,
    #[serde(default)]
    pub disk_usage: Map<String, Value>,
    #[serde(default)]
    pub network_interfaces: Vec<Value>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub home_directory: String,
    #[serde(default = "Utc::now")]
    pub detected_at: DateTime<Utc>,
}

impl SystemInfo {
    /// Best-effort snapshot from what the standard environment exposes.
    ///
    /// Memory, disk and network fields are left empty; a dedicated collector
    /// fills them when one is wired in.
    pub fn basic() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);

        Self {
            platform: std::env::consts::FAMILY.to_string(),
            system: system_name().to_string(),
            release: String::new(),
            version: String::new(),
            machine: std::env::consts::ARCH.to_string(),
            processor: std::env::consts::ARCH.to_string(),
            cpu_count,
            memory_total: 0,
            memory_available: 0,
            disk_usage: Map::new(),
            network_interfaces: Vec::new(),
            hostname: env_or_unknown(&["HOSTNAME", "COMPUTERNAME"]),
            username: env_or_unknown(&["USER", "USERNAME"]),
            home_directory: env_or_unknown(&["HOME", "USERPROFILE"]),
            detected_at: Utc::now(),
        }
    }

    pub fn is_macos(&self) -> bool {
        self.system.eq_ignore_ascii_case("darwin")
    }

    pub fn is_linux(&self) -> bool {
        self.system.eq_ignore_ascii_case("linux")
    }
}

fn system_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "Darwin",
        "linux" => "Linux",
        "windows" => "Windows",
        other => other,
    }
}

fn env_or_unknown(keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}
