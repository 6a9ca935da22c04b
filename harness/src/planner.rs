//! Where test plans come from.
//!
//! Plan generation itself (prompting a model with the host snapshot) lives
//! behind [`TestPlanner`]. This module provides the built-in host plan and the
//! tolerant parser that turns a planner's JSON reply into a [`TestPlan`].

use crate::config::EngineConfig;
use async_trait::async_trait;
use chrono::Utc;
use model::{SystemInfo, TestCategory, TestItem, TestPlan, DEFAULT_PRIORITY};
use serde_json::Value;
use thiserror::Error;

const DEFAULT_PLAN_NAME: &str = "System test plan";

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Failed to parse planner response as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid planner response: {message}")]
    InvalidResponse { message: String },

    #[error("Planner failed: {message}")]
    PlannerFailed { message: String },
}

pub type PlanResult<T> = Result<T, PlanError>;

#[async_trait]
pub trait TestPlanner: Send + Sync {
    async fn generate_plan(&self, system_info: &SystemInfo) -> PlanResult<TestPlan>;

    fn planner_name(&self) -> &'static str;
}

/// Fixed diagnostics for the host's operating system.
#[derive(Debug, Clone, Default)]
pub struct DefaultPlanner;

impl DefaultPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn default_items(system_info: &SystemInfo) -> Vec<TestItem> {
        if system_info.is_macos() {
            macos_items()
        } else {
            linux_items()
        }
    }
}

#[async_trait]
impl TestPlanner for DefaultPlanner {
    async fn generate_plan(&self, system_info: &SystemInfo) -> PlanResult<TestPlan> {
        let items = Self::default_items(system_info);
        Ok(TestPlan::new(
            plan_id(),
            format!("{} diagnostics", system_info.system),
            system_info.clone(),
            items,
        )
        .with_description("Built-in host diagnostics"))
    }

    fn planner_name(&self) -> &'static str {
        "default"
    }
}

fn item(
    id: &str,
    name: &str,
    description: &str,
    category: TestCategory,
    command: &str,
    timeout: i64,
    priority: i64,
) -> TestItem {
    TestItem::new(id, name, command)
        .with_description(description)
        .with_category(category)
        .with_timeout(timeout)
        .with_priority(priority)
}

#[rustfmt::skip]
fn macos_items() -> Vec<TestItem> {
    use TestCategory as C;
    vec![
        item("system_info_basic", "Basic system information", "Kernel and OS release", C::SystemInfo, "uname -a && sw_vers", 10, 5),
        item("cpu_info", "CPU information", "Processor model and core count", C::Hardware, "sysctl -n machdep.cpu.brand_string && sysctl -n hw.ncpu", 10, 4),
        item("memory_info", "Memory information", "Virtual memory statistics", C::Hardware, "vm_stat && top -l 1 | grep PhysMem", 10, 4),
        item("disk_usage", "Disk usage", "Free space per filesystem", C::Storage, "df -h", 10, 3),
        item("network_interfaces", "Network interfaces", "Interface configuration", C::Network, "ifconfig", 10, 3),
        item("security_gatekeeper", "Gatekeeper", "Gatekeeper assessment status", C::Security, "spctl --status", 10, 3)
            .with_dependencies(["spctl"]),
        item("firewall_status", "Firewall status", "Application firewall global state", C::Security, "/usr/libexec/ApplicationFirewall/socketfilterfw --getglobalstate", 10, 3),
        item("performance_load", "System load", "Load averages and CPU usage", C::Performance, "uptime && top -l 1 | grep 'CPU usage'", 10, 3),
        item("process_list", "Process list", "Top of the process table", C::Software, "ps aux | head -20", 10, 2),
        item("installed_apps", "Installed applications", "First entries in /Applications", C::Software, "ls /Applications | head -10", 15, 2),
    ]
}

#[rustfmt::skip]
fn linux_items() -> Vec<TestItem> {
    use TestCategory as C;
    vec![
        item("system_info_basic", "Basic system information", "Kernel and distribution release", C::SystemInfo, "uname -a && cat /etc/os-release", 10, 5),
        item("cpu_info", "CPU information", "Processor model and core count", C::Hardware, "grep -m1 'model name' /proc/cpuinfo; nproc", 10, 4)
            .with_dependencies(["nproc"]),
        item("memory_info", "Memory information", "Memory and swap usage", C::Hardware, "free -h", 10, 4)
            .with_dependencies(["free"]),
        item("disk_usage", "Disk usage", "Free space per filesystem", C::Storage, "df -h", 10, 3),
        item("network_interfaces", "Network interfaces", "Interface addresses", C::Network, "ip addr", 10, 3)
            .with_dependencies(["ip"]),
        item("listening_sockets", "Listening sockets", "Open TCP/UDP listeners", C::Security, "ss -tuln", 10, 3)
            .with_dependencies(["ss"]),
        item("performance_load", "System load", "Load averages", C::Performance, "uptime && cat /proc/loadavg", 10, 3),
        item("process_list", "Process list", "Top of the process table", C::Software, "ps aux | head -20", 10, 2),
    ]
}

fn plan_id() -> String {
    format!("plan_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Strip a surrounding markdown code fence, if any.
fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

/// Build a plan from a planner's JSON reply, filling gaps with defaults.
///
/// Items without an id become `test_<n>`; missing categories are custom;
/// missing timeouts take the configured default.
pub fn parse_plan_response(
    response: &str,
    system_info: &SystemInfo,
    config: &EngineConfig,
) -> PlanResult<TestPlan> {
    let data: Value = serde_json::from_str(strip_fences(response))?;
    let raw_items = match data.get("test_items") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => {
            return Err(PlanError::InvalidResponse {
                message: "'test_items' must be an array".to_string(),
            })
        }
        None => &[],
    };

    let mut items = Vec::with_capacity(raw_items.len());
    for raw in raw_items {
        let index = items.len();
        let mut item = TestItem::new(
            str_field(raw, "id").unwrap_or_else(|| format!("test_{}", index)),
            str_field(raw, "name").unwrap_or_default(),
            str_field(raw, "command").unwrap_or_default(),
        )
        .with_description(str_field(raw, "description").unwrap_or_default())
        .with_category(
            str_field(raw, "category")
                .map(TestCategory::from)
                .unwrap_or_default(),
        )
        .with_timeout(int_field(raw, "timeout").unwrap_or(config.default_timeout_secs))
        .with_priority(int_field(raw, "priority").unwrap_or(DEFAULT_PRIORITY));

        if let Some(expected) = str_field(raw, "expected_output") {
            item = item.with_expected_output(expected);
        }
        if let Some(Value::Array(deps)) = raw.get("dependencies") {
            item = item.with_dependencies(deps.iter().filter_map(Value::as_str));
        }
        if raw.get("enabled").and_then(Value::as_bool) == Some(false) {
            item = item.disabled();
        }
        items.push(item);
    }

    Ok(TestPlan::new(
        plan_id(),
        str_field(&data, "name").unwrap_or_else(|| DEFAULT_PLAN_NAME.to_string()),
        system_info.clone(),
        items,
    )
    .with_description(str_field(&data, "description").unwrap_or_default()))
}
