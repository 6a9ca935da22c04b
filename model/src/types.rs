use crate::system::SystemInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const DEFAULT_TIMEOUT_SECS: i64 = 30;
pub const DEFAULT_PRIORITY: i64 = 1;

/// Exit code recorded when no process exit status exists (timeout, spawn
/// failure, internal error).
pub const INTERNAL_FAILURE_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum TestCategory {
    SystemInfo,
    Performance,
    Security,
    Network,
    Storage,
    Software,
    Hardware,
    Custom,
}

impl TestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestCategory::SystemInfo => "system_info",
            TestCategory::Performance => "performance",
            TestCategory::Security => "security",
            TestCategory::Network => "network",
            TestCategory::Storage => "storage",
            TestCategory::Software => "software",
            TestCategory::Hardware => "hardware",
            TestCategory::Custom => "custom",
        }
    }
}

// Planners produce free-form categories; anything unknown is custom.
impl From<String> for TestCategory {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "system_info" => TestCategory::SystemInfo,
            "performance" => TestCategory::Performance,
            "security" => TestCategory::Security,
            "network" => TestCategory::Network,
            "storage" => TestCategory::Storage,
            "software" => TestCategory::Software,
            "hardware" => TestCategory::Hardware,
            _ => TestCategory::Custom,
        }
    }
}

impl Default for TestCategory {
    fn default() -> Self {
        Self::Custom
    }
}

impl fmt::Display for TestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single test item.
///
/// `Pending -> Running -> Completed | Failed`, or `Pending -> Skipped` when
/// the item is never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestStatus::Completed | TestStatus::Failed | TestStatus::Skipped
        )
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Pending => "pending",
            TestStatus::Running => "running",
            TestStatus::Completed => "completed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

fn default_enabled() -> bool {
    true
}

/// One diagnostic command plus the metadata the engine schedules it by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: TestCategory,
    /// Shell text, handed to the shell as a whole.
    pub command: String,
    /// Advisory only; never used to decide pass/fail.
    #[serde(default)]
    pub expected_output: Option<String>,
    /// Seconds. Zero or negative values time out immediately.
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher runs first.
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Executables that must resolve on the host search path.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TestItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: TestCategory::Custom,
            command: command.into(),
            expected_output: None,
            timeout: DEFAULT_TIMEOUT_SECS,
            enabled: true,
            priority: DEFAULT_PRIORITY,
            dependencies: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: TestCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_info: SystemInfo,
    pub test_items: Vec<TestItem>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub custom_config: Map<String, Value>,
}

impl TestPlan {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        system_info: SystemInfo,
        test_items: Vec<TestItem>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            system_info,
            test_items,
            created_at: Utc::now(),
            custom_config: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn enabled_items(&self) -> impl Iterator<Item = &TestItem> {
        self.test_items.iter().filter(|item| item.enabled)
    }
}

/// Seconds between two instants, signed, at nanosecond resolution.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let elapsed = end.signed_duration_since(start);
    match elapsed.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1_000_000_000.0,
        None => elapsed.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Outcome record for one executed test item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_item_id: String,
    pub test_item_name: String,
    pub status: TestStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Always `end_time - start_time`, in seconds.
    pub duration: f64,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Output followed by any stderr; this is what analyzers read.
    #[serde(default)]
    pub raw_log: String,
    #[serde(default)]
    pub analyzed_summary: Option<String>,
}

impl TestResult {
    fn base(
        item: &TestItem,
        status: TestStatus,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            test_item_id: item.id.clone(),
            test_item_name: item.name.clone(),
            status,
            start_time,
            end_time,
            duration: seconds_between(start_time, end_time),
            output: String::new(),
            error: None,
            exit_code: None,
            raw_log: String::new(),
            analyzed_summary: None,
        }
    }

    /// Result of a command that ran; status follows the exit code.
    pub fn finished(
        item: &TestItem,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        output: String,
        error: Option<String>,
        exit_code: i32,
        raw_log: String,
    ) -> Self {
        let status = if exit_code == 0 {
            TestStatus::Completed
        } else {
            TestStatus::Failed
        };
        Self {
            output,
            error,
            exit_code: Some(exit_code),
            raw_log,
            ..Self::base(item, status, start_time, end_time)
        }
    }

    pub fn skipped(
        item: &TestItem,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        output: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            output: output.into(),
            error: Some(reason.into()),
            ..Self::base(item, TestStatus::Skipped, start_time, end_time)
        }
    }

    /// A failure that happened around the command rather than inside it.
    pub fn internal_failure(
        item: &TestItem,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            error: Some(message.clone()),
            exit_code: Some(INTERNAL_FAILURE_EXIT_CODE),
            raw_log: message,
            ..Self::base(item, TestStatus::Failed, start_time, end_time)
        }
    }

    pub fn passed(&self) -> bool {
        self.status == TestStatus::Completed
    }
}

/// Aggregate record of one plan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub execution_id: String,
    pub test_plan_id: String,
    pub system_info: SystemInfo,
    /// In execution (priority) order.
    pub test_results: Vec<TestResult>,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    /// Wall-clock seconds for the whole run.
    pub execution_time: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub overall_summary: Option<String>,
}

impl TestExecutionResult {
    pub fn from_results(
        execution_id: impl Into<String>,
        plan: &TestPlan,
        test_results: Vec<TestResult>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let count = |status: TestStatus| {
            test_results
                .iter()
                .filter(|result| result.status == status)
                .count()
        };
        let passed_tests = count(TestStatus::Completed);
        let failed_tests = count(TestStatus::Failed);
        let skipped_tests = count(TestStatus::Skipped);

        Self {
            execution_id: execution_id.into(),
            test_plan_id: plan.id.clone(),
            system_info: plan.system_info.clone(),
            total_tests: test_results.len(),
            passed_tests,
            failed_tests,
            skipped_tests,
            test_results,
            execution_time: seconds_between(started_at, completed_at),
            started_at,
            completed_at,
            overall_summary: None,
        }
    }

    pub fn counts_consistent(&self) -> bool {
        self.total_tests == self.passed_tests + self.failed_tests + self.skipped_tests
            && self.total_tests == self.test_results.len()
    }

    /// Fraction of executed items that completed, 0.0 for an empty run.
    pub fn pass_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.passed_tests as f64 / self.total_tests as f64
        }
    }

    pub fn result(&self, test_item_id: &str) -> Option<&TestResult> {
        self.test_results
            .iter()
            .find(|result| result.test_item_id == test_item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot() -> SystemInfo {
        SystemInfo::basic()
    }

    #[test]
    fn test_category_known_and_unknown() {
        let category: TestCategory = serde_json::from_str("\"system_info\"").unwrap();
        assert_eq!(category, TestCategory::SystemInfo);

        let category: TestCategory = serde_json::from_str("\"Security\"").unwrap();
        assert_eq!(category, TestCategory::Security);

        let category: TestCategory = serde_json::from_str("\"kernel_tuning\"").unwrap();
        assert_eq!(category, TestCategory::Custom);

        assert_eq!(
            serde_json::to_string(&TestCategory::SystemInfo).unwrap(),
            "\"system_info\""
        );
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TestStatus::Completed).unwrap(),
            "\"completed\""
        );
        let status: TestStatus = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(status, TestStatus::Skipped);
        assert!(serde_json::from_str::<TestStatus>("\"passed\"").is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TestStatus::Pending.is_terminal());
        assert!(!TestStatus::Running.is_terminal());
        assert!(TestStatus::Completed.is_terminal());
        assert!(TestStatus::Failed.is_terminal());
        assert!(TestStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_item_defaults() {
        let item: TestItem =
            serde_json::from_str(r#"{"id": "a", "name": "A", "command": "true"}"#).unwrap();
        assert_eq!(item.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(item.priority, DEFAULT_PRIORITY);
        assert!(item.enabled);
        assert!(item.dependencies.is_empty());
        assert_eq!(item.category, TestCategory::Custom);
        assert!(item.expected_output.is_none());
    }

    #[test]
    fn test_item_negative_timeout_is_representable() {
        let item: TestItem = serde_json::from_str(
            r#"{"id": "a", "name": "A", "command": "true", "timeout": -3}"#,
        )
        .unwrap();
        assert_eq!(item.timeout, -3);
    }

    #[test]
    fn test_finished_result_status_follows_exit_code() {
        let item = TestItem::new("a", "A", "true");
        let start = Utc::now();
        let end = start + Duration::milliseconds(250);

        let ok = TestResult::finished(&item, start, end, "hi".into(), None, 0, "hi".into());
        assert_eq!(ok.status, TestStatus::Completed);
        assert_eq!(ok.exit_code, Some(0));
        assert!((ok.duration - 0.25).abs() < 1e-9);
        assert!(ok.passed());

        let bad = TestResult::finished(
            &item,
            start,
            end,
            String::new(),
            Some("boom".into()),
            2,
            String::new(),
        );
        assert_eq!(bad.status, TestStatus::Failed);
        assert_eq!(bad.exit_code, Some(2));
        assert!(!bad.passed());
    }

    #[test]
    fn test_internal_failure_result() {
        let item = TestItem::new("a", "A", "true");
        let now = Utc::now();
        let result = TestResult::internal_failure(&item, now, now, "exploded");
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.exit_code, Some(INTERNAL_FAILURE_EXIT_CODE));
        assert_eq!(result.error.as_deref(), Some("exploded"));
        assert_eq!(result.raw_log, "exploded");
        assert_eq!(result.duration, 0.0);
    }

    #[test]
    fn test_execution_counts() {
        let plan = TestPlan::new("plan", "Plan", snapshot(), vec![]);
        let start = Utc::now();
        let end = start + Duration::seconds(2);
        let a = TestItem::new("a", "A", "true");
        let b = TestItem::new("b", "B", "false");
        let c = TestItem::new("c", "C", "missing-tool");

        let results = vec![
            TestResult::finished(&a, start, end, String::new(), None, 0, String::new()),
            TestResult::finished(&b, start, end, String::new(), None, 1, String::new()),
            TestResult::skipped(&c, start, start, "Dependencies not met", "missing"),
        ];

        let execution = TestExecutionResult::from_results("exec", &plan, results, start, end);
        assert_eq!(execution.total_tests, 3);
        assert_eq!(execution.passed_tests, 1);
        assert_eq!(execution.failed_tests, 1);
        assert_eq!(execution.skipped_tests, 1);
        assert!(execution.counts_consistent());
        assert!((execution.execution_time - 2.0).abs() < 1e-9);
        assert!((execution.pass_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(execution.result("b").map(|r| r.status), Some(TestStatus::Failed));
    }

    #[test]
    fn test_empty_execution_pass_rate() {
        let plan = TestPlan::new("plan", "Plan", snapshot(), vec![]);
        let now = Utc::now();
        let execution = TestExecutionResult::from_results("exec", &plan, vec![], now, now);
        assert_eq!(execution.pass_rate(), 0.0);
        assert!(execution.counts_consistent());
    }
}
