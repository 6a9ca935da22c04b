//! Runs a single test item end to end and turns whatever happens into a
//! terminal [`TestResult`].
//!
//! Order of checks: dependencies, then (when enforced) command safety, then
//! the command itself. A panic anywhere inside the attempt is caught here and
//! recorded as a failure, so callers only ever see a result.

use crate::config::EngineConfig;
use crate::dependency::DependencyChecker;
use crate::runner::CommandRunner;
use crate::safety::SafetyValidator;
use chrono::Utc;
use futures::FutureExt;
use model::{TestItem, TestResult};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

pub const DEPENDENCIES_NOT_MET: &str = "Dependencies not met";
pub const UNSAFE_COMMAND: &str = "Command rejected by safety policy";

#[derive(Debug, Clone)]
pub struct TestItemExecutor {
    dependencies: DependencyChecker,
    runner: CommandRunner,
    safety: Option<SafetyValidator>,
}

impl TestItemExecutor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dependencies: DependencyChecker::new(),
            runner: CommandRunner::new(config),
            safety: config.enforce_safety.then(SafetyValidator::new),
        }
    }

    pub fn with_dependency_checker(mut self, checker: DependencyChecker) -> Self {
        self.dependencies = checker;
        self
    }

    pub fn with_safety_validator(mut self, validator: Option<SafetyValidator>) -> Self {
        self.safety = validator;
        self
    }

    pub async fn execute(&self, item: &TestItem) -> TestResult {
        let start_time = Utc::now();

        match AssertUnwindSafe(self.attempt(item, start_time))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = format!(
                    "Internal error while executing test: {}",
                    panic_message(panic.as_ref())
                );
                warn!("{} ({})", message, item.id);
                TestResult::internal_failure(item, start_time, Utc::now(), message)
            }
        }
    }

    async fn attempt(&self, item: &TestItem, start_time: chrono::DateTime<Utc>) -> TestResult {
        if let Some(missing) = self.dependencies.first_missing(item).await {
            debug!("Skipping {}: dependency {} not found", item.id, missing);
            return TestResult::skipped(
                item,
                start_time,
                Utc::now(),
                DEPENDENCIES_NOT_MET,
                format!(
                    "Test skipped due to missing dependencies: {} not found",
                    missing
                ),
            );
        }

        if let Some(validator) = &self.safety {
            let verdict = validator.validate_item(item);
            if !verdict.valid {
                warn!("Skipping {}: {}", item.id, verdict.reason);
                return TestResult::skipped(
                    item,
                    start_time,
                    Utc::now(),
                    UNSAFE_COMMAND,
                    verdict.reason,
                );
            }
        }

        debug!("Running {} ({}s timeout): {}", item.id, item.timeout, item.command);
        let outcome = self.runner.run(&item.command, item.timeout).await;

        TestResult::finished(
            item,
            start_time,
            Utc::now(),
            outcome.output,
            outcome.error,
            outcome.exit_code,
            outcome.raw_log,
        )
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use model::{TestStatus, INTERNAL_FAILURE_EXIT_CODE};
    use std::time::Duration;

    fn executor() -> TestItemExecutor {
        TestItemExecutor::new(&EngineConfig::default().with_grace_period(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_zero_exit_completes() {
        let item = TestItem::new("ok", "Ok", "echo fine").with_timeout(5);
        let result = executor().execute(&item).await;

        assert_eq!(result.status, TestStatus::Completed);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "fine\n");
        assert_eq!(result.test_item_id, "ok");
        assert_eq!(result.test_item_name, "Ok");
        assert!(result.end_time >= result.start_time);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_code() {
        let item = TestItem::new("bad", "Bad", "exit 4").with_timeout(5);
        let result = executor().execute(&item).await;

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.exit_code, Some(4));
    }

    #[tokio::test]
    async fn test_missing_dependency_skips_without_running() {
        let marker = tempfile::TempDir::new().unwrap();
        let touched = marker.path().join("ran");
        let item = TestItem::new("dep", "Dep", format!("touch {}", touched.display()))
            .with_dependencies(["sysscope-no-such-binary-1f2e"]);

        let result = executor().execute(&item).await;

        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.output, DEPENDENCIES_NOT_MET);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("sysscope-no-such-binary-1f2e"));
        assert_eq!(result.exit_code, None);
        assert!(result.duration >= 0.0);
        assert!(!touched.exists());
    }

    #[tokio::test]
    async fn test_unsafe_command_is_skipped_when_enforced() {
        let item = TestItem::new("rm", "Rm", "rm -rf /tmp/sysscope-never-created");
        let result = executor().execute(&item).await;

        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.output, UNSAFE_COMMAND);
        assert!(result.error.unwrap().contains("rm -rf"));
    }

    #[tokio::test]
    async fn test_safety_can_be_disabled() {
        let config = EngineConfig::default().with_enforce_safety(false);
        let item = TestItem::new("fmt", "Fmt", "echo format").with_timeout(5);
        let result = TestItemExecutor::new(&config).execute(&item).await;

        assert_eq!(result.status, TestStatus::Completed);
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure() {
        let item = TestItem::new("slow", "Slow", "sleep 5").with_timeout(1);
        let result = executor().execute(&item).await;

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.exit_code, Some(INTERNAL_FAILURE_EXIT_CODE));
        assert!(result.duration >= 1.0 && result.duration < 6.0);
        assert_eq!(
            result.error.as_deref(),
            Some("Command timed out after 1 seconds")
        );
    }

    #[tokio::test]
    async fn test_duration_matches_timestamps() {
        let item = TestItem::new("t", "T", "true").with_timeout(5);
        let result = executor().execute(&item).await;
        assert_eq!(
            result.duration,
            model::types::seconds_between(result.start_time, result.end_time)
        );
    }

    #[tokio::test]
    async fn test_panic_during_attempt_becomes_failure() {
        let executor =
            executor().with_dependency_checker(DependencyChecker::new().panicking("resolver exploded"));
        let item = TestItem::new("boom", "Boom", "true").with_dependencies(["sh"]);

        let result = executor.execute(&item).await;

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.exit_code, Some(INTERNAL_FAILURE_EXIT_CODE));
        assert_eq!(
            result.error.as_deref(),
            Some("Internal error while executing test: resolver exploded")
        );
        assert_eq!(result.raw_log, "Internal error while executing test: resolver exploded");
        assert_eq!(result.test_item_id, "boom");
        assert_eq!(
            result.duration,
            model::types::seconds_between(result.start_time, result.end_time)
        );
    }

    #[tokio::test]
    async fn test_custom_dependency_search_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let executor = executor().with_dependency_checker(
            DependencyChecker::new().with_search_path(dir.path().as_os_str()),
        );
        let item = TestItem::new("dep", "Dep", "true").with_dependencies(["sh"]);

        let result = executor.execute(&item).await;

        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(
            result.error.as_deref(),
            Some("Test skipped due to missing dependencies: sh not found")
        );
    }

    #[tokio::test]
    async fn test_custom_safety_validator() {
        let strict = SafetyValidator::new().with_pattern("uptime");
        let item = TestItem::new("load", "Load", "uptime").with_timeout(5);
        let result = executor()
            .with_safety_validator(Some(strict))
            .execute(&item)
            .await;
        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.output, UNSAFE_COMMAND);

        let item = TestItem::new("say", "Say", "echo sudo").with_timeout(5);
        let result = executor().with_safety_validator(None).execute(&item).await;
        assert_eq!(result.status, TestStatus::Completed);
        assert_eq!(result.output, "sudo\n");
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");

        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
