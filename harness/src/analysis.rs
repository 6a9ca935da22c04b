//! Post-run analysis seam.
//!
//! Analyzers read a finished [`TestExecutionResult`] and may attach prose to
//! it. They never change statuses or counts; a failing analyzer only leaves
//! the summary empty.

use async_trait::async_trait;
use model::{TestExecutionResult, TestResult, TestStatus};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Analyzer unavailable: {message}")]
    Unavailable { message: String },

    #[error("Analysis failed: {message}")]
    Failed { message: String },
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[async_trait]
pub trait ResultAnalyzer: Send + Sync {
    async fn summarize_result(&self, result: &TestResult) -> AnalysisResult<String>;

    async fn summarize_execution(&self, execution: &TestExecutionResult)
        -> AnalysisResult<String>;

    fn analyzer_name(&self) -> &'static str;
}

/// Attach summaries to `execution`.
///
/// Only results with a non-empty raw log are summarized.
pub async fn analyze_execution(
    analyzer: &dyn ResultAnalyzer,
    mut execution: TestExecutionResult,
) -> TestExecutionResult {
    for result in execution.test_results.iter_mut() {
        if result.raw_log.is_empty() {
            continue;
        }
        match analyzer.summarize_result(result).await {
            Ok(summary) => result.analyzed_summary = Some(summary),
            Err(e) => warn!(
                "{} could not summarize {}: {}",
                analyzer.analyzer_name(),
                result.test_item_id,
                e
            ),
        }
    }

    match analyzer.summarize_execution(&execution).await {
        Ok(summary) => execution.overall_summary = Some(summary),
        Err(e) => warn!(
            "{} could not summarize execution {}: {}",
            analyzer.analyzer_name(),
            execution.execution_id,
            e
        ),
    }

    execution
}

/// Deterministic summaries built from the records alone.
#[derive(Debug, Clone, Default)]
pub struct StatusAnalyzer;

impl StatusAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResultAnalyzer for StatusAnalyzer {
    async fn summarize_result(&self, result: &TestResult) -> AnalysisResult<String> {
        let summary = match result.status {
            TestStatus::Completed => format!(
                "{} completed in {:.2}s ({} lines of output)",
                result.test_item_name,
                result.duration,
                result.output.lines().count()
            ),
            TestStatus::Failed => format!(
                "{} failed with exit code {}: {}",
                result.test_item_name,
                result
                    .exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                result
                    .error
                    .as_deref()
                    .and_then(|e| e.lines().find(|line| !line.trim().is_empty()))
                    .unwrap_or("no error output")
            ),
            TestStatus::Skipped => format!(
                "{} was skipped: {}",
                result.test_item_name,
                result.error.as_deref().unwrap_or("no reason given")
            ),
            TestStatus::Pending | TestStatus::Running => {
                return Err(AnalysisError::Failed {
                    message: format!("{} has not finished", result.test_item_id),
                })
            }
        };
        Ok(summary)
    }

    async fn summarize_execution(
        &self,
        execution: &TestExecutionResult,
    ) -> AnalysisResult<String> {
        Ok(format!(
            "{} tests on {} ({}): {} passed, {} failed, {} skipped in {:.2}s ({:.0}% pass rate)",
            execution.total_tests,
            execution.system_info.hostname,
            execution.system_info.system,
            execution.passed_tests,
            execution.failed_tests,
            execution.skipped_tests,
            execution.execution_time,
            execution.pass_rate() * 100.0
        ))
    }

    fn analyzer_name(&self) -> &'static str {
        "status"
    }
}
