//! Plan orchestration.
//!
//! A run filters the plan to enabled items, orders them by descending
//! priority (stable, so plan order breaks ties), executes them one at a time
//! and aggregates the results. Items of one run never overlap.

use crate::config::EngineConfig;
use crate::executor::TestItemExecutor;
use crate::progress::{ProgressError, ProgressStore};
use chrono::{DateTime, Utc};
use model::{TestExecutionResult, TestItem, TestPlan};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Failures of the orchestration itself. Per-item failures are never
/// reported here; they are recorded in the item's result.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Test plan '{plan_id}' contains duplicate test item id '{item_id}'")]
    DuplicateTestItem { plan_id: String, item_id: String },

    #[error("Progress tracking failed: {0}")]
    Progress(#[from] ProgressError),
}

pub type EngineResult<T> = Result<T, EngineError>;

pub struct TestEngine {
    executor: TestItemExecutor,
    progress: Option<ProgressStore>,
}

impl TestEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            executor: TestItemExecutor::new(config),
            progress: None,
        }
    }

    pub fn with_executor(mut self, executor: TestItemExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Publish per-item progress into `store` while runs execute.
    pub fn with_progress(mut self, store: ProgressStore) -> Self {
        self.progress = Some(store);
        self
    }

    pub fn progress(&self) -> Option<&ProgressStore> {
        self.progress.as_ref()
    }

    /// Run every enabled item of `plan` and aggregate the outcome.
    ///
    /// Either every enabled item ends with a terminal status in the returned
    /// record, or an [`EngineError`] explains why no record exists.
    pub async fn execute(&self, plan: &TestPlan) -> EngineResult<TestExecutionResult> {
        let started_at = Utc::now();
        let execution_id = new_execution_id(started_at);
        info!(
            "Starting execution {} of plan {} ({} items)",
            execution_id,
            plan.id,
            plan.test_items.len()
        );

        match self.run(&execution_id, plan, started_at).await {
            Ok(execution) => Ok(execution),
            Err(e) => {
                error!("Execution {} failed: {}", execution_id, e);
                if let Some(store) = &self.progress {
                    let _ = store.abort(&execution_id, &e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        execution_id: &str,
        plan: &TestPlan,
        started_at: DateTime<Utc>,
    ) -> EngineResult<TestExecutionResult> {
        let scheduled = schedule(plan)?;

        if let Some(store) = &self.progress {
            store.begin(execution_id, &plan.id, scheduled.len())?;
        }

        let mut results = Vec::with_capacity(scheduled.len());
        for item in scheduled {
            self.publish(execution_id, |store| {
                store.item_started(execution_id, &item.id, &item.name)
            });

            let result = self.executor.execute(item).await;
            debug!(
                "{} finished as {} in {:.3}s",
                item.id, result.status, result.duration
            );

            self.publish(execution_id, |store| store.item_finished(execution_id, &result));
            results.push(result);
        }

        let execution =
            TestExecutionResult::from_results(execution_id, plan, results, started_at, Utc::now());

        self.publish(execution_id, |store| store.finish(execution_id));

        info!(
            "Execution {} done: {} total, {} passed, {} failed, {} skipped in {:.2}s",
            execution.execution_id,
            execution.total_tests,
            execution.passed_tests,
            execution.failed_tests,
            execution.skipped_tests,
            execution.execution_time
        );
        Ok(execution)
    }

    /// Progress after `begin` is best effort: a failed update is logged and
    /// the run carries on.
    fn publish<F>(&self, execution_id: &str, update: F)
    where
        F: FnOnce(&ProgressStore) -> Result<(), ProgressError>,
    {
        if let Some(store) = &self.progress {
            if let Err(e) = update(store) {
                warn!("Progress update for {} dropped: {}", execution_id, e);
            }
        }
    }
}

/// Enabled items of `plan` in execution order.
pub fn schedule(plan: &TestPlan) -> EngineResult<Vec<&TestItem>> {
    let mut seen = HashSet::new();
    for item in &plan.test_items {
        if !seen.insert(item.id.as_str()) {
            return Err(EngineError::DuplicateTestItem {
                plan_id: plan.id.clone(),
                item_id: item.id.clone(),
            });
        }
    }

    let mut items: Vec<&TestItem> = plan.enabled_items().collect();
    // sort_by is stable: equal priorities keep plan order.
    items.sort_by(|a, b| b.priority.cmp(&a.priority));
    Ok(items)
}

/// `exec_<YYYYmmdd_HHMMSS>_<8 hex>`; the suffix separates runs started in
/// the same second.
pub fn new_execution_id(started_at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("exec_{}_{}", started_at.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::SystemInfo;

    fn plan(items: Vec<TestItem>) -> TestPlan {
        TestPlan::new("plan", "Plan", SystemInfo::basic(), items)
    }

    #[test]
    fn test_schedule_orders_by_priority_descending() {
        let plan = plan(vec![
            TestItem::new("low", "Low", "true").with_priority(1),
            TestItem::new("high", "High", "true").with_priority(9),
            TestItem::new("mid", "Mid", "true").with_priority(5),
        ]);
        let ids: Vec<_> = schedule(&plan)
            .unwrap()
            .into_iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_schedule_is_stable_for_ties() {
        let plan = plan(vec![
            TestItem::new("a", "A", "true").with_priority(3),
            TestItem::new("b", "B", "true").with_priority(3),
            TestItem::new("c", "C", "true").with_priority(7),
            TestItem::new("d", "D", "true").with_priority(3),
        ]);
        let ids: Vec<_> = schedule(&plan)
            .unwrap()
            .into_iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_schedule_drops_disabled_items() {
        let plan = plan(vec![
            TestItem::new("on", "On", "true"),
            TestItem::new("off", "Off", "true").with_priority(10).disabled(),
        ]);
        let scheduled = schedule(&plan).unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, "on");
    }

    #[test]
    fn test_schedule_rejects_duplicate_ids() {
        let plan = plan(vec![
            TestItem::new("same", "One", "true"),
            TestItem::new("same", "Two", "true").disabled(),
        ]);
        let err = schedule(&plan).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTestItem { ref item_id, .. } if item_id == "same"));
    }

    #[test]
    fn test_execution_ids_are_unique_within_a_second() {
        let now = Utc::now();
        let a = new_execution_id(now);
        let b = new_execution_id(now);
        assert_ne!(a, b);
        assert!(a.starts_with("exec_"));
        assert_eq!(a.len(), "exec_20250101_120000_".len() + 8);
    }
}
