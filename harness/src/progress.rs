//! Live progress of plan runs, keyed by execution id.
//!
//! The engine writes; any number of observers poll [`ProgressStore::snapshot`].
//! Each run has its own entry, so concurrent runs sharing one store do not
//! see each other's items.

use chrono::{DateTime, Utc};
use model::{TestResult, TestStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Progress store lock poisoned")]
    Poisoned,

    #[error("Unknown execution: {execution_id}")]
    UnknownExecution { execution_id: String },

    #[error("Execution already registered: {execution_id}")]
    DuplicateExecution { execution_id: String },
}

pub type ProgressResult<T> = Result<T, ProgressError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Finished,
    Aborted,
}

/// The item currently being worked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentItem {
    pub test_item_id: String,
    pub test_item_name: String,
    pub status: TestStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub execution_id: String,
    pub test_plan_id: String,
    pub state: RunState,
    /// Enabled items in the run.
    pub total: usize,
    pub current: Option<CurrentItem>,
    pub results: Vec<TestResult>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl RunProgress {
    pub fn finished_count(&self) -> usize {
        self.results.len()
    }

    pub fn fraction_complete(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.results.len() as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressStore {
    runs: Arc<RwLock<HashMap<String, RunProgress>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, execution_id: &str, f: F) -> ProgressResult<()>
    where
        F: FnOnce(&mut RunProgress),
    {
        let mut runs = self.runs.write().map_err(|_| ProgressError::Poisoned)?;
        let run = runs
            .get_mut(execution_id)
            .ok_or_else(|| ProgressError::UnknownExecution {
                execution_id: execution_id.to_string(),
            })?;
        f(run);
        run.updated_at = Utc::now();
        Ok(())
    }

    pub fn begin(&self, execution_id: &str, test_plan_id: &str, total: usize) -> ProgressResult<()> {
        let mut runs = self.runs.write().map_err(|_| ProgressError::Poisoned)?;
        if runs.contains_key(execution_id) {
            return Err(ProgressError::DuplicateExecution {
                execution_id: execution_id.to_string(),
            });
        }
        runs.insert(
            execution_id.to_string(),
            RunProgress {
                execution_id: execution_id.to_string(),
                test_plan_id: test_plan_id.to_string(),
                state: RunState::Running,
                total,
                current: None,
                results: Vec::new(),
                updated_at: Utc::now(),
                error: None,
            },
        );
        debug!("Tracking progress for {} ({} items)", execution_id, total);
        Ok(())
    }

    pub fn item_started(
        &self,
        execution_id: &str,
        test_item_id: &str,
        test_item_name: &str,
    ) -> ProgressResult<()> {
        self.update(execution_id, |run| {
            run.current = Some(CurrentItem {
                test_item_id: test_item_id.to_string(),
                test_item_name: test_item_name.to_string(),
                status: TestStatus::Running,
            });
        })
    }

    pub fn item_finished(&self, execution_id: &str, result: &TestResult) -> ProgressResult<()> {
        self.update(execution_id, |run| {
            run.current = None;
            run.results.push(result.clone());
        })
    }

    pub fn finish(&self, execution_id: &str) -> ProgressResult<()> {
        self.update(execution_id, |run| {
            run.current = None;
            run.state = RunState::Finished;
        })
    }

    pub fn abort(&self, execution_id: &str, reason: &str) -> ProgressResult<()> {
        self.update(execution_id, |run| {
            run.current = None;
            run.state = RunState::Aborted;
            run.error = Some(reason.to_string());
        })
    }

    pub fn snapshot(&self, execution_id: &str) -> ProgressResult<Option<RunProgress>> {
        let runs = self.runs.read().map_err(|_| ProgressError::Poisoned)?;
        Ok(runs.get(execution_id).cloned())
    }

    /// Execution ids of runs still in progress.
    pub fn active_runs(&self) -> ProgressResult<Vec<String>> {
        let runs = self.runs.read().map_err(|_| ProgressError::Poisoned)?;
        let mut ids: Vec<String> = runs
            .values()
            .filter(|run| run.state == RunState::Running)
            .map(|run| run.execution_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Drop a finished or aborted run. Running entries stay put and yield
    /// `None`; the engine still owns them.
    pub fn remove(&self, execution_id: &str) -> ProgressResult<Option<RunProgress>> {
        let mut runs = self.runs.write().map_err(|_| ProgressError::Poisoned)?;
        match runs.get(execution_id) {
            Some(run) if run.state == RunState::Running => Ok(None),
            Some(_) => Ok(runs.remove(execution_id)),
            None => Ok(None),
        }
    }
}
