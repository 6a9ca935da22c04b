pub mod analysis;
pub mod config;
pub mod dependency;
pub mod engine;
pub mod executor;
pub mod planner;
pub mod progress;
pub mod runner;
pub mod safety;

pub use analysis::{
    analyze_execution, AnalysisError, AnalysisResult, ResultAnalyzer, StatusAnalyzer,
};
pub use config::{ConfigError, ConfigResult, EngineConfig};
pub use dependency::DependencyChecker;
pub use engine::{new_execution_id, schedule, EngineError, EngineResult, TestEngine};
pub use executor::TestItemExecutor;
pub use planner::{parse_plan_response, DefaultPlanner, PlanError, PlanResult, TestPlanner};
pub use progress::{
    CurrentItem, ProgressError, ProgressResult, ProgressStore, RunProgress, RunState,
};
pub use runner::{CommandOutcome, CommandRunner};
pub use safety::{validate, RejectedItem, SafetyValidator, SafetyVerdict};
