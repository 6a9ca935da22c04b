pub mod system;
pub mod types;

pub use system::SystemInfo;
pub use types::{
    TestCategory, TestExecutionResult, TestItem, TestPlan, TestResult, TestStatus,
    DEFAULT_PRIORITY, DEFAULT_TIMEOUT_SECS, INTERNAL_FAILURE_EXIT_CODE,
};

pub mod prelude {
    pub use crate::system::*;
    pub use crate::types::*;
}
