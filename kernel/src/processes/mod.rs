pub mod context;
pub mod process;

pub use context::{assert_can_sleep, CpuState, ExecutionContext, ThreadId};
pub use process::{Process, ProcessState};
