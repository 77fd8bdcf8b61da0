//! The agent orchestration core.
//!
//! A prompt runs as a loop of model calls and tool calls:
//!
//! 1. **Receive** a prompt, inline any context files, append it to the history
//! 2. **Send to the model** with the tool catalog
//! 3. **If tool calls**: dispatch each through the [`ToolScheduler`],
//!    append the results, loop back to step 2
//! 4. **If text only**: finish, after at most one follow-up iteration
//!
//! The loop also ends on a repeated tool call, on the iteration bound, on
//! a truncated model reply, or on cancellation.

pub mod loop_detector;
pub mod loop_runner;
pub mod scheduler;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use loop_detector::{DEFAULT_REPEAT_THRESHOLD, LoopDetector, fingerprint};
pub use loop_runner::{Agent, TurnOutcome};
pub use scheduler::{ApprovalGate, ToolScheduler};
pub use session::{DEFAULT_MAX_TURNS, Session};
pub use stream::StreamHandle;
