pub mod loop_;
pub mod messages;
pub mod streaming;
pub mod tools;

pub use loop_::{AgentLoop, MAX_TOOL_ITERATIONS};
pub use messages::{AgentMessage, AgentResponse, Citation, ToolCall};
pub use streaming::AgentStreamEvent;
pub use tools::ToolContext;
