pub mod anthropic;
pub mod context;
pub mod echo;
pub mod provider;
pub mod template;

pub use anthropic::AnthropicProvider;
pub use context::ContextBudget;
pub use echo::EchoProvider;
pub use provider::{GenerateReply, ProviderError, ProviderReply};
pub use template::{AgentRegistry, AgentTemplate};
