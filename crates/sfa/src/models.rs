//! These models represent the conversation passed between an agent and its LLM
//!
//! Each provider speaks its own wire format (openai chat completions, anthropic messages,
//! gemini generateContent). We convert those into the internal structs immediately using
//! the helpers in each provider, so the agents only ever deal with these types.
pub mod message;
pub mod role;
pub mod tool;
