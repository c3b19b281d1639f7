//! The canonical conversation model passed around by the engine.
//!
//! There are several provider wire formats we need to interact with:
//! - Claude-style messages, where tool results ride in user-role messages
//! - OpenAI-style messages, where each tool result is its own tool-role message
//! - Gemini-style contents, where calls and results are typed parts
//!
//! These all overlap to varying degrees. Provider modules convert to and from
//! these wire shapes immediately at the boundary; everything inside the engine
//! speaks the structs defined here.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
