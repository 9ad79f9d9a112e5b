//! Normalization engine for Grok's line-delimited JSON event stream.
//!
//! Upstream bytes go in, OpenAI-compatible output comes out: Chat
//! Completions SSE chunks or aggregate `chat.completion` objects for text
//! and video, and OpenAI Images streaming events for image generation.
//! The processors in [`processor`] are the entry points; [`stream`] holds
//! the line splitter, idle guard, tag filter and replay detector they are
//! built from.

pub mod assets;
pub mod config;
pub mod error;
pub mod observability;
pub mod processor;
pub mod protocol;
pub mod stream;

mod util;
