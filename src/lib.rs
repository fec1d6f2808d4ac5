//! Parley - LLM translation dispatch layer
//!
//! Fronts an OpenAI-compatible inference server (llama.cpp) with a priority
//! work queue, a response cache, a prompt guard that corrects tool-call
//! replies, and a streaming chat relay.

pub mod backend;
pub mod cache;
pub mod cleaner;
pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod normalize;
pub mod prompt;
pub mod queue;
pub mod server;
pub mod service;
