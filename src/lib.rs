//! Parlor is a persona-driven streaming chat client for Gemini and
//! OpenAI-compatible APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the chat session, vendor transports, retry handling,
//!   personas, provider resolution and configuration.
//! - [`backend`] talks to the hosted table API that stores conversations,
//!   chatbot profiles and knowledge documents.
//! - [`rag`] chunks and embeds knowledge documents and attaches matching
//!   excerpts to outgoing questions.
//! - [`api`] defines the wire payloads for both vendors.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod backend;
pub mod cli;
pub mod core;
pub mod rag;
pub mod utils;
