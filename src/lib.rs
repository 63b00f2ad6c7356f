//! ragchat - a streaming chat client for the docs assistant backend.
//!
//! The core is the incremental streaming-message assembler: an SSE-shaped
//! byte stream is decoded into frames ([`sse`]), parsed into typed events,
//! and folded into the conversation state ([`transcript`]) by the session
//! controller ([`controller`]). REST collaborators for stored conversations
//! live in [`api`].

pub mod adapters;
pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod sse;
pub mod traits;
pub mod transcript;
