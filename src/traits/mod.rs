//! Trait abstractions for dependency injection and testability.

pub mod http;

pub use http::{ByteStream, Headers, HttpClient, HttpError, Response};
