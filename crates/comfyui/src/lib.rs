//! ComfyUI process and REST client library.
//!
//! Launches a local ComfyUI server as a child process, wraps the two
//! HTTP endpoints the entrypoint needs (`/queue` and `/prompt`), and
//! provides the fixed-interval polling used to wait for readiness and
//! for job completion.

pub mod api;
pub mod launcher;
pub mod poll;
