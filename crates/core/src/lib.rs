//! Job-level domain logic for the generation entrypoint.
//!
//! Resolves job parameters from the environment and applies them to the
//! static ComfyUI workflow document. Nothing here talks to the server.

pub mod params;
pub mod workflow;
