//! kwatch kubehub: credential resolution, per-kind informers and watch orchestration

#![forbid(unsafe_code)]

pub mod client;
pub mod informer;
pub mod orchestrator;

pub use client::{create_client, resolve_api_resource, ClientError};
pub use informer::{handle_event, object_key, Informer, ObjectCache};
pub use orchestrator::{Orchestrator, Phase, RunError, UnitOutcome};
