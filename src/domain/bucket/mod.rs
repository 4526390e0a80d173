//! Bucket domain - named chains run in sequence over one context

mod orchestrator;

pub use orchestrator::{BucketChain, Recovery};
