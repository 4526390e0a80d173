//! superchain
//!
//! Middleware-style chains of links executed one at a time against a shared
//! execution context:
//! - Callback, future and coroutine links behind one continuation handle
//! - Final links that run after the main sequence
//! - Conditional sub-chains gated by predicates
//! - Bucket orchestration with an error-recovery bucket

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use crate::config::AppConfig;
pub use domain::{
    BucketChain, Chain, ChainError, ExecutionContext, Link, LinkHandler, Next, Predicate,
    Recovery, RegistrationError,
};
