//! Domain layer - chains, links and the bucket orchestrator

pub mod bucket;
pub mod chain;

pub use bucket::{BucketChain, Recovery};
pub use chain::{
    Chain, ChainError, ChainLink, ExecutionContext, Invocation, Link, LinkEntry, LinkHandler,
    LinkKind, LinkType, Next, Predicate, Proceed, RegistrationError, RunArgs, RunFuture,
};
