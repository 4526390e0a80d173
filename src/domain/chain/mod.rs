//! Chain domain - link registration, continuation handles and execution

mod branch;
mod context;
mod continuation;
mod entity;
mod error;
mod executor;
mod link;

pub use branch::Predicate;
pub use context::ExecutionContext;
pub use continuation::{Next, Proceed};
pub use entity::Chain;
pub use error::{ChainError, LinkType, RegistrationError};
pub use executor::RunFuture;
pub use link::{ChainLink, Invocation, Link, LinkEntry, LinkHandler, LinkKind, RunArgs};
