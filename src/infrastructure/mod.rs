//! Infrastructure layer - process-wide concerns outside the chain engine

pub mod logging;
