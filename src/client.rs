//! The resilient executor and the types it speaks.
//!
//! Keep the public surface small and predictable.
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod config;
pub mod descriptor;
pub mod envelope;
pub mod executor;
pub mod signals;

pub use builder::HttpExecutorBuilder;
pub use config::ExecutorConfig;
pub use descriptor::{CachePolicy, CallOptions, RequestDescriptor, RequestDescriptorBuilder};
pub use envelope::ResponseEnvelope;
pub use executor::HttpExecutor;
pub use signals::ExecutorSignals;
