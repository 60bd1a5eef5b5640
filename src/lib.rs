// Library exports for the binary and integration tests

pub mod archive;
pub mod classifier;
pub mod context;
pub mod error;
pub mod glacier;
pub mod inspect;
pub mod logging;
pub mod path_generator;
pub mod pool;
pub mod pruner;
pub mod recover;
pub mod reorganize;
pub mod resolver;
pub mod retry;
pub mod settings;
pub mod store;
