mod backup;
mod core;
mod exec;
mod prepared;
mod tx;

pub use core::Connection;
pub use exec::CheckpointResult;
