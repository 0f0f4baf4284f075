// Agent Pool Module
//
// This module provides agent resource pooling:
// - Worker factory trait for constructing agents
// - Bounded, type-keyed pool with idle eviction

mod factory;
#[allow(clippy::module_inception)]
mod pool;


pub use factory::*;
pub use pool::*;
