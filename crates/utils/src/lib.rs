//! Small, dependency-light helpers shared by the pool engine and its
//! provider adapters: free-port discovery, instance naming, epoch-millisecond
//! timestamps and environment-variable config overrides.

pub mod clock;
pub mod env;
pub mod freeport;
pub mod naming;
