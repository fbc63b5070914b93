//! Backend adapters for `pool-core`: in-process threads, subprocesses,
//! local containers and cluster pods. Each module implements
//! `pool_core::Provider` for one backend; the pool engine itself knows
//! nothing about any of them.

pub mod command;
pub mod container;
pub mod pod;
pub mod process;
pub mod thread;

pub use container::{ContainerConfig, ContainerError, ContainerHandle, ContainerProvider};
pub use pod::{PodConfig, PodError, PodHandle, PodProvider};
// `pool_config_defaults` is re-exported via the module paths above
// (`container::pool_config_defaults`, `pod::pool_config_defaults`)
// rather than flattened here, since both share the name.
pub use process::{ProcessError, ProcessHandle, ProcessProvider};
pub use thread::{ThreadError, ThreadHandle, ThreadProvider, ThreadWorker};
