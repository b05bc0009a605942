//! Task and container state shared by every agent subsystem.
//!
//! Each `Container` guards its mutable status behind its own lock and each
//! `Task` keeps a separate lock for its name index. The two are never held
//! at the same time.

pub mod container;
pub mod docker;
pub mod event;
pub mod status;
pub mod task;
pub mod types;

pub use types::{
    ApplyingError, CascadePolicy, Container, ContainerStateChange, ContainerStatus,
    DockerContainer, KnownStatusUpdate, Observation, PortBinding, Resource, Task, TaskStatus,
};
