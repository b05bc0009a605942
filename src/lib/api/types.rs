use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    None,
    Unknown,
    Pulled,
    Created,
    Running,
    Stopped,
    Dead,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    #[default]
    None,
    Unknown,
    Pulled,
    Created,
    Running,
    Stopped,
    Dead,
    /// Virtual maximum used as an upper bound in comparisons. Never stored
    /// on a container.
    #[serde(skip)]
    Zombie,
}

/// How an essential container's failure spreads to its siblings' desired
/// status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CascadePolicy {
    /// Leave sibling desired statuses alone.
    None,
    /// Stop the remaining essential containers.
    #[default]
    StopEssentialSiblings,
    /// Stop every container that has not exited yet.
    StopAll,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(default)]
    pub bind_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub double_value: f64,
    pub long_value: i64,
}

/// A volume which references another container of the same task as its
/// source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeFrom {
    pub source_container: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOverrides {
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOverrides {}

/// Last error the runtime driver hit while moving a container toward its
/// applied status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct ApplyingError {
    pub name: String,
    pub message: String,
}

/// Mutable part of a container, guarded by the container's own lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerState {
    pub desired_status: ContainerStatus,
    pub known_status: ContainerStatus,
    pub applied_status: ContainerStatus,
    pub sent_status: ContainerStatus,
    pub applying_error: Option<ApplyingError>,
    pub known_exit_code: Option<i32>,
    pub known_port_bindings: Vec<PortBinding>,
}

#[derive(Debug)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub cpu: u32,
    pub memory: u32,
    pub links: Vec<String>,
    pub volumes_from: Vec<VolumeFrom>,
    pub ports: Vec<PortBinding>,
    pub essential: bool,
    pub entry_point: Option<Vec<String>>,
    pub environment: HashMap<String, String>,
    pub overrides: ContainerOverrides,

    pub(crate) status: Mutex<ContainerState>,
}

/// What the runtime reported about a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub status: ContainerStatus,
    pub exit_code: Option<i32>,
    /// `None` keeps the bindings already known.
    pub port_bindings: Option<Vec<PortBinding>>,
}

/// Data copied out of a container's critical section when its known status
/// advanced.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub previous: ContainerStatus,
    pub current: ContainerStatus,
    pub exit_code: Option<i32>,
    pub port_bindings: Vec<PortBinding>,
    /// Essential container exited with a non-zero code; the owning task
    /// should be driven toward termination.
    pub essential_failure: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KnownStatusUpdate {
    /// Not newer than the known status; dropped.
    Stale,
    Advanced(StatusTransition),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskState {
    pub desired_status: TaskStatus,
    pub known_status: TaskStatus,
    pub known_time: Option<SystemTime>,
    pub sent_status: TaskStatus,
}

#[derive(Debug)]
pub struct Task {
    pub arn: String,
    pub overrides: TaskOverrides,
    pub family: String,
    pub version: String,

    pub(crate) containers: Vec<Arc<Container>>,
    pub(crate) status: Mutex<TaskState>,
    /// Lazily built name index over `containers`. Never held together with
    /// a container lock.
    pub(crate) containers_by_name: Mutex<Option<HashMap<String, Arc<Container>>>>,
}

/// Maps a container as the runtime knows it onto the container as the task
/// knows it.
#[derive(Debug, Clone)]
pub struct DockerContainer {
    pub docker_id: String,
    /// Needed for linking.
    pub docker_name: String,
    pub container: Weak<Container>,
}

/// Immutable record of one observed container transition, handed to the
/// upstream reporter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateChange {
    pub(crate) task_arn: String,
    pub(crate) container_name: String,
    pub(crate) status: ContainerStatus,
    pub(crate) reason: String,
    pub(crate) exit_code: Option<i32>,
    pub(crate) port_bindings: Vec<PortBinding>,
    /// `TaskStatus::None` if this does not result in a task state change.
    pub(crate) task_status: TaskStatus,

    #[serde(skip)]
    pub(crate) task: Weak<Task>,
    #[serde(skip)]
    pub(crate) container: Weak<Container>,
}
