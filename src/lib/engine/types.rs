use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bollard::container::Config;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lib::api::{CascadePolicy, DockerContainer, Resource, Task};

/// Registry of every task the agent tracks and every container the runtime
/// has created for them.
#[derive(Debug, Default)]
pub struct TaskEngineState {
    pub(crate) index: RwLock<EngineIndex>,
    pub(crate) cascade_policy: CascadePolicy,
}

#[derive(Debug, Default)]
pub(crate) struct EngineIndex {
    pub(crate) tasks: HashMap<String, Arc<Task>>,
    pub(crate) id_to_container: HashMap<String, DockerContainer>,
    pub(crate) id_to_task: HashMap<String, String>,
    pub(crate) name_to_id: HashMap<(String, String), String>,
}

pub struct AgentServer {
    pub state: Arc<TaskEngineState>,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub name: String,
    pub resources: Vec<Resource>,
    pub task_count: usize,
}

/// Binding of a runtime container, as posted by whatever launched it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerBinding {
    pub task_arn: String,
    pub container_name: String,
    pub docker_id: String,
    pub docker_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerQuery {
    pub task_arn: String,
    pub container_name: String,
}

/// Name and create-container configuration to launch a task container with.
#[derive(Debug, Serialize)]
pub struct RenderedContainer {
    pub name: String,
    pub config: Config<String>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    #[error("Task '{0}' is already tracked")]
    DuplicateTask(String),

    #[error("Container '{container}' not found in task '{task_arn}'")]
    ContainerNotFound { task_arn: String, container: String },

    #[error("Container '{container}' references '{reference}', which has no runtime container")]
    UnresolvedReference { container: String, reference: String },

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
