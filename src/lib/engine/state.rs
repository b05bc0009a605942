use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use bollard::container::Config;
use bollard::models::HostConfig;
use tracing::{debug, info, warn};

use super::types::{EngineError, EngineIndex, EngineResult, TaskEngineState};
use crate::lib::api::docker::{docker_config, task_labels};
use crate::lib::api::{
    CascadePolicy, Container, ContainerStateChange, ContainerStatus, DockerContainer,
    Observation, Task, TaskStatus,
};

impl TaskEngineState {
    pub fn new(cascade_policy: CascadePolicy) -> Self {
        TaskEngineState {
            index: Default::default(),
            cascade_policy,
        }
    }

    // The registry lock is only ever held to copy Arcs and bindings in or
    // out, never while a task or container lock is taken.
    fn read(&self) -> RwLockReadGuard<'_, EngineIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_task(&self, task: Task) -> EngineResult<Arc<Task>> {
        let mut index = self.write();
        if index.tasks.contains_key(&task.arn) {
            return Err(EngineError::DuplicateTask(task.arn));
        }
        let task = Arc::new(task);
        index.tasks.insert(task.arn.clone(), task.clone());
        info!(task = %task.arn, containers = task.containers().len(), "Tracking task");
        Ok(task)
    }

    pub fn task_by_arn(&self, arn: &str) -> Option<Arc<Task>> {
        self.read().tasks.get(arn).cloned()
    }

    pub fn all_tasks(&self) -> Vec<Arc<Task>> {
        let mut tasks: Vec<Arc<Task>> = self.read().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.arn.cmp(&b.arn));
        tasks
    }

    pub fn task_count(&self) -> usize {
        self.read().tasks.len()
    }

    /// Binds a runtime container to a container of a tracked task. A new
    /// binding for the same task container replaces the previous one.
    pub fn add_container(
        &self,
        task_arn: &str,
        container_name: &str,
        docker_id: impl Into<String>,
        docker_name: impl Into<String>,
    ) -> EngineResult<DockerContainer> {
        let task = self
            .task_by_arn(task_arn)
            .ok_or_else(|| EngineError::TaskNotFound(task_arn.to_string()))?;
        let container =
            task.container_by_name(container_name)
                .ok_or_else(|| EngineError::ContainerNotFound {
                    task_arn: task_arn.to_string(),
                    container: container_name.to_string(),
                })?;
        let binding = DockerContainer::new(docker_id, docker_name, &container);
        self.insert_binding(&task, container_name, binding.clone())?;
        Ok(binding)
    }

    // The task may have been removed (or replaced under the same arn) since
    // it was looked up, so it is checked again under the write lock.
    fn insert_binding(
        &self,
        task: &Arc<Task>,
        container_name: &str,
        binding: DockerContainer,
    ) -> EngineResult<()> {
        let task_arn = task.arn.as_str();
        let mut index = self.write();
        if !index
            .tasks
            .get(task_arn)
            .is_some_and(|tracked| Arc::ptr_eq(tracked, task))
        {
            return Err(EngineError::TaskNotFound(task_arn.to_string()));
        }
        let key = (task_arn.to_string(), container_name.to_string());
        if let Some(previous) = index.name_to_id.insert(key, binding.docker_id.clone()) {
            if previous != binding.docker_id {
                debug!(task = %task_arn, container = %container_name, previous = %previous, "Replacing runtime container binding");
                index.id_to_container.remove(&previous);
                index.id_to_task.remove(&previous);
            }
        }
        index
            .id_to_container
            .insert(binding.docker_id.clone(), binding.clone());
        index
            .id_to_task
            .insert(binding.docker_id, task_arn.to_string());
        Ok(())
    }

    pub fn container_by_id(&self, docker_id: &str) -> Option<DockerContainer> {
        self.read().id_to_container.get(docker_id).cloned()
    }

    pub fn task_by_id(&self, docker_id: &str) -> Option<Arc<Task>> {
        let index = self.read();
        let arn = index.id_to_task.get(docker_id)?;
        index.tasks.get(arn).cloned()
    }

    /// Runtime bindings of a task, keyed by container name.
    pub fn container_map_by_arn(&self, task_arn: &str) -> HashMap<String, DockerContainer> {
        let index = self.read();
        index
            .name_to_id
            .iter()
            .filter(|((arn, _), _)| arn == task_arn)
            .filter_map(|((_, name), id)| {
                index
                    .id_to_container
                    .get(id)
                    .map(|binding| (name.clone(), binding.clone()))
            })
            .collect()
    }

    pub fn docker_name_for(&self, task_arn: &str, container_name: &str) -> Option<String> {
        let index = self.read();
        let id = index
            .name_to_id
            .get(&(task_arn.to_string(), container_name.to_string()))?;
        index
            .id_to_container
            .get(id)
            .map(|binding| binding.docker_name.clone())
    }

    pub fn remove_task(&self, task_arn: &str) -> Option<Arc<Task>> {
        let mut index = self.write();
        let task = index.tasks.remove(task_arn)?;
        let ids: Vec<String> = index
            .id_to_task
            .iter()
            .filter(|(_, arn)| arn.as_str() == task_arn)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            index.id_to_task.remove(id);
            index.id_to_container.remove(id);
        }
        index.name_to_id.retain(|(arn, _), _| arn != task_arn);
        info!(task = %task_arn, containers = ids.len(), "Stopped tracking task");
        Some(task)
    }

    /// Requests the task and all of its containers to stop.
    pub fn stop_task(&self, task_arn: &str) -> EngineResult<Arc<Task>> {
        let task = self
            .task_by_arn(task_arn)
            .ok_or_else(|| EngineError::TaskNotFound(task_arn.to_string()))?;
        task.set_desired_status(TaskStatus::Stopped);
        for container in task.containers() {
            container.set_desired_status(ContainerStatus::Stopped);
        }
        info!(task = %task_arn, "Task desired status set to STOPPED");
        Ok(task)
    }

    /// Applies a runtime observation to the container bound to `docker_id`
    /// and recomputes its task status. Returns the event to report, or
    /// `None` when the id is unknown or the observation was stale.
    pub fn apply_observation(
        &self,
        docker_id: &str,
        observation: Observation,
        reason: Option<&str>,
    ) -> Option<ContainerStateChange> {
        let (binding, task) = {
            let index = self.read();
            let binding = index.id_to_container.get(docker_id)?.clone();
            let task = index
                .id_to_task
                .get(docker_id)
                .and_then(|arn| index.tasks.get(arn))
                .cloned()?;
            (binding, task)
        };
        let Some(container) = binding.container() else {
            warn!(docker_id = %docker_id, "Runtime binding outlived its container");
            return None;
        };

        let update = container.observe(observation);
        let transition = update.transition()?;
        let task_update = task.update_status();
        let change =
            ContainerStateChange::new(&task, &container, transition, task_update, reason);

        if transition.essential_failure {
            task.cascade_essential_failure(self.cascade_policy);
        }
        Some(change)
    }

    /// Create-container configuration for a container of `task`, with links
    /// and volumes-from resolved to the Docker names of its siblings.
    pub fn docker_config(&self, task: &Task, container: &Container) -> EngineResult<Config<String>> {
        let resolve = |reference: &str| -> EngineResult<String> {
            let unresolved = || EngineError::UnresolvedReference {
                container: container.name.clone(),
                reference: reference.to_string(),
            };
            task.container_by_name(reference).ok_or_else(unresolved)?;
            self.docker_name_for(&task.arn, reference)
                .ok_or_else(unresolved)
        };

        let mut links = Vec::with_capacity(container.links.len());
        for link in &container.links {
            let (name, alias) = link.split_once(':').unwrap_or((link.as_str(), link.as_str()));
            links.push(format!("{}:{}", resolve(name)?, alias));
        }

        let mut volumes_from = Vec::with_capacity(container.volumes_from.len());
        for volume in &container.volumes_from {
            let docker_name = resolve(&volume.source_container)?;
            volumes_from.push(if volume.read_only {
                format!("{}:ro", docker_name)
            } else {
                docker_name
            });
        }

        let host_config = HostConfig {
            links: (!links.is_empty()).then_some(links),
            volumes_from: (!volumes_from.is_empty()).then_some(volumes_from),
            ..Default::default()
        };
        let mut config = docker_config(container, host_config);
        config.labels = Some(task_labels(&task.arn, &container.name));
        Ok(config)
    }
}
