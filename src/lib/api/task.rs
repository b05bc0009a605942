use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};

use super::types::{
    CascadePolicy, Container, ContainerStatus, Task, TaskOverrides, TaskState, TaskStatus,
};

impl fmt::Display for TaskOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{}")
    }
}

impl Task {
    pub fn new(
        arn: impl Into<String>,
        family: impl Into<String>,
        version: impl Into<String>,
        containers: Vec<Container>,
    ) -> Self {
        Task {
            arn: arn.into(),
            overrides: TaskOverrides::default(),
            family: family.into(),
            version: version.into(),
            containers: containers.into_iter().map(Arc::new).collect(),
            status: Mutex::new(TaskState::default()),
            containers_by_name: Mutex::new(None),
        }
    }

    pub fn containers(&self) -> &[Arc<Container>] {
        &self.containers
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TaskState {
        self.state().clone()
    }

    pub fn desired_status(&self) -> TaskStatus {
        self.state().desired_status
    }

    pub fn known_status(&self) -> TaskStatus {
        self.state().known_status
    }

    pub fn sent_status(&self) -> TaskStatus {
        self.state().sent_status
    }

    pub fn known_time(&self) -> Option<SystemTime> {
        self.state().known_time
    }

    /// Looks a container up by exact name. The index is built on first use
    /// from the owned containers; only container names are read, so no
    /// container lock is taken while the index lock is held.
    pub fn container_by_name(&self, name: &str) -> Option<Arc<Container>> {
        let mut index = self
            .containers_by_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        index
            .get_or_insert_with(|| {
                let mut by_name = HashMap::with_capacity(self.containers.len());
                for container in &self.containers {
                    by_name
                        .entry(container.name.clone())
                        .or_insert_with(|| container.clone());
                }
                by_name
            })
            .get(name)
            .cloned()
    }

    /// Recomputes the task known status from its containers.
    ///
    /// The task reaches a status once every container has reached it. An
    /// essential container that exited with a non-zero code forces the task
    /// to at least `Stopped` regardless of its siblings. The status never
    /// moves backwards; returns whether it advanced and the current value.
    pub fn update_status(&self) -> (bool, TaskStatus) {
        if self.containers.is_empty() {
            return (false, self.known_status());
        }

        // Containers are locked one at a time and released before the task
        // lock is taken.
        let mut floor = TaskStatus::Dead;
        let mut essential_failed = false;
        for container in &self.containers {
            let (known, failed) = container.known_status_and_failure();
            floor = floor.min(known.task_status().unwrap_or(TaskStatus::None));
            essential_failed |= failed;
        }

        let target = if essential_failed {
            floor.merge(TaskStatus::Stopped)
        } else {
            floor
        };

        let mut state = self.state();
        if target <= state.known_status {
            return (false, state.known_status);
        }
        if essential_failed {
            info!(task = %self.arn, status = %target, "Essential container failed, stopping task");
        } else {
            debug!(task = %self.arn, from = %state.known_status, to = %target, "Task known status advanced");
        }
        state.known_status = target;
        state.known_time = Some(SystemTime::now());
        (true, target)
    }

    pub fn set_desired_status(&self, status: TaskStatus) -> bool {
        let mut state = self.state();
        if status <= state.desired_status {
            return false;
        }
        state.desired_status = status;
        true
    }

    pub fn set_sent_status(&self, status: TaskStatus) -> bool {
        let mut state = self.state();
        if status > state.known_status {
            warn!(
                task = %self.arn,
                known = %state.known_status,
                sent = %status,
                "Refusing to mark a task status sent before it is known"
            );
            return false;
        }
        if status <= state.sent_status {
            return false;
        }
        state.sent_status = status;
        true
    }

    /// Raises the desired status of siblings selected by `policy` to
    /// `Stopped` once an essential container has failed. Returns the names
    /// whose desired status changed.
    pub fn cascade_essential_failure(&self, policy: CascadePolicy) -> Vec<String> {
        let failed: Vec<&Arc<Container>> = self
            .containers
            .iter()
            .filter(|c| c.known_status_and_failure().1)
            .collect();
        if failed.is_empty() || policy == CascadePolicy::None {
            return Vec::new();
        }

        let mut stopped = Vec::new();
        for container in &self.containers {
            if policy == CascadePolicy::StopEssentialSiblings && !container.essential {
                continue;
            }
            if container.known_status().has_exited() {
                continue;
            }
            if container.set_desired_status(ContainerStatus::Stopped) {
                stopped.push(container.name.clone());
            }
        }

        if !stopped.is_empty() {
            info!(
                task = %self.arn,
                failed = %failed.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(","),
                stopping = %stopped.join(","),
                "Cascading essential container failure"
            );
        }
        stopped
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        let names: Vec<&str> = self.containers.iter().map(|c| c.name.as_str()).collect();
        write!(
            f,
            "{}-{} {}, Overrides: {} Status: {}({}) Containers: {}",
            self.family,
            self.version,
            self.arn,
            self.overrides,
            state.known_status,
            state.desired_status,
            names.join(",")
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskRecordRef<'a> {
    arn: &'a str,
    family: &'a str,
    version: &'a str,
    containers: Vec<&'a Container>,
    desired_status: TaskStatus,
    known_status: TaskStatus,
    known_time: Option<SystemTime>,
    sent_status: TaskStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRecord {
    arn: String,
    #[serde(default)]
    family: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    desired_status: TaskStatus,
    #[serde(default)]
    known_time: Option<SystemTime>,
    #[serde(default)]
    sent_status: TaskStatus,
}

impl Serialize for Task {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let state = self.snapshot();
        TaskRecordRef {
            arn: &self.arn,
            family: &self.family,
            version: &self.version,
            containers: self.containers.iter().map(|c| c.as_ref()).collect(),
            desired_status: state.desired_status,
            known_status: state.known_status,
            known_time: state.known_time,
            sent_status: state.sent_status,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let record = TaskRecord::deserialize(deserializer)?;
        let task = Task::new(record.arn, record.family, record.version, record.containers);
        task.set_desired_status(record.desired_status);

        // The known status is recomputed from the containers; a recorded
        // value is never trusted.
        let (advanced, known) = task.update_status();
        {
            let mut state = task.state();
            if advanced && record.known_time.is_some() {
                state.known_time = record.known_time;
            }
            state.sent_status = record.sent_status.min(known);
        }
        Ok(task)
    }
}
