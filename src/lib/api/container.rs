use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use super::types::{
    ApplyingError, Container, ContainerOverrides, ContainerState, ContainerStatus,
    KnownStatusUpdate, Observation, PortBinding, StatusTransition, VolumeFrom,
};

impl ApplyingError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        ApplyingError {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl Observation {
    pub fn status(status: ContainerStatus) -> Self {
        Observation {
            status,
            ..Default::default()
        }
    }

    pub fn exited(status: ContainerStatus, exit_code: Option<i32>) -> Self {
        Observation {
            status,
            exit_code,
            port_bindings: None,
        }
    }
}

impl KnownStatusUpdate {
    pub fn is_change(&self) -> bool {
        matches!(self, KnownStatusUpdate::Advanced(_))
    }

    pub fn transition(&self) -> Option<&StatusTransition> {
        match self {
            KnownStatusUpdate::Advanced(transition) => Some(transition),
            KnownStatusUpdate::Stale => None,
        }
    }

    pub fn essential_failure(&self) -> bool {
        self.transition().is_some_and(|t| t.essential_failure)
    }
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Container {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            cpu: 0,
            memory: 0,
            links: Vec::new(),
            volumes_from: Vec::new(),
            ports: Vec::new(),
            essential: false,
            entry_point: None,
            environment: HashMap::new(),
            overrides: ContainerOverrides::default(),
            status: Mutex::new(ContainerState::default()),
        }
    }

    // Every critical section leaves the record consistent, so a poisoned
    // lock still holds valid data.
    fn state(&self) -> MutexGuard<'_, ContainerState> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the mutable state, taken under the container lock.
    pub fn snapshot(&self) -> ContainerState {
        self.state().clone()
    }

    pub fn desired_status(&self) -> ContainerStatus {
        self.state().desired_status
    }

    pub fn known_status(&self) -> ContainerStatus {
        self.state().known_status
    }

    pub fn applied_status(&self) -> ContainerStatus {
        self.state().applied_status
    }

    pub fn sent_status(&self) -> ContainerStatus {
        self.state().sent_status
    }

    pub fn known_exit_code(&self) -> Option<i32> {
        self.state().known_exit_code
    }

    pub fn applying_error(&self) -> Option<ApplyingError> {
        self.state().applying_error.clone()
    }

    pub fn known_port_bindings(&self) -> Vec<PortBinding> {
        self.state().known_port_bindings.clone()
    }

    /// Known status and whether this container counts as a failed
    /// essential container, read in one critical section.
    pub(crate) fn known_status_and_failure(&self) -> (ContainerStatus, bool) {
        let state = self.state();
        (state.known_status, self.failed_essentially(&state))
    }

    fn failed_essentially(&self, state: &ContainerState) -> bool {
        self.essential
            && state.known_status.has_exited()
            && state.known_exit_code.is_some_and(|code| code != 0)
    }

    pub fn set_known_status(&self, status: ContainerStatus) -> KnownStatusUpdate {
        self.observe(Observation::status(status))
    }

    /// Records a runtime observation if it is newer than the known status.
    /// Exit code and port bindings are stored together with the status;
    /// a stale observation stores nothing.
    pub fn observe(&self, observation: Observation) -> KnownStatusUpdate {
        if observation.status == ContainerStatus::Zombie {
            warn!(container = %self.name, "Refusing to record virtual status ZOMBIE");
            return KnownStatusUpdate::Stale;
        }

        let mut state = self.state();
        if observation.status <= state.known_status {
            debug!(
                container = %self.name,
                known = %state.known_status,
                observed = %observation.status,
                "Dropping stale status update"
            );
            return KnownStatusUpdate::Stale;
        }

        let previous = state.known_status;
        state.known_status = observation.status;
        if let Some(code) = observation.exit_code {
            state.known_exit_code = Some(code);
        }
        if let Some(bindings) = observation.port_bindings {
            state.known_port_bindings = bindings;
        }
        if state.applied_status != ContainerStatus::None
            && state.known_status >= state.applied_status
        {
            state.applying_error = None;
        }

        debug!(
            container = %self.name,
            from = %previous,
            to = %state.known_status,
            "Container known status advanced"
        );

        KnownStatusUpdate::Advanced(StatusTransition {
            previous,
            current: state.known_status,
            exit_code: state.known_exit_code,
            port_bindings: state.known_port_bindings.clone(),
            essential_failure: self.failed_essentially(&state),
        })
    }

    /// Records the status the driver is now trying to reach. Returns false
    /// when it already was the applied status, so the driver can skip a
    /// duplicate attempt.
    pub fn set_applied_status(&self, status: ContainerStatus) -> bool {
        if status == ContainerStatus::Zombie {
            return false;
        }
        let mut state = self.state();
        if state.applied_status == status {
            return false;
        }
        state.applied_status = status;
        true
    }

    pub fn record_applying_error(&self, err: ApplyingError) {
        warn!(container = %self.name, error = %err, "Failed to apply container status");
        self.state().applying_error = Some(err);
    }

    pub fn set_desired_status(&self, status: ContainerStatus) -> bool {
        if status == ContainerStatus::Zombie {
            return false;
        }
        let mut state = self.state();
        if status <= state.desired_status {
            return false;
        }
        state.desired_status = status;
        true
    }

    /// Marks `status` as reported upstream. Refused when it is ahead of the
    /// known status or not newer than what was already sent.
    pub fn set_sent_status(&self, status: ContainerStatus) -> bool {
        let mut state = self.state();
        if status > state.known_status {
            warn!(
                container = %self.name,
                known = %state.known_status,
                sent = %status,
                "Refusing to mark a status sent before it is known"
            );
            return false;
        }
        if status <= state.sent_status {
            return false;
        }
        state.sent_status = status;
        true
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(f, "{}({}) - Status: {}", self.name, self.image, state.known_status)?;
        if let Some(code) = state.known_exit_code {
            write!(f, "; Exited {}", code)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerRecordRef<'a> {
    name: &'a str,
    image: &'a str,
    command: &'a [String],
    cpu: u32,
    memory: u32,
    links: &'a [String],
    volumes_from: &'a [VolumeFrom],
    #[serde(rename = "portMappings")]
    ports: &'a [PortBinding],
    essential: bool,
    entry_point: &'a Option<Vec<String>>,
    environment: &'a HashMap<String, String>,
    overrides: &'a ContainerOverrides,
    desired_status: ContainerStatus,
    known_status: ContainerStatus,
    sent_status: ContainerStatus,
    known_exit_code: Option<i32>,
    known_port_bindings: &'a [PortBinding],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerRecord {
    name: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    cpu: u32,
    #[serde(default)]
    memory: u32,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    volumes_from: Vec<VolumeFrom>,
    #[serde(default, rename = "portMappings")]
    ports: Vec<PortBinding>,
    #[serde(default)]
    essential: bool,
    #[serde(default)]
    entry_point: Option<Vec<String>>,
    #[serde(default)]
    environment: HashMap<String, String>,
    #[serde(default)]
    overrides: ContainerOverrides,
    #[serde(default)]
    desired_status: ContainerStatus,
    #[serde(default)]
    known_status: ContainerStatus,
    #[serde(default)]
    sent_status: ContainerStatus,
    #[serde(default)]
    known_exit_code: Option<i32>,
    #[serde(default)]
    known_port_bindings: Vec<PortBinding>,
}

impl Serialize for Container {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let state = self.snapshot();
        ContainerRecordRef {
            name: &self.name,
            image: &self.image,
            command: &self.command,
            cpu: self.cpu,
            memory: self.memory,
            links: &self.links,
            volumes_from: &self.volumes_from,
            ports: &self.ports,
            essential: self.essential,
            entry_point: &self.entry_point,
            environment: &self.environment,
            overrides: &self.overrides,
            desired_status: state.desired_status,
            known_status: state.known_status,
            sent_status: state.sent_status,
            known_exit_code: state.known_exit_code,
            known_port_bindings: &state.known_port_bindings,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Container {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let record = ContainerRecord::deserialize(deserializer)?;
        Ok(Container {
            name: record.name,
            image: record.image,
            command: record.command,
            cpu: record.cpu,
            memory: record.memory,
            links: record.links,
            volumes_from: record.volumes_from,
            ports: record.ports,
            essential: record.essential,
            entry_point: record.entry_point,
            environment: record.environment,
            overrides: record.overrides,
            status: Mutex::new(ContainerState {
                desired_status: record.desired_status,
                known_status: record.known_status,
                sent_status: record.sent_status.min(record.known_status),
                known_exit_code: record.known_exit_code,
                known_port_bindings: record.known_port_bindings,
                ..Default::default()
            }),
        })
    }
}
