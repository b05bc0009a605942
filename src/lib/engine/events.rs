use std::collections::HashMap;
use std::sync::Arc;

use bollard::Docker;
use bollard::errors::Error as DockerError;
use bollard::models::{EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use super::types::{EngineResult, TaskEngineState};
use crate::lib::api::docker::{CONTAINER_NAME_LABEL, TASK_ARN_LABEL, port_bindings_from_docker};
use crate::lib::api::{ContainerStateChange, ContainerStatus, Observation, PortBinding};

pub type StateChangeSender = UnboundedSender<ContainerStateChange>;
pub type StateChangeReceiver = UnboundedReceiver<ContainerStateChange>;

/// Docker id and observation carried by a container event, if it is one the
/// agent tracks.
pub fn observation_from_event(event: &EventMessage) -> Option<(String, Observation)> {
    if event.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }
    let actor = event.actor.as_ref()?;
    let docker_id = actor.id.clone()?;
    let status = match event.action.as_deref()? {
        "create" => ContainerStatus::Created,
        "start" => ContainerStatus::Running,
        "die" | "stop" => ContainerStatus::Stopped,
        "destroy" => ContainerStatus::Dead,
        _ => return None,
    };
    let exit_code = actor
        .attributes
        .as_ref()
        .and_then(|attributes| attributes.get("exitCode"))
        .and_then(|code| code.parse::<i32>().ok());

    Some((
        docker_id,
        Observation {
            status,
            exit_code,
            port_bindings: None,
        },
    ))
}

/// Task arn, container name and Docker name of a container created from a
/// config the agent rendered, read from the labels echoed in its events.
pub fn labelled_container(event: &EventMessage) -> Option<(String, String, String)> {
    let actor = event.actor.as_ref()?;
    let attributes = actor.attributes.as_ref()?;
    let task_arn = attributes.get(TASK_ARN_LABEL)?;
    let container_name = attributes.get(CONTAINER_NAME_LABEL)?;
    let docker_name = attributes
        .get("name")
        .or(actor.id.as_ref())?
        .trim_start_matches('/');
    Some((
        task_arn.clone(),
        container_name.clone(),
        docker_name.to_string(),
    ))
}

// Containers the agent has not seen yet are bound from their labels before
// the event is applied.
fn bind_from_labels(state: &TaskEngineState, docker_id: &str, event: &EventMessage) {
    if state.container_by_id(docker_id).is_some() {
        return;
    }
    let Some((task_arn, container_name, docker_name)) = labelled_container(event) else {
        return;
    };
    match state.add_container(&task_arn, &container_name, docker_id, docker_name) {
        Ok(binding) => info!(
            task = %task_arn,
            container = %container_name,
            docker_id = %docker_id,
            docker_name = %binding.docker_name,
            "Bound runtime container from labels"
        ),
        Err(e) => debug!(docker_id = %docker_id, error = %e, "Labelled container not bound"),
    }
}

/// Container events from the Docker daemon.
pub fn docker_events(
    docker: &Docker,
) -> impl Stream<Item = Result<EventMessage, DockerError>> + '_ {
    let filters = HashMap::from([("type".to_string(), vec!["container".to_string()])]);
    docker.events(Some(EventsOptions::<String> {
        filters,
        ..Default::default()
    }))
}

/// Ports Docker bound for a running container.
pub async fn inspect_port_bindings(
    docker: &Docker,
    docker_id: &str,
) -> EngineResult<Vec<PortBinding>> {
    let response = docker.inspect_container(docker_id, None).await?;
    Ok(response
        .network_settings
        .and_then(|settings| settings.ports)
        .map(|ports| port_bindings_from_docker(&ports))
        .unwrap_or_default())
}

/// Applies runtime events to the engine state and forwards every genuine
/// transition to `sink`. With a Docker client, start events are enriched
/// with the bound ports. Returns when the stream ends or the sink closes.
pub async fn listen_for_events<S>(
    events: S,
    docker: Option<&Docker>,
    state: Arc<TaskEngineState>,
    sink: StateChangeSender,
) where
    S: Stream<Item = Result<EventMessage, DockerError>>,
{
    let mut events = std::pin::pin!(events);
    while let Some(message) = events.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Error reading runtime event stream");
                continue;
            }
        };
        let Some((docker_id, mut observation)) = observation_from_event(&message) else {
            continue;
        };
        bind_from_labels(&state, &docker_id, &message);

        if observation.status == ContainerStatus::Running {
            if let Some(docker) = docker {
                match inspect_port_bindings(docker, &docker_id).await {
                    Ok(bindings) => observation.port_bindings = Some(bindings),
                    Err(e) => warn!(docker_id = %docker_id, error = %e, "Could not inspect port bindings"),
                }
            }
        }

        let Some(change) = state.apply_observation(&docker_id, observation, None) else {
            debug!(docker_id = %docker_id, action = ?message.action, "Event caused no state change");
            continue;
        };
        if sink.send(change).is_err() {
            warn!("State change receiver closed, no longer listening for events");
            return;
        }
    }
    info!("Runtime event stream ended");
}

/// Stand-in reporter: logs every state change and marks it as sent.
pub async fn report_state_changes(mut changes: StateChangeReceiver) {
    while let Some(change) = changes.recv().await {
        info!(
            task = %change.task_arn(),
            container = %change.container_name(),
            status = %change.status(),
            exit_code = ?change.exit_code(),
            task_status = %change.task_status(),
            "Container state change"
        );
        if let Some(container) = change.container() {
            container.set_sent_status(change.status());
        }
        if change.advances_task() {
            if let Some(task) = change.task() {
                task.set_sent_status(change.task_status());
            }
        }
    }
}
