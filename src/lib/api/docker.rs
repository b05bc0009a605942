use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bollard::container::Config;
use bollard::models::{HostConfig, PortBinding as DockerPortBinding, PortMap};

use super::types::{Container, DockerContainer, PortBinding, Task};

// Docker rejects a cpu share count below 2.
const MIN_CPU_SHARES: i64 = 2;

/// Labels stamped on every container the agent renders a config for, so
/// runtime events can be traced back to the task container.
pub const TASK_ARN_LABEL: &str = "com.amazonaws.ecs.task-arn";
pub const CONTAINER_NAME_LABEL: &str = "com.amazonaws.ecs.container-name";

pub fn task_labels(task_arn: &str, container_name: &str) -> HashMap<String, String> {
    HashMap::from([
        (TASK_ARN_LABEL.to_string(), task_arn.to_string()),
        (CONTAINER_NAME_LABEL.to_string(), container_name.to_string()),
    ])
}

impl DockerContainer {
    pub fn new(
        docker_id: impl Into<String>,
        docker_name: impl Into<String>,
        container: &Arc<Container>,
    ) -> Self {
        DockerContainer {
            docker_id: docker_id.into(),
            docker_name: docker_name.into(),
            container: Arc::downgrade(container),
        }
    }

    pub fn container(&self) -> Option<Arc<Container>> {
        self.container.upgrade()
    }

    /// Name to create the container under: unique per start attempt and
    /// traceable back to the task definition.
    pub fn generate_name(task: &Task, container: &Container) -> String {
        let raw = format!(
            "ecs-{}-{}-{}-{}",
            task.family,
            task.version,
            container.name,
            uuid::Uuid::new_v4().simple()
        );
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

impl fmt::Display for DockerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.container() {
            Some(container) => write!(
                f,
                "Id: {}, Name: {}, Container: {}",
                self.docker_id, self.docker_name, container
            ),
            None => write!(
                f,
                "Id: {}, Name: {}, Container: nil",
                self.docker_id, self.docker_name
            ),
        }
    }
}

fn port_key(container_port: u16) -> String {
    format!("{}/tcp", container_port)
}

/// Declared ports in Docker's host-config form. A host port of 0 asks
/// Docker for a dynamic port.
pub fn port_map(ports: &[PortBinding]) -> PortMap {
    let mut map: PortMap = HashMap::new();
    for port in ports {
        let binding = DockerPortBinding {
            host_ip: (!port.bind_ip.is_empty()).then(|| port.bind_ip.clone()),
            host_port: Some(if port.host_port == 0 {
                String::new()
            } else {
                port.host_port.to_string()
            }),
        };
        map.entry(port_key(port.container_port))
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(binding);
    }
    map
}

/// Ports Docker actually bound, e.g. from an inspect response. Unbound or
/// unparsable entries are skipped.
pub fn port_bindings_from_docker(ports: &PortMap) -> Vec<PortBinding> {
    let mut bindings = Vec::new();
    for (key, host_bindings) in ports {
        let Some(container_port) = key
            .split('/')
            .next()
            .and_then(|port| port.parse::<u16>().ok())
        else {
            continue;
        };
        for binding in host_bindings.iter().flatten() {
            let Some(host_port) = binding
                .host_port
                .as_deref()
                .and_then(|port| port.parse::<u16>().ok())
            else {
                continue;
            };
            bindings.push(PortBinding {
                container_port,
                host_port,
                bind_ip: binding.host_ip.clone().unwrap_or_default(),
            });
        }
    }
    bindings.sort();
    bindings
}

/// Create-container configuration for `container`. Links and volumes-from
/// need sibling Docker names, so the caller resolves them into
/// `host_config`.
pub fn docker_config(container: &Container, mut host_config: HostConfig) -> Config<String> {
    let command = container
        .overrides
        .command
        .clone()
        .unwrap_or_else(|| container.command.clone());

    let mut env: Vec<String> = container
        .environment
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    env.sort();

    let exposed_ports: HashMap<String, HashMap<(), ()>> = container
        .ports
        .iter()
        .map(|port| (port_key(port.container_port), HashMap::new()))
        .collect();

    if container.memory > 0 {
        host_config.memory = Some(i64::from(container.memory) * 1024 * 1024);
    }
    host_config.cpu_shares = Some(i64::from(container.cpu).max(MIN_CPU_SHARES));
    if !container.ports.is_empty() {
        host_config.port_bindings = Some(port_map(&container.ports));
    }

    Config {
        image: Some(container.image.clone()),
        cmd: (!command.is_empty()).then_some(command),
        entrypoint: container.entry_point.clone(),
        env: (!env.is_empty()).then_some(env),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}
