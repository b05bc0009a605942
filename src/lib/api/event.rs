use std::fmt;
use std::sync::Arc;

use super::types::{
    Container, ContainerStateChange, ContainerStatus, PortBinding, StatusTransition, Task,
    TaskStatus,
};

impl ContainerStateChange {
    /// Builds the event for a genuine container transition.
    ///
    /// `task_update` is the result of `Task::update_status` for the same
    /// mutation; the task status is only carried when it advanced. Without a
    /// driver-supplied reason, exited containers get `"exited"`.
    pub fn new(
        task: &Arc<Task>,
        container: &Arc<Container>,
        transition: &StatusTransition,
        task_update: (bool, TaskStatus),
        reason: Option<&str>,
    ) -> Self {
        let exited = transition.current.has_exited();
        let reason = match reason {
            Some(reason) if !reason.is_empty() => reason.to_string(),
            _ if exited => "exited".to_string(),
            _ => String::new(),
        };
        let (task_changed, task_status) = task_update;

        ContainerStateChange {
            task_arn: task.arn.clone(),
            container_name: container.name.clone(),
            status: transition.current,
            reason,
            exit_code: if exited { transition.exit_code } else { None },
            port_bindings: transition.port_bindings.clone(),
            task_status: if task_changed {
                task_status
            } else {
                TaskStatus::None
            },
            task: Arc::downgrade(task),
            container: Arc::downgrade(container),
        }
    }

    pub fn task_arn(&self) -> &str {
        &self.task_arn
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn status(&self) -> ContainerStatus {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn port_bindings(&self) -> &[PortBinding] {
        &self.port_bindings
    }

    pub fn task_status(&self) -> TaskStatus {
        self.task_status
    }

    /// Whether this transition also completed a task-level transition.
    pub fn advances_task(&self) -> bool {
        self.task_status != TaskStatus::None
    }

    pub fn task(&self) -> Option<Arc<Task>> {
        self.task.upgrade()
    }

    pub fn container(&self) -> Option<Arc<Container>> {
        self.container.upgrade()
    }
}

impl fmt::Display for ContainerStateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.task_arn, self.container_name, self.status)?;
        if let Some(code) = self.exit_code {
            write!(f, ", Exit {}", code)?;
        }
        if !self.reason.is_empty() {
            write!(f, ", Reason {}", self.reason)?;
        }
        if self.advances_task() {
            write!(f, ", Task {}", self.task_status)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::api::types::Observation;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    fn fixture() -> (Arc<Task>, Arc<Container>) {
        let mut app = Container::new("app", "example/app");
        app.essential = true;
        let task = Arc::new(Task::new(
            "arn:task/1",
            "fam",
            "1",
            vec![app, Container::new("sidecar", "example/sidecar")],
        ));
        let app = task.container_by_name("app").unwrap();
        (task, app)
    }

    #[test]
    fn test_event_is_thread_safe() {
        assert_send_sync::<ContainerStateChange>();
    }

    #[test]
    fn test_running_event_has_no_exit_code_or_task_status() {
        let (task, app) = fixture();
        let update = app.observe(Observation {
            status: ContainerStatus::Running,
            exit_code: None,
            port_bindings: Some(vec![PortBinding {
                container_port: 80,
                host_port: 32768,
                bind_ip: "0.0.0.0".to_string(),
            }]),
        });
        let task_update = task.update_status();
        let event =
            ContainerStateChange::new(&task, &app, update.transition().unwrap(), task_update, None);

        assert_eq!(event.task_arn(), "arn:task/1");
        assert_eq!(event.container_name(), "app");
        assert_eq!(event.status(), ContainerStatus::Running);
        assert_eq!(event.reason(), "");
        assert_eq!(event.exit_code(), None);
        assert_eq!(event.port_bindings()[0].host_port, 32768);
        assert_eq!(event.task_status(), TaskStatus::None);
        assert!(!event.advances_task());
    }

    #[test]
    fn test_essential_exit_event_carries_task_status() {
        let (task, app) = fixture();
        task.container_by_name("sidecar")
            .unwrap()
            .set_known_status(ContainerStatus::Running);
        let update = app.observe(Observation::exited(ContainerStatus::Stopped, Some(1)));
        let event = ContainerStateChange::new(
            &task,
            &app,
            update.transition().unwrap(),
            task.update_status(),
            None,
        );

        assert_eq!(event.reason(), "exited");
        assert_eq!(event.exit_code(), Some(1));
        assert_eq!(event.task_status(), TaskStatus::Stopped);
        assert_eq!(
            event.to_string(),
            "arn:task/1 app -> STOPPED, Exit 1, Reason exited, Task STOPPED"
        );
    }

    #[test]
    fn test_driver_reason_wins() {
        let (task, app) = fixture();
        let update = app.observe(Observation::exited(ContainerStatus::Stopped, Some(137)));
        let event = ContainerStateChange::new(
            &task,
            &app,
            update.transition().unwrap(),
            (false, TaskStatus::Running),
            Some("OutOfMemoryError"),
        );
        assert_eq!(event.reason(), "OutOfMemoryError");
        assert_eq!(event.task_status(), TaskStatus::None);
    }

    #[test]
    fn test_event_is_a_snapshot() {
        let (task, app) = fixture();
        let update = app.set_known_status(ContainerStatus::Running);
        let event = ContainerStateChange::new(
            &task,
            &app,
            update.transition().unwrap(),
            (false, TaskStatus::None),
            None,
        );
        app.observe(Observation::exited(ContainerStatus::Stopped, Some(0)));

        assert_eq!(event.status(), ContainerStatus::Running);
        assert_eq!(event.exit_code(), None);
        assert!(Arc::ptr_eq(&event.container().unwrap(), &app));
        assert!(Arc::ptr_eq(&event.task().unwrap(), &task));
    }

    #[test]
    fn test_back_references_do_not_keep_task_alive() {
        let (task, app) = fixture();
        let update = app.set_known_status(ContainerStatus::Created);
        let event = ContainerStateChange::new(
            &task,
            &app,
            update.transition().unwrap(),
            (false, TaskStatus::None),
            None,
        );
        drop(app);
        drop(task);
        assert!(event.task().is_none());
        assert!(event.container().is_none());
        assert_eq!(event.container_name(), "app");
    }

    #[test]
    fn test_serialized_event_omits_back_references() {
        let (task, app) = fixture();
        let update = app.set_known_status(ContainerStatus::Pulled);
        let event = ContainerStateChange::new(
            &task,
            &app,
            update.transition().unwrap(),
            (false, TaskStatus::None),
            None,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["taskArn"], "arn:task/1");
        assert_eq!(json["status"], "PULLED");
        assert_eq!(json["taskStatus"], "NONE");
        assert!(json.get("task").is_none());
        assert!(json.get("container").is_none());
    }
}
