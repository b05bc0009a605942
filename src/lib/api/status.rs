use std::fmt;

use super::types::{ContainerStatus, TaskStatus};

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::None,
        TaskStatus::Unknown,
        TaskStatus::Pulled,
        TaskStatus::Created,
        TaskStatus::Running,
        TaskStatus::Stopped,
        TaskStatus::Dead,
    ];

    pub fn terminal(self) -> bool {
        self >= TaskStatus::Dead
    }

    /// Highest of two independently observed statuses.
    pub fn merge(self, other: TaskStatus) -> TaskStatus {
        self.max(other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::None => "NONE",
            TaskStatus::Unknown => "UNKNOWN",
            TaskStatus::Pulled => "PULLED",
            TaskStatus::Created => "CREATED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Stopped => "STOPPED",
            TaskStatus::Dead => "DEAD",
        }
    }
}

impl ContainerStatus {
    /// Every status a container can actually hold, in order. Excludes
    /// `Zombie`.
    pub const ALL: [ContainerStatus; 7] = [
        ContainerStatus::None,
        ContainerStatus::Unknown,
        ContainerStatus::Pulled,
        ContainerStatus::Created,
        ContainerStatus::Running,
        ContainerStatus::Stopped,
        ContainerStatus::Dead,
    ];

    pub fn terminal(self) -> bool {
        self >= ContainerStatus::Dead
    }

    /// The container process is gone: `Stopped` or `Dead`.
    pub fn has_exited(self) -> bool {
        matches!(self, ContainerStatus::Stopped | ContainerStatus::Dead)
    }

    /// Highest of two independently observed statuses. `Zombie` is only an
    /// upper bound, so it is treated as absent and never returned.
    pub fn merge(self, other: ContainerStatus) -> ContainerStatus {
        match (self, other) {
            (ContainerStatus::Zombie, ContainerStatus::Zombie) => ContainerStatus::None,
            (ContainerStatus::Zombie, s) | (s, ContainerStatus::Zombie) => s,
            (a, b) => a.max(b),
        }
    }

    /// The task-level status matching this container status.
    pub fn task_status(self) -> Option<TaskStatus> {
        match self {
            ContainerStatus::None => Some(TaskStatus::None),
            ContainerStatus::Unknown => Some(TaskStatus::Unknown),
            ContainerStatus::Pulled => Some(TaskStatus::Pulled),
            ContainerStatus::Created => Some(TaskStatus::Created),
            ContainerStatus::Running => Some(TaskStatus::Running),
            ContainerStatus::Stopped => Some(TaskStatus::Stopped),
            ContainerStatus::Dead => Some(TaskStatus::Dead),
            ContainerStatus::Zombie => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerStatus::None => "NONE",
            ContainerStatus::Unknown => "UNKNOWN",
            ContainerStatus::Pulled => "PULLED",
            ContainerStatus::Created => "CREATED",
            ContainerStatus::Running => "RUNNING",
            ContainerStatus::Stopped => "STOPPED",
            ContainerStatus::Dead => "DEAD",
            ContainerStatus::Zombie => "ZOMBIE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_status_order() {
        for pair in ContainerStatus::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for status in ContainerStatus::ALL {
            assert!(status < ContainerStatus::Zombie);
        }
    }

    #[test]
    fn test_task_status_order() {
        for pair in TaskStatus::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_terminal() {
        assert!(ContainerStatus::Dead.terminal());
        assert!(ContainerStatus::Zombie.terminal());
        assert!(!ContainerStatus::Stopped.terminal());
        assert!(!ContainerStatus::Running.terminal());
        assert!(TaskStatus::Dead.terminal());
        assert!(!TaskStatus::Stopped.terminal());
    }

    #[test]
    fn test_has_exited() {
        assert!(ContainerStatus::Stopped.has_exited());
        assert!(ContainerStatus::Dead.has_exited());
        assert!(!ContainerStatus::Running.has_exited());
        assert!(!ContainerStatus::Zombie.has_exited());
    }

    #[test]
    fn test_merge_never_produces_zombie() {
        for a in ContainerStatus::ALL {
            assert_eq!(a.merge(ContainerStatus::Zombie), a);
            assert_eq!(ContainerStatus::Zombie.merge(a), a);
            for b in ContainerStatus::ALL {
                assert_eq!(a.merge(b), a.max(b));
            }
        }
        assert_eq!(
            ContainerStatus::Zombie.merge(ContainerStatus::Zombie),
            ContainerStatus::None
        );
        assert_eq!(
            TaskStatus::Running.merge(TaskStatus::Created),
            TaskStatus::Running
        );
    }

    #[test]
    fn test_task_status_mapping_preserves_order() {
        for pair in ContainerStatus::ALL.windows(2) {
            assert!(pair[0].task_status() < pair[1].task_status());
        }
        assert_eq!(ContainerStatus::Zombie.task_status(), None);
    }

    #[test]
    fn test_display_matches_wire_form() {
        assert_eq!(ContainerStatus::Running.to_string(), "RUNNING");
        assert_eq!(TaskStatus::Stopped.to_string(), "STOPPED");
        assert_eq!(
            serde_json::to_string(&ContainerStatus::Dead).unwrap(),
            "\"DEAD\""
        );
        assert!(serde_json::to_string(&ContainerStatus::Zombie).is_err());
        assert!(serde_json::from_str::<ContainerStatus>("\"ZOMBIE\"").is_err());
    }
}
