use sysinfo::System;

use crate::lib::api::Resource;

// Cpu units per core, matching the scheduler's cpu share accounting.
const CPU_UNITS_PER_CORE: i64 = 1024;

impl Resource {
    pub fn integer(name: &str, value: i64) -> Self {
        Resource {
            name: name.to_string(),
            resource_type: "INTEGER".to_string(),
            double_value: 0.0,
            long_value: value,
        }
    }

    pub fn double(name: &str, value: f64) -> Self {
        Resource {
            name: name.to_string(),
            resource_type: "DOUBLE".to_string(),
            double_value: value,
            long_value: 0,
        }
    }

    /// The value selected by the type tag.
    pub fn value(&self) -> f64 {
        match self.resource_type.as_str() {
            "DOUBLE" => self.double_value,
            _ => self.long_value as f64,
        }
    }
}

/// Resources this host offers to tasks.
pub fn host_resources(sysinfo: &System, reserved_ports: &[u16]) -> Vec<Resource> {
    vec![
        Resource::integer("CPU", sysinfo.cpus().len() as i64 * CPU_UNITS_PER_CORE),
        Resource::integer("MEMORY", (sysinfo.total_memory() / 1024 / 1024) as i64),
        Resource::double(
            "CPU_USAGE",
            (f64::from(sysinfo.global_cpu_usage()) * 100.0).round() / 100.0,
        ),
        Resource::integer("PORTS", reserved_ports.len() as i64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_follows_type_tag() {
        assert_eq!(Resource::integer("MEMORY", 512).value(), 512.0);
        assert_eq!(Resource::double("CPU_USAGE", 12.5).value(), 12.5);
    }

    #[test]
    fn test_host_resources() {
        let mut sysinfo = System::new();
        sysinfo.refresh_memory();
        sysinfo.refresh_cpu_all();
        let resources = host_resources(&sysinfo, &[22, 2375, 2376, 51678]);

        let by_name = |name: &str| resources.iter().find(|r| r.name == name).unwrap();
        assert_eq!(by_name("CPU").long_value % CPU_UNITS_PER_CORE, 0);
        assert!(by_name("CPU").long_value > 0);
        assert_eq!(by_name("MEMORY").resource_type, "INTEGER");
        assert_eq!(by_name("PORTS").long_value, 4);
        assert_eq!(by_name("CPU_USAGE").resource_type, "DOUBLE");
    }
}
