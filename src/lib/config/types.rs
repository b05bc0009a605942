use clap::Parser;

use crate::lib::api::CascadePolicy;

/// Single-host task agent: tracks task and container state from runtime
/// events and serves it over an introspection API.
#[derive(Parser, Debug, Clone)]
#[command(name = "cube_agent")]
#[command(version)]
pub struct AgentConfig {
    /// Name reported in the agent metadata.
    #[arg(long, env = "CUBE_AGENT_NAME", default_value = "default_agent")]
    pub name: String,

    /// Introspection server address.
    #[arg(long, env = "CUBE_AGENT_ADDRESS", default_value = "localhost")]
    pub address: String,

    /// Introspection server port.
    #[arg(long, env = "CUBE_AGENT_PORT", default_value = "8080")]
    pub port: u16,

    /// Which siblings are asked to stop when an essential container fails.
    #[arg(
        long,
        env = "CUBE_AGENT_CASCADE_POLICY",
        value_enum,
        default_value_t = CascadePolicy::StopEssentialSiblings
    )]
    pub cascade_policy: CascadePolicy,

    /// Host ports never handed out to tasks (comma separated).
    #[arg(
        long,
        env = "CUBE_AGENT_RESERVED_PORTS",
        value_delimiter = ',',
        default_value = "22,2375,2376"
    )]
    pub reserved_ports: Vec<u16>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}
