use std::error::Error;
use std::sync::Arc;

use bollard::Docker;
use clap::Parser;
use sysinfo::System;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::lib::{
    config::types::AgentConfig,
    engine::{
        events::{docker_events, listen_for_events, report_state_changes},
        stats::host_resources,
        types::{AgentServer, TaskEngineState},
    },
};

mod lib {
    pub mod api;
    pub mod config;
    pub mod engine;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AgentConfig::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    let docker = Docker::connect_with_unix_defaults()?;
    let state = Arc::new(TaskEngineState::new(config.cascade_policy));
    let (sender, receiver) = mpsc::unbounded_channel();

    tokio::spawn(report_state_changes(receiver));
    tokio::spawn({
        let state = state.clone();
        async move {
            let events = docker_events(&docker);
            listen_for_events(events, Some(&docker), state, sender).await;
        }
    });

    let mut sysinfo = System::new();
    sysinfo.refresh_memory();
    sysinfo.refresh_cpu_all();
    let resources = host_resources(&sysinfo, &config.reserved_ports);

    info!(name = %config.name, policy = ?config.cascade_policy, "Starting agent");
    AgentServer::new(state, &config.name, &config.address, config.port, resources)
        .start_server()
        .await?;

    Ok(())
}
