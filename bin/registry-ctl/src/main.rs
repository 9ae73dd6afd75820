use anyhow::Result;
use clap::{Parser, Subcommand};
use gateway_consul::ConsulClient;
use gateway_core::config::{CONSUL_ADDR_ENV, CONSUL_TOKEN_ENV};
use gateway_core::{Deadline, SelectionPolicy};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::init as tracing_init;

mod commands;

/// Inspect and edit the service registry the gateway resolves against
#[derive(Parser, Debug)]
#[command(name = "registry-ctl", version)]
struct Cli {
    /// Consul agent address
    #[arg(long, env = CONSUL_ADDR_ENV, default_value = "http://127.0.0.1:8500")]
    registry: String,

    /// ACL token sent as X-Consul-Token
    #[arg(long, env = CONSUL_TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Deadline for each registry call
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every registration
    List,
    /// Register a service instance
    Register {
        /// Registration id, defaults to <name>-<uuid>
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Remove a registration by id
    Deregister { id: String },
    /// Print the address the gateway would route a service name to
    Resolve {
        name: String,
        #[arg(long, default_value = "first")]
        policy: SelectionPolicy,
    },
    /// Periodically log the registry contents
    Watch {
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        interval: Duration,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let cli = Cli::parse();
    let client = ConsulClient::new(&cli.registry, cli.token.clone())?;

    match cli.command {
        Command::List => {
            for line in commands::list(&client, cli.timeout).await? {
                println!("{}", line);
            }
        }
        Command::Register {
            id,
            name,
            host,
            port,
            tags,
        } => {
            let registration = commands::registration(id, name, host, port, tags);
            client
                .register(&registration, Deadline::after(cli.timeout))
                .await?;
            println!("{}", registration.id);
        }
        Command::Deregister { id } => {
            client
                .deregister(&id, Deadline::after(cli.timeout))
                .await?;
            info!("Deregistered {}", id);
        }
        Command::Resolve { name, policy } => {
            let selected = commands::resolve(&client, &name, policy, cli.timeout).await?;
            println!("{}", selected.address);
        }
        Command::Watch { interval } => {
            commands::watch(&client, interval, cli.timeout).await?;
        }
    }

    Ok(())
}
