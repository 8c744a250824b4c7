//! Command handlers for the Pop-in CLI

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use popin_core::{ProtocolConfig, Scheduler, SystemTimeSource};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::console::{self, CONSOLE_HELP};
use crate::error::Result;
use crate::link::UdpLink;
use crate::sim::{Simulation, SimulationConfig};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, mut config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Node {
                id,
                tx_rssi,
                no_console,
            } => {
                if let Some(rssi) = tx_rssi {
                    config.link.tx_rssi = rssi;
                }
                if no_console {
                    config.runtime.console = false;
                }
                Self::handle_node_command(config, id).await
            }
            Commands::Simulate {
                users,
                seconds,
                seed,
                json,
                fast,
            } => Self::handle_simulate_command(config, users, seconds, seed, json, fast),
            Commands::Config { output } => Self::handle_config_command(config, output),
        }
    }

    /// Run one node until Ctrl-C
    async fn handle_node_command(config: AppConfig, id: u8) -> Result<()> {
        let id = config.validate_node_id(id)?;
        let link = UdpLink::bind(id, config.link.clone()).await?;
        let mut scheduler = Scheduler::new(
            id,
            config.protocol.clone(),
            link,
            SystemTimeSource::new(),
        )?;
        let role = scheduler.role();
        let handle = scheduler.handle();
        scheduler.link_mut().confirm_sends_to(handle.clone());

        let receiver = scheduler.link().spawn_receiver(handle.clone());
        let console_task = if config.runtime.console {
            println!("{}", CONSOLE_HELP);
            Some(console::spawn_console(handle, role))
        } else {
            None
        };

        info!(
            "Node {} running as {} on {} (tick {} ms). Press Ctrl+C to stop",
            id,
            role,
            scheduler.link().local_addr()?,
            config.runtime.tick_interval_ms
        );

        let mut interval = tokio::time::interval(Duration::from_millis(config.runtime.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    scheduler.run_step();
                    for event in scheduler.drain_app_events() {
                        console::report(id, &event);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        receiver.abort();
        if let Some(task) = console_task {
            task.abort();
        }

        let stats = scheduler.stats();
        info!(
            "Node {} stopped after {} ticks: {} frames in, {} dropped, {} overwritten, {} sent, {} send failures",
            id,
            stats.ticks,
            stats.frames_received,
            stats.frames_dropped,
            stats.frames_overwritten,
            stats.messages_sent,
            stats.send_failures
        );
        Ok(())
    }

    /// Run the in-process simulator and print its report
    fn handle_simulate_command(
        config: AppConfig,
        users: u8,
        seconds: u64,
        seed: Option<u64>,
        json: bool,
        fast: bool,
    ) -> Result<()> {
        let protocol = if fast {
            ProtocolConfig {
                admin_id_start: config.protocol.admin_id_start,
                admin_id_end: config.protocol.admin_id_end,
                ..ProtocolConfig::testing()
            }
        } else {
            config.protocol.clone()
        };
        let seed = seed.unwrap_or_else(|| fastrand::u64(..));

        let report = Simulation::new(SimulationConfig {
            protocol,
            users,
            duration: Duration::from_secs(seconds),
            tick: Duration::from_millis(config.runtime.tick_interval_ms),
            seed,
        })?
        .run()?;

        if json {
            println!("{}", report.to_json()?);
        } else {
            print!("{}", report.render_text());
        }

        let unserved = report.users.iter().filter(|user| user.visits.is_empty()).count();
        if unserved > 0 {
            warn!("{} of {} users never reached a booth", unserved, report.users.len());
        }
        Ok(())
    }

    /// Print or save the effective configuration
    fn handle_config_command(config: AppConfig, output: Option<String>) -> Result<()> {
        match output {
            Some(path) => {
                config.save_to_file(&path)?;
                info!("Configuration written to {}", path);
            }
            None => {
                if config == AppConfig::default() {
                    print!("{}", AppConfig::example_config());
                } else {
                    print!("{}", config.to_toml()?);
                }
            }
        }
        Ok(())
    }
}
