/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */

mod command_line;
mod config;

use command_line::{AgentCommand, Options};
use config::Config;
use ifmap_client::endpoint::EndpointResolver;
use ifmap_client::state_machine;
use ifmap_client::transport::TlsConnector;
use ifmap_client::{IfmapChannel, PollUpdate};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing_subscriber::{filter::EnvFilter, filter::LevelFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let options = Options::load();

    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if options.debug != 0 {
        env_filter = env_filter.add_directive(
            match options.debug {
                1 => LevelFilter::DEBUG,
                _ => LevelFilter::TRACE,
            }
            .into(),
        );
    }
    env_filter = env_filter
        .add_directive("rustls=warn".parse()?)
        .add_directive("hickory_proto=warn".parse()?)
        .add_directive("hickory_resolver=warn".parse()?);

    tracing_subscriber::registry()
        .with(fmt::Layer::default().compact().with_ansi(false))
        .with(env_filter)
        .try_init()?;

    match options.cmd.unwrap_or(AgentCommand::Run) {
        AgentCommand::DefaultConfig => {
            println!("{}", Config::default().into_annotated_config_file());
        }
        AgentCommand::Run => {
            let config = Config::load(&options.config_path)?;
            run(config).await?;
        }
    }

    Ok(())
}

async fn run(config: Config) -> eyre::Result<()> {
    let channel_config = config.channel_config()?;
    tracing::info!(
        url = channel_config.url(),
        subscriber = channel_config.subscriber_name(),
        "Starting IF-MAP channel"
    );

    let connector = TlsConnector::new(&channel_config)?;
    let channel = IfmapChannel::new(channel_config, connector, EndpointResolver::from_system_conf());

    let (updates_tx, mut updates_rx) = mpsc::channel::<PollUpdate>(config.update_queue_depth.max(1));
    let handle = state_machine::spawn(channel, config.driver, updates_tx);
    let mut stats_rx = handle.stats();
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
                break;
            }
            update = updates_rx.recv() => {
                let Some(update) = update else {
                    tracing::error!("IF-MAP channel stopped");
                    break;
                };
                // The kernel-sync layer consumes these; this binary only reports them.
                tracing::info!(
                    sequence_number = update.sequence_number,
                    bytes = update.payload.len(),
                    "Configuration update received"
                );
            }
            changed = stats_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let stats = stats_rx.borrow_and_update().clone();
                tracing::debug!(
                    status = %stats.connection_status,
                    session_id = %stats.session_id,
                    sequence_number = stats.sequence_number,
                    recv_msg_cnt = stats.recv_msg_cnt,
                    sent_msg_cnt = stats.sent_msg_cnt,
                    reconnect_attempts = stats.reconnect_attempts,
                    "IF-MAP channel stats"
                );
            }
        }
    }

    if let Some(channel) = handle.shutdown_and_wait().await {
        tracing::info!(
            status = %channel.status(),
            reconnect_attempts = channel.reconnect_attempts(),
            "IF-MAP channel stopped"
        );
    }
    Ok(())
}
