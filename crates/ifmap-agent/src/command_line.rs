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

use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser)]
#[clap(name = env!("CARGO_BIN_NAME"))]
pub(crate) struct Options {
    /// The path to the agent configuration file
    #[clap(long, env = "IFMAP_AGENT_CONFIG", default_value = "/etc/ifmap-agent/config.toml")]
    pub config_path: PathBuf,

    /// Raise log verbosity: -d for debug, -dd for trace
    #[clap(short, long, action = ArgAction::Count)]
    pub debug: u8,

    #[clap(subcommand)]
    pub cmd: Option<AgentCommand>,
}

#[derive(Parser, Debug)]
pub(crate) enum AgentCommand {
    #[clap(about = "Run is the normal and default command")]
    Run,

    #[clap(about = "Print a default config file with every option documented, and exit")]
    DefaultConfig,
}

impl Options {
    pub fn load() -> Self {
        Self::parse()
    }
}
