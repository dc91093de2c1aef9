// SDB - CLR Snapshot Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! SDB - CLR Snapshot Debugger agent.
//!
//! Attaches to a managed process, receives breakpoint definitions over the
//! pipe, and streams snapshots back whenever a breakpoint whose condition
//! holds is hit. Exits 0 on a clean `kill_server` drain, nonzero on fatal
//! attach or pipe failures.

use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::Result;
use tracing::{error, info};

use sdb_engine::{DebuggerAgent, EngineConfig};

mod attach;

/// Command-line interface for the SDB agent.
#[derive(Debug, Parser)]
#[command(name = "sdb")]
#[command(about = "SDB - Snapshot debugger agent for .NET Core applications")]
#[command(version)]
pub struct Cli {
    /// Name of the breakpoint pipe to connect to (a Unix-domain socket
    /// path created by the reader process).
    #[arg(long, env = sdb_common::env::SDB_PIPE_NAME)]
    pub pipe_name: String,

    /// Evaluate property getters while rendering values.
    #[arg(
        long,
        env = sdb_common::env::SDB_PROPERTY_EVALUATION,
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub property_evaluation: bool,

    /// Allow method and getter calls inside breakpoint conditions.
    #[arg(
        long,
        env = sdb_common::env::SDB_METHOD_EVALUATION,
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub method_evaluation: bool,

    /// Eager expansion depth for captured value trees.
    #[arg(long, default_value = "5")]
    pub object_eval_depth: u32,

    /// Seconds a single function evaluation may take before giving up.
    #[arg(long, default_value = "60")]
    pub eval_timeout_secs: u64,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Attach to a running managed process.
    Attach {
        /// Process id of the debuggee.
        #[arg(long)]
        pid: u32,
    },
    /// Launch a managed application under the debugger.
    Launch {
        /// Path of the application to launch, followed by its arguments.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    let _log_guard = sdb_common::logging::init_logging("sdb", true)?;

    // Parse CLI arguments
    let cli = Cli::parse();

    let config = EngineConfig {
        pipe_name: cli.pipe_name.clone(),
        property_evaluation: cli.property_evaluation,
        method_evaluation_in_condition: cli.method_evaluation,
        object_eval_depth: cli.object_eval_depth,
        eval_timeout: Duration::from_secs(cli.eval_timeout_secs),
    };

    // Bind the managed runtime. This is fatal when the debuggee cannot be
    // reached; the agent exits nonzero without touching the pipe.
    let session = match &cli.command {
        Commands::Attach { pid } => {
            info!(pid, "attaching to managed process");
            attach::attach(*pid)?
        }
        Commands::Launch { command } => {
            info!(command = ?command, "launching managed process");
            attach::launch(command)?
        }
    };

    let agent = DebuggerAgent::new(config, session.symbol_provider.clone());
    session.deliver_events(agent.callback());

    let cancellation = agent.connect_pipe()?;

    // The sync loop blocks on the pipe; run it off the async runtime so
    // Ctrl+C stays responsive.
    let sync_task = tokio::task::spawn_blocking(move || agent.sync_breakpoints());

    tokio::select! {
        result = sync_task => {
            match result? {
                Ok(()) => info!("breakpoint sync drained cleanly"),
                Err(err) => {
                    error!(%err, "breakpoint sync failed");
                    return Err(err.into());
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            cancellation.cancel()?;
        }
    }

    info!("shutting down SDB agent");
    Ok(())
}
