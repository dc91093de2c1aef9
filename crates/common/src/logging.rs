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

//! Logging setup shared by the sdb binary and test harnesses.
//!
//! Logs always go to stderr, filtered through `RUST_LOG` (defaulting to
//! `info` for SDB crates). When [`crate::env::SDB_LOG_DIR`] is set, a
//! non-blocking daily-rolling file writer is added so long-running agent
//! sessions can be inspected after the fact.

use std::env;

use eyre::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for the given component name.
///
/// Returns a guard that must be kept alive for the lifetime of the process
/// when file logging is active; dropping it flushes and stops the background
/// writer thread.
pub fn init_logging(component: &str, ansi: bool) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sdb=debug,sdb_engine=debug,sdb_common=debug"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_ansi(ansi);

    if let Ok(log_dir) = env::var(crate::env::SDB_LOG_DIR) {
        let appender = tracing_appender::rolling::daily(log_dir, format!("{component}.log"));
        let (file_writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

        tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer).init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry().with(filter).with(stderr_layer).init();
        Ok(None)
    }
}
