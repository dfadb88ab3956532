// moon: The build system and package manager for MoonBit.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.


#![warn(clippy::clone_on_ref_ptr)]

use std::io::IsTerminal;

use clap::Parser;
use cli::LodeSubcommands;

mod cli;
mod shutdown;

use colored::*;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging.
///
/// `RUST_LOG` filters the output printed to stderr. Without it, `--verbose`
/// raises the default level from warnings to info. Records emitted through
/// the `log` facade by the resolve engine are forwarded as well.
fn init_tracing(verbose: bool) {
    // usage example: only show debug logs for the orchestrator
    // env RUST_LOG=lodecore::orchestrator=debug cargo run -- resolve path/to/project

    let log_env_set = std::env::var("RUST_LOG").is_ok();
    let default_level = if verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let fmt = tracing_subscriber::fmt::layer()
        .with_ansi(std::io::stderr().is_terminal())
        .with_line_number(log_env_set)
        .with_level(true)
        .with_writer(std::io::stderr);
    let fmt = if !log_env_set {
        fmt.with_target(false).without_time().boxed()
    } else {
        fmt.compact().boxed()
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt.with_filter(filter))
        .try_init()
    {
        eprintln!("{}: failed to set up logging: {}", "warning".yellow().bold(), e);
    }
}

pub fn main() {
    let cli = cli::LodeCli::parse();
    init_tracing(cli.flags.verbose);

    use LodeSubcommands::*;
    let res = match cli.subcommand {
        Resolve(r) => cli::run_resolve(&cli.flags, r),
        Watch(w) => cli::run_watch(&cli.flags, w),
    };
    match res {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {:?}", "error".red().bold(), e);
            std::process::exit(-1);
        }
    }
}
