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


use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use lodecore::{BatchStatus, Orchestrator};
use lodeutil::preferences::Preferences;

use super::{CliHost, GlobalFlags, LogMonitor, RequestFlags, print_summary, project_refs};

/// Resolve the given projects once
#[derive(Debug, clap::Parser, Clone)]
pub struct ResolveSubcommand {
    /// Project directories, each holding a `lode.json`
    #[clap(default_value = ".")]
    pub projects: Vec<PathBuf>,

    #[clap(flatten)]
    pub request: RequestFlags,
}

pub fn run_resolve(_flags: &GlobalFlags, cmd: ResolveSubcommand) -> anyhow::Result<i32> {
    let prefs = Preferences::load()?;
    let projects = project_refs(&cmd.projects);
    let host = Arc::new(CliHost::new(&projects, cmd.request.in_workspace));
    let orchestrator = Orchestrator::new(host, prefs.clone());
    let token = crate::shutdown::setup_shutdown_handler()?;

    let requests = cmd.request.requests(&projects, &prefs, None);
    for request in &requests {
        orchestrator.queue_request(Arc::clone(request));
    }
    let status = orchestrator.run_pending(Arc::new(LogMonitor), &token);

    for request in &requests {
        print_summary(request);
    }
    match status {
        BatchStatus::Ok if requests.iter().any(|r| r.is_resolve_failed()) => Ok(1),
        BatchStatus::Ok => Ok(0),
        BatchStatus::Cancelled => {
            eprintln!("{}", "Resolve cancelled".yellow().bold());
            Ok(130)
        }
        BatchStatus::Failed(errors) => Err(errors.into()),
    }
}
