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


mod resolve;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use lodecake::workspace::WorkspaceIndex;
use lodecore::{
    Host, ProgressMonitor, ProjectRef, ProjectsWorkspace, RequestFailure, ResolveHooks,
    ResolveRequest, ResolveResult, ResolverConfig, RetrieveSetup,
};
use lodeutil::preferences::Preferences;
use tracing::{debug, info, trace};

pub use resolve::{ResolveSubcommand, run_resolve};
pub use watch::{WatchSubcommand, run_watch};

#[derive(Debug, clap::Parser)]
#[clap(
    name = "lode",
    about = "Resolve and retrieve the dependencies of lode projects"
)]
pub struct LodeCli {
    #[clap(subcommand)]
    pub subcommand: LodeSubcommands,

    #[clap(flatten)]
    pub flags: GlobalFlags,
}

#[derive(Debug, clap::Parser)]
pub enum LodeSubcommands {
    Resolve(ResolveSubcommand),
    Watch(WatchSubcommand),
}

#[derive(Debug, clap::Args, Clone)]
pub struct GlobalFlags {
    /// Print progress of each resolve
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// How each project on the command line is resolved.
#[derive(Debug, clap::Args, Clone)]
pub struct RequestFlags {
    /// Configurations to resolve, `*` for all of them
    #[clap(long = "conf", short = 'c', default_value = "*")]
    pub confs: Vec<String>,

    /// Settings file or URL, relative to each project. Defaults to the
    /// preferences, then to the built-in settings
    #[clap(long)]
    pub settings: Option<String>,

    /// Directory where downloaded artifacts are cached
    #[clap(long)]
    pub cache_dir: Option<String>,

    /// Property files whose entries are available as `${name}` in the settings
    #[clap(long = "properties")]
    pub property_files: Vec<String>,

    /// Resolve dependencies between the given projects against each other
    #[clap(long)]
    pub in_workspace: bool,

    /// Copy resolved artifacts with this pattern, e.g. `lib/[artifact].[ext]`
    #[clap(long)]
    pub retrieve: Option<String>,

    /// Keep files in the retrieve directory that are no longer resolved
    #[clap(long, requires = "retrieve")]
    pub no_sync: bool,

    /// Comma separated artifact types to retrieve
    #[clap(long, default_value = "*", requires = "retrieve")]
    pub types: String,

    /// Reuse the last resolve reports when they are complete
    #[clap(long)]
    pub use_previous: bool,

    /// Resolve from the cache only
    #[clap(long)]
    pub offline: bool,

    /// Ignore the dependencies of dependencies
    #[clap(long)]
    pub no_transitive: bool,

    /// Include the resolved configurations in the report names
    #[clap(long)]
    pub extended_resolve_id: bool,

    /// Return an error when any project fails to resolve
    #[clap(long)]
    pub force_fail: bool,
}

impl RequestFlags {
    pub fn config(&self, project: ProjectRef, prefs: &Preferences) -> ResolverConfig {
        let mut config = ResolverConfig::for_project(project);
        config.confs = self.confs.clone();
        config.settings.settings_path = self
            .settings
            .clone()
            .or_else(|| prefs.default_settings.clone())
            .unwrap_or_default();
        config.settings.user_cache = self.cache_dir.clone().unwrap_or_default();
        config.settings.property_files = self.property_files.clone();
        config.use_previous = self.use_previous;
        config.cache_only = self.offline || prefs.offline;
        config.transitive = !self.no_transitive;
        config.extended_resolve_id = self.extended_resolve_id;
        config.retrieve = self.retrieve.as_ref().map(|pattern| RetrieveSetup {
            pattern: pattern.clone(),
            sync: !self.no_sync,
            types: self.types.clone(),
        });
        config
    }

    pub fn requests(
        &self,
        projects: &[ProjectRef],
        prefs: &Preferences,
        hooks: Option<Arc<dyn ResolveHooks>>,
    ) -> Vec<Arc<ResolveRequest>> {
        projects
            .iter()
            .map(|project| {
                let mut request =
                    ResolveRequest::with_own_cache(self.config(project.clone(), prefs));
                if let Some(hooks) = &hooks {
                    request = request.with_hooks(Arc::clone(hooks));
                }
                request.set_in_workspace(self.in_workspace);
                request.set_force_fail_on_error(self.force_fail);
                Arc::new(request)
            })
            .collect()
    }
}

pub fn project_refs(dirs: &[PathBuf]) -> Vec<ProjectRef> {
    dirs.iter().map(|d| ProjectRef::from_location(d)).collect()
}

/// The command line as a host: every project given is part of the
/// workspace, outcomes go to the terminal.
pub struct CliHost {
    workspace: Option<Arc<ProjectsWorkspace>>,
}

impl CliHost {
    pub fn new(projects: &[ProjectRef], in_workspace: bool) -> Self {
        let workspace = in_workspace.then(|| Arc::new(ProjectsWorkspace::new(projects.to_vec())));
        CliHost { workspace }
    }
}

impl Host for CliHost {
    fn is_accessible(&self, project: &ProjectRef) -> bool {
        project.location.is_dir()
    }

    fn set_resolve_status(&self, request: &ResolveRequest, failure: Option<&RequestFailure>) {
        match failure {
            None => info!("{} resolved", request),
            Some(failure) => eprintln!("{}: {}: {}", "failed".red().bold(), request, failure),
        }
    }

    fn refresh(&self, dir: &Path) {
        debug!("files changed under {}", dir.display());
    }

    fn workspace(&self) -> Option<Arc<dyn WorkspaceIndex>> {
        self.workspace
            .as_ref()
            .map(|w| Arc::clone(w) as Arc<dyn WorkspaceIndex>)
    }
}

/// Reports progress through the log.
pub struct LogMonitor;

impl ProgressMonitor for LogMonitor {
    fn begin_task(&self, name: &str, total_work: u32) {
        debug!("{name} ({total_work} units)");
    }

    fn set_task_name(&self, name: &str) {
        info!("{name}");
    }

    fn sub_task(&self, name: &str) {
        if !name.trim().is_empty() {
            trace!("{name}");
        }
    }
}

/// Prints what a request ended up with.
pub fn print_summary(request: &ResolveRequest) {
    if request.is_resolve_failed() {
        println!("{} {}", "Failed".red().bold(), request);
        return;
    }
    match request.result() {
        Some(result) => print_result(request, &result),
        None => println!("{} {}", "Skipped".yellow().bold(), request),
    }
}

pub fn print_result(request: &ResolveRequest, result: &ResolveResult) {
    let count: usize = result.artifacts_by_dependency().values().map(Vec::len).sum();
    let how = if result.is_previous_used() {
        " (from previous reports)"
    } else {
        ""
    };
    println!(
        "{} {}: {} artifact(s) from {} module(s){}",
        "Resolved".green().bold(),
        request,
        count,
        result.artifacts_by_dependency().len(),
        how
    );
    for (mrid, artifacts) in result.artifacts_by_dependency() {
        println!("  {mrid}");
        for artifact in artifacts {
            match result.report_of(artifact).and_then(|r| r.local_file.as_ref()) {
                Some(file) => println!("    {} -> {}", artifact, file.display()),
                None => println!("    {artifact}"),
            }
        }
    }
    if let Some(retrieved) = result.retrieved() {
        let files: usize = retrieved.values().map(|f| f.len()).sum();
        println!("  {files} file(s) retrieved");
    }
}
