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

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use lodeutil::common::read_descriptor_from_json;
use lodeutil::descriptor::ModuleDescriptor;
use lodeutil::module_id::ModuleRevisionId;
use lodeutil::version::VersionMatcher;

use crate::error::EngineError;
use crate::report::{ConfigurationReport, report_file_name};
use crate::repository::{FsRepository, Repository, RepositoryList};
use crate::retrieve::{self, CopyPlan, RetrieveOptions, RetrieveReport};
use crate::settings::Settings;
use crate::workspace::WorkspaceResolver;

const RESOLUTION_DIR: &str = "resolution";

/// A configured resolution engine. Shared between the thread driving a
/// resolve and the worker thread running it, so everything mutable sits
/// behind a lock.
pub struct Engine {
    settings: Settings,
    repositories: RepositoryList,
    cache: FsRepository,
    workspace: Option<WorkspaceResolver>,
    interrupted: Mutex<HashSet<ThreadId>>,
}

impl Engine {
    /// Builds an engine over the filesystem repositories named in `settings`.
    pub fn new(settings: Settings) -> Self {
        let mut repositories = RepositoryList::default();
        for (name, root) in &settings.repositories {
            repositories.push(Box::new(FsRepository::new(name.clone(), root.clone())));
        }
        Self::with_repositories(settings, repositories)
    }

    pub fn with_repositories(settings: Settings, repositories: RepositoryList) -> Self {
        log::debug!(
            "Creating engine from {} with cache {}",
            settings.source,
            settings.cache_dir.display()
        );
        Engine {
            cache: FsRepository::new("cache", settings.cache_dir.clone()),
            settings,
            repositories,
            workspace: None,
            interrupted: Mutex::new(HashSet::new()),
        }
    }

    /// Prefer workspace modules over published ones.
    pub fn with_workspace(mut self, workspace: WorkspaceResolver) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn version_matcher(&self) -> VersionMatcher {
        self.settings.version_matcher
    }

    pub fn cache_dir(&self) -> &Path {
        &self.settings.cache_dir
    }

    pub(crate) fn cache(&self) -> &FsRepository {
        &self.cache
    }

    pub(crate) fn repositories(&self) -> &RepositoryList {
        &self.repositories
    }

    pub fn workspace(&self) -> Option<&WorkspaceResolver> {
        self.workspace.as_ref()
    }

    pub fn parse_descriptor(&self, path: &Path) -> Result<ModuleDescriptor, EngineError> {
        Ok(read_descriptor_from_json(path)?)
    }

    /// The descriptor a past resolve stored for `mrid`, looking into the
    /// workspace cache after the shared one.
    pub fn cached_descriptor(&self, mrid: &ModuleRevisionId) -> Option<Arc<ModuleDescriptor>> {
        self.cache.get_module_revision(mrid).or_else(|| {
            self.workspace
                .as_ref()
                .and_then(|ws| ws.cache().get_module_revision(mrid))
        })
    }

    pub fn report_path(&self, resolve_id: &str, conf: &str) -> PathBuf {
        self.cache_dir()
            .join(RESOLUTION_DIR)
            .join(report_file_name(resolve_id, conf))
    }

    pub fn read_report(
        &self,
        resolve_id: &str,
        conf: &str,
    ) -> Result<ConfigurationReport, EngineError> {
        ConfigurationReport::read(&self.report_path(resolve_id, conf))
    }

    /// Asks the work running on `thread` to stop at its next check.
    pub fn interrupt(&self, thread: ThreadId) {
        log::debug!("Interrupting {:?}", thread);
        if let Ok(mut interrupted) = self.interrupted.lock() {
            interrupted.insert(thread);
        }
    }

    /// Fails with [`EngineError::Interrupted`] once if the current thread was
    /// interrupted.
    pub fn check_interrupted(&self) -> Result<(), EngineError> {
        let current = std::thread::current().id();
        match self.interrupted.lock() {
            Ok(mut interrupted) => {
                if interrupted.remove(&current) {
                    Err(EngineError::Interrupted)
                } else {
                    Ok(())
                }
            }
            Err(_) => Ok(()),
        }
    }

    /// Forgets a pending interrupt of `thread`, once its work is over.
    pub fn clear_interrupt(&self, thread: ThreadId) {
        if let Ok(mut interrupted) = self.interrupted.lock() {
            interrupted.remove(&thread);
        }
    }

    pub fn is_interrupt_pending(&self, thread: ThreadId) -> bool {
        self.interrupted
            .lock()
            .map(|i| i.contains(&thread))
            .unwrap_or(false)
    }

    /// Works out, from the reports of a past resolve, which cached artifact
    /// goes to which destination.
    pub fn determine_artifacts_to_copy(
        &self,
        pattern: &str,
        options: &RetrieveOptions,
    ) -> Result<CopyPlan, EngineError> {
        let mut plan = CopyPlan::new();
        for conf in &options.confs {
            let report = self.read_report(&options.resolve_id, conf)?;
            for adr in &report.artifacts {
                let Some(src) = &adr.local_file else {
                    continue;
                };
                if !src.is_file() {
                    continue;
                }
                if let Some(types) = &options.types {
                    if !types.contains(&adr.artifact.kind) {
                        continue;
                    }
                }
                let dest = PathBuf::from(retrieve::fill_pattern(pattern, &adr.artifact, conf));
                plan.entry(adr.artifact.clone())
                    .or_insert_with(|| (src.clone(), Default::default()))
                    .1
                    .insert(dest);
            }
        }
        Ok(plan)
    }

    pub fn retrieve(
        &self,
        pattern: &str,
        options: &RetrieveOptions,
    ) -> Result<RetrieveReport, EngineError> {
        let plan = self.determine_artifacts_to_copy(pattern, options)?;
        let report = retrieve::execute(&plan, pattern, options.sync, || self.check_interrupted())?;
        log::info!(
            "Retrieved {} artifacts ({} copied, {} up to date, {} removed)",
            report.retrieved.len(),
            report.copied,
            report.up_to_date,
            report.deleted
        );
        Ok(report)
    }
}
