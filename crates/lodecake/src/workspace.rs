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

//! Resolution against modules that live in the caller's workspace instead of
//! their published revisions.

use std::path::PathBuf;
use std::sync::Arc;

use lodeutil::descriptor::ModuleDescriptor;
use lodeutil::module_id::{Artifact, ModuleId};
use lodeutil::version::VersionMatcher;

use crate::report::{ArtifactDownloadReport, DownloadStatus, PROJECT_ARTIFACT_TYPE};
use crate::repository::FsRepository;

/// A module backed by a workspace project.
#[derive(Debug, Clone)]
pub struct WorkspaceModule {
    pub project: String,
    pub location: PathBuf,
    pub descriptor: Arc<ModuleDescriptor>,
}

/// Lists the modules currently available in the workspace.
pub trait WorkspaceIndex: Send + Sync {
    fn modules(&self) -> Vec<WorkspaceModule>;
}

pub struct WorkspaceResolver {
    index: Arc<dyn WorkspaceIndex>,
    ignore_version: bool,
    cache: FsRepository,
}

impl WorkspaceResolver {
    pub const NAME: &'static str = "workspace";

    /// `cache_dir` is a private cache area that keeps workspace descriptors
    /// apart from published ones.
    pub fn new(index: Arc<dyn WorkspaceIndex>, cache_dir: impl Into<PathBuf>) -> Self {
        WorkspaceResolver {
            index,
            ignore_version: false,
            cache: FsRepository::new(Self::NAME, cache_dir),
        }
    }

    pub fn ignore_version(mut self, ignore: bool) -> Self {
        self.ignore_version = ignore;
        self
    }

    pub fn cache(&self) -> &FsRepository {
        &self.cache
    }

    /// Finds the workspace module satisfying a dependency of `root`. The root
    /// module itself is never returned, so a module depending on its own
    /// published revision doesn't loop back onto its project.
    pub fn find(
        &self,
        module: &ModuleId,
        constraint: &str,
        matcher: VersionMatcher,
        root: &ModuleId,
    ) -> Option<WorkspaceModule> {
        if module == root {
            log::debug!("Skipping circular workspace lookup of {}", module);
            return None;
        }
        let candidate = self
            .index
            .modules()
            .into_iter()
            .find(|m| m.descriptor.module_id() == module)?;
        let revision = &candidate.descriptor.mrid.revision;
        if self.ignore_version || matcher.accept(constraint, revision) {
            log::debug!(
                "Dependency {} {} found in workspace project {}",
                module,
                constraint,
                candidate.project
            );
            Some(candidate)
        } else {
            log::info!(
                "Workspace project {} provides {} but revision {} doesn't match {}",
                candidate.project,
                module,
                revision,
                constraint
            );
            None
        }
    }

    /// The report standing in for any artifact of a workspace module.
    pub fn project_report(&self, module: &WorkspaceModule) -> ArtifactDownloadReport {
        ArtifactDownloadReport {
            artifact: Artifact {
                module: module.descriptor.mrid.clone(),
                name: module.project.clone(),
                kind: PROJECT_ARTIFACT_TYPE.to_owned(),
                ext: String::new(),
                classifier: None,
            },
            status: DownloadStatus::NoDownload,
            local_file: Some(module.location.clone()),
            size: 0,
            origin: Some(Self::NAME.to_owned()),
            error: None,
        }
    }
}
