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

use std::path::Path;
use std::sync::Arc;

use lodecake::workspace::{WorkspaceIndex, WorkspaceModule};
use lodeutil::common::{DESCRIPTOR_FILE, read_descriptor_from_json};

use crate::error::RequestFailure;
use crate::request::{ProjectRef, ResolveRequest};

/// The environment the orchestrator runs in: which projects are open, where
/// resolve outcomes are shown and which directories need a refresh after
/// files were written into them.
pub trait Host: Send + Sync {
    fn is_accessible(&self, _project: &ProjectRef) -> bool {
        true
    }

    /// Records the outcome of a request. `None` clears any previous failure.
    fn set_resolve_status(&self, _request: &ResolveRequest, _failure: Option<&RequestFailure>) {}

    fn refresh(&self, _dir: &Path) {}

    /// The modules other requests may resolve against, if any.
    fn workspace(&self) -> Option<Arc<dyn WorkspaceIndex>> {
        None
    }
}

pub struct NoHost;

impl Host for NoHost {}

/// A workspace made of project directories, each holding a descriptor.
pub struct ProjectsWorkspace {
    projects: Vec<ProjectRef>,
}

impl ProjectsWorkspace {
    pub fn new(projects: Vec<ProjectRef>) -> Self {
        ProjectsWorkspace { projects }
    }

    pub fn projects(&self) -> &[ProjectRef] {
        &self.projects
    }
}

impl WorkspaceIndex for ProjectsWorkspace {
    fn modules(&self) -> Vec<WorkspaceModule> {
        let mut res = Vec::new();
        for project in &self.projects {
            let path = project.location.join(DESCRIPTOR_FILE);
            if !path.exists() {
                continue;
            }
            match read_descriptor_from_json(&path) {
                Ok(md) => res.push(WorkspaceModule {
                    project: project.name.clone(),
                    location: project.location.clone(),
                    descriptor: Arc::new(md),
                }),
                Err(e) => {
                    tracing::warn!(
                        "Ignoring workspace project {}: {:?}",
                        project.name,
                        e
                    );
                }
            }
        }
        res
    }
}
