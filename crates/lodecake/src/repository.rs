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

pub mod fs;

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use lodeutil::descriptor::ModuleDescriptor;
use lodeutil::module_id::{Artifact, ModuleId, ModuleRevisionId};
use semver::Version;

pub use fs::FsRepository;

/// An opened artifact, ready to be copied.
pub struct ArtifactStream {
    pub reader: Box<dyn Read + Send>,
    pub len: Option<u64>,
}

/// A source of published modules.
pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    /// Get all revisions of a module.
    fn all_revisions_of(
        &self,
        module: &ModuleId,
    ) -> anyhow::Result<Arc<BTreeMap<Version, Arc<ModuleDescriptor>>>>;

    fn get_module_revision(&self, mrid: &ModuleRevisionId) -> Option<Arc<ModuleDescriptor>> {
        let all_revisions = self.all_revisions_of(&mrid.module).ok()?;
        all_revisions.get(&mrid.revision).cloned()
    }

    /// Opens an artifact for download. `Ok(None)` means the repository
    /// doesn't have it.
    fn open_artifact(&self, artifact: &Artifact) -> anyhow::Result<Option<ArtifactStream>>;
}

/// Repositories in lookup order.
#[derive(Default)]
pub struct RepositoryList {
    repositories: Vec<Box<dyn Repository>>,
}

impl RepositoryList {
    pub fn with_repository(repository: Box<dyn Repository>) -> Self {
        RepositoryList {
            repositories: vec![repository],
        }
    }

    pub fn push(&mut self, repository: Box<dyn Repository>) {
        self.repositories.push(repository);
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Repository> {
        self.repositories.iter().map(|r| r.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Repository> {
        self.iter().find(|r| r.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}
