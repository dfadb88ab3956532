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

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lodeutil::common::{DESCRIPTOR_FILE, read_descriptor_from_json, write_descriptor_json_to_file};
use lodeutil::descriptor::ModuleDescriptor;
use lodeutil::module_id::{Artifact, ModuleId, ModuleRevisionId};
use semver::Version;

use super::{ArtifactStream, Repository};

/// Directory name used for modules without an organisation.
const NO_ORG_DIR: &str = "_";

/// A repository laid out on the local filesystem:
///
/// ```text
/// <root>/<organisation>/<module>/<revision>/lode.json
/// <root>/<organisation>/<module>/<revision>/<artifact>-<revision>[-<classifier>].<ext>
/// ```
///
/// The engine's artifact cache uses the same layout.
pub struct FsRepository {
    name: String,
    root: PathBuf,
    #[allow(clippy::type_complexity)]
    cache: Mutex<HashMap<ModuleId, Arc<BTreeMap<Version, Arc<ModuleDescriptor>>>>>,
}

impl FsRepository {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        FsRepository {
            name: name.into(),
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn flush_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    pub fn module_dir(&self, module: &ModuleId) -> PathBuf {
        let org = if module.organisation.is_empty() {
            NO_ORG_DIR
        } else {
            &module.organisation
        };
        self.root.join(org).join(&module.name)
    }

    pub fn revision_dir(&self, mrid: &ModuleRevisionId) -> PathBuf {
        self.module_dir(&mrid.module).join(mrid.revision.to_string())
    }

    pub fn artifact_path(&self, artifact: &Artifact) -> PathBuf {
        self.revision_dir(&artifact.module).join(artifact.file_name())
    }

    pub fn descriptor_path(&self, mrid: &ModuleRevisionId) -> PathBuf {
        self.revision_dir(mrid).join(DESCRIPTOR_FILE)
    }

    /// Stores a descriptor so later lookups find this revision.
    pub fn publish_descriptor(&self, md: &ModuleDescriptor) -> anyhow::Result<()> {
        write_descriptor_json_to_file(md, &self.descriptor_path(&md.mrid))?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&md.mrid.module);
        }
        Ok(())
    }
}

impl Repository for FsRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn all_revisions_of(
        &self,
        module: &ModuleId,
    ) -> anyhow::Result<Arc<BTreeMap<Version, Arc<ModuleDescriptor>>>> {
        if let Some(v) = self.cache.lock().ok().and_then(|c| c.get(module).cloned()) {
            return Ok(v);
        }

        let dir = self.module_dir(module);
        log::debug!("Reading revisions of {} from {}", module, dir.display());
        let mut res = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let descriptor = entry.path().join(DESCRIPTOR_FILE);
            if !descriptor.exists() {
                continue;
            }
            let md = match read_descriptor_from_json(&descriptor) {
                Ok(md) => md,
                Err(e) => {
                    log::warn!("Error when reading descriptor of {}: {:?}", module, e);
                    continue;
                }
            };
            if &md.mrid.module != module {
                log::warn!(
                    "Descriptor {} declares {} instead of {}",
                    descriptor.display(),
                    md.mrid.module,
                    module
                );
                continue;
            }
            res.insert(md.mrid.revision.clone(), Arc::new(md));
        }

        let res = Arc::new(res);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(module.clone(), res.clone());
        }
        Ok(res)
    }

    fn open_artifact(&self, artifact: &Artifact) -> anyhow::Result<Option<ArtifactStream>> {
        let path = self.artifact_path(artifact);
        if !path.is_file() {
            return Ok(None);
        }
        let file = std::fs::File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Some(ArtifactStream {
            reader: Box::new(file),
            len: Some(len),
        }))
    }
}
