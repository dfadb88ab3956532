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

//! Builders laying out repositories, settings and projects on disk.

use std::path::Path;
use std::time::{Duration, SystemTime};

use lodeutil::common::{DESCRIPTOR_FILE, write_descriptor_json_to_file};
use lodeutil::descriptor::{ConfMapping, DependencyDescriptor, ModuleDescriptor, Publication};

pub struct ModuleSpec {
    md: ModuleDescriptor,
}

impl ModuleSpec {
    /// `mrid` is `org#name;revision`. The module starts with the `default`
    /// configuration only.
    pub fn new(mrid: &str) -> Self {
        let mrid = mrid.parse().expect("valid module revision id");
        ModuleSpec {
            md: ModuleDescriptor::new(mrid),
        }
    }

    pub fn conf(mut self, name: &str) -> Self {
        self.md.configurations.push(name.to_owned());
        self
    }

    /// Publishes a jar named after the module in every configuration.
    pub fn jar(self) -> Self {
        let name = self.md.mrid.name().to_owned();
        self.publication(&name, "jar", "jar", &[])
    }

    pub fn publication(mut self, name: &str, kind: &str, ext: &str, confs: &[&str]) -> Self {
        self.md.publications.push(Publication {
            name: name.to_owned(),
            kind: kind.to_owned(),
            ext: ext.to_owned(),
            classifier: None,
            confs: confs.iter().map(|c| (*c).to_owned()).collect(),
        });
        self
    }

    /// Depends on `module` (`org#name`) through `*->*`.
    pub fn dep(self, module: &str, revision: &str) -> Self {
        self.dep_conf(module, revision, "*->*")
    }

    pub fn dep_conf(mut self, module: &str, revision: &str, mapping: &str) -> Self {
        let confs = mapping
            .split(';')
            .map(|m| m.parse::<ConfMapping>().expect("valid conf mapping"))
            .collect();
        self.md.dependencies.push(DependencyDescriptor {
            module: module.parse().expect("valid module id"),
            revision: revision.to_owned(),
            confs,
            transitive: true,
        });
        self
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.md
    }

    /// Writes the descriptor and every artifact into a filesystem repository.
    /// An artifact's content is the module revision id.
    pub fn publish(&self, repo_root: &Path) -> anyhow::Result<()> {
        let org = match self.md.mrid.organisation() {
            "" => "_",
            org => org,
        };
        let dir = repo_root
            .join(org)
            .join(self.md.mrid.name())
            .join(self.md.mrid.revision.to_string());
        write_descriptor_json_to_file(&self.md, &dir.join(DESCRIPTOR_FILE))?;
        for artifact in self.md.artifacts("*") {
            std::fs::write(dir.join(artifact.file_name()), self.md.mrid.to_string())?;
        }
        Ok(())
    }

    /// Writes the descriptor at the root of a project directory.
    pub fn write_project(&self, project_dir: &Path) -> anyhow::Result<()> {
        write_descriptor_json_to_file(&self.md, &project_dir.join(DESCRIPTOR_FILE))
    }
}

/// Writes a settings file using `cache_dir` and the given `(name, root)`
/// repositories.
pub fn write_settings(path: &Path, cache_dir: &Path, repositories: &[(&str, &Path)]) -> anyhow::Result<()> {
    let repositories: Vec<_> = repositories
        .iter()
        .map(|(name, root)| serde_json::json!({ "name": name, "root": root.display().to_string() }))
        .collect();
    let settings = serde_json::json!({
        "cache-dir": cache_dir.display().to_string(),
        "repositories": repositories,
    });
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&settings)?)?;
    Ok(())
}

/// Moves the modification time of `path` forward, as if it was edited.
pub fn touch_later(path: &Path) -> anyhow::Result<()> {
    let modified = std::fs::metadata(path)?.modified()?;
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(modified.max(SystemTime::now()) + Duration::from_secs(10))?;
    Ok(())
}
