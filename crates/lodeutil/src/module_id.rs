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

//! Identities of modules, module revisions and artifacts.

use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

/// The default revision for modules that didn't specify one.
pub static DEFAULT_REVISION: Version = Version::new(0, 0, 0);

/// A module identity without revision, written as `org#name`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    pub organisation: String,
    pub name: String,
}

impl ModuleId {
    pub fn new(organisation: impl Into<String>, name: impl Into<String>) -> Self {
        ModuleId {
            organisation: organisation.into(),
            name: name.into(),
        }
    }

    pub fn with_revision(&self, revision: Version) -> ModuleRevisionId {
        ModuleRevisionId {
            module: self.clone(),
            revision,
            branch: None,
        }
    }
}

impl std::fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.organisation.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}#{}", self.organisation, self.name)
        }
    }
}

impl FromStr for ModuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("module name should not be empty".into());
        }
        match s.split_once('#') {
            Some((_, "")) => Err(format!("missing module name in `{s}`")),
            Some((org, name)) => Ok(ModuleId::new(org, name)),
            None => Ok(ModuleId::new("", s)),
        }
    }
}

/// A module at a precise revision, written as `org#name;revision` with an
/// optional `@branch` suffix.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleRevisionId {
    pub module: ModuleId,
    pub revision: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl ModuleRevisionId {
    pub fn new(organisation: &str, name: &str, revision: Version) -> Self {
        ModuleId::new(organisation, name).with_revision(revision)
    }

    pub fn organisation(&self) -> &str {
        &self.module.organisation
    }

    pub fn name(&self) -> &str {
        &self.module.name
    }
}

impl std::fmt::Display for ModuleRevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};{}", self.module, self.revision)?;
        if let Some(branch) = &self.branch {
            write!(f, "@{branch}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModuleRevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl FromStr for ModuleRevisionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, rest) = s.split_once(';').ok_or("missing revision")?;
        let (revision, branch) = match rest.split_once('@') {
            Some((rev, branch)) => (rev, Some(branch.to_owned())),
            None => (rest, None),
        };
        let revision = Version::parse(revision).map_err(|e| e.to_string())?;
        Ok(ModuleRevisionId {
            module: module.parse()?,
            revision,
            branch,
        })
    }
}

/// A single downloadable file belonging to a module revision.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Artifact {
    pub module: ModuleRevisionId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
}

impl Artifact {
    /// The file name of this artifact, as laid out in repositories and caches.
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                self.name, self.module.revision, classifier, self.ext
            ),
            None => format!("{}-{}.{}", self.name, self.module.revision, self.ext),
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}!{}", self.module, self.name)?;
        if let Some(classifier) = &self.classifier {
            write!(f, "-{classifier}")?;
        }
        write!(f, ".{}({})", self.ext, self.kind)
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}
