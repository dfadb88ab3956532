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

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use lodeutil::module_id::{Artifact, ModuleRevisionId};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// The artifact type of the reports the workspace resolver produces for
/// modules backed by a workspace project.
pub const PROJECT_ARTIFACT_TYPE: &str = "project";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadStatus {
    Successful,
    /// Nothing had to be fetched: already cached, or not a downloadable file.
    NoDownload,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactDownloadReport {
    pub artifact: Artifact,
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_file: Option<PathBuf>,
    #[serde(default)]
    pub size: u64,
    /// Name of the repository the artifact came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArtifactDownloadReport {
    pub fn is_downloaded(&self) -> bool {
        self.status != DownloadStatus::Failed && self.local_file.is_some()
    }
}

/// One module of a resolved dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub id: ModuleRevisionId,
    /// Root configurations through which this module was reached.
    pub root_confs: BTreeSet<String>,
    /// Every artifact the module publishes in the configurations pulled.
    pub artifacts: Vec<Artifact>,
    pub callers: BTreeSet<ModuleRevisionId>,
    /// The module is backed by a workspace project.
    pub in_workspace: bool,
}

/// The outcome of one resolve call.
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    pub root: Option<ModuleRevisionId>,
    pub resolve_id: String,
    pub confs: Vec<String>,
    pub problems: Vec<String>,
    pub artifacts: Vec<ArtifactDownloadReport>,
    pub dependencies: Vec<DependencyNode>,
    /// Published artifacts of workspace modules, mapped to the report of the
    /// project that provides them.
    pub workspace_artifacts: HashMap<Artifact, ArtifactDownloadReport>,
}

impl ResolveReport {
    pub fn has_error(&self) -> bool {
        !self.problems.is_empty()
    }
}

/// A persisted record of one configuration of a past resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigurationReport {
    pub module: ModuleRevisionId,
    pub conf: String,
    pub resolve_id: String,
    pub dependencies: Vec<ModuleRevisionId>,
    pub artifacts: Vec<ArtifactDownloadReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

impl ConfigurationReport {
    pub fn read(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| EngineError::Report {
            path: path.to_owned(),
            cause: e.into(),
        })?;
        serde_json_lenient::from_reader(BufReader::new(file)).map_err(|e| EngineError::Report {
            path: path.to_owned(),
            cause: e.into(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(EngineError::io(parent))?;
        }
        let file = File::create(path).map_err(EngineError::io(path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| EngineError::Other(e.into()))
    }
}

pub fn report_file_name(resolve_id: &str, conf: &str) -> String {
    format!("{resolve_id}-{conf}.json")
}

#[cfg(test)]
mod test {
    use super::*;
    use semver::Version;

    #[test]
    fn persist_report() {
        let dir = tempfile::tempdir().unwrap();
        let module = ModuleRevisionId::new("acme", "app", Version::new(1, 0, 0));
        let lib = ModuleRevisionId::new("acme", "lib", Version::new(2, 1, 0));
        let report = ConfigurationReport {
            module,
            conf: "default".into(),
            resolve_id: "acme-app".into(),
            dependencies: vec![lib.clone()],
            artifacts: vec![ArtifactDownloadReport {
                artifact: Artifact {
                    module: lib,
                    name: "lib".into(),
                    kind: "jar".into(),
                    ext: "jar".into(),
                    classifier: None,
                },
                status: DownloadStatus::Successful,
                local_file: Some(dir.path().join("lib-2.1.0.jar")),
                size: 3,
                origin: Some("local".into()),
                error: None,
            }],
            problems: vec![],
        };
        let path = dir
            .path()
            .join("resolution")
            .join(report_file_name("acme-app", "default"));
        report.write(&path).unwrap();
        assert_eq!(ConfigurationReport::read(&path).unwrap(), report);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ConfigurationReport::read(&path),
            Err(EngineError::Report { .. })
        ));
    }
}
