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

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use indexmap::{IndexMap, IndexSet};
use lodecake::report::ArtifactDownloadReport;
use lodeutil::module_id::{Artifact, ModuleRevisionId};

/// The output of one resolve attempt of a request.
#[derive(Debug, Clone, Default)]
pub struct ResolveResult {
    pub(crate) previous_used: bool,
    pub(crate) resolve_id: String,
    pub(crate) confs: Vec<String>,
    pub(crate) problem_messages: Vec<String>,
    pub(crate) artifact_reports: IndexSet<ArtifactDownloadReport>,
    pub(crate) artifacts_by_dependency: IndexMap<ModuleRevisionId, Vec<Artifact>>,
    pub(crate) retrieved: Option<BTreeMap<Artifact, BTreeSet<PathBuf>>>,
}

impl ResolveResult {
    pub(crate) fn new(resolve_id: String, confs: Vec<String>) -> Self {
        ResolveResult {
            resolve_id,
            confs,
            ..Default::default()
        }
    }

    /// Whether the on-disk reports of an earlier resolve were trusted instead
    /// of resolving again.
    pub fn is_previous_used(&self) -> bool {
        self.previous_used
    }

    pub fn resolve_id(&self) -> &str {
        &self.resolve_id
    }

    pub fn confs(&self) -> &[String] {
        &self.confs
    }

    pub fn problem_messages(&self) -> &[String] {
        &self.problem_messages
    }

    pub fn is_failed(&self) -> bool {
        !self.problem_messages.is_empty()
    }

    pub fn artifact_reports(&self) -> impl Iterator<Item = &ArtifactDownloadReport> {
        self.artifact_reports.iter()
    }

    pub fn artifacts_by_dependency(&self) -> &IndexMap<ModuleRevisionId, Vec<Artifact>> {
        &self.artifacts_by_dependency
    }

    /// Artifact to local paths, when a retrieve ran.
    pub fn retrieved(&self) -> Option<&BTreeMap<Artifact, BTreeSet<PathBuf>>> {
        self.retrieved.as_ref()
    }

    pub fn report_of(&self, artifact: &Artifact) -> Option<&ArtifactDownloadReport> {
        self.artifact_reports.iter().find(|r| &r.artifact == artifact)
    }

    /// Artifacts of the same module with one of `types`, named after
    /// `artifact`: typically its sources or documentation.
    pub fn companions(&self, artifact: &Artifact, types: &[&str]) -> Vec<&Artifact> {
        let Some(all) = self.artifacts_by_dependency.get(&artifact.module) else {
            return Vec::new();
        };
        all.iter()
            .filter(|a| *a != artifact)
            .filter(|a| types.contains(&a.kind.as_str()))
            .filter(|a| a.name == artifact.name || a.name.starts_with(&artifact.name))
            .collect()
    }
}
