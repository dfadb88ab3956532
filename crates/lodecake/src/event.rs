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

//! Events raised by the engine while resolving and downloading. They only
//! inform progress reporting and never change what the engine does.

use lodeutil::descriptor::DependencyDescriptor;
use lodeutil::module_id::{Artifact, ModuleRevisionId};

use crate::report::{ArtifactDownloadReport, ResolveReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPhase {
    Initiated,
    /// The total length is known once the transfer starts, if the source reports it.
    Started { total: Option<u64> },
    Progress { transferred: u64, total: Option<u64> },
    Completed { transferred: u64 },
}

#[derive(Debug, Clone)]
pub struct TransferEvent<'a> {
    pub artifact: &'a Artifact,
    pub phase: TransferPhase,
}

/// Receiver of engine events. All methods default to doing nothing.
pub trait ProgressSink: Send + Sync {
    fn on_transfer(&self, _event: &TransferEvent<'_>) {}

    /// Called once before any artifact download with every artifact to be fetched.
    fn on_prepare_download(&self, _artifacts: &[Artifact]) {}

    fn on_artifact_start(&self, _artifact: &Artifact) {}

    fn on_artifact_end(&self, _report: &ArtifactDownloadReport) {}

    fn on_dependency_start(&self, _dependency: &DependencyDescriptor) {}

    fn on_dependency_end(
        &self,
        _dependency: &DependencyDescriptor,
        _resolved: Option<&ModuleRevisionId>,
    ) {
    }

    fn on_resolve_end(&self, _report: &ResolveReport) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {}
