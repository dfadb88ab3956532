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

//! Progress reporting for resolve batches.

use std::sync::{Arc, Mutex};

use lodecake::event::{ProgressSink, TransferEvent, TransferPhase};
use lodecake::report::{ArtifactDownloadReport, ResolveReport};
use lodeutil::descriptor::DependencyDescriptor;
use lodeutil::module_id::{Artifact, ModuleRevisionId};

/// Total work units of a batch.
pub const MONITOR_LENGTH: u32 = 1000;
/// Work units for loading engines and descriptors.
pub const ENGINE_LOAD_LENGTH: u32 = 100;
/// Work units for the post resolve hooks.
pub const POST_RESOLVE_LENGTH: u32 = 100;

const KILO_BYTES_UNIT: u64 = 1024;

/// Receives progress of a batch. Every method does nothing by default.
pub trait ProgressMonitor: Send + Sync {
    fn begin_task(&self, _name: &str, _total_work: u32) {}

    fn set_task_name(&self, _name: &str) {}

    fn sub_task(&self, _name: &str) {}

    fn worked(&self, _work: u32) {}

    fn done(&self) {}
}

pub struct NoMonitor;

impl ProgressMonitor for NoMonitor {}

#[derive(Default)]
struct ListenerState {
    total_length: u64,
    current_length: u64,
    work_per_artifact: u32,
    current_progress: u32,
}

/// Turns engine events of a single resolve into monitor work.
///
/// Half of `step` is reported when the resolve ends, the other half is
/// spread over the artifacts to download.
pub struct ResolveListener {
    monitor: Arc<dyn ProgressMonitor>,
    resolve_step: u32,
    download_step: u32,
    state: Mutex<ListenerState>,
}

impl ResolveListener {
    pub fn new(monitor: Arc<dyn ProgressMonitor>, step: u32) -> Self {
        let resolve_step = step / 2;
        ResolveListener {
            monitor,
            resolve_step,
            download_step: step - resolve_step,
            state: Mutex::new(ListenerState::default()),
        }
    }

    fn with_state(&self, f: impl FnOnce(&mut ListenerState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }
}

impl ProgressSink for ResolveListener {
    fn on_transfer(&self, event: &TransferEvent<'_>) {
        let artifact = event.artifact;
        self.with_state(|s| match &event.phase {
            TransferPhase::Initiated => {
                self.monitor.sub_task(&format!("downloading {artifact}"));
            }
            TransferPhase::Started { total } => {
                s.current_length = 0;
                s.current_progress = 0;
                if let Some(total) = total {
                    s.total_length = *total;
                    self.monitor.sub_task(&format!(
                        "downloading {artifact}: 0 / {}kB",
                        total / KILO_BYTES_UNIT
                    ));
                }
            }
            TransferPhase::Progress { transferred, .. } => {
                if s.total_length > 1 {
                    s.current_length = *transferred;
                    let progress = (s.current_length.min(s.total_length)
                        * u64::from(s.work_per_artifact)
                        / s.total_length) as u32;
                    self.monitor
                        .worked(progress.saturating_sub(s.current_progress));
                    s.current_progress = s.current_progress.max(progress);
                    self.monitor.sub_task(&format!(
                        "downloading {artifact}: {} / {}kB",
                        s.current_length / KILO_BYTES_UNIT,
                        s.total_length / KILO_BYTES_UNIT
                    ));
                }
            }
            TransferPhase::Completed { .. } => {
                self.monitor
                    .worked(s.work_per_artifact.saturating_sub(s.current_progress));
                s.current_progress = s.work_per_artifact;
            }
        });
    }

    fn on_prepare_download(&self, artifacts: &[Artifact]) {
        self.with_state(|s| {
            if artifacts.is_empty() {
                self.monitor.worked(self.download_step);
            } else {
                s.work_per_artifact = self.download_step / artifacts.len() as u32;
            }
        });
    }

    fn on_artifact_start(&self, artifact: &Artifact) {
        self.monitor.sub_task(&format!("downloading {artifact}"));
    }

    fn on_artifact_end(&self, _report: &ArtifactDownloadReport) {
        self.with_state(|s| {
            self.monitor
                .worked(s.work_per_artifact.saturating_sub(s.current_progress));
            s.current_progress = 0;
            s.total_length = 0;
        });
        self.monitor.sub_task(" ");
    }

    fn on_dependency_start(&self, dependency: &DependencyDescriptor) {
        self.monitor.sub_task(&format!(
            "resolving {};{}",
            dependency.module, dependency.revision
        ));
    }

    fn on_dependency_end(&self, _dependency: &DependencyDescriptor, _: Option<&ModuleRevisionId>) {
        self.monitor.sub_task(" ");
    }

    fn on_resolve_end(&self, _report: &ResolveReport) {
        self.monitor.worked(self.resolve_step);
    }
}
