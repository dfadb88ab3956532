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

//! Runs a single request: resolve (or reuse the reports of a previous
//! resolve), then retrieve when the request asks for it.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use lodecake::Engine;
use lodecake::resolve::ResolveOptions;
use lodecake::retrieve::{RetrieveOptions, parse_type_filter, token_root};
use lodecake::workspace::WorkspaceResolver;
use lodeutil::descriptor::ModuleDescriptor;
use lodeutil::path::PROJECT_LOC_VAR;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FailureKind, RequestFailure};
use crate::host::Host;
use crate::progress::{ProgressMonitor, ResolveListener};
use crate::request::{ResolveRequest, ResolverConfig};
use crate::result::ResolveResult;
use crate::worker::{CancellableWorker, WorkerOutcome};

pub const UNSAFE_RETRIEVE_ROOT: &str = "The root of the retrieve pattern is the root folder of \
    the project. Your project would have then been entirely deleted. Change your retrieve \
    pattern to have a sub folder.";

#[derive(Debug)]
pub enum DriverOutcome {
    Resolved(Arc<ResolveResult>),
    /// The result is kept when the resolve itself went through but reported
    /// problems.
    Failed(RequestFailure, Option<Arc<ResolveResult>>),
    Cancelled,
}

pub struct ResolutionDriver<'a> {
    request: &'a ResolveRequest,
    engine: Arc<Engine>,
    descriptor: Arc<ModuleDescriptor>,
    worker: CancellableWorker,
}

impl<'a> ResolutionDriver<'a> {
    pub fn new(
        request: &'a ResolveRequest,
        engine: Arc<Engine>,
        descriptor: Arc<ModuleDescriptor>,
    ) -> Self {
        ResolutionDriver {
            request,
            engine,
            descriptor,
            worker: CancellableWorker::default(),
        }
    }

    pub fn with_worker(mut self, worker: CancellableWorker) -> Self {
        self.worker = worker;
        self
    }

    /// Resolves the request on a worker thread. `step` is the share of the
    /// monitor's work this request accounts for.
    pub fn run(
        &self,
        host: &dyn Host,
        monitor: Arc<dyn ProgressMonitor>,
        step: u32,
        token: &CancellationToken,
    ) -> DriverOutcome {
        let request_name = self.request.to_string();
        info!("Resolving {}", request_name);
        monitor.set_task_name(&format!("Resolve of {request_name}"));

        let job = Job {
            engine: Arc::clone(&self.engine),
            descriptor: Arc::clone(&self.descriptor),
            config: self.request.config().clone(),
            request: request_name.clone(),
            monitor: Arc::clone(&monitor),
            listener: Arc::new(ResolveListener::new(monitor, step)),
        };
        let outcome = self.worker.run(move || job.run(), &self.engine, token);

        let output = match outcome {
            WorkerOutcome::Cancelled | WorkerOutcome::Completed(Err(JobError::Interrupted)) => {
                info!("Resolve of {} cancelled", request_name);
                return DriverOutcome::Cancelled;
            }
            WorkerOutcome::Panicked(reason) => {
                let failure = RequestFailure::new(
                    self.request,
                    FailureKind::Unexpected,
                    format!("The resolve job of {request_name} has unexpectedly stopped"),
                )
                .with_cause(anyhow::anyhow!(reason));
                return DriverOutcome::Failed(failure, None);
            }
            WorkerOutcome::Completed(Err(JobError::Failed(failure, result))) => {
                warn!("{}", failure);
                return DriverOutcome::Failed(failure, result.map(Arc::new));
            }
            WorkerOutcome::Completed(Ok(output)) => output,
        };

        if let Some(dir) = &output.refresh {
            debug!("Refreshing {}", dir.display());
            host.refresh(dir);
        }
        let result = Arc::new(output.result);
        if let Some(hooks) = self.request.hooks() {
            hooks.post_resolve(self.request, &result);
        }
        DriverOutcome::Resolved(result)
    }
}

enum JobError {
    Interrupted,
    Failed(RequestFailure, Option<ResolveResult>),
}

struct JobOutput {
    result: ResolveResult,
    /// Directory whose content changed on disk.
    refresh: Option<PathBuf>,
}

/// Everything the worker thread needs, owned.
struct Job {
    engine: Arc<Engine>,
    descriptor: Arc<ModuleDescriptor>,
    config: ResolverConfig,
    request: String,
    monitor: Arc<dyn ProgressMonitor>,
    listener: Arc<ResolveListener>,
}

impl Job {
    fn failure(&self, kind: FailureKind, message: impl Into<String>) -> RequestFailure {
        RequestFailure {
            request: self.request.clone(),
            kind,
            message: message.into(),
            details: Vec::new(),
            cause: None,
        }
    }

    fn run(self) -> Result<JobOutput, JobError> {
        let confs = self.descriptor.expand_confs(&self.config.confs);
        let resolve_id = lodecake::resolve_id(&self.descriptor, self.config.extended_resolve_id);

        let previous = if self.config.use_previous {
            self.previous(&resolve_id, &confs)
        } else {
            None
        };
        let mut result = match previous {
            Some(result) => result,
            None => self.resolve(resolve_id, confs)?,
        };

        if result.is_failed() {
            let failure = self
                .failure(
                    FailureKind::Resolution,
                    format!("Impossible to resolve dependencies of {}", self.descriptor.mrid),
                )
                .with_details(result.problem_messages.clone());
            return Err(JobError::Failed(failure, Some(result)));
        }

        let refresh = self.retrieve(&mut result)?;
        Ok(JobOutput { result, refresh })
    }

    /// Rebuilds a result from the reports of an earlier resolve. `None`
    /// when any of them can't be trusted.
    fn previous(&self, resolve_id: &str, confs: &[String]) -> Option<ResolveResult> {
        debug!("Trying to read previous resolve reports");
        let mut result = ResolveResult::new(resolve_id.to_owned(), confs.to_vec());
        result.previous_used = true;
        for conf in confs {
            let report = match self.engine.read_report(resolve_id, conf) {
                Ok(report) => report,
                Err(e) => {
                    info!(
                        "No usable resolve report for the configuration {}: {}. Resolving again.",
                        conf, e
                    );
                    return None;
                }
            };
            if !report.problems.is_empty() {
                info!("The resolve report for {} has problems. Resolving again.", conf);
                return None;
            }
            // workspace projects may have changed since
            if report
                .artifacts
                .iter()
                .any(|a| a.origin.as_deref() == Some(WorkspaceResolver::NAME))
            {
                info!("The resolve report for {} involves workspace projects. Resolving again.", conf);
                return None;
            }
            result.artifact_reports.extend(report.artifacts);
            for mrid in report.dependencies {
                if result.artifacts_by_dependency.contains_key(&mrid) {
                    continue;
                }
                match self.engine.cached_descriptor(&mrid) {
                    Some(md) => {
                        result
                            .artifacts_by_dependency
                            .insert(mrid, md.artifacts("*"));
                    }
                    None => debug!("Dependency {} not found in cache", mrid),
                }
            }
        }
        Some(result)
    }

    fn resolve(&self, resolve_id: String, confs: Vec<String>) -> Result<ResolveResult, JobError> {
        debug!("Doing a full resolve...");
        let mut options = ResolveOptions::new(resolve_id.clone());
        options.confs = confs;
        options.transitive = self.config.transitive;
        options.cache_only = self.config.cache_only;
        let report = self
            .engine
            .resolve(&self.descriptor, &options, self.listener.as_ref())
            .map_err(|e| {
                if e.is_interrupted() {
                    return JobError::Interrupted;
                }
                let failure = self
                    .failure(
                        FailureKind::Resolution,
                        format!("Error while resolving dependencies for {}", self.request),
                    )
                    .with_cause(e);
                JobError::Failed(failure, None)
            })?;
        if report.has_error() {
            debug!("Resolve ended with errors");
        } else {
            debug!("Resolve successful");
        }

        let mut result = ResolveResult::new(resolve_id, report.confs.clone());
        result.problem_messages = report.problems.clone();
        for adr in &report.artifacts {
            // workspace projects stand in for their published artifacts
            let adr = report
                .workspace_artifacts
                .get(&adr.artifact)
                .unwrap_or(adr)
                .clone();
            result.artifact_reports.insert(adr);
        }
        for node in &report.dependencies {
            let artifacts = match self.engine.cached_descriptor(&node.id) {
                Some(md) => md.artifacts("*"),
                None => node.artifacts.clone(),
            };
            result.artifacts_by_dependency.insert(node.id.clone(), artifacts);
        }
        Ok(result)
    }

    fn retrieve(&self, result: &mut ResolveResult) -> Result<Option<PathBuf>, JobError> {
        let (Some(setup), Some(project)) = (&self.config.retrieve, &self.config.project) else {
            debug!("No file retrieving configured");
            return Ok(None);
        };

        let mut variables = self.engine.settings().variables.clone();
        variables.set(PROJECT_LOC_VAR, project.location.display().to_string());
        let mut pattern = variables.substitute(&setup.pattern).map_err(|e| {
            JobError::Failed(
                self.failure(
                    FailureKind::Retrieve,
                    format!("Incorrect use of variables in retrieve pattern '{}'", setup.pattern),
                )
                .with_cause(e),
                None,
            )
        })?;
        if !setup.pattern.starts_with("${") {
            pattern = format!("{}/{}", project.location.display(), pattern);
        }

        let root = token_root(&pattern).trim_end_matches(['/', '\\']);
        if setup.sync && (root.is_empty() || is_ancestor_or_same(Path::new(root), &project.location))
        {
            return Err(JobError::Failed(
                self.failure(FailureKind::Retrieve, UNSAFE_RETRIEVE_ROOT),
                None,
            ));
        }

        info!("Retrieving files into {}", pattern);
        self.monitor
            .set_task_name(&format!("retrieving dependencies in {pattern}"));
        let options = RetrieveOptions {
            resolve_id: result.resolve_id.clone(),
            confs: result.confs.clone(),
            sync: setup.sync,
            types: parse_type_filter(&setup.types),
        };
        let retrieve_failed = |e: lodecake::EngineError| {
            if e.is_interrupted() {
                return JobError::Interrupted;
            }
            JobError::Failed(
                self.failure(
                    FailureKind::Retrieve,
                    format!("Error while retrieving dependencies for {}", self.request),
                )
                .with_cause(e),
                None,
            )
        };
        let report = self
            .engine
            .retrieve(&pattern, &options)
            .map_err(retrieve_failed)?;
        info!("{} retrieved file(s)", report.copied);

        let refresh = (report.copied > 0).then(|| {
            if root.is_empty() {
                project.location.clone()
            } else {
                PathBuf::from(root)
            }
        });

        // derive the destinations again rather than trusting what was copied
        let plan = self
            .engine
            .determine_artifacts_to_copy(&pattern, &options)
            .map_err(retrieve_failed)?;
        result.retrieved = Some(
            plan.into_iter()
                .map(|(artifact, (_, dests))| (artifact, dests))
                .collect(),
        );
        Ok(refresh)
    }
}

/// Whether syncing `root` could delete `project`. A root that can't be
/// resolved counts as unsafe.
fn is_ancestor_or_same(root: &Path, project: &Path) -> bool {
    let project = dunce::canonicalize(project).unwrap_or_else(|_| project.to_owned());
    match resolve_dir(root) {
        Some(root) => project.starts_with(root),
        None => true,
    }
}

/// Canonicalizes the longest existing prefix of `path`, then applies the
/// remaining components lexically. The missing part can't contain links, so
/// `..` there means the parent directory.
fn resolve_dir(path: &Path) -> Option<PathBuf> {
    let path = std::path::absolute(path).ok()?;
    let components: Vec<Component<'_>> = path.components().collect();
    let mut split = components.len();
    let mut resolved = None;
    while split > 0 {
        let prefix: PathBuf = components[..split].iter().collect();
        if let Ok(canonical) = dunce::canonicalize(&prefix) {
            resolved = Some(canonical);
            break;
        }
        split -= 1;
    }
    let mut resolved = resolved?;
    for component in &components[split..] {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            other => resolved.push(other),
        }
    }
    Some(resolved)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        std::fs::create_dir_all(project.join("lib")).unwrap();
        assert!(is_ancestor_or_same(&project, &project));
        assert!(is_ancestor_or_same(dir.path(), &project));
        assert!(!is_ancestor_or_same(&project.join("lib"), &project));
        assert!(!is_ancestor_or_same(&dir.path().join("other"), &project));
    }

    #[test]
    fn parent_components_of_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        std::fs::create_dir_all(&project).unwrap();
        assert!(is_ancestor_or_same(&project.join("lib/.."), &project));
        assert!(is_ancestor_or_same(&project.join("lib/./../.."), &project));
        assert!(is_ancestor_or_same(&project.join("a/b/../../."), &project));
        assert!(!is_ancestor_or_same(&project.join("lib/../lib"), &project));
        assert!(!is_ancestor_or_same(&project.join("lib/x/.."), &project));
    }
}
