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

//! Queues resolve requests and runs them in batches.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use lodecake::Engine;
use lodeutil::descriptor::ModuleDescriptor;
use lodeutil::module_id::ModuleRevisionId;
use lodeutil::preferences::Preferences;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::WorkspaceSetup;
use crate::driver::{DriverOutcome, ResolutionDriver};
use crate::error::{BatchStatus, ConfigError, MultiError, RequestFailure};
use crate::host::Host;
use crate::progress::{
    ENGINE_LOAD_LENGTH, MONITOR_LENGTH, NoMonitor, POST_RESOLVE_LENGTH, ProgressMonitor,
};
use crate::request::ResolveRequest;
use crate::sort::sort_descriptors;
use crate::worker::CancellableWorker;

#[derive(Clone)]
pub struct OrchestratorOptions {
    /// Private cache area of the workspace resolver.
    pub workspace_cache: PathBuf,
    pub worker: CancellableWorker,
    /// Progress of the batches started by [`Orchestrator::add_request`].
    pub scheduled_monitor: Arc<dyn ProgressMonitor>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        OrchestratorOptions {
            workspace_cache: lodeutil::lode_dir::workspace_cache(),
            worker: CancellableWorker::default(),
            scheduled_monitor: Arc::new(NoMonitor),
        }
    }
}

struct Inner {
    queue: Mutex<Vec<Arc<ResolveRequest>>>,
    /// Held for the whole of a batch so only one runs at a time.
    run_lock: Mutex<()>,
    host: Arc<dyn Host>,
    preferences: Preferences,
    options: OrchestratorOptions,
    shutdown: CancellationToken,
}

struct Scheduler {
    wake: Sender<()>,
    handle: JoinHandle<()>,
}

/// A request whose engine and descriptor are loaded.
struct Prepared {
    request: Arc<ResolveRequest>,
    engine: Arc<Engine>,
    descriptor: Arc<ModuleDescriptor>,
}

pub struct Orchestrator {
    inner: Arc<Inner>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl Orchestrator {
    pub fn new(host: Arc<dyn Host>, preferences: Preferences) -> Self {
        Self::with_options(host, preferences, OrchestratorOptions::default())
    }

    pub fn with_options(
        host: Arc<dyn Host>,
        preferences: Preferences,
        options: OrchestratorOptions,
    ) -> Self {
        Orchestrator {
            inner: Arc::new(Inner {
                queue: Mutex::new(Vec::new()),
                run_lock: Mutex::new(()),
                host,
                preferences,
                options,
                shutdown: CancellationToken::new(),
            }),
            scheduler: Mutex::new(None),
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.inner.preferences
    }

    /// Queues a request. A batch runs once submissions have been quiet for
    /// the configured delay; failures only show through the host.
    pub fn add_request(&self, request: Arc<ResolveRequest>) {
        if self.inner.shutdown.is_cancelled() {
            warn!("Not queuing {}: the orchestrator is shut down", request);
            return;
        }
        debug!("Queuing {}", request);
        self.inner.enqueue(request);
        let mut scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if scheduler.is_none() {
            let (tx, rx) = mpsc::channel();
            let inner = Arc::clone(&self.inner);
            match std::thread::Builder::new()
                .name("lode resolve scheduler".into())
                .spawn(move || schedule(inner, rx))
            {
                Ok(handle) => *scheduler = Some(Scheduler { wake: tx, handle }),
                Err(e) => {
                    error!("Failed to start the resolve scheduler: {}", e);
                    return;
                }
            }
        }
        if let Some(s) = scheduler.as_ref() {
            let _ = s.wake.send(());
        }
    }

    /// Queues a request for the next batch without scheduling one.
    pub fn queue_request(&self, request: Arc<ResolveRequest>) {
        self.inner.enqueue(request);
    }

    /// Queues a request and runs a batch on the calling thread.
    pub fn launch_request(
        &self,
        request: Arc<ResolveRequest>,
        monitor: Arc<dyn ProgressMonitor>,
        token: &CancellationToken,
    ) -> BatchStatus {
        self.inner.enqueue(request);
        self.inner.run_batch(monitor, token)
    }

    /// Runs whatever is queued right away.
    pub fn run_pending(
        &self,
        monitor: Arc<dyn ProgressMonitor>,
        token: &CancellationToken,
    ) -> BatchStatus {
        self.inner.run_batch(monitor, token)
    }

    pub fn pending(&self) -> usize {
        self.inner
            .queue
            .lock()
            .map(|q| q.len())
            .unwrap_or_default()
    }

    /// Cancels the running batch and stops the scheduler.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Scheduler { wake, handle }) = scheduler {
            drop(wake);
            if handle.join().is_err() {
                warn!("The resolve scheduler panicked");
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn schedule(inner: Arc<Inner>, wake: Receiver<()>) {
    let delay = Duration::from_millis(inner.preferences.resolve_delay_ms);
    while wake.recv().is_ok() {
        // later submissions join the batch until the delay is over
        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match wake.recv_timeout(deadline - now) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
        if inner.shutdown.is_cancelled() {
            return;
        }
        let token = inner.shutdown.child_token();
        let monitor = Arc::clone(&inner.options.scheduled_monitor);
        match inner.run_batch(monitor, &token) {
            BatchStatus::Ok => {}
            BatchStatus::Cancelled => info!("Resolve batch cancelled"),
            BatchStatus::Failed(errors) => error!("{}", errors),
        }
    }
}

impl Inner {
    fn enqueue(&self, request: Arc<ResolveRequest>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }

    fn prepare(&self, request: &ResolveRequest) -> Result<(Arc<Engine>, Arc<ModuleDescriptor>), ConfigError> {
        let workspace = match self.host.workspace() {
            Some(index) if request.in_workspace() => Some(WorkspaceSetup {
                index,
                ignore_version: self.preferences.ignore_version_on_workspace_projects,
                cache_dir: self.options.workspace_cache.clone(),
            }),
            _ => None,
        };
        let mut cache = request
            .cache()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cache.set_workspace(workspace);
        let engine = cache.engine()?;
        let descriptor = cache.descriptor(&engine)?;
        Ok((engine, descriptor))
    }

    fn run_batch(&self, monitor: Arc<dyn ProgressMonitor>, token: &CancellationToken) -> BatchStatus {
        let _running = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        if batch.is_empty() {
            return BatchStatus::Ok;
        }
        info!("Resolving a batch of {} request(s)", batch.len());

        monitor.begin_task("Loading dependency descriptors", MONITOR_LENGTH);
        let load_step = ENGINE_LOAD_LENGTH / batch.len() as u32;
        let mut errors = Vec::new();
        let mut force_fail = false;
        let mut attempted = vec![false; batch.len()];
        let mut prepared = Vec::new();
        for (i, request) in batch.iter().enumerate() {
            if token.is_cancelled() {
                return cancelled(&*monitor);
            }
            request.set_resolve_failed(false);
            request.set_result(None);
            if let Some(project) = request.project() {
                if !self.host.is_accessible(project) {
                    warn!("Skipping {}: the project {} is not accessible", request, project.name);
                    continue;
                }
            }
            attempted[i] = true;
            force_fail |= request.force_fail_on_error();
            match self.prepare(request) {
                Ok((engine, descriptor)) => prepared.push(Prepared {
                    request: Arc::clone(request),
                    engine,
                    descriptor,
                }),
                Err(e) => {
                    warn!("{}", e);
                    let failure = RequestFailure::from_config(request, e);
                    request.set_resolve_failed(true);
                    self.host.set_resolve_status(request, Some(&failure));
                    errors.push(failure);
                }
            }
            monitor.worked(load_step);
        }

        let order = resolve_order(prepared);
        let step = if order.is_empty() {
            0
        } else {
            (MONITOR_LENGTH - ENGINE_LOAD_LENGTH - POST_RESOLVE_LENGTH) / order.len() as u32
        };
        for p in &order {
            if token.is_cancelled() {
                return cancelled(&*monitor);
            }
            let driver = ResolutionDriver::new(
                &p.request,
                Arc::clone(&p.engine),
                Arc::clone(&p.descriptor),
            )
            .with_worker(self.options.worker.clone());
            match driver.run(self.host.as_ref(), Arc::clone(&monitor), step, token) {
                DriverOutcome::Resolved(result) => {
                    p.request.set_result(Some(result));
                    self.host.set_resolve_status(&p.request, None);
                }
                DriverOutcome::Failed(failure, result) => {
                    p.request.set_result(result);
                    p.request.set_resolve_failed(true);
                    self.host.set_resolve_status(&p.request, Some(&failure));
                    errors.push(failure);
                }
                DriverOutcome::Cancelled => return cancelled(&*monitor),
            }
        }

        for (request, attempted) in batch.iter().zip(attempted) {
            if !attempted || request.is_resolve_failed() {
                continue;
            }
            if let Some(hooks) = request.hooks() {
                hooks.post_batch_resolve(request);
            }
        }
        monitor.worked(POST_RESOLVE_LENGTH);
        monitor.done();

        if errors.is_empty() {
            return BatchStatus::Ok;
        }
        if force_fail || self.preferences.error_popup {
            BatchStatus::Failed(MultiError(errors))
        } else {
            warn!("{} request(s) failed to resolve", errors.len());
            BatchStatus::Ok
        }
    }
}

fn cancelled(monitor: &dyn ProgressMonitor) -> BatchStatus {
    info!("Batch cancelled");
    monitor.done();
    BatchStatus::Cancelled
}

/// Workspace requests first, in dependency order, then the others in
/// submission order.
fn resolve_order(prepared: Vec<Prepared>) -> Vec<Prepared> {
    let (workspace, others): (Vec<_>, Vec<_>) =
        prepared.into_iter().partition(|p| p.request.in_workspace());
    let mut order = Vec::with_capacity(workspace.len() + others.len());
    if let Some(first) = workspace.first() {
        let matcher = first.engine.version_matcher();
        let mut groups: IndexMap<ModuleRevisionId, Vec<Prepared>> = IndexMap::new();
        for p in workspace {
            groups.entry(p.descriptor.mrid.clone()).or_default().push(p);
        }
        let descriptors: Vec<_> = groups
            .values()
            .map(|g| Arc::clone(&g[0].descriptor))
            .collect();
        let sorted = sort_descriptors(&descriptors, matcher);
        let mut groups: Vec<Option<Vec<Prepared>>> = groups.into_values().map(Some).collect();
        for i in sorted {
            if let Some(group) = groups[i].take() {
                order.extend(group);
            }
        }
    }
    order.extend(others);
    order
}
