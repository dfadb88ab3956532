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

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use expect_test::expect;
use lode_test_util::{ModuleSpec, TestDir, write_settings};
use lodecake::workspace::WorkspaceIndex;
use lodecore::driver::UNSAFE_RETRIEVE_ROOT;
use lodecore::progress::{NoMonitor, ProgressMonitor};
use lodecore::worker::CancellableWorker;
use lodecore::{
    BatchStatus, FailureKind, Host, Orchestrator, OrchestratorOptions, ProjectRef,
    ProjectsWorkspace, RequestFailure, ResolveHooks, ResolveRequest, ResolveResult,
    ResolverConfig, RetrieveSetup,
};
use lodeutil::preferences::Preferences;
use test_log::test;
use tokio_util::sync::CancellationToken;

/// A repository, a cache and a settings file shared by every project of a test.
struct Env {
    dir: TestDir,
    settings: PathBuf,
}

impl Env {
    fn new() -> Self {
        let dir = TestDir::new_empty();
        let repo = dir.mkdir("repo");
        let settings = dir.join("lodesettings.json");
        write_settings(&settings, &dir.join("cache"), &[("local", &repo)]).unwrap();
        ModuleSpec::new("acme#lib;1.0.0").jar().publish(&repo).unwrap();
        ModuleSpec::new("acme#lib;1.1.0")
            .conf("sources")
            .publication("lib", "jar", "jar", &["default"])
            .publication("lib", "source", "zip", &["sources"])
            .publish(&repo)
            .unwrap();
        ModuleSpec::new("acme#util;0.1.0").jar().publish(&repo).unwrap();
        Env { dir, settings }
    }

    fn project(&self, name: &str, spec: ModuleSpec) -> ProjectRef {
        let location = self.dir.mkdir(name);
        spec.write_project(&location).unwrap();
        ProjectRef::new(name, location)
    }

    fn config(&self, project: &ProjectRef) -> ResolverConfig {
        let mut config = ResolverConfig::for_project(project.clone());
        config.settings.settings_path = self.settings.display().to_string();
        config
    }

    fn request(&self, project: &ProjectRef, hooks: &Arc<Recorder>) -> Arc<ResolveRequest> {
        Arc::new(ResolveRequest::with_own_cache(self.config(project)).with_hooks(hooks.clone()))
    }

    fn orchestrator(&self, host: Arc<dyn Host>, preferences: Preferences) -> Orchestrator {
        self.orchestrator_with(host, preferences, Arc::new(NoMonitor))
    }

    fn orchestrator_with(
        &self,
        host: Arc<dyn Host>,
        preferences: Preferences,
        scheduled_monitor: Arc<dyn ProgressMonitor>,
    ) -> Orchestrator {
        Orchestrator::with_options(
            host,
            preferences,
            OrchestratorOptions {
                workspace_cache: self.dir.join("workspace-cache"),
                worker: CancellableWorker::with_poll_interval(Duration::from_millis(10)),
                scheduled_monitor,
            },
        )
    }
}

/// Counts the batches that actually started.
#[derive(Default)]
struct BatchCounter {
    batches: AtomicUsize,
}

impl ProgressMonitor for BatchCounter {
    fn begin_task(&self, _name: &str, _total_work: u32) {
        self.batches.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records hook calls in the order they happen.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ResolveHooks for Recorder {
    fn post_resolve(&self, request: &ResolveRequest, _result: &ResolveResult) {
        let name = request.project().unwrap().name.clone();
        self.calls.lock().unwrap().push(format!("resolved {name}"));
    }

    fn post_batch_resolve(&self, request: &ResolveRequest) {
        let name = request.project().unwrap().name.clone();
        self.calls.lock().unwrap().push(format!("batch {name}"));
    }
}

#[derive(Default)]
struct TestHost {
    closed: HashSet<String>,
    workspace: Option<Arc<ProjectsWorkspace>>,
    statuses: Mutex<Vec<(String, Option<String>)>>,
    refreshed: Mutex<Vec<PathBuf>>,
    /// Cancelled once a request succeeds.
    cancel_on_success: Option<CancellationToken>,
}

impl Host for TestHost {
    fn is_accessible(&self, project: &ProjectRef) -> bool {
        !self.closed.contains(&project.name)
    }

    fn set_resolve_status(&self, request: &ResolveRequest, failure: Option<&RequestFailure>) {
        let name = request.project().unwrap().name.clone();
        self.statuses
            .lock()
            .unwrap()
            .push((name, failure.map(|f| f.message.clone())));
        if let (None, Some(token)) = (failure, &self.cancel_on_success) {
            token.cancel();
        }
    }

    fn refresh(&self, dir: &Path) {
        self.refreshed.lock().unwrap().push(dir.to_owned());
    }

    fn workspace(&self) -> Option<Arc<dyn WorkspaceIndex>> {
        self.workspace
            .clone()
            .map(|ws| ws as Arc<dyn WorkspaceIndex>)
    }
}

fn tree(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walk(dir);
    files.sort();
    files
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut res = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            res.extend(walk(&path));
        }
        res.push(path);
    }
    res
}

#[test]
fn resolves_published_dependencies() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let app = env.project(
        "app",
        ModuleSpec::new("acme#app;1.0.0").dep_conf("acme#lib", "^1.0", "default->default"),
    );
    let request = env.request(&app, &hooks);
    let host = Arc::new(TestHost::default());
    let orchestrator = env.orchestrator(host.clone(), Preferences::default());

    let status =
        orchestrator.launch_request(request.clone(), Arc::new(NoMonitor), &CancellationToken::new());
    assert!(status.is_ok(), "{status:?}");
    assert!(!request.is_resolve_failed());

    let result = request.result().unwrap();
    assert!(!result.is_previous_used());
    assert_eq!(result.resolve_id(), "acme-app");
    let reports: Vec<_> = result.artifact_reports().collect();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].artifact.to_string(), "acme#lib;1.1.0!lib.jar(jar)");
    let local = reports[0].local_file.as_ref().unwrap();
    assert_eq!(std::fs::read_to_string(local).unwrap(), "acme#lib;1.1.0");

    let jar = &reports[0].artifact;
    let sources = result.companions(jar, &["source"]);
    assert_eq!(sources.len(), 1);

    assert_eq!(hooks.calls(), vec!["resolved app", "batch app"]);
    assert_eq!(*host.statuses.lock().unwrap(), vec![("app".to_owned(), None)]);
}

#[test]
fn partial_failure() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let good = env.project("good", ModuleSpec::new("acme#good;1.0.0").dep("acme#util", "*"));
    let missing = env.project(
        "missing",
        ModuleSpec::new("acme#missing;1.0.0").dep("acme#nowhere", "1.0.0"),
    );
    let misconfigured = env.project("misconfigured", ModuleSpec::new("acme#mis;1.0.0"));

    let good = env.request(&good, &hooks);
    let missing = env.request(&missing, &hooks);
    let mut config = env.config(&misconfigured);
    config.settings.settings_path = "no-such-settings.json".into();
    let misconfigured = Arc::new(ResolveRequest::with_own_cache(config).with_hooks(hooks.clone()));
    misconfigured.set_force_fail_on_error(true);

    let host = Arc::new(TestHost::default());
    let orchestrator = env.orchestrator(host.clone(), Preferences::default());
    orchestrator.queue_request(misconfigured.clone());
    orchestrator.queue_request(missing.clone());
    let status = orchestrator.launch_request(good.clone(), Arc::new(NoMonitor), &CancellationToken::new());

    let errors = match status {
        BatchStatus::Failed(errors) => errors,
        other => panic!("expected a failed batch, got {other:?}"),
    };
    assert_eq!(errors.len(), 2);
    let kinds: Vec<_> = errors.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![FailureKind::Configuration, FailureKind::Resolution]);
    assert_eq!(
        errors.to_string(),
        "Some projects fail to be resolved\n\
         lode.json[*] in misconfigured: Settings file not found\n\
         lode.json[*] in missing: Impossible to resolve dependencies of acme#missing;1.0.0\n\
         \tunresolved dependency: acme#nowhere;1.0.0: not found\n"
    );
    expect!["Settings file not found"].assert_eq(&errors.iter().next().unwrap().message);

    assert!(misconfigured.is_resolve_failed());
    assert!(misconfigured.result().is_none());
    assert!(missing.is_resolve_failed());
    assert!(missing.result().unwrap().is_failed());
    assert!(!good.is_resolve_failed());
    let good_result = good.result().unwrap();
    assert_eq!(good_result.artifact_reports().count(), 1);
    assert_eq!(
        good_result.artifacts_by_dependency().keys().map(|k| k.to_string()).collect::<Vec<_>>(),
        vec!["acme#util;0.1.0"]
    );

    assert_eq!(hooks.calls(), vec!["resolved good", "batch good"]);
    assert_eq!(host.statuses.lock().unwrap().len(), 3);
}

#[test]
fn errors_are_swallowed_unless_asked_for() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let missing = env.project(
        "missing",
        ModuleSpec::new("acme#missing;1.0.0").dep("acme#nowhere", "1.0.0"),
    );
    let request = env.request(&missing, &hooks);
    let host = Arc::new(TestHost::default());

    let orchestrator = env.orchestrator(host.clone(), Preferences::default());
    let status =
        orchestrator.launch_request(request.clone(), Arc::new(NoMonitor), &CancellationToken::new());
    assert!(status.is_ok());
    assert!(request.is_resolve_failed());
    assert!(host.statuses.lock().unwrap()[0].1.is_some());

    let popup = Preferences {
        error_popup: true,
        ..Preferences::default()
    };
    let orchestrator = env.orchestrator(host, popup);
    let status = orchestrator.launch_request(request, Arc::new(NoMonitor), &CancellationToken::new());
    assert!(matches!(status, BatchStatus::Failed(e) if e.len() == 1));
}

#[test]
fn workspace_dependencies_resolve_first() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let app = env.project(
        "app",
        ModuleSpec::new("acme#app;1.0.0").dep("acme#lib", "^2.0").jar(),
    );
    let lib = env.project(
        "lib",
        ModuleSpec::new("acme#lib;2.0.0").dep("acme#util", "*").jar(),
    );
    let host = Arc::new(TestHost {
        workspace: Some(Arc::new(ProjectsWorkspace::new(vec![app.clone(), lib.clone()]))),
        ..Default::default()
    });

    let r1 = env.request(&app, &hooks);
    let r2 = env.request(&lib, &hooks);
    r1.set_in_workspace(true);
    r2.set_in_workspace(true);

    let orchestrator = env.orchestrator(host.clone(), Preferences::default());
    orchestrator.queue_request(r1.clone());
    let status = orchestrator.launch_request(r2.clone(), Arc::new(NoMonitor), &CancellationToken::new());
    assert!(status.is_ok(), "{status:?}");

    assert_eq!(
        hooks.calls(),
        vec!["resolved lib", "resolved app", "batch app", "batch lib"]
    );

    let app_result = r1.result().unwrap();
    let kinds: Vec<_> = app_result
        .artifact_reports()
        .map(|r| (r.artifact.kind.clone(), r.local_file.clone()))
        .collect();
    assert!(kinds.contains(&("project".to_owned(), Some(lib.location.clone()))));
    // the published util jar still comes from the repository
    assert!(kinds.iter().any(|(kind, file)| kind == "jar" && file.is_some()));
    assert!(r2.result().unwrap().artifact_reports().count() == 1);
}

#[test]
fn cancellation_aborts_the_rest_of_the_batch() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let token = CancellationToken::new();
    let host = Arc::new(TestHost {
        cancel_on_success: Some(token.clone()),
        ..Default::default()
    });
    let requests: Vec<_> = ["one", "two", "three"]
        .into_iter()
        .map(|name| {
            let project = env.project(
                name,
                ModuleSpec::new(&format!("acme#{name};1.0.0")).dep("acme#util", "*"),
            );
            env.request(&project, &hooks)
        })
        .collect();

    let orchestrator = env.orchestrator(host.clone(), Preferences::default());
    orchestrator.queue_request(requests[0].clone());
    orchestrator.queue_request(requests[1].clone());
    let status = orchestrator.launch_request(requests[2].clone(), Arc::new(NoMonitor), &token);

    assert!(status.is_cancelled());
    assert!(requests[0].result().is_some());
    assert!(requests[1].result().is_none());
    assert!(requests[2].result().is_none());
    assert_eq!(hooks.calls(), vec!["resolved one"]);
    assert_eq!(orchestrator.pending(), 0);
}

#[test]
fn previous_reports_are_reused_when_complete() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let app = env.project(
        "app",
        ModuleSpec::new("acme#app;1.0.0")
            .conf("test")
            .dep_conf("acme#lib", "1.0.0", "default->default")
            .dep_conf("acme#util", "*", "test->default"),
    );
    let host = Arc::new(TestHost::default());
    let orchestrator = env.orchestrator(host, Preferences::default());

    let mut config = env.config(&app);
    config.confs = vec!["default".into()];
    let first = Arc::new(ResolveRequest::with_own_cache(config));
    assert!(
        orchestrator
            .launch_request(first, Arc::new(NoMonitor), &CancellationToken::new())
            .is_ok()
    );

    // the report of `test` is missing
    let mut config = env.config(&app);
    config.use_previous = true;
    let second = Arc::new(ResolveRequest::with_own_cache(config.clone()));
    let status =
        orchestrator.launch_request(second.clone(), Arc::new(NoMonitor), &CancellationToken::new());
    assert!(status.is_ok(), "{status:?}");
    let result = second.result().unwrap();
    assert!(!result.is_previous_used());
    assert_eq!(result.confs(), ["default", "test"]);
    assert_eq!(result.artifact_reports().count(), 2);

    let third = Arc::new(ResolveRequest::with_own_cache(config).with_hooks(hooks.clone()));
    let status =
        orchestrator.launch_request(third.clone(), Arc::new(NoMonitor), &CancellationToken::new());
    assert!(status.is_ok(), "{status:?}");
    let result = third.result().unwrap();
    assert!(result.is_previous_used());
    assert_eq!(result.artifact_reports().count(), 2);
    assert_eq!(result.artifacts_by_dependency().len(), 2);
}

fn assert_sync_retrieve_refused(pattern: &str) {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let app = env.project("app", ModuleSpec::new("acme#app;1.0.0").dep("acme#util", "*"));
    std::fs::write(app.location.join("Main.java"), "class Main {}").unwrap();
    let before = tree(&app.location);

    let mut config = env.config(&app);
    config.retrieve = Some(RetrieveSetup {
        pattern: pattern.into(),
        sync: true,
        types: "*".into(),
    });
    let request = Arc::new(ResolveRequest::with_own_cache(config).with_hooks(hooks.clone()));
    request.set_force_fail_on_error(true);
    let host = Arc::new(TestHost::default());
    let orchestrator = env.orchestrator(host.clone(), Preferences::default());
    let status =
        orchestrator.launch_request(request.clone(), Arc::new(NoMonitor), &CancellationToken::new());

    let errors = match status {
        BatchStatus::Failed(errors) => errors,
        other => panic!("expected a refusal for {pattern}, got {other:?}"),
    };
    let failure = errors.iter().next().unwrap();
    assert_eq!(failure.kind, FailureKind::Retrieve);
    assert_eq!(failure.message, UNSAFE_RETRIEVE_ROOT);
    assert!(request.is_resolve_failed());
    assert_eq!(tree(&app.location), before);
    assert!(!app.location.join("lib").exists());
    assert!(host.refreshed.lock().unwrap().is_empty());
    assert!(hooks.calls().is_empty());
}

#[test]
fn sync_retrieve_into_project_root_is_refused() {
    assert_sync_retrieve_refused("[artifact]-[revision].[ext]");
}

#[test]
fn sync_retrieve_climbing_back_to_the_root_is_refused() {
    assert_sync_retrieve_refused("lib/../[artifact]-[revision].[ext]");
    assert_sync_retrieve_refused("lib/./sub/../../[artifact]-[revision].[ext]");
}

#[test]
fn retrieve_into_sub_folder() {
    let env = Env::new();
    let app = env.project("app", ModuleSpec::new("acme#app;1.0.0").dep("acme#util", "*"));
    std::fs::create_dir_all(app.location.join("lib")).unwrap();
    std::fs::write(app.location.join("lib/stale.jar"), "stale").unwrap();

    let mut config = env.config(&app);
    config.retrieve = Some(RetrieveSetup {
        pattern: "lib/[artifact]-[revision].[ext]".into(),
        sync: true,
        types: "jar".into(),
    });
    let request = Arc::new(ResolveRequest::with_own_cache(config));
    let host = Arc::new(TestHost::default());
    let orchestrator = env.orchestrator(host.clone(), Preferences::default());
    let status =
        orchestrator.launch_request(request.clone(), Arc::new(NoMonitor), &CancellationToken::new());
    assert!(status.is_ok(), "{status:?}");

    let retrieved_file = app.location.join("lib/util-0.1.0.jar");
    assert_eq!(std::fs::read_to_string(&retrieved_file).unwrap(), "acme#util;0.1.0");
    assert!(!app.location.join("lib/stale.jar").exists());
    assert!(app.location.join(lodeutil::common::DESCRIPTOR_FILE).exists());

    let result = request.result().unwrap();
    let retrieved = result.retrieved().unwrap();
    assert_eq!(retrieved.len(), 1);
    let dests = retrieved.values().next().unwrap();
    assert!(dests.contains(&retrieved_file));
    assert_eq!(
        *host.refreshed.lock().unwrap(),
        vec![app.location.join("lib")]
    );
}

#[test]
fn inaccessible_projects_are_skipped() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let open = env.project("open", ModuleSpec::new("acme#open;1.0.0"));
    let closed = env.project("closed", ModuleSpec::new("acme#closed;1.0.0"));
    let host = Arc::new(TestHost {
        closed: HashSet::from(["closed".to_owned()]),
        ..Default::default()
    });
    let open = env.request(&open, &hooks);
    let closed = env.request(&closed, &hooks);

    let orchestrator = env.orchestrator(host.clone(), Preferences::default());
    orchestrator.queue_request(closed.clone());
    let status = orchestrator.launch_request(open.clone(), Arc::new(NoMonitor), &CancellationToken::new());
    assert!(status.is_ok());
    assert!(closed.result().is_none());
    assert!(!closed.is_resolve_failed());
    assert!(open.result().is_some());
    assert_eq!(hooks.calls(), vec!["resolved open", "batch open"]);
    assert_eq!(*host.statuses.lock().unwrap(), vec![("open".to_owned(), None)]);
}

#[test]
fn queued_requests_share_one_batch() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let app = env.project("app", ModuleSpec::new("acme#app;1.0.0").dep("acme#util", "*"));
    let lib = env.project("lib", ModuleSpec::new("acme#lib;3.0.0"));
    let preferences = Preferences {
        resolve_delay_ms: 200,
        ..Preferences::default()
    };
    let host = Arc::new(TestHost::default());
    let counter = Arc::new(BatchCounter::default());
    let orchestrator = env.orchestrator_with(host.clone(), preferences, counter.clone());
    let app = env.request(&app, &hooks);
    let lib = env.request(&lib, &hooks);
    orchestrator.add_request(app.clone());
    orchestrator.add_request(lib.clone());
    assert_eq!(counter.batches.load(Ordering::SeqCst), 0);

    for _ in 0..500 {
        if hooks.calls().iter().filter(|c| c.starts_with("batch")).count() == 2 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    // leave room for a stray second batch to show up
    std::thread::sleep(Duration::from_millis(300));
    assert!(app.result().is_some());
    assert!(lib.result().is_some());
    assert_eq!(hooks.calls().iter().filter(|c| c.starts_with("batch")).count(), 2);
    assert_eq!(counter.batches.load(Ordering::SeqCst), 1);
}

#[test]
fn requests_after_shutdown_are_dropped() {
    let env = Env::new();
    let hooks = Arc::new(Recorder::default());
    let app = env.project("app", ModuleSpec::new("acme#app;1.0.0"));
    let orchestrator = env.orchestrator(Arc::new(TestHost::default()), Preferences::default());
    orchestrator.shutdown();
    orchestrator.add_request(env.request(&app, &hooks));
    assert_eq!(orchestrator.pending(), 0);
    std::thread::sleep(Duration::from_millis(50));
    assert!(hooks.calls().is_empty());
}
