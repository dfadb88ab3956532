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

//! The resolve algorithm: walk the dependency graph, settle one revision per
//! module (the latest one seen wins), download the artifacts into the cache
//! and persist one report per root configuration.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use lodeutil::descriptor::{DependencyDescriptor, ModuleDescriptor};
use lodeutil::module_id::{Artifact, ModuleId, ModuleRevisionId};
use semver::Version;

use crate::engine::Engine;
use crate::error::{EngineError, ResolverError};
use crate::event::{ProgressSink, TransferEvent, TransferPhase};
use crate::report::{
    ArtifactDownloadReport, ConfigurationReport, DependencyNode, DownloadStatus, ResolveReport,
};
use crate::repository::Repository;
use crate::workspace::WorkspaceModule;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub resolve_id: String,
    /// Root configurations; `*` expands to all of them.
    pub confs: Vec<String>,
    pub transitive: bool,
    /// Only look into the cache, never into repositories.
    pub cache_only: bool,
    /// Overrides the `validate` setting when set.
    pub validate: Option<bool>,
}

impl ResolveOptions {
    pub fn new(resolve_id: impl Into<String>) -> Self {
        ResolveOptions {
            resolve_id: resolve_id.into(),
            confs: vec!["*".into()],
            transitive: true,
            cache_only: false,
            validate: None,
        }
    }
}

/// `org-module`, or with `extended`, `org-module-status-branch-revision`.
pub fn resolve_id(md: &ModuleDescriptor, extended: bool) -> String {
    let mut id = format!("{}-{}", md.mrid.organisation(), md.mrid.name());
    if extended {
        id.push('-');
        id.push_str(&md.status);
        id.push('-');
        if let Some(branch) = &md.mrid.branch {
            id.push_str(branch);
        }
        id.push('-');
        id.push_str(&md.mrid.revision.to_string());
    }
    id
}

#[derive(Clone)]
enum Origin {
    Workspace(WorkspaceModule),
    Repository(String),
    Cache,
}

#[derive(Clone)]
struct Found {
    md: Arc<ModuleDescriptor>,
    origin: Origin,
}

type Lookup = Result<ModuleRevisionId, String>;

struct Walk<'a> {
    engine: &'a Engine,
    root: &'a ModuleDescriptor,
    options: &'a ResolveOptions,
    sink: &'a dyn ProgressSink,
    lookups: HashMap<(ModuleId, String), Lookup>,
    found: HashMap<ModuleRevisionId, Found>,
}

impl Walk<'_> {
    /// Looks a dependency up once; later calls reuse the answer.
    fn lookup(&mut self, dep: &DependencyDescriptor) -> Lookup {
        let key = (dep.module.clone(), dep.revision.clone());
        if let Some(res) = self.lookups.get(&key) {
            return res.clone();
        }
        self.sink.on_dependency_start(dep);
        let res = match self.find(dep) {
            Ok(Some(found)) => {
                let mrid = found.md.mrid.clone();
                self.found.insert(mrid.clone(), found);
                Ok(mrid)
            }
            Ok(None) => {
                Err(ResolverError::ModuleMissing(dep.module.clone(), dep.revision.clone())
                    .to_string())
            }
            Err(e) => Err(e.to_string()),
        };
        log::debug!("---- Dependency {} {} -> {:?}", dep.module, dep.revision, res);
        self.sink.on_dependency_end(dep, res.as_ref().ok());
        self.lookups.insert(key, res.clone());
        res
    }

    fn find(&self, dep: &DependencyDescriptor) -> Result<Option<Found>, ResolverError> {
        let matcher = self.engine.version_matcher();
        let constraint = matcher.parse(&dep.revision).map_err(|_| {
            ResolverError::MalformedConstraint(dep.module.clone(), dep.revision.clone())
        })?;
        if let Some(ws) = self.engine.workspace() {
            if let Some(wm) = ws.find(&dep.module, &dep.revision, matcher, self.root.module_id()) {
                return Ok(Some(Found {
                    md: Arc::clone(&wm.descriptor),
                    origin: Origin::Workspace(wm),
                }));
            }
        }
        let best = |repo: &dyn Repository| -> Option<Arc<ModuleDescriptor>> {
            let revisions = repo.all_revisions_of(&dep.module).ok()?;
            revisions
                .iter()
                .rev()
                .find(|(v, _)| constraint.matches(v))
                .map(|(_, md)| Arc::clone(md))
        };
        if self.options.cache_only {
            return Ok(best(self.engine.cache()).map(|md| Found {
                md,
                origin: Origin::Cache,
            }));
        }
        for repo in self.engine.repositories().iter() {
            if let Some(md) = best(repo) {
                return Ok(Some(Found {
                    md,
                    origin: Origin::Repository(repo.name().to_owned()),
                }));
            }
        }
        Ok(None)
    }

    fn descriptor_of(&self, mrid: &ModuleRevisionId) -> Option<Arc<ModuleDescriptor>> {
        if mrid == &self.root.mrid {
            return None;
        }
        self.found.get(mrid).map(|f| Arc::clone(&f.md))
    }
}

/// Expands the configurations requested from `md`. Undeclared ones are
/// reported through `missing`.
fn expand_targets(
    md: &ModuleDescriptor,
    targets: &[String],
    missing: &mut Vec<String>,
) -> Vec<String> {
    let mut res: IndexSet<String> = IndexSet::new();
    for t in targets {
        if t == "*" {
            res.extend(md.configurations.iter().cloned());
        } else if md.has_configuration(t) {
            res.insert(t.clone());
        } else {
            missing.push(
                ResolverError::ConfigurationMissing(md.mrid.to_string(), t.clone()).to_string(),
            );
        }
    }
    res.into_iter().collect()
}

impl Engine {
    pub fn resolve(
        &self,
        md: &ModuleDescriptor,
        options: &ResolveOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ResolveReport, EngineError> {
        let confs = md.expand_confs(&options.confs);
        log::debug!("Begin resolving {} [{}]", md.mrid, confs.join(", "));
        let mut problems: Vec<String> = Vec::new();
        let validate = options.validate.unwrap_or(self.settings().validate);
        let confs: Vec<String> = confs
            .into_iter()
            .filter(|c| {
                let declared = md.has_configuration(c);
                if !declared && validate {
                    problems.push(
                        ResolverError::ConfigurationMissing(md.mrid.to_string(), c.clone())
                            .to_string(),
                    );
                }
                declared
            })
            .collect();

        let mut walk = Walk {
            engine: self,
            root: md,
            options,
            sink,
            lookups: HashMap::new(),
            found: HashMap::new(),
        };

        // Gather every revision reachable through any edge.
        let mut gathered = HashMap::<ModuleId, BTreeSet<Version>>::new();
        let mut working_list: Vec<(Arc<ModuleDescriptor>, String)> = Vec::new();
        let mut visited = HashSet::new();
        let root = Arc::new(md.clone());
        for conf in &confs {
            working_list.push((Arc::clone(&root), conf.clone()));
        }
        while let Some((module, conf)) = working_list.pop() {
            self.check_interrupted()?;
            for (dep, targets) in module.dependencies_for(&conf) {
                if &dep.module == md.module_id() {
                    log::warn!("{} depends on itself through {}", md.mrid, module.mrid);
                    continue;
                }
                let Ok(mrid) = walk.lookup(dep) else {
                    continue;
                };
                gathered
                    .entry(dep.module.clone())
                    .or_default()
                    .insert(mrid.revision.clone());
                if !(options.transitive && dep.transitive) {
                    continue;
                }
                let Some(dep_md) = walk.descriptor_of(&mrid) else {
                    continue;
                };
                for t in expand_targets(&dep_md, &targets, &mut Vec::new()) {
                    if visited.insert((mrid.clone(), t.clone())) {
                        working_list.push((Arc::clone(&dep_md), t));
                    }
                }
            }
        }

        log::debug!("Selecting latest revision of each module");
        let settled: HashMap<ModuleId, Version> = gathered
            .into_iter()
            .filter_map(|(module, revisions)| Some((module, revisions.into_iter().next_back()?)))
            .collect();

        log::debug!("Building dependency graph");
        let mut nodes: IndexMap<ModuleRevisionId, DependencyNode> = IndexMap::new();
        let mut conf_artifacts: BTreeMap<String, IndexSet<Artifact>> = BTreeMap::new();
        for root_conf in &confs {
            conf_artifacts.entry(root_conf.clone()).or_default();
            let mut working_list = vec![(Arc::clone(&root), root_conf.clone())];
            let mut visited = HashSet::new();
            while let Some((module, conf)) = working_list.pop() {
                self.check_interrupted()?;
                for (dep, targets) in module.dependencies_for(&conf) {
                    if &dep.module == md.module_id() {
                        continue;
                    }
                    let Some(revision) = settled.get(&dep.module) else {
                        if let Some(Err(problem)) =
                            walk.lookups.get(&(dep.module.clone(), dep.revision.clone()))
                        {
                            if !problems.contains(problem) {
                                problems.push(problem.clone());
                            }
                        }
                        continue;
                    };
                    let mrid = dep.module.with_revision(revision.clone());
                    let Some(dep_md) = walk.descriptor_of(&mrid) else {
                        continue;
                    };
                    let mut missing = Vec::new();
                    let dep_confs = expand_targets(&dep_md, &targets, &mut missing);
                    for problem in missing {
                        if !problems.contains(&problem) {
                            problems.push(problem);
                        }
                    }

                    let node = nodes.entry(mrid.clone()).or_insert_with(|| DependencyNode {
                        id: mrid.clone(),
                        root_confs: BTreeSet::new(),
                        artifacts: Vec::new(),
                        callers: BTreeSet::new(),
                        in_workspace: matches!(
                            walk.found.get(&mrid).map(|f| &f.origin),
                            Some(Origin::Workspace(_))
                        ),
                    });
                    node.root_confs.insert(root_conf.clone());
                    node.callers.insert(module.mrid.clone());
                    for c in &dep_confs {
                        for artifact in dep_md.artifacts(c) {
                            if !node.artifacts.contains(&artifact) {
                                node.artifacts.push(artifact.clone());
                            }
                            conf_artifacts
                                .entry(root_conf.clone())
                                .or_default()
                                .insert(artifact);
                        }
                    }
                    log::debug!("---- {}[{}] -> {}", module.mrid, conf, mrid);

                    if options.transitive && dep.transitive {
                        for c in dep_confs {
                            if visited.insert((mrid.clone(), c.clone())) {
                                working_list.push((Arc::clone(&dep_md), c));
                            }
                        }
                    }
                }
            }
        }

        let mut report = ResolveReport {
            root: Some(md.mrid.clone()),
            resolve_id: options.resolve_id.clone(),
            confs: confs.clone(),
            ..Default::default()
        };

        let to_fetch: Vec<Artifact> = nodes
            .values()
            .flat_map(|n| n.artifacts.iter().cloned())
            .collect();
        sink.on_prepare_download(&to_fetch);
        let mut adrs: HashMap<Artifact, ArtifactDownloadReport> = HashMap::new();
        for node in nodes.values() {
            let Some(found) = walk.found.get(&node.id) else {
                continue;
            };
            self.cache_descriptor(found);
            for artifact in &node.artifacts {
                self.check_interrupted()?;
                sink.on_artifact_start(artifact);
                let adr = self.fetch(artifact, found, options, sink, &mut report)?;
                if let Some(error) = &adr.error {
                    problems.push(
                        ResolverError::DownloadFailed(format!("{artifact}: {error}")).to_string(),
                    );
                }
                sink.on_artifact_end(&adr);
                report.artifacts.push(adr.clone());
                adrs.insert(artifact.clone(), adr);
            }
        }

        report.problems = problems;
        report.dependencies = nodes.into_values().collect();

        for (conf, artifacts) in &conf_artifacts {
            let conf_report = ConfigurationReport {
                module: md.mrid.clone(),
                conf: conf.clone(),
                resolve_id: options.resolve_id.clone(),
                dependencies: report
                    .dependencies
                    .iter()
                    .filter(|n| n.root_confs.contains(conf))
                    .map(|n| n.id.clone())
                    .collect(),
                artifacts: artifacts.iter().filter_map(|a| adrs.get(a).cloned()).collect(),
                problems: report.problems.clone(),
            };
            conf_report.write(&self.report_path(&options.resolve_id, conf))?;
        }

        if report.has_error() {
            log::warn!("Resolving {} reported problems: {:?}", md.mrid, report.problems);
        }
        log::debug!("Finished resolving {}", md.mrid);
        sink.on_resolve_end(&report);
        Ok(report)
    }

    /// Keeps a copy of resolved descriptors so cache-only resolves can find
    /// them. Workspace descriptors go to the workspace resolver's own cache.
    fn cache_descriptor(&self, found: &Found) {
        let res = match &found.origin {
            Origin::Cache => return,
            Origin::Workspace(_) => match self.workspace() {
                Some(ws) => ws.cache().publish_descriptor(&found.md),
                None => return,
            },
            Origin::Repository(_) => {
                if self.cache().descriptor_path(&found.md.mrid).exists() {
                    return;
                }
                self.cache().publish_descriptor(&found.md)
            }
        };
        if let Err(e) = res {
            log::warn!("Failed to cache descriptor of {}: {:?}", found.md.mrid, e);
        }
    }

    fn fetch(
        &self,
        artifact: &Artifact,
        found: &Found,
        options: &ResolveOptions,
        sink: &dyn ProgressSink,
        report: &mut ResolveReport,
    ) -> Result<ArtifactDownloadReport, EngineError> {
        let mut adr = ArtifactDownloadReport {
            artifact: artifact.clone(),
            status: DownloadStatus::NoDownload,
            local_file: None,
            size: 0,
            origin: None,
            error: None,
        };
        let repo_name = match &found.origin {
            Origin::Workspace(wm) => {
                if let Some(ws) = self.workspace() {
                    report
                        .workspace_artifacts
                        .insert(artifact.clone(), ws.project_report(wm));
                }
                adr.origin = Some(crate::workspace::WorkspaceResolver::NAME.to_owned());
                return Ok(adr);
            }
            Origin::Cache => None,
            Origin::Repository(name) => Some(name.as_str()),
        };

        let cached = self.cache().artifact_path(artifact);
        if cached.is_file() {
            adr.size = cached.metadata().map(|m| m.len()).unwrap_or(0);
            adr.local_file = Some(cached);
            adr.origin = Some(self.cache().name().to_owned());
            return Ok(adr);
        }

        let repo = match repo_name.and_then(|name| self.repositories().get(name)) {
            Some(repo) if !options.cache_only => repo,
            _ => {
                adr.status = DownloadStatus::Failed;
                adr.error = Some("not found in cache".into());
                return Ok(adr);
            }
        };
        adr.origin = Some(repo.name().to_owned());
        match self.download(repo, artifact, &cached, sink)? {
            Some(size) => {
                adr.status = DownloadStatus::Successful;
                adr.size = size;
                adr.local_file = Some(cached);
            }
            None => {
                adr.status = DownloadStatus::Failed;
                adr.error = Some(format!("not found in repository {}", repo.name()));
            }
        }
        Ok(adr)
    }

    fn download(
        &self,
        repo: &dyn Repository,
        artifact: &Artifact,
        dest: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<Option<u64>, EngineError> {
        sink.on_transfer(&TransferEvent {
            artifact,
            phase: TransferPhase::Initiated,
        });
        let Some(mut stream) = repo.open_artifact(artifact)? else {
            return Ok(None);
        };
        sink.on_transfer(&TransferEvent {
            artifact,
            phase: TransferPhase::Started { total: stream.len },
        });
        log::info!("Downloading {} from {}", artifact, repo.name());

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(EngineError::io(parent))?;
        }
        let part = dest.with_file_name(format!("{}.part", artifact.file_name()));
        let mut file = File::create(&part).map_err(EngineError::io(&part))?;
        let mut buf = vec![0; CHUNK_SIZE];
        let mut transferred = 0u64;
        loop {
            if let Err(e) = self.check_interrupted() {
                drop(file);
                let _ = std::fs::remove_file(&part);
                return Err(e);
            }
            let n = stream.reader.read(&mut buf).map_err(EngineError::io(&part))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).map_err(EngineError::io(&part))?;
            transferred += n as u64;
            sink.on_transfer(&TransferEvent {
                artifact,
                phase: TransferPhase::Progress {
                    transferred,
                    total: stream.len,
                },
            });
        }
        drop(file);
        std::fs::rename(&part, dest).map_err(EngineError::io(dest))?;
        sink.on_transfer(&TransferEvent {
            artifact,
            phase: TransferPhase::Completed { transferred },
        });
        Ok(Some(transferred))
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::event::NoProgress;
    use crate::repository::RepositoryList;
    use crate::repository::mock::{MockRepository, create_mock_module};
    use crate::settings::{SettingsLoader, SettingsSource};

    fn create_engine(cache: &Path, repo: MockRepository) -> Engine {
        let settings = SettingsLoader::new()
            .user_cache(cache)
            .load(SettingsSource::Default)
            .unwrap();
        Engine::with_repositories(settings, RepositoryList::with_repository(Box::new(repo)))
    }

    fn create_mock_repository() -> MockRepository {
        let mut repo = MockRepository::new();
        repo.add_module_full("acme#lib", "1.0.0", [])
            .add_module_full("acme#lib", "1.1.0", [])
            .add_module_full("acme#util", "1.0.0", [("acme#lib", "^1.1")]);
        repo
    }

    #[test]
    fn latest_revision_wins() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path(), create_mock_repository());
        let app = create_mock_module("acme#app", "0.1.0", [("acme#lib", "=1.0.0"), ("acme#util", "^1.0")]);
        let report = engine
            .resolve(&app, &ResolveOptions::new("acme-app"), &NoProgress)
            .unwrap();
        assert!(report.problems.is_empty(), "{:?}", report.problems);

        let mut ids: Vec<String> = report.dependencies.iter().map(|n| n.id.to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["acme#lib;1.1.0", "acme#util;1.0.0"]);

        let lib = report
            .artifacts
            .iter()
            .find(|a| a.artifact.name == "lib")
            .unwrap();
        assert_eq!(lib.status, DownloadStatus::Successful);
        let content = std::fs::read_to_string(lib.local_file.as_ref().unwrap()).unwrap();
        assert_eq!(content, "acme#lib;1.1.0");

        let persisted = engine.read_report("acme-app", "default").unwrap();
        assert_eq!(persisted.artifacts.len(), 2);
        assert_eq!(persisted.dependencies.len(), 2);

        // second time everything comes from the cache
        let again = engine
            .resolve(&app, &ResolveOptions::new("acme-app"), &NoProgress)
            .unwrap();
        assert!(again.artifacts.iter().all(|a| a.status == DownloadStatus::NoDownload));
    }

    #[test]
    fn missing_module_is_a_problem() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path(), create_mock_repository());
        let app = create_mock_module("acme#app", "0.1.0", [("acme#nope", "^1.0"), ("acme#lib", "^1.0")]);
        let report = engine
            .resolve(&app, &ResolveOptions::new("acme-app"), &NoProgress)
            .unwrap();
        expect_test::expect![[r#"
            [
                "unresolved dependency: acme#nope;^1.0: not found",
            ]
        "#]]
        .assert_debug_eq(&report.problems);
        assert_eq!(report.artifacts.len(), 1);
    }

    #[test]
    fn undeclared_root_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path(), create_mock_repository());
        let app = create_mock_module("acme#app", "0.1.0", []);
        let mut options = ResolveOptions::new("acme-app");
        options.confs = vec!["test".into()];
        let report = engine.resolve(&app, &options, &NoProgress).unwrap();
        assert_eq!(
            report.problems,
            vec!["configuration not found in acme#app;0.1.0: 'test'"]
        );
    }

    #[test]
    fn cache_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path(), create_mock_repository());
        let app = create_mock_module("acme#app", "0.1.0", [("acme#util", "^1.0")]);
        let mut options = ResolveOptions::new("acme-app");
        options.cache_only = true;

        let offline = engine.resolve(&app, &options, &NoProgress).unwrap();
        assert!(offline.has_error());

        let online = engine
            .resolve(&app, &ResolveOptions::new("acme-app"), &NoProgress)
            .unwrap();
        assert!(!online.has_error());

        let offline = engine.resolve(&app, &options, &NoProgress).unwrap();
        assert!(!offline.has_error(), "{:?}", offline.problems);
        assert_eq!(offline.dependencies.len(), 2);
    }

    #[test]
    fn non_transitive() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path(), create_mock_repository());
        let app = create_mock_module("acme#app", "0.1.0", [("acme#util", "^1.0")]);
        let mut options = ResolveOptions::new("acme-app");
        options.transitive = false;
        let report = engine.resolve(&app, &options, &NoProgress).unwrap();
        assert_eq!(report.dependencies.len(), 1);
        assert_eq!(report.dependencies[0].id.to_string(), "acme#util;1.0.0");
    }

    #[test]
    fn interrupted_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path(), create_mock_repository());
        let app = create_mock_module("acme#app", "0.1.0", [("acme#lib", "^1.0")]);
        engine.interrupt(std::thread::current().id());
        let res = engine.resolve(&app, &ResolveOptions::new("acme-app"), &NoProgress);
        assert!(matches!(res, Err(EngineError::Interrupted)));
        // the interrupt is consumed
        assert!(engine.check_interrupted().is_ok());
    }

    #[test]
    fn resolve_ids() {
        let mut app = create_mock_module("acme#app", "0.1.0", []);
        assert_eq!(resolve_id(&app, false), "acme-app");
        assert_eq!(resolve_id(&app, true), "acme-app-release--0.1.0");
        app.mrid.branch = Some("main".into());
        assert_eq!(resolve_id(&app, true), "acme-app-release-main-0.1.0");
    }
}
