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

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::EngineCache;
use crate::result::ResolveResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectRef {
    pub name: String,
    pub location: PathBuf,
}

impl ProjectRef {
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        ProjectRef {
            name: name.into(),
            location: location.into(),
        }
    }

    /// Names the project after the last component of its location.
    pub fn from_location(location: &Path) -> Self {
        let location = dunce::canonicalize(location).unwrap_or_else(|_| location.to_owned());
        let name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| location.display().to_string());
        ProjectRef { name, location }
    }
}

/// Where the settings of a request come from. Paths are raw user input,
/// resolved against the project when the engine is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSetup {
    /// Empty means the default settings.
    pub settings_path: String,
    /// Reuse the engine while the settings file is unmodified.
    pub load_on_demand: bool,
    /// Overrides the artifact cache directory when not empty.
    pub user_cache: String,
    pub property_files: Vec<String>,
}

impl Default for SettingsSetup {
    fn default() -> Self {
        SettingsSetup {
            settings_path: String::new(),
            load_on_demand: true,
            user_cache: String::new(),
            property_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveSetup {
    pub pattern: String,
    pub sync: bool,
    /// Comma separated artifact types, `*` for all.
    pub types: String,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub descriptor_path: String,
    pub confs: Vec<String>,
    pub project: Option<ProjectRef>,
    pub settings: SettingsSetup,
    pub use_previous: bool,
    pub cache_only: bool,
    pub transitive: bool,
    pub extended_resolve_id: bool,
    pub retrieve: Option<RetrieveSetup>,
}

impl ResolverConfig {
    pub fn new(descriptor_path: impl Into<String>) -> Self {
        ResolverConfig {
            descriptor_path: descriptor_path.into(),
            confs: vec!["*".into()],
            project: None,
            settings: SettingsSetup::default(),
            use_previous: false,
            cache_only: false,
            transitive: true,
            extended_resolve_id: false,
            retrieve: None,
        }
    }

    /// Resolves the descriptor at the root of `project`.
    pub fn for_project(project: ProjectRef) -> Self {
        let mut config = Self::new(lodeutil::common::DESCRIPTOR_FILE);
        config.project = Some(project);
        config
    }
}

/// Callbacks into whoever consumes resolve results.
pub trait ResolveHooks: Send + Sync {
    /// Runs after a successful resolve and retrieve of the request.
    fn post_resolve(&self, _request: &ResolveRequest, _result: &ResolveResult) {}

    /// Runs once per batch for every request that didn't fail.
    fn post_batch_resolve(&self, _request: &ResolveRequest) {}
}

/// One unit of work for the orchestrator.
pub struct ResolveRequest {
    config: ResolverConfig,
    cache: Arc<Mutex<EngineCache>>,
    in_workspace: AtomicBool,
    force_fail_on_error: AtomicBool,
    resolve_failed: AtomicBool,
    result: Mutex<Option<Arc<ResolveResult>>>,
    hooks: Option<Arc<dyn ResolveHooks>>,
}

impl ResolveRequest {
    /// `cache` is usually shared by every request of the same project.
    pub fn new(config: ResolverConfig, cache: Arc<Mutex<EngineCache>>) -> Self {
        ResolveRequest {
            config,
            cache,
            in_workspace: AtomicBool::new(false),
            force_fail_on_error: AtomicBool::new(false),
            resolve_failed: AtomicBool::new(false),
            result: Mutex::new(None),
            hooks: None,
        }
    }

    /// A request with a cache of its own.
    pub fn with_own_cache(config: ResolverConfig) -> Self {
        let cache = Arc::new(Mutex::new(EngineCache::new(&config)));
        Self::new(config, cache)
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ResolveHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn project(&self) -> Option<&ProjectRef> {
        self.config.project.as_ref()
    }

    pub fn cache(&self) -> &Arc<Mutex<EngineCache>> {
        &self.cache
    }

    pub fn hooks(&self) -> Option<&dyn ResolveHooks> {
        self.hooks.as_deref()
    }

    pub fn in_workspace(&self) -> bool {
        self.in_workspace.load(Ordering::SeqCst)
    }

    pub fn set_in_workspace(&self, in_workspace: bool) {
        self.in_workspace.store(in_workspace, Ordering::SeqCst);
    }

    pub fn force_fail_on_error(&self) -> bool {
        self.force_fail_on_error.load(Ordering::SeqCst)
    }

    pub fn set_force_fail_on_error(&self, force: bool) {
        self.force_fail_on_error.store(force, Ordering::SeqCst);
    }

    pub fn is_resolve_failed(&self) -> bool {
        self.resolve_failed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_resolve_failed(&self, failed: bool) {
        self.resolve_failed.store(failed, Ordering::SeqCst);
    }

    /// The result of the last batch this request took part in, if it got
    /// that far.
    pub fn result(&self) -> Option<Arc<ResolveResult>> {
        self.result.lock().ok().and_then(|r| r.clone())
    }

    pub(crate) fn set_result(&self, result: Option<Arc<ResolveResult>>) {
        if let Ok(mut slot) = self.result.lock() {
            *slot = result;
        }
    }
}

impl std::fmt::Display for ResolveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}] in ",
            self.config.descriptor_path,
            self.config.confs.join(",")
        )?;
        match &self.config.project {
            Some(project) => f.write_str(&project.name),
            None => f.write_str("<no project>"),
        }
    }
}

impl std::fmt::Debug for ResolveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveRequest")
            .field("request", &self.to_string())
            .field("in_workspace", &self.in_workspace())
            .field("resolve_failed", &self.is_resolve_failed())
            .finish()
    }
}
