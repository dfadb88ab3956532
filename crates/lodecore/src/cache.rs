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

//! Caches the engine built from a request's settings, and the descriptor it
//! parsed, across resolves of the same project.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use lodecake::Engine;
use lodecake::settings::{SettingsLoader, SettingsSource};
use lodecake::workspace::{WorkspaceIndex, WorkspaceResolver};
use lodeutil::common::DescriptorFormatErrorKind;
use lodeutil::descriptor::ModuleDescriptor;
use lodeutil::path::ResolvedPath;
use lodeutil::variables::Variables;
use tracing::{debug, info};
use url::Url;

use crate::error::{ConfigError, ConfigErrorKind};
use crate::request::{ProjectRef, ResolverConfig, SettingsSetup};

/// What the cached engine was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SettingsStamp {
    Never,
    Default,
    /// Remote settings carry no modification time and are never refreshed.
    Remote(Url),
    Modified(PathBuf, SystemTime),
}

#[derive(Clone)]
pub struct WorkspaceSetup {
    pub index: Arc<dyn WorkspaceIndex>,
    pub ignore_version: bool,
    pub cache_dir: PathBuf,
}

impl WorkspaceSetup {
    pub fn new(index: Arc<dyn WorkspaceIndex>) -> Self {
        WorkspaceSetup {
            index,
            ignore_version: false,
            cache_dir: lodeutil::lode_dir::workspace_cache(),
        }
    }

    fn same_as(&self, other: &WorkspaceSetup) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.index), Arc::as_ptr(&other.index))
            && self.ignore_version == other.ignore_version
            && self.cache_dir == other.cache_dir
    }
}

pub struct EngineCache {
    project: Option<ProjectRef>,
    setup: SettingsSetup,
    descriptor_path: String,
    workspace: Option<WorkspaceSetup>,
    engine: Option<Arc<Engine>>,
    stamp: SettingsStamp,
    descriptor: Option<Arc<ModuleDescriptor>>,
}

impl EngineCache {
    pub fn new(config: &ResolverConfig) -> Self {
        EngineCache {
            project: config.project.clone(),
            setup: config.settings.clone(),
            descriptor_path: config.descriptor_path.clone(),
            workspace: None,
            engine: None,
            stamp: SettingsStamp::Never,
            descriptor: None,
        }
    }

    /// Sets the workspace the engine resolves against. A change drops the
    /// cached engine.
    pub fn set_workspace(&mut self, workspace: Option<WorkspaceSetup>) {
        let same = match (&self.workspace, &workspace) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_as(b),
            _ => false,
        };
        if !same {
            self.workspace = workspace;
            self.reset();
        }
    }

    pub fn has_workspace(&self) -> bool {
        self.workspace.is_some()
    }

    /// Forgets everything. The next [`EngineCache::engine`] call rebuilds.
    pub fn reset(&mut self) {
        debug!("Resetting engine cache of {}", self);
        self.engine = None;
        self.stamp = SettingsStamp::Never;
        self.descriptor = None;
    }

    /// Drops the parsed descriptor but keeps the engine.
    pub fn forget_descriptor(&mut self) {
        self.descriptor = None;
    }

    /// The engine for the current settings, rebuilt when they changed.
    pub fn engine(&mut self) -> Result<Arc<Engine>, ConfigError> {
        let context = format!("Error while resolving the engine for {self}");
        self.load_engine().map_err(|e| e.contextualize(&context))
    }

    fn load_engine(&mut self) -> Result<Arc<Engine>, ConfigError> {
        let project_dir = self.project.as_ref().map(|p| p.location.as_path());
        let settings_path =
            ResolvedPath::resolve(&self.setup.settings_path, project_dir, &Variables::new())
                .map_err(|e| {
                    ConfigError::new(
                        ConfigErrorKind::SettingsPath,
                        "Incorrect path of the settings",
                        format!(
                            "The settings path '{}' is incorrect: {e}",
                            self.setup.settings_path
                        ),
                    )
                    .with_cause(e)
                })?;

        let stamp = match &settings_path {
            ResolvedPath::Unset => SettingsStamp::Default,
            ResolvedPath::Url(url) => SettingsStamp::Remote(url.clone()),
            ResolvedPath::File(path) => {
                let modified = std::fs::metadata(path).and_then(|m| m.modified());
                match modified {
                    Ok(time) => SettingsStamp::Modified(path.clone(), time),
                    Err(_) => {
                        self.reset();
                        return Err(ConfigError::new(
                            ConfigErrorKind::Settings,
                            "Settings file not found",
                            format!("The settings file '{}' cannot be found", path.display()),
                        ));
                    }
                }
            }
        };

        if let Some(engine) = &self.engine {
            let reusable = match &stamp {
                SettingsStamp::Modified(..) => self.setup.load_on_demand && stamp == self.stamp,
                _ => stamp == self.stamp,
            };
            if reusable {
                return Ok(Arc::clone(engine));
            }
        }

        info!("Building engine from {}", settings_path);
        self.engine = None;
        self.descriptor = None;
        self.stamp = SettingsStamp::Never;
        let engine = Arc::new(self.build_engine(&settings_path)?);
        self.engine = Some(Arc::clone(&engine));
        self.stamp = stamp;
        Ok(engine)
    }

    fn build_engine(&self, settings_path: &ResolvedPath) -> Result<Engine, ConfigError> {
        let project_dir = self.project.as_ref().map(|p| p.location.as_path());
        let mut loader = SettingsLoader::new();
        if let Some(dir) = project_dir {
            loader = loader.base_dir(dir);
        }
        match ResolvedPath::resolve(&self.setup.user_cache, project_dir, &Variables::new()) {
            Ok(ResolvedPath::Unset) => {}
            Ok(ResolvedPath::File(dir)) => loader = loader.user_cache(dir),
            Ok(ResolvedPath::Url(url)) => {
                return Err(ConfigError::new(
                    ConfigErrorKind::UserCache,
                    "Incorrect path of the user cache",
                    format!("The user cache '{url}' is not a local directory"),
                ));
            }
            Err(e) => {
                return Err(ConfigError::new(
                    ConfigErrorKind::UserCache,
                    "Incorrect path of the user cache",
                    format!("The user cache '{}' is incorrect: {e}", self.setup.user_cache),
                )
                .with_cause(e));
            }
        }
        for raw in &self.setup.property_files {
            match ResolvedPath::resolve(raw, project_dir, &Variables::new()) {
                Ok(ResolvedPath::File(path)) => loader = loader.property_file(path),
                Ok(ResolvedPath::Unset) => {}
                _ => {
                    return Err(ConfigError::new(
                        ConfigErrorKind::PropertyFile,
                        "Property file not found",
                        format!("The property file '{raw}' could not be found"),
                    ));
                }
            }
        }

        let settings = match settings_path {
            ResolvedPath::Unset => loader.load(SettingsSource::Default),
            ResolvedPath::File(path) => loader.load(SettingsSource::File(path)),
            ResolvedPath::Url(url) => loader.load(SettingsSource::Url(url)),
        }?;
        let mut engine = Engine::new(settings);
        if let Some(ws) = &self.workspace {
            engine = engine.with_workspace(
                WorkspaceResolver::new(Arc::clone(&ws.index), ws.cache_dir.clone())
                    .ignore_version(ws.ignore_version),
            );
        }
        Ok(engine)
    }

    /// The descriptor of the project, parsed on first use.
    pub fn descriptor(&mut self, engine: &Engine) -> Result<Arc<ModuleDescriptor>, ConfigError> {
        if let Some(md) = &self.descriptor {
            return Ok(Arc::clone(md));
        }
        let md = Arc::new(self.parse_descriptor(engine)?);
        self.descriptor = Some(Arc::clone(&md));
        Ok(md)
    }

    fn parse_descriptor(&self, engine: &Engine) -> Result<ModuleDescriptor, ConfigError> {
        let project_dir = self.project.as_ref().map(|p| p.location.as_path());
        let path = match ResolvedPath::resolve(&self.descriptor_path, project_dir, &Variables::new())
        {
            Ok(ResolvedPath::File(path)) => path,
            Ok(ResolvedPath::Unset) => {
                return Err(ConfigError::new(
                    ConfigErrorKind::DescriptorPath,
                    "Empty path of the descriptor",
                    "No descriptor path is configured",
                ));
            }
            Ok(ResolvedPath::Url(url)) => {
                return Err(ConfigError::new(
                    ConfigErrorKind::DescriptorPath,
                    "Incorrect URL of the descriptor",
                    format!("The descriptor '{url}' is not a local file"),
                ));
            }
            Err(e) => {
                return Err(ConfigError::new(
                    ConfigErrorKind::DescriptorPath,
                    "Incorrect path of the descriptor",
                    format!("The descriptor path '{}' is incorrect: {e}", self.descriptor_path),
                )
                .with_cause(e));
            }
        };
        if !path.exists() {
            return Err(ConfigError::new(
                ConfigErrorKind::Descriptor,
                "Descriptor not found",
                format!("The descriptor file '{}' was not found", path.display()),
            ));
        }
        engine.parse_descriptor(&path).map_err(|e| {
            let read_error = matches!(
                &e,
                lodecake::EngineError::Descriptor(f)
                    if matches!(f.kind(), DescriptorFormatErrorKind::IO(_))
            );
            let (short, verb) = if read_error {
                ("Read error of the descriptor", "read")
            } else {
                ("Parsing error of the descriptor", "parsed")
            };
            let reason = match &e {
                lodecake::EngineError::Descriptor(f) => f.kind().to_string(),
                other => other.to_string(),
            };
            ConfigError::new(
                ConfigErrorKind::Descriptor,
                short,
                format!(
                    "The descriptor file '{}' could not be {verb}: {reason}",
                    path.display()
                ),
            )
            .with_cause(e)
        })
    }
}

impl std::fmt::Display for EngineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.descriptor_path)?;
        if let Some(project) = &self.project {
            write!(f, " in {}", project.name)?;
        }
        Ok(())
    }
}
