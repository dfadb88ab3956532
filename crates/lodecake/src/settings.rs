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

//! Loading of settings (`lodesettings.json`) from a local file, a remote URL,
//! or built-in defaults.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use lodeutil::properties::load_properties;
use lodeutil::variables::Variables;
use lodeutil::version::VersionMatcher;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SettingsError;

pub const BASEDIR_VAR: &str = "basedir";
pub const LODE_HOME_VAR: &str = "lode.home";
pub const SETTINGS_DIR_VAR: &str = "settings.dir";

/// Name of the repository used when settings declare none.
pub const DEFAULT_REPOSITORY: &str = "local";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SettingsJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<RepositoryJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_matcher: Option<VersionMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<bool>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryJson {
    pub name: String,
    pub root: String,
}

/// Settings after variable substitution, ready to build an engine from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Human readable origin of these settings.
    pub source: String,
    pub cache_dir: PathBuf,
    pub repositories: Vec<(String, PathBuf)>,
    pub version_matcher: VersionMatcher,
    pub validate: bool,
    pub variables: Variables,
}

#[derive(Debug, Clone, Copy)]
pub enum SettingsSource<'a> {
    Default,
    File(&'a Path),
    Url(&'a Url),
}

impl std::fmt::Display for SettingsSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsSource::Default => f.write_str("the default settings"),
            SettingsSource::File(p) => write!(f, "{}", p.display()),
            SettingsSource::Url(u) => write!(f, "{u}"),
        }
    }
}

/// Collects everything that feeds into settings besides the settings source
/// itself.
#[derive(Debug, Clone, Default)]
pub struct SettingsLoader {
    base_dir: Option<PathBuf>,
    user_cache: Option<PathBuf>,
    property_files: Vec<PathBuf>,
    variables: Variables,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Overrides the artifact cache directory, whatever the settings say.
    pub fn user_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_cache = Some(dir.into());
        self
    }

    pub fn property_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.property_files.push(path.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.set(name, value);
        self
    }

    pub fn load(&self, source: SettingsSource<'_>) -> Result<Settings, SettingsError> {
        let name = source.to_string();
        let (json, settings_dir) = match source {
            SettingsSource::Default => (SettingsJson::default(), None),
            SettingsSource::File(path) => {
                if !path.exists() {
                    return Err(SettingsError::NotFound(path.to_owned()));
                }
                let file =
                    File::open(path).map_err(|e| SettingsError::Read(name.clone(), e.into()))?;
                let json = serde_json_lenient::from_reader(BufReader::new(file))
                    .map_err(|e| SettingsError::Parse(name.clone(), e))?;
                (json, path.parent().map(Path::to_owned))
            }
            SettingsSource::Url(url) => {
                log::debug!("Fetching settings from {}", url);
                let text = reqwest::blocking::get(url.clone())
                    .and_then(|r| r.error_for_status())
                    .and_then(|r| r.text())
                    .map_err(|e| SettingsError::Read(name.clone(), e.into()))?;
                let json = serde_json_lenient::from_str(&text)
                    .map_err(|e| SettingsError::Parse(name.clone(), e))?;
                (json, None)
            }
        };
        self.resolve(name, json, settings_dir)
    }

    fn resolve(
        &self,
        name: String,
        json: SettingsJson,
        settings_dir: Option<PathBuf>,
    ) -> Result<Settings, SettingsError> {
        let mut variables = Variables::new();
        if let Some(base_dir) = &self.base_dir {
            variables.set(BASEDIR_VAR, base_dir.display().to_string());
        }
        variables.set(LODE_HOME_VAR, lodeutil::lode_dir::home().display().to_string());
        if let Some(dir) = &settings_dir {
            variables.set(SETTINGS_DIR_VAR, dir.display().to_string());
        }
        variables.extend(
            self.variables
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned())),
        );
        // values may refer to variables defined before them
        for file in &self.property_files {
            for (k, v) in load_properties(file)? {
                let v = variables.substitute(&v).unwrap_or(v);
                variables.set(k, v);
            }
        }
        for (k, v) in &json.properties {
            let v = variables.substitute(v).unwrap_or_else(|_| v.clone());
            variables.set_default(k.clone(), v);
        }

        let relative_to = settings_dir.as_ref().or(self.base_dir.as_ref());
        let resolve_dir = |field: &'static str, raw: &str| -> Result<PathBuf, SettingsError> {
            let value = variables
                .substitute(raw)
                .map_err(|e| SettingsError::Invalid {
                    source_name: name.clone(),
                    field,
                    cause: e.into(),
                })?;
            let path = PathBuf::from(value.trim());
            Ok(match relative_to {
                Some(dir) if path.is_relative() => dir.join(path),
                _ => path,
            })
        };

        let cache_dir = match (&self.user_cache, &json.cache_dir) {
            (Some(user_cache), _) => user_cache.clone(),
            (None, Some(raw)) => resolve_dir("cache-dir", raw)?,
            (None, None) => lodeutil::lode_dir::cache(),
        };

        let mut repositories = Vec::with_capacity(json.repositories.len());
        for repo in &json.repositories {
            if repositories.iter().any(|(n, _)| n == &repo.name) {
                return Err(SettingsError::Invalid {
                    source_name: name.clone(),
                    field: "repositories",
                    cause: anyhow::anyhow!("duplicate repository `{}`", repo.name),
                });
            }
            repositories.push((repo.name.clone(), resolve_dir("repositories", &repo.root)?));
        }
        if repositories.is_empty() {
            repositories.push((
                DEFAULT_REPOSITORY.to_owned(),
                lodeutil::lode_dir::repository(),
            ));
        }

        Ok(Settings {
            source: name,
            cache_dir,
            repositories,
            version_matcher: json.version_matcher.unwrap_or_default(),
            validate: json.validate.unwrap_or(true),
            variables,
        })
    }
}
