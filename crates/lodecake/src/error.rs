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

use std::path::PathBuf;

use lodeutil::common::DescriptorFormatError;
use lodeutil::module_id::ModuleId;
use thiserror::Error;

/// Failure to turn a settings source into an engine.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read settings from {0}")]
    Read(String, #[source] anyhow::Error),
    #[error("failed to parse settings from {0}")]
    Parse(String, #[source] serde_json_lenient::Error),
    #[error("invalid value of `{field}` in settings from {source_name}")]
    Invalid {
        source_name: String,
        field: &'static str,
        #[source]
        cause: anyhow::Error,
    },
    #[error(transparent)]
    Property(#[from] lodeutil::properties::PropertyFileError),
}

/// Problems found while resolving. These are collected, not propagated, and
/// end up as the problem messages of a resolve report.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("unresolved dependency: {0};{1}: not found")]
    ModuleMissing(ModuleId, String),
    #[error("malformed revision constraint `{1}` for {0}")]
    MalformedConstraint(ModuleId, String),
    #[error("configuration not found in {0}: '{1}'")]
    ConfigurationMissing(String, String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("error during resolution: {0}")]
    Other(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation interrupted")]
    Interrupted,
    #[error(transparent)]
    Descriptor(#[from] DescriptorFormatError),
    #[error("failed to read resolution report {}", path.display())]
    Report {
        path: PathBuf,
        #[source]
        cause: anyhow::Error,
    },
    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Retrieve(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> EngineError {
        let path = path.into();
        move |source| EngineError::Io { path, source }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, EngineError::Interrupted)
    }
}
