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

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RESOLVE_DELAY_MS: u64 = 1000;

/// Global preferences, read from `config.json` in the lode home.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Preferences {
    /// Resolve from the cache only unless a request says otherwise.
    pub offline: bool,
    /// Surface batch errors to the caller even if no request forces it.
    pub error_popup: bool,
    /// Match workspace modules by organisation and name only.
    pub ignore_version_on_workspace_projects: bool,
    /// How long asynchronous submissions are coalesced before a batch runs.
    pub resolve_delay_ms: u64,
    /// Settings used by requests that don't name any.
    pub default_settings: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            offline: false,
            error_popup: false,
            ignore_version_on_workspace_projects: false,
            resolve_delay_ms: DEFAULT_RESOLVE_DELAY_MS,
            default_settings: None,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

impl Preferences {
    pub fn load() -> anyhow::Result<Self> {
        let mut prefs = Self::load_from(&crate::lode_dir::config_json())?;
        if let Some(offline) = env_flag("LODE_OFFLINE") {
            prefs.offline = offline;
        }
        if let Some(popup) = env_flag("LODE_ERROR_POPUP") {
            prefs.error_popup = popup;
        }
        Ok(prefs)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let prefs: Preferences = serde_json_lenient::from_reader(reader)
            .map_err(|e| anyhow::anyhow!("failed to parse `{}`: {e}", path.display()))?;
        Ok(prefs)
    }
}
