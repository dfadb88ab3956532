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

pub fn home() -> PathBuf {
    if let Ok(lode_home) = std::env::var("LODE_HOME") {
        return PathBuf::from(lode_home);
    }

    let Some(h) = home::home_dir() else {
        eprintln!("Failed to get home directory");
        std::process::exit(1);
    };
    h.join(".lode")
}

/// The shared artifact cache used when settings don't name one.
pub fn cache() -> PathBuf {
    home().join("cache")
}

/// The local repository used when settings declare no repositories.
pub fn repository() -> PathBuf {
    home().join("repository")
}

/// Private cache area of the workspace resolver.
pub fn workspace_cache() -> PathBuf {
    home().join("workspace-cache")
}

pub fn config_json() -> PathBuf {
    home().join("config.json")
}
