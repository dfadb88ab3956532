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

use url::Url;

use crate::variables::{VariableError, Variables};

pub const PROJECT_LOC_VAR: &str = "project_loc";

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error(transparent)]
    Variable(#[from] VariableError),
    #[error("`{0}` is not a valid file URL")]
    InvalidFileUrl(String),
    #[error("failed to get current directory")]
    CurrentDir(#[source] std::io::Error),
}

/// A user supplied path to a settings file or a directory, after variable
/// substitution and resolution against the project location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedPath {
    Unset,
    File(PathBuf),
    /// A non-local URL. Anything fetched from it has no modification time.
    Url(Url),
}

impl ResolvedPath {
    pub fn resolve(
        raw: &str,
        project: Option<&Path>,
        variables: &Variables,
    ) -> Result<Self, PathError> {
        let mut variables = variables.clone();
        if let Some(project) = project {
            variables.set_default(PROJECT_LOC_VAR, project.display().to_string());
        }
        let substituted = variables.substitute(raw)?;
        let input = substituted.trim();
        if input.is_empty() {
            return Ok(ResolvedPath::Unset);
        }
        // single letter schemes are windows drive letters
        if let Ok(url) = Url::parse(input) {
            if url.scheme().len() > 1 {
                if url.scheme() == "file" {
                    let path = url
                        .to_file_path()
                        .map_err(|_| PathError::InvalidFileUrl(input.to_owned()))?;
                    return Ok(ResolvedPath::File(path));
                }
                return Ok(ResolvedPath::Url(url));
            }
        }
        let path = PathBuf::from(input);
        if path.is_absolute() {
            return Ok(ResolvedPath::File(path));
        }
        let base = match project {
            Some(project) => project.to_owned(),
            None => std::env::current_dir().map_err(PathError::CurrentDir)?,
        };
        Ok(ResolvedPath::File(base.join(path)))
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, ResolvedPath::Unset)
    }

    pub fn as_file(&self) -> Option<&Path> {
        match self {
            ResolvedPath::File(p) => Some(p),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedPath::Unset => f.write_str("<default>"),
            ResolvedPath::File(p) => write!(f, "{}", p.display()),
            ResolvedPath::Url(u) => write!(f, "{u}"),
        }
    }
}
