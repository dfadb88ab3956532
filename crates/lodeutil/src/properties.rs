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

//! Loader for `.properties` files used as settings variable overlays.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

#[derive(Debug, thiserror::Error)]
pub enum PropertyFileError {
    #[error("Property file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Not a property file: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("failed to read property file {}", path.display())]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parses `key=value` / `key: value` lines. `#` and `!` start comments, and a
/// trailing backslash continues the value on the next line.
pub fn parse_properties(content: &str) -> IndexMap<String, String> {
    let mut props = IndexMap::new();
    let mut pending = String::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if pending.is_empty() && (trimmed.is_empty() || trimmed.starts_with(['#', '!'])) {
            continue;
        }
        if let Some(stripped) = trimmed.strip_suffix('\\') {
            pending.push_str(stripped);
            continue;
        }
        pending.push_str(trimmed);
        let entry = std::mem::take(&mut pending);
        let (key, value) = match entry.find(['=', ':']) {
            Some(i) => (&entry[..i], &entry[i + 1..]),
            None => (entry.as_str(), ""),
        };
        props.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    props
}

pub fn load_properties(path: &Path) -> Result<IndexMap<String, String>, PropertyFileError> {
    if !path.exists() {
        return Err(PropertyFileError::NotFound(path.to_owned()));
    }
    if !path.is_file() {
        return Err(PropertyFileError::NotAFile(path.to_owned()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| PropertyFileError::IO {
        path: path.to_owned(),
        source,
    })?;
    Ok(parse_properties(&content))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() {
        let props = parse_properties(
            "# comment\n\
             repo.root = /srv/repo\n\
             ! other comment\n\
             name: lode\n\
             long = a,\\\n  b\n\
             flag\n",
        );
        expect_test::expect![[r#"
            {
                "repo.root": "/srv/repo",
                "name": "lode",
                "long": "a,b",
                "flag": "",
            }
        "#]]
        .assert_debug_eq(&props);
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_properties(&dir.path().join("none.properties")).unwrap_err();
        assert!(matches!(err, PropertyFileError::NotFound(_)));
        let err = load_properties(dir.path()).unwrap_err();
        assert!(matches!(err, PropertyFileError::NotAFile(_)));
    }
}
