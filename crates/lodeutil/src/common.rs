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
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::descriptor::{ModuleDescriptor, ModuleDescriptorJson};

pub const DESCRIPTOR_FILE: &str = "lode.json";
pub const SETTINGS_FILE: &str = "lodesettings.json";

#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("`name` should not be empty")]
    EmptyName,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to load `{}`", path.display())]
pub struct DescriptorFormatError {
    path: Box<Path>,
    #[source]
    kind: DescriptorFormatErrorKind,
}

impl DescriptorFormatError {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &DescriptorFormatErrorKind {
        &self.kind
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorFormatErrorKind {
    #[error("I/O error")]
    IO(#[from] std::io::Error),
    #[error("Parse error")]
    Parse(#[from] serde_json_lenient::Error),
    #[error("`name` bad format")]
    Name(#[from] NameError),
    #[error("`revision` bad format")]
    Revision(#[from] semver::Error),
    #[error("{0}")]
    Configuration(String),
}

pub fn read_descriptor_from_json(path: &Path) -> Result<ModuleDescriptor, DescriptorFormatError> {
    let file = File::open(path).map_err(|e| DescriptorFormatError {
        path: path.into(),
        kind: DescriptorFormatErrorKind::IO(e),
    })?;
    let reader = BufReader::new(file);
    let j: ModuleDescriptorJson =
        serde_json_lenient::from_reader(reader).map_err(|e| DescriptorFormatError {
            path: path.into(),
            kind: DescriptorFormatErrorKind::Parse(e),
        })?;
    j.try_into().map_err(|e| DescriptorFormatError {
        path: path.into(),
        kind: e,
    })
}

pub fn write_descriptor_json_to_file(
    md: &ModuleDescriptor,
    path: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json_lenient::to_writer_pretty(writer, &ModuleDescriptorJson::from(md))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_write_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DESCRIPTOR_FILE);
        std::fs::write(
            &path,
            r#"{ "organisation": "acme", "name": "lib", "revision": "1.2.0" }"#,
        )
        .unwrap();
        let md = read_descriptor_from_json(&path).unwrap();
        assert_eq!(md.mrid.to_string(), "acme#lib;1.2.0");

        let copy = dir.path().join("copy").join(DESCRIPTOR_FILE);
        write_descriptor_json_to_file(&md, &copy).unwrap();
        assert_eq!(read_descriptor_from_json(&copy).unwrap(), md);
    }

    #[test]
    fn missing_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_descriptor_from_json(&dir.path().join(DESCRIPTOR_FILE)).unwrap_err();
        assert!(matches!(err.kind(), DescriptorFormatErrorKind::IO(_)));
        assert!(err.to_string().starts_with("failed to load `"));
    }
}
