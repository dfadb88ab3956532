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

pub struct TestDir {
    // tempfile::TempDir has a drop implementation that will remove the directory
    path: tempfile::TempDir,
}

impl TestDir {
    pub fn new_empty() -> Self {
        let tmp_dir = tempfile::TempDir::new().expect("create empty temp dir for tests");
        Self { path: tmp_dir }
    }

    /// Creates `sub` (and its parents) and returns its path.
    pub fn mkdir(&self, sub: impl AsRef<Path>) -> PathBuf {
        let dir = self.join(sub);
        std::fs::create_dir_all(&dir).expect("create dir in test dir");
        dunce::canonicalize(&dir).unwrap_or(dir)
    }

    pub fn join(&self, sub: impl AsRef<Path>) -> PathBuf {
        self.path.path().join(sub.as_ref())
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        self.path.path()
    }
}
