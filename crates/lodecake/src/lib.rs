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

//! The dependency resolution engine: settings, repositories, the resolve
//! algorithm, resolution reports and retrieval.

pub mod engine;
pub mod error;
pub mod event;
pub mod report;
pub mod repository;
pub mod resolve;
pub mod retrieve;
pub mod settings;
pub mod workspace;

pub use engine::Engine;
pub use error::{EngineError, SettingsError};
pub use event::{NoProgress, ProgressSink};
pub use resolve::{ResolveOptions, resolve_id};
