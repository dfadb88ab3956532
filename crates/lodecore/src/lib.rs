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

//! Orchestrates dependency resolution: caches engines per project, runs
//! requests in batches, orders workspace modules and drives each resolve on a
//! cancellable worker.

pub mod cache;
pub mod driver;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod progress;
pub mod request;
pub mod result;
pub mod sort;
pub mod worker;

pub use cache::{EngineCache, WorkspaceSetup};
pub use error::{BatchStatus, ConfigError, FailureKind, MultiError, RequestFailure};
pub use host::{Host, NoHost, ProjectsWorkspace};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use progress::{NoMonitor, ProgressMonitor};
pub use request::{ProjectRef, ResolveHooks, ResolveRequest, ResolverConfig, RetrieveSetup, SettingsSetup};
pub use result::ResolveResult;
