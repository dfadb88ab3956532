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

use lodecake::error::SettingsError;
use lodeutil::properties::PropertyFileError;

use crate::request::ResolveRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    SettingsPath,
    Settings,
    PropertyFile,
    UserCache,
    DescriptorPath,
    Descriptor,
}

/// A configuration problem of one request: bad settings, unreadable property
/// files, or a missing or malformed descriptor.
#[derive(Debug, thiserror::Error)]
#[error("{long}")]
pub struct ConfigError {
    kind: ConfigErrorKind,
    short: String,
    long: String,
    #[source]
    cause: Option<anyhow::Error>,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, short: impl Into<String>, long: impl Into<String>) -> Self {
        ConfigError {
            kind,
            short: short.into(),
            long: long.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Prefixes the long message with what was being done.
    pub fn contextualize(mut self, context: &str) -> Self {
        self.long = format!("{context}:\n{}", self.long);
        self
    }

    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }

    pub fn short_msg(&self) -> &str {
        &self.short
    }

    pub fn long_msg(&self) -> &str {
        &self.long
    }

    pub fn is_descriptor_error(&self) -> bool {
        matches!(
            self.kind,
            ConfigErrorKind::Descriptor | ConfigErrorKind::DescriptorPath
        )
    }
}

impl From<SettingsError> for ConfigError {
    fn from(e: SettingsError) -> Self {
        let (kind, short, long) = match &e {
            SettingsError::NotFound(path) => (
                ConfigErrorKind::Settings,
                "Settings file not found",
                format!("The settings file '{}' cannot be found", path.display()),
            ),
            SettingsError::Read(source, cause) => (
                ConfigErrorKind::Settings,
                "Read error of the settings",
                format!("The settings from '{source}' could not be read: {cause}"),
            ),
            SettingsError::Parse(source, cause) => (
                ConfigErrorKind::Settings,
                "Parsing error of the settings",
                format!("The settings from '{source}' could not be parsed: {cause}"),
            ),
            SettingsError::Invalid { source_name, .. } => (
                ConfigErrorKind::Settings,
                "Parsing error of the settings",
                format!("The settings from '{source_name}' could not be parsed: {e}"),
            ),
            SettingsError::Property(PropertyFileError::NotFound(path)) => (
                ConfigErrorKind::PropertyFile,
                "Property file not found",
                format!("The property file '{}' could not be found", path.display()),
            ),
            SettingsError::Property(PropertyFileError::NotAFile(path)) => (
                ConfigErrorKind::PropertyFile,
                "Not a property file",
                format!("The property file '{}' could not be loaded", path.display()),
            ),
            SettingsError::Property(PropertyFileError::IO { path, .. }) => (
                ConfigErrorKind::PropertyFile,
                "Not a property file",
                format!("The property file '{}' could not be loaded", path.display()),
            ),
        };
        ConfigError::new(kind, short, long).with_cause(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Configuration,
    Descriptor,
    Resolution,
    Retrieve,
    /// Something went wrong that none of the above covers, such as a panic.
    Unexpected,
}

/// Why a request failed. Carries the request identity so it can be reported
/// on its own.
#[derive(Debug, thiserror::Error)]
#[error("{message}{}", indented(.details))]
pub struct RequestFailure {
    pub request: String,
    pub kind: FailureKind,
    pub message: String,
    pub details: Vec<String>,
    #[source]
    pub cause: Option<anyhow::Error>,
}

fn indented(details: &[String]) -> String {
    details.iter().map(|d| format!("\n\t{d}")).collect()
}

impl RequestFailure {
    pub fn new(request: &ResolveRequest, kind: FailureKind, message: impl Into<String>) -> Self {
        RequestFailure {
            request: request.to_string(),
            kind,
            message: message.into(),
            details: Vec::new(),
            cause: None,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn from_config(request: &ResolveRequest, e: ConfigError) -> Self {
        let kind = if e.is_descriptor_error() {
            FailureKind::Descriptor
        } else {
            FailureKind::Configuration
        };
        RequestFailure::new(request, kind, e.short_msg().to_owned()).with_cause(e)
    }

    /// The message followed by the details and the chain of causes.
    pub fn message_chain(&self) -> Vec<String> {
        let mut chain = vec![self.message.clone()];
        chain.extend(self.details.iter().cloned());
        if let Some(cause) = &self.cause {
            chain.extend(cause.chain().map(|c| c.to_string()));
        }
        chain
    }
}

/// One entry per failed request of a batch.
#[derive(Debug, Default)]
pub struct MultiError(pub Vec<RequestFailure>);

impl MultiError {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestFailure> {
        self.0.iter()
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Some projects fail to be resolved")?;
        for failure in &self.0 {
            writeln!(f, "{}: {}", failure.request, failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[derive(Debug)]
pub enum BatchStatus {
    Ok,
    Cancelled,
    Failed(MultiError),
}

impl BatchStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, BatchStatus::Ok)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchStatus::Cancelled)
    }
}
