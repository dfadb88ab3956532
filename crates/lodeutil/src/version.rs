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

use semver::{Comparator, Op, Version, VersionReq};
use serde::{Deserialize, Serialize};

/// Converts a version into a semver comparator
pub fn as_comparator(version: Version, op: Op) -> Comparator {
    Comparator {
        op,
        major: version.major,
        minor: Some(version.minor),
        patch: Some(version.patch),
        pre: version.pre,
    }
}

/// Converts a version into an exact version requirement
pub fn as_exact_version_req(version: Version) -> VersionReq {
    VersionReq {
        comparators: vec![as_comparator(version, Op::Exact)],
    }
}

/// How revision constraints in dependency declarations are matched against
/// concrete module revisions. Configured per settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionMatcher {
    /// Constraints are semver requirements (`^1.2`, `>=1.0, <2.0`, `1.2.3`).
    #[default]
    Semver,
    /// Constraints must name the exact revision.
    Exact,
}

/// A parsed revision constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionConstraint {
    /// `latest.<status>` or `*`: any revision is acceptable, the highest wins.
    Latest,
    Req(VersionReq),
}

impl RevisionConstraint {
    pub fn matches(&self, revision: &Version) -> bool {
        match self {
            RevisionConstraint::Latest => true,
            RevisionConstraint::Req(req) => req.matches(revision),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            RevisionConstraint::Latest => true,
            RevisionConstraint::Req(req) => !req
                .comparators
                .iter()
                .all(|c| c.op == Op::Exact && c.minor.is_some() && c.patch.is_some()),
        }
    }
}

impl VersionMatcher {
    pub fn parse(&self, constraint: &str) -> Result<RevisionConstraint, semver::Error> {
        let constraint = constraint.trim();
        if constraint == "*" || constraint.starts_with("latest.") {
            return Ok(RevisionConstraint::Latest);
        }
        match self {
            VersionMatcher::Semver => VersionReq::parse(constraint).map(RevisionConstraint::Req),
            VersionMatcher::Exact => Version::parse(constraint)
                .map(|v| RevisionConstraint::Req(as_exact_version_req(v))),
        }
    }

    /// Whether `revision` satisfies `constraint`. Malformed constraints never match.
    pub fn accept(&self, constraint: &str, revision: &Version) -> bool {
        self.parse(constraint)
            .map(|c| c.matches(revision))
            .unwrap_or(false)
    }
}
