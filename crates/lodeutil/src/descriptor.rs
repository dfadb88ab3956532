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

//! The module descriptor (`lode.json`): a module's identity, its
//! configurations, the artifacts it publishes and the dependencies it declares.

use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::common::{DescriptorFormatErrorKind, NameError};
use crate::module_id::{Artifact, DEFAULT_REVISION, ModuleId, ModuleRevisionId};

pub const DEFAULT_CONF: &str = "default";
pub const DEFAULT_STATUS: &str = "integration";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub mrid: ModuleRevisionId,
    pub status: String,
    pub configurations: Vec<String>,
    pub publications: Vec<Publication>,
    pub dependencies: Vec<DependencyDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub name: String,
    pub kind: String,
    pub ext: String,
    pub classifier: Option<String>,
    /// Configurations this artifact is published in; empty means all of them.
    pub confs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDescriptor {
    pub module: ModuleId,
    /// The revision constraint, interpreted by a [`crate::version::VersionMatcher`].
    pub revision: String,
    pub confs: Vec<ConfMapping>,
    pub transitive: bool,
}

/// Maps one of the declaring module's configurations to configurations of the
/// dependency. Written `from->to1,to2`; a bare `conf` maps to itself. `*` on
/// the left matches every configuration and `*` on the right selects them all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfMapping {
    pub from: String,
    pub to: Vec<String>,
}

impl FromStr for ConfMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = match s.split_once("->") {
            Some((from, to)) => (from.trim(), to.trim()),
            None => (s.trim(), s.trim()),
        };
        if from.is_empty() || to.is_empty() {
            return Err(format!("malformed configuration mapping `{s}`"));
        }
        Ok(ConfMapping {
            from: from.to_owned(),
            to: to.split(',').map(|c| c.trim().to_owned()).collect(),
        })
    }
}

impl std::fmt::Display for ConfMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.from, self.to.join(","))
    }
}

impl ConfMapping {
    pub fn applies_to(&self, conf: &str) -> bool {
        self.from == "*" || self.from == conf
    }

    /// The dependency configurations selected when resolving `conf`.
    pub fn targets(&self, conf: &str) -> Vec<String> {
        self.to
            .iter()
            .map(|t| if t == "@" { conf.to_owned() } else { t.clone() })
            .collect()
    }
}

impl ModuleDescriptor {
    /// A descriptor with the default configuration and nothing else.
    pub fn new(mrid: ModuleRevisionId) -> Self {
        ModuleDescriptor {
            mrid,
            status: DEFAULT_STATUS.to_owned(),
            configurations: vec![DEFAULT_CONF.to_owned()],
            publications: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn mrid(&self) -> &ModuleRevisionId {
        &self.mrid
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.mrid.module
    }

    pub fn has_configuration(&self, conf: &str) -> bool {
        self.configurations.iter().any(|c| c == conf)
    }

    /// Expands `*` (and an empty request) to every declared configuration.
    pub fn expand_confs(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() || requested.iter().any(|c| c == "*") {
            self.configurations.clone()
        } else {
            requested.to_vec()
        }
    }

    /// The artifacts published in `conf`. `*` selects every publication.
    pub fn artifacts(&self, conf: &str) -> Vec<Artifact> {
        self.publications
            .iter()
            .filter(|p| {
                conf == "*" || p.confs.is_empty() || p.confs.iter().any(|c| c == conf || c == "*")
            })
            .map(|p| Artifact {
                module: self.mrid.clone(),
                name: p.name.clone(),
                kind: p.kind.clone(),
                ext: p.ext.clone(),
                classifier: p.classifier.clone(),
            })
            .collect()
    }

    /// Dependencies that apply when resolving `conf`, paired with the
    /// configurations to pull from each.
    pub fn dependencies_for<'a>(
        &'a self,
        conf: &'a str,
    ) -> impl Iterator<Item = (&'a DependencyDescriptor, Vec<String>)> + 'a {
        self.dependencies.iter().filter_map(move |dep| {
            let mut targets: Vec<String> = Vec::new();
            for mapping in dep.confs.iter().filter(|m| m.applies_to(conf)) {
                for t in mapping.targets(conf) {
                    if !targets.contains(&t) {
                        targets.push(t);
                    }
                }
            }
            (!targets.is_empty()).then_some((dep, targets))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleDescriptorJson {
    #[serde(default)]
    pub organisation: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publications: Vec<PublicationJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PublicationJson {
    pub name: String,
    #[serde(rename = "type", default = "default_artifact_type")]
    pub kind: String,
    #[serde(default = "default_artifact_type")]
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyJson {
    #[serde(default)]
    pub org: String,
    pub name: String,
    pub rev: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitive: Option<bool>,
}

fn default_artifact_type() -> String {
    "jar".into()
}

impl TryFrom<ModuleDescriptorJson> for ModuleDescriptor {
    type Error = DescriptorFormatErrorKind;

    fn try_from(j: ModuleDescriptorJson) -> Result<Self, Self::Error> {
        if j.name.trim().is_empty() {
            return Err(DescriptorFormatErrorKind::Name(NameError::EmptyName));
        }
        let revision = match &j.revision {
            None => DEFAULT_REVISION.clone(),
            Some(v) => Version::parse(v)?,
        };
        let mut mrid = ModuleRevisionId::new(&j.organisation, &j.name, revision);
        mrid.branch = j.branch;

        let configurations = if j.configurations.is_empty() {
            vec![DEFAULT_CONF.to_owned()]
        } else {
            j.configurations
        };
        let check_conf = |conf: &str, what: &str| {
            if conf == "*" || configurations.iter().any(|c| c == conf) {
                Ok(())
            } else {
                Err(DescriptorFormatErrorKind::Configuration(format!(
                    "{what} refers to undeclared configuration `{conf}`"
                )))
            }
        };

        let mut publications = Vec::with_capacity(j.publications.len());
        for p in j.publications {
            for conf in &p.confs {
                check_conf(conf, &format!("publication `{}`", p.name))?;
            }
            publications.push(Publication {
                name: p.name,
                kind: p.kind,
                ext: p.ext,
                classifier: p.classifier,
                confs: p.confs,
            });
        }

        let mut dependencies = Vec::with_capacity(j.dependencies.len());
        for d in j.dependencies {
            if d.name.trim().is_empty() {
                return Err(DescriptorFormatErrorKind::Name(NameError::EmptyName));
            }
            let confs = if d.confs.is_empty() {
                vec![ConfMapping {
                    from: "*".into(),
                    to: vec!["*".into()],
                }]
            } else {
                d.confs
                    .iter()
                    .map(|c| c.parse::<ConfMapping>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(DescriptorFormatErrorKind::Configuration)?
            };
            for mapping in &confs {
                check_conf(&mapping.from, &format!("dependency `{}`", d.name))?;
            }
            dependencies.push(DependencyDescriptor {
                module: ModuleId::new(d.org, d.name),
                revision: d.rev,
                confs,
                transitive: d.transitive.unwrap_or(true),
            });
        }

        Ok(ModuleDescriptor {
            mrid,
            status: j.status.unwrap_or_else(|| DEFAULT_STATUS.to_owned()),
            configurations,
            publications,
            dependencies,
        })
    }
}

impl From<&ModuleDescriptor> for ModuleDescriptorJson {
    fn from(md: &ModuleDescriptor) -> Self {
        ModuleDescriptorJson {
            organisation: md.mrid.organisation().to_owned(),
            name: md.mrid.name().to_owned(),
            revision: Some(md.mrid.revision.to_string()),
            status: Some(md.status.clone()),
            branch: md.mrid.branch.clone(),
            configurations: md.configurations.clone(),
            publications: md
                .publications
                .iter()
                .map(|p| PublicationJson {
                    name: p.name.clone(),
                    kind: p.kind.clone(),
                    ext: p.ext.clone(),
                    classifier: p.classifier.clone(),
                    confs: p.confs.clone(),
                })
                .collect(),
            dependencies: md
                .dependencies
                .iter()
                .map(|d| DependencyJson {
                    org: d.module.organisation.clone(),
                    name: d.module.name.clone(),
                    rev: d.revision.clone(),
                    confs: d.confs.iter().map(|c| c.to_string()).collect(),
                    transitive: (!d.transitive).then_some(false),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(s: &str) -> Result<ModuleDescriptor, DescriptorFormatErrorKind> {
        let j: ModuleDescriptorJson = serde_json_lenient::from_str(s).unwrap();
        j.try_into()
    }

    #[test]
    fn defaults() {
        let md = parse(r#"{ "organisation": "acme", "name": "app" }"#).unwrap();
        assert_eq!(md.mrid.to_string(), "acme#app;0.0.0");
        assert_eq!(md.configurations, vec!["default"]);
        assert_eq!(md.status, "integration");
    }

    #[test]
    fn conf_mappings() {
        let md = parse(
            r#"{
                "organisation": "acme",
                "name": "app",
                "revision": "1.0.0",
                "configurations": ["compile", "test"],
                "publications": [
                    { "name": "app", "type": "jar", "ext": "jar", "confs": ["compile"] },
                    { "name": "app", "type": "source", "ext": "jar", "classifier": "sources" }
                ],
                "dependencies": [
                    { "org": "acme", "name": "lib", "rev": "^1.0", "confs": ["compile->default"] },
                    { "org": "acme", "name": "testkit", "rev": "2.0.0", "confs": ["test"], "transitive": false }
                ]
            }"#,
        )
        .unwrap();
        let compile: Vec<_> = md
            .dependencies_for("compile")
            .map(|(d, t)| format!("{} {:?}", d.module, t))
            .collect();
        assert_eq!(compile, vec![r#"acme#lib ["default"]"#]);
        let test: Vec<_> = md.dependencies_for("test").map(|(d, _)| d).collect();
        assert_eq!(test.len(), 1);
        assert!(!test[0].transitive);
        assert_eq!(md.artifacts("compile").len(), 2);
        assert_eq!(md.artifacts("test").len(), 1);
        assert_eq!(md.expand_confs(&["*".into()]), vec!["compile", "test"]);
    }

    #[test]
    fn undeclared_configuration() {
        let err = parse(
            r#"{ "name": "app", "publications": [ { "name": "app", "confs": ["runtime"] } ] }"#,
        )
        .unwrap_err();
        expect_test::expect![[r#"publication `app` refers to undeclared configuration `runtime`"#]]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn bad_revision() {
        assert!(matches!(
            parse(r#"{ "name": "app", "revision": "one" }"#),
            Err(DescriptorFormatErrorKind::Revision(_))
        ));
        assert!(matches!(
            parse(r#"{ "name": "" }"#),
            Err(DescriptorFormatErrorKind::Name(_))
        ));
    }
}
