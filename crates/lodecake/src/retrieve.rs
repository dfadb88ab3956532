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

//! Copying resolved artifacts out of the cache into a destination layout
//! described by a pattern such as `lib/[conf]/[artifact](-[classifier]).[ext]`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use lodeutil::module_id::Artifact;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub resolve_id: String,
    pub confs: Vec<String>,
    /// Delete files under the pattern root that weren't retrieved.
    pub sync: bool,
    /// Artifact types to copy; `None` copies every type.
    pub types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveReport {
    pub copied: usize,
    pub up_to_date: usize,
    pub deleted: usize,
    pub retrieved: BTreeMap<Artifact, BTreeSet<PathBuf>>,
}

/// Where each artifact comes from and where it goes.
pub type CopyPlan = BTreeMap<Artifact, (PathBuf, BTreeSet<PathBuf>)>;

/// Parses a comma separated type filter. `*` anywhere means every type.
pub fn parse_type_filter(filter: &str) -> Option<Vec<String>> {
    let types: Vec<String> = filter
        .split(',')
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .collect();
    if types.is_empty() || types.iter().any(|t| t == "*") {
        None
    } else {
        Some(types)
    }
}

fn token_value(token: &str, artifact: &Artifact, conf: &str) -> Option<String> {
    match token {
        "organisation" | "organization" => Some(artifact.module.organisation().to_owned()),
        "module" => Some(artifact.module.name().to_owned()),
        "revision" => Some(artifact.module.revision.to_string()),
        "branch" => artifact.module.branch.clone(),
        "artifact" => Some(artifact.name.clone()),
        "type" => Some(artifact.kind.clone()),
        "ext" => Some(artifact.ext.clone()),
        "conf" => Some(conf.to_owned()),
        "classifier" => artifact.classifier.clone(),
        _ => None,
    }
}

/// Substitutes every token of `section`, or gives up if one has no value.
fn fill_optional(section: &str, artifact: &Artifact, conf: &str) -> Option<String> {
    let mut out = String::with_capacity(section.len());
    let mut rest = section;
    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find(']') else {
            rest = &rest[start..];
            break;
        };
        out.push_str(&token_value(&rest[start + 1..start + end], artifact, conf)?);
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn fill_required(section: &str, artifact: &Artifact, conf: &str) -> String {
    let mut out = String::with_capacity(section.len());
    let mut rest = section;
    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find(']') else {
            rest = &rest[start..];
            break;
        };
        let token = &rest[start..start + end + 1];
        match token_value(&token[1..token.len() - 1], artifact, conf) {
            Some(v) => out.push_str(&v),
            None => out.push_str(token),
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

/// Substitutes the tokens of `pattern`. A `( … )` section is dropped when any
/// token inside it has no value. Unknown tokens are kept verbatim outside of
/// optional sections.
pub fn fill_pattern(pattern: &str, artifact: &Artifact, conf: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find('(') {
        out.push_str(&fill_required(&rest[..start], artifact, conf));
        let Some(end) = rest[start..].find(')') else {
            rest = &rest[start..];
            break;
        };
        if let Some(filled) = fill_optional(&rest[start + 1..start + end], artifact, conf) {
            out.push_str(&filled);
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(&fill_required(rest, artifact, conf));
    out
}

/// The fixed part of a pattern: everything before the first token or
/// optional section.
pub fn token_root(pattern: &str) -> &str {
    let end = pattern.find(['[', '(']).unwrap_or(pattern.len());
    &pattern[..end]
}

fn up_to_date(src: &Path, dest: &Path) -> bool {
    let (Ok(src_meta), Ok(dest_meta)) = (src.metadata(), dest.metadata()) else {
        return false;
    };
    if src_meta.len() != dest_meta.len() {
        return false;
    }
    match (src_meta.modified(), dest_meta.modified()) {
        (Ok(s), Ok(d)) => d >= s,
        _ => false,
    }
}

/// Copies according to `plan`, then deletes stale files under the root of
/// `pattern` when syncing.
pub(crate) fn execute(
    plan: &CopyPlan,
    pattern: &str,
    sync: bool,
    check_interrupted: impl Fn() -> Result<(), EngineError>,
) -> Result<RetrieveReport, EngineError> {
    let mut report = RetrieveReport::default();
    for (artifact, (src, dests)) in plan {
        for dest in dests {
            check_interrupted()?;
            if up_to_date(src, dest) {
                report.up_to_date += 1;
                continue;
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(EngineError::io(parent))?;
            }
            log::debug!("Retrieving {} to {}", artifact, dest.display());
            std::fs::copy(src, dest).map_err(EngineError::io(dest))?;
            report.copied += 1;
        }
        report.retrieved.insert(artifact.clone(), dests.clone());
    }

    if sync {
        let root = token_root(pattern);
        if root.trim().is_empty() {
            return Err(EngineError::Retrieve(format!(
                "cannot synchronize retrieve pattern `{pattern}` since it has no fixed root"
            )));
        }
        report.deleted = sync_root(Path::new(root), plan)?;
    }
    Ok(report)
}

fn sync_root(root: &Path, plan: &CopyPlan) -> Result<usize, EngineError> {
    if !root.is_dir() {
        return Ok(0);
    }
    let keep: BTreeSet<&Path> = plan
        .values()
        .flat_map(|(_, dests)| dests.iter().map(PathBuf::as_path))
        .collect();
    let mut deleted = 0;
    for entry in walkdir::WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| EngineError::Other(e.into()))?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            if path != root && is_empty_dir(path) {
                log::info!("Removing empty directory {}", path.display());
                std::fs::remove_dir(path).map_err(EngineError::io(path))?;
            }
        } else if !keep.contains(path) {
            log::info!("Removing {}", path.display());
            std::fs::remove_file(path).map_err(EngineError::io(path))?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut it| it.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;
    use lodeutil::module_id::ModuleRevisionId;
    use semver::Version;

    fn artifact(classifier: Option<&str>) -> Artifact {
        Artifact {
            module: ModuleRevisionId::new("acme", "lib", Version::new(1, 0, 0)),
            name: "lib".into(),
            kind: "jar".into(),
            ext: "jar".into(),
            classifier: classifier.map(Into::into),
        }
    }

    #[test]
    fn patterns() {
        let pattern = "lib/[conf]/[artifact]-[revision](-[classifier]).[ext]";
        assert_eq!(
            fill_pattern(pattern, &artifact(None), "compile"),
            "lib/compile/lib-1.0.0.jar"
        );
        assert_eq!(
            fill_pattern(pattern, &artifact(Some("sources")), "compile"),
            "lib/compile/lib-1.0.0-sources.jar"
        );
        assert_eq!(
            fill_pattern("[organisation]/[module]/[unknown]", &artifact(None), "c"),
            "acme/lib/[unknown]"
        );
        assert_eq!(token_root("/work/app/lib/[conf]/[artifact]"), "/work/app/lib/");
        assert_eq!(token_root("([type]s)/[artifact]"), "");
        assert_eq!(token_root("plain"), "plain");
    }

    #[test]
    fn type_filters() {
        assert_eq!(parse_type_filter("*"), None);
        assert_eq!(parse_type_filter(" "), None);
        assert_eq!(parse_type_filter("jar, *"), None);
        assert_eq!(
            parse_type_filter("jar,bundle"),
            Some(vec!["jar".to_owned(), "bundle".to_owned()])
        );
    }

    #[test]
    fn copy_and_sync() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("cache/lib-1.0.0.jar");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, b"lib").unwrap();

        let root = dir.path().join("out");
        std::fs::create_dir_all(root.join("old")).unwrap();
        std::fs::write(root.join("old/stale.jar"), b"x").unwrap();

        let pattern = format!("{}/[conf]/[artifact].[ext]", root.display());
        let dest = PathBuf::from(fill_pattern(&pattern, &artifact(None), "default"));
        let mut plan = CopyPlan::new();
        plan.insert(artifact(None), (src, BTreeSet::from([dest.clone()])));

        let report = execute(&plan, &pattern, true, || Ok(())).unwrap();
        assert_eq!(report.copied, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(std::fs::read(&dest).unwrap(), b"lib");
        assert!(!root.join("old").exists());

        let again = execute(&plan, &pattern, true, || Ok(())).unwrap();
        assert_eq!(again.copied, 0);
        assert_eq!(again.up_to_date, 1);

        let interrupted = execute(&plan, &pattern, false, || Err(EngineError::Interrupted));
        assert!(matches!(interrupted, Err(EngineError::Interrupted)));
    }

    #[test]
    fn sync_needs_a_root() {
        let plan = CopyPlan::new();
        let err = execute(&plan, "[artifact].[ext]", true, || Ok(())).unwrap_err();
        assert!(matches!(err, EngineError::Retrieve(_)));
    }
}
