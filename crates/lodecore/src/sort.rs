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

use std::sync::Arc;

use indexmap::IndexSet;
use lodeutil::descriptor::ModuleDescriptor;
use lodeutil::version::VersionMatcher;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

/// Orders descriptors so every module comes after the modules it depends on
/// among `descriptors`. Returns indices into `descriptors`.
///
/// A dependency only counts when `matcher` accepts the revision of the module
/// found in the batch. Cycles are reported and broken at the edge closing
/// them; the rest of the order is kept.
pub fn sort_descriptors(descriptors: &[Arc<ModuleDescriptor>], matcher: VersionMatcher) -> Vec<usize> {
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for (i, md) in descriptors.iter().enumerate() {
        graph.add_node(i);
        for dep in &md.dependencies {
            for (j, other) in descriptors.iter().enumerate() {
                if i == j || other.module_id() != &dep.module {
                    continue;
                }
                if matcher.accept(&dep.revision, &other.mrid.revision) {
                    graph.add_edge(i, j, ());
                } else {
                    warn!(
                        "{} depends on {} {} but the batch holds {}; not ordering them",
                        md.mrid, dep.module, dep.revision, other.mrid
                    );
                }
            }
        }
    }

    let mut sorted = Vec::with_capacity(descriptors.len());
    let mut visited = std::collections::HashSet::new();
    let mut path: IndexSet<usize> = IndexSet::new();
    let mut stack = Vec::new();
    for start in 0..descriptors.len() {
        if visited.contains(&start) {
            continue;
        }
        stack.push(WorkStackItem::new(start));
        while let Some(it) = stack.pop() {
            if it.pop {
                path.pop();
                sorted.push(it.node);
                continue;
            }
            let node = it.node;
            if path.contains(&node) {
                let cycle: Vec<String> = path
                    .iter()
                    .skip_while(|n| **n != node)
                    .chain([&node])
                    .map(|n| descriptors[*n].mrid.to_string())
                    .collect();
                warn!("circular dependency detected: {}", cycle.join(" -> "));
                continue;
            }
            if !visited.insert(node) {
                continue;
            }
            path.insert(node);
            stack.push(WorkStackItem::pop(node));
            // reversed so that dependencies are visited in declaration order
            let mut deps: Vec<usize> = graph.neighbors(node).collect();
            deps.sort_unstable();
            for dep in deps.into_iter().rev() {
                stack.push(WorkStackItem::new(dep));
            }
        }
    }
    debug!(
        "Resolve order: {}",
        sorted
            .iter()
            .map(|i| descriptors[*i].mrid.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    sorted
}

struct WorkStackItem {
    node: usize,
    pop: bool,
}

impl WorkStackItem {
    fn new(node: usize) -> Self {
        Self { node, pop: false }
    }

    /// The node's dependencies are done once this comes off the stack.
    fn pop(node: usize) -> Self {
        Self { node, pop: true }
    }
}

#[cfg(test)]
mod test {
    use lodeutil::descriptor::{ConfMapping, DependencyDescriptor};

    use super::*;

    fn module(id: &str, deps: &[(&str, &str)]) -> Arc<ModuleDescriptor> {
        let mut md = ModuleDescriptor::new(id.parse().unwrap());
        for (name, rev) in deps {
            md.dependencies.push(DependencyDescriptor {
                module: name.parse().unwrap(),
                revision: (*rev).to_owned(),
                confs: vec!["*->*".parse::<ConfMapping>().unwrap()],
                transitive: true,
            });
        }
        Arc::new(md)
    }

    fn names(mds: &[Arc<ModuleDescriptor>], order: &[usize]) -> Vec<String> {
        order.iter().map(|i| mds[*i].mrid.name().to_owned()).collect()
    }

    #[test]
    fn dependencies_first() {
        let mds = vec![
            module("acme#app;1.0.0", &[("acme#lib", "^1.0"), ("acme#util", "*")]),
            module("acme#lib;1.2.0", &[("acme#util", "*")]),
            module("acme#util;0.1.0", &[]),
            module("acme#other;1.0.0", &[]),
        ];
        let order = sort_descriptors(&mds, VersionMatcher::Semver);
        assert_eq!(names(&mds, &order), vec!["util", "lib", "app", "other"]);
    }

    #[test]
    fn unmatched_revision_is_not_an_edge() {
        let mds = vec![
            module("acme#app;1.0.0", &[("acme#lib", "^2.0")]),
            module("acme#lib;1.2.0", &[]),
        ];
        let order = sort_descriptors(&mds, VersionMatcher::Semver);
        assert_eq!(names(&mds, &order), vec!["app", "lib"]);
    }

    #[test_log::test]
    fn cycles_are_broken() {
        let mds = vec![
            module("acme#a;1.0.0", &[("acme#b", "*")]),
            module("acme#b;1.0.0", &[("acme#a", "*")]),
        ];
        let order = sort_descriptors(&mds, VersionMatcher::Semver);
        assert_eq!(names(&mds, &order), vec!["b", "a"]);
    }
}
