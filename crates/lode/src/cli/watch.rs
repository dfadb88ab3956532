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


use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use lodecore::{Orchestrator, ResolveHooks, ResolveRequest, ResolveResult};
use lodeutil::path::ResolvedPath;
use lodeutil::preferences::Preferences;
use lodeutil::variables::Variables;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, trace, warn};

use super::{CliHost, GlobalFlags, RequestFlags, print_result, project_refs};

/// Resolve the given projects again whenever their descriptor or settings change
#[derive(Debug, clap::Parser, Clone)]
pub struct WatchSubcommand {
    /// Project directories, each holding a `lode.json`
    #[clap(default_value = ".")]
    pub projects: Vec<PathBuf>,

    #[clap(flatten)]
    pub request: RequestFlags,
}

struct PrintSummary;

impl ResolveHooks for PrintSummary {
    fn post_resolve(&self, request: &ResolveRequest, result: &ResolveResult) {
        print_result(request, result);
    }
}

/// The files a request depends on besides its dependencies.
struct Watched {
    request: Arc<ResolveRequest>,
    descriptor: Option<PathBuf>,
    settings: Option<PathBuf>,
}

impl Watched {
    fn new(request: Arc<ResolveRequest>) -> Self {
        let location = request.project().map(|p| p.location.clone());
        let descriptor = location
            .as_deref()
            .map(|l| normalize(&l.join(&request.config().descriptor_path)));
        let settings = ResolvedPath::resolve(
            &request.config().settings.settings_path,
            location.as_deref(),
            &Variables::new(),
        )
        .ok()
        .and_then(|p| p.as_file().map(normalize));
        Watched {
            request,
            descriptor,
            settings,
        }
    }

    fn dirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        [&self.descriptor, &self.settings]
            .into_iter()
            .flatten()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Change {
    descriptor: bool,
    settings: bool,
}

impl Change {
    fn any(&self) -> bool {
        self.descriptor || self.settings
    }
}

fn normalize(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Check if the event kind may have changed the content of a file.
fn is_event_relevant(event: &notify::Event) -> bool {
    match event.kind {
        EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    }
}

fn changes(watched: &[Watched], events: &[notify::Event]) -> Vec<Change> {
    let touched: BTreeSet<PathBuf> = events
        .iter()
        .filter(|evt| is_event_relevant(evt))
        .flat_map(|evt| evt.paths.iter().map(|p| normalize(p)))
        .collect();
    watched
        .iter()
        .map(|w| {
            let hit = |p: &Option<PathBuf>| p.as_ref().is_some_and(|p| touched.contains(p));
            Change {
                descriptor: hit(&w.descriptor),
                settings: hit(&w.settings),
            }
        })
        .collect()
}

pub fn run_watch(_flags: &GlobalFlags, cmd: WatchSubcommand) -> anyhow::Result<i32> {
    let prefs = Preferences::load()?;
    let projects = project_refs(&cmd.projects);
    let host = Arc::new(CliHost::new(&projects, cmd.request.in_workspace));
    let orchestrator = Orchestrator::new(host, prefs.clone());
    let token = crate::shutdown::setup_shutdown_handler()?;

    let hooks: Arc<dyn ResolveHooks> = Arc::new(PrintSummary);
    let watched: Vec<Watched> = cmd
        .request
        .requests(&projects, &prefs, Some(hooks))
        .into_iter()
        .map(Watched::new)
        .collect();

    let (tx, rx) = std::sync::mpsc::channel();
    debug!("Creating file watcher with default config");
    let mut watcher = RecommendedWatcher::new(tx, Config::default())
        .context("Failed to create a directory watcher")?;
    let dirs: BTreeSet<PathBuf> = watched.iter().flat_map(Watched::dirs).collect();
    for dir in &dirs {
        info!("Watching directory '{}'", dir.display());
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory: '{}'", dir.display()))?;
    }

    for w in &watched {
        orchestrator.add_request(Arc::clone(&w.request));
    }

    const DEBOUNCE_TIME: Duration = Duration::from_millis(300);
    const POLL_TIME: Duration = Duration::from_millis(200);
    debug!("Watcher loop started (debounce = {:?})", DEBOUNCE_TIME);
    while !token.is_cancelled() {
        let evt = match rx.recv_timeout(POLL_TIME) {
            Ok(Ok(evt)) => evt,
            Ok(Err(e)) => {
                warn!(error = ?e, "Watcher event channel returned an error");
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut evt_list = vec![evt];
        let start = std::time::Instant::now();
        while start.elapsed() < DEBOUNCE_TIME {
            if let Ok(Ok(evt)) = rx.recv_timeout(DEBOUNCE_TIME.saturating_sub(start.elapsed())) {
                evt_list.push(evt);
            }
        }
        debug!("Debounced {} filesystem event(s)", evt_list.len());

        for (w, change) in watched.iter().zip(changes(&watched, &evt_list)) {
            if !change.any() {
                continue;
            }
            {
                let mut cache = w
                    .request
                    .cache()
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if change.settings {
                    cache.reset();
                } else {
                    cache.forget_descriptor();
                }
            }
            println!("{} {}", "Changed".cyan().bold(), w.request);
            orchestrator.add_request(Arc::clone(&w.request));
        }
        trace!("Waiting for filesystem changes");
    }

    info!("Stopping the watcher");
    orchestrator.shutdown();
    Ok(0)
}

#[cfg(test)]
mod test {
    use super::*;

    use lodecore::{ProjectRef, ResolverConfig};
    use lodeutil::common::DESCRIPTOR_FILE;
    use notify::event::{CreateKind, Event, MetadataKind, ModifyKind};

    fn build_event(kind: EventKind, path: &Path) -> notify::Event {
        Event {
            kind,
            paths: vec![path.to_path_buf()],
            attrs: Default::default(),
        }
    }

    fn watched(dir: &Path, settings: &str) -> Watched {
        let mut config = ResolverConfig::for_project(ProjectRef::from_location(dir));
        config.settings.settings_path = settings.into();
        Watched::new(Arc::new(ResolveRequest::with_own_cache(config)))
    }

    #[test]
    fn descriptor_and_settings_changes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join(DESCRIPTOR_FILE), "{}").unwrap();
        std::fs::write(root.join("settings.json"), "{}").unwrap();
        let w = [watched(root, "settings.json"), watched(root, "")];
        assert!(w[1].settings.is_none());

        let created = || EventKind::Create(CreateKind::File);
        let res = changes(&w, &[build_event(created(), &root.join(DESCRIPTOR_FILE))]);
        assert_eq!(
            res,
            vec![
                Change {
                    descriptor: true,
                    settings: false
                },
                Change {
                    descriptor: true,
                    settings: false
                }
            ]
        );

        let res = changes(&w, &[build_event(created(), &root.join("settings.json"))]);
        assert!(res[0].settings && !res[0].descriptor);
        assert!(!res[1].any());
    }

    #[test]
    fn metadata_and_unrelated_files_are_ignored() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join(DESCRIPTOR_FILE), "{}").unwrap();
        std::fs::write(root.join("notes.txt"), "").unwrap();
        let w = [watched(root, "")];

        let touch = EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime));
        let res = changes(&w, &[build_event(touch, &root.join(DESCRIPTOR_FILE))]);
        assert!(!res[0].any());

        let created = EventKind::Create(CreateKind::File);
        let res = changes(&w, &[build_event(created, &root.join("notes.txt"))]);
        assert!(!res[0].any());
    }

    #[test]
    fn remote_settings_are_not_watched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let w = watched(temp_dir.path(), "https://example.com/settings.json");
        assert!(w.settings.is_none());
        assert_eq!(w.dirs().count(), 1);
    }
}
