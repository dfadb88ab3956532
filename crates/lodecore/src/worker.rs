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
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use lodecake::Engine;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const WORKER_THREAD_NAME: &str = "lode resolver thread";

#[derive(Debug)]
pub enum WorkerOutcome<T> {
    Completed(T),
    Cancelled,
    /// The work died without producing a value.
    Panicked(String),
}

/// Runs resolve work on its own thread while the caller watches a
/// cancellation token.
///
/// On cancellation the engine is asked to interrupt the worker and the
/// caller returns at once. The worker thread is left to wind down by itself.
#[derive(Debug, Clone)]
pub struct CancellableWorker {
    poll_interval: Duration,
}

impl Default for CancellableWorker {
    fn default() -> Self {
        CancellableWorker {
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl CancellableWorker {
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        CancellableWorker { poll_interval }
    }

    pub fn run<T, F>(
        &self,
        work: F,
        engine: &Arc<Engine>,
        token: &CancellationToken,
    ) -> WorkerOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if token.is_cancelled() {
            return WorkerOutcome::Cancelled;
        }

        let (tx, rx) = mpsc::channel();
        let worker_engine = Arc::clone(engine);
        let spawned = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                let value = work();
                // an interrupt that arrived after the last check is stale now
                worker_engine.clear_interrupt(std::thread::current().id());
                // The receiver is gone when the caller gave up waiting.
                let _ = tx.send(value);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return WorkerOutcome::Panicked(format!("failed to spawn worker: {e}")),
        };
        let thread = handle.thread().id();

        loop {
            match rx.recv_timeout(self.poll_interval) {
                Ok(value) => {
                    let _ = handle.join();
                    return WorkerOutcome::Completed(value);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        debug!("Cancelling {:?}", thread);
                        engine.interrupt(thread);
                        return WorkerOutcome::Cancelled;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let reason = match handle.join() {
                        Err(payload) => panic_message(payload.as_ref()),
                        Ok(()) => "worker exited without a result".to_owned(),
                    };
                    warn!("Resolver thread stopped: {}", reason);
                    return WorkerOutcome::Panicked(reason);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};

    use lodecake::settings::{SettingsLoader, SettingsSource};

    use super::*;

    fn engine(dir: &std::path::Path) -> Arc<Engine> {
        let settings = SettingsLoader::new()
            .user_cache(dir.join("cache"))
            .load(SettingsSource::Default)
            .unwrap();
        Arc::new(Engine::new(settings))
    }

    #[test]
    fn completes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let token = CancellationToken::new();
        let outcome = CancellableWorker::default().run(|| 42, &engine, &token);
        assert!(matches!(outcome, WorkerOutcome::Completed(42)));
    }

    #[test]
    fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let token = CancellationToken::new();
        token.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let outcome = CancellableWorker::default().run(
            move || flag.store(true, Ordering::SeqCst),
            &engine,
            &token,
        );
        assert!(matches!(outcome, WorkerOutcome::Cancelled));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let token = CancellationToken::new();
        let canceller = token.clone();
        let worker = CancellableWorker::with_poll_interval(Duration::from_millis(10));
        let outcome = worker.run(
            move || {
                canceller.cancel();
                std::thread::sleep(Duration::from_millis(200));
            },
            &engine,
            &token,
        );
        assert!(matches!(outcome, WorkerOutcome::Cancelled));
    }

    #[test]
    fn late_interrupt_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let token = CancellationToken::new();
        let canceller = token.clone();
        let (tx, rx) = mpsc::channel();
        let worker = CancellableWorker::with_poll_interval(Duration::from_millis(10));
        let outcome = worker.run(
            move || {
                tx.send(std::thread::current().id()).unwrap();
                canceller.cancel();
                std::thread::sleep(Duration::from_millis(100));
            },
            &engine,
            &token,
        );
        assert!(matches!(outcome, WorkerOutcome::Cancelled));
        let thread = rx.recv().unwrap();
        // the worker never checked again, so only its exit clears the mark
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while engine.is_interrupt_pending(thread) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!engine.is_interrupt_pending(thread));
    }

    #[test]
    fn panic_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let token = CancellationToken::new();
        let outcome: WorkerOutcome<()> =
            CancellableWorker::default().run(|| panic!("boom"), &engine, &token);
        match outcome {
            WorkerOutcome::Panicked(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
