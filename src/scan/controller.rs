//! Run lifecycle: single-flight admission, worker ownership, hard stop.
//!
//! A run executes on its own OS thread with a dedicated tokio runtime, so a
//! stop can abandon the whole runtime without unwinding tasks one by one.

use crate::config::scan::ScanConfigInput;
use crate::config::GlobalConfig;
use crate::http::client::{ClientFactory, ReqwestFactory};
use crate::logsink::LogSink;
use crate::poc::store::PocRepository;
use crate::scan::scheduler::Scheduler;
use crate::scan::CancelFlag;
use crate::script::ScriptRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
}

/// Long-lived dependencies shared by every run the controller starts.
pub struct ScanEnvironment {
    pub global: Arc<GlobalConfig>,
    pub repo: Arc<dyn PocRepository>,
    pub scripts: Arc<ScriptRegistry>,
    pub log_dir: PathBuf,
    /// Overrides the reqwest factory; tests inject transports here.
    pub client_factory: Option<Arc<dyn ClientFactory>>,
}

struct Worker {
    cancel: CancelFlag,
    thread: thread::JoinHandle<()>,
}

pub struct ScanController {
    env: ScanEnvironment,
    worker: Option<Worker>,
}

impl ScanController {
    pub fn new(env: ScanEnvironment) -> Self {
        Self { env, worker: None }
    }

    pub fn status(&self) -> RunStatus {
        match &self.worker {
            None => RunStatus::Idle,
            Some(w) if w.thread.is_finished() => RunStatus::Completed,
            Some(_) => RunStatus::Running,
        }
    }

    /// Validates and launches a run. At most one run exists at a time; a
    /// request while one is active is refused without touching the logs.
    pub fn start(&mut self, raw: ScanConfigInput) -> (bool, String) {
        if self.status() == RunStatus::Running {
            return (false, "a scan is already running".to_string());
        }
        let cfg = match raw.validate(&self.env.global, self.env.repo.as_ref()) {
            Ok(cfg) => cfg,
            Err(e) => return (false, e.to_string()),
        };

        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let global = self.env.global.clone();
        let repo = self.env.repo.clone();
        let scripts = self.env.scripts.clone();
        let log_dir = self.env.log_dir.clone();
        let factory = self.env.client_factory.clone().unwrap_or_else(|| {
            Arc::new(ReqwestFactory::new(global.client.clone(), cfg.concurrency))
        });

        let thread = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "cannot build scan runtime");
                    return;
                }
            };
            runtime.block_on(async move {
                let sink = match LogSink::create(&log_dir).await {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!(error = %e, "cannot open run logs");
                        return;
                    }
                };
                let scheduler = Scheduler::new(
                    cfg,
                    global,
                    repo,
                    scripts,
                    factory,
                    sink.handle(),
                    worker_cancel.clone(),
                );
                tokio::select! {
                    _ = worker_cancel.cancelled() => {
                        info!("scan cancelled");
                    }
                    outcome = scheduler.run() => {
                        if let Err(e) = outcome {
                            error!(error = %e, "scan aborted");
                        } else {
                            info!("scan finished");
                        }
                    }
                }
                drop(scheduler);
                sink.shutdown().await;
            });
        });

        self.worker = Some(Worker { cancel, thread });
        (true, "scan started".to_string())
    }

    /// Requests cancellation and waits up to the grace period for the worker
    /// to wind down. A worker that blows the grace is left to die with its
    /// runtime.
    pub fn stop(&mut self, grace: Duration) -> (bool, String) {
        let Some(worker) = &self.worker else {
            return (false, "no running scan task".to_string());
        };
        worker.cancel.cancel();
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if worker.thread.is_finished() {
                return (true, "scan stopped".to_string());
            }
            thread::sleep(Duration::from_millis(20));
        }
        if worker.thread.is_finished() {
            (true, "scan stopped".to_string())
        } else {
            (
                false,
                "scan did not stop within the grace period".to_string(),
            )
        }
    }
}
