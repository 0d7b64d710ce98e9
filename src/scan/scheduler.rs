//! Task scheduling: mode ordering, bounded concurrency, proxy rotation.
//!
//! ALONE walks targets in the outer loop and fans checks out underneath each
//! one; GROUP walks checks in the outer loop and fans targets out. Either
//! way the fan-out runs under a sliding window bounded by the configured
//! concurrency, and with proxy rotation enabled the inner list is cut into
//! batches that each get a fresh client bound to the next proxy.

use crate::config::scan::{Mode, ValidatedScan};
use crate::config::GlobalConfig;
use crate::error::ScanError;
use crate::http::client::ClientFactory;
use crate::http::executor::{RequestExecutor, RetryPolicy, Transport};
use crate::http::request::ProbeRequest;
use crate::logsink::{LogHandle, Verdict};
use crate::poc::model::{CheckBody, CheckDefinition, RulePosition};
use crate::poc::resolver::Resolver;
use crate::poc::store::PocRepository;
use crate::scan::rules::{evaluate, evaluate_elapsed, split_second_request, RuleOutcome};
use crate::scan::CancelFlag;
use crate::script::ScriptRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub struct Scheduler {
    cfg: ValidatedScan,
    global: Arc<GlobalConfig>,
    repo: Arc<dyn PocRepository>,
    scripts: Arc<ScriptRegistry>,
    clients: Arc<dyn ClientFactory>,
    log: LogHandle,
    cancel: CancelFlag,
}

/// Everything one declarative probe task needs, cloned into its spawn.
struct TaskCtx {
    global: Arc<GlobalConfig>,
    repo: Arc<dyn PocRepository>,
    headers: String,
    policy: RetryPolicy,
    log: LogHandle,
    cancel: CancelFlag,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ValidatedScan,
        global: Arc<GlobalConfig>,
        repo: Arc<dyn PocRepository>,
        scripts: Arc<ScriptRegistry>,
        clients: Arc<dyn ClientFactory>,
        log: LogHandle,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            cfg,
            global,
            repo,
            scripts,
            clients,
            log,
            cancel,
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.cfg.max_retries,
            backoff: self.cfg.enable_retry_backoff,
        }
    }

    fn window(&self, inner_len: usize) -> usize {
        match self.cfg.mode {
            Mode::Alone => self.cfg.concurrency,
            Mode::Group => self.cfg.concurrency.min(inner_len.max(1)),
        }
    }

    pub async fn run(&self) -> Result<(), ScanError> {
        let resolved = match Resolver::new(self.repo.as_ref()).resolve(&self.cfg) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.log.error(format!("ERROR: {e}"), "");
                return Err(e);
            }
        };
        if let Some(plan) = &self.cfg.proxy {
            if plan.rotate && plan.addresses.is_empty() {
                let e = ScanError::RunFatal(
                    "proxy rotation enabled with an empty proxy pool".into(),
                );
                self.log.error(format!("ERROR: {e}"), "");
                return Err(e);
            }
        }
        if let Err(e) = self.verify_proxies().await {
            self.log.error(format!("ERROR: {e}"), "");
            return Err(e);
        }

        if let Some(pocs) = &resolved.declarative {
            info!(count = pocs.len(), "running declarative checks");
            self.run_declarative(pocs).await?;
        }
        if let Some(scripts) = &resolved.scripts {
            info!(count = scripts.len(), "running scripted checks");
            self.run_scripts(scripts).await;
        }
        Ok(())
    }

    /// Probes every proxy through the verification addresses before any scan
    /// traffic flows. One 200 or 302 from any address passes a proxy.
    async fn verify_proxies(&self) -> Result<(), ScanError> {
        let Some(plan) = &self.cfg.proxy else {
            return Ok(());
        };
        if !plan.verify || plan.verification_addresses.is_empty() {
            return Ok(());
        }
        for proxy in &plan.addresses {
            let transport = self.clients.make(Some(proxy))?;
            let mut alive = false;
            for address in &plan.verification_addresses {
                let req = ProbeRequest {
                    method: "GET".into(),
                    url: address.clone(),
                    headers: vec![],
                    body: None,
                };
                match transport.send(&req, Some(Duration::from_secs(10))).await {
                    Ok(resp) if matches!(resp.status, 200 | 302) => {
                        alive = true;
                        break;
                    }
                    Ok(resp) => debug!(proxy, status = resp.status, "proxy probe refused"),
                    Err(e) => debug!(proxy, error = %e, "proxy probe failed"),
                }
            }
            if !alive {
                return Err(ScanError::RunFatal(format!("proxy {proxy} failed verification")));
            }
        }
        Ok(())
    }

    fn task_ctx(&self) -> TaskCtx {
        TaskCtx {
            global: self.global.clone(),
            repo: self.repo.clone(),
            headers: self.cfg.headers.clone(),
            policy: self.policy(),
            log: self.log.clone(),
            cancel: self.cancel.clone(),
        }
    }

    async fn run_declarative(&self, pocs: &[String]) -> Result<(), ScanError> {
        let rotate = self
            .cfg
            .proxy
            .as_ref()
            .map(|p| p.rotate)
            .unwrap_or(false);

        let outer: Vec<Vec<(String, String)>> = match self.cfg.mode {
            Mode::Alone => self
                .cfg
                .urls
                .iter()
                .map(|url| {
                    pocs.iter()
                        .map(|poc| (url.clone(), poc.clone()))
                        .collect()
                })
                .collect(),
            Mode::Group => pocs
                .iter()
                .map(|poc| {
                    self.cfg
                        .urls
                        .iter()
                        .map(|url| (url.clone(), poc.clone()))
                        .collect()
                })
                .collect(),
        };

        if rotate {
            let addresses = self
                .cfg
                .proxy
                .as_ref()
                .map(|p| p.addresses.clone())
                .unwrap_or_default();
            let mut proxy_index = 0usize;
            for inner in outer {
                let window = self.window(inner.len());
                for batch in inner.chunks(window.max(1)) {
                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                    let proxy = &addresses[proxy_index % addresses.len()];
                    // One client per batch; dropping it tears the proxy
                    // binding down before the next batch starts.
                    let transport = self.clients.make(Some(proxy.as_str()))?;
                    self.run_batch(transport, batch.to_vec(), window).await;
                    proxy_index += 1;
                }
            }
        } else {
            let proxy = self
                .cfg
                .proxy
                .as_ref()
                .and_then(|p| p.addresses.first())
                .map(String::as_str);
            let transport = self.clients.make(proxy)?;
            for inner in outer {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                let window = self.window(inner.len());
                self.run_batch(transport.clone(), inner, window).await;
            }
        }
        Ok(())
    }

    /// Sliding window: a task is admitted the moment a permit frees up, not
    /// when the whole previous wave has finished.
    async fn run_batch(
        &self,
        transport: Arc<dyn Transport>,
        items: Vec<(String, String)>,
        window: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(window.max(1)));
        let mut tasks = JoinSet::new();
        for (url, poc_id) in items {
            if self.cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let ctx = self.task_ctx();
            let transport = transport.clone();
            tasks.spawn(async move {
                let _permit = permit;
                run_check(&ctx, transport, &url, &poc_id).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn run_scripts(&self, script_ids: &[String]) {
        let pairs: Vec<(String, String)> = match self.cfg.mode {
            Mode::Alone => self
                .cfg
                .urls
                .iter()
                .flat_map(|url| script_ids.iter().map(|s| (url.clone(), s.clone())))
                .collect(),
            Mode::Group => script_ids
                .iter()
                .flat_map(|s| self.cfg.urls.iter().map(|url| (url.clone(), s.clone())))
                .collect(),
        };

        let semaphore = Arc::new(Semaphore::new(self.cfg.concurrency));
        let mut tasks = JoinSet::new();
        for (url, script_id) in pairs {
            if self.cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let repo = self.repo.clone();
            let registry = self.scripts.clone();
            let log = self.log.clone();
            tasks.spawn(async move {
                let _permit = permit;
                run_script_check(repo, registry, log, &url, &script_id).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

fn verdict(matched: bool) -> Verdict {
    if matched {
        Verdict::Vulnerable
    } else {
        Verdict::NotVulnerable
    }
}

fn outcome_detail(def: &CheckDefinition, outcome: &RuleOutcome) -> String {
    let mut detail = format!("{} [{}] {}", def.id, def.severity, outcome.annotation);
    if let Some(description) = &outcome.description {
        detail.push(' ');
        detail.push_str(description);
    }
    detail
}

/// Runs one declarative check against one target. Failures are recorded in
/// the core log and never propagate past the task.
async fn run_check(ctx: &TaskCtx, transport: Arc<dyn Transport>, url: &str, poc_id: &str) {
    if let Err(e) = run_check_inner(ctx, transport, url, poc_id).await {
        warn!(url, poc_id, error = %e, "check failed");
        ctx.log
            .error(format!("ERROR: {e}"), format!("{url} POC INFO: {poc_id}"));
    }
}

async fn run_check_inner(
    ctx: &TaskCtx,
    transport: Arc<dyn Transport>,
    url: &str,
    poc_id: &str,
) -> Result<(), ScanError> {
    let def: CheckDefinition = ctx
        .repo
        .get_by_id(poc_id)
        .ok_or_else(|| ScanError::Config(format!("check {poc_id} disappeared from the store")))?;
    let CheckBody::Declarative {
        request,
        payload,
        rules,
    } = &def.body
    else {
        return Err(ScanError::Config(format!("check {poc_id} is not declarative")));
    };

    let executor = RequestExecutor::new(transport, ctx.global.retry.clone(), ctx.log.clone());
    let base = ProbeRequest::from_template(url, &ctx.headers, request);

    for value in payload.values() {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let req = base.with_payload(payload.position, &value);

        if let Some(timing_rule) = def.timing_only_rule() {
            let threshold: u64 = timing_rule.value.trim().parse().map_err(|_| {
                ScanError::Config(format!(
                    "rule value {:?} is not a duration in seconds",
                    timing_rule.value
                ))
            })?;
            // The client must outlive the delay being measured.
            let ceiling = ctx.global.client.read_timeout_secs.max(threshold);
            let start = Instant::now();
            let _ = executor
                .send(&req, RetryPolicy::single(), Some(Duration::from_secs(ceiling)))
                .await;
            let elapsed = start.elapsed();
            let outcome = evaluate_elapsed(timing_rule, elapsed)?;
            ctx.log.result(
                url,
                verdict(outcome.matched),
                &def.name,
                outcome_detail(&def, &outcome),
            );
            continue;
        }

        let response = executor.send(&req, ctx.policy, None).await;
        for rule in rules {
            let outcome = if rule.position == RulePosition::SecondRequest {
                let (transplanted, path) = split_second_request(rule)?;
                let second = ProbeRequest {
                    method: "GET".into(),
                    url: format!("{url}{path}"),
                    headers: vec![],
                    body: None,
                };
                let follow_up = executor
                    .send(
                        &second,
                        RetryPolicy {
                            max_attempts: 3,
                            backoff: false,
                        },
                        None,
                    )
                    .await;
                evaluate(&transplanted, follow_up.as_ref())?
            } else {
                evaluate(rule, response.as_ref())?
            };
            ctx.log.result(
                url,
                verdict(outcome.matched),
                &def.name,
                outcome_detail(&def, &outcome),
            );
        }
    }
    Ok(())
}

/// Scripts are synchronous plugin calls, so they run on the blocking pool.
async fn run_script_check(
    repo: Arc<dyn PocRepository>,
    registry: Arc<ScriptRegistry>,
    log: LogHandle,
    url: &str,
    script_id: &str,
) {
    let Some(def) = repo.get_by_id(script_id) else {
        log.error(
            format!("ERROR: check {script_id} disappeared from the store"),
            url,
        );
        return;
    };
    let CheckBody::Script { script_ref } = &def.body else {
        log.error(
            format!("ERROR: check {script_id} is not scripted"),
            url,
        );
        return;
    };

    let reference = script_ref.clone();
    let target = url.to_string();
    let joined = tokio::task::spawn_blocking(move || registry.invoke(&reference, &target)).await;
    match joined {
        Ok(Ok(matched)) => log.result(
            url,
            verdict(matched),
            &def.name,
            format!("{script_id} [{}] script check: {script_ref}", def.severity),
        ),
        Ok(Err(e)) => log.error(
            format!("ERROR: {e}"),
            format!("{url} POC INFO: {script_id}"),
        ),
        Err(e) => log.error(
            format!("ERROR: script task panicked: {e}"),
            format!("{url} POC INFO: {script_id}"),
        ),
    }
}
