//! Per-run scan configuration: the raw request shape and its validated form.
//!
//! Validation is synchronous and total. A request that passes produces a
//! `ValidatedScan` the scheduler can trust without re-checking; a request that
//! fails produces a `ScanError::Config` or `ScanError::RunFatal` before
//! anything is dispatched or logged.

use crate::error::ScanError;
use crate::poc::model::Category;
use crate::poc::store::{CheckKind, PocRepository};
use regex::Regex;
use serde::Deserialize;
use url::Url;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 256;
pub const MAX_RETRIES_CAP: u32 = 10;

/// Scheduling mode. ALONE iterates targets in the outer loop, GROUP iterates
/// checks in the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    #[default]
    Alone,
    Group,
}

/// Narrows a category selection to one check kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum KindFilter {
    #[serde(rename = "declarative", alias = "POC")]
    Declarative,
    #[serde(rename = "script", alias = "脚本")]
    Script,
    #[default]
    #[serde(rename = "both", alias = "全部")]
    Both,
}

/// What the caller asked to run, after token classification but before the
/// repository filters are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every check of every kind.
    All,
    /// Every declarative check.
    AllDeclarative,
    /// Every scripted check.
    AllScripted,
    /// Explicit check ids, mixed kinds allowed.
    Ids(Vec<String>),
    /// Category names, narrowed by the kind filter.
    Categories(Vec<Category>),
}

const ALL_TOKENS: [&str; 2] = ["全量", "all"];
const ALL_DECLARATIVE_TOKENS: [&str; 2] = ["全部POC", "all-poc"];
const ALL_SCRIPTED_TOKENS: [&str; 2] = ["全部脚本", "all-script"];

fn check_id_pattern() -> Regex {
    Regex::new(r"^(POC|SCRIPT)-\d{6}-\d{6}-\d{3,}$").unwrap()
}

impl Selector {
    /// Classifies the raw selection tokens. Token classes cannot be mixed,
    /// except that asking for every declarative and every scripted check
    /// collapses to `All`.
    pub fn parse(tokens: &[String], repo: &dyn PocRepository) -> Result<Self, ScanError> {
        if tokens.is_empty() {
            return Err(ScanError::Config("selected_pocs is empty".into()));
        }
        if tokens.iter().any(|t| ALL_TOKENS.contains(&t.as_str())) {
            return Ok(Self::All);
        }
        let all_decl = tokens
            .iter()
            .any(|t| ALL_DECLARATIVE_TOKENS.contains(&t.as_str()));
        let all_script = tokens
            .iter()
            .any(|t| ALL_SCRIPTED_TOKENS.contains(&t.as_str()));
        match (all_decl, all_script) {
            (true, true) => return Ok(Self::All),
            (true, false) => return Ok(Self::AllDeclarative),
            (false, true) => return Ok(Self::AllScripted),
            (false, false) => {}
        }

        let id_re = check_id_pattern();
        if tokens.iter().all(|t| id_re.is_match(t)) {
            for id in tokens {
                let kind = if id.starts_with("SCRIPT-") {
                    CheckKind::Script
                } else {
                    CheckKind::Declarative
                };
                if !repo.exists(id, kind) {
                    return Err(ScanError::Config(format!("unknown check id {id}")));
                }
            }
            return Ok(Self::Ids(tokens.to_vec()));
        }
        if tokens.iter().any(|t| id_re.is_match(t)) {
            return Err(ScanError::Config(
                "check ids and category names cannot be mixed".into(),
            ));
        }

        let categories = tokens
            .iter()
            .map(|t| {
                Category::parse(t)
                    .ok_or_else(|| ScanError::Config(format!("unknown category {t}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Categories(categories))
    }
}

/// Proxy usage for one run, derived from the global pool and the scan flags.
#[derive(Debug, Clone)]
pub struct ProxyPlan {
    pub addresses: Vec<String>,
    pub rotate: bool,
    /// Liveness-probe each proxy before the scan starts.
    pub verify: bool,
    pub verification_addresses: Vec<String>,
}

/// Raw scan request as submitted over the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfigInput {
    pub urls: Vec<String>,
    /// Newline-delimited `Key: Value` lines applied to every request.
    #[serde(default)]
    pub headers: String,
    pub selected_pocs: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub use_poc_script: KindFilter,
    #[serde(default)]
    pub skip_write_content: bool,
    #[serde(default)]
    pub skip_verify_cookie: bool,
    #[serde(default)]
    pub enable_proxy: bool,
    #[serde(default)]
    pub skip_proxy_verify: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub enable_retry_backoff: bool,
}

fn default_concurrency() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

/// Fully validated scan parameters; everything the scheduler consumes.
#[derive(Debug, Clone)]
pub struct ValidatedScan {
    pub urls: Vec<String>,
    pub headers: String,
    pub selector: Selector,
    pub concurrency: usize,
    pub mode: Mode,
    pub kind_filter: KindFilter,
    pub skip_write_content: bool,
    pub skip_verify_cookie: bool,
    pub proxy: Option<ProxyPlan>,
    pub max_retries: u32,
    pub enable_retry_backoff: bool,
}

fn host_is_acceptable(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    if host.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    let domain_re = Regex::new(r"^[a-zA-Z0-9\-\.]+\.[a-zA-Z]{1,}$").unwrap();
    domain_re.is_match(host)
}

fn validate_url(raw: &str) -> Result<String, ScanError> {
    let parsed =
        Url::parse(raw).map_err(|e| ScanError::Config(format!("invalid url {raw}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ScanError::Config(format!(
                "unsupported scheme {other} in {raw}"
            )))
        }
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ScanError::Config(format!("url {raw} has no host")))?;
    if !host_is_acceptable(host) {
        return Err(ScanError::Config(format!("unacceptable host in {raw}")));
    }
    // Trailing slash is stripped so check paths join predictably.
    Ok(raw.trim_end_matches('/').to_string())
}

fn validate_headers(headers: &str) -> Result<(), ScanError> {
    for line in headers.lines().filter(|l| !l.trim().is_empty()) {
        if !line.contains(':') {
            return Err(ScanError::Config(format!(
                "header line without a colon: {line}"
            )));
        }
    }
    Ok(())
}

fn proxy_address_re() -> Regex {
    Regex::new(r"^https?://[\w.-]+(:\d+)?$").unwrap()
}

impl ScanConfigInput {
    pub fn validate(
        self,
        global: &crate::config::GlobalConfig,
        repo: &dyn PocRepository,
    ) -> Result<ValidatedScan, ScanError> {
        if self.urls.is_empty() {
            return Err(ScanError::Config("no target urls".into()));
        }
        let urls = self
            .urls
            .iter()
            .map(|u| validate_url(u))
            .collect::<Result<Vec<_>, _>>()?;
        validate_headers(&self.headers)?;

        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ScanError::Config(format!(
                "concurrency {} outside {MIN_CONCURRENCY}..={MAX_CONCURRENCY}",
                self.concurrency
            )));
        }
        if self.max_retries > MAX_RETRIES_CAP {
            return Err(ScanError::Config(format!(
                "max_retries {} exceeds cap {MAX_RETRIES_CAP}",
                self.max_retries
            )));
        }

        let selector = Selector::parse(&self.selected_pocs, repo)?;

        let proxy = if self.enable_proxy {
            let pool = &global.proxy;
            let addr_re = proxy_address_re();
            for addr in &pool.addresses {
                if !addr_re.is_match(addr) {
                    return Err(ScanError::Config(format!("invalid proxy address {addr}")));
                }
            }
            // Rotation with an empty pool is refused by the worker, which
            // records it in the core log; the plan is carried through intact.
            if pool.addresses.is_empty() && !pool.enable_rotation {
                None
            } else {
                Some(ProxyPlan {
                    addresses: pool.addresses.clone(),
                    rotate: pool.enable_rotation,
                    verify: !self.skip_proxy_verify,
                    verification_addresses: pool.verification_addresses.clone(),
                })
            }
        } else {
            None
        };

        Ok(ValidatedScan {
            urls,
            headers: self.headers,
            selector,
            concurrency: self.concurrency,
            mode: self.mode,
            kind_filter: self.use_poc_script,
            skip_write_content: self.skip_write_content,
            skip_verify_cookie: self.skip_verify_cookie,
            proxy,
            max_retries: self.max_retries,
            enable_retry_backoff: self.enable_retry_backoff,
        })
    }
}
