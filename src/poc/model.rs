//! Check definition ("POC") data model.
//!
//! Definitions are immutable once resolved for a run. The repository wire
//! format accepts the upstream Chinese UI literals as serde aliases; the
//! rest of the engine only ever sees the typed enums.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// Closed vulnerability-type enumeration. The rename targets are the wire
/// tokens; the aliases accept the upstream UI literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "info-leak", alias = "信息泄露")]
    InfoLeak,
    #[serde(rename = "xss", alias = "跨站脚本(XSS)")]
    Xss,
    #[serde(rename = "sql-injection", alias = "SQL注入")]
    SqlInjection,
    #[serde(rename = "command-exec", alias = "命令执行")]
    CommandExec,
    #[serde(rename = "code-exec", alias = "任意代码执行")]
    CodeExec,
    #[serde(rename = "file", alias = "文件类")]
    FileVuln,
    #[serde(rename = "unauthorized", alias = "未授权")]
    Unauthorized,
    #[serde(rename = "request-forgery", alias = "请求伪造(CSRF/SSRF)")]
    RequestForgery,
    #[serde(rename = "directory", alias = "目录类漏洞")]
    DirectoryVuln,
    #[serde(rename = "denial-of-service", alias = "拒绝服务")]
    DenialOfService,
}

impl Category {
    /// Maps a selector token (English wire token or upstream UI literal) to
    /// the typed category. The raw strings are a serialization detail.
    pub fn parse(token: &str) -> Option<Self> {
        let c = match token {
            "info-leak" | "信息泄露" => Self::InfoLeak,
            "xss" | "跨站脚本(XSS)" => Self::Xss,
            "sql-injection" | "SQL注入" => Self::SqlInjection,
            "command-exec" | "命令执行" => Self::CommandExec,
            "code-exec" | "任意代码执行" => Self::CodeExec,
            "file" | "文件类" => Self::FileVuln,
            "unauthorized" | "未授权" => Self::Unauthorized,
            "request-forgery" | "请求伪造(CSRF/SSRF)" => Self::RequestForgery,
            "directory" | "目录类漏洞" => Self::DirectoryVuln,
            "denial-of-service" | "拒绝服务" => Self::DenialOfService,
            _ => return None,
        };
        Some(c)
    }
}

/// Body kind of a declarative request; drives the derived Content-Type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "xml")]
    Xml,
    #[serde(rename = "form-data")]
    FormData,
    #[serde(rename = "x-www-form-urlencoded", alias = "url-encoded")]
    UrlEncoded,
}

impl BodyKind {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Raw => "text/plain",
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::FormData => "multipart/form-data",
            Self::UrlEncoded => "application/x-www-form-urlencoded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InsertionPoint {
    #[default]
    None,
    Url,
    Header,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RulePosition {
    #[serde(rename = "body", alias = "response-body")]
    #[default]
    ResponseBody,
    #[serde(rename = "again_req", alias = "second-request")]
    SecondRequest,
    #[serde(rename = "none")]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "status", alias = "status-code")]
    Status,
    #[serde(rename = "content", alias = "content-length")]
    Content,
    #[serde(rename = "time", alias = "elapsed-time")]
    Time,
    #[serde(rename = "oob", alias = "out-of-band")]
    Oob,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Regex => "regex",
            Self::Status => "status",
            Self::Content => "content",
            Self::Time => "time",
            Self::Oob => "oob",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        };
        f.write_str(s)
    }
}

/// One response-matching rule of a declarative check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRule {
    #[serde(default)]
    pub position: RulePosition,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    #[serde(rename = "op")]
    pub operator: Operator,
    #[serde(rename = "val")]
    pub value: String,
    /// Free text attached to a positive match.
    #[serde(rename = "res_d", default)]
    pub description: Option<String>,
}

/// Request template of a declarative check body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub method: String,
    pub path: String,
    /// Newline-delimited `Key: Value` lines.
    #[serde(default)]
    pub headers: String,
    #[serde(rename = "data", default)]
    pub body: String,
    #[serde(rename = "data_type", default)]
    pub body_kind: Option<BodyKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSpec {
    pub position: InsertionPoint,
    /// Newline-separated payload values.
    #[serde(default)]
    pub content: String,
}

impl PayloadSpec {
    /// Payload values with empty lines removed. An empty list defaults to a
    /// single empty string, meaning "send the base request once".
    pub fn values(&self) -> Vec<String> {
        let values: Vec<String> = self
            .content
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if values.is_empty() {
            vec![String::new()]
        } else {
            values
        }
    }
}

#[derive(Debug, Clone)]
pub enum CheckBody {
    Declarative {
        request: RequestTemplate,
        payload: PayloadSpec,
        rules: Vec<MatchRule>,
    },
    Script {
        /// Loadable unit reference stored on the definition.
        script_ref: String,
    },
}

#[derive(Debug, Clone)]
pub struct CheckDefinition {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub severity: Severity,
    pub enabled: bool,
    pub requires_cookie: bool,
    pub writes_content: bool,
    pub body: CheckBody,
}

impl CheckDefinition {
    pub fn is_script(&self) -> bool {
        matches!(self.body, CheckBody::Script { .. })
    }

    /// A declarative check whose single rule is elapsed-time runs as a pure
    /// timing probe instead of the standard request/evaluate path.
    pub fn timing_only_rule(&self) -> Option<&MatchRule> {
        match &self.body {
            CheckBody::Declarative { rules, .. } if rules.len() == 1 => {
                rules.first().filter(|r| r.kind == RuleKind::Time)
            }
            _ => None,
        }
    }
}
