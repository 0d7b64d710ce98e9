//! Read-only POC repository.
//!
//! Persistence of check definitions is an external concern; the engine only
//! needs id/kind/filter access. The filter is part of the repository query so
//! large POC sets are narrowed at the storage layer rather than in memory.

use crate::error::ScanError;
use crate::poc::model::{
    Category, CheckBody, CheckDefinition, MatchRule, PayloadSpec, RequestTemplate, Severity,
};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Declarative,
    Script,
}

/// Conjunctive query predicate applied by the repository.
#[derive(Debug, Clone, Default)]
pub struct PocFilter {
    pub enabled_only: bool,
    pub exclude_cookie_required: bool,
    pub exclude_content_writing: bool,
    pub kind: Option<CheckKind>,
    pub categories: Option<Vec<Category>>,
}

impl PocFilter {
    pub fn matches(&self, def: &CheckDefinition) -> bool {
        if self.enabled_only && !def.enabled {
            return false;
        }
        if self.exclude_cookie_required && def.requires_cookie {
            return false;
        }
        if self.exclude_content_writing && def.writes_content {
            return false;
        }
        if let Some(kind) = self.kind {
            let is_script = def.is_script();
            if (kind == CheckKind::Script) != is_script {
                return false;
            }
        }
        if let Some(cats) = &self.categories {
            if !cats.contains(&def.category) {
                return false;
            }
        }
        true
    }
}

pub trait PocRepository: Send + Sync {
    fn get_by_id(&self, id: &str) -> Option<CheckDefinition>;
    fn list(&self, filter: &PocFilter) -> Vec<CheckDefinition>;
    fn exists(&self, id: &str, kind: CheckKind) -> bool;
}

/// Wire record mirroring the upstream storage row shape.
#[derive(Debug, Deserialize)]
struct PocRecord {
    poc_id: String,
    poc_name: String,
    vul_type: Category,
    #[serde(default)]
    severity: Severity,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    need_cookie: bool,
    #[serde(default)]
    write_content: bool,
    #[serde(default)]
    request: Option<RequestTemplate>,
    #[serde(default)]
    payload: Option<PayloadSpec>,
    #[serde(default)]
    rules: Option<Vec<MatchRule>>,
    #[serde(default)]
    script_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PocRecord {
    fn into_definition(self) -> Result<CheckDefinition, ScanError> {
        let body = match (self.script_id, self.request) {
            (Some(script_ref), _) => CheckBody::Script { script_ref },
            (None, Some(request)) => {
                let rules = self.rules.unwrap_or_default();
                if rules.is_empty() {
                    return Err(ScanError::Config(format!(
                        "declarative check {} has no rules",
                        self.poc_id
                    )));
                }
                CheckBody::Declarative {
                    request,
                    payload: self.payload.unwrap_or(PayloadSpec {
                        position: crate::poc::model::InsertionPoint::None,
                        content: String::new(),
                    }),
                    rules,
                }
            }
            (None, None) => {
                return Err(ScanError::Config(format!(
                    "check {} has neither a request nor a script reference",
                    self.poc_id
                )))
            }
        };
        Ok(CheckDefinition {
            id: self.poc_id,
            name: self.poc_name,
            category: self.vul_type,
            severity: self.severity,
            enabled: self.enabled,
            requires_cookie: self.need_cookie,
            writes_content: self.write_content,
            body,
        })
    }
}

/// JSON-file-backed repository used by the CLI.
pub struct JsonFileRepository {
    checks: Vec<CheckDefinition>,
}

impl JsonFileRepository {
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ScanError::Config(format!("cannot read poc db {}: {e}", path.display())))?;
        let records: Vec<PocRecord> = serde_json::from_str(&raw)
            .map_err(|e| ScanError::Config(format!("invalid poc db {}: {e}", path.display())))?;
        let checks = records
            .into_iter()
            .map(PocRecord::into_definition)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { checks })
    }

    pub fn from_checks(checks: Vec<CheckDefinition>) -> Self {
        Self { checks }
    }
}

impl PocRepository for JsonFileRepository {
    fn get_by_id(&self, id: &str) -> Option<CheckDefinition> {
        self.checks.iter().find(|c| c.id == id).cloned()
    }

    fn list(&self, filter: &PocFilter) -> Vec<CheckDefinition> {
        self.checks
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect()
    }

    fn exists(&self, id: &str, kind: CheckKind) -> bool {
        self.checks
            .iter()
            .any(|c| c.id == id && (c.is_script() == (kind == CheckKind::Script)))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{declarative_check, script_check, status_rule};
    use super::*;
    use crate::poc::model::Operator;

    fn repo() -> JsonFileRepository {
        let mut cookie_check = declarative_check(
            "POC-250101-010101-001",
            "plain",
            vec![status_rule(Operator::Eq, "200")],
        );
        cookie_check.id = "POC-250101-010101-002".into();
        cookie_check.requires_cookie = true;
        let mut disabled = declarative_check(
            "POC-250101-010101-003",
            "disabled",
            vec![status_rule(Operator::Eq, "200")],
        );
        disabled.enabled = false;
        JsonFileRepository::from_checks(vec![
            declarative_check(
                "POC-250101-010101-001",
                "plain",
                vec![status_rule(Operator::Eq, "200")],
            ),
            cookie_check,
            disabled,
            script_check("SCRIPT-250101-010101-001", "scripted", "check_one"),
        ])
    }

    #[test]
    fn filter_is_conjunctive() {
        let repo = repo();
        let filter = PocFilter {
            enabled_only: true,
            exclude_cookie_required: true,
            exclude_content_writing: true,
            kind: Some(CheckKind::Declarative),
            categories: None,
        };
        let got = repo.list(&filter);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "POC-250101-010101-001");
    }

    #[test]
    fn exists_checks_kind() {
        let repo = repo();
        assert!(repo.exists("SCRIPT-250101-010101-001", CheckKind::Script));
        assert!(!repo.exists("SCRIPT-250101-010101-001", CheckKind::Declarative));
        assert!(repo.exists("POC-250101-010101-001", CheckKind::Declarative));
    }

    #[test]
    fn declarative_record_without_rules_is_rejected() {
        let raw = r#"[{
            "poc_id": "POC-250101-010101-009",
            "poc_name": "broken",
            "vul_type": "info-leak",
            "request": {"method": "GET", "path": "/x"}
        }]"#;
        let records: Vec<PocRecord> = serde_json::from_str(raw).unwrap();
        let err = records
            .into_iter()
            .next()
            .unwrap()
            .into_definition()
            .unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
