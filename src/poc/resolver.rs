//! Turns a validated selector into the concrete check-id lists a run executes.

use crate::config::scan::{KindFilter, Selector, ValidatedScan};
use crate::error::ScanError;
use crate::poc::store::{CheckKind, PocFilter, PocRepository};

/// Check ids a run will execute, split by kind. `None` means "this kind does
/// not participate at all", which the scheduler uses to skip a whole phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChecks {
    pub declarative: Option<Vec<String>>,
    pub scripts: Option<Vec<String>>,
}

pub struct Resolver<'a> {
    repo: &'a dyn PocRepository,
    /// When set, explicitly-listed ids are also subject to the enabled and
    /// skip filters. Off by default: naming an id means wanting it run.
    pub apply_filters_to_explicit: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(repo: &'a dyn PocRepository) -> Self {
        Self {
            repo,
            apply_filters_to_explicit: false,
        }
    }

    fn base_filter(cfg: &ValidatedScan) -> PocFilter {
        PocFilter {
            enabled_only: true,
            exclude_cookie_required: cfg.skip_verify_cookie,
            exclude_content_writing: cfg.skip_write_content,
            kind: None,
            categories: None,
        }
    }

    fn list_ids(&self, filter: PocFilter) -> Vec<String> {
        self.repo
            .list(&filter)
            .into_iter()
            .map(|c| c.id)
            .collect()
    }

    pub fn resolve(&self, cfg: &ValidatedScan) -> Result<ResolvedChecks, ScanError> {
        let base = Self::base_filter(cfg);
        let (declarative, scripts) = match &cfg.selector {
            Selector::All => (
                Some(self.list_ids(PocFilter {
                    kind: Some(CheckKind::Declarative),
                    ..base.clone()
                })),
                Some(self.list_ids(PocFilter {
                    kind: Some(CheckKind::Script),
                    ..base
                })),
            ),
            Selector::AllDeclarative => (
                Some(self.list_ids(PocFilter {
                    kind: Some(CheckKind::Declarative),
                    ..base
                })),
                None,
            ),
            Selector::AllScripted => (
                None,
                Some(self.list_ids(PocFilter {
                    kind: Some(CheckKind::Script),
                    ..base
                })),
            ),
            Selector::Ids(ids) => {
                let mut declarative = Vec::new();
                let mut scripts = Vec::new();
                for id in ids {
                    if self.apply_filters_to_explicit {
                        match self.repo.get_by_id(id) {
                            Some(def) if base.matches(&def) => {}
                            _ => continue,
                        }
                    }
                    if id.starts_with("SCRIPT-") {
                        scripts.push(id.clone());
                    } else {
                        declarative.push(id.clone());
                    }
                }
                (
                    (!declarative.is_empty()).then_some(declarative),
                    (!scripts.is_empty()).then_some(scripts),
                )
            }
            Selector::Categories(categories) => {
                let with_cats = |kind| PocFilter {
                    kind: Some(kind),
                    categories: Some(categories.clone()),
                    ..base.clone()
                };
                let declarative = matches!(cfg.kind_filter, KindFilter::Declarative | KindFilter::Both)
                    .then(|| self.list_ids(with_cats(CheckKind::Declarative)));
                let scripts = matches!(cfg.kind_filter, KindFilter::Script | KindFilter::Both)
                    .then(|| self.list_ids(with_cats(CheckKind::Script)));
                (declarative, scripts)
            }
        };

        // Kinds that resolved to nothing are dropped entirely.
        let declarative = declarative.filter(|v| !v.is_empty());
        let scripts = scripts.filter(|v| !v.is_empty());
        if declarative.is_none() && scripts.is_none() {
            return Err(ScanError::RunFatal("no checks resolved".into()));
        }
        Ok(ResolvedChecks {
            declarative,
            scripts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::scan::{KindFilter, Mode, Selector, ValidatedScan};
    use crate::poc::model::{Category, Operator};
    use crate::poc::store::testing::{declarative_check, script_check, status_rule};
    use crate::poc::store::JsonFileRepository;

    fn repo() -> JsonFileRepository {
        let mut cookie = declarative_check(
            "POC-250101-010101-002",
            "needs cookie",
            vec![status_rule(Operator::Eq, "200")],
        );
        cookie.requires_cookie = true;
        let mut xss = declarative_check(
            "POC-250101-010101-003",
            "xss probe",
            vec![status_rule(Operator::Eq, "200")],
        );
        xss.category = Category::Xss;
        JsonFileRepository::from_checks(vec![
            declarative_check(
                "POC-250101-010101-001",
                "plain",
                vec![status_rule(Operator::Eq, "200")],
            ),
            cookie,
            xss,
            script_check("SCRIPT-250101-010101-001", "scripted", "check_one"),
        ])
    }

    fn scan(selector: Selector, kind_filter: KindFilter) -> ValidatedScan {
        ValidatedScan {
            urls: vec!["http://example.com".into()],
            headers: String::new(),
            selector,
            concurrency: 2,
            mode: Mode::Alone,
            kind_filter,
            skip_write_content: false,
            skip_verify_cookie: false,
            proxy: None,
            max_retries: 3,
            enable_retry_backoff: false,
        }
    }

    #[test]
    fn all_selects_both_kinds() {
        let repo = repo();
        let got = Resolver::new(&repo)
            .resolve(&scan(Selector::All, KindFilter::Both))
            .unwrap();
        assert_eq!(got.declarative.unwrap().len(), 3);
        assert_eq!(got.scripts.unwrap().len(), 1);
    }

    #[test]
    fn skip_flags_narrow_broad_selections() {
        let repo = repo();
        let mut cfg = scan(Selector::All, KindFilter::Both);
        cfg.skip_verify_cookie = true;
        let got = Resolver::new(&repo).resolve(&cfg).unwrap();
        let decl = got.declarative.unwrap();
        assert_eq!(decl.len(), 2);
        assert!(!decl.contains(&"POC-250101-010101-002".to_string()));
    }

    #[test]
    fn explicit_ids_bypass_skip_filters() {
        let repo = repo();
        let mut cfg = scan(
            Selector::Ids(vec!["POC-250101-010101-002".into()]),
            KindFilter::Both,
        );
        cfg.skip_verify_cookie = true;
        let got = Resolver::new(&repo).resolve(&cfg).unwrap();
        assert_eq!(
            got.declarative.unwrap(),
            vec!["POC-250101-010101-002".to_string()]
        );
        assert!(got.scripts.is_none());
    }

    #[test]
    fn explicit_ids_respect_filters_when_opted_in() {
        let repo = repo();
        let mut cfg = scan(
            Selector::Ids(vec!["POC-250101-010101-002".into()]),
            KindFilter::Both,
        );
        cfg.skip_verify_cookie = true;
        let mut resolver = Resolver::new(&repo);
        resolver.apply_filters_to_explicit = true;
        let err = resolver.resolve(&cfg).unwrap_err();
        assert!(matches!(err, ScanError::RunFatal(_)));
    }

    #[test]
    fn categories_narrow_by_kind_filter() {
        let repo = repo();
        let got = Resolver::new(&repo)
            .resolve(&scan(
                Selector::Categories(vec![Category::Xss]),
                KindFilter::Declarative,
            ))
            .unwrap();
        assert_eq!(
            got.declarative.unwrap(),
            vec!["POC-250101-010101-003".to_string()]
        );
        assert!(got.scripts.is_none());
    }

    #[test]
    fn empty_resolution_is_fatal() {
        let repo = repo();
        let err = Resolver::new(&repo)
            .resolve(&scan(
                Selector::Categories(vec![Category::DenialOfService]),
                KindFilter::Both,
            ))
            .unwrap_err();
        assert!(matches!(err, ScanError::RunFatal(_)));
    }
}
