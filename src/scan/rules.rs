//! Pure rule evaluation against captured responses.
//!
//! Evaluation never performs IO and never mutates the response, so the same
//! rule applied twice to the same response always agrees with itself.

use crate::error::ScanError;
use crate::http::response::ProbeResponse;
use crate::poc::model::{MatchRule, Operator, RuleKind};
use regex::RegexBuilder;
use std::time::Duration;

/// Outcome of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub matched: bool,
    /// Human-readable note describing how the rule was checked.
    pub annotation: String,
    /// The rule's own description, attached on a match; evaluation may also
    /// substitute a note explaining a forced non-match.
    pub description: Option<String>,
}

impl RuleOutcome {
    fn matched(rule: &MatchRule, annotation: String) -> Self {
        Self {
            matched: true,
            annotation,
            description: rule.description.clone(),
        }
    }

    fn missed(annotation: String) -> Self {
        Self {
            matched: false,
            annotation,
            description: None,
        }
    }
}

fn annotation(rule: &MatchRule) -> String {
    format!("checked by {}:{}", rule.kind, rule.value)
}

fn parse_u16(rule: &MatchRule) -> Result<u16, ScanError> {
    rule.value
        .trim()
        .parse()
        .map_err(|_| ScanError::Config(format!("rule value {:?} is not a status code", rule.value)))
}

fn parse_usize(rule: &MatchRule) -> Result<usize, ScanError> {
    rule.value
        .trim()
        .parse()
        .map_err(|_| ScanError::Config(format!("rule value {:?} is not a length", rule.value)))
}

/// Evaluates one rule against the response of the probe request. Out-of-band
/// rules match unconditionally; every other kind treats a missing response as
/// a non-match.
pub fn evaluate(rule: &MatchRule, response: Option<&ProbeResponse>) -> Result<RuleOutcome, ScanError> {
    let note = annotation(rule);
    if rule.kind == RuleKind::Oob {
        // Verdict comes from the external interaction channel, not from the
        // in-band response, which may legitimately be absent.
        return Ok(RuleOutcome::matched(rule, note));
    }
    let Some(response) = response else {
        return Ok(RuleOutcome::missed(note));
    };

    match rule.kind {
        RuleKind::Status => {
            let expected = parse_u16(rule)?;
            let matched = match rule.operator {
                Operator::Eq => response.status == expected,
                Operator::Ne => response.status != expected,
                other => {
                    return Ok(RuleOutcome {
                        matched: false,
                        annotation: note,
                        description: Some(format!("operator {other} unsupported for status rules")),
                    });
                }
            };
            if matched {
                Ok(RuleOutcome::matched(rule, note))
            } else {
                Ok(RuleOutcome::missed(note))
            }
        }
        RuleKind::Content => {
            let expected = parse_usize(rule)?;
            // Redirects and not-found pages have framework-controlled bodies;
            // a length match there says nothing about the target.
            if matches!(response.status, 301 | 302 | 404) {
                return Ok(RuleOutcome {
                    matched: false,
                    annotation: note,
                    description: Some(format!("skipped, status {}", response.status)),
                });
            }
            let len = response.body_len();
            let matched = match rule.operator {
                Operator::Eq => len == expected,
                Operator::Ne => len != expected,
                Operator::Gt => len > expected,
                Operator::Lt => len < expected,
                Operator::Ge => len >= expected,
                Operator::Le => len <= expected,
            };
            if matched {
                Ok(RuleOutcome::matched(rule, note))
            } else {
                Ok(RuleOutcome::missed(note))
            }
        }
        RuleKind::Regex => {
            let pattern = RegexBuilder::new(&rule.value)
                .multi_line(true)
                .build()
                .map_err(|e| ScanError::Config(format!("invalid rule regex: {e}")))?;
            let representations = [response.body_text(), response.header_block()];
            let matched = match rule.operator {
                Operator::Eq => representations.iter().any(|r| pattern.is_match(r)),
                Operator::Ne => representations.iter().any(|r| !pattern.is_match(r)),
                _ => false,
            };
            if matched {
                Ok(RuleOutcome::matched(rule, note))
            } else {
                Ok(RuleOutcome::missed(note))
            }
        }
        RuleKind::Time => Err(ScanError::Evaluation(
            "elapsed-time rule outside a pure timing check".into(),
        )),
        RuleKind::Oob => Ok(RuleOutcome::matched(rule, note)),
    }
}

/// Evaluates the single rule of a timing-only check against the measured
/// duration. Slow-side operators match when the probe took at least the
/// threshold, fast-side operators when it stayed under it.
pub fn evaluate_elapsed(rule: &MatchRule, elapsed: Duration) -> Result<RuleOutcome, ScanError> {
    let threshold: u64 = rule.value.trim().parse().map_err(|_| {
        ScanError::Config(format!("rule value {:?} is not a duration in seconds", rule.value))
    })?;
    let note = format!("timing check: {} {}", rule.operator, rule.value);
    let slow = elapsed >= Duration::from_secs(threshold);
    let matched = match rule.operator {
        Operator::Lt | Operator::Ge => slow,
        Operator::Gt | Operator::Le => !slow,
        Operator::Eq | Operator::Ne => false,
    };
    if matched {
        Ok(RuleOutcome::matched(rule, note))
    } else {
        Ok(RuleOutcome::missed(note))
    }
}

/// Splits a second-request rule value `expected@path` into the rule to apply
/// and the extra path fetched from the target before applying it.
pub fn split_second_request(rule: &MatchRule) -> Result<(MatchRule, String), ScanError> {
    let (expected, path) = rule.value.split_once('@').ok_or_else(|| {
        ScanError::Config(format!(
            "second-request rule value {:?} lacks an @path part",
            rule.value
        ))
    })?;
    let mut transplanted = rule.clone();
    transplanted.value = expected.to_string();
    Ok((transplanted, path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poc::model::RulePosition;

    fn rule(kind: RuleKind, operator: Operator, value: &str) -> MatchRule {
        MatchRule {
            position: RulePosition::ResponseBody,
            kind,
            operator,
            value: value.into(),
            description: Some("found it".into()),
        }
    }

    fn response(status: u16, body: &str) -> ProbeResponse {
        ProbeResponse {
            status,
            headers: vec![("Server".into(), "nginx/1.18".into())],
            body: body.as_bytes().to_vec(),
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn status_rule_supports_eq_and_ne_only() {
        let resp = response(200, "");
        let eq = evaluate(&rule(RuleKind::Status, Operator::Eq, "200"), Some(&resp)).unwrap();
        assert!(eq.matched);
        assert_eq!(eq.description.as_deref(), Some("found it"));
        let ne = evaluate(&rule(RuleKind::Status, Operator::Ne, "500"), Some(&resp)).unwrap();
        assert!(ne.matched);
        let gt = evaluate(&rule(RuleKind::Status, Operator::Gt, "100"), Some(&resp)).unwrap();
        assert!(!gt.matched);
    }

    #[test]
    fn unparsable_status_value_is_a_config_error() {
        let resp = response(200, "");
        let err = evaluate(&rule(RuleKind::Status, Operator::Eq, "OK"), Some(&resp)).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn missing_response_misses_every_inband_kind() {
        for kind in [RuleKind::Status, RuleKind::Content, RuleKind::Regex] {
            let got = evaluate(&rule(kind, Operator::Eq, "1"), None).unwrap();
            assert!(!got.matched);
        }
    }

    #[test]
    fn oob_matches_even_without_a_response() {
        let got = evaluate(&rule(RuleKind::Oob, Operator::Eq, "dns"), None).unwrap();
        assert!(got.matched);
    }

    #[test]
    fn content_rule_compares_body_length() {
        let resp = response(200, "abcdef");
        assert!(evaluate(&rule(RuleKind::Content, Operator::Eq, "6"), Some(&resp))
            .unwrap()
            .matched);
        assert!(evaluate(&rule(RuleKind::Content, Operator::Gt, "5"), Some(&resp))
            .unwrap()
            .matched);
        assert!(!evaluate(&rule(RuleKind::Content, Operator::Lt, "6"), Some(&resp))
            .unwrap()
            .matched);
    }

    #[test]
    fn content_rule_refuses_redirect_and_notfound_statuses() {
        for status in [301, 302, 404] {
            let resp = response(status, "abcdef");
            let got = evaluate(&rule(RuleKind::Content, Operator::Eq, "6"), Some(&resp)).unwrap();
            assert!(!got.matched);
            assert!(got.description.unwrap().contains(&status.to_string()));
        }
    }

    #[test]
    fn regex_rule_searches_body_and_headers() {
        let resp = response(200, "<title>Admin Console</title>");
        assert!(
            evaluate(&rule(RuleKind::Regex, Operator::Eq, "Admin\\s+Console"), Some(&resp))
                .unwrap()
                .matched
        );
        assert!(
            evaluate(&rule(RuleKind::Regex, Operator::Eq, "nginx/1\\.18"), Some(&resp))
                .unwrap()
                .matched
        );
        assert!(
            !evaluate(&rule(RuleKind::Regex, Operator::Eq, "tomcat"), Some(&resp))
                .unwrap()
                .matched
        );
    }

    #[test]
    fn regex_ne_matches_when_any_representation_lacks_the_pattern() {
        let resp = response(200, "nothing here");
        assert!(
            evaluate(&rule(RuleKind::Regex, Operator::Ne, "nginx"), Some(&resp))
                .unwrap()
                .matched
        );
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let resp = response(200, "");
        let err = evaluate(&rule(RuleKind::Regex, Operator::Eq, "("), Some(&resp)).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn time_rule_is_rejected_outside_timing_checks() {
        let resp = response(200, "");
        let err = evaluate(&rule(RuleKind::Time, Operator::Ge, "5"), Some(&resp)).unwrap_err();
        assert!(matches!(err, ScanError::Evaluation(_)));
    }

    #[test]
    fn elapsed_operators_split_into_slow_and_fast_sides() {
        let r = |op| rule(RuleKind::Time, op, "5");
        let slow = Duration::from_secs(6);
        let fast = Duration::from_secs(1);
        assert!(evaluate_elapsed(&r(Operator::Ge), slow).unwrap().matched);
        assert!(evaluate_elapsed(&r(Operator::Lt), slow).unwrap().matched);
        assert!(!evaluate_elapsed(&r(Operator::Ge), fast).unwrap().matched);
        assert!(evaluate_elapsed(&r(Operator::Le), fast).unwrap().matched);
        assert!(evaluate_elapsed(&r(Operator::Gt), fast).unwrap().matched);
        assert!(!evaluate_elapsed(&r(Operator::Eq), slow).unwrap().matched);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let resp = response(200, "hello");
        let r = rule(RuleKind::Regex, Operator::Eq, "hel+o");
        let first = evaluate(&r, Some(&resp)).unwrap();
        let second = evaluate(&r, Some(&resp)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn second_request_value_splits_at_the_first_at_sign() {
        let r = rule(RuleKind::Regex, Operator::Eq, "uid=0@/cgi-bin/id");
        let (transplanted, path) = split_second_request(&r).unwrap();
        assert_eq!(transplanted.value, "uid=0");
        assert_eq!(path, "/cgi-bin/id");

        let bad = rule(RuleKind::Regex, Operator::Eq, "no-at-sign");
        assert!(split_second_request(&bad).is_err());
    }
}
