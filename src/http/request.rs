//! Probe request construction: header merging, URL joining, payload insertion.

use crate::poc::model::{InsertionPoint, RequestTemplate};
use rand::seq::SliceRandom;

/// Placeholder token replaced by the active payload value.
const PAYLOAD_TOKEN: &str = "PAYLOAD";

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// A fully materialized request, ready for a transport.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Parses newline-delimited `Key: Value` lines. Lines without a colon are
/// dropped; validation rejects them earlier for caller-supplied blocks.
pub fn parse_header_lines(block: &str) -> Vec<(String, String)> {
    block
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Joins a target base (already stripped of its trailing slash) with a check
/// path, yielding exactly one slash at the seam.
pub fn build_poc_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn upsert_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(slot) => slot.1 = value,
        None => headers.push((name.to_string(), value)),
    }
}

impl ProbeRequest {
    /// Builds the base request for one (target, check) pair. Caller headers
    /// apply first, template headers override them, then the Content-Type is
    /// derived from the body kind when no explicit line set one, and a random
    /// User-Agent fills in when none was given.
    pub fn from_template(target: &str, caller_headers: &str, template: &RequestTemplate) -> Self {
        let mut headers = parse_header_lines(caller_headers);
        for (k, v) in parse_header_lines(&template.headers) {
            upsert_header(&mut headers, &k, v);
        }
        let body = if template.body.is_empty() {
            None
        } else {
            Some(template.body.clone())
        };
        if body.is_some() && !has_header(&headers, "Content-Type") {
            if let Some(kind) = template.body_kind {
                headers.push(("Content-Type".to_string(), kind.content_type().to_string()));
            }
        }
        if !has_header(&headers, "User-Agent") {
            let ua = USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(USER_AGENTS[0]);
            headers.push(("User-Agent".to_string(), ua.to_string()));
        }
        Self {
            method: template.method.to_uppercase(),
            url: build_poc_url(target, &template.path),
            headers,
            body,
        }
    }

    /// Applies one payload value at the configured insertion point, returning
    /// a new request and leaving the base untouched for the next value.
    pub fn with_payload(&self, position: InsertionPoint, payload: &str) -> Self {
        let mut req = self.clone();
        match position {
            InsertionPoint::None => {}
            InsertionPoint::Url => {
                // Raw append; only a doubled slash at the seam is collapsed.
                if !payload.is_empty() {
                    let tail = if req.url.ends_with('/') {
                        payload.strip_prefix('/').unwrap_or(payload)
                    } else {
                        payload
                    };
                    req.url = format!("{}{tail}", req.url);
                }
            }
            InsertionPoint::Header => {
                for (_, v) in &mut req.headers {
                    if v.contains(PAYLOAD_TOKEN) {
                        *v = v.replace(PAYLOAD_TOKEN, payload);
                    }
                }
            }
            InsertionPoint::Body => {
                let body = req.body.take().unwrap_or_default();
                let body = if body.contains(PAYLOAD_TOKEN) {
                    body.replace(PAYLOAD_TOKEN, payload)
                } else {
                    format!("{body}{payload}")
                };
                req.body = Some(body);
            }
        }
        req
    }
}
