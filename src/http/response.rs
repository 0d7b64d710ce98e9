//! Captured probe response.

use std::time::Duration;

/// Everything rule evaluation needs from a response, decoupled from the
/// transport that produced it.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Wall-clock time from send to full body receipt.
    pub elapsed: Duration,
}

impl ProbeResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Headers rendered one per line, the form regex rules match against.
    pub fn header_block(&self) -> String {
        self.headers
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
