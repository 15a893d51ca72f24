//! Magnet locator building and parsing.
//!
//! Output format: `magnet:?xt=urn:btih:<hash>&tr=<trackers>&dn=<name>`, with
//! `tr` and `dn` encoded like an HTML form query string (space as `+`, the
//! tracker list joined by an encoded comma).

use once_cell::sync::Lazy;
use regex_lite::Regex;

static BTIH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)xt=urn:btih:([0-9a-z]+)").unwrap());

/// Builds magnet links, appending a shared list of well-known trackers.
#[derive(Debug, Clone, Default)]
pub struct MagnetBuilder {
    best_trackers: Vec<String>,
}

impl MagnetBuilder {
    pub fn new(best_trackers: Vec<String>) -> Self {
        Self { best_trackers }
    }

    pub fn best_trackers(&self) -> &[String] {
        &self.best_trackers
    }

    /// Replace the shared tracker list (e.g. after refreshing it).
    pub fn set_best_trackers(&mut self, trackers: Vec<String>) {
        self.best_trackers = trackers;
    }

    /// Build a locator for `hash` from item trackers plus the shared list.
    pub fn generate_link(&self, hash: &str, trackers: &[String], name: &str) -> String {
        let mut all: Vec<&str> = Vec::with_capacity(trackers.len() + self.best_trackers.len());
        for tracker in trackers.iter().chain(self.best_trackers.iter()) {
            let tracker = tracker.as_str();
            if !tracker.is_empty() && !all.contains(&tracker) {
                all.push(tracker);
            }
        }

        format!(
            "magnet:?xt=urn:btih:{}&tr={}&dn={}",
            hash,
            form_encode(&all.join(",")),
            form_encode(name)
        )
    }
}

/// Extract the info hash from a magnet locator.
pub fn parse_info_hash(locator: &str) -> Option<String> {
    BTIH_RE
        .captures(locator)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Shorten a hash for log output.
pub fn redact_hash(hash: &str) -> String {
    let prefix: String = hash.chars().take(6).collect();
    format!("{}-redacted-", prefix)
}

/// `application/x-www-form-urlencoded` value encoding.
fn form_encode(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%20", "+")
        .replace("%2A", "*")
        .replace('~', "%7E")
}
