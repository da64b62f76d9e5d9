// src/core/hosts.rs

//! Input lists: the hosts to scan and the installer-remnant filenames to probe.

use std::collections::HashSet;
use std::path::Path;
use tracing::debug;
use url::Url;

/// Reads a newline-delimited host list. Comment lines (`#`) and blank lines are skipped,
/// exact duplicates are dropped keeping the first occurrence.
pub fn read_host_list(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_host_list(&content))
}

pub fn parse_host_list(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    meaningful_lines(content)
        .map(normalize_host)
        .filter(|host| !host.is_empty())
        .filter(|host| {
            let fresh = seen.insert(host.clone());
            if !fresh {
                debug!(host = %host, "Skipping duplicate host entry.");
            }
            fresh
        })
        .collect()
}

/// Reads the remnant filename list with the same comment rules as the host list.
pub fn read_remnant_list(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(meaningful_lines(&content)
        .map(|line| line.trim_start_matches('/').to_string())
        .collect())
}

fn meaningful_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Accepts either a bare host or a URL and returns the host part.
fn normalize_host(entry: &str) -> String {
    if entry.starts_with("http://") || entry.starts_with("https://") {
        if let Some(host) = Url::parse(entry).ok().and_then(|u| u.host_str().map(String::from)) {
            return host;
        }
    }
    entry.split('/').next().unwrap_or(entry).to_string()
}
