//! Server list — fetch and parse the public relay address list.
//!
//! The list is a plain-text HTTP resource, one entry per line in the form
//! `<id>:<host:port>`. Lines starting with `#` and blank lines are
//! comments. Ids outside 0–9 are ignored, so the resulting array is sparse
//! over the ten possible server slots.

use std::time::Duration;

use anyhow::{Context, Result};

/// One reachable relay slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub id: u8,
    pub addr: String,
}

/// Sparse array over server ids 0–9.
pub type ServerList = [Option<ServerEntry>; 10];

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetch and parse the server list.
pub async fn fetch(url: &str) -> Result<ServerList> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    let body = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to fetch server list from {url}"))?
        .error_for_status()
        .context("server list fetch was rejected")?
        .text()
        .await
        .context("failed to read server list body")?;
    Ok(parse(&body))
}

/// Parse the line-based list. Malformed lines are skipped; a later line for
/// the same id wins.
pub fn parse(body: &str) -> ServerList {
    let mut list: ServerList = Default::default();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((id, addr)) = line.split_once(':') else {
            continue;
        };
        let Ok(id) = id.trim().parse::<u8>() else {
            continue;
        };
        if id > 9 || addr.is_empty() {
            continue;
        }
        list[id as usize] = Some(ServerEntry {
            id,
            addr: addr.trim().to_string(),
        });
    }
    list
}

/// Build a single-entry list, used when an explicit server is given.
pub fn single(id: u8, addr: &str) -> ServerList {
    let mut list: ServerList = Default::default();
    if id <= 9 {
        list[id as usize] = Some(ServerEntry {
            id,
            addr: addr.to_string(),
        });
    }
    list
}
