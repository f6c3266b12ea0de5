//! Version checking utilities for app-server compatibility.

use log::{debug, warn};
use std::sync::Once;

/// The latest Codex app-server version we've tested against.
const TESTED_VERSION: &str = "0.104.0";

/// Ensures version warning is only shown once per session.
static VERSION_CHECK: Once = Once::new();

/// Check the server's reported user agent and warn if it is newer than tested.
///
/// This will only issue a warning once per program execution.
pub fn check_server_version(user_agent: &str) {
    VERSION_CHECK.call_once(|| check_version_impl(user_agent));
}

fn check_version_impl(user_agent: &str) {
    match parse_user_agent_version(user_agent) {
        Some(version) if is_version_newer(version, TESTED_VERSION) => {
            warn!(
                "Codex app-server version {} is newer than tested version {}. \
                 Please report compatibility issues with the client",
                version, TESTED_VERSION
            );
        }
        Some(version) => {
            debug!(
                "Codex app-server version {} is compatible (tested: {})",
                version, TESTED_VERSION
            );
        }
        None => {
            debug!(
                "Could not parse app-server version from user agent: '{}'",
                user_agent
            );
        }
    }
}

/// Pull `X.Y.Z` out of a user agent like `codex_cli_rs/0.104.0 (Mac OS 15.1; arm64)`.
fn parse_user_agent_version(user_agent: &str) -> Option<&str> {
    let first = user_agent.split_whitespace().next()?;
    let version = first.rsplit('/').next()?;
    version
        .split('.')
        .next()
        .filter(|major| major.parse::<u32>().is_ok())
        .map(|_| version)
}

/// Compare two version strings (e.g., "0.104.0" vs "0.103.0").
fn is_version_newer(version: &str, tested: &str) -> bool {
    let v_parts: Vec<u32> = version.split('.').filter_map(|s| s.parse().ok()).collect();
    let t_parts: Vec<u32> = tested.split('.').filter_map(|s| s.parse().ok()).collect();

    use std::cmp::Ordering;

    for i in 0..v_parts.len().min(t_parts.len()) {
        match v_parts[i].cmp(&t_parts[i]) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => continue,
        }
    }

    v_parts.len() > t_parts.len()
}
