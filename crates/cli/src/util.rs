//! Shared utilities for CLI commands

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use settle_core::{Watcher, WatcherId, WatcherPhase};
use std::str::FromStr;

/// Resolve a watcher reference
///
/// Supports:
/// - Full ULID: "01HN8XYZ..."
/// - Short ULID prefix: "01HN8" (at least 4 chars, must be unique)
/// - Watcher name (exact, must be unique)
pub fn resolve_watcher_ref<'a>(reference: &str, watchers: &'a [Watcher]) -> Result<&'a Watcher> {
    if let Ok(id) = WatcherId::from_str(reference) {
        return match watchers.iter().find(|w| w.id == id) {
            Some(watcher) => Ok(watcher),
            None => bail!("Watcher not found: {}", reference),
        };
    }

    if reference.len() >= 4 {
        let prefix = reference.to_ascii_uppercase();
        let matching: Vec<&Watcher> = watchers
            .iter()
            .filter(|w| w.id.to_string().starts_with(&prefix))
            .collect();

        match matching.len() {
            1 => return Ok(matching[0]),
            0 => {}
            n => bail!(
                "Ambiguous watcher prefix '{}': matches {} watchers",
                reference,
                n
            ),
        }
    }

    let named: Vec<&Watcher> = watchers.iter().filter(|w| w.name == reference).collect();
    match named.len() {
        1 => Ok(named[0]),
        0 => bail!("Unknown watcher reference: '{}'", reference),
        n => bail!(
            "Ambiguous watcher name '{}': {} watchers share it, use the id instead",
            reference,
            n
        ),
    }
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(ts);
    let seconds = elapsed.num_seconds();

    if seconds < 0 {
        "in the future".to_string()
    } else if seconds < 60 {
        format!("{} seconds ago", seconds)
    } else if seconds < 3600 {
        format!("{} minutes ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours ago", seconds / 3600)
    } else if seconds < 604800 {
        format!("{} days ago", seconds / 86400)
    } else {
        format!("{} weeks ago", seconds / 604800)
    }
}

/// Format timestamp as absolute local-independent time ("2024-01-03 14:30:00 UTC")
pub fn format_absolute_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// First 8 characters of an id, for compact listings
pub fn short_id(id: &WatcherId) -> String {
    id.to_string()[..8].to_string()
}

pub fn colored_phase(phase: WatcherPhase) -> String {
    match phase {
        WatcherPhase::Idle => phase.label().dimmed().to_string(),
        WatcherPhase::Debouncing => phase.label().yellow().to_string(),
        WatcherPhase::Processing => phase.label().cyan().to_string(),
        WatcherPhase::Settling => phase.label().blue().to_string(),
    }
}

/// Parse `key=value` parameter arguments
pub fn parse_param(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("Invalid parameter '{}': expected key=value", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::WatchTarget;

    fn watchers() -> Vec<Watcher> {
        vec![
            Watcher::new("downloads", WatchTarget::new("/tmp/downloads")),
            Watcher::new("desktop", WatchTarget::new("/tmp/desktop")),
        ]
    }

    #[test]
    fn test_resolve_by_full_id() {
        let watchers = watchers();
        let id = watchers[1].id.to_string();

        assert_eq!(resolve_watcher_ref(&id, &watchers).unwrap().name, "desktop");
    }

    #[test]
    fn test_resolve_by_prefix() {
        let watchers = watchers();
        // ULIDs created in the same millisecond share a long prefix, so use
        // everything but the random tail's last char
        let full = watchers[0].id.to_string();
        let prefix = full[..25].to_ascii_lowercase();

        assert_eq!(
            resolve_watcher_ref(&prefix, &watchers).unwrap().id,
            watchers[0].id
        );
    }

    #[test]
    fn test_ambiguous_prefix() {
        let watchers = watchers();
        let full = watchers[0].id.to_string();
        let common = full
            .chars()
            .zip(watchers[1].id.to_string().chars())
            .take_while(|(a, b)| a == b)
            .count();

        if common >= 4 {
            let prefix = &full[..common];
            assert!(resolve_watcher_ref(prefix, &watchers).is_err());
        }
    }

    #[test]
    fn test_resolve_by_name() {
        let watchers = watchers();

        assert_eq!(
            resolve_watcher_ref("downloads", &watchers).unwrap().id,
            watchers[0].id
        );
        assert!(resolve_watcher_ref("documents", &watchers).is_err());
    }

    #[test]
    fn test_duplicate_names_are_ambiguous() {
        let mut watchers = watchers();
        watchers.push(Watcher::new("desktop", WatchTarget::new("/tmp/other")));

        assert!(resolve_watcher_ref("desktop", &watchers).is_err());
    }

    #[test]
    fn test_format_relative_time() {
        let now = Utc::now();

        assert!(format_relative_time(now).contains("seconds ago"));
        assert!(format_relative_time(now - chrono::Duration::hours(1)).contains("hour"));
        assert!(format_relative_time(now - chrono::Duration::days(1)).contains("day"));
        assert_eq!(
            format_relative_time(now + chrono::Duration::hours(1)),
            "in the future"
        );
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("dest=~/Sorted").unwrap(),
            ("dest".to_string(), "~/Sorted".to_string())
        );
        assert_eq!(
            parse_param("style=a=b").unwrap(),
            ("style".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }
}
