//! Log analytics task: top IPs by server-error count.
//!
//! The sandbox gets an Apache-style access log. Ground truth is the top-5
//! client IPs by count of 5xx responses, excluding any line whose user
//! agent mentions a bot (case-insensitive), sorted by `(-count, ip)`.
//! Graded as an ordered sequence with positional partial credit.

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::grading::{AnalyticsGrader, Grader, ResultFields};
use crate::sandbox::{SandboxError, SandboxInstance};

use super::pick_variant;

pub(crate) const PROMPT: &str = "\
The sandbox holds a web server access log.

Report the top 5 client IPs by number of 5xx responses. Skip any request
whose user agent looks like a bot. Sort by count descending, ties broken
by IP ascending.

Sandbox layout:
{layout_hint}

Submit a JSON envelope:
{\"passed\": bool, \"checks\": {}, \"answer\": {\"results\": [{\"ip\": str, \"count\": int}]}, \"notes\": \"\"}
";

/// One synthetic access-log request.
pub(crate) struct LogEntry {
    pub ip: &'static str,
    pub status: &'static str,
    pub path: &'static str,
    pub agent: &'static str,
}

macro_rules! entry {
    ($ip:literal, $status:literal, $path:literal, $agent:literal) => {
        LogEntry {
            ip: $ip,
            status: $status,
            path: $path,
            agent: $agent,
        }
    };
}

fn variant_entries(variant: u32) -> &'static [LogEntry] {
    match variant {
        1 => &[
            entry!("10.0.0.1", "500", "/api", "Mozilla"),
            entry!("10.0.0.1", "500", "/api", "Mozilla"),
            entry!("10.0.0.2", "502", "/api", "Mozilla"),
            entry!("10.0.0.3", "504", "/login", "curl"),
            entry!("10.0.0.3", "504", "/login", "curl"),
            entry!("10.0.0.4", "200", "/health", "Mozilla"),
            entry!("10.0.0.5", "503", "/checkout", "status-bot"),
            entry!("10.0.0.6", "500", "/sync", "Mozilla"),
            entry!("10.0.0.7", "200", "/health", "Chrome"),
            entry!("10.0.0.8", "200", "/status", "Firefox"),
            entry!("10.0.0.1", "200", "/api", "Mozilla"),
            entry!("10.0.0.9", "502", "/sync", "Robot-Checker"),
            entry!("10.0.0.10", "500", "/data", "Safari"),
        ],
        2 => &[
            entry!("172.16.0.1", "502", "/", "Mozilla"),
            entry!("172.16.0.2", "500", "/export", "wget"),
            entry!("172.16.0.2", "500", "/export", "wget"),
            entry!("172.16.0.3", "504", "/login", "curl"),
            entry!("172.16.0.4", "200", "/dashboard", "Mozilla"),
            entry!("172.16.0.5", "503", "/status", "uptime-bot"),
            entry!("172.16.0.6", "500", "/", "Edge"),
            entry!("172.16.0.7", "200", "/api", "Chrome"),
            entry!("172.16.0.1", "200", "/", "Mozilla"),
            entry!("172.16.0.8", "504", "/login", "BOT-Monitor"),
            entry!("172.16.0.2", "200", "/export", "wget"),
        ],
        3 => &[
            entry!("192.168.1.10", "500", "/payments", "Mozilla"),
            entry!("192.168.1.10", "500", "/payments", "Mozilla"),
            entry!("192.168.1.11", "503", "/inventory", "curl"),
            entry!("192.168.1.12", "504", "/inventory", "Mozilla"),
            entry!("192.168.1.13", "500", "/inventory", "Mozilla"),
            entry!("192.168.1.14", "200", "/inventory", "Mozilla"),
            entry!("192.168.1.15", "502", "/checkout", "robotics-scanner"),
            entry!("192.168.1.16", "200", "/status", "Safari"),
            entry!("192.168.1.17", "503", "/api", "Chrome"),
            entry!("192.168.1.10", "200", "/payments", "Mozilla"),
            entry!("192.168.1.18", "500", "/data", "Firefox"),
        ],
        _ => &[
            entry!("10.1.1.1", "503", "/", "Chrome"),
            entry!("10.1.1.2", "500", "/", "SearchBot"),
            entry!("10.1.1.3", "502", "/", "Firefox"),
            entry!("10.1.1.3", "502", "/", "Firefox"),
            entry!("10.1.1.4", "200", "/", "Safari"),
            entry!("10.1.1.1", "503", "/", "Chrome"),
            entry!("10.1.1.5", "504", "/api", "Edge"),
            entry!("10.1.1.6", "200", "/api", "Opera"),
            entry!("10.1.1.7", "500", "/api", "monitoring-bot"),
            entry!("10.1.1.1", "200", "/api", "Chrome"),
            entry!("10.1.1.8", "500", "/sync", "Mozilla"),
            entry!("10.1.1.9", "502", "/data", "bOt-Crawler"),
            entry!("10.1.1.10", "200", "/health", "wget"),
            entry!("10.1.1.5", "200", "/api", "Edge"),
        ],
    }
}

fn render_line(entry: &LogEntry) -> String {
    format!(
        "{} - - [07/Jun/2023:12:00:00 +0000] \"GET {} HTTP/1.1\" {} 512 \"-\" \"{}\"",
        entry.ip, entry.path, entry.status, entry.agent
    )
}

/// Independent ground-truth computation: 5xx lines, bots excluded, counted
/// per IP, sorted by `(-count, ip)`, top 5.
pub(crate) fn compute_expected(entries: &[LogEntry]) -> Vec<(String, f64)> {
    let mut counts: std::collections::BTreeMap<&str, u64> = std::collections::BTreeMap::new();
    for entry in entries {
        if !entry.status.starts_with('5') {
            continue;
        }
        if entry.agent.to_lowercase().contains("bot") {
            continue;
        }
        *counts.entry(entry.ip).or_insert(0) += 1;
    }
    let mut items: Vec<(String, f64)> = counts
        .into_iter()
        .map(|(ip, count)| (ip.to_string(), count as f64))
        .collect();
    items.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    items.truncate(5);
    items
}

/// Seeds one variant and returns the matching analytics grader.
pub(crate) fn build(
    sandbox: &SandboxInstance,
    seed: u64,
    _config: &HarnessConfig,
) -> Result<(Arc<dyn Grader>, u32), SandboxError> {
    let variant = pick_variant(seed, 4);
    let entries = variant_entries(variant);

    let lines: Vec<String> = entries.iter().map(render_line).collect();
    sandbox.write_file("logs/access.log", &format!("{}\n", lines.join("\n")))?;

    let expected = compute_expected(entries);
    Ok((
        Arc::new(AnalyticsGrader::new(ResultFields::IP_COUNT, expected)),
        variant,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_lines_excluded() {
        // Seven 5xx lines over three IPs; the Bot/2.0 line must not count.
        let entries = [
            entry!("1.1.1.1", "500", "/a", "Mozilla"),
            entry!("1.1.1.1", "502", "/a", "Mozilla"),
            entry!("1.1.1.1", "503", "/a", "Mozilla"),
            entry!("2.2.2.2", "500", "/b", "curl"),
            entry!("2.2.2.2", "504", "/b", "curl"),
            entry!("3.3.3.3", "500", "/c", "Safari"),
            entry!("3.3.3.3", "500", "/c", "Bot/2.0"),
        ];
        let expected = compute_expected(&entries);
        assert_eq!(
            expected,
            vec![
                ("1.1.1.1".to_string(), 3.0),
                ("2.2.2.2".to_string(), 2.0),
                ("3.3.3.3".to_string(), 1.0),
            ]
        );
    }

    #[test]
    fn test_ties_broken_by_ip_ascending() {
        let entries = [
            entry!("9.9.9.9", "500", "/", "curl"),
            entry!("1.1.1.1", "500", "/", "curl"),
        ];
        let expected = compute_expected(&entries);
        assert_eq!(expected[0].0, "1.1.1.1");
        assert_eq!(expected[1].0, "9.9.9.9");
    }

    #[test]
    fn test_non_5xx_ignored() {
        let entries = [
            entry!("1.1.1.1", "200", "/", "curl"),
            entry!("1.1.1.1", "404", "/", "curl"),
        ];
        assert!(compute_expected(&entries).is_empty());
    }

    #[test]
    fn test_top_five_cap() {
        let entries = [
            entry!("1.1.1.1", "500", "/", "a"),
            entry!("2.2.2.2", "500", "/", "a"),
            entry!("3.3.3.3", "500", "/", "a"),
            entry!("4.4.4.4", "500", "/", "a"),
            entry!("5.5.5.5", "500", "/", "a"),
            entry!("6.6.6.6", "500", "/", "a"),
        ];
        assert_eq!(compute_expected(&entries).len(), 5);
    }

    #[test]
    fn test_build_writes_log() {
        let mut sandbox = SandboxInstance::create().unwrap();
        let (_grader, variant) = build(&sandbox, 1, &HarnessConfig::new()).unwrap();
        assert!((1..=4).contains(&variant));
        let log = std::fs::read_to_string(sandbox.root().join("logs/access.log")).unwrap();
        assert!(log.contains("HTTP/1.1"));
        sandbox.teardown().unwrap();
    }
}
