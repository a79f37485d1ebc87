//! Proxy list parser: turns fetched page content into candidates

use crate::proxy::models::{Candidate, ProxyType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

/// `scheme://host:port`
static URL_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?|socks[45])://([^:/\s]+):(\d{1,5})/?$").expect("Invalid URL line regex")
});

/// `host:port`
static COLON_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9.\-]+):(\d{1,5})$").expect("Invalid colon line regex")
});

/// `ip<whitespace>port`
static SPACED_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+)\s+(\d{1,5})$").expect("Invalid spaced line regex")
});

/// Adjacent table cells holding an address and a port
static TABLE_ROW_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)<td[^>]*>\s*(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\s*</td>\s*<td[^>]*>\s*(\d{1,5})\s*</td>",
    )
    .expect("Invalid table row regex")
});

/// Regex pattern to match IP:PORT patterns anywhere in text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Parser for proxy list pages
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single list line
    ///
    /// Supports formats:
    /// - IP:PORT
    /// - IP PORT (tab or space separated)
    /// - scheme://IP:PORT
    pub fn parse_line(line: &str, default_type: ProxyType, origin: &str) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if let Some(caps) = URL_LINE_REGEX.captures(line) {
            let protocol = caps[1].parse().ok()?;
            let port = parse_port(&caps[3])?;
            return Some(Candidate::new(&caps[2], port, protocol, origin));
        }

        if let Some(caps) = COLON_LINE_REGEX.captures(line) {
            // "Page:2" is prose, "proxy.example.com:3128" is not.
            let host = &caps[1];
            if host.parse::<IpAddr>().is_err() && !host.contains('.') {
                return None;
            }
            let port = parse_port(&caps[2])?;
            return Some(Candidate::new(host, port, default_type, origin));
        }

        // Whitespace-separated lines only count with a literal address.
        let caps = SPACED_LINE_REGEX.captures(line)?;
        caps[1].parse::<IpAddr>().ok()?;
        let port = parse_port(&caps[2])?;
        Some(Candidate::new(&caps[1], port, default_type, origin))
    }

    /// Parse candidates from raw page content
    ///
    /// Every strategy runs over the whole page and their results are merged:
    /// 1. Line-by-line list parsing
    /// 2. HTML table rows with address and port in adjacent cells
    /// 3. Regex-based IP:PORT extraction
    ///
    /// Results are de-duplicated on `(address, port)`, keeping first occurrence.
    pub fn parse_page(content: &str, default_type: ProxyType, origin: &str) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_type, origin))
            .collect();
        candidates.extend(Self::extract_table_rows(content, default_type, origin));
        candidates.extend(Self::extract_with_regex(content, default_type, origin));

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert((c.address.clone(), c.port)));
        candidates
    }

    fn extract_table_rows(content: &str, default_type: ProxyType, origin: &str) -> Vec<Candidate> {
        TABLE_ROW_REGEX
            .captures_iter(content)
            .filter_map(|cap| ipv4_candidate(&cap[1], &cap[2], default_type, origin))
            .collect()
    }

    fn extract_with_regex(content: &str, default_type: ProxyType, origin: &str) -> Vec<Candidate> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| ipv4_candidate(&cap[1], &cap[2], default_type, origin))
            .collect()
    }
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|port| *port != 0)
}

fn ipv4_candidate(host: &str, port: &str, default_type: ProxyType, origin: &str) -> Option<Candidate> {
    host.parse::<Ipv4Addr>().ok()?;
    let port = parse_port(port)?;
    Some(Candidate::new(host, port, default_type, origin))
}
