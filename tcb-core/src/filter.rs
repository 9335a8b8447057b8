use crate::error::{CompileError, PatternField, PortParseError};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// Ports allowed before any settings have been applied
pub const DEFAULT_PORTS: [u16; 2] = [80, 443];

const MATCH_ALL: &str = ".*";

/// Compiled allow-lists deciding which traffic belongs to the target application.
///
/// Host and MIME matching use search semantics: a pattern matches when it is
/// found anywhere in the input, so `api` matches `eu.api.example.com`.
/// Anchor the pattern with `^...$` for a full-string match.
#[derive(Debug, Clone)]
pub struct FilterRuleSet {
    host_pattern: Regex,
    allowed_ports: BTreeSet<u16>,
    mime_pattern: Regex,
    only_matches: bool,
}

impl Default for FilterRuleSet {
    fn default() -> Self {
        Self {
            host_pattern: match_all(),
            allowed_ports: DEFAULT_PORTS.into_iter().collect(),
            mime_pattern: match_all(),
            only_matches: false,
        }
    }
}

impl PartialEq for FilterRuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.host_pattern.as_str() == other.host_pattern.as_str()
            && self.allowed_ports == other.allowed_ports
            && self.mime_pattern.as_str() == other.mime_pattern.as_str()
            && self.only_matches == other.only_matches
    }
}

impl fmt::Display for FilterRuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports: Vec<String> = self.allowed_ports.iter().map(|p| p.to_string()).collect();
        write!(
            f,
            "host={}, ports=[{}], mime={}",
            self.host_pattern.as_str(),
            ports.join(", "),
            self.mime_pattern.as_str()
        )
    }
}

impl FilterRuleSet {
    pub fn new(
        host_pattern: Regex,
        allowed_ports: BTreeSet<u16>,
        mime_pattern: Regex,
        only_matches: bool,
    ) -> Self {
        Self {
            host_pattern,
            allowed_ports,
            mime_pattern,
            only_matches,
        }
    }

    pub fn host_pattern(&self) -> &Regex {
        &self.host_pattern
    }

    pub fn allowed_ports(&self) -> &BTreeSet<u16> {
        &self.allowed_ports
    }

    pub fn mime_pattern(&self) -> &Regex {
        &self.mime_pattern
    }

    pub fn only_matches(&self) -> bool {
        self.only_matches
    }

    /// Replace the host pattern, leaving ports and MIME untouched
    pub fn with_host(mut self, host_pattern: Regex) -> Self {
        self.host_pattern = host_pattern;
        self
    }

    /// Replace the port set, leaving host and MIME untouched
    pub fn with_ports(mut self, allowed_ports: BTreeSet<u16>) -> Self {
        self.allowed_ports = allowed_ports;
        self
    }

    /// Replace the MIME pattern, leaving host and ports untouched
    pub fn with_mime(mut self, mime_pattern: Regex) -> Self {
        self.mime_pattern = mime_pattern;
        self
    }

    pub fn with_only_matches(mut self, only_matches: bool) -> Self {
        self.only_matches = only_matches;
        self
    }

    /// True when the host pattern is found in `host` and `port` is allowed
    pub fn matches_host_port(&self, host: &str, port: u16) -> bool {
        let host_ok = self.host_pattern.is_match(host);
        let port_ok = self.allowed_ports.contains(&port);
        host_ok && port_ok
    }

    /// True when the MIME pattern is found in `mime`
    pub fn mime_allowed(&self, mime: &str) -> bool {
        self.mime_pattern.is_match(mime)
    }
}

fn match_all() -> Regex {
    Regex::new(MATCH_ALL).expect("match-all pattern compiles")
}

fn compile(field: PatternField, pattern: &str) -> Result<Regex, CompileError> {
    Regex::new(pattern).map_err(|e| CompileError {
        field,
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Compile a host allow pattern
pub fn compile_host(pattern: &str) -> Result<Regex, CompileError> {
    compile(PatternField::Host, pattern)
}

/// Compile a MIME allow pattern
pub fn compile_mime(pattern: &str) -> Result<Regex, CompileError> {
    compile(PatternField::Mime, pattern)
}

/// Parse one port token, surrounding whitespace ignored
pub fn parse_port_token(token: &str) -> Result<u16, PortParseError> {
    token.trim().parse::<u16>().map_err(|_| PortParseError {
        token: token.to_string(),
    })
}

/// Parse a comma-separated port list.
///
/// Tokens that are empty, non-numeric or out of range are dropped. An empty
/// result means no port is allowed.
pub fn parse_ports(csv: &str) -> BTreeSet<u16> {
    csv.split(',')
        .filter_map(|token| parse_port_token(token).ok())
        .collect()
}
