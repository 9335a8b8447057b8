//! Selective Proxy Auto-Config generation
//!
//! The generated script proxies only hosts matching the host allow pattern and
//! sends everything else direct, so a thick client's own traffic can be steered
//! through the interception proxy without touching the rest of the system.

use crate::error::{PacWriteFailure, TcbError};
use crate::Result;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::{Path, PathBuf};

/// Port assumed for the interception proxy when history has nothing better
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Inputs for one PAC generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacSpec {
    proxy_host: String,
    proxy_port: u16,
    host_regex: String,
}

impl PacSpec {
    pub fn new(
        proxy_host: impl Into<String>,
        proxy_port: u16,
        host_regex: impl Into<String>,
    ) -> Result<Self> {
        let proxy_host = proxy_host.into();
        if proxy_host.trim().is_empty() {
            return Err(TcbError::InvalidPacSpec("proxy host is empty".to_string()));
        }
        if proxy_port == 0 {
            return Err(TcbError::InvalidPacSpec(
                "proxy port must be in 1-65535".to_string(),
            ));
        }
        Ok(Self {
            proxy_host,
            proxy_port,
            host_regex: host_regex.into(),
        })
    }

    pub fn proxy_host(&self) -> &str {
        &self.proxy_host
    }

    pub fn proxy_port(&self) -> u16 {
        self.proxy_port
    }

    pub fn host_regex(&self) -> &str {
        &self.host_regex
    }

    pub fn render(&self) -> String {
        build_selective_pac(&self.proxy_host, self.proxy_port, &self.host_regex)
    }
}

/// Build a PAC script that proxies hosts matching `host_regex` through
/// `proxy_host:proxy_port` and connects directly otherwise.
pub fn build_selective_pac(proxy_host: &str, proxy_port: u16, host_regex: &str) -> String {
    let js_safe = to_js_string(host_regex);
    format!(
        "function FindProxyForURL(url, host) {{\n\
         \x20 var re = new RegExp({});\n\
         \x20 if (re.test(host)) {{ return \"PROXY {}:{}; DIRECT\"; }}\n\
         \x20 return \"DIRECT\";\n\
         }}\n",
        js_safe, proxy_host, proxy_port
    )
}

/// Quote `text` as a double-quoted script string literal.
///
/// Line terminators are escaped too, so the literal stays on one line.
fn to_js_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Pick the proxy port: the first listening port seen in recent traffic
/// history, or `default` when there is no history.
pub fn resolve_proxy_port<I>(history_ports: I, default: u16) -> u16
where
    I: IntoIterator<Item = u16>,
{
    history_ports
        .into_iter()
        .find(|port| *port != 0)
        .unwrap_or(default)
}

/// Best-effort address of this machine for the PAC proxy directive
pub fn local_proxy_host() -> String {
    let resolved = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .and_then(|name| (name.as_str(), 0).to_socket_addrs().ok())
        .and_then(|mut addrs| addrs.find(|a| a.is_ipv4()))
        .map(|addr| addr.ip());

    resolved
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .to_string()
}

/// Write a PAC document to a new `tcb-*.pac` file in `dir` (the system temp
/// directory when `None`) and return its path.
pub fn write_pac_file(pac: &str, dir: Option<&Path>) -> std::result::Result<PathBuf, PacWriteFailure> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("tcb-").suffix(".pac");

    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.write_all(pac.as_bytes())?;
    file.flush()?;

    let (_, path) = file.keep().map_err(|e| PacWriteFailure(e.error))?;
    Ok(path)
}
