//! Node url → `host:port` parsing and server-name checks

use std::fmt;

/// Address a server line points at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    /// Parse `[http://|https://]host:port[/path]`
    ///
    /// The port is taken after the last colon so bracketed IPv6 hosts
    /// (`[::1]:8080`) keep their inner colons.
    pub fn parse(url: &str) -> Result<Self, String> {
        let url = url.trim();
        let rest = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .unwrap_or(url);

        if rest.contains("://") {
            return Err(format!("unsupported scheme in '{}'", url));
        }

        let authority = rest.split('/').next().unwrap_or(rest);
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| format!("no ':port' in '{}'", url))?;

        if !is_valid_host(host) {
            return Err(format!("invalid host in '{}'", url));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port '{}' in '{}'", port, url))?;
        if port == 0 {
            return Err(format!("port 0 in '{}'", url));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Hostname or IPv4 (`[A-Za-z0-9.-]`), or a bracketed IPv6 literal
///
/// Anything else could end up as a comment or an extra token in the
/// rendered server line.
fn is_valid_host(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.contains(':')
            && inner
                .chars()
                .all(|c| c.is_ascii_hexdigit() || matches!(c, ':' | '.'));
    }
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
}

/// HAProxy server names: non-empty, `[A-Za-z0-9_.:-]` only
pub fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
}
