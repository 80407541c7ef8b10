//! Backend section patcher
//!
//! Replaces the one backend section lbsync owns and leaves every other line
//! of the document untouched.
//!
//! ## Section Bounds
//!
//! ```text
//! global                       ┐
//!     daemon                   │ kept
//! backend ws_nodes             ┐ start (trimmed line == "backend <name>")
//!     balance roundrobin       │ replaced
//!     server old 10.0.0.1:80   │
//! backend other                ┐ end (next "backend..." or top-level header)
//!     server x 10.0.0.9:80     │ kept
//! ```
//!
//! The replacement block is the header, the static directives from
//! [`PatcherConfig`], then one `server` line per parseable node, sorted by id.

mod endpoint;

pub use endpoint::{ServerEndpoint, is_valid_server_name};

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::PatcherConfig;
use crate::document::ConfigDocument;
use crate::error::{Error, NodeParseError, Result};
use crate::traits::Node;

/// Keyword that opens (and closes) backend sections
const BACKEND_KEYWORD: &str = "backend";

/// Unindented keywords that start a top-level HAProxy section
const TOP_LEVEL_SECTIONS: &[&str] = &[
    "global",
    "defaults",
    "frontend",
    "backend",
    "listen",
    "resolvers",
    "peers",
    "userlist",
    "program",
    "http-errors",
    "mailers",
    "ring",
    "cache",
];

/// One rendered `server` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLine {
    pub name: String,
    pub endpoint: ServerEndpoint,
}

/// Result of a successful patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// The updated document
    pub document: ConfigDocument,
    /// Server lines now in the section, in emitted order
    pub servers: Vec<ServerLine>,
    /// Nodes that were skipped
    pub skipped: Vec<NodeParseError>,
}

/// Rewrites a named backend section from a node list
#[derive(Debug, Clone, Default)]
pub struct ConfigPatcher {
    config: PatcherConfig,
}

impl ConfigPatcher {
    pub fn new(config: PatcherConfig) -> Self {
        Self { config }
    }

    /// Replace `backend <section>` in `document` with a section built from `nodes`
    ///
    /// Fails with [`Error::SectionNotFound`] when the header is absent. Nodes
    /// that cannot be rendered are skipped and reported in
    /// [`PatchOutcome::skipped`].
    pub fn patch(
        &self,
        document: &ConfigDocument,
        section: &str,
        nodes: &[Node],
    ) -> Result<PatchOutcome> {
        let (start, end) = Self::section_bounds(document, section)?;
        debug!(
            "Section 'backend {}' spans lines {}..{} of {}",
            section,
            start,
            end,
            document.len()
        );

        let (servers, skipped) = self.resolve_servers(nodes);
        let block = self.render_block(section, &servers, document.line_ending_at(start));

        let lines = document.lines();
        let mut patched = Vec::with_capacity(start + block.len() + (lines.len() - end));
        patched.extend_from_slice(&lines[..start]);
        patched.extend(block);
        patched.extend_from_slice(&lines[end..]);

        Ok(PatchOutcome {
            document: ConfigDocument::from_lines(patched),
            servers,
            skipped,
        })
    }

    /// Locate the `[start, end)` line range of `backend <section>`
    pub fn section_bounds(document: &ConfigDocument, section: &str) -> Result<(usize, usize)> {
        let header = format!("{} {}", BACKEND_KEYWORD, section);
        let start = document
            .find_line(&header)
            .ok_or_else(|| Error::section_not_found(section))?;

        let end = document.lines()[start + 1..]
            .iter()
            .position(|line| is_section_boundary(line))
            .map(|offset| start + 1 + offset)
            .unwrap_or(document.len());

        Ok((start, end))
    }

    /// Turn nodes into server lines, collecting the ones that cannot be used
    ///
    /// Duplicate ids keep their first occurrence. Output is sorted by name so
    /// the same membership always renders the same section.
    pub fn resolve_servers(&self, nodes: &[Node]) -> (Vec<ServerLine>, Vec<NodeParseError>) {
        let mut servers = Vec::with_capacity(nodes.len());
        let mut skipped = Vec::new();
        let mut seen = HashSet::new();

        for node in nodes {
            match Self::resolve_server(node, &seen) {
                Ok(server) => {
                    seen.insert(server.name.clone());
                    servers.push(server);
                }
                Err(e) => {
                    warn!("Skipping node: {}", e);
                    skipped.push(e);
                }
            }
        }

        servers.sort_by(|a, b| a.name.cmp(&b.name));
        (servers, skipped)
    }

    fn resolve_server(
        node: &Node,
        seen: &HashSet<String>,
    ) -> std::result::Result<ServerLine, NodeParseError> {
        if !is_valid_server_name(&node.id) {
            return Err(NodeParseError::new(
                &node.id,
                "id is not a valid server name",
            ));
        }
        if seen.contains(&node.id) {
            return Err(NodeParseError::new(&node.id, "duplicate node id"));
        }

        let endpoint =
            ServerEndpoint::parse(&node.url).map_err(|reason| NodeParseError::new(&node.id, reason))?;

        Ok(ServerLine {
            name: node.id.clone(),
            endpoint,
        })
    }

    fn render_block(&self, section: &str, servers: &[ServerLine], eol: &str) -> Vec<String> {
        let indent = &self.config.indent;
        let mut block = Vec::with_capacity(1 + self.config.directives.len() + servers.len());

        block.push(format!("{} {}{}", BACKEND_KEYWORD, section, eol));
        for directive in &self.config.directives {
            block.push(format!("{}{}{}", indent, directive.trim(), eol));
        }
        for server in servers {
            let options = self.config.server_options.trim();
            if options.is_empty() {
                block.push(format!("{}server {} {}{}", indent, server.name, server.endpoint, eol));
            } else {
                block.push(format!(
                    "{}server {} {} {}{}",
                    indent, server.name, server.endpoint, options, eol
                ));
            }
        }

        block
    }
}

/// Whether `line` ends the section being replaced
fn is_section_boundary(line: &str) -> bool {
    if line.trim().starts_with(BACKEND_KEYWORD) {
        return true;
    }
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    line.split_whitespace()
        .next()
        .is_some_and(|word| TOP_LEVEL_SECTIONS.contains(&word))
}
