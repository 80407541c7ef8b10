// # Config Document
//
// In-memory view of the proxy configuration file.
//
// ## Line Model
//
// The document is the ordered list of the file's lines. Each line keeps its
// own terminator (`\n`, `\r\n`, or none for an unterminated last line) so a
// line that is not touched by the patcher is written back byte for byte.
//
// ## Persistence
//
// Documents are read fresh at the start of every cycle and only ever written
// through [`StagedFile`]: write a sibling temp file, validate it, then rename
// it over the target. A crash mid-write can leave a stray temp file but never
// a half-written configuration.

mod staged;

pub use staged::StagedFile;

use std::fmt;
use std::path::Path;
use tokio::fs;

use crate::Error;

/// Line-oriented configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    lines: Vec<String>,
}

impl ConfigDocument {
    /// Split text into lines, keeping terminators
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.split_inclusive('\n').map(str::to_string).collect(),
        }
    }

    /// Build a document from lines that already carry their terminators
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Load a document from disk
    pub async fn read(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config {}: {}", path.display(), e),
            ))
        })?;
        Ok(Self::parse(&text))
    }

    /// Write the document to a temp file next to `target`
    ///
    /// Nothing at `target` changes until [`StagedFile::commit`] is called.
    pub async fn stage(&self, target: &Path) -> Result<StagedFile, Error> {
        StagedFile::write(target, self.to_text().as_bytes()).await
    }

    /// Stage and commit in one step
    pub async fn write_atomic(&self, target: &Path) -> Result<(), Error> {
        self.stage(target).await?.commit().await
    }

    /// Lines including their terminators
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Concatenate all lines back into file content
    pub fn to_text(&self) -> String {
        self.lines.concat()
    }

    /// Index of the first line whose trimmed content equals `content`
    pub fn find_line(&self, content: &str) -> Option<usize> {
        self.lines.iter().position(|line| line.trim() == content)
    }

    /// Terminator used by the line at `index`, `\n` when it has none
    pub fn line_ending_at(&self, index: usize) -> &'static str {
        match self.lines.get(index) {
            Some(line) if line.ends_with("\r\n") => "\r\n",
            _ => "\n",
        }
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            f.write_str(line)?;
        }
        Ok(())
    }
}
