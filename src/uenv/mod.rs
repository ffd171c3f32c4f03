//! uEnv.txt line model.
//!
//! Parses U-Boot `key=value` environment files line by line, keeping the
//! original text of every line. Parsing is infallible: a line that does not
//! match the `key=value` shape (commented or not) is kept as an opaque
//! comment or free-text line, never rejected.

/// Classification of a single configuration line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `key=value`, optionally commented out (`#key=value`).
    Assignment,
    /// A `#`-prefixed line that is not a commented-out assignment.
    Comment,
    /// Empty or whitespace-only line.
    Blank,
    /// Free text that is neither blank, comment, nor assignment.
    Other,
}

/// One line of a uEnv.txt file.
///
/// `raw` is the line exactly as read (minus a single trailing `\r`, so a
/// CRLF-edited local file compares equal to the LF file on the device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLine {
    /// Original text, verbatim.
    pub raw: String,
    /// What the line is.
    pub kind: LineKind,
    /// Variable name; present exactly when `kind` is `Assignment`.
    pub key: Option<String>,
    /// Everything after the first `=`, verbatim; `Assignment` only.
    pub value: Option<String>,
    /// True when the line begins with `#` (ignoring leading whitespace).
    pub commented: bool,
}

impl ConfigLine {
    /// Parse one line. Never fails.
    pub fn parse(text: &str) -> ConfigLine {
        let raw = text.strip_suffix('\r').unwrap_or(text).to_string();
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return ConfigLine {
                raw,
                kind: LineKind::Blank,
                key: None,
                value: None,
                commented: false,
            };
        }

        let commented = trimmed.starts_with('#');
        // A commented-out assignment still names its key: strip the `#` run
        // before looking for `key=`.
        let body = trimmed.trim_start_matches('#').trim_start();

        if let Some((key, value)) = split_assignment(body) {
            return ConfigLine {
                raw,
                kind: LineKind::Assignment,
                key: Some(key),
                value: Some(value),
                commented,
            };
        }

        ConfigLine {
            raw,
            kind: if commented {
                LineKind::Comment
            } else {
                LineKind::Other
            },
            key: None,
            value: None,
            commented,
        }
    }

    /// True for `Assignment` lines.
    pub fn is_assignment(&self) -> bool {
        self.kind == LineKind::Assignment
    }

    /// True when this line assigns `key` (commented or not).
    pub fn has_key(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key)
    }
}

/// Split `key=value`, returning None when the text before the first `=`
/// does not form a key. Keys are trimmed; a candidate with internal
/// whitespace or a stray `#` is prose, not a key (`# note: speed=fast`
/// stays a comment).
fn split_assignment(body: &str) -> Option<(String, String)> {
    let (key, value) = body.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) || key.contains('#') {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// A full configuration file: an ordered sequence of lines, blanks and
/// comments included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub lines: Vec<ConfigLine>,
}

impl ConfigFile {
    /// Parse file contents. One trailing newline is not an extra blank line.
    pub fn parse(text: &str) -> ConfigFile {
        let mut parts: Vec<&str> = text.split('\n').collect();
        if parts.last() == Some(&"") {
            parts.pop();
        }
        ConfigFile {
            lines: parts.into_iter().map(ConfigLine::parse).collect(),
        }
    }

    /// Parse raw bytes. Undecodable sequences are replaced, never rejected;
    /// uEnv.txt is ASCII in practice.
    pub fn from_bytes(bytes: &[u8]) -> ConfigFile {
        ConfigFile::parse(&String::from_utf8_lossy(bytes))
    }

    /// Render back to text. Non-empty files end with a single newline.
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.raw);
            out.push('\n');
        }
        out
    }

    /// Render to the bytes written back to the device.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.render().into_bytes()
    }

    /// First assignment line carrying `key`, commented or not.
    pub fn get(&self, key: &str) -> Option<&ConfigLine> {
        self.lines
            .iter()
            .find(|l| l.is_assignment() && l.has_key(key))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
