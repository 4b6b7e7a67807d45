//! Byte-preserving header list.
//!
//! A message is split once at the header/body boundary (the first line that
//! holds nothing but its terminator). Header fields become [`HeaderLine`]s
//! that keep their exact bytes and their own line terminator; the boundary
//! and body stay a borrowed slice that is written back untouched.
//!
//! ```text
//! From: a <a@x>\r\n      HeaderLine { content: "From: a <a@x>", terminator: "\r\n" }
//! DKIM-Signature: v=1;\r\n
//!  b=abc\r\n             folded into the DKIM-Signature line above
//! \r\n                   ┐
//! body...                ┘ tail
//! ```

const CRLF: &[u8] = b"\r\n";

/// A single header field, continuation lines included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    /// Field bytes without the final terminator
    content: Vec<u8>,
    /// `\r\n`, `\n`, or empty for an unterminated last line
    terminator: Vec<u8>,
}

impl HeaderLine {
    /// Build a `Name: value` field.
    pub fn new(name: &str, value: &str, terminator: &[u8]) -> Self {
        Self {
            content: format!("{}: {}", name, value).into_bytes(),
            terminator: terminator.to_vec(),
        }
    }

    /// Field name, or `None` for lines that are not `name:` fields.
    pub fn name(&self) -> Option<&[u8]> {
        let first_line_end = self
            .content
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(self.content.len());
        let first_line = &self.content[..first_line_end];
        let colon = first_line.iter().position(|&b| b == b':')?;
        let name = &first_line[..colon];

        if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace()) {
            return None;
        }
        Some(name)
    }

    /// ASCII case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name()
            .map(|n| n.eq_ignore_ascii_case(name.as_bytes()))
            .unwrap_or(false)
    }

    /// Unfolded, trimmed value.
    pub fn value(&self) -> Option<String> {
        let name_len = self.name()?.len();
        let raw: Vec<u8> = self.content[name_len + 1..]
            .iter()
            .copied()
            .filter(|&b| b != b'\r' && b != b'\n')
            .collect();
        Some(String::from_utf8_lossy(&raw).trim().to_string())
    }

    /// Replace the value, keeping the original spelling of the name and the
    /// line terminator.
    pub fn set_value(&mut self, value: &str) {
        let Some(name_len) = self.name().map(<[u8]>::len) else {
            return;
        };
        self.content.truncate(name_len);
        self.content.extend_from_slice(b": ");
        self.content.extend_from_slice(value.as_bytes());
    }

    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    /// Serialized length including the terminator.
    pub fn len(&self) -> usize {
        self.content.len() + self.terminator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Header fields of a message plus its untouched boundary and body.
#[derive(Debug, Clone)]
pub struct HeaderBlock<'a> {
    lines: Vec<HeaderLine>,
    tail: &'a [u8],
}

impl<'a> HeaderBlock<'a> {
    /// Split `raw` at the header/body boundary.
    ///
    /// Without a boundary the whole buffer is the header region and the tail
    /// is empty.
    pub fn parse(raw: &'a [u8]) -> Self {
        let mut lines: Vec<HeaderLine> = Vec::new();
        let mut pos = 0;

        while pos < raw.len() {
            let rest = &raw[pos..];
            let (content_len, terminator_len) = match rest.iter().position(|&b| b == b'\n') {
                Some(lf) if lf > 0 && rest[lf - 1] == b'\r' => (lf - 1, 2),
                Some(lf) => (lf, 1),
                None => (rest.len(), 0),
            };
            let content = &rest[..content_len];
            let terminator = &rest[content_len..content_len + terminator_len];

            if content.is_empty() {
                return Self {
                    lines,
                    tail: rest,
                };
            }

            let continues = matches!(content[0], b' ' | b'\t');
            match lines.last_mut() {
                Some(last) if continues => {
                    let previous = std::mem::replace(&mut last.terminator, terminator.to_vec());
                    last.content.extend_from_slice(&previous);
                    last.content.extend_from_slice(content);
                }
                _ => lines.push(HeaderLine {
                    content: content.to_vec(),
                    terminator: terminator.to_vec(),
                }),
            }

            pos += content_len + terminator_len;
        }

        Self {
            lines,
            tail: &raw[raw.len()..],
        }
    }

    pub fn lines(&self) -> &[HeaderLine] {
        &self.lines
    }

    /// Boundary and body, exactly as parsed.
    pub fn tail(&self) -> &'a [u8] {
        self.tail
    }

    /// Serialized length of the header region.
    pub fn header_len(&self) -> usize {
        self.lines.iter().map(HeaderLine::len).sum()
    }

    /// Terminator of the last header line, the one adjacent to the boundary.
    pub fn trailing_terminator(&self) -> Vec<u8> {
        self.lines
            .last()
            .map(|line| line.terminator.clone())
            .unwrap_or_else(|| CRLF.to_vec())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lines.iter().any(|line| line.is(name))
    }

    /// Value of the first header with this name.
    pub fn first_value(&self, name: &str) -> Option<String> {
        self.lines
            .iter()
            .find(|line| line.is(name))
            .and_then(HeaderLine::value)
    }

    /// Remove every header with one of these names. Returns removed bytes.
    pub fn remove_all(&mut self, names: &[&str]) -> usize {
        let mut removed = 0;
        self.lines.retain(|line| {
            if names.iter().any(|name| line.is(name)) {
                removed += line.len();
                false
            } else {
                true
            }
        });
        removed
    }

    /// Set the value of every header with this name. Returns the number of
    /// headers changed.
    pub fn replace_all(&mut self, name: &str, value: &str) -> usize {
        let mut replaced = 0;
        for line in self.lines.iter_mut().filter(|line| line.is(name)) {
            line.set_value(value);
            replaced += 1;
        }
        replaced
    }

    /// Set the value of every header with this name and insert a companion
    /// header directly after each of them, using that header's terminator.
    pub fn replace_all_with_companion(
        &mut self,
        name: &str,
        value: &str,
        companion_name: &str,
        companion_value: &str,
    ) -> usize {
        let mut replaced = 0;
        let mut index = 0;
        while index < self.lines.len() {
            if self.lines[index].is(name) {
                self.lines[index].set_value(value);
                let terminator = self.lines[index].terminator.clone();
                self.splice_after(
                    index,
                    HeaderLine::new(companion_name, companion_value, &terminator),
                );
                replaced += 1;
                index += 1;
            }
            index += 1;
        }
        replaced
    }

    /// Append a header at the end of the header region.
    pub fn append(&mut self, line: HeaderLine) {
        match self.lines.len() {
            0 => self.lines.push(line),
            len => self.splice_after(len - 1, line),
        }
    }

    /// Insert `line` after `index` as a whole, terminated segment. A line
    /// that was unterminated gets a CRLF and hands its "no terminator" over
    /// to the inserted line, which becomes the new end of the buffer.
    fn splice_after(&mut self, index: usize, mut line: HeaderLine) {
        if self.lines[index].terminator.is_empty() {
            self.lines[index].terminator = CRLF.to_vec();
            line.terminator.clear();
        }
        self.lines.insert(index + 1, line);
    }

    /// Header lines followed by the untouched tail.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header_len() + self.tail.len());
        for line in &self.lines {
            out.extend_from_slice(&line.content);
            out.extend_from_slice(&line.terminator);
        }
        out.extend_from_slice(self.tail);
        out
    }
}
