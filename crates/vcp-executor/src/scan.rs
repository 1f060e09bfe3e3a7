//! Incremental scanner for the first complete top-level JSON value.
//!
//! Asynchronous plugins are acknowledged by the first complete JSON object
//! they write to stdout, so the executor cannot wait for EOF. The scanner
//! consumes the byte stream chunk by chunk, tracking brace/bracket depth and
//! string state, and yields the candidate slice exactly once.
//!
//! Bytes before the first `{` or `[` (stray prints, interpreter banners) are
//! skipped; bytes after the first complete value are ignored by the caller.

/// Streaming detector for one top-level JSON object or array.
#[derive(Debug, Default)]
pub struct JsonScanner {
    buf: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    started: bool,
    done: bool,
}

impl JsonScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feeds `bytes` into the scanner.
    ///
    /// Returns the first complete top-level JSON value once, on the call
    /// that completes it; every later call returns `None`.
    pub fn push(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        for &b in bytes {
            if !self.started {
                if b == b'{' || b == b'[' {
                    self.started = true;
                } else {
                    continue;
                }
            }
            self.buf.push(b);

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        self.done = true;
                        return Some(std::mem::take(&mut self.buf));
                    }
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(chunks: &[&str]) -> Option<String> {
        let mut scanner = JsonScanner::new();
        for chunk in chunks {
            if let Some(found) = scanner.push(chunk.as_bytes()) {
                return Some(String::from_utf8(found).unwrap());
            }
        }
        None
    }

    #[test]
    fn single_chunk_object() {
        assert_eq!(
            scan_all(&[r#"{"status":"success"}"#]).as_deref(),
            Some(r#"{"status":"success"}"#)
        );
    }

    #[test]
    fn split_across_chunks() {
        assert_eq!(
            scan_all(&[r#"{"status":"su"#, r#"ccess","result":1}"#]).as_deref(),
            Some(r#"{"status":"success","result":1}"#)
        );
    }

    #[test]
    fn nested_and_string_braces() {
        let json = r#"{"a":{"b":"}","c":"\"{"},"d":[1,2]}"#;
        assert_eq!(scan_all(&[json]).as_deref(), Some(json));
    }

    #[test]
    fn skips_leading_junk() {
        assert_eq!(
            scan_all(&["starting up...\n", r#"{"ok":true}"#]).as_deref(),
            Some(r#"{"ok":true}"#)
        );
    }

    #[test]
    fn yields_only_once() {
        let mut scanner = JsonScanner::new();
        assert!(scanner.push(br#"{"first":1}"#).is_some());
        assert!(scanner.push(br#"{"second":2}"#).is_none());
    }

    #[test]
    fn incomplete_stays_pending() {
        assert_eq!(scan_all(&[r#"{"a": [1, 2"#]), None);
    }
}
