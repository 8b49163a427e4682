//! Pulls one structured value out of noisy oracle text.
//!
//! Oracle responses wrap JSON in prose, code fences, or trailing chatter.
//! The scanner walks the text byte by byte with three states (plain,
//! in-string, escaped) and a stack of expected closers, so braces inside
//! string literals never count. The first balanced value wins; any later
//! values in the same response are ignored.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Plain,
    InString,
    Escaped,
}

/// First complete `{...}` in `text`.
pub fn first_object(text: &str) -> Option<&str> {
    first_balanced(text, |b| b == b'{')
}

/// First complete object or array, whichever starts earlier.
pub fn first_json(text: &str) -> Option<&str> {
    first_balanced(text, |b| b == b'{' || b == b'[')
}

fn first_balanced(text: &str, is_root: impl Fn(u8) -> bool) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = bytes[start..].iter().position(|&b| is_root(b)) {
        let open = start + offset;
        if let Some(end) = scan_from(bytes, open) {
            return Some(&text[open..=end]);
        }
        start = open + 1;
    }
    None
}

/// Index of the byte closing the value opened at `open`, if it closes.
fn scan_from(bytes: &[u8], open: usize) -> Option<usize> {
    let mut expected = vec![closer(bytes[open])?];
    let mut state = ScanState::Plain;

    for (i, &b) in bytes.iter().enumerate().skip(open + 1) {
        state = match state {
            ScanState::Escaped => ScanState::InString,
            ScanState::InString => match b {
                b'\\' => ScanState::Escaped,
                b'"' => ScanState::Plain,
                _ => ScanState::InString,
            },
            ScanState::Plain => match b {
                b'"' => ScanState::InString,
                b'{' | b'[' => {
                    expected.push(closer(b)?);
                    ScanState::Plain
                }
                b'}' | b']' => {
                    if expected.pop() != Some(b) {
                        return None;
                    }
                    if expected.is_empty() {
                        return Some(i);
                    }
                    ScanState::Plain
                }
                _ => ScanState::Plain,
            },
        };
    }
    None
}

fn closer(open: u8) -> Option<u8> {
    match open {
        b'{' => Some(b'}'),
        b'[' => Some(b']'),
        _ => None,
    }
}
