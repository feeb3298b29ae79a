//! Comment stripping.
//!
//! Produces a copy of the source where every comment is replaced by spaces
//! (newlines kept, so byte offsets and line numbers are unchanged) and raw
//! string bodies are blanked. Doc comments (`/** */` and `///`) are captured
//! with the offset where they end.

use crate::error::SymbolParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocComment {
    /// Byte offset just past the comment.
    pub end: usize,
    pub line: usize,
    pub text: String,
}

#[derive(Debug)]
pub struct Cleaned {
    pub text: Vec<u8>,
    pub docs: Vec<DocComment>,
}

pub fn strip_comments(source: &str) -> Result<Cleaned, SymbolParseError> {
    let src = source.as_bytes();
    let mut out = src.to_vec();
    let mut docs: Vec<DocComment> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;
    // Line where the last `///` run ended, for merging consecutive lines.
    let mut last_line_doc: Option<usize> = None;

    while i < src.len() {
        let c = src[i];
        match c {
            b'\n' => {
                line += 1;
                i += 1;
            }
            b'/' if src.get(i + 1) == Some(&b'/') => {
                let start = i;
                while i < src.len() && src[i] != b'\n' {
                    i += 1;
                }
                let body = &source[start..i];
                let is_doc = body.starts_with("///") && !body.starts_with("////");
                blank(&mut out, start, i);
                if is_doc {
                    let text = body.trim_start_matches('/').trim().to_string();
                    match (last_line_doc, docs.last_mut()) {
                        (Some(prev), Some(doc)) if prev + 1 == line => {
                            if !text.is_empty() {
                                if !doc.text.is_empty() {
                                    doc.text.push('\n');
                                }
                                doc.text.push_str(&text);
                            }
                            doc.end = i;
                        }
                        _ => docs.push(DocComment {
                            end: i,
                            line,
                            text,
                        }),
                    }
                    last_line_doc = Some(line);
                }
            }
            b'/' if src.get(i + 1) == Some(&b'*') => {
                let start = i;
                let start_line = line;
                i += 2;
                let mut closed = false;
                while i < src.len() {
                    if src[i] == b'*' && src.get(i + 1) == Some(&b'/') {
                        i += 2;
                        closed = true;
                        break;
                    }
                    if src[i] == b'\n' {
                        line += 1;
                    }
                    i += 1;
                }
                if !closed {
                    return Err(SymbolParseError::UnterminatedComment { line: start_line });
                }
                let body = &source[start..i];
                let is_doc = body.starts_with("/**") && body.len() > 4 && !body.starts_with("/***");
                blank(&mut out, start, i);
                if is_doc {
                    docs.push(DocComment {
                        end: i,
                        line: start_line,
                        text: clean_block_doc(&body[3..body.len() - 2]),
                    });
                    last_line_doc = None;
                }
            }
            b'"' => {
                if i > 0 && src[i - 1] == b'R' && is_raw_prefix(src, i - 1) {
                    i = skip_raw_string(src, &mut out, i, &mut line);
                } else {
                    i = skip_quoted(src, i, b'"');
                }
            }
            b'\'' => {
                let digit_separator = i > 0 && src[i - 1].is_ascii_alphanumeric();
                if digit_separator {
                    i += 1;
                } else {
                    i = skip_quoted(src, i, b'\'');
                }
            }
            _ => i += 1,
        }
    }

    Ok(Cleaned { text: out, docs })
}

fn blank(out: &mut [u8], start: usize, end: usize) {
    for b in &mut out[start..end] {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}

/// `R"` starts a raw string unless the `R` ends a longer identifier
/// (`LR"`, `u8R"` are still raw).
fn is_raw_prefix(src: &[u8], r_pos: usize) -> bool {
    let mut j = r_pos;
    while j > 0 && (src[j - 1].is_ascii_alphanumeric() || src[j - 1] == b'_') {
        j -= 1;
    }
    matches!(&src[j..r_pos], b"" | b"L" | b"u" | b"U" | b"u8")
}

/// Skip a quoted literal starting at `start`; stops at the closing quote or
/// at the end of the line for unterminated literals.
fn skip_quoted(src: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < src.len() {
        match src[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    src.len()
}

fn skip_raw_string(src: &[u8], out: &mut [u8], start: usize, line: &mut usize) -> usize {
    let mut i = start + 1;
    let delim_start = i;
    while i < src.len() && src[i] != b'(' && src[i] != b'\n' {
        i += 1;
    }
    if i >= src.len() || src[i] != b'(' {
        return i;
    }
    let mut terminator = Vec::with_capacity(i - delim_start + 2);
    terminator.push(b')');
    terminator.extend_from_slice(&src[delim_start..i]);
    terminator.push(b'"');

    let body_start = i + 1;
    let mut j = body_start;
    while j < src.len() {
        if src[j..].starts_with(&terminator) {
            blank(out, body_start, j);
            return j + terminator.len();
        }
        if src[j] == b'\n' {
            *line += 1;
        }
        j += 1;
    }
    blank(out, body_start, src.len());
    src.len()
}

fn clean_block_doc(body: &str) -> String {
    body.lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
