//! chat text -> markup.
//!
//! text is tokenized first and escaped per token, so model output can never
//! inject markup of its own. fenced code is split out before any emphasis
//! scanning, so `*` inside code stays literal.
//!
//! recognized, in priority order:
//! - fenced code: three backticks, optional language tag on the opening line,
//!   may span lines
//! - inline code: single backticks, may span lines
//! - strong: `**x**` on one line
//! - emphasis: `*x*` on one line
//! - newline -> line break (outside fenced code)
//!
//! unterminated markers are kept as literal text.

const FENCE: &str = "```";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Strong(Vec<Segment<'a>>),
    Emphasis(Vec<Segment<'a>>),
    Code(&'a str),
    CodeBlock { lang: Option<&'a str>, code: &'a str },
    LineBreak,
}

/// tokenize `text` into segments. nothing is escaped yet.
pub fn parse(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find(FENCE) {
        let body_start = open + FENCE.len();
        let Some(close) = rest[body_start..].find(FENCE) else {
            break;
        };
        parse_inline(&rest[..open], &mut out);
        out.push(code_block(&rest[body_start..body_start + close]));
        rest = &rest[body_start + close + FENCE.len()..];
    }
    parse_inline(rest, &mut out);
    out
}

/// html markup with all user/model text escaped.
pub fn format(text: &str) -> String {
    to_html(&parse(text))
}

pub fn to_html(segments: &[Segment<'_>]) -> String {
    let mut out = String::new();
    write_html(segments, &mut out);
    out
}

/// segments flattened back to unadorned text (newlines restored).
pub fn to_plain(segments: &[Segment<'_>]) -> String {
    let mut out = String::new();
    write_plain(segments, &mut out);
    out
}

fn code_block(body: &str) -> Segment<'_> {
    if let Some((first, code)) = body.split_once('\n') {
        let tag = first.trim();
        let is_lang = !tag.is_empty()
            && tag.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '+' | '-' | '.' | '#'));
        if is_lang {
            return Segment::CodeBlock { lang: Some(tag), code };
        }
        if tag.is_empty() {
            return Segment::CodeBlock { lang: None, code };
        }
    }
    Segment::CodeBlock { lang: None, code: body }
}

/// first `pat` on the current line, skipping over complete `` `code` `` spans.
fn find_closing(s: &str, pat: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut j = 0;
    while j < bytes.len() {
        match bytes[j] {
            b'\n' => return None,
            b'`' => {
                if let Some(len) = s[j + 1..].find('`').filter(|&n| n > 0) {
                    if s[j + 1..j + 1 + len].contains('\n') {
                        return None;
                    }
                    j += len + 2;
                    continue;
                }
            }
            _ if bytes[j..].starts_with(pat.as_bytes()) => return Some(j),
            _ => {}
        }
        j += 1;
    }
    None
}

fn parse_inline<'a>(text: &'a str, out: &mut Vec<Segment<'a>>) {
    let bytes = text.as_bytes();
    let mut plain_start = 0;
    let mut i = 0;

    let flush = |out: &mut Vec<Segment<'a>>, from: usize, to: usize| {
        if from < to {
            out.push(Segment::Text(&text[from..to]));
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'`' => {
                if let Some(len) = text[i + 1..].find('`').filter(|&n| n > 0) {
                    flush(out, plain_start, i);
                    out.push(Segment::Code(&text[i + 1..i + 1 + len]));
                    i += len + 2;
                    plain_start = i;
                    continue;
                }
            }
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                if let Some(len) = find_closing(&text[i + 2..], "**").filter(|&n| n > 0) {
                    flush(out, plain_start, i);
                    let mut inner = Vec::new();
                    parse_inline(&text[i + 2..i + 2 + len], &mut inner);
                    out.push(Segment::Strong(inner));
                    i += len + 4;
                    plain_start = i;
                    continue;
                }
            }
            b'*' => {
                if let Some(len) = find_closing(&text[i + 1..], "*").filter(|&n| n > 0) {
                    flush(out, plain_start, i);
                    let mut inner = Vec::new();
                    parse_inline(&text[i + 1..i + 1 + len], &mut inner);
                    out.push(Segment::Emphasis(inner));
                    i += len + 2;
                    plain_start = i;
                    continue;
                }
            }
            b'\n' => {
                flush(out, plain_start, i);
                out.push(Segment::LineBreak);
                i += 1;
                plain_start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    flush(out, plain_start, bytes.len());
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

fn write_html(segments: &[Segment<'_>], out: &mut String) {
    for seg in segments {
        match seg {
            Segment::Text(t) => escape_into(t, out),
            Segment::Strong(inner) => {
                out.push_str("<strong>");
                write_html(inner, out);
                out.push_str("</strong>");
            }
            Segment::Emphasis(inner) => {
                out.push_str("<em>");
                write_html(inner, out);
                out.push_str("</em>");
            }
            Segment::Code(c) => {
                out.push_str("<code>");
                escape_into(c, out);
                out.push_str("</code>");
            }
            Segment::CodeBlock { lang, code } => {
                match lang {
                    Some(l) => {
                        out.push_str("<pre><code class=\"language-");
                        escape_into(l, out);
                        out.push_str("\">");
                    }
                    None => out.push_str("<pre><code>"),
                }
                escape_into(code, out);
                out.push_str("</code></pre>");
            }
            Segment::LineBreak => out.push_str("<br>"),
        }
    }
}

fn write_plain(segments: &[Segment<'_>], out: &mut String) {
    for seg in segments {
        match seg {
            Segment::Text(t) | Segment::Code(t) => out.push_str(t),
            Segment::Strong(inner) | Segment::Emphasis(inner) => write_plain(inner, out),
            Segment::CodeBlock { code, .. } => out.push_str(code),
            Segment::LineBreak => out.push('\n'),
        }
    }
}
