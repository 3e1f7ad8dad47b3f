use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)[^>]*>").expect("valid tag regex"));
// Tags are boundaries: `>>` and its digits must share one run of text.
static QUOTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r">>(\d+)").expect("valid quote regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// `>>N`, with the text as written.
    Quote { refno: u64, text: String },
    LineBreak,
}

pub fn segments(html: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in TAG_RE.captures_iter(html) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        push_text_run(&mut out, &html[last..whole.start()]);
        last = whole.end();

        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let name = caps
            .get(2)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_default();
        let block_end = closing && matches!(name.as_str(), "p" | "div" | "h1" | "h2" | "h3" | "li" | "pre");
        if name == "br" {
            out.push(Segment::LineBreak);
        } else if block_end && !matches!(out.last(), None | Some(Segment::LineBreak)) {
            out.push(Segment::LineBreak);
        }
    }
    push_text_run(&mut out, &html[last..]);
    while matches!(out.last(), Some(Segment::LineBreak)) {
        out.pop();
    }
    out
}

fn push_text_run(out: &mut Vec<Segment>, raw: &str) {
    if raw.is_empty() {
        return;
    }
    let text = unescape(raw);
    let mut last = 0;
    for caps in QUOTE_RE.captures_iter(&text) {
        let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Ok(refno) = digits.as_str().parse::<u64>() else {
            continue;
        };
        push_plain(out, &text[last..whole.start()]);
        out.push(Segment::Quote {
            refno,
            text: whole.as_str().to_string(),
        });
        last = whole.end();
    }
    push_plain(out, &text[last..]);
}

fn push_plain(out: &mut Vec<Segment>, text: &str) {
    let mut lines = text.split('\n').peekable();
    while let Some(line) = lines.next() {
        if !line.is_empty() {
            match out.last_mut() {
                Some(Segment::Text(existing)) => existing.push_str(line),
                _ => out.push(Segment::Text(line.to_string())),
            }
        }
        if lines.peek().is_some() {
            out.push(Segment::LineBreak);
        }
    }
}

pub fn quoted_refnos(html: &str) -> Vec<u64> {
    segments(html)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Quote { refno, .. } => Some(refno),
            _ => None,
        })
        .collect()
}

pub fn plain_text(html: &str) -> String {
    let mut out = String::new();
    for segment in segments(html) {
        match segment {
            Segment::Text(text) => out.push_str(&text),
            Segment::Quote { text, .. } => out.push_str(&text),
            Segment::LineBreak => out.push('\n'),
        }
    }
    out
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '>' => out.push_str("&gt;"),
            '<' => out.push_str("&lt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&#39;", "'")
        .replace("&#34;", "\"")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
