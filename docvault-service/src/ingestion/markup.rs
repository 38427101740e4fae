//! HTML, XML, Markdown and RTF text extraction.

use markdown::mdast::Node;
use quick_xml::Reader;
use quick_xml::events::Event;

use super::office::extraction_error;
use crate::error::ProcessingError;

/// Elements whose start or end begins a new line
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "tr", "table", "h1", "h2", "h3", "h4", "h5", "h6",
    "section", "article", "header", "footer", "blockquote", "pre", "title",
];

/// Elements whose content is never text
const SKIPPED_TAGS: &[&str] = &["script", "style", "head", "noscript", "template"];

/// Strip tags from HTML, drop script and style bodies, and decode entities.
pub fn strip_html_tags(html: &str) -> String {
    let mut result = String::with_capacity(html.len() / 2);
    let mut rest = html;
    let mut skipping: Option<String> = None;

    while let Some(open) = rest.find('<') {
        if skipping.is_none() {
            result.push_str(&rest[..open]);
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = &after[..close];
        rest = &after[close + 1..];

        let closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        if let Some(skipped) = &skipping {
            if closing && *skipped == name {
                skipping = None;
            }
            continue;
        }

        if !closing && !tag.ends_with('/') && SKIPPED_TAGS.contains(&name.as_str()) {
            skipping = Some(name);
        } else if BLOCK_TAGS.contains(&name.as_str()) {
            result.push('\n');
        } else {
            result.push(' ');
        }
    }
    if skipping.is_none() {
        result.push_str(rest);
    }

    normalize_whitespace(&decode_entities(&result))
}

/// Character data of every text node, one node per line
pub fn extract_xml_text(xml: &str) -> Result<String, ProcessingError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parts = Vec::new();
    loop {
        match reader.read_event().map_err(extraction_error)? {
            Event::Text(e) => {
                let text = e.unescape().map_err(extraction_error)?;
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e);
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(parts.join("\n"))
}

/// Render Markdown to its plain text content, blocks separated by blank lines
pub fn extract_markdown_text(source: &str) -> Result<String, ProcessingError> {
    let root = markdown::to_mdast(source, &markdown::ParseOptions::default())
        .map_err(|e| extraction_error(e.to_string()))?;

    let mut out = String::new();
    collect_markdown(&root, &mut out);
    Ok(normalize_whitespace(&out))
}

fn collect_markdown(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => out.push_str(&text.value),
        Node::InlineCode(code) => out.push_str(&code.value),
        Node::Code(code) => {
            out.push_str(&code.value);
            out.push_str("\n\n");
        }
        Node::Html(html) => out.push_str(&strip_html_tags(&html.value)),
        Node::Break(_) => out.push('\n'),
        Node::Paragraph(_) | Node::Heading(_) | Node::TableRow(_) => {
            collect_children(node, out);
            out.push_str("\n\n");
        }
        Node::TableCell(_) => {
            collect_children(node, out);
            out.push('\t');
        }
        _ => collect_children(node, out),
    }
}

fn collect_children(node: &Node, out: &mut String) {
    if let Some(children) = node.children() {
        for child in children {
            collect_markdown(child, out);
        }
    }
}

/// RTF destinations that never hold body text
const RTF_SKIPPED_DESTINATIONS: &[&str] = &[
    "fonttbl",
    "colortbl",
    "stylesheet",
    "info",
    "pict",
    "object",
    "themedata",
    "colorschememapping",
    "datastore",
    "latentstyles",
    "listtable",
    "listoverridetable",
    "rsidtbl",
    "generator",
    "xmlnstbl",
    "header",
    "footer",
];

/// Strip RTF control words and groups, keeping body text.
pub fn extract_rtf_text(rtf: &str) -> String {
    let chars: Vec<char> = rtf.chars().collect();
    let mut out = String::new();
    let mut depth = 0usize;
    // Group depth at which a skipped destination started
    let mut skip_from: Option<usize> = None;
    // Characters still to drop after a \uN escape
    let mut pending_fallback = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' => {
                depth += 1;
                i += 1;
            }
            '}' => {
                if skip_from == Some(depth) {
                    skip_from = None;
                }
                depth = depth.saturating_sub(1);
                i += 1;
            }
            '\\' => {
                i += 1;
                let Some(&next) = chars.get(i) else { break };

                if next.is_ascii_alphabetic() {
                    let start = i;
                    while i < chars.len() && chars[i].is_ascii_alphabetic() {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();

                    let param_start = i;
                    if i < chars.len() && chars[i] == '-' {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let param: Option<i32> = chars[param_start..i]
                        .iter()
                        .collect::<String>()
                        .parse()
                        .ok();
                    // A single space delimits the control word
                    if i < chars.len() && chars[i] == ' ' {
                        i += 1;
                    }

                    if skip_from.is_some() {
                        continue;
                    }
                    if RTF_SKIPPED_DESTINATIONS.contains(&word.as_str()) {
                        skip_from = Some(depth);
                        continue;
                    }
                    match word.as_str() {
                        "par" | "line" | "sect" | "page" => out.push('\n'),
                        "tab" | "cell" => out.push('\t'),
                        "row" => out.push('\n'),
                        "u" => {
                            if let Some(code) = param {
                                // Negative values encode code points above 32767
                                let code = if code < 0 { code + 65536 } else { code };
                                if let Some(ch) = char::from_u32(code as u32) {
                                    out.push(ch);
                                }
                                pending_fallback = 1;
                            }
                        }
                        _ => {}
                    }
                } else {
                    i += 1;
                    match next {
                        '*' => {
                            // \* marks an optional destination: ignore its group
                            if skip_from.is_none() {
                                skip_from = Some(depth);
                            }
                        }
                        '\'' => {
                            let hex: String = chars.iter().skip(i).take(2).collect();
                            i += hex.len();
                            if skip_from.is_none() {
                                if pending_fallback > 0 {
                                    pending_fallback -= 1;
                                } else if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                                    // Windows-1252 and Latin-1 agree outside 0x80..0x9F
                                    out.push(byte as char);
                                }
                            }
                        }
                        '\\' | '{' | '}' if skip_from.is_none() => out.push(next),
                        '~' if skip_from.is_none() => out.push('\u{a0}'),
                        '\n' | '\r' if skip_from.is_none() => out.push('\n'),
                        _ => {}
                    }
                }
            }
            '\r' | '\n' => i += 1,
            _ => {
                if skip_from.is_none() {
                    if pending_fallback > 0 {
                        pending_fallback -= 1;
                    } else {
                        out.push(c);
                    }
                }
                i += 1;
            }
        }
    }

    normalize_whitespace(&out)
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &after[..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, end))
        });

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse runs of spaces within lines and runs of blank lines
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = false;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run = !lines.is_empty();
            continue;
        }
        if blank_run {
            lines.push(String::new());
            blank_run = false;
        }
        lines.push(collapsed);
    }

    lines.join("\n")
}
