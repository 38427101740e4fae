//! OOXML (docx, pptx, xlsx) and OpenDocument text extraction.
//!
//! All of these are zip archives of XML parts; text is pulled from the known
//! parts with a streaming XML reader.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::ProcessingError;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Which elements carry text and which end a line
struct TextRules {
    text: &'static [&'static [u8]],
    line: &'static [&'static [u8]],
    /// Inserted between sibling text elements on the same line
    joiner: &'static str,
}

const WORD_RULES: TextRules = TextRules {
    text: &[b"t"],
    line: &[b"p"],
    joiner: "",
};

const SLIDE_RULES: TextRules = TextRules {
    text: &[b"t"],
    line: &[b"p"],
    joiner: "",
};

const SHARED_STRING_RULES: TextRules = TextRules {
    text: &[b"t"],
    line: &[b"si"],
    joiner: "",
};

const SHEET_RULES: TextRules = TextRules {
    text: &[b"t"],
    line: &[b"row"],
    joiner: "\t",
};

const ODF_RULES: TextRules = TextRules {
    text: &[b"p", b"h"],
    line: &[b"p", b"h"],
    joiner: "",
};

pub(super) fn extraction_error(
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> ProcessingError {
    ProcessingError::TextExtraction {
        page: None,
        source: e.into(),
    }
}

/// Paragraph text from `word/document.xml`
pub fn extract_docx(data: &[u8]) -> Result<String, ProcessingError> {
    let mut archive = open(data)?;
    let xml = read_entry(&mut archive, "word/document.xml")?
        .ok_or_else(|| extraction_error("word/document.xml missing from archive"))?;
    collect_text(&xml, &WORD_RULES)
}

/// Slide text in slide-number order
pub fn extract_pptx(data: &[u8]) -> Result<String, ProcessingError> {
    let mut archive = open(data)?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    // slide10 must follow slide9, not slide1
    slides.sort_by_key(|(number, _)| *number);

    let mut parts = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        if let Some(xml) = read_entry(&mut archive, &name)? {
            let text = collect_text(&xml, &SLIDE_RULES)?;
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }

    Ok(parts.join("\n\n"))
}

/// Shared strings followed by inline strings from each worksheet
pub fn extract_xlsx(data: &[u8]) -> Result<String, ProcessingError> {
    let mut archive = open(data)?;
    let mut parts = Vec::new();

    if let Some(xml) = read_entry(&mut archive, "xl/sharedStrings.xml")? {
        let text = collect_text(&xml, &SHARED_STRING_RULES)?;
        if !text.is_empty() {
            parts.push(text);
        }
    }

    let mut sheets: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    sheets.sort();

    for name in sheets {
        if let Some(xml) = read_entry(&mut archive, &name)? {
            // Only inline strings use <t> inside sheet XML
            let text = collect_text(&xml, &SHEET_RULES)?;
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }

    Ok(parts.join("\n"))
}

/// Text paragraphs and headings from `content.xml` (odt, ods, odp)
pub fn extract_opendocument(data: &[u8]) -> Result<String, ProcessingError> {
    let mut archive = open(data)?;
    let xml = read_entry(&mut archive, "content.xml")?
        .ok_or_else(|| extraction_error("content.xml missing from archive"))?;
    collect_text(&xml, &ODF_RULES)
}

fn open(data: &[u8]) -> Result<Archive<'_>, ProcessingError> {
    ZipArchive::new(Cursor::new(data)).map_err(extraction_error)
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<String>, ProcessingError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(extraction_error(e)),
    };

    let mut xml = String::new();
    file.read_to_string(&mut xml).map_err(ProcessingError::Io)?;
    Ok(Some(xml))
}

fn collect_text(xml: &str, rules: &TextRules) -> Result<String, ProcessingError> {
    let mut reader = Reader::from_str(xml);

    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(extraction_error)? {
            Event::Start(e) => {
                let name = e.local_name();
                if rules.text.contains(&name.as_ref()) {
                    if depth == 0 && !line.is_empty() {
                        line.push_str(rules.joiner);
                    }
                    depth += 1;
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if rules.text.contains(&name.as_ref()) {
                    depth = depth.saturating_sub(1);
                }
                if rules.line.contains(&name.as_ref()) {
                    flush_line(&mut line, &mut lines);
                }
            }
            Event::Empty(e) if depth > 0 => match e.local_name().as_ref() {
                b"tab" => line.push('\t'),
                b"br" | b"line-break" => line.push('\n'),
                b"s" => line.push(' '),
                _ => {}
            },
            Event::Text(e) if depth > 0 => {
                line.push_str(&e.unescape().map_err(extraction_error)?);
            }
            Event::CData(e) if depth > 0 => {
                line.push_str(&String::from_utf8_lossy(&e));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    flush_line(&mut line, &mut lines);

    Ok(lines.join("\n"))
}

fn flush_line(line: &mut String, lines: &mut Vec<String>) {
    let trimmed = line.trim();
    if !trimmed.is_empty() {
        lines.push(trimmed.to_string());
    }
    line.clear();
}
