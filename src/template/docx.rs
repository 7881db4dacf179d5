//! Paragraph-scoped placeholder substitution for `.docx` templates.
//!
//! A paragraph's text is the concatenation of its `w:t` runs. Keys found in
//! that text are replaced inside each run that contains them whole; runs are
//! never merged, so formatting outside the replaced text is untouched. A key
//! that only exists across a run boundary is left as-is and reported.
use crate::extract::TemplateData;
use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const PARAGRAPH: &[u8] = b"w:p";
const TEXT_RUN: &[u8] = b"w:t";

/// Return the filled document as bytes.
pub(super) fn fill_docx(template_path: &Path, data: &TemplateData) -> Result<Vec<u8>> {
    let file = File::open(template_path)
        .with_context(|| format!("open template {}", template_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("read docx archive {}", template_path.display()))?;

    let mut rewritten: HashMap<String, Vec<u8>> = HashMap::new();
    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx).context("read docx entry")?;
        let name = entry.name().to_string();
        if !is_text_part(&name) {
            continue;
        }
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .with_context(|| format!("read {name}"))?;
        let filled = fill_part(&xml, data).with_context(|| format!("rewrite {name}"))?;
        rewritten.insert(name, filled);
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for idx in 0..archive.len() {
        let entry = archive.by_index_raw(idx).context("read docx entry")?;
        match rewritten.remove(entry.name()) {
            Some(bytes) => {
                let name = entry.name().to_string();
                writer
                    .start_file(name.as_str(), deflated())
                    .with_context(|| format!("write {name}"))?;
                writer
                    .write_all(&bytes)
                    .with_context(|| format!("write {name}"))?;
            }
            None => writer.raw_copy_file(entry).context("copy docx entry")?,
        }
    }
    let cursor = writer.finish().context("finish docx archive")?;
    Ok(cursor.into_inner())
}

fn deflated() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn is_text_part(name: &str) -> bool {
    name == "word/document.xml"
        || ((name.starts_with("word/header") || name.starts_with("word/footer"))
            && name.ends_with(".xml"))
}

struct PendingParagraph<'a> {
    depth: usize,
    events: Vec<Event<'a>>,
}

fn paragraph_boundary(event: &Event<'_>) -> Option<bool> {
    match event {
        Event::Start(start) if start.name().as_ref() == PARAGRAPH => Some(true),
        Event::End(end) if end.name().as_ref() == PARAGRAPH => Some(false),
        _ => None,
    }
}

fn fill_part(xml: &str, data: &TemplateData) -> Result<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut pending: Option<PendingParagraph<'_>> = None;

    loop {
        let event = reader.read_event().context("parse document XML")?;
        if matches!(event, Event::Eof) {
            break;
        }
        let mut closed = false;
        match (paragraph_boundary(&event), pending.as_mut()) {
            (Some(true), Some(paragraph)) => {
                paragraph.depth += 1;
                paragraph.events.push(event);
            }
            (Some(true), None) => {
                pending = Some(PendingParagraph {
                    depth: 1,
                    events: vec![event],
                });
            }
            (Some(false), Some(paragraph)) => {
                paragraph.events.push(event);
                paragraph.depth -= 1;
                closed = paragraph.depth == 0;
            }
            (_, Some(paragraph)) => paragraph.events.push(event),
            (_, None) => writer.write_event(event)?,
        }
        if closed {
            if let Some(done) = pending.take() {
                for out in rewrite_paragraph(done.events, data)? {
                    writer.write_event(out)?;
                }
            }
        }
    }
    if let Some(unterminated) = pending {
        for out in unterminated.events {
            writer.write_event(out)?;
        }
    }
    Ok(writer.into_inner())
}

fn paragraph_text(events: &[Event<'_>]) -> Result<String> {
    let mut text = String::new();
    let mut in_run = false;
    for event in events {
        match event {
            Event::Start(start) if start.name().as_ref() == TEXT_RUN => in_run = true,
            Event::End(end) if end.name().as_ref() == TEXT_RUN => in_run = false,
            Event::Text(run) if in_run => text.push_str(&run.unescape()?),
            _ => {}
        }
    }
    Ok(text)
}

fn rewrite_paragraph<'a>(events: Vec<Event<'a>>, data: &TemplateData) -> Result<Vec<Event<'a>>> {
    let text = paragraph_text(&events)?;
    let present: Vec<(&String, &String)> = data
        .iter()
        .filter(|(key, _)| !key.is_empty() && text.contains(key.as_str()))
        .collect();
    if present.is_empty() {
        return Ok(events);
    }

    let mut replaced_keys: BTreeSet<&str> = BTreeSet::new();
    let mut out: Vec<Event<'a>> = Vec::with_capacity(events.len());
    let mut in_run = false;
    let mut open_run: Option<usize> = None;

    for event in events {
        match &event {
            Event::Start(start) if start.name().as_ref() == TEXT_RUN => {
                in_run = true;
                open_run = Some(out.len());
                out.push(event);
            }
            Event::End(end) if end.name().as_ref() == TEXT_RUN => {
                in_run = false;
                out.push(event);
            }
            Event::Text(run) if in_run => {
                let original = run.unescape()?.into_owned();
                let mut updated = original.clone();
                for (key, value) in &present {
                    if updated.contains(key.as_str()) {
                        updated = updated.replace(key.as_str(), value);
                        replaced_keys.insert(key.as_str());
                    }
                }
                if updated == original {
                    out.push(event);
                    continue;
                }
                if let Some(idx) = open_run {
                    preserve_space(&mut out[idx])?;
                }
                push_run_text(&mut out, &updated);
            }
            _ => out.push(event),
        }
    }

    for (key, _) in &present {
        if !replaced_keys.contains(key.as_str()) {
            tracing::warn!(
                placeholder = %key,
                "placeholder spans several formatting runs and was not replaced"
            );
        }
    }
    Ok(out)
}

/// Emit replacement text, turning newlines into `w:br` breaks in the same run.
fn push_run_text(out: &mut Vec<Event<'_>>, text: &str) {
    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        out.push(Event::Text(BytesText::new(first).into_owned()));
    }
    for line in lines {
        out.push(Event::End(BytesEnd::new("w:t")));
        out.push(Event::Empty(BytesStart::new("w:br")));
        out.push(Event::Start(
            BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]),
        ));
        out.push(Event::Text(BytesText::new(line).into_owned()));
    }
}

fn preserve_space(event: &mut Event<'_>) -> Result<()> {
    if let Event::Start(start) = event {
        let has_space = start.try_get_attribute("xml:space")?.is_some();
        if !has_space {
            start.push_attribute(("xml:space", "preserve"));
        }
    }
    Ok(())
}
