use crate::ExtractError;
use crate::ocr;
use calamine::Reader;
use faultline_core::ExtractConfig;
use quick_xml::events::Event;
use std::ffi::OsStr;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_LEN: usize = 8192;

fn check_size(path: &Path, cfg: &ExtractConfig) -> Result<(), ExtractError> {
    let size = fs::metadata(path)?.len();
    if size > cfg.max_file_bytes {
        return Err(ExtractError::TooLarge {
            size,
            limit: cfg.max_file_bytes,
        });
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub(crate) fn read_pdf(path: &Path, cfg: &ExtractConfig) -> Result<String, ExtractError> {
    check_size(path, cfg)?;
    let text = pdf_extract::extract_text(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    // pdf-extract separates pages with form feeds.
    let pages: Vec<&str> = text.split('\x0c').collect();
    Ok(pages.join("\n").trim().to_string())
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<fs::File>, ExtractError> {
    let file = fs::File::open(path)?;
    zip::ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))
}

fn read_entry(archive: &mut zip::ZipArchive<fs::File>, name: &str) -> Result<String, ExtractError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| ExtractError::Archive(format!("missing {name}")))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

pub(crate) fn read_docx(path: &Path, cfg: &ExtractConfig) -> Result<String, ExtractError> {
    check_size(path, cfg)?;
    let mut archive = open_archive(path)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    let paragraphs = docx_paragraphs(&xml)?;
    Ok(paragraphs.join("\n").trim().to_string())
}

fn docx_paragraphs(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" => {
                    if let Some(p) = current.as_mut() {
                        p.push('\t');
                    }
                }
                b"br" => {
                    if let Some(p) = current.as_mut() {
                        p.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text
                    && let Some(p) = current.as_mut()
                {
                    let text = e.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                    p.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
    }
    Ok(paragraphs)
}

pub(crate) fn read_pptx(path: &Path, cfg: &ExtractConfig) -> Result<String, ExtractError> {
    check_size(path, cfg)?;
    let mut archive = open_archive(path)?;
    let mut slides: Vec<(u32, String)> = Vec::new();
    for idx in 0..archive.len() {
        let entry = archive
            .by_index_raw(idx)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let name = entry.name().to_string();
        if let Some(number) = name
            .strip_prefix("ppt/slides/slide")
            .and_then(|rest| rest.strip_suffix(".xml"))
            .and_then(|n| n.parse::<u32>().ok())
        {
            slides.push((number, name));
        }
    }
    slides.sort_by_key(|(number, _)| *number);

    let mut shapes = Vec::new();
    for (_, name) in slides {
        let xml = read_entry(&mut archive, &name)?;
        shapes.extend(slide_shape_texts(&xml)?);
    }
    Ok(shapes.join("\n").trim().to_string())
}

#[derive(Default)]
struct ShapeState {
    has_text_body: bool,
    paragraphs: Vec<String>,
    paragraph: Option<String>,
}

fn slide_shape_texts(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut shapes = Vec::new();
    let mut shape: Option<ShapeState> = None;
    let mut in_text = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"sp" {
                    shape = Some(ShapeState::default());
                } else if let Some(s) = shape.as_mut() {
                    match name.as_ref() {
                        b"txBody" => s.has_text_body = true,
                        b"p" => s.paragraph = Some(String::new()),
                        b"t" => in_text = true,
                        _ => {}
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if let Some(s) = shape.as_mut() {
                    match name.as_ref() {
                        b"p" if s.has_text_body => s.paragraphs.push(String::new()),
                        b"br" => {
                            if let Some(p) = s.paragraph.as_mut() {
                                p.push('\n');
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"sp" => {
                        if let Some(done) = shape.take()
                            && done.has_text_body
                        {
                            shapes.push(done.paragraphs.join("\n"));
                        }
                    }
                    b"p" => {
                        if let Some(s) = shape.as_mut()
                            && let Some(p) = s.paragraph.take()
                        {
                            s.paragraphs.push(p);
                        }
                    }
                    b"t" => in_text = false,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if in_text
                    && let Some(p) = shape.as_mut().and_then(|s| s.paragraph.as_mut())
                {
                    let text = e.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                    p.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
    }
    Ok(shapes)
}

pub(crate) fn read_spreadsheet(path: &Path, cfg: &ExtractConfig) -> Result<String, ExtractError> {
    check_size(path, cfg)?;
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ExtractError::Spreadsheet("workbook has no sheets".to_string()))?
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();
    Ok(render_table(&rows).trim().to_string())
}

/// Plain-text table: columns left-aligned to their widest cell, two spaces apart.
pub fn render_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        let mut line = String::new();
        for (i, width) in widths.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            line.push_str(&format!("{cell:<width$}"));
        }
        lines.push(line.trim_end().to_string());
    }
    lines.join("\n")
}

pub(crate) fn read_text(path: &Path, cfg: &ExtractConfig) -> Result<String, ExtractError> {
    check_size(path, cfg)?;
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

pub(crate) fn read_image(path: &Path, cfg: &ExtractConfig) -> Result<String, ExtractError> {
    check_size(path, cfg)?;
    image::open(path).map_err(|e| ExtractError::Image(e.to_string()))?;
    let text = ocr::run_capture(
        &cfg.tesseract_cmd,
        [path.as_os_str(), OsStr::new("stdout")],
        Duration::from_secs(cfg.ocr_timeout_seconds),
    )?;
    Ok(text.trim().to_string())
}

pub(crate) fn list_zip(path: &Path, _cfg: &ExtractConfig) -> Result<String, ExtractError> {
    let mut archive = open_archive(path)?;
    let mut names = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        let entry = archive
            .by_index_raw(idx)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        names.push(entry.name().to_string());
    }
    Ok(format!("ZIP file contents:\n{}", names.join("\n")))
}

pub(crate) fn note_audio(path: &Path, _cfg: &ExtractConfig) -> Result<String, ExtractError> {
    Ok(format!("[Audio file present: {}]", file_name(path)))
}

pub(crate) fn read_text_or_note(path: &Path, cfg: &ExtractConfig) -> Result<String, ExtractError> {
    check_size(path, cfg)?;
    let bytes = fs::read(path)?;
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
        return Ok(format!("[Binary or unsupported content: {}]", file_name(path)));
    }
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}
