//! Auxiliary content extraction.
//!
//! A task may ship with one companion file named `<task_id>.<ext>`. The
//! extractor probes the extensions in [`EXTENSIONS`] order, reads the first
//! file that exists and turns it into plain text. Failures never escape:
//! they become an inline `[ERROR reading ...]` diagnostic. That includes
//! panics inside parser crates, which some inputs trigger.

use faultline_core::{ExtractConfig, panic_message};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod formats;
mod ocr;

pub use formats::render_table;
pub use ocr::run_capture;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error("pdf: {0}")]
    Pdf(String),
    #[error("archive: {0}")]
    Archive(String),
    #[error("xml: {0}")]
    Xml(String),
    #[error("spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("image: {0}")]
    Image(String),
    #[error("ocr: {0}")]
    Ocr(String),
    #[error("parser panicked: {0}")]
    Panicked(String),
}

pub type Strategy = fn(&Path, &ExtractConfig) -> Result<String, ExtractError>;

/// Probe order. The first extension with an existing file wins.
pub const EXTENSIONS: &[(&str, Strategy)] = &[
    ("pdf", formats::read_pdf),
    ("docx", formats::read_docx),
    ("pptx", formats::read_pptx),
    ("xlsx", formats::read_spreadsheet),
    ("xls", formats::read_spreadsheet),
    ("py", formats::read_text),
    ("txt", formats::read_text),
    ("png", formats::read_image),
    ("jpg", formats::read_image),
    ("jpeg", formats::read_image),
    ("zip", formats::list_zip),
    ("mp3", formats::note_audio),
    ("pdb", formats::read_text_or_note),
    ("sls", formats::read_text_or_note),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub ext: Option<&'static str>,
    pub path: Option<PathBuf>,
    pub text: String,
    /// Set when the strategy failed; `text` then holds the inline diagnostic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Extraction {
    pub fn found(&self) -> bool {
        self.path.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    cfg: ExtractConfig,
}

impl Extractor {
    pub fn new(cfg: &ExtractConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    /// Text for the task's companion file, `""` when there is none.
    pub fn extract(&self, task_id: &str, base_folder: &Path) -> String {
        self.extract_detailed(task_id, base_folder).text
    }

    pub fn extract_detailed(&self, task_id: &str, base_folder: &Path) -> Extraction {
        for (ext, strategy) in EXTENSIONS {
            let candidate = base_folder.join(format!("{task_id}.{ext}"));
            if !candidate.is_file() {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| strategy(&candidate, &self.cfg)))
                .unwrap_or_else(|payload| {
                    Err(ExtractError::Panicked(panic_message(payload.as_ref())))
                });
            return match outcome {
                Ok(text) => Extraction {
                    ext: Some(ext),
                    path: Some(candidate),
                    text,
                    diagnostic: None,
                },
                Err(err) => {
                    let message = err.to_string();
                    Extraction {
                        ext: Some(ext),
                        path: Some(candidate),
                        text: format!("[ERROR reading {task_id}.{ext}: {message}]"),
                        diagnostic: Some(message),
                    }
                }
            };
        }
        Extraction::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_testkit::{pdf_with_undefined_font, text_pdf};
    use std::fs;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn extractor() -> Extractor {
        Extractor::new(&ExtractConfig::default())
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(body.as_bytes()).expect("write entry");
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn probe_order_is_fixed() {
        let order: Vec<&str> = EXTENSIONS.iter().map(|(ext, _)| *ext).collect();
        assert_eq!(
            order,
            vec![
                "pdf", "docx", "pptx", "xlsx", "xls", "py", "txt", "png", "jpg", "jpeg", "zip",
                "mp3", "pdb", "sls"
            ]
        );
    }

    #[test]
    fn missing_file_yields_empty_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let extraction = extractor().extract_detailed("t404", dir.path());
        assert_eq!(extraction.text, "");
        assert!(!extraction.found());
        assert!(extraction.diagnostic.is_none());
    }

    #[test]
    fn zip_lists_entries_in_archive_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_zip(&dir.path().join("t1.zip"), &[("a.txt", "x"), ("b.csv", "1,2")]);
        assert_eq!(
            extractor().extract("t1", dir.path()),
            "ZIP file contents:\na.txt\nb.csv"
        );
    }

    #[test]
    fn higher_priority_extension_wins_even_when_broken() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t2.pdf"), b"not really a pdf").expect("write pdf");
        fs::write(dir.path().join("t2.txt"), "plain text").expect("write txt");
        let extraction = extractor().extract_detailed("t2", dir.path());
        assert_eq!(extraction.ext, Some("pdf"));
        assert!(extraction.text.starts_with("[ERROR reading t2.pdf: "));
        assert!(extraction.text.ends_with(']'));
        assert!(extraction.diagnostic.is_some());
    }

    #[test]
    fn txt_is_decoded_lossily_and_trimmed() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t3.txt"), b"  caf\xff notes \n\n").expect("write");
        assert_eq!(extractor().extract("t3", dir.path()), "caf\u{FFFD} notes");
    }

    #[test]
    fn py_beats_txt() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t4.py"), "print('hi')\n").expect("write py");
        fs::write(dir.path().join("t4.txt"), "ignored").expect("write txt");
        assert_eq!(extractor().extract("t4", dir.path()), "print('hi')");
    }

    #[test]
    fn docx_paragraphs_in_document_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>First </w:t></w:r><w:r><w:t>paragraph</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        write_zip(&dir.path().join("t5.docx"), &[("word/document.xml", xml)]);
        assert_eq!(
            extractor().extract("t5", dir.path()),
            "First paragraph\nSecond & last"
        );
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slide = |text: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree>
<p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p><a:p><a:r><a:t>more</a:t></a:r></a:p></p:txBody></p:sp>
</p:spTree></p:cSld></p:sld>"#
            )
        };
        let s1 = slide("one");
        let s2 = slide("two");
        let s10 = slide("ten");
        write_zip(
            &dir.path().join("t6.pptx"),
            &[
                ("ppt/slides/slide10.xml", s10.as_str()),
                ("ppt/slides/slide2.xml", s2.as_str()),
                ("ppt/slides/slide1.xml", s1.as_str()),
            ],
        );
        assert_eq!(
            extractor().extract("t6", dir.path()),
            "one\nmore\ntwo\nmore\nten\nmore"
        );
    }

    #[test]
    fn mp3_is_only_noted() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t7.mp3"), [0xFFu8, 0xFB, 0x90, 0x00]).expect("write");
        assert_eq!(
            extractor().extract("t7", dir.path()),
            "[Audio file present: t7.mp3]"
        );
    }

    #[test]
    fn binary_pdb_is_noted_text_pdb_is_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t8.pdb"), [0u8, 1, 2, 3, 0]).expect("write");
        assert_eq!(
            extractor().extract("t8", dir.path()),
            "[Binary or unsupported content: t8.pdb]"
        );
        fs::write(dir.path().join("t9.sls"), "HEADER 1ABC\n").expect("write");
        assert_eq!(extractor().extract("t9", dir.path()), "HEADER 1ABC");
    }

    #[test]
    fn undecodable_image_becomes_diagnostic() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t10.png"), b"definitely not png").expect("write");
        let text = extractor().extract("t10", dir.path());
        assert!(text.starts_with("[ERROR reading t10.png: image: "), "{text}");
    }

    #[test]
    fn missing_ocr_binary_becomes_diagnostic() {
        let dir = tempfile::tempdir().expect("tempdir");
        image::RgbImage::new(4, 4)
            .save(dir.path().join("t11.png"))
            .expect("save png");
        let cfg = ExtractConfig {
            tesseract_cmd: "faultline-no-such-ocr-binary".to_string(),
            ..ExtractConfig::default()
        };
        let text = Extractor::new(&cfg).extract("t11", dir.path());
        assert!(text.starts_with("[ERROR reading t11.png: ocr: "), "{text}");
    }

    #[test]
    fn oversized_file_is_rejected_through_diagnostic() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t12.txt"), "0123456789").expect("write");
        let cfg = ExtractConfig {
            max_file_bytes: 4,
            ..ExtractConfig::default()
        };
        let text = Extractor::new(&cfg).extract("t12", dir.path());
        assert_eq!(
            text,
            "[ERROR reading t12.txt: file too large: 10 bytes (limit 4)]"
        );
    }

    #[test]
    fn pdf_text_is_extracted() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t13.pdf"), text_pdf("Hello")).expect("write pdf");
        let extraction = extractor().extract_detailed("t13", dir.path());
        assert!(extraction.diagnostic.is_none(), "{extraction:?}");
        assert_eq!(extraction.text, "Hello");
    }

    #[test]
    fn pdf_parser_panic_becomes_diagnostic() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("t14.pdf"), pdf_with_undefined_font("Hello")).expect("write pdf");
        let extraction = extractor().extract_detailed("t14", dir.path());
        assert_eq!(extraction.ext, Some("pdf"));
        assert!(extraction.text.starts_with("[ERROR reading t14.pdf: "), "{}", extraction.text);
        assert!(extraction.diagnostic.is_some());
    }

    #[test]
    fn xlsx_renders_first_sheet_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cell = |r: &str, text: &str| format!(r#"<c r="{r}" t="inlineStr"><is><t>{text}</t></is></c>"#);
        let sheet = |rows: &[[(&str, &str); 2]]| {
            let body: String = rows
                .iter()
                .enumerate()
                .map(|(i, cells)| {
                    let cells: String = cells.iter().map(|&(r, t)| cell(r, t)).collect();
                    format!(r#"<row r="{}">{cells}</row>"#, i + 1)
                })
                .collect();
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{body}</sheetData></worksheet>"#
            )
        };
        let first = sheet(&[
            [("A1", "name"), ("B1", "qty")],
            [("A2", "apples"), ("B2", "3")],
            [("A3", "kiwi"), ("B3", "12")],
        ]);
        let second = sheet(&[[("A1", "hidden"), ("B1", "sheet")]]);
        let content_types = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;
        let root_rels = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;
        let workbook = r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Stock" sheetId="1" r:id="rId1"/><sheet name="Notes" sheetId="2" r:id="rId2"/></sheets></workbook>"#;
        let workbook_rels = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/></Relationships>"#;
        write_zip(
            &dir.path().join("t15.xlsx"),
            &[
                ("[Content_Types].xml", content_types),
                ("_rels/.rels", root_rels),
                ("xl/workbook.xml", workbook),
                ("xl/_rels/workbook.xml.rels", workbook_rels),
                ("xl/worksheets/sheet1.xml", first.as_str()),
                ("xl/worksheets/sheet2.xml", second.as_str()),
            ],
        );
        let text = extractor().extract("t15", dir.path());
        assert_eq!(text, "name    qty\napples  3\nkiwi    12");
        assert!(!text.contains("hidden"));
    }
}
