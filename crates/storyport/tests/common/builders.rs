//! In-memory fixture builders.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use cfb::CompoundFile;
use lopdf::{dictionary, Document, Object, Stream};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Builder for upload archives.
pub struct ArchiveBuilder {
    entries: Vec<(String, Option<Vec<u8>>)>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self { entries: vec![] }
    }

    /// Adds a file entry.
    pub fn file(mut self, name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries.push((name.to_string(), Some(bytes.into())));
        self
    }

    pub fn text(self, name: &str, body: &str) -> Self {
        self.file(name, body.as_bytes().to_vec())
    }

    /// Adds a directory entry.
    pub fn dir(mut self, name: &str) -> Self {
        self.entries.push((name.to_string(), None));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, bytes) in self.entries {
            match bytes {
                Some(bytes) => {
                    writer.start_file(name, options).unwrap();
                    writer.write_all(&bytes).unwrap();
                }
                None => writer.add_directory(name, options).unwrap(),
            }
        }
        writer.finish().unwrap().into_inner()
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A DOCX package with one `w:p` per paragraph.
pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
        .collect();
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{}</w:body></w:document>",
        body
    );
    let content_types = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
        <Override PartName=\"/word/document.xml\" \
        ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
        </Types>";

    ArchiveBuilder::new()
        .text("[Content_Types].xml", content_types)
        .text("word/document.xml", &document)
        .build()
}

/// A PDF with one Helvetica page per entry.
pub fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = format!("BT\n/F1 12 Tf\n72 720 Td\n({}) Tj\nET\n", text);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// A Word 97 file holding `text` as a single compressed (cp1252) piece.
pub fn doc_bytes(text: &str) -> Vec<u8> {
    const TEXT_OFFSET: usize = 0x400;
    assert!(text.is_ascii(), "fixture text must be ASCII");

    let ccp = text.len() as u32;
    let fc = ((TEXT_OFFSET * 2) as u32) | 0x4000_0000;

    // Clx holding only a piece table: two CPs and one piece descriptor.
    let mut clx = vec![0x02u8];
    clx.extend_from_slice(&16u32.to_le_bytes());
    clx.extend_from_slice(&0u32.to_le_bytes());
    clx.extend_from_slice(&ccp.to_le_bytes());
    clx.extend_from_slice(&[0, 0]);
    clx.extend_from_slice(&fc.to_le_bytes());
    clx.extend_from_slice(&[0, 0]);

    let mut word = vec![0u8; TEXT_OFFSET];
    word[0..2].copy_from_slice(&0xA5ECu16.to_le_bytes());
    word[0x4C..0x50].copy_from_slice(&ccp.to_le_bytes());
    word[0x1A6..0x1AA].copy_from_slice(&(clx.len() as u32).to_le_bytes());
    word.extend_from_slice(text.as_bytes());

    let mut compound = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    {
        let mut stream = compound.create_stream("/WordDocument").unwrap();
        stream.write_all(&word).unwrap();
    }
    {
        let mut stream = compound.create_stream("/0Table").unwrap();
        stream.write_all(&clx).unwrap();
    }
    compound.flush().unwrap();
    compound.into_inner().into_inner()
}
