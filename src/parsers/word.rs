// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::fields::rows_to_positions;
use super::free_text::parse_text;
use super::{ParseError, ParseTables, ParserKind};
use crate::domain::models::position::{Position, PositionSource};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::debug;

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Word 文档内容：正文段落与表格网格
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WordContent {
    pub paragraphs: Vec<String>,
    pub tables: Vec<Vec<Vec<String>>>,
}

impl WordContent {
    /// 全文：段落加上按制表符拼接的表格行
    pub fn text(&self) -> String {
        let mut lines = self.paragraphs.clone();
        for table in &self.tables {
            lines.extend(table.iter().map(|row| row.join("\t")));
        }
        lines.join("\n")
    }
}

/// 解析 `word/document.xml`
///
/// 只收集顶层表格，嵌套表格的文字并入所在单元格
pub fn parse_document_xml(xml: &str) -> Result<WordContent, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut content = WordContent::default();
    let mut table_depth = 0usize;
    let mut table: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => table_depth += 1,
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim().to_string();
                    paragraph.clear();
                    if table_depth == 0 {
                        if !text.is_empty() {
                            content.paragraphs.push(text);
                        }
                    } else if !text.is_empty() {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(&text);
                    }
                }
                b"tc" if table_depth == 1 => row.push(std::mem::take(&mut cell)),
                b"tr" if table_depth == 1 => {
                    if !row.is_empty() {
                        table.push(std::mem::take(&mut row));
                    }
                }
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && !table.is_empty() {
                        content.tables.push(std::mem::take(&mut table));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
    }
    Ok(content)
}

/// 读取 docx
pub fn read_docx(bytes: &[u8]) -> Result<WordContent, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive.by_name("word/document.xml")?.read_to_string(&mut xml)?;
    parse_document_xml(&xml)
}

fn is_text_unit(code: u16) -> bool {
    matches!(code, 0x09 | 0x0A | 0x0D)
        || (0x20..0xD800).contains(&code)
        || (0xE000..0xFFFE).contains(&code)
}

/// 旧版 `.doc` 的尽力文本提取
///
/// 正文以 UTF-16LE 存放在 WordDocument 流中，取最长的连续可打印片段
pub fn scan_utf16_text(bytes: &[u8]) -> String {
    let mut best: Vec<u16> = Vec::new();
    for offset in 0..2 {
        let mut run: Vec<u16> = Vec::new();
        for pair in bytes.get(offset..).unwrap_or_default().chunks_exact(2) {
            let code = u16::from_le_bytes([pair[0], pair[1]]);
            if is_text_unit(code) {
                run.push(code);
            } else {
                if run.len() > best.len() {
                    best = std::mem::take(&mut run);
                }
                run.clear();
            }
        }
        if run.len() > best.len() {
            best = run;
        }
    }
    String::from_utf16_lossy(&best)
        .replace('\r', "\n")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Word 职位表解析器（docx 表格与正文，doc 仅正文）
pub struct WordParser;

impl ParseTables for WordParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Word
    }

    fn parse_tables(&self, bytes: &[u8]) -> Result<Vec<Position>, ParseError> {
        if bytes.starts_with(&ZIP_MAGIC) {
            let content = read_docx(bytes)?;
            let positions: Vec<Position> = content
                .tables
                .iter()
                .flat_map(|table| rows_to_positions(table, PositionSource::Word))
                .collect();
            if !positions.is_empty() {
                return Ok(positions);
            }
            debug!("No position table in docx, parsing text");
            return Ok(parse_text(&content.text(), PositionSource::Word));
        }
        if bytes.starts_with(&OLE_MAGIC) {
            let text = scan_utf16_text(bytes);
            debug!(chars = text.chars().count(), "Scanned legacy doc text");
            return Ok(parse_text(&text, PositionSource::Word));
        }
        Err(ParseError::Unsupported("not a Word document".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOCUMENT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>附件：职位表</w:t></w:r></w:p>
<w:tbl>
<w:tr><w:tc><w:p><w:r><w:t>部门名称</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>职位名称</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>招录人数</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>学历</w:t></w:r></w:p></w:tc></w:tr>
<w:tr><w:tc><w:p><w:r><w:t>西安市</w:t></w:r><w:r><w:t>统计局</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>科员</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>2</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>本科</w:t></w:r></w:p></w:tc></w:tr>
</w:tbl>
<w:p><w:r><w:t xml:space="preserve">联系电话 &amp; 地址</w:t></w:r></w:p>
</w:body></w:document>"#;

    fn docx(xml: &str) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_document_xml_tables_and_paragraphs() {
        let content = parse_document_xml(DOCUMENT_XML).unwrap();
        assert_eq!(content.paragraphs, vec!["附件：职位表", "联系电话 & 地址"]);
        assert_eq!(content.tables.len(), 1);
        assert_eq!(content.tables[0][1], vec!["西安市统计局", "科员", "2", "本科"]);
    }

    #[test]
    fn test_docx_positions() {
        let positions = WordParser.parse_tables(&docx(DOCUMENT_XML)).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].department, "西安市统计局");
        assert_eq!(positions[0].source_kind, PositionSource::Word);
    }

    #[test]
    fn test_legacy_doc_text_scan() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        for unit in "招录机关：西安市统计局\r职位名称：科员\r招录2人".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 16]);

        let text = scan_utf16_text(&bytes);
        assert!(text.contains("职位名称：科员"));
        let positions = WordParser.parse_tables(&bytes).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].recruit_count, 2);
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(matches!(
            WordParser.parse_tables(b"plain text"),
            Err(ParseError::Unsupported(_))
        ));
    }
}
