// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::free_text::parse_text;
use super::{ParseError, ParseTables, ParserKind};
use crate::domain::models::position::{Position, PositionSource};
use tracing::info;

/// 文本少于该字符数时视为扫描件
pub const MIN_PDF_TEXT_CHARS: usize = 100;

/// 提取PDF文本
///
/// pdf-extract 遇到畸形文件可能 panic，这里转换为错误
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ParseError> {
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    match result {
        Ok(Ok(text)) => Ok(clean_pdf_text(&text)),
        Ok(Err(e)) => Err(ParseError::Pdf(e.to_string())),
        Err(_) => Err(ParseError::Pdf("PDF text extraction panicked".to_string())),
    }
}

fn clean_pdf_text(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// PDF 职位解析器：文本版式表格或自由文本
pub struct PdfParser;

impl ParseTables for PdfParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Pdf
    }

    fn parse_tables(&self, bytes: &[u8]) -> Result<Vec<Position>, ParseError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(ParseError::Unsupported("not a PDF document".to_string()));
        }
        let text = extract_pdf_text(bytes)?;
        let chars = text.trim().chars().count();
        if chars < MIN_PDF_TEXT_CHARS {
            info!(chars, "PDF appears to be scanned, no extractable text");
            return Err(ParseError::Scanned { chars });
        }
        Ok(parse_text(&text, PositionSource::Pdf))
    }
}

/// 单页、Helvetica 字体的文本PDF，每个字符串一行
#[cfg(test)]
pub(crate) fn text_pdf_for_tests(lines: &[&str]) -> Vec<u8> {
    let mut content = String::from("BT /F1 12 Tf 72 720 Td 14 TL\n");
    for line in lines {
        content.push_str(&format!("({}) Tj T*\n", line));
    }
    content.push_str("ET");
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string(),
    ];

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, object).as_bytes());
    }
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf
}
