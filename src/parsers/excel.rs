// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::fields::rows_to_positions;
use super::html_table::parse_html_positions;
use super::{ParseError, ParseTables, ParserKind};
use crate::domain::models::position::{Position, PositionSource};
use crate::utils::text_encoding::decode_bytes;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use tracing::{debug, warn};

/// 内容是否其实是HTML（政府网站常把HTML表格另存为 `.xls`）
pub fn looks_like_html(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1000)]).to_lowercase();
    ["<html", "<!doctype html", "<table", "<head"]
        .iter()
        .any(|marker| head.contains(marker))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

/// 读取工作簿全部工作表为网格
pub fn workbook_rows(bytes: &[u8]) -> Result<Vec<(String, Vec<Vec<String>>)>, ParseError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ParseError::Spreadsheet(e.to_string()))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        match workbook.worksheet_range(&name) {
            Ok(range) => {
                let rows = range
                    .rows()
                    .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
                    .collect();
                sheets.push((name, rows));
            }
            Err(e) => warn!(sheet = %name, error = %e, "Failed to read worksheet"),
        }
    }
    Ok(sheets)
}

/// Excel 职位表解析器
pub struct ExcelParser;

impl ParseTables for ExcelParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Excel
    }

    fn parse_tables(&self, bytes: &[u8]) -> Result<Vec<Position>, ParseError> {
        if looks_like_html(bytes) {
            debug!("Spreadsheet attachment is HTML, using table parser");
            let html = decode_bytes(bytes, None);
            return Ok(parse_html_positions(&html, PositionSource::Excel));
        }

        let sheets = match workbook_rows(bytes) {
            Ok(sheets) => sheets,
            Err(e) => {
                // 未带HTML标记的HTML导出文件
                let html = decode_bytes(bytes, None);
                let positions = parse_html_positions(&html, PositionSource::Excel);
                if positions.is_empty() {
                    return Err(e);
                }
                return Ok(positions);
            }
        };

        let positions: Vec<Position> = sheets
            .iter()
            .flat_map(|(name, rows)| {
                let positions = rows_to_positions(rows, PositionSource::Excel);
                debug!(sheet = %name, count = positions.len(), "Parsed worksheet");
                positions
            })
            .collect();
        Ok(positions)
    }
}

/// 用内联字符串单元格拼出最小的 xlsx 工作簿，数字单元格按数值写入
#[cfg(test)]
pub(crate) fn xlsx_for_tests(sheet_name: &str, rows: &[&[&str]]) -> Vec<u8> {
    use std::io::Write;

    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            let cell = format!("{}{}", (b'A' + c as u8) as char, r + 1);
            if value.parse::<f64>().is_ok() {
                sheet.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, cell, value));
            } else {
                sheet.push_str(&format!(
                    r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                    cell, value
                ));
            }
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");

    let parts = [
        (
            "[Content_Types].xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#.to_string(),
        ),
        (
            "_rels/.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#.to_string(),
        ),
        (
            "xl/workbook.xml",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
                sheet_name
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#.to_string(),
        ),
        ("xl/worksheets/sheet1.xml", sheet),
    ];

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    buffer.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_disguised_as_xls() {
        let html = r#"<html><head><meta charset="utf-8"></head><body><table>
            <tr><td>部门名称</td><td>职位名称</td><td>招录人数</td><td>学历</td></tr>
            <tr><td>西安市统计局</td><td>科员</td><td>2</td><td>本科</td></tr>
        </table></body></html>"#;
        assert!(looks_like_html(html.as_bytes()));
        let positions = ExcelParser.parse_tables(html.as_bytes()).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].source_kind, PositionSource::Excel);
        assert_eq!(positions[0].recruit_count, 2);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(!looks_like_html(b"PK\x03\x04garbage"));
        assert!(ExcelParser.parse_tables(b"not a spreadsheet at all").is_err());
    }

    #[test]
    fn test_float_cells_render_as_integers() {
        assert_eq!(cell_text(&Data::Float(2.0)), "2");
        assert_eq!(cell_text(&Data::String(" 科员 ".to_string())), "科员");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn test_real_xlsx_workbook() {
        let bytes = xlsx_for_tests(
            "职位表",
            &[
                &["2025年度考试录用公务员职位表", "", "", "", ""],
                &["部门名称", "职位名称", "招录人数", "学历", "专业"],
                &["西安市统计局", "统计员", "2", "本科", "统计学、经济学"],
                &["宝鸡市财政局", "会计", "1", "大专", "会计学"],
            ],
        );
        assert!(!looks_like_html(&bytes));

        let sheets = workbook_rows(&bytes).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].0, "职位表");
        assert_eq!(sheets[0].1[2][2], "2");

        let positions = ExcelParser.parse_tables(&bytes).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].department, "西安市统计局");
        assert_eq!(positions[0].title, "统计员");
        assert_eq!(positions[0].recruit_count, 2);
        assert_eq!(positions[0].majors, vec!["统计学", "经济学"]);
        assert_eq!(positions[1].recruit_count, 1);
        assert!(positions.iter().all(|p| p.source_kind == PositionSource::Excel));
    }
}
