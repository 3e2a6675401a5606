// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::fields::rows_to_positions;
use super::{ParseError, ParseTables, ParserKind};
use crate::domain::models::position::{Position, PositionSource};
use crate::utils::text::collapse_whitespace;
use crate::utils::text_encoding::decode_bytes;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

static TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("table").unwrap());
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").unwrap());

/// 合并单元格展开的上限，防止恶意的 rowspan/colspan
const MAX_SPAN: usize = 200;

fn span(cell: &ElementRef, attr: &str) -> usize {
    cell.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_SPAN)
}

/// 把表格展开为网格
///
/// rowspan/colspan 的值复制到被合并的位置，招录机关列常跨多行
fn table_grid(table: ElementRef) -> Vec<Vec<String>> {
    let mut grid: Vec<Vec<String>> = Vec::new();
    // 每列尚需向下填充的 (剩余行数, 值)
    let mut pending: Vec<Option<(usize, String)>> = Vec::new();

    for tr in table.select(&ROW_SELECTOR) {
        // 嵌套表格的行归属内层表格
        let owner = tr
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "table");
        if owner.map(|t| t.id()) != Some(table.id()) {
            continue;
        }

        let mut row: Vec<String> = Vec::new();
        let mut cells = tr
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|el| matches!(el.value().name(), "td" | "th"))
            .peekable();

        let mut col = 0;
        loop {
            if let Some((remaining, value)) = pending.get(col).cloned().flatten() {
                row.push(value.clone());
                pending[col] = (remaining > 1).then(|| (remaining - 1, value));
                col += 1;
                continue;
            }
            let Some(cell) = cells.next() else {
                if pending.iter().skip(col).any(Option::is_some) {
                    row.push(String::new());
                    col += 1;
                    continue;
                }
                break;
            };
            let text = collapse_whitespace(&cell.text().collect::<String>());
            let rowspan = span(&cell, "rowspan");
            for _ in 0..span(&cell, "colspan") {
                if pending.len() <= col {
                    pending.resize(col + 1, None);
                }
                if rowspan > 1 {
                    pending[col] = Some((rowspan - 1, text.clone()));
                }
                row.push(text.clone());
                col += 1;
            }
        }

        if !row.is_empty() {
            grid.push(row);
        }
    }
    grid
}

/// 解析HTML中的全部表格为网格
pub fn html_tables(html: &str) -> Vec<Vec<Vec<String>>> {
    let document = Html::parse_document(html);
    document
        .select(&TABLE_SELECTOR)
        .map(table_grid)
        .filter(|grid| grid.len() >= 2)
        .collect()
}

/// 从HTML的职位表中解析职位
pub fn parse_html_positions(html: &str, source: PositionSource) -> Vec<Position> {
    html_tables(html)
        .iter()
        .flat_map(|grid| rows_to_positions(grid, source))
        .collect()
}

/// HTML表格解析器
pub struct HtmlTableParser;

impl ParseTables for HtmlTableParser {
    fn kind(&self) -> ParserKind {
        ParserKind::HtmlTable
    }

    fn parse_tables(&self, bytes: &[u8]) -> Result<Vec<Position>, ParseError> {
        let html = decode_bytes(bytes, Some("text/html"));
        Ok(parse_html_positions(&html, PositionSource::HtmlTable))
    }
}
