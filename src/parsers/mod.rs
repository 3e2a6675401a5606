// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 职位表解析器
//!
//! 每种文档格式实现 [`ParseTables`]，输入原始字节，输出职位草稿。
//! 解析器在构造调度器时显式注册到 [`ParserRegistry`]。

pub mod excel;
pub mod fields;
pub mod free_text;
pub mod html_table;
pub mod pdf;
pub mod word;

use crate::domain::models::announcement::AttachmentKind;
use crate::domain::models::position::{Position, PositionSource};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 解析错误
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    /// 扫描件PDF，几乎没有可提取的文本
    #[error("scanned PDF with {chars} extractable characters")]
    Scanned { chars: usize },

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Unsupported document: {0}")]
    Unsupported(String),
}

/// 解析器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    HtmlTable,
    Excel,
    Word,
    Pdf,
}

impl ParserKind {
    /// 附件类型对应的解析器；图片等无解析器
    pub fn for_attachment(kind: AttachmentKind) -> Option<Self> {
        match kind {
            AttachmentKind::Excel => Some(ParserKind::Excel),
            AttachmentKind::Word => Some(ParserKind::Word),
            AttachmentKind::Pdf => Some(ParserKind::Pdf),
            AttachmentKind::Image | AttachmentKind::Other => None,
        }
    }

    pub fn position_source(&self) -> PositionSource {
        match self {
            ParserKind::HtmlTable => PositionSource::HtmlTable,
            ParserKind::Excel => PositionSource::Excel,
            ParserKind::Word => PositionSource::Word,
            ParserKind::Pdf => PositionSource::Pdf,
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.position_source().as_str())
    }
}

/// 职位表解析接口
///
/// 解析是纯CPU工作，调用方负责放到阻塞线程池执行
pub trait ParseTables: Send + Sync {
    fn kind(&self) -> ParserKind;

    /// 从文档字节中解析职位
    ///
    /// 返回的职位尚未归属公告，`source_kind` 与置信度由调用方盖章
    fn parse_tables(&self, bytes: &[u8]) -> Result<Vec<Position>, ParseError>;
}

/// 解析器注册表
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<ParserKind, Arc<dyn ParseTables>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置解析器
    pub fn standard() -> Self {
        Self::new()
            .register(Arc::new(html_table::HtmlTableParser))
            .register(Arc::new(excel::ExcelParser))
            .register(Arc::new(word::WordParser))
            .register(Arc::new(pdf::PdfParser))
    }

    pub fn register(mut self, parser: Arc<dyn ParseTables>) -> Self {
        self.parsers.insert(parser.kind(), parser);
        self
    }

    pub fn get(&self, kind: ParserKind) -> Option<Arc<dyn ParseTables>> {
        self.parsers.get(&kind).cloned()
    }
}
