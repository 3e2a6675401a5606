// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::announcement::{Announcement, Attachment};
use crate::domain::models::position::{Position, PositionSource};
use crate::domain::repositories::storage_repository::StorageRepository;
use crate::domain::services::llm_service::LLMServiceTrait;
use crate::engines::router::Fetcher;
use crate::engines::traits::{FetchError, FetchRequest};
use crate::parsers::html_table::parse_html_positions;
use crate::parsers::{ParseError, ParserKind, ParserRegistry};
use crate::utils::errors::CrawlError;
use crate::utils::url_utils::url_hash;
use metrics::counter;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// HTML 表格层的置信度
pub const HTML_TABLE_CONFIDENCE: u8 = 90;
/// 结构化附件层的置信度
pub const ATTACHMENT_CONFIDENCE: u8 = 85;

const ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(120);

/// 职位抽取结果
#[derive(Debug, Clone, Default)]
pub struct PositionExtraction {
    pub positions: Vec<Position>,
    /// 各职位置信度的算术平均，无职位时为 0
    pub confidence: f64,
    /// 附件失败、部分解析等警告，不影响整体结果
    pub warnings: Vec<String>,
    /// 已下载的附件，带内容哈希；暂存文件未能删除时保留本地路径
    pub attachments: Vec<Attachment>,
}

/// 单个附件的下载与解析结果
struct AttachmentOutcome {
    attachment: Attachment,
    parsed: Result<Vec<Position>, ParseError>,
}

impl PositionExtraction {
    fn warn(&mut self, message: String) {
        warn!(warning = %message, "Position extraction warning");
        self.warnings.push(message);
    }
}

/// 职位抽取服务（第二遍）
///
/// 策略瀑布：先解析正文中的HTML表格，再逐个解析附件（有附件时总会尝试），
/// 两者都没有结果时交给LLM。所有职位都会打上公告ID、来源URL与来源类型。
pub struct PositionService {
    fetcher: Arc<Fetcher>,
    storage: Arc<dyn StorageRepository>,
    parsers: Arc<ParserRegistry>,
    llm: Option<Arc<dyn LLMServiceTrait>>,
}

impl PositionService {
    pub fn new(
        fetcher: Arc<Fetcher>,
        storage: Arc<dyn StorageRepository>,
        parsers: Arc<ParserRegistry>,
        llm: Option<Arc<dyn LLMServiceTrait>>,
    ) -> Self {
        Self {
            fetcher,
            storage,
            parsers,
            llm,
        }
    }

    /// 抽取公告的全部职位
    ///
    /// # 参数
    ///
    /// * `announcement` - 已抓取正文的公告
    /// * `cancel` - 取消令牌，在每个阶段边界与网络请求处检查
    ///
    /// # 返回值
    ///
    /// * `Ok(PositionExtraction)` - 通过校验的职位、平均置信度与警告
    /// * `Err(CrawlError::Cancelled)` - 任务被取消
    #[instrument(skip(self, announcement, cancel), fields(announcement_id = %announcement.id))]
    pub async fn extract(
        &self,
        announcement: &Announcement,
        cancel: &CancellationToken,
    ) -> Result<PositionExtraction, CrawlError> {
        let mut result = PositionExtraction::default();
        let mut collected: Vec<Position> = Vec::new();

        if !announcement.content_html.is_empty() {
            let mut positions =
                parse_html_positions(&announcement.content_html, PositionSource::HtmlTable);
            for p in &mut positions {
                p.source_url = announcement.effective_url().to_string();
                p.confidence = HTML_TABLE_CONFIDENCE;
            }
            debug!(count = positions.len(), "HTML table positions");
            collected.extend(positions);
        }

        for attachment in &announcement.attachments {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            let Some(kind) = ParserKind::for_attachment(attachment.kind) else {
                debug!(url = %attachment.url, kind = attachment.kind.as_str(), "Skipping attachment");
                continue;
            };
            match self.extract_attachment(announcement, attachment, kind, cancel).await {
                Ok(outcome) => {
                    result.attachments.push(outcome.attachment);
                    match outcome.parsed {
                        Ok(positions) => collected.extend(positions),
                        Err(ParseError::Scanned { chars }) => result.warn(format!(
                            "附件 {} 为扫描件，仅有 {} 个可提取字符",
                            attachment.name, chars
                        )),
                        Err(e) => result.warn(format!("附件 {} 解析失败: {}", attachment.name, e)),
                    }
                }
                Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
                Err(e) => result.warn(format!("附件 {} 下载失败: {}", attachment.name, e)),
            }
        }

        if collected.is_empty() {
            if let Some(llm) = &self.llm {
                if cancel.is_cancelled() {
                    return Err(CrawlError::Cancelled);
                }
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                    outcome = llm.extract_positions(&announcement.content_text) => outcome,
                };
                match outcome {
                    Ok(extraction) => {
                        let mut positions = extraction.positions;
                        for p in &mut positions {
                            p.source_url = announcement.effective_url().to_string();
                        }
                        collected.extend(positions);
                    }
                    Err(e) => result.warn(format!("LLM 抽取失败: {}", e)),
                }
            }
        }

        let mut seen = HashSet::new();
        for mut position in collected {
            position.announcement_id = announcement.id;
            if !seen.insert(position.natural_key()) {
                continue;
            }
            match position.validate() {
                Ok(()) => {
                    counter!("positions_extracted_total", "source" => position.source_kind.as_str())
                        .increment(1);
                    result.positions.push(position);
                }
                Err(e) => result.warn(format!("丢弃职位 {}: {}", position.title, e)),
            }
        }

        result.confidence = mean_confidence(&result.positions);
        info!(
            positions = result.positions.len(),
            confidence = result.confidence,
            warnings = result.warnings.len(),
            "Position extraction finished"
        );
        Ok(result)
    }

    /// 下载、暂存并解析单个附件，结束后删除暂存文件
    ///
    /// 下载失败返回错误；解析失败放在结果里，附件的哈希照常记录
    async fn extract_attachment(
        &self,
        announcement: &Announcement,
        attachment: &Attachment,
        kind: ParserKind,
        cancel: &CancellationToken,
    ) -> Result<AttachmentOutcome, CrawlError> {
        let parser = self
            .parsers
            .get(kind)
            .ok_or_else(|| CrawlError::Parse(format!("no parser registered for {:?}", kind)))?;

        let request = FetchRequest::get(&attachment.url)
            .header("Referer", announcement.effective_url())
            .timeout(ATTACHMENT_TIMEOUT);
        let response = match self.fetcher.fetch(&request, None, cancel).await {
            Ok(response) => response,
            Err(FetchError::Cancelled) => return Err(CrawlError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        let mut downloaded = attachment.clone();
        downloaded.bytes_hash = Some(hex::encode(Sha256::digest(&response.body)));

        let key = format!("{}/{}", announcement.id, url_hash(&attachment.url));
        match self.storage.save(&key, &response.body).await {
            Ok(path) => {
                debug!(path = %path.display(), bytes = response.body.len(), "Attachment stored");
                downloaded.local_path = Some(path.display().to_string());
            }
            Err(e) => {
                warn!(error = %e, url = %attachment.url, "Failed to store attachment, parsing in memory");
            }
        }

        let body = response.body.clone();
        let parsed = tokio::task::spawn_blocking(move || parser.parse_tables(&body)).await;

        if downloaded.local_path.is_some() {
            match self.storage.delete(&key).await {
                Ok(()) => downloaded.local_path = None,
                Err(e) => warn!(error = %e, key = %key, "Failed to delete stored attachment"),
            }
        }

        let parsed = match parsed {
            Ok(parsed) => parsed.map(|mut positions| {
                for p in &mut positions {
                    p.source_url = attachment.url.clone();
                    p.source_kind = kind.position_source();
                    p.confidence = ATTACHMENT_CONFIDENCE;
                }
                info!(url = %attachment.url, kind = ?kind, count = positions.len(), "Attachment parsed");
                positions
            }),
            Err(e) => Err(ParseError::Unsupported(format!("parser panicked: {}", e))),
        };
        Ok(AttachmentOutcome {
            attachment: downloaded,
            parsed,
        })
    }
}

/// 职位置信度的算术平均
pub fn mean_confidence(positions: &[Position]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }
    let total: f64 = positions.iter().map(|p| f64::from(p.confidence)).sum();
    total / positions.len() as f64
}

#[cfg(test)]
#[path = "position_service_test.rs"]
mod tests;
