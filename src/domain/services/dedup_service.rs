// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::announcement::{Announcement, CrawlStatus};
use crate::domain::models::crawl_event::CrawlEvent;
use crate::domain::models::position::Position;
use crate::domain::repositories::sink::Sink;
use crate::utils::errors::CrawlError;
use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// 发布结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// 新公告
    Inserted,
    /// 同一 (source_id, url) 的内容发生变化
    Updated,
    /// 内容未变，跳过写入
    Unchanged,
    /// URL 不同但内容与已有公告相同，附带 `duplicate_of` 写入
    Duplicate,
}

impl EmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitOutcome::Inserted => "inserted",
            EmitOutcome::Updated => "updated",
            EmitOutcome::Unchanged => "unchanged",
            EmitOutcome::Duplicate => "duplicate",
        }
    }

    /// 是否产生了写入
    pub fn is_written(&self) -> bool {
        !matches!(self, EmitOutcome::Unchanged)
    }
}

impl fmt::Display for EmitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 去重与发布服务
///
/// 所有写入汇聚端的公告都经过这里。按内容哈希串行化：同一哈希的并发发布
/// 只会有一次写入胜出，后到者看到已有记录并被标记为重复或跳过。
pub struct DedupService {
    sink: Arc<dyn Sink>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DedupService {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            locks: DashMap::new(),
        }
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    fn lock_for(&self, content_hash: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(content_hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, content_hash: &str) {
        self.locks
            .remove_if(content_hash, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// 发布公告
    ///
    /// 不满足有效性（标题为空或正文不足50字）的公告被拒绝。
    ///
    /// # 参数
    ///
    /// * `announcement` - 已抽取正文的公告
    /// * `task_id` - 所属任务，写入抓取事件
    ///
    /// # 返回值
    ///
    /// 返回落库后的公告（`Unchanged` 时为已有记录）与发布结果
    #[instrument(skip(self, announcement), fields(url = %announcement.url))]
    pub async fn emit_announcement(
        &self,
        mut announcement: Announcement,
        task_id: Option<Uuid>,
    ) -> Result<(Announcement, EmitOutcome), CrawlError> {
        announcement
            .validate()
            .map_err(|e| CrawlError::Validation(e.to_string()))?;
        announcement.refresh_content_hash();
        let hash = announcement.content_hash.clone();

        let lock = self.lock_for(&hash);
        let result = {
            let _guard = lock.lock().await;
            self.emit_locked(announcement).await
        };
        drop(lock);
        self.release(&hash);

        let (stored, outcome) = result?;
        counter!("announcements_emitted_total", "outcome" => outcome.as_str()).increment(1);

        if outcome.is_written() {
            let mut event = CrawlEvent::new(
                "announcement_emitted",
                format!("{}: {}", outcome, stored.title),
            )
            .for_source(stored.source_id)
            .for_announcement(stored.id);
            if let Some(task_id) = task_id {
                event = event.for_task(task_id);
            }
            self.sink.record_crawl_event(&event).await?;
        }
        Ok((stored, outcome))
    }

    async fn emit_locked(
        &self,
        mut announcement: Announcement,
    ) -> Result<(Announcement, EmitOutcome), CrawlError> {
        let now = Utc::now();
        if let Some(existing) = self
            .sink
            .find_by_source_url(announcement.source_id, &announcement.url)
            .await?
        {
            if existing.content_hash == announcement.content_hash {
                debug!(id = %existing.id, "Content unchanged, skipping");
                return Ok((existing, EmitOutcome::Unchanged));
            }
            announcement.id = existing.id;
            announcement.created_at = existing.created_at;
            announcement.updated_at = now;
            if announcement.duplicate_of.is_none() {
                announcement.duplicate_of = self.find_duplicate(&announcement).await?;
            }
            let stored = self.sink.upsert_announcement(&announcement).await?;
            info!(id = %stored.id, "Announcement updated");
            return Ok((stored, EmitOutcome::Updated));
        }

        announcement.updated_at = now;
        let duplicate_of = self.find_duplicate(&announcement).await?;
        announcement.duplicate_of = duplicate_of;
        let stored = self.sink.upsert_announcement(&announcement).await?;
        let outcome = if duplicate_of.is_some() {
            info!(id = %stored.id, duplicate_of = ?duplicate_of, "Announcement duplicates existing content");
            EmitOutcome::Duplicate
        } else {
            info!(id = %stored.id, "Announcement inserted");
            EmitOutcome::Inserted
        };
        Ok((stored, outcome))
    }

    async fn find_duplicate(&self, announcement: &Announcement) -> Result<Option<Uuid>, CrawlError> {
        Ok(self
            .sink
            .find_by_content_hash(&announcement.content_hash)
            .await?
            .filter(|other| other.id != announcement.id)
            .map(|other| other.duplicate_of.unwrap_or(other.id)))
    }

    /// 发布职位并把公告标记为已抽取
    ///
    /// # 返回值
    ///
    /// 返回写入的职位数量
    pub async fn emit_positions(
        &self,
        announcement_id: Uuid,
        positions: &[Position],
        task_id: Option<Uuid>,
    ) -> Result<usize, CrawlError> {
        let written = self.sink.upsert_positions(announcement_id, positions).await?;
        self.sink
            .update_crawl_status(announcement_id, CrawlStatus::Extracted)
            .await?;

        let mut event = CrawlEvent::new("positions_emitted", format!("{} positions", written))
            .for_announcement(announcement_id);
        if let Some(task_id) = task_id {
            event = event.for_task(task_id);
        }
        self.sink.record_crawl_event(&event).await?;
        info!(%announcement_id, written, "Positions emitted");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::article::Article;
    use crate::infrastructure::memory_store::InMemoryStore;

    fn fetched(source_id: Uuid, url: &str, body: &str) -> Announcement {
        let mut a = Announcement::from_article(&Article::new(source_id, url, "2025年招录公告"));
        a.content_text = body.to_string();
        a.crawl_status = CrawlStatus::Fetched;
        a
    }

    fn body(tag: &str) -> String {
        format!("{}{}", tag, "公告正文内容".repeat(12))
    }

    #[tokio::test]
    async fn test_insert_unchanged_update() {
        let store = Arc::new(InMemoryStore::new());
        let dedup = DedupService::new(store.clone());
        let source_id = Uuid::new_v4();

        let (first, outcome) = dedup
            .emit_announcement(fetched(source_id, "https://a.gov.cn/1.html", &body("A")), None)
            .await
            .unwrap();
        assert_eq!(outcome, EmitOutcome::Inserted);

        // 空白与大小写差异不影响哈希
        let same = format!("  {}  ", body("a"));
        let (_, outcome) = dedup
            .emit_announcement(fetched(source_id, "https://a.gov.cn/1.html", &same), None)
            .await
            .unwrap();
        assert_eq!(outcome, EmitOutcome::Unchanged);

        let (updated, outcome) = dedup
            .emit_announcement(fetched(source_id, "https://a.gov.cn/1.html", &body("B")), None)
            .await
            .unwrap();
        assert_eq!(outcome, EmitOutcome::Updated);
        assert_eq!(updated.id, first.id);
        assert_eq!(store.announcement_count(), 1);
        assert_eq!(store.events().len(), 2);
    }

    #[tokio::test]
    async fn test_same_content_other_url_is_marked_duplicate() {
        let store = Arc::new(InMemoryStore::new());
        let dedup = DedupService::new(store.clone());

        let (original, _) = dedup
            .emit_announcement(
                fetched(Uuid::new_v4(), "https://a.gov.cn/1.html", &body("X")),
                None,
            )
            .await
            .unwrap();
        let (copy, outcome) = dedup
            .emit_announcement(
                fetched(Uuid::new_v4(), "https://mirror.cn/x.html", &body("X")),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome, EmitOutcome::Duplicate);
        assert_eq!(copy.duplicate_of, Some(original.id));
        assert_eq!(store.announcement_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_announcement_rejected() {
        let dedup = DedupService::new(Arc::new(InMemoryStore::new()));
        let short = fetched(Uuid::new_v4(), "https://a.gov.cn/1.html", &"字".repeat(40));
        assert!(matches!(
            dedup.emit_announcement(short, None).await,
            Err(CrawlError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_equal_content_has_one_winner() {
        let store = Arc::new(InMemoryStore::new());
        let dedup = Arc::new(DedupService::new(store.clone()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let dedup = dedup.clone();
            handles.push(tokio::spawn(async move {
                let url = format!("https://site{}.gov.cn/a.html", i);
                dedup
                    .emit_announcement(fetched(Uuid::new_v4(), &url, &body("same")), None)
                    .await
                    .map(|(_, outcome)| outcome)
            }));
        }
        let mut inserted = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                EmitOutcome::Inserted => inserted += 1,
                EmitOutcome::Duplicate => duplicates += 1,
                other => panic!("unexpected outcome {}", other),
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(duplicates, 7);
        assert!(dedup.locks.is_empty());
    }

    #[tokio::test]
    async fn test_emit_positions_marks_extracted() {
        use crate::domain::models::position::PositionSource;

        let store = Arc::new(InMemoryStore::new());
        let dedup = DedupService::new(store.clone());
        let (a, _) = dedup
            .emit_announcement(fetched(Uuid::new_v4(), "https://a.gov.cn/p.html", &body("P")), None)
            .await
            .unwrap();

        let mut p = Position::draft(PositionSource::HtmlTable);
        p.announcement_id = a.id;
        p.title = "科员".to_string();
        let task_id = Uuid::new_v4();
        assert_eq!(dedup.emit_positions(a.id, &[p], Some(task_id)).await.unwrap(), 1);

        let stored = store.get_announcement(a.id).await.unwrap().unwrap();
        assert_eq!(stored.crawl_status, CrawlStatus::Extracted);
        assert!(store.events().iter().any(|e| e.task_id == Some(task_id)));
    }
}
