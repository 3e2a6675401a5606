// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::announcement::{Announcement, CrawlStatus};
use crate::domain::models::crawl_event::CrawlEvent;
use crate::domain::models::crawl_task::CrawlTask;
use crate::domain::models::position::Position;
use crate::domain::models::session::{Credential, Provider, Session};
use crate::domain::models::source::{Source, SourceKind, SourceStatus};
use crate::domain::repositories::session_repository::SessionRepository;
use crate::domain::repositories::sink::Sink;
use crate::domain::repositories::source_repository::SourceRepository;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::repositories::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct StoreData {
    sources: HashMap<Uuid, Source>,
    announcements: HashMap<Uuid, Announcement>,
    /// (source_id, url) -> announcement id
    by_source_url: HashMap<(Uuid, String), Uuid>,
    positions: HashMap<Uuid, Vec<Position>>,
    events: Vec<CrawlEvent>,
    tasks: HashMap<Uuid, CrawlTask>,
    sessions: HashMap<Provider, Session>,
    credentials: HashMap<Provider, Credential>,
}

/// 内存存储
///
/// 实现全部仓库特质，用于测试以及不配置数据库的运行方式。
/// 每个操作在一次写锁内完成，相当于单行事务。
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<StoreData>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录的抓取事件
    pub fn events(&self) -> Vec<CrawlEvent> {
        self.data.read().events.clone()
    }

    pub fn announcement_count(&self) -> usize {
        self.data.read().announcements.len()
    }

    pub fn announcements(&self) -> Vec<Announcement> {
        let mut list: Vec<Announcement> =
            self.data.read().announcements.values().cloned().collect();
        list.sort_by_key(|a| a.created_at);
        list
    }
}

#[async_trait]
impl Sink for InMemoryStore {
    async fn upsert_announcement(
        &self,
        announcement: &Announcement,
    ) -> Result<Announcement, RepositoryError> {
        let mut data = self.data.write();
        let key = (announcement.source_id, announcement.url.clone());
        let mut stored = announcement.clone();
        if let Some(existing_id) = data.by_source_url.get(&key).copied() {
            if let Some(existing) = data.announcements.get(&existing_id) {
                stored.id = existing.id;
                stored.created_at = existing.created_at;
            }
            data.announcements.remove(&existing_id);
        }
        data.by_source_url.insert(key, stored.id);
        data.announcements.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn upsert_positions(
        &self,
        announcement_id: Uuid,
        positions: &[Position],
    ) -> Result<usize, RepositoryError> {
        let mut data = self.data.write();
        if !data.announcements.contains_key(&announcement_id) {
            return Err(RepositoryError::NotFound);
        }
        let stored = data.positions.entry(announcement_id).or_default();
        for position in positions {
            let key = position.natural_key();
            match stored.iter_mut().find(|p| p.natural_key() == key) {
                Some(existing) => {
                    let id = existing.id;
                    *existing = position.clone();
                    existing.id = id;
                }
                None => stored.push(position.clone()),
            }
        }
        Ok(positions.len())
    }

    async fn record_crawl_event(&self, event: &CrawlEvent) -> Result<(), RepositoryError> {
        self.data.write().events.push(event.clone());
        Ok(())
    }

    async fn save_candidate(
        &self,
        announcement: &Announcement,
    ) -> Result<(Announcement, bool), RepositoryError> {
        let mut data = self.data.write();
        let key = (announcement.source_id, announcement.url.clone());
        if let Some(existing) = data
            .by_source_url
            .get(&key)
            .and_then(|id| data.announcements.get(id))
        {
            return Ok((existing.clone(), false));
        }
        data.by_source_url.insert(key, announcement.id);
        data.announcements
            .insert(announcement.id, announcement.clone());
        Ok((announcement.clone(), true))
    }

    async fn get_announcement(&self, id: Uuid) -> Result<Option<Announcement>, RepositoryError> {
        Ok(self.data.read().announcements.get(&id).cloned())
    }

    async fn find_by_source_url(
        &self,
        source_id: Uuid,
        url: &str,
    ) -> Result<Option<Announcement>, RepositoryError> {
        let data = self.data.read();
        Ok(data
            .by_source_url
            .get(&(source_id, url.to_string()))
            .and_then(|id| data.announcements.get(id))
            .cloned())
    }

    async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Announcement>, RepositoryError> {
        if content_hash.is_empty() {
            return Ok(None);
        }
        Ok(self
            .data
            .read()
            .announcements
            .values()
            .filter(|a| a.content_hash == content_hash)
            .min_by_key(|a| a.created_at)
            .cloned())
    }

    async fn update_crawl_status(
        &self,
        id: Uuid,
        status: CrawlStatus,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.write();
        let announcement = data
            .announcements
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        announcement.crawl_status = status;
        announcement.updated_at = Utc::now();
        Ok(())
    }

    async fn list_positions(&self, announcement_id: Uuid) -> Result<Vec<Position>, RepositoryError> {
        Ok(self
            .data
            .read()
            .positions
            .get(&announcement_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceRepository for InMemoryStore {
    async fn create(&self, source: &Source) -> Result<Source, RepositoryError> {
        self.data.write().sources.insert(source.id, source.clone());
        Ok(source.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Source>, RepositoryError> {
        Ok(self.data.read().sources.get(&id).cloned())
    }

    async fn find_active_by_kind(&self, kind: SourceKind) -> Result<Vec<Source>, RepositoryError> {
        let mut sources: Vec<Source> = self
            .data
            .read()
            .sources
            .values()
            .filter(|s| s.kind == kind && s.is_active())
            .cloned()
            .collect();
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn mark_crawled(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut data = self.data.write();
        let source = data.sources.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        source.last_crawled_at = Some(at);
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SourceStatus) -> Result<(), RepositoryError> {
        let mut data = self.data.write();
        let source = data.sources.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        source.status = status;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn get_session(&self, provider: Provider) -> Result<Option<Session>, RepositoryError> {
        Ok(self.data.read().sessions.get(&provider).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), RepositoryError> {
        self.data
            .write()
            .sessions
            .insert(session.provider, session.clone());
        Ok(())
    }

    async fn get_credential(
        &self,
        provider: Provider,
    ) -> Result<Option<Credential>, RepositoryError> {
        Ok(self.data.read().credentials.get(&provider).cloned())
    }

    async fn save_credential(&self, credential: &Credential) -> Result<(), RepositoryError> {
        self.data
            .write()
            .credentials
            .insert(credential.provider, credential.clone());
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn save(&self, task: &CrawlTask) -> Result<(), RepositoryError> {
        self.data.write().tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CrawlTask>, RepositoryError> {
        Ok(self.data.read().tasks.get(&id).cloned())
    }
}
