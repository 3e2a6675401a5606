// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::RepositoryError;
use crate::domain::models::session::{Credential, Provider, Session};
use async_trait::async_trait;

/// 会话仓库特质
///
/// 每个提供方一条会话、一条凭据
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_session(&self, provider: Provider) -> Result<Option<Session>, RepositoryError>;
    async fn save_session(&self, session: &Session) -> Result<(), RepositoryError>;
    async fn get_credential(&self, provider: Provider)
        -> Result<Option<Credential>, RepositoryError>;
    async fn save_credential(&self, credential: &Credential) -> Result<(), RepositoryError>;
}
