// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::parse_column;
use crate::domain::models::session::{Credential, Provider, Session};
use crate::domain::repositories::session_repository::SessionRepository;
use crate::domain::repositories::RepositoryError;
use crate::infrastructure::database::entities::{
    credential as credential_entity, session as session_entity,
};
use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use std::sync::Arc;

/// 会话与凭据仓库实现
#[derive(Clone)]
pub struct SessionRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl SessionRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<session_entity::Model> for Session {
    type Error = RepositoryError;

    fn try_from(model: session_entity::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            provider: parse_column(&model.provider, "sessions.provider")?,
            cookies: model.cookies,
            token: model.token,
            expires_at: model.expires_at,
            last_validated_at: model.last_validated_at,
            valid: model.valid,
            account: model.account,
            updated_at: model.updated_at,
        })
    }
}

impl From<&Session> for session_entity::ActiveModel {
    fn from(session: &Session) -> Self {
        Self {
            provider: Set(session.provider.to_string()),
            cookies: Set(session.cookies.clone()),
            token: Set(session.token.clone()),
            expires_at: Set(session.expires_at),
            last_validated_at: Set(session.last_validated_at),
            valid: Set(session.valid),
            account: Set(session.account.clone()),
            updated_at: Set(session.updated_at),
        }
    }
}

#[async_trait]
impl SessionRepository for SessionRepositoryImpl {
    async fn get_session(&self, provider: Provider) -> Result<Option<Session>, RepositoryError> {
        session_entity::Entity::find_by_id(provider.to_string())
            .one(self.db.as_ref())
            .await?
            .map(Session::try_from)
            .transpose()
    }

    async fn save_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let txn = self.db.begin().await?;
        let model: session_entity::ActiveModel = session.into();
        if session_entity::Entity::find_by_id(session.provider.to_string())
            .one(&txn)
            .await?
            .is_some()
        {
            model.update(&txn).await?;
        } else {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn get_credential(
        &self,
        provider: Provider,
    ) -> Result<Option<Credential>, RepositoryError> {
        credential_entity::Entity::find_by_id(provider.to_string())
            .one(self.db.as_ref())
            .await?
            .map(|model| {
                Ok(Credential {
                    provider: parse_column(&model.provider, "credentials.provider")?,
                    phone: model.phone,
                    password: model.password,
                    updated_at: model.updated_at,
                })
            })
            .transpose()
    }

    async fn save_credential(&self, credential: &Credential) -> Result<(), RepositoryError> {
        let txn = self.db.begin().await?;
        let model = credential_entity::ActiveModel {
            provider: Set(credential.provider.to_string()),
            phone: Set(credential.phone.clone()),
            password: Set(credential.password.clone()),
            updated_at: Set(credential.updated_at),
        };
        if credential_entity::Entity::find_by_id(credential.provider.to_string())
            .one(&txn)
            .await?
            .is_some()
        {
            model.update(&txn).await?;
        } else {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::test_db;
    use chrono::Duration;

    #[tokio::test]
    async fn test_one_session_per_provider() {
        let repo = SessionRepositoryImpl::new(test_db::memory().await);
        assert!(repo.get_session(Provider::Wechat).await.unwrap().is_none());

        let session = Session::new(Provider::Wechat, "slave_sid=abc", Duration::hours(24))
            .with_token(Some("12345".to_string()));
        repo.save_session(&session).await.unwrap();

        let mut updated = session.clone();
        updated.invalidate();
        repo.save_session(&updated).await.unwrap();

        let stored = repo.get_session(Provider::Wechat).await.unwrap().unwrap();
        assert!(!stored.valid);
        assert_eq!(stored.token.as_deref(), Some("12345"));
        assert!(repo.get_session(Provider::Fenbi).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_overwrite() {
        let repo = SessionRepositoryImpl::new(test_db::memory().await);
        repo.save_credential(&Credential::new(Provider::Fenbi, "13800000000", "a"))
            .await
            .unwrap();
        repo.save_credential(&Credential::new(Provider::Fenbi, "13800000000", "b"))
            .await
            .unwrap();
        let stored = repo.get_credential(Provider::Fenbi).await.unwrap().unwrap();
        assert_eq!(stored.password, "b");
    }
}
