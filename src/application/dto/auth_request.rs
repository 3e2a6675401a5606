// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::session::{Provider, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ImportCookiesRequest {
    /// `name=value; name=value`
    #[validate(length(min = 1))]
    pub cookies: String,
    /// 公众平台 token，仅微信需要
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CredentialRequest {
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// 会话状态，不包含Cookie内容
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SessionStatusDto {
    pub provider: Provider,
    pub logged_in: bool,
    pub valid: bool,
    pub has_token: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub account: Option<serde_json::Value>,
}

impl SessionStatusDto {
    pub fn from_session(provider: Provider, session: Option<Session>, now: DateTime<Utc>) -> Self {
        match session {
            Some(s) => Self {
                provider,
                logged_in: true,
                valid: s.is_usable(now),
                has_token: s.token.is_some(),
                expires_at: Some(s.expires_at),
                last_validated_at: s.last_validated_at,
                account: s.account,
            },
            None => Self {
                provider,
                logged_in: false,
                valid: false,
                has_token: false,
                expires_at: None,
                last_validated_at: None,
                account: None,
            },
        }
    }
}
