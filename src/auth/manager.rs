// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::AuthError;
use crate::auth::cookies::{parse_cookie_string, SessionJar};
use crate::auth::fenbi_login::FenbiLogin;
use crate::auth::wechat_login::{LoginStatus, PollResult, QrCode, WechatLogin, QR_EXPIRES_IN_SECS};
use crate::domain::models::session::{Credential, Provider, Session};
use crate::domain::repositories::session_repository::SessionRepository;
use crate::engines::router::Fetcher;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// 导入Cookie与账号密码登录的会话有效期
pub const IMPORTED_SESSION_DAYS: i64 = 30;
/// 公众平台扫码登录的会话有效期
pub const WECHAT_SESSION_HOURS: i64 = 24;

struct PendingQr {
    fingerprint: String,
    jar: SessionJar,
    created_at: Instant,
}

/// 认证与会话管理器
///
/// 每个提供方一个会话，会话持有Cookie罐。抓取器是无状态传输层，
/// 每次请求时从这里借用Cookie罐。
pub struct AuthManager {
    fetcher: Arc<Fetcher>,
    repository: Arc<dyn SessionRepository>,
    fenbi: FenbiLogin,
    wechat: WechatLogin,
    jars: DashMap<Provider, SessionJar>,
    pending_qr: DashMap<String, PendingQr>,
    cookie_domains: HashMap<Provider, Vec<String>>,
}

impl AuthManager {
    pub fn new(
        fetcher: Arc<Fetcher>,
        repository: Arc<dyn SessionRepository>,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            fetcher,
            repository,
            fenbi: FenbiLogin::new()?,
            wechat: WechatLogin::default(),
            jars: DashMap::new(),
            pending_qr: DashMap::new(),
            cookie_domains: HashMap::new(),
        })
    }

    pub fn with_fenbi(mut self, fenbi: FenbiLogin) -> Self {
        self.fenbi = fenbi;
        self
    }

    pub fn with_wechat(mut self, wechat: WechatLogin) -> Self {
        self.wechat = wechat;
        self
    }

    /// 覆盖提供方的Cookie域名（测试或私有部署）
    pub fn with_cookie_domains(mut self, provider: Provider, domains: Vec<String>) -> Self {
        self.cookie_domains.insert(provider, domains);
        self
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    pub fn wechat(&self) -> &WechatLogin {
        &self.wechat
    }

    fn new_jar(&self, provider: Provider) -> SessionJar {
        match self.cookie_domains.get(&provider) {
            Some(domains) => SessionJar::new(domains.clone()),
            None => SessionJar::for_provider(provider),
        }
    }

    fn install(&self, provider: Provider, jar: SessionJar) {
        self.jars.insert(provider, jar);
    }

    /// 导入运营人员提供的Cookie串
    ///
    /// 安装到提供方全部已知域名，会话标记为有效、30天后过期；
    /// 是否真正可用由后续校验探测决定
    #[instrument(skip(self, cookie_string))]
    pub async fn import_cookies(
        &self,
        provider: Provider,
        cookie_string: &str,
    ) -> Result<Session, AuthError> {
        let parsed = parse_cookie_string(cookie_string);
        if parsed.is_empty() {
            return Err(AuthError::EmptyCookies);
        }
        let jar = self.new_jar(provider);
        jar.set_cookies(cookie_string);

        let previous_token = self
            .repository
            .get_session(provider)
            .await?
            .and_then(|s| s.token);
        let session = Session::new(
            provider,
            jar.cookie_string(),
            Duration::days(IMPORTED_SESSION_DAYS),
        )
        .with_token(previous_token);
        self.repository.save_session(&session).await?;
        self.install(provider, jar);
        info!(cookies = parsed.len(), "Cookies imported");
        Ok(session)
    }

    /// 导入Cookie并指定公众平台 token
    pub async fn import_cookies_with_token(
        &self,
        provider: Provider,
        cookie_string: &str,
        token: Option<String>,
    ) -> Result<Session, AuthError> {
        let mut session = self.import_cookies(provider, cookie_string).await?;
        if token.is_some() {
            session.token = token;
            self.repository.save_session(&session).await?;
        }
        Ok(session)
    }

    pub async fn save_credential(
        &self,
        provider: Provider,
        phone: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        let credential = Credential::new(provider, phone, password);
        self.repository.save_credential(&credential).await?;
        info!(%provider, "Credential saved");
        Ok(())
    }

    /// 使用已保存的凭据登录（仅粉笔）
    #[instrument(skip(self, cancel))]
    pub async fn login(
        &self,
        provider: Provider,
        cancel: &CancellationToken,
    ) -> Result<Session, AuthError> {
        if provider != Provider::Fenbi {
            return Err(AuthError::Unsupported(provider, "credential login"));
        }
        let credential = self
            .repository
            .get_credential(provider)
            .await?
            .ok_or(AuthError::MissingCredential(provider))?;

        let jar = self.new_jar(provider);
        let outcome = self
            .fenbi
            .login(&self.fetcher, &jar, &credential.phone, &credential.password, cancel)
            .await?;
        let mut session = Session::new(
            provider,
            outcome.cookies,
            Duration::days(IMPORTED_SESSION_DAYS),
        );
        session.account = outcome
            .user_id
            .map(|id| serde_json::json!({ "user_id": id }));
        self.repository.save_session(&session).await?;
        self.install(provider, jar);
        Ok(session)
    }

    /// 获取公众平台登录二维码
    pub async fn get_qrcode(
        &self,
        provider: Provider,
        cancel: &CancellationToken,
    ) -> Result<QrCode, AuthError> {
        if provider != Provider::Wechat {
            return Err(AuthError::Unsupported(provider, "QR code login"));
        }
        self.pending_qr
            .retain(|_, p| p.created_at.elapsed().as_secs() < QR_EXPIRES_IN_SECS);

        let jar = self.new_jar(provider);
        let qr = self.wechat.get_qrcode(&self.fetcher, &jar, cancel).await?;
        self.pending_qr.insert(
            qr.uuid.clone(),
            PendingQr {
                fingerprint: qr.fingerprint.clone(),
                jar,
                created_at: Instant::now(),
            },
        );
        Ok(qr)
    }

    /// 轮询扫码状态；确认后保存会话（24小时有效）
    #[instrument(skip(self, cancel))]
    pub async fn poll_login(
        &self,
        uuid: &str,
        cancel: &CancellationToken,
    ) -> Result<PollResult, AuthError> {
        let (fingerprint, jar, created_at) = match self.pending_qr.get(uuid) {
            Some(p) => (p.fingerprint.clone(), p.jar.clone(), p.created_at),
            None => return Err(AuthError::QrCode(format!("unknown uuid {}", uuid))),
        };
        if created_at.elapsed().as_secs() >= QR_EXPIRES_IN_SECS {
            self.pending_qr.remove(uuid);
            return Ok(PollResult::of(LoginStatus::Expired));
        }

        let result = self
            .wechat
            .poll(&self.fetcher, &jar, &fingerprint, cancel)
            .await?;
        if result.status == LoginStatus::Confirmed {
            let mut session = Session::new(
                Provider::Wechat,
                jar.cookie_string(),
                Duration::hours(WECHAT_SESSION_HOURS),
            )
            .with_token(result.token.clone());
            session.account = Some(serde_json::json!({
                "nickname": result.account_name,
                "fakeid": result.account_id,
            }));
            self.repository.save_session(&session).await?;
            self.install(Provider::Wechat, jar);
        }
        if result.status.is_final() {
            self.pending_qr.remove(uuid);
        }
        Ok(result)
    }

    /// 会话状态
    pub async fn status(&self, provider: Provider) -> Result<Option<Session>, AuthError> {
        Ok(self.repository.get_session(provider).await?)
    }

    /// 取得可用于认证请求的Cookie罐和会话
    ///
    /// 无会话、已过期或已被判定失效时直接拒绝
    pub async fn session_jar(&self, provider: Provider) -> Result<(SessionJar, Session), AuthError> {
        let session = self
            .repository
            .get_session(provider)
            .await?
            .ok_or(AuthError::NoSession(provider))?;
        if !session.is_usable(Utc::now()) {
            return Err(AuthError::SessionExpired(provider));
        }
        let jar = match self.jars.get(&provider) {
            Some(jar) => jar.clone(),
            None => {
                let jar = self.new_jar(provider);
                jar.set_cookies(&session.cookies);
                self.install(provider, jar.clone());
                jar
            }
        };
        Ok((jar, session))
    }

    /// 校验会话：本地检查后主动探测一个低成本的认证接口
    #[instrument(skip(self, cancel))]
    pub async fn validate(
        &self,
        provider: Provider,
        cancel: &CancellationToken,
    ) -> Result<Session, AuthError> {
        let mut session = self
            .repository
            .get_session(provider)
            .await?
            .ok_or(AuthError::NoSession(provider))?;

        let valid = if !session.is_usable(Utc::now()) {
            false
        } else {
            let (jar, _) = self.session_jar(provider).await?;
            match (provider, session.token.as_deref()) {
                (Provider::Fenbi, _) => self.fenbi.probe(&self.fetcher, &jar, cancel).await?,
                (Provider::Wechat, Some(token)) => {
                    self.wechat.probe(&self.fetcher, &jar, token, cancel).await?
                }
                (Provider::Wechat, None) => false,
            }
        };

        session.mark_validated(valid);
        self.repository.save_session(&session).await?;
        if !valid {
            warn!(%provider, "Session failed validation");
            self.jars.remove(&provider);
        }
        Ok(session)
    }

    /// 标记会话失效（认证接口返回过期）
    pub async fn invalidate(&self, provider: Provider) -> Result<(), AuthError> {
        if let Some(mut session) = self.repository.get_session(provider).await? {
            session.invalidate();
            self.repository.save_session(&session).await?;
        }
        self.jars.remove(&provider);
        warn!(%provider, "Session invalidated");
        Ok(())
    }

    /// 将响应中新增的Cookie写回会话
    pub async fn persist_jar(&self, provider: Provider) -> Result<(), AuthError> {
        let Some(jar) = self.jars.get(&provider).map(|j| j.clone()) else {
            return Ok(());
        };
        if let Some(mut session) = self.repository.get_session(provider).await? {
            session.cookies = jar.cookie_string();
            session.updated_at = Utc::now();
            self.repository.save_session(&session).await?;
        }
        Ok(())
    }
}
