// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::AuthError;
use crate::auth::cookies::SessionJar;
use crate::engines::router::Fetcher;
use crate::engines::traits::{FetchBody, FetchError, FetchRequest};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Datelike, Utc};
use rsa::rand_core::OsRng;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// 登录前访问的主页，用于获取初始Cookie
pub const FENBI_HOME_URL: &str = "https://www.fenbi.com/";
/// 题库子域登录接口，优先尝试
pub const FENBI_TIKU_LOGIN_URL: &str = "https://tiku.fenbi.com/api/users/loginV2";
pub const FENBI_LOGIN_URL: &str = "https://login.fenbi.com/api/users/loginV2";
pub const FENBI_EXAM_API_URL: &str =
    "https://market-api.fenbi.com/toolkit/api/v1/pc/exam/queryByCondition";
/// 粉笔 Web 客户端附带的查询参数
pub const FENBI_API_QUERY: &str = "app=web&av=100&hav=100&kav=100";

/// 登录页 encrypt.js 内置的 RSA 模数（base64）
pub const FENBI_PUBLIC_KEY: &str = "ANKi9PWuvDOsagwIVvrPx77mXNV0APmjySsYjB1/GtUTY6cyKNRl2RCTt608m9nYk5VeCG2EAZRQmQNQTyfZkw0Uo+MytAkjj17BXOpY4o6+BToi7rRKfTGl6J60/XBZcGSzN1XVZ80ElSjaGE8Ocg8wbPN18tbmsy761zN5SuIl";
const FENBI_PUBLIC_EXPONENT: u32 = 65537;

const B64_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// 模仿粉笔 Web 客户端的请求头
pub fn api_headers(accept: &str) -> Vec<(String, String)> {
    headers_from(accept, "https://www.fenbi.com")
}

fn headers_from(accept: &str, origin: &str) -> Vec<(String, String)> {
    vec![
        ("Accept".to_string(), accept.to_string()),
        ("Accept-Language".to_string(), "zh-CN,zh;q=0.9,en;q=0.8".to_string()),
        ("Origin".to_string(), origin.to_string()),
        ("Referer".to_string(), format!("{}/", origin)),
    ]
}

/// 登录接口及其请求来源站点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginEndpoint {
    pub url: String,
    pub origin: String,
}

impl LoginEndpoint {
    pub fn new(url: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: origin.into(),
        }
    }
}

/// 由 base64 模数构造公钥
pub fn public_key_from_modulus(modulus_b64: &str) -> Result<RsaPublicKey, AuthError> {
    let modulus = STANDARD
        .decode(modulus_b64)
        .map_err(|e| AuthError::Encryption(format!("invalid modulus: {}", e)))?;
    RsaPublicKey::new(
        BigUint::from_bytes_be(&modulus),
        BigUint::from(FENBI_PUBLIC_EXPONENT),
    )
    .map_err(|e| AuthError::Encryption(e.to_string()))
}

/// 十六进制串转 base64
///
/// 与登录页 JS 的转换一致：每3个十六进制字符输出2个字符，末尾补 `=` 到4的倍数
pub fn hex_to_base64(hex_str: &str) -> String {
    let digits: Vec<u32> = hex_str.chars().filter_map(|c| c.to_digit(16)).collect();
    let mut out = String::with_capacity(digits.len() * 2 / 3 + 4);
    let push = |out: &mut String, v: u32| out.push(B64_ALPHABET[(v & 63) as usize] as char);

    let mut chunks = digits.chunks_exact(3);
    for chunk in chunks.by_ref() {
        let v = (chunk[0] << 8) | (chunk[1] << 4) | chunk[2];
        push(&mut out, v >> 6);
        push(&mut out, v & 63);
    }
    match chunks.remainder() {
        [a] => push(&mut out, a << 2),
        [a, b] => {
            let v = (a << 4) | b;
            push(&mut out, v >> 2);
            push(&mut out, (v & 3) << 4);
        }
        _ => {}
    }
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

/// `hex_to_base64` 的逆变换（偶数长度十六进制时与标准 base64 一致）
pub fn base64_to_bytes(encoded: &str) -> Result<Vec<u8>, AuthError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| AuthError::Encryption(e.to_string()))
}

/// 使用指定公钥加密密码
///
/// PKCS#1 v1.5 填充带随机数，同一密码两次加密结果不同
pub fn encrypt_password_with(key: &RsaPublicKey, password: &str) -> Result<String, AuthError> {
    let encrypted = key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| AuthError::Encryption(e.to_string()))?;
    Ok(hex_to_base64(&hex::encode(encrypted)))
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    code: i64,
    #[serde(default, alias = "msg")]
    message: String,
    #[serde(default)]
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CodeResponse {
    code: i64,
}

/// 登录结果
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// 合并后的完整Cookie串
    pub cookies: String,
    pub user_id: Option<String>,
}

/// 粉笔账号密码登录
///
/// 先访问主页获取初始Cookie，再按序尝试各登录接口：题库子域优先，
/// 失败后回退到登录子域。
pub struct FenbiLogin {
    home_url: String,
    endpoints: Vec<LoginEndpoint>,
    probe_url: String,
    public_key: RsaPublicKey,
}

impl FenbiLogin {
    pub fn new() -> Result<Self, AuthError> {
        Self::with_endpoints(
            FENBI_HOME_URL,
            vec![
                LoginEndpoint::new(FENBI_TIKU_LOGIN_URL, "https://tiku.fenbi.com"),
                LoginEndpoint::new(FENBI_LOGIN_URL, "https://www.fenbi.com"),
            ],
            FENBI_EXAM_API_URL,
        )
    }

    pub fn with_endpoints(
        home_url: impl Into<String>,
        endpoints: Vec<LoginEndpoint>,
        probe_url: impl Into<String>,
    ) -> Result<Self, AuthError> {
        if endpoints.is_empty() {
            return Err(AuthError::LoginFailed("no login endpoint configured".to_string()));
        }
        Ok(Self {
            home_url: home_url.into(),
            endpoints,
            probe_url: probe_url.into(),
            public_key: public_key_from_modulus(FENBI_PUBLIC_KEY)?,
        })
    }

    pub fn encrypt_password(&self, password: &str) -> Result<String, AuthError> {
        encrypt_password_with(&self.public_key, password)
    }

    /// 访问主页，让Cookie罐拿到初始会话Cookie；失败不影响登录
    async fn init_session(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let request = FetchRequest::get(self.home_url.as_str())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8")
            .allow_error_status();
        match fetcher.fetch(&request, Some(jar), cancel).await {
            Ok(response) => {
                debug!(status = response.status, cookies = jar.cookie_map().len(), "Session initialized");
                Ok(())
            }
            Err(FetchError::Cancelled) => Err(FetchError::Cancelled.into()),
            Err(e) => {
                warn!(error = %e, "Failed to init session, continuing");
                Ok(())
            }
        }
    }

    /// 账号密码登录
    ///
    /// 成功条件：`code == 1`，且Cookie中 `userid` 非空非"0"、`sess` 非空。
    /// 响应Cookie已由Cookie罐合并，返回全部已知域名下的完整Cookie串。
    /// 所有接口都失败时返回最后一个接口的错误。
    #[instrument(skip(self, fetcher, jar, password, cancel))]
    pub async fn login(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        phone: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, AuthError> {
        self.init_session(fetcher, jar, cancel).await?;

        let mut last_error = None;
        for endpoint in &self.endpoints {
            match self.login_at(endpoint, fetcher, jar, phone, password, cancel).await {
                Ok(outcome) => return Ok(outcome),
                Err(AuthError::Fetch(FetchError::Cancelled)) => {
                    return Err(FetchError::Cancelled.into())
                }
                Err(e) => {
                    warn!(endpoint = %endpoint.url, error = %e, "Fenbi login attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| AuthError::LoginFailed("no login endpoint configured".to_string())))
    }

    async fn login_at(
        &self,
        endpoint: &LoginEndpoint,
        fetcher: &Fetcher,
        jar: &SessionJar,
        phone: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, AuthError> {
        let encrypted = self.encrypt_password(password)?;
        let form = vec![
            ("phone".to_string(), phone.to_string()),
            ("password".to_string(), encrypted),
            ("persistent".to_string(), "true".to_string()),
            ("app".to_string(), "web".to_string()),
        ];
        let request = FetchRequest::post(
            format!("{}?{}", endpoint.url, FENBI_API_QUERY),
            FetchBody::Form(form),
        )
        .headers(headers_from("application/json, text/plain, */*", &endpoint.origin))
        .expect_json()
        .allow_error_status();

        let response = fetcher.fetch(&request, Some(jar), cancel).await?;
        let body: LoginResponse = response.json().map_err(|e| {
            AuthError::LoginFailed(format!("unexpected login response: {}", e))
        })?;
        if body.code != 1 {
            let msg = if body.message.is_empty() {
                format!("登录失败，错误码: {}", body.code)
            } else {
                body.message
            };
            return Err(AuthError::LoginFailed(msg));
        }

        let user_cookie = jar.cookie("userid").filter(|v| v != "0");
        let sess_cookie = jar.cookie("sess");
        if user_cookie.is_none() || sess_cookie.is_none() {
            return Err(AuthError::LoginFailed(
                "login response carried no userid/sess cookies".to_string(),
            ));
        }

        let user_id = body
            .data
            .and_then(|d| d.id)
            .map(|id| id.to_string())
            .or(user_cookie);
        info!(user_id = ?user_id, endpoint = %endpoint.url, "Fenbi login succeeded");
        Ok(LoginOutcome {
            cookies: jar.cookie_string(),
            user_id,
        })
    }

    /// 主动探测会话：以 `len = 1` 查询公告接口，`code == 1` 视为有效
    #[instrument(skip_all)]
    pub async fn probe(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        cancel: &CancellationToken,
    ) -> Result<bool, AuthError> {
        let payload = serde_json::json!({
            "year": Utc::now().year().to_string(),
            "start": 0,
            "len": 1,
            "needTotal": true,
        });
        let request = FetchRequest::post(
            format!("{}?{}", self.probe_url, FENBI_API_QUERY),
            FetchBody::Json(payload),
        )
        .headers(api_headers("application/json"))
        .expect_json();

        match fetcher.fetch(&request, Some(jar), cancel).await {
            Ok(response) => Ok(response
                .json::<CodeResponse>()
                .map(|r| r.code == 1)
                .unwrap_or(false)),
            Err(FetchError::Status { status, .. }) if (400..500).contains(&status) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jar_for(server: &MockServer) -> SessionJar {
        let url = url::Url::parse(&server.uri()).unwrap();
        SessionJar::new(vec![format!(
            "{}:{}",
            url.host_str().unwrap(),
            url.port().unwrap()
        )])
    }

    fn local_login(server: &MockServer) -> FenbiLogin {
        FenbiLogin::with_endpoints(
            format!("{}/", server.uri()),
            vec![
                LoginEndpoint::new(format!("{}/tiku/loginV2", server.uri()), server.uri()),
                LoginEndpoint::new(format!("{}/login/loginV2", server.uri()), server.uri()),
            ],
            format!("{}/exam", server.uri()),
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_key_is_1024_bit() {
        let key = public_key_from_modulus(FENBI_PUBLIC_KEY).unwrap();
        use rsa::traits::PublicKeyParts;
        assert_eq!(key.n().bits(), 1024);
        assert_eq!(key.e(), &BigUint::from(65537u32));
    }

    #[test]
    fn test_hex_to_base64_matches_standard_alphabet() {
        for len in 0..40usize {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 37 + 11) as u8).collect();
            let custom = hex_to_base64(&hex::encode(&bytes));
            assert_eq!(custom.len() % 4, 0);
            assert_eq!(base64_to_bytes(&custom).unwrap(), bytes, "len {}", len);
        }
    }

    #[test]
    fn test_encryption_is_randomized_but_decrypts() {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        let a = encrypt_password_with(&public, "p@ssw0rd").unwrap();
        let b = encrypt_password_with(&public, "p@ssw0rd").unwrap();
        assert_ne!(a, b);

        for ciphertext in [a, b] {
            let raw = base64_to_bytes(&ciphertext).unwrap();
            let plain = private.decrypt(Pkcs1v15Encrypt, &raw).unwrap();
            assert_eq!(plain, b"p@ssw0rd");
        }
    }

    #[test]
    fn test_encrypt_with_builtin_key_has_expected_shape() {
        let login = FenbiLogin::new().unwrap();
        let encrypted = login.encrypt_password("123456").unwrap();
        // 128 字节密文
        assert_eq!(base64_to_bytes(&encrypted).unwrap().len(), 128);
    }

    #[tokio::test]
    async fn test_login_inits_session_then_falls_back_to_login_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "acw_tc=seed; Path=/")
                    .set_body_raw("<html><body>粉笔</body></html>", "text/html"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tiku/loginV2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": -1, "message": "请前往登录页登录"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login/loginV2"))
            .and(body_string_contains("persistent=true"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "userid=42; Path=/")
                    .append_header("set-cookie", "sess=s3cret; Path=/")
                    .set_body_json(json!({ "code": 1, "data": { "id": 42 } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let jar = jar_for(&server);
        let outcome = local_login(&server)
            .login(
                &Fetcher::http_only_for_tests(),
                &jar,
                "13800000000",
                "secret",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.user_id.as_deref(), Some("42"));
        assert!(outcome.cookies.contains("acw_tc=seed"));
        assert!(outcome.cookies.contains("sess=s3cret"));
        let requests = server.received_requests().await.unwrap();
        let paths: Vec<_> = requests.iter().map(|r| r.url.path().to_string()).collect();
        assert_eq!(paths, vec!["/", "/tiku/loginV2", "/login/loginV2"]);
    }

    #[tokio::test]
    async fn test_login_reports_last_failure_when_every_host_rejects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 2001, "message": "密码错误"
            })))
            .mount(&server)
            .await;

        let err = local_login(&server)
            .login(
                &Fetcher::http_only_for_tests(),
                &jar_for(&server),
                "13800000000",
                "wrong",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LoginFailed(ref m) if m == "密码错误"));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[test]
    fn test_requires_a_login_endpoint() {
        assert!(FenbiLogin::with_endpoints(FENBI_HOME_URL, Vec::new(), FENBI_EXAM_API_URL).is_err());
    }
}
