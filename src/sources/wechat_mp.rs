// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::fenbi::issue_date;
use super::{Discovery, SourceError};
use crate::auth::cookies::SessionJar;
use crate::auth::wechat_login::{mp_headers, BaseResp, WECHAT_MP_BASE_URL};
use crate::domain::models::announcement::Announcement;
use crate::domain::models::article::Article;
use crate::domain::models::source::Source;
use crate::engines::router::Fetcher;
use crate::engines::traits::FetchRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// 文章列表默认条数
pub const DEFAULT_ARTICLE_COUNT: u32 = 10;

/// 公众号账号信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpAccount {
    pub fakeid: String,
    pub nickname: String,
    /// 微信号
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub round_head_img: String,
    #[serde(default)]
    pub service_type: i64,
}

/// 公众号文章
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpArticle {
    #[serde(default)]
    pub aid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default, rename = "content_url")]
    pub link: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub update_time: i64,
}

/// 文章列表结果
#[derive(Debug, Clone, Default)]
pub struct MpArticleList {
    pub app_msg_cnt: i64,
    pub articles: Vec<MpArticle>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    base_resp: BaseResp,
    #[serde(default)]
    list: Vec<MpAccount>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    base_resp: BaseResp,
    #[serde(default)]
    app_msg_cnt: i64,
    #[serde(default)]
    publish_page: String,
}

#[derive(Debug, Default, Deserialize)]
struct PublishPage {
    #[serde(default)]
    publish_list: Vec<PublishEntry>,
}

#[derive(Debug, Deserialize)]
struct PublishEntry {
    /// 对象，或本身是JSON字符串
    #[serde(default)]
    publish_info: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct PublishInfo {
    #[serde(default)]
    appmsg_info: Vec<MpArticle>,
}

fn check_base_resp(base: &BaseResp) -> Result<(), SourceError> {
    match base.ret {
        0 => Ok(()),
        -1 | 200003 => Err(SourceError::TokenExpired),
        code => Err(SourceError::Api {
            code,
            message: base.err_msg.clone(),
        }),
    }
}

/// 解析嵌套的 `publish_page`
pub fn parse_publish_page(publish_page: &str) -> Result<Vec<MpArticle>, SourceError> {
    if publish_page.trim().is_empty() {
        return Ok(Vec::new());
    }
    let page: PublishPage =
        serde_json::from_str(publish_page).map_err(|e| SourceError::Parse(e.to_string()))?;

    let mut articles = Vec::new();
    for entry in page.publish_list {
        let info: PublishInfo = match entry.publish_info {
            serde_json::Value::String(raw) if !raw.is_empty() => {
                serde_json::from_str(&raw).map_err(|e| SourceError::Parse(e.to_string()))?
            }
            value @ serde_json::Value::Object(_) => {
                serde_json::from_value(value).map_err(|e| SourceError::Parse(e.to_string()))?
            }
            _ => continue,
        };
        articles.extend(info.appmsg_info);
    }
    Ok(articles)
}

/// 公众平台文章适配器（需登录）
pub struct WechatMpSource {
    fetcher: Arc<Fetcher>,
    base_url: String,
}

impl WechatMpSource {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self::with_base_url(fetcher, WECHAT_MP_BASE_URL)
    }

    pub fn with_base_url(fetcher: Arc<Fetcher>, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// 按关键字搜索公众号
    #[instrument(skip(self, jar, token, cancel))]
    pub async fn search_accounts(
        &self,
        keyword: &str,
        jar: &SessionJar,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<MpAccount>, SourceError> {
        let url = format!(
            "{}/cgi-bin/searchbiz?action=search_biz&begin=0&count=5&query={}&token={}&lang=zh_CN&f=json&ajax=1",
            self.base_url,
            urlencoding::encode(keyword),
            token
        );
        let referer = format!(
            "{}/cgi-bin/appmsg?t=media/appmsg_edit&action=edit&type=10&token={}",
            self.base_url, token
        );
        let request = FetchRequest::get(url)
            .headers(mp_headers(&referer))
            .expect_json();
        let response = self.fetcher.fetch(&request, Some(jar), cancel).await?;
        let result: SearchResponse = response
            .json()
            .map_err(|e| SourceError::Parse(format!("failed to parse search response: {}", e)))?;
        check_base_resp(&result.base_resp)?;
        Ok(result.list)
    }

    /// 通过 biz 查找 fakeid，取第一个搜索结果
    pub async fn fakeid_from_biz(
        &self,
        biz: &str,
        jar: &SessionJar,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<MpAccount, SourceError> {
        self.search_accounts(biz, jar, token, cancel)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotFound(format!("no account found for biz: {}", biz)))
    }

    /// 获取已发表文章列表
    ///
    /// # 参数
    ///
    /// * `fakeid` - 公众号 fakeid
    /// * `begin` - 起始偏移
    /// * `count` - 条数
    #[instrument(skip(self, jar, token, cancel))]
    pub async fn article_list(
        &self,
        fakeid: &str,
        begin: u32,
        count: u32,
        jar: &SessionJar,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<MpArticleList, SourceError> {
        let url = format!(
            "{}/cgi-bin/appmsgpublish?sub=list&sub_action=list_ex&begin={}&count={}&fakeid={}&type=101&query=&token={}&lang=zh_CN&f=json&ajax=1",
            self.base_url,
            begin,
            count,
            urlencoding::encode(fakeid),
            token
        );
        let referer = format!(
            "{}/cgi-bin/appmsgpublish?t=appmsg/manage&token={}",
            self.base_url, token
        );
        let request = FetchRequest::get(url)
            .headers(mp_headers(&referer))
            .expect_json();
        let response = self.fetcher.fetch(&request, Some(jar), cancel).await?;
        let result: PublishResponse = response
            .json()
            .map_err(|e| SourceError::Parse(format!("failed to parse article list: {}", e)))?;
        check_base_resp(&result.base_resp)?;

        let articles = match parse_publish_page(&result.publish_page) {
            Ok(articles) => articles,
            Err(e) => {
                warn!(error = %e, "Failed to parse publish_page");
                Vec::new()
            }
        };
        Ok(MpArticleList {
            app_msg_cnt: result.app_msg_cnt,
            articles,
        })
    }

    /// 发现数据源绑定公众号的新文章
    ///
    /// 数据源参数：`fakeid`，或 `biz`（先查 fakeid），可选 `count`
    pub async fn discover(
        &self,
        source: &Source,
        jar: &SessionJar,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<Discovery, SourceError> {
        let fakeid = match source.param_str("fakeid") {
            Some(fakeid) => fakeid,
            None => {
                let biz = source
                    .param_str("biz")
                    .ok_or(SourceError::MissingParam("fakeid"))?;
                self.fakeid_from_biz(&biz, jar, token, cancel).await?.fakeid
            }
        };
        let count = source
            .param_str("count")
            .and_then(|c| c.parse().ok())
            .unwrap_or(DEFAULT_ARTICLE_COUNT);

        let list = self.article_list(&fakeid, 0, count, jar, token, cancel).await?;
        let mut discovery = Discovery {
            total_found: list.articles.len(),
            pages_visited: 1,
            has_next_page: (list.articles.len() as i64) < list.app_msg_cnt,
            ..Default::default()
        };
        for item in list.articles {
            if item.link.is_empty() || item.title.trim().is_empty() {
                discovery
                    .warnings
                    .push(format!("skipped article without link or title: {}", item.aid));
                continue;
            }
            let link = html_escape::decode_html_entities(&item.link).into_owned();
            let mut article = Article::new(source.id, &link, item.title.trim())
                .with_publish_date(issue_date(item.create_time * 1000));
            article.summary = (!item.digest.is_empty()).then(|| item.digest.clone());
            article.external_id = (!item.aid.is_empty()).then(|| item.aid.clone());
            discovery.candidates.push(Announcement::from_article(&article));
        }
        info!(fakeid = %fakeid, found = discovery.total_found, "Fetched WeChat MP article list");
        Ok(discovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::source::SourceKind;
    use crate::domain::models::session::Provider;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publish_page() -> String {
        let info = serde_json::json!({
            "appmsg_info": [{
                "aid": "2247483650_1",
                "title": "2025年度公开招聘公告",
                "digest": "招聘30人",
                "content_url": "https://mp.weixin.qq.com/s?__biz=MzA1&amp;mid=2247483650&amp;idx=1",
                "cover": "https://mmbiz.qpic.cn/c.jpg",
                "create_time": 1735660800,
                "update_time": 1735660800
            }]
        });
        serde_json::json!({
            "publish_list": [
                {"publish_info": info.to_string()},
                {"publish_info": {"appmsg_info": [{"aid": "2", "title": "对象形式", "content_url": "https://mp.weixin.qq.com/s/abc"}]}},
                {"publish_info": ""}
            ]
        })
        .to_string()
    }

    #[test]
    fn test_parse_publish_page_string_and_object_forms() {
        let articles = parse_publish_page(&publish_page()).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "2025年度公开招聘公告");
        assert_eq!(articles[1].link, "https://mp.weixin.qq.com/s/abc");
        assert!(parse_publish_page("").unwrap().is_empty());
    }

    #[test]
    fn test_expired_token_codes() {
        for ret in [-1, 200003] {
            let base = BaseResp {
                ret,
                err_msg: "invalid session".into(),
            };
            assert!(matches!(check_base_resp(&base), Err(SourceError::TokenExpired)));
        }
        let base = BaseResp {
            ret: 200013,
            err_msg: "freq control".into(),
        };
        assert!(matches!(
            check_base_resp(&base),
            Err(SourceError::Api { code: 200013, .. })
        ));
    }

    #[tokio::test]
    async fn test_discover_resolves_fakeid_and_lists_articles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/searchbiz"))
            .and(query_param("query", "MzA1"))
            .and(query_param("token", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "base_resp": {"ret": 0, "err_msg": "ok"},
                "list": [{"fakeid": "FAKE==", "nickname": "陕西人事考试"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/appmsgpublish"))
            .and(query_param("fakeid", "FAKE=="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "base_resp": {"ret": 0},
                "app_msg_cnt": 5,
                "publish_page": publish_page()
            })))
            .mount(&server)
            .await;

        let mp = WechatMpSource::with_base_url(Arc::new(Fetcher::http_only_for_tests()), server.uri());
        let source = Source::new("公众号", SourceKind::WechatMp, "")
            .with_params(serde_json::json!({"biz": "MzA1"}));
        let jar = SessionJar::for_provider(Provider::Wechat);

        let discovery = mp
            .discover(&source, &jar, "42", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(discovery.candidates.len(), 2);
        assert!(discovery.has_next_page);
        let first = &discovery.candidates[0];
        assert_eq!(
            first.url,
            "https://mp.weixin.qq.com/s?__biz=MzA1&mid=2247483650&idx=1"
        );
        assert_eq!(first.external_id.as_deref(), Some("2247483650_1"));
    }

    #[tokio::test]
    async fn test_expired_session_surfaces_token_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/appmsgpublish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "base_resp": {"ret": 200003, "err_msg": "invalid session"}
            })))
            .mount(&server)
            .await;

        let mp = WechatMpSource::with_base_url(Arc::new(Fetcher::http_only_for_tests()), server.uri());
        let jar = SessionJar::for_provider(Provider::Wechat);
        let err = mp
            .article_list("FAKE", 0, 5, &jar, "1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::TokenExpired));
    }
}
