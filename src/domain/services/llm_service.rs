// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::LlmSettings;
use crate::domain::models::position::{Position, PositionSource};
use crate::domain::services::position_normalizer::{
    extract_number, is_unlimited_major, normalize_education, normalize_gender,
    normalize_political_status, normalize_position, parse_years, split_majors,
};
use crate::utils::text::take_chars;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// 模型未报告置信度时使用
pub const LLM_DEFAULT_CONFIDENCE: u8 = 70;

const SYSTEM_PROMPT: &str = "你是公务员、事业单位招考公告的职位信息抽取助手，只输出合法的JSON。";

const EXTRACTION_PROMPT: &str = r#"请从下面的招考公告正文中抽取所有招录职位，按如下JSON结构输出，不要输出任何解释：
{
  "confidence": 0-100 的整数，表示你对抽取结果的把握,
  "positions": [
    {
      "department": "招录机关/用人单位名称",
      "department_code": "单位代码，没有则为null",
      "title": "职位名称",
      "position_code": "职位代码，没有则为null",
      "recruit_count": 招录人数（整数）,
      "work_location": "工作地点",
      "province": "省份简称，如 陕西",
      "city": "城市，如 西安市",
      "education_min": "最低学历：博士研究生/硕士研究生/本科/大专/高中/中专/不限",
      "degree_required": "学位要求，没有则为null",
      "majors": ["专业1", "专业2"],
      "major_unlimited": 专业是否不限（true/false）,
      "political_status": "政治面貌：中共党员/共青团员/不限",
      "age_min": 最小年龄（整数或null）,
      "age_max": 最大年龄（整数或null）,
      "work_exp_min": 最少工作年限（整数或null）,
      "grassroots_exp_min": 最少基层工作年限（整数或null）,
      "hukou_required": 是否限制户籍（true/false）,
      "hukou_provinces": ["户籍限制的省份"],
      "gender": "男/女，不限则为null",
      "fresh_grad_only": 是否仅限应届毕业生（true/false）,
      "other_requirements": "其他资格条件",
      "notes": "备注"
    }
  ]
}
没有职位信息时返回 {"confidence": 0, "positions": []}。

公告正文：
"#;

/// LLM 调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM API key not configured")]
    NotConfigured,

    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("Failed to parse extracted JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// LLM 抽取结果
#[derive(Debug, Clone, Default)]
pub struct LlmExtraction {
    pub positions: Vec<Position>,
    /// 模型报告的整体置信度
    pub confidence: u8,
    pub usage: TokenUsage,
}

/// 职位抽取模型接口
#[async_trait]
pub trait LLMServiceTrait: Send + Sync {
    /// 从公告正文中抽取职位
    async fn extract_positions(&self, text: &str) -> Result<LlmExtraction, LlmError>;
}

/// LLM服务
///
/// 调用 OpenAI 兼容的 chat completion 接口，以固定的中文提示词抽取职位。
/// 配置来自 `llm` 配置段，未设置 `api_key` 时不创建服务，职位抽取跳过此层。
pub struct LLMService {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base_url: String,
    max_input_chars: usize,
    temperature: f32,
}

impl LLMService {
    /// 根据配置创建服务，未配置密钥时返回 `None`
    pub fn from_settings(settings: &LlmSettings) -> Option<Self> {
        let api_key = settings.api_key.clone().filter(|k| !k.trim().is_empty())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_default();
        Some(Self {
            client,
            api_key,
            model: settings.model.clone(),
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            max_input_chars: settings.max_input_chars,
            temperature: settings.temperature,
        })
    }

    async fn complete(&self, prompt: String) -> Result<(String, TokenUsage), LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::NotConfigured);
        }
        let request_body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
            "temperature": self.temperature
        });

        let url = format!("{}/chat/completions", self.api_base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let body: Value = response.json().await?;
        let usage = body
            .get("usage")
            .map(|u| TokenUsage {
                prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
            })
            .unwrap_or_default();

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("missing message content".to_string()))?;
        Ok((content.to_string(), usage))
    }
}

#[async_trait]
impl LLMServiceTrait for LLMService {
    #[instrument(skip(self, text), fields(model = %self.model))]
    async fn extract_positions(&self, text: &str) -> Result<LlmExtraction, LlmError> {
        let input = take_chars(text, self.max_input_chars);
        if input.len() < text.len() {
            debug!(limit = self.max_input_chars, "Truncated announcement text for LLM");
        }
        let (content, usage) = self.complete(format!("{}{}", EXTRACTION_PROMPT, input)).await?;
        let mut extraction = parse_llm_output(&content)?;
        extraction.usage = usage;
        info!(
            positions = extraction.positions.len(),
            confidence = extraction.confidence,
            tokens = extraction.usage.total_tokens,
            "LLM extraction finished"
        );
        Ok(extraction)
    }
}

/// 从模型回复中取出JSON文本
///
/// 优先取 ```json 代码块，否则取第一个括号配平的 `{…}`（或 `[…]`）
pub fn extract_json_block(content: &str) -> Option<&str> {
    let mut text = content.trim();
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        // 跳过语言标记
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        text = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
    }
    balanced_span(text)
}

fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 去掉对象与数组结尾多余的逗号，字符串内容保持不变
pub fn repair_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty() && s != "null").then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(value: &Value, key: &str) -> Option<i32> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64().map(|n| n as i32),
        Value::String(s) => extract_number(s),
        _ => None,
    }
}

fn bool_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim(), "true" | "是" | "1"),
        _ => false,
    }
}

fn list_field(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => split_majors(s),
        _ => Vec::new(),
    }
}

fn clamp_confidence(value: Option<&Value>) -> Option<u8> {
    value
        .and_then(Value::as_f64)
        .map(|c| c.round().clamp(0.0, 100.0) as u8)
}

fn value_to_position(value: &Value, default_confidence: u8) -> Option<Position> {
    let title = str_field(value, "title").or_else(|| str_field(value, "position_name"))?;
    let mut position = Position::draft(PositionSource::Llm);
    position.title = title;
    position.department = str_field(value, "department").unwrap_or_default();
    position.department_code = str_field(value, "department_code");
    position.position_code = str_field(value, "position_code");
    position.recruit_count = int_field(value, "recruit_count").unwrap_or(1);
    position.work_location = str_field(value, "work_location").unwrap_or_default();
    position.province = str_field(value, "province");
    position.city = str_field(value, "city");
    position.education_min = str_field(value, "education_min").and_then(|e| normalize_education(&e));
    position.degree_required = str_field(value, "degree_required");

    let majors = list_field(value, "majors");
    position.major_unlimited = bool_field(value, "major_unlimited")
        || (majors.len() == 1 && is_unlimited_major(&majors[0]));
    if !position.major_unlimited {
        position.majors = majors;
    }

    position.political_status =
        str_field(value, "political_status").and_then(|s| normalize_political_status(&s));
    position.age_min = int_field(value, "age_min");
    position.age_max = int_field(value, "age_max");
    position.work_exp_min = int_field(value, "work_exp_min")
        .or_else(|| str_field(value, "work_exp_min").and_then(|s| parse_years(&s)));
    position.grassroots_exp_min = int_field(value, "grassroots_exp_min");
    position.hukou_required = bool_field(value, "hukou_required");
    position.hukou_provinces = list_field(value, "hukou_provinces");
    position.gender = str_field(value, "gender").and_then(|g| normalize_gender(&g));
    position.fresh_grad_only = bool_field(value, "fresh_grad_only");
    position.other_requirements = str_field(value, "other_requirements");
    position.notes = str_field(value, "notes");
    position.confidence =
        clamp_confidence(value.get("confidence")).unwrap_or(default_confidence);

    normalize_position(&mut position);
    Some(position)
}

/// 解析模型回复为职位列表
///
/// 接受 `{"confidence", "positions": [...]}` 或直接的职位数组
pub fn parse_llm_output(content: &str) -> Result<LlmExtraction, LlmError> {
    let block = extract_json_block(content)
        .ok_or_else(|| LlmError::InvalidResponse("no JSON found in model output".to_string()))?;
    let value: Value = serde_json::from_str(&repair_trailing_commas(block))?;

    let (confidence, items) = match &value {
        Value::Array(items) => (LLM_DEFAULT_CONFIDENCE, items.as_slice()),
        Value::Object(_) => (
            clamp_confidence(value.get("confidence")).unwrap_or(LLM_DEFAULT_CONFIDENCE),
            value
                .get("positions")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        ),
        _ => {
            return Err(LlmError::InvalidResponse(
                "model output is not an object".to_string(),
            ))
        }
    };

    let positions = items
        .iter()
        .filter_map(|item| value_to_position(item, confidence))
        .collect();
    Ok(LlmExtraction {
        positions,
        confidence,
        usage: TokenUsage::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_json_from_fence_and_prose() {
        let fenced = "好的：\n```json\n{\"positions\": []}\n```\n以上";
        assert_eq!(extract_json_block(fenced), Some("{\"positions\": []}"));

        let prose = "结果如下 {\"a\": {\"b\": \"}\"}} 其余文字 {\"c\": 1}";
        assert_eq!(extract_json_block(prose), Some("{\"a\": {\"b\": \"}\"}}"));

        assert_eq!(extract_json_block("没有JSON"), None);
    }

    #[test]
    fn test_repair_trailing_commas_keeps_strings() {
        let repaired = repair_trailing_commas("{\"a\": [1, 2,], \"b\": \"x,}\",\n}");
        assert_eq!(repaired, "{\"a\": [1, 2], \"b\": \"x,}\"\n}");
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["b"], "x,}");
    }

    #[test]
    fn test_parse_output_maps_fields() {
        let content = r#"{"confidence": 72, "positions": [
            {"department": "西安市统计局", "title": "统计员", "recruit_count": "2人",
             "work_location": "陕西省西安市", "education_min": "本科及以上",
             "majors": "统计学、经济学", "age_max": 35, "gender": "不限",
             "fresh_grad_only": true},
            {"department": "无名称"}
        ]}"#;
        let extraction = parse_llm_output(content).unwrap();
        assert_eq!(extraction.confidence, 72);
        assert_eq!(extraction.positions.len(), 1);

        let p = &extraction.positions[0];
        assert_eq!(p.recruit_count, 2);
        assert_eq!(p.majors, vec!["统计学", "经济学"]);
        assert_eq!(p.education_min.as_deref(), Some("本科"));
        assert_eq!(p.age_max, Some(35));
        assert_eq!(p.gender, None);
        assert_eq!(p.province.as_deref(), Some("陕西"));
        assert_eq!(p.confidence, 72);
        assert_eq!(p.source_kind, PositionSource::Llm);
        assert!(p.fresh_grad_only);
    }

    #[test]
    fn test_missing_key_disables_service() {
        assert!(LLMService::from_settings(&LlmSettings::default()).is_none());
    }

    #[tokio::test]
    async fn test_extract_positions_against_mock_endpoint() {
        let server = MockServer::start().await;
        let reply = "```json\n{\"confidence\": 65, \"positions\": [{\"department\": \"某县人社局\", \"title\": \"科员\", \"recruit_count\": 1,},]}\n```";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": reply}}],
                "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let settings = LlmSettings {
            api_key: Some("test-key".to_string()),
            api_base_url: server.uri(),
            max_input_chars: 10,
            ..LlmSettings::default()
        };
        let service = LLMService::from_settings(&settings).unwrap();
        let extraction = service
            .extract_positions(&"公告正文".repeat(100))
            .await
            .unwrap();
        assert_eq!(extraction.positions.len(), 1);
        assert_eq!(extraction.positions[0].title, "科员");
        assert_eq!(extraction.confidence, 65);
        assert_eq!(extraction.usage.total_tokens, 120);

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let prompt = sent["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.ends_with("公告正文公告正文公告"));
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;
        let settings = LlmSettings {
            api_key: Some("k".to_string()),
            api_base_url: server.uri(),
            ..LlmSettings::default()
        };
        let service = LLMService::from_settings(&settings).unwrap();
        let err = service.extract_positions("正文").await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
    }
}
