// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 职位实体
///
/// 从公告正文或附件中抽取的一行招录计划。同一公告可产生零个或多个职位。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Position {
    pub id: Uuid,
    pub announcement_id: Uuid,
    /// 职位所在的文档URL（公告页或附件）
    pub source_url: String,
    pub department: String,
    pub department_code: Option<String>,
    pub title: String,
    pub position_code: Option<String>,
    pub recruit_count: i32,
    pub work_location: String,
    pub province: Option<String>,
    pub city: Option<String>,
    pub education_min: Option<String>,
    pub degree_required: Option<String>,
    pub majors: Vec<String>,
    pub major_unlimited: bool,
    pub political_status: Option<String>,
    pub age_min: Option<i32>,
    pub age_max: Option<i32>,
    pub work_exp_min: Option<i32>,
    pub grassroots_exp_min: Option<i32>,
    pub hukou_required: bool,
    pub hukou_provinces: Vec<String>,
    pub gender: Option<String>,
    pub fresh_grad_only: bool,
    pub other_requirements: Option<String>,
    pub notes: Option<String>,
    pub source_kind: PositionSource,
    /// 置信度 0-100
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
}

/// 职位来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    #[default]
    HtmlTable,
    Excel,
    Pdf,
    Word,
    Llm,
}

impl PositionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSource::HtmlTable => "html_table",
            PositionSource::Excel => "excel",
            PositionSource::Pdf => "pdf",
            PositionSource::Word => "word",
            PositionSource::Llm => "llm",
        }
    }
}

impl fmt::Display for PositionSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html_table" => Ok(PositionSource::HtmlTable),
            "excel" => Ok(PositionSource::Excel),
            "pdf" => Ok(PositionSource::Pdf),
            "word" => Ok(PositionSource::Word),
            "llm" => Ok(PositionSource::Llm),
            other => Err(DomainError::UnknownValue(other.to_string())),
        }
    }
}

impl Position {
    /// 创建一个未归属公告的职位草稿
    pub fn draft(source_kind: PositionSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_kind,
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    /// 校验职位：标题非空、招录人数非负、置信度不超过100、已归属公告
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.announcement_id.is_nil() {
            return Err(DomainError::ValidationError(
                "position without announcement".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(DomainError::ValidationError("empty position title".to_string()));
        }
        if self.recruit_count < 0 {
            return Err(DomainError::ValidationError(format!(
                "negative recruit count: {}",
                self.recruit_count
            )));
        }
        if self.confidence > 100 {
            return Err(DomainError::ValidationError(format!(
                "confidence out of range: {}",
                self.confidence
            )));
        }
        if let (Some(min), Some(max)) = (self.age_min, self.age_max) {
            if min > max {
                return Err(DomainError::ValidationError(format!(
                    "age range inverted: {}-{}",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// 职位的自然键，同一公告内用于幂等写入
    ///
    /// 由职位代码、部门、职位名称与工作地点计算
    pub fn natural_key(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.position_code.as_deref().unwrap_or_default(),
            self.department.trim(),
            self.title.trim(),
            self.work_location.trim(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hex::encode(&hasher.finalize()[..16])
    }
}
