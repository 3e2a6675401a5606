// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// 单次提交允许展开的最大页数
pub const MAX_FENBI_PAGES: u32 = 50;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct SourceJobRequest {
    pub source_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct AnnouncementJobRequest {
    pub announcement_id: Uuid,
}

/// 粉笔分页抓取请求
///
/// `page_start..=page_end` 每页展开为一个发现任务
#[derive(Debug, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_page_range"))]
pub struct FenbiCrawlRequest {
    #[serde(default = "all_code")]
    #[validate(length(min = 1, max = 32))]
    pub region_code: String,
    #[serde(default = "all_code")]
    #[validate(length(min = 1, max = 32))]
    pub exam_type_code: String,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    #[serde(default = "first_page")]
    #[validate(range(min = 1))]
    pub page_start: u32,
    #[serde(default = "first_page")]
    #[validate(range(min = 1))]
    pub page_end: u32,
}

fn all_code() -> String {
    "all".to_string()
}

fn first_page() -> u32 {
    1
}

fn validate_page_range(request: &FenbiCrawlRequest) -> Result<(), ValidationError> {
    if request.page_end < request.page_start {
        return Err(ValidationError::new("page_end_before_page_start"));
    }
    if request.page_end - request.page_start + 1 > MAX_FENBI_PAGES {
        return Err(ValidationError::new("page_range_too_large"));
    }
    Ok(())
}

/// 提交成功的任务
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JobAccepted {
    pub task_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: u32, end: u32) -> FenbiCrawlRequest {
        FenbiCrawlRequest {
            region_code: "shaanxi".to_string(),
            exam_type_code: "all".to_string(),
            year: 2025,
            page_start: start,
            page_end: end,
        }
    }

    #[test]
    fn test_page_range_validation() {
        assert!(request(1, 3).validate().is_ok());
        assert!(request(3, 1).validate().is_err());
        assert!(request(0, 1).validate().is_err());
        assert!(request(1, MAX_FENBI_PAGES + 1).validate().is_err());
    }

    #[test]
    fn test_defaults_from_json() {
        let request: FenbiCrawlRequest = serde_json::from_str(r#"{"year": 2025}"#).unwrap();
        assert_eq!(request.region_code, "all");
        assert_eq!((request.page_start, request.page_end), (1, 1));
    }
}
