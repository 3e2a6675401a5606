// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::fields::{is_header_row, rows_to_positions};
use crate::domain::models::position::{Position, PositionSource};
use crate::domain::services::position_normalizer as norm;
use once_cell::sync::Lazy;
use regex::Regex;

/// 自由文本职位的基础置信度
pub const FREE_TEXT_CONFIDENCE: u8 = 70;

static DEPARTMENT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^招录机关[：:]\s*(.+)$",
        r"^部门名称[：:]\s*(.+)$",
        r"^用人单位[：:]\s*(.+)$",
        r"^(.{2,30}(?:局|部|厅|委|办|院|署|中心))$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TITLE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^职位名称[：:]\s*(.+)$",
        r"^岗位名称[：:]\s*(.+)$",
        r"^(.{2,30}(?:岗|员|师|官))$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RECRUIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*(?:人|名)").unwrap());
static MAJOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"专业(?:要求)?[：:]\s*(.+?)(?:[，,。；;]|$)").unwrap());
static AGE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"年龄(?:要求)?[：:]\s*(.+)$").unwrap());
static LOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"工作地点[：:]\s*(.+?)(?:[，,。；;]|$)").unwrap());
static COLUMN_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t+|\s{2,}").unwrap());

const EDUCATION_TOKENS: [&str; 5] = ["博士", "硕士", "研究生", "本科", "大专"];

fn first_capture(patterns: &[Regex], line: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn fill_from_line(position: &mut Position, line: &str) {
    if position.education_min.is_none() {
        if let Some(token) = EDUCATION_TOKENS.iter().find(|t| line.contains(*t)) {
            position.education_min = norm::normalize_education(token);
        }
    }
    if position.recruit_count == 0 {
        if let Some(count) = RECRUIT_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            position.recruit_count = count;
        }
    }
    if let Some(major) = MAJOR_RE.captures(line).and_then(|c| c.get(1)) {
        let major = major.as_str().trim();
        if norm::is_unlimited_major(major) {
            position.major_unlimited = true;
        } else if position.majors.is_empty() {
            position.majors = norm::split_majors(major);
        }
    }
    if let Some(age) = AGE_LINE_RE.captures(line).and_then(|c| c.get(1)) {
        let (min, max) = norm::parse_age_range(age.as_str());
        position.age_min = position.age_min.or(min);
        position.age_max = position.age_max.or(max);
    }
    if position.work_location.is_empty() {
        if let Some(location) = LOCATION_RE.captures(line).and_then(|c| c.get(1)) {
            position.work_location = location.as_str().trim().to_string();
        }
    }
    if position.political_status.is_none() {
        for token in ["党员", "团员", "群众"] {
            if line.contains(token) {
                position.political_status = norm::normalize_political_status(token);
                break;
            }
        }
    }
    if line.contains("应届") || line.contains("户籍") || line.contains("生源") {
        let other = position.other_requirements.get_or_insert_with(String::new);
        if !other.is_empty() {
            other.push('；');
        }
        other.push_str(line);
    }
}

fn finish(current: Option<Position>, positions: &mut Vec<Position>) {
    if let Some(mut position) = current {
        if !position.title.is_empty() {
            norm::normalize_position(&mut position);
            positions.push(position);
        }
    }
}

/// 按“部门行 → 职位行 → 条件行”的版式解析自由文本中的职位
pub fn parse_text_positions(text: &str, source: PositionSource) -> Vec<Position> {
    let mut positions = Vec::new();
    let mut current: Option<Position> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(department) = first_capture(&DEPARTMENT_RES, line) {
            finish(current.take(), &mut positions);
            let mut position = Position::draft(source);
            position.department = department;
            position.confidence = FREE_TEXT_CONFIDENCE;
            current = Some(position);
            continue;
        }
        let Some(position) = current.as_mut() else {
            continue;
        };
        if let Some(title) = first_capture(&TITLE_RES, line) {
            // 同一部门下出现第二个职位
            if !position.title.is_empty() {
                let department = position.department.clone();
                finish(current.take(), &mut positions);
                let mut next = Position::draft(source);
                next.department = department;
                next.title = title;
                next.confidence = FREE_TEXT_CONFIDENCE;
                current = Some(next);
            } else {
                position.title = title;
            }
            continue;
        }
        fill_from_line(position, line);
    }
    finish(current, &mut positions);
    positions
}

/// 按制表符或连续空格切分的文本行网格
pub fn text_rows(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            COLUMN_SPLIT_RE
                .split(line)
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .collect()
}

/// 先识别文本中的表格版式，失败时按自由文本解析
pub fn parse_text(text: &str, source: PositionSource) -> Vec<Position> {
    let rows = text_rows(text);
    if rows.iter().any(|row| row.len() >= 3 && is_header_row(row)) {
        let positions = rows_to_positions(&rows, source);
        if !positions.is_empty() {
            return positions;
        }
    }
    parse_text_positions(text, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_department_position_blocks() {
        let text = "\
            附件1\n\
            西安市统计局\n\
            综合管理岗\n\
            招录2人，本科及以上学历\n\
            专业：统计学、经济学。\n\
            年龄：35周岁以下\n\
            数据分析员\n\
            招录1人\n\
            招录机关：宝鸡市财政局\n\
            职位名称：会计\n\
            专业：不限\n\
            限陕西户籍\n";
        let positions = parse_text_positions(text, PositionSource::Pdf);
        assert_eq!(positions.len(), 3);

        assert_eq!(positions[0].department, "西安市统计局");
        assert_eq!(positions[0].title, "综合管理岗");
        assert_eq!(positions[0].recruit_count, 2);
        assert_eq!(positions[0].education_min.as_deref(), Some("本科"));
        assert_eq!(positions[0].majors, vec!["统计学", "经济学"]);
        assert_eq!(positions[0].age_max, Some(35));
        assert_eq!(positions[0].confidence, FREE_TEXT_CONFIDENCE);

        assert_eq!(positions[1].department, "西安市统计局");
        assert_eq!(positions[1].title, "数据分析员");

        assert_eq!(positions[2].department, "宝鸡市财政局");
        assert!(positions[2].major_unlimited);
        assert!(positions[2].hukou_required);
    }

    #[test]
    fn test_text_table_layout() {
        let text = "2025年职位表\n\
                    部门名称    职位名称    招录人数    学历    专业\n\
                    西安市统计局    科员    2    本科    统计学\n";
        let positions = parse_text(text, PositionSource::Pdf);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].title, "科员");
        assert_eq!(positions[0].recruit_count, 2);
    }

    #[test]
    fn test_lines_before_department_ignored() {
        assert!(parse_text_positions("综合管理岗\n招录2人", PositionSource::Word).is_empty());
    }
}
