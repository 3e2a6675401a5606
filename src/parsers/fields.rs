// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::position::{Position, PositionSource};
use crate::domain::services::position_normalizer as norm;

/// 职位字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Department,
    DepartmentCode,
    Title,
    PositionCode,
    RecruitCount,
    WorkLocation,
    Education,
    Degree,
    Majors,
    PoliticalStatus,
    Age,
    WorkExperience,
    GrassrootsExperience,
    Hukou,
    Gender,
    FreshGraduate,
    OtherRequirements,
    Notes,
}

/// 表头关键字到字段，按序匹配（较长的关键字在前）
const FIELD_MAPPING: &[(&str, Field)] = &[
    ("招录机关代码", Field::DepartmentCode),
    ("部门代码", Field::DepartmentCode),
    ("单位代码", Field::DepartmentCode),
    ("招录机关", Field::Department),
    ("部门名称", Field::Department),
    ("用人单位", Field::Department),
    ("招录单位", Field::Department),
    ("招聘单位", Field::Department),
    ("单位名称", Field::Department),
    ("职位代码", Field::PositionCode),
    ("岗位代码", Field::PositionCode),
    ("职位编码", Field::PositionCode),
    ("岗位编码", Field::PositionCode),
    ("职位名称", Field::Title),
    ("岗位名称", Field::Title),
    ("招录职位", Field::Title),
    ("招聘岗位", Field::Title),
    ("招录人数", Field::RecruitCount),
    ("计划人数", Field::RecruitCount),
    ("录用人数", Field::RecruitCount),
    ("招聘人数", Field::RecruitCount),
    ("人数", Field::RecruitCount),
    ("基层工作经历", Field::GrassrootsExperience),
    ("基层工作最低年限", Field::GrassrootsExperience),
    ("工作经历", Field::WorkExperience),
    ("工作年限", Field::WorkExperience),
    ("学历", Field::Education),
    ("学位", Field::Degree),
    ("专业", Field::Majors),
    ("政治面貌", Field::PoliticalStatus),
    ("年龄", Field::Age),
    ("户籍", Field::Hukou),
    ("性别", Field::Gender),
    ("应届", Field::FreshGraduate),
    ("工作地点", Field::WorkLocation),
    ("工作地址", Field::WorkLocation),
    ("其他条件", Field::OtherRequirements),
    ("其他要求", Field::OtherRequirements),
    ("其它条件", Field::OtherRequirements),
    ("备注", Field::Notes),
    ("部门", Field::Department),
    ("职位", Field::Title),
    ("岗位", Field::Title),
];

/// 职位表的判定关键字，表头行至少命中3个
pub const HEADER_KEYWORDS: [&str; 6] = ["职位", "岗位", "部门", "学历", "专业", "人数"];

/// 是否为职位表的表头行
pub fn is_header_row(cells: &[String]) -> bool {
    let text = cells.join(" ");
    HEADER_KEYWORDS.iter().filter(|k| text.contains(*k)).count() >= 3
}

fn clean_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
}

/// 表头映射：先精确匹配，再双向包含匹配
pub fn map_headers(headers: &[String]) -> Vec<Option<Field>> {
    headers
        .iter()
        .map(|header| {
            let header = clean_header(header);
            if header.is_empty() {
                return None;
            }
            if let Some((_, field)) = FIELD_MAPPING.iter().find(|(key, _)| *key == header) {
                return Some(*field);
            }
            FIELD_MAPPING
                .iter()
                .find(|(key, _)| header.contains(key) || key.contains(header.as_str()))
                .map(|(_, field)| *field)
        })
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// 把单元格的值写入职位字段
pub fn apply_field(position: &mut Position, field: Field, value: &str) {
    let value = value.trim();
    match field {
        Field::Department => position.department = value.to_string(),
        Field::DepartmentCode => position.department_code = non_empty(value),
        Field::Title => position.title = value.to_string(),
        Field::PositionCode => position.position_code = non_empty(value),
        Field::RecruitCount => {
            if let Some(count) = norm::extract_number(value) {
                position.recruit_count = count;
            }
        }
        Field::WorkLocation => position.work_location = value.to_string(),
        Field::Education => position.education_min = norm::normalize_education(value),
        Field::Degree => {
            if !matches!(value, "无" | "不限" | "无要求") {
                position.degree_required = non_empty(value);
            }
        }
        Field::Majors => {
            if norm::is_unlimited_major(value) {
                position.major_unlimited = true;
                position.majors.clear();
            } else {
                position.majors = norm::split_majors(value);
            }
        }
        Field::PoliticalStatus => position.political_status = norm::normalize_political_status(value),
        Field::Age => {
            let (min, max) = norm::parse_age_range(value);
            position.age_min = min;
            position.age_max = max;
        }
        Field::WorkExperience => position.work_exp_min = norm::parse_years(value),
        Field::GrassrootsExperience => position.grassroots_exp_min = norm::parse_years(value),
        Field::Hukou => {
            let (required, provinces) = norm::detect_hukou(&format!("户籍{}", value));
            position.hukou_required = required;
            position.hukou_provinces = provinces;
        }
        Field::Gender => position.gender = norm::normalize_gender(value),
        Field::FreshGraduate => {
            position.fresh_grad_only =
                matches!(value, "是" | "限应届" | "仅限应届") || norm::detect_fresh_grad_only(value)
        }
        Field::OtherRequirements => position.other_requirements = non_empty(value),
        Field::Notes => position.notes = non_empty(value),
    }
}

/// 把一行数据转换为职位
///
/// 行内没有数据或缺少职位名称时返回 `None`
pub fn row_to_position(
    row: &[String],
    mapped: &[Option<Field>],
    source: PositionSource,
) -> Option<Position> {
    let mut position = Position::draft(source);
    let mut has_data = false;
    for (value, field) in row.iter().zip(mapped) {
        let Some(field) = field else { continue };
        if value.trim().is_empty() {
            continue;
        }
        has_data = true;
        apply_field(&mut position, *field, value);
    }
    if !has_data || position.title.trim().is_empty() {
        return None;
    }
    norm::normalize_position(&mut position);
    Some(position)
}

/// 在网格中定位表头行并转换其后的数据行
///
/// 重复出现的表头行（跨页表格常见）会被跳过
pub fn rows_to_positions(rows: &[Vec<String>], source: PositionSource) -> Vec<Position> {
    let Some(header_idx) = rows.iter().position(|row| is_header_row(row)) else {
        return Vec::new();
    };
    let header = &rows[header_idx];
    let mapped = map_headers(header);
    if !mapped.contains(&Some(Field::Title)) {
        return Vec::new();
    }
    rows[header_idx + 1..]
        .iter()
        .filter(|row| !row.is_empty() && *row != header)
        .filter_map(|row| row_to_position(row, &mapped, source))
        .collect()
}
