// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 粉笔地区与考试类型字典
//!
//! 文本代码 ↔ 数字ID 的两张不可变映射表，构建时固定，不从持久化数据推导。

use super::SourceError;

/// (代码, 粉笔数字ID, 中文名)
pub static REGIONS: &[(&str, &str, &str)] = &[
    ("national", "4012", "国家级机构"),
    ("anhui", "1", "安徽"),
    ("beijing", "159", "北京"),
    ("chongqing", "180", "重庆"),
    ("fujian", "223", "福建"),
    ("guangdong", "336", "广东"),
    ("gansu", "557", "甘肃"),
    ("guangxi", "683", "广西"),
    ("guizhou", "836", "贵州"),
    ("hebei", "947", "河北"),
    ("hubei", "1157", "湖北"),
    ("heilongjiang", "1307", "黑龙江"),
    ("henan", "1480", "河南"),
    ("hainan", "1694", "海南"),
    ("hunan", "1723", "湖南"),
    ("jilin", "1887", "吉林"),
    ("jiangsu", "1978", "江苏"),
    ("jiangxi", "2130", "江西"),
    ("liaoning", "2267", "辽宁"),
    ("neimenggu", "2416", "内蒙古"),
    ("ningxia", "2551", "宁夏"),
    ("qinghai", "2589", "青海"),
    ("sichuan", "2650", "四川"),
    ("shandong", "2894", "山东"),
    ("shanghai", "3091", "上海"),
    ("shanxi", "3114", "山西"),
    ("shaanxi", "3268", "陕西"),
    ("tianjin", "3406", "天津"),
    ("xinjiang", "3428", "新疆"),
    ("xizang", "3559", "西藏"),
    ("yunnan", "3648", "云南"),
    ("zhejiang", "3818", "浙江"),
];

/// (代码, 粉笔数字ID, 中文名)
pub static EXAM_TYPES: &[(&str, &str, &str)] = &[
    ("shengkao", "1", "省考"),
    ("guokao", "2", "国考"),
    ("junduiwenzhi", "3", "军队文职"),
    ("xuandiao", "4", "选调"),
    ("shiyedanwei", "5", "事业单位"),
    ("daxueshengcunguan", "6", "大学生村官"),
    ("sanzhiyifu", "7", "三支一扶"),
    ("lianxuan", "8", "遴选"),
    ("zhaojing", "9", "招警"),
    ("guoqi", "10", "国企"),
    ("jiaoshi", "11", "教师"),
    ("yiliao", "12", "医疗"),
    ("yinhang", "13", "银行"),
    ("qita", "14", "其他"),
    ("nongxinshe", "15", "农信社"),
    ("paiqian", "16", "派遣/临时/购买服务等"),
    ("liankao", "17", "联考/统考"),
    ("shequ", "18", "社区工作者"),
    ("gaoxiao", "19", "高校"),
    ("gongwuyuandanzhao", "20", "公务员单招"),
];

fn is_all(code: &str) -> bool {
    code.is_empty() || code.eq_ignore_ascii_case("all")
}

fn code_to_id(
    table: &'static [(&'static str, &'static str, &'static str)],
    code: &str,
) -> Result<Option<&'static str>, SourceError> {
    let code = code.trim();
    if is_all(code) {
        return Ok(None);
    }
    if let Some((_, id, _)) = table.iter().find(|(c, _, _)| *c == code) {
        return Ok(Some(id));
    }
    // 直接传入数字ID
    if let Some((_, id, _)) = table.iter().find(|(_, id, _)| *id == code) {
        return Ok(Some(id));
    }
    Err(SourceError::UnknownCode(code.to_string()))
}

/// 地区代码 → 粉笔 districtId；`all` 或空返回 `None`
pub fn region_id(code: &str) -> Result<Option<&'static str>, SourceError> {
    code_to_id(REGIONS, code)
}

/// 考试类型代码 → 粉笔 examType；`all` 或空返回 `None`
pub fn exam_type_id(code: &str) -> Result<Option<&'static str>, SourceError> {
    code_to_id(EXAM_TYPES, code)
}

/// 地区标签ID → 地区代码，未知ID原样返回
pub fn region_code_by_id(id: &str) -> String {
    REGIONS
        .iter()
        .find(|(_, i, _)| *i == id)
        .map(|(c, _, _)| c.to_string())
        .unwrap_or_else(|| id.to_string())
}

/// 考试类型标签 → 代码，先按中文名再按数字ID匹配，未知原样返回
pub fn exam_type_code_by_tag(name: &str, id: Option<&str>) -> String {
    EXAM_TYPES
        .iter()
        .find(|(_, _, n)| *n == name)
        .or_else(|| id.and_then(|id| EXAM_TYPES.iter().find(|(_, i, _)| *i == id)))
        .map(|(c, _, _)| c.to_string())
        .unwrap_or_else(|| name.to_string())
}

pub fn region_name(code: &str) -> Option<&'static str> {
    REGIONS.iter().find(|(c, _, _)| *c == code).map(|(_, _, n)| *n)
}

pub fn exam_type_name(code: &str) -> Option<&'static str> {
    EXAM_TYPES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, _, n)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_dictionary_sizes_and_uniqueness() {
        assert_eq!(REGIONS.len(), 32);
        assert_eq!(EXAM_TYPES.len(), 20);
        for table in [REGIONS, EXAM_TYPES] {
            let codes: HashSet<_> = table.iter().map(|(c, _, _)| c).collect();
            let ids: HashSet<_> = table.iter().map(|(_, i, _)| i).collect();
            assert_eq!(codes.len(), table.len());
            assert_eq!(ids.len(), table.len());
        }
    }

    #[test]
    fn test_forward_and_reverse_mapping() {
        assert_eq!(region_id("shaanxi").unwrap(), Some("3268"));
        assert_eq!(region_id("shanxi").unwrap(), Some("3114"));
        assert_eq!(region_id("all").unwrap(), None);
        assert_eq!(region_id("3268").unwrap(), Some("3268"));
        assert!(region_id("atlantis").is_err());
        assert_eq!(exam_type_id("xuandiao").unwrap(), Some("4"));

        assert_eq!(region_code_by_id("3268"), "shaanxi");
        assert_eq!(region_code_by_id("99999"), "99999");
        assert_eq!(exam_type_code_by_tag("选调", None), "xuandiao");
        assert_eq!(exam_type_code_by_tag("未知", Some("2")), "guokao");
        assert_eq!(region_name("zhejiang"), Some("浙江"));
        assert_eq!(exam_type_name("shengkao"), Some("省考"));
    }
}
