// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::position::Position;
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static AGE_MAX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(?:周岁|岁)\s*(?:以下|及以下|或以下)").unwrap());
static AGE_NOT_EXCEED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"不超过\s*(\d+)\s*(?:周岁|岁)").unwrap());
static AGE_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(?:周岁|岁)?\s*[-－—至到~～]\s*(\d+)\s*(?:周岁|岁)").unwrap());
static AGE_MIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(?:周岁|岁)\s*(?:以上|及以上|或以上)").unwrap());
static YEARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*年").unwrap());
static CN_YEARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([一二两三四五六七八九十]+)\s*年").unwrap());
static PROVINCE_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\p{Han}]{2,3})(?:省|自治区)").unwrap());
static CITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\p{Han}]{2,5}?)(?:市|州|盟)").unwrap());
static DISTRICT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\p{Han}]{2,5}?(?:区|县))").unwrap());

/// 省级行政区简称
pub const PROVINCES: [&str; 31] = [
    "北京", "天津", "河北", "山西", "内蒙古", "辽宁", "吉林", "黑龙江", "上海", "江苏", "浙江",
    "安徽", "福建", "江西", "山东", "河南", "湖北", "湖南", "广东", "广西", "海南", "重庆",
    "四川", "贵州", "云南", "西藏", "陕西", "甘肃", "青海", "宁夏", "新疆",
];

const MUNICIPALITIES: [&str; 4] = ["北京", "上海", "天津", "重庆"];

const UNLIMITED_MAJOR_TOKENS: [&str; 7] = [
    "不限",
    "专业不限",
    "不限专业",
    "无限制",
    "无专业限制",
    "所有专业",
    "各专业",
];

/// 学历关键字到规范名称，按序匹配
const EDUCATION_LEVELS: [(&str, &str); 10] = [
    ("博士", "博士研究生"),
    ("硕士", "硕士研究生"),
    ("研究生", "硕士研究生"),
    ("本科", "本科"),
    ("大专", "大专"),
    ("专科", "大专"),
    ("中专", "中专"),
    ("高中", "高中"),
    ("不限", "不限"),
    ("无要求", "不限"),
];

const POLITICAL_STATUS: [(&str, &str); 9] = [
    ("中共党员或共青团员", "中共党员或共青团员"),
    ("党员或团员", "中共党员或共青团员"),
    ("中共党员", "中共党员"),
    ("共产党员", "中共党员"),
    ("预备党员", "中共党员"),
    ("党员", "中共党员"),
    ("共青团员", "共青团员"),
    ("团员", "共青团员"),
    ("群众", "群众"),
];

const FRESH_GRAD_ONLY: [&str; 7] = [
    "仅限应届",
    "限应届生",
    "应届毕业生",
    "仅面向应届",
    "只招应届",
    "应届高校毕业生",
    "普通高校应届毕业生",
];

const FRESH_GRAD_OPEN: [&str; 5] = [
    "应届、往届",
    "应届或往届",
    "不限应届",
    "应届生及往届",
    "往届或应届",
];

const HUKOU_OPEN: [&str; 4] = ["不限户籍", "户籍不限", "无户籍要求", "户籍无限制"];

/// 提取文本中的第一个整数
pub fn extract_number(text: &str) -> Option<i32> {
    NUMBER_RE.find(text).and_then(|m| m.as_str().parse().ok())
}

/// 专业是否不限
pub fn is_unlimited_major(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && UNLIMITED_MAJOR_TOKENS.iter().any(|t| text.contains(t))
}

/// 拆分专业列表，分隔符 `、 , ; / ， ；`，去重并保持顺序
pub fn split_majors(text: &str) -> Vec<String> {
    let mut majors: Vec<String> = Vec::new();
    for part in text.split(['、', ',', ';', '/', '，', '；']) {
        let part = part.trim().trim_end_matches(['。', '.']).trim();
        if !part.is_empty() && !majors.iter().any(|m| m == part) {
            majors.push(part.to_string());
        }
    }
    majors
}

/// 解析年龄要求
///
/// 支持 `35周岁以下`、`不超过35周岁`、`18-35周岁`、`18周岁以上`，
/// 无法识别的边界返回 `None`
pub fn parse_age_range(text: &str) -> (Option<i32>, Option<i32>) {
    if text.trim().is_empty() || text.contains("不限") {
        return (None, None);
    }
    let capture = |re: &Regex, idx: usize| {
        re.captures(text)
            .and_then(|c| c.get(idx))
            .and_then(|m| m.as_str().parse::<i32>().ok())
    };

    if let (Some(min), Some(max)) = (capture(&AGE_RANGE_RE, 1), capture(&AGE_RANGE_RE, 2)) {
        return (Some(min), Some(max));
    }
    let max = capture(&AGE_MAX_RE, 1).or_else(|| capture(&AGE_NOT_EXCEED_RE, 1));
    let min = capture(&AGE_MIN_RE, 1);
    (min, max)
}

fn chinese_numeral(text: &str) -> Option<i32> {
    let digit = |c: char| match c {
        '一' => Some(1),
        '二' | '两' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    };
    let chars: Vec<char> = text.chars().collect();
    match chars.as_slice() {
        [c] if *c == '十' => Some(10),
        [c] => digit(*c),
        ['十', u] => Some(10 + digit(*u)?),
        [t, '十'] => Some(digit(*t)? * 10),
        [t, '十', u] => Some(digit(*t)? * 10 + digit(*u)?),
        _ => None,
    }
}

/// 解析工作年限要求（阿拉伯数字或中文数字），不限时返回 `None`
pub fn parse_years(text: &str) -> Option<i32> {
    if text.trim().is_empty() || ["不限", "无要求", "无限制"].iter().any(|t| text.contains(t)) {
        return None;
    }
    if let Some(years) = YEARS_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(years);
    }
    CN_YEARS_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| chinese_numeral(m.as_str()))
}

/// 学历规范化：博士研究生/硕士研究生/本科/大专/中专/高中/不限
pub fn normalize_education(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let level = EDUCATION_LEVELS
        .iter()
        .find(|(key, _)| text.contains(key))
        .map(|(_, level)| *level)
        .unwrap_or(text);
    Some(level.to_string())
}

/// 政治面貌规范化，不限时返回 `None`
pub fn normalize_political_status(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    POLITICAL_STATUS
        .iter()
        .find(|(key, _)| text.contains(key))
        .map(|(_, status)| status.to_string())
}

/// 性别要求规范化，不限时返回 `None`
pub fn normalize_gender(text: &str) -> Option<String> {
    let text = text.trim();
    let male = text.contains('男');
    let female = text.contains('女');
    match (male, female) {
        (true, false) => Some("男".to_string()),
        (false, true) => Some("女".to_string()),
        _ => None,
    }
}

/// 从自由文本的条件描述中识别性别限制
pub fn detect_gender(conditions: &str) -> Option<String> {
    let male = ["仅限男性", "限男性", "限男", "男性"]
        .iter()
        .any(|k| conditions.contains(k));
    let female = ["仅限女性", "限女性", "限女", "女性"]
        .iter()
        .any(|k| conditions.contains(k));
    match (male, female) {
        (true, false) if !conditions.contains('女') => Some("男".to_string()),
        (false, true) if !conditions.contains('男') => Some("女".to_string()),
        _ => None,
    }
}

/// 是否仅限应届毕业生
pub fn detect_fresh_grad_only(conditions: &str) -> bool {
    if conditions.trim().is_empty() || FRESH_GRAD_OPEN.iter().any(|k| conditions.contains(k)) {
        return false;
    }
    FRESH_GRAD_ONLY.iter().any(|k| conditions.contains(k))
}

/// 户籍限制：是否限制以及限制的省份
pub fn detect_hukou(conditions: &str) -> (bool, Vec<String>) {
    if conditions.trim().is_empty() || HUKOU_OPEN.iter().any(|k| conditions.contains(k)) {
        return (false, Vec::new());
    }
    if !(conditions.contains("户籍") || conditions.contains("籍贯") || conditions.contains("生源")) {
        return (false, Vec::new());
    }
    if conditions.contains("不限") {
        return (false, Vec::new());
    }
    let provinces = PROVINCES
        .iter()
        .filter(|p| conditions.contains(*p))
        .map(|p| p.to_string())
        .collect();
    (true, provinces)
}

/// 从工作地点中提取省份
pub fn extract_province(location: &str) -> Option<String> {
    if location.trim().is_empty() {
        return None;
    }
    if let Some(city) = MUNICIPALITIES.iter().find(|c| location.contains(*c)) {
        return Some(city.to_string());
    }
    if let Some(province) = PROVINCES.iter().find(|p| location.contains(*p)) {
        return Some(province.to_string());
    }
    PROVINCE_SUFFIX_RE
        .captures(location)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// 从工作地点中提取城市；直辖市返回区县
pub fn extract_city(location: &str) -> Option<String> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    if let Some(city) = MUNICIPALITIES.iter().find(|c| location.starts_with(*c)) {
        let rest = location[city.len()..].trim_start_matches('市');
        return DISTRICT_RE
            .captures(rest)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
    }
    // 去掉省级前缀，避免“陕西省西安市”匹配成“陕西省西安”
    let mut rest = location;
    if let Some(province) = PROVINCES.iter().find(|p| rest.starts_with(*p)) {
        rest = &rest[province.len()..];
        for suffix in ["省", "壮族自治区", "回族自治区", "维吾尔自治区", "自治区"] {
            if let Some(stripped) = rest.strip_prefix(suffix) {
                rest = stripped;
                break;
            }
        }
    }
    CITY_RE
        .captures(rest)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// 补全派生字段
///
/// 省市取自工作地点；性别、应届、户籍在表格列缺失时从其他条件和备注中识别
pub fn normalize_position(position: &mut Position) {
    position.department = position.department.trim().to_string();
    position.title = position.title.trim().to_string();
    position.work_location = position.work_location.trim().to_string();

    if position.province.is_none() {
        position.province = extract_province(&position.work_location);
    }
    if position.city.is_none() {
        position.city = extract_city(&position.work_location);
    }

    let conditions = [
        position.other_requirements.as_deref().unwrap_or_default(),
        position.notes.as_deref().unwrap_or_default(),
    ]
    .join(" ");
    if conditions.trim().is_empty() {
        return;
    }
    if position.gender.is_none() {
        position.gender = detect_gender(&conditions);
    }
    if !position.fresh_grad_only {
        position.fresh_grad_only = detect_fresh_grad_only(&conditions);
    }
    if !position.hukou_required {
        let (required, provinces) = detect_hukou(&conditions);
        position.hukou_required = required;
        if position.hukou_provinces.is_empty() {
            position.hukou_provinces = provinces;
        }
    }
    if position.political_status.is_none() {
        position.political_status = normalize_political_status(&conditions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::position::PositionSource;

    #[test]
    fn test_split_majors() {
        assert_eq!(
            split_majors("法学、汉语言文学,新闻学；法学/经济学"),
            vec!["法学", "汉语言文学", "新闻学", "经济学"]
        );
        assert!(is_unlimited_major("专业不限"));
        assert!(!is_unlimited_major("计算机科学与技术"));
    }

    #[test]
    fn test_age_ranges() {
        assert_eq!(parse_age_range("35周岁以下"), (None, Some(35)));
        assert_eq!(parse_age_range("不超过30周岁"), (None, Some(30)));
        assert_eq!(parse_age_range("18-35周岁"), (Some(18), Some(35)));
        assert_eq!(parse_age_range("18周岁至40周岁"), (Some(18), Some(40)));
        assert_eq!(parse_age_range("25周岁以上"), (Some(25), None));
        assert_eq!(parse_age_range("不限"), (None, None));
    }

    #[test]
    fn test_years_with_chinese_numerals() {
        assert_eq!(parse_years("2年以上工作经历"), Some(2));
        assert_eq!(parse_years("具有两年以上基层工作经历"), Some(2));
        assert_eq!(parse_years("十年"), Some(10));
        assert_eq!(parse_years("不限"), None);
        assert_eq!(chinese_numeral("十二"), Some(12));
        assert_eq!(chinese_numeral("三十"), Some(30));
    }

    #[test]
    fn test_education_and_political_status() {
        assert_eq!(normalize_education("本科及以上").as_deref(), Some("本科"));
        assert_eq!(normalize_education("研究生").as_deref(), Some("硕士研究生"));
        assert_eq!(normalize_education("大学专科").as_deref(), Some("大专"));
        assert_eq!(normalize_education("博士").as_deref(), Some("博士研究生"));
        assert_eq!(normalize_education(""), None);
        assert_eq!(normalize_political_status("党员").as_deref(), Some("中共党员"));
        assert_eq!(normalize_political_status("不限"), None);
    }

    #[test]
    fn test_gender() {
        assert_eq!(normalize_gender("男").as_deref(), Some("男"));
        assert_eq!(normalize_gender("不限"), None);
        assert_eq!(normalize_gender("男女不限"), None);
        assert_eq!(detect_gender("适合男性，需经常值夜班").as_deref(), Some("男"));
        assert_eq!(detect_gender("男女不限"), None);
    }

    #[test]
    fn test_location() {
        assert_eq!(extract_province("陕西省西安市雁塔区").as_deref(), Some("陕西"));
        assert_eq!(extract_city("陕西省西安市雁塔区").as_deref(), Some("西安"));
        assert_eq!(extract_province("北京市海淀区").as_deref(), Some("北京"));
        assert_eq!(extract_city("北京市海淀区").as_deref(), Some("海淀区"));
        assert_eq!(extract_province(""), None);
    }

    #[test]
    fn test_conditions_detection() {
        assert!(detect_fresh_grad_only("限2025年普通高校应届毕业生"));
        assert!(!detect_fresh_grad_only("应届或往届毕业生均可"));
        assert_eq!(detect_hukou("限陕西户籍"), (true, vec!["陕西".to_string()]));
        assert_eq!(detect_hukou("户籍不限"), (false, vec![]));
    }

    #[test]
    fn test_normalize_position_fills_derived_fields() {
        let mut p = Position::draft(PositionSource::HtmlTable);
        p.title = " 科员 ".to_string();
        p.work_location = "陕西省宝鸡市".to_string();
        p.other_requirements = Some("限陕西生源，仅限应届毕业生，限男性".to_string());
        normalize_position(&mut p);
        assert_eq!(p.title, "科员");
        assert_eq!(p.province.as_deref(), Some("陕西"));
        assert_eq!(p.city.as_deref(), Some("宝鸡"));
        assert!(p.fresh_grad_only);
        assert!(p.hukou_required);
        assert_eq!(p.hukou_provinces, vec!["陕西".to_string()]);
        assert_eq!(p.gender.as_deref(), Some("男"));
    }
}
