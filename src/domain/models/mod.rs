// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 数据源（source）：运营人员配置的监控来源
/// - 候选文章（article）：列表页或订阅源发现但尚未抓取详情的链接
/// - 公告（announcement）：一条招录公告的规范化记录及其附件
/// - 职位（position）：从公告或附件中抽取的结构化职位
/// - 抓取任务（crawl_task）：调度器的执行单元
/// - 会话（session）：各提供方的登录状态与凭据
/// - 抓取事件（crawl_event）：写入汇聚端的审计记录
/// - 选择器目录（selector_catalog）：启发式选择器配置数据
pub mod announcement;
pub mod article;
pub mod crawl_event;
pub mod crawl_task;
pub mod position;
pub mod selector_catalog;
pub mod session;
pub mod source;

/// 领域错误类型
///
/// 表示在领域层可能发生的各种错误情况，包括状态转换错误与校验失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// 验证错误，当输入数据不符合领域规则时发生
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 无法识别的枚举值
    #[error("Unknown value: {0}")]
    UnknownValue(String),
}
