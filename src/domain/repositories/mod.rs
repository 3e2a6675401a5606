// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::DbErr;
use thiserror::Error;

/// 仓库接口模块
///
/// 该模块定义了领域层的仓库接口，具体实现由基础设施层提供
/// （sea-orm 数据库实现与内存实现）。
///
/// 包含的仓库接口：
/// - 汇聚端（sink）：公告与职位的事务性写入、抓取事件记录
/// - 数据源仓库（source_repository）：读取运营配置的数据源
/// - 会话仓库（session_repository）：提供方会话与登录凭据
/// - 任务仓库（task_repository）：任务状态持久化
/// - 存储仓库（storage_repository）：附件文件的临时存储
pub mod session_repository;
pub mod sink;
pub mod source_repository;
pub mod storage_repository;
pub mod task_repository;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 记录未找到
    #[error("Record not found")]
    NotFound,
    /// 字段序列化失败
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(e: serde_json::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}
