// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::RepositoryError;
use std::fmt::Display;
use std::str::FromStr;

/// 仓库实现模块
///
/// 基于 sea-orm 的领域仓库接口实现：
/// 汇聚端、数据源、会话与任务快照
pub mod session_repo_impl;
pub mod sink_impl;
pub mod source_repo_impl;
pub mod task_repo_impl;

/// 解析以字符串保存的枚举列
pub(crate) fn parse_column<T>(value: &str, column: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| RepositoryError::Serialization(format!("{}: {}", column, e)))
}

#[cfg(test)]
pub(crate) mod test_db {
    use crate::config::settings::DatabaseSettings;
    use crate::infrastructure::database::connection::connect_and_migrate;
    use sea_orm::DatabaseConnection;
    use std::sync::Arc;

    /// 已迁移的内存 sqlite
    pub async fn memory() -> Arc<DatabaseConnection> {
        let settings = DatabaseSettings {
            url: "sqlite::memory:".to_string(),
            max_connections: None,
            min_connections: None,
            connect_timeout: None,
            idle_timeout: None,
        };
        Arc::new(connect_and_migrate(&settings).await.unwrap())
    }
}
