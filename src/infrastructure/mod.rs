// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 领域层抽象的技术实现：
/// - 数据库（database）：sea-orm 连接、迁移与实体映射
/// - 仓库实现（repositories）：汇聚端、数据源、会话、任务快照的数据库实现
/// - 内存存储（memory_store）：全部仓库特质的内存实现，用于测试和无数据库运行
/// - 附件存储（storage）：本地文件与内存存储
/// - 指标（metrics）：Prometheus 导出
pub mod database;
pub mod memory_store;
pub mod metrics;
pub mod repositories;
pub mod storage;
