// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 任务提交服务与请求DTO
pub mod application;

/// 认证模块
///
/// 粉笔账号登录、公众平台扫码登录与会话Cookie管理
pub mod auth;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 公告、职位、任务等实体，以及去重和抽取服务与仓库接口
pub mod domain;

/// 引擎模块
///
/// 分层抓取引擎：HTTP、TLS指纹客户端与无头浏览器
pub mod engines;

/// 基础设施模块
///
/// 数据库、附件存储与指标导出
pub mod infrastructure;

/// 解析器模块
///
/// 从HTML表格、Excel、Word、PDF与自由文本中解析职位
pub mod parsers;

/// 表示层模块
///
/// 任务提交、任务查询与登录接口的路由和处理器
pub mod presentation;

/// 队列模块
///
/// 按域名限流的任务调度与重试
pub mod queue;

/// 数据源适配器模块
///
/// 列表页、RSS、粉笔、微信文章与公众平台
pub mod sources;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 执行抓取任务的工作器与流水线
pub mod workers;
