// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// HTTP处理器模块
///
/// 任务提交与查询、运营登录接口
pub mod auth_handler;
pub mod job_handler;
