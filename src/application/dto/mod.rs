// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据传输对象模块
///
/// 定义任务提交、任务状态和运营接口的请求与响应结构
pub mod auth_request;
pub mod job_request;
pub mod task_status;
