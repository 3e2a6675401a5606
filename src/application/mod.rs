// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 任务提交入口与对外数据传输对象
pub mod dto;
pub mod job_service;
