// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 提供任务调度与域名级限流
/// 负责任务的排队、派发、重试与取消
pub mod limiter;
pub mod scheduler;
