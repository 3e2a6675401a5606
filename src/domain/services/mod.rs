// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - 公告抽取（extraction_service）：第一遍，从详情页HTML抽取标题、正文、日期与附件
/// - 职位抽取（position_service）：第二遍，HTML表格、附件、LLM 的策略瀑布
/// - LLM服务（llm_service）：调用大语言模型抽取职位
/// - 去重发布（dedup_service）：内容哈希去重并写入汇聚端
/// - 字段规范化（position_normalizer）：学历、年龄、专业、户籍等字段的规范化
pub mod dedup_service;
pub mod extraction_service;
pub mod llm_service;
pub mod position_normalizer;
pub mod position_service;
