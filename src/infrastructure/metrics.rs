// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::MetricsSettings;
use anyhow::Context;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 初始化指标系统
///
/// 未启用时不安装记录器，`counter!` 等调用为空操作
pub fn init_metrics(settings: &MetricsSettings) -> anyhow::Result<()> {
    if !settings.enabled {
        return Ok(());
    }
    let addr: SocketAddr = settings
        .listen
        .parse()
        .with_context(|| format!("invalid metrics address {}", settings.listen))?;

    // 端口被占用时只告警，不影响抓取
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!("Failed to install Prometheus recorder: {}", e);
        return Ok(());
    }
    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "crawl_tasks_total",
        "Crawl tasks reaching a scheduler decision, by kind and state"
    );
    describe_counter!(
        "crawl_tasks_submitted_total",
        "Tasks submitted through the job service, by kind"
    );
    describe_counter!(
        "fetch_requests_total",
        "Fetch attempts per tier and outcome"
    );
    describe_counter!(
        "announcements_emitted_total",
        "Announcements passed to the sink, by dedup outcome"
    );
    describe_counter!(
        "positions_extracted_total",
        "Positions extracted, by extraction source"
    );
    describe_counter!(
        "circuit_breaker_rejected_total",
        "Requests rejected by an open fetch tier circuit breaker"
    );
    describe_gauge!(
        "circuit_breaker_status",
        "Fetch tier circuit breaker state (0=Closed, 0.5=HalfOpen, 1=Open)"
    );
}
