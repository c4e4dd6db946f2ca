use std::net::SocketAddr;

use anyhow::Context;
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Address for the Prometheus scrape listener. Unset means no exporter.
pub const ENV_METRICS_ADDR: &str = "METRICS_ADDR";

/// Register descriptions for every counter the bot emits.
pub fn describe() {
    describe_counter!("messages_observed_total", "Inbound messages seen by the engine");
    describe_counter!("replies_total", "Replies chosen, labelled by rule");
    describe_counter!("enforcements_total", "Actors removed for scam bursts");
    describe_counter!("rate_limited_total", "Replies suppressed, labelled by reason");
    describe_counter!("state_save_failures_total", "Failed snapshot writes, labelled by slot");
    describe_counter!("delivery_failures_total", "Platform calls that failed");
    describe_gauge!("tracked_actors", "Actor profiles held in state");
}

pub fn set_tracked_actors(n: usize) {
    gauge!("tracked_actors").set(n as f64);
}

/// Install the Prometheus recorder with its own HTTP listener when
/// `METRICS_ADDR` is set. Must run inside a tokio runtime.
pub fn init_from_env() -> anyhow::Result<Option<SocketAddr>> {
    let Ok(raw) = std::env::var(ENV_METRICS_ADDR) else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .trim()
        .parse()
        .with_context(|| format!("{ENV_METRICS_ADDR}={raw} is not a socket address"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install exporter")?;
    describe();
    Ok(Some(addr))
}
