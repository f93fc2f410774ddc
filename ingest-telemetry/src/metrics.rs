use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Port the Prometheus scrape endpoint listens on.
pub const METRICS_PORT: u16 = 9000;

/// Installs the global Prometheus recorder and serves `[::]:9000/metrics`.
///
/// Every metric carries a `namespace` label with the live namespace of the run, so runs of
/// several namespaces can share one Prometheus.
///
/// Must be called from within a Tokio runtime, the HTTP listener is spawned on it.
pub fn init_metrics(namespace: Option<&str>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new().with_http_listener(SocketAddr::new(
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        METRICS_PORT,
    ));

    if let Some(namespace) = namespace {
        builder = builder.add_global_label("namespace", namespace);
    }

    builder.install()?;

    Ok(())
}
