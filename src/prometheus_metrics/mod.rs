mod errors;
mod sink;

use std::collections::HashMap;

use prometheus::Registry;

pub use errors::{MetricsError, MetricsResult};
pub use sink::MetricSink;

/// Namespace of the Consumer Group and Broker offset metrics.
pub const NAMESPACE: &str = "kafka";

/// Namespace of the metrics describing the exporter itself.
pub const EXPORTER_NAMESPACE: &str = "kafka_lag_exporter";

pub const LABEL_CLUSTER: &str = "cluster";
pub const LABEL_CONSUMER_GROUP: &str = "consumergroup";
pub const LABEL_TOPIC: &str = "topic";
pub const LABEL_PARTITION: &str = "partition";
pub const LABEL_SOURCE: &str = "source";

/// Creates the [`Registry`] that holds every exported metric.
///
/// All metrics gathered from it carry the constant label [`LABEL_CLUSTER`].
pub fn init(cluster_name: String) -> MetricsResult<Registry> {
    let prom_def_labels = HashMap::from([(LABEL_CLUSTER.to_string(), cluster_name)]);

    info!("Prometheus Metrics default labels:\n{:#?}", prom_def_labels);

    Registry::new_custom(None, Some(prom_def_labels)).map_err(MetricsError::Registry)
}
