use thiserror::Error;

/// Possible errors from the [`super`] module.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The Prometheus [`prometheus::Registry`] could not be created.
    #[error("Unable to create a Prometheus Metrics Registry: {0}")]
    Registry(#[source] prometheus::Error),

    /// A metric could not be created or registered.
    #[error("Failed to create metric '{0}': {1}")]
    Metric(&'static str, #[source] prometheus::Error),
}

pub type MetricsResult<T> = Result<T, MetricsError>;
