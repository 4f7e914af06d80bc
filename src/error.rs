use crate::recorder::MetricsRecorder;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error(transparent)]
    Reporter(#[from] ReporterError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to set MetricsRecorder: {0}")]
    Recorder(#[from] metrics::SetRecorderError<MetricsRecorder>),
}

#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("couldnt resolve reporter address {0}")]
    AddressResolution(String),
    #[error("socket error in metrics reporter {0}")]
    Socket(#[from] std::io::Error),
    #[error("couldnt encode measure: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("metric {0} is already registered")]
    DuplicateMetric(String),
    #[error("metric {name} is registered as a {existing}, not a {requested}")]
    KindMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
}
