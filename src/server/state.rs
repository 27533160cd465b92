use std::time::Duration;

use crate::pipeline::Pipeline;
use crate::providers::Provider;
use crate::storage::LocalObjectStore;

pub(crate) struct ServerState<P: Provider> {
    pub(crate) pipeline: Pipeline<P>,
    /// Serves `/media`; absent when objects live elsewhere.
    pub(crate) media: Option<LocalObjectStore>,
    pub(crate) batch_concurrency: usize,
    pub(crate) run_timeout: Duration,
}
