//! Build requests.

use std::sync::Arc;

use kiln_backend::KernelIr;
use kiln_config::BuildConfig;

/// One kernel to build for one backend configuration.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Display label, usually `<kernel>@<profile>`.
    pub label: String,
    /// The lowered kernel. Shared between the requests of a sweep.
    pub ir: Arc<KernelIr>,
    /// Backend configuration.
    pub config: BuildConfig,
    /// Rank sweep this request belongs to. Requests of one sweep are built
    /// one after another, in request order.
    pub sweep: Option<String>,
}

impl BuildRequest {
    /// Creates a request labelled `<kernel>@<backend>`.
    pub fn new(ir: Arc<KernelIr>, config: BuildConfig) -> Self {
        let label = format!("{}@{}", ir.name(), config.backend);
        Self {
            label,
            ir,
            config,
            sweep: None,
        }
    }

    /// Replaces the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Expands a distributed request into one request per rank count
    /// `1..=max_ranks`, in increasing order.
    pub fn rank_sweep(ir: Arc<KernelIr>, config: &BuildConfig, max_ranks: u32) -> Vec<Self> {
        let sweep = format!("{}@{}", ir.name(), config.backend);
        (1..=max_ranks)
            .map(|ranks| {
                let mut config = config.clone();
                config.ranks = Some(ranks);
                let label = format!("{}@{}[ranks={ranks}]", ir.name(), config.backend);
                Self {
                    label,
                    ir: Arc::clone(&ir),
                    config,
                    sweep: Some(sweep.clone()),
                }
            })
            .collect()
    }
}
