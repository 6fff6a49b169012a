use thiserror::Error;

/// Errors reported by [`RenderPipeline`](super::RenderPipeline) operations.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Mismatched decoder, or a decoder or configuration that cannot be used.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A GPU object could not be allocated.
    #[error("GPU resource allocation failed")]
    ResourceExhausted(#[source] anyhow::Error),

    /// The operation is not allowed in the current pipeline state.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    /// The decoder side misbehaved (queue failure, frame without metadata).
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// A compositor failed to initialize.
    #[error("{stage} compositor failed")]
    Compositor {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
