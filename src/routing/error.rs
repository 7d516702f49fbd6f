use thiserror::Error;

/// Errors surfaced by backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The model is known but no healthy, untried server remains
    #[error("no healthy server available for model '{model}'")]
    NoHealthyServer { model: String },
}
