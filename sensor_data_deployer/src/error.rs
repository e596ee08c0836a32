use thiserror::Error;

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Every way a deployment run can fail. None of these are recovered from
/// locally; they surface to the binary which reports them and exits non-zero.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The contract artifact is missing, ambiguous or not deployable.
    #[error("could not resolve contract {contract}: {reason}")]
    Resolution { contract: String, reason: String },
    #[error("compilation failed: {0}")]
    Compilation(String),
    /// Network failure or rejected transaction.
    #[error("deployment failed: {0}")]
    Deployment(String),
    #[error("deployment transaction {tx_hash} was not confirmed: {reason}")]
    ConfirmationTimeout { tx_hash: String, reason: String },
}

impl DeployError {
    pub(crate) fn resolution(contract: &str, reason: impl Into<String>) -> Self {
        Self::Resolution {
            contract: contract.to_owned(),
            reason: reason.into(),
        }
    }
}
