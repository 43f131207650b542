use thiserror::Error;

use sluice_core::diagnostic::Diagnostic;
use sluice_operators::OpError;

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    /// Parse errors, all of them, each with its location.
    #[error("{}", render(.0))]
    Diagnostics(Vec<Diagnostic>),

    #[error("type error at operator {index} ('{operator}'): {message}")]
    Type {
        index: usize,
        operator: String,
        message: String,
    },

    #[error("empty pipeline")]
    Empty,

    #[error("invalid pipeline document: {0}")]
    Document(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Operator(#[from] OpError),

    #[error(transparent)]
    Core(#[from] sluice_core::Error),
}

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl PlanError {
    /// The error as diagnostics, for reporting alongside runtime ones.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            PlanError::Diagnostics(d) => d.clone(),
            other => vec![Diagnostic::error(other.to_string())],
        }
    }
}
