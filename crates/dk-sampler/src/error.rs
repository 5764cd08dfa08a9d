use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplerError {
    #[error("no candidate tokens to sample from")]
    EmptyCandidates,
}

pub type Result<T> = std::result::Result<T, SamplerError>;
