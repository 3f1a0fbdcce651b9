use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyserError>;

#[derive(Debug, Error)]
pub enum AnalyserError {
    #[error("attention tensor must have rank 5 [layer, batch, head, query, key], got shape {0:?}")]
    BadRank(Vec<usize>),

    #[error("attention tensor has an empty axis: shape {0:?}")]
    EmptyAxis(Vec<usize>),

    #[error("ragged attention data at {axis}: expected length {expected}, found {found}")]
    Ragged {
        axis: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("sequence has {context} context tokens but attention has {keys} key positions")]
    ContextMismatch { context: usize, keys: usize },

    #[error("record has {found} layers but earlier records of this word have {expected}")]
    LayerMismatch { expected: usize, found: usize },

    #[error("generated sequence must contain at least one context token and the generated token")]
    SequenceTooShort,

    #[error("cannot normalize a vector whose sum is {0}")]
    ZeroSum(f32),

    #[error("decoding requested but no token decoder is installed")]
    MissingDecoder,

    #[error("token id {0} is not in the vocabulary")]
    UnknownToken(u32),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("unsupported figure extension for {0}")]
    UnsupportedFormat(PathBuf),

    #[error("drawing failed: {0}")]
    Draw(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[cfg(feature = "torch")]
    #[error(transparent)]
    Torch(#[from] tch::TchError),
}
