//! Attention diagrams for transformer language models.
//!
//! [`AttentionAnalyser`] renders the attention a generated token paid to its
//! context, per head of one layer or averaged per layer, and aggregates that
//! attention by generated word across many generation steps.

pub mod analyser;
pub mod capture;
pub mod config;
pub mod decode;
pub mod error;
pub mod figure;
pub mod render;
pub mod tensor;

pub use analyser::{AttentionAnalyser, GeneratedMap, WordRecord, norm, position_average};
pub use capture::{Capture, CaptureStep};
pub use config::{AnalyserConfig, ConfigUpdate, FigureFormat};
#[cfg(feature = "hf-tokenizer")]
pub use decode::HfDecoder;
pub use decode::{Gpt2Vocab, TokenDecoder, label_tokens};
pub use error::{AnalyserError, Result};
pub use figure::{Cell, Figure, Panel};
pub use tensor::AttentionStack;
