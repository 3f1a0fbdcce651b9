//! Generation steps recorded from a model run, stored as JSON.
//!
//! ```json
//! {"steps": [{"tokens": [40, 588, 262], "attention": [[[[[0.2, 0.8]]]]]}]}
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::tensor::AttentionStack;

#[derive(Debug, Clone, Deserialize)]
pub struct Capture {
    pub steps: Vec<CaptureStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureStep {
    /// Input ids followed by the generated id.
    pub tokens: Vec<u32>,
    pub attention: AttentionStack,
}

impl Capture {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps() {
        let capture = Capture::from_json_str(
            r#"{"steps": [{"tokens": [1, 2, 3], "attention": [[[[[0.2, 0.8]]]]]}]}"#,
        )
        .unwrap();
        assert_eq!(capture.steps.len(), 1);
        assert_eq!(capture.steps[0].tokens, vec![1, 2, 3]);
        assert_eq!(capture.steps[0].attention.shape(), [1, 1, 1, 1, 2]);
    }

    #[test]
    fn rejects_ragged_attention() {
        let err = Capture::from_json_str(
            r#"{"steps": [{"tokens": [1, 2], "attention": [[[[[0.2, 0.8], [1.0]]]]]}]}"#,
        );
        assert!(err.is_err());
    }
}
