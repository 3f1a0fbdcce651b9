//! Attention tensors as produced by a decoder-only language model.
//!
//! The layout is `[layer, batch, head, query, key]`. Only batch `0` and the
//! last query row (the token being generated) are ever read.

use ndarray::{Array2, Array5, Axis, s};
use serde::Deserialize;

use crate::error::{AnalyserError, Result};

/// Nested form used by JSON captures: `attention[layer][batch][head][query][key]`.
pub type NestedAttention = Vec<Vec<Vec<Vec<Vec<f32>>>>>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "NestedAttention")]
pub struct AttentionStack {
    data: Array5<f32>,
}

impl AttentionStack {
    pub fn new(data: Array5<f32>) -> Result<Self> {
        if data.shape().contains(&0) {
            return Err(AnalyserError::EmptyAxis(data.shape().to_vec()));
        }
        Ok(Self { data })
    }

    pub fn from_shape_vec(shape: [usize; 5], values: Vec<f32>) -> Result<Self> {
        Self::new(Array5::from_shape_vec(shape, values)?)
    }

    pub fn from_nested(nested: NestedAttention) -> Result<Self> {
        let layers = nested.len();
        let batch = nested.first().map_or(0, Vec::len);
        let heads = nested
            .first()
            .and_then(|l| l.first())
            .map_or(0, Vec::len);
        let queries = nested
            .first()
            .and_then(|l| l.first())
            .and_then(|b| b.first())
            .map_or(0, Vec::len);
        let keys = nested
            .first()
            .and_then(|l| l.first())
            .and_then(|b| b.first())
            .and_then(|h| h.first())
            .map_or(0, Vec::len);

        let mut values = Vec::with_capacity(layers * batch * heads * queries * keys);
        for layer in nested {
            check_len("batch", batch, layer.len())?;
            for sample in layer {
                check_len("head", heads, sample.len())?;
                for head in sample {
                    check_len("query", queries, head.len())?;
                    for row in head {
                        check_len("key", keys, row.len())?;
                        values.extend(row);
                    }
                }
            }
        }
        Self::from_shape_vec([layers, batch, heads, queries, keys], values)
    }

    /// Builds a stack from the per-layer `[batch, head, query, key]` tensors a
    /// torch model returns when asked for its attentions.
    #[cfg(feature = "torch")]
    pub fn from_tch(layers: &[tch::Tensor]) -> Result<Self> {
        use ndarray::Array4;

        let mut per_layer = Vec::with_capacity(layers.len());
        for tensor in layers {
            let tensor = tensor
                .to_device(tch::Device::Cpu)
                .to_kind(tch::Kind::Float)
                .contiguous();
            let dims: Vec<usize> = tensor.size().iter().map(|&d| d as usize).collect();
            let (batch, heads, queries, keys) = match dims.as_slice() {
                &[b, h, q, k] => (b, h, q, k),
                _ => return Err(AnalyserError::BadRank(dims.clone())),
            };
            let values = Vec::<f32>::try_from(&tensor.flatten(0, -1))?;
            per_layer.push(Array4::from_shape_vec(
                (batch, heads, queries, keys),
                values,
            )?);
        }
        let views: Vec<_> = per_layer.iter().map(|a| a.view()).collect();
        Self::new(ndarray::stack(Axis(0), &views)?)
    }

    pub fn shape(&self) -> [usize; 5] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3], s[4]]
    }

    pub fn layers(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn heads(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn key_positions(&self) -> usize {
        self.data.len_of(Axis(4))
    }

    pub fn as_array(&self) -> &Array5<f32> {
        &self.data
    }

    /// `[head, key]` weights of the generated token in `layer`.
    pub fn head_rows(&self, layer: usize) -> Option<Array2<f32>> {
        if layer >= self.layers() {
            return None;
        }
        Some(self.data.slice(s![layer, 0, .., -1, ..]).to_owned())
    }

    /// `[layer, key]` weights of the generated token, averaged over heads.
    pub fn layer_average(&self) -> Array2<f32> {
        let last_query = self.data.slice(s![.., 0, .., -1, ..]);
        last_query.sum_axis(Axis(1)) / self.heads() as f32
    }
}

impl TryFrom<NestedAttention> for AttentionStack {
    type Error = AnalyserError;

    fn try_from(nested: NestedAttention) -> Result<Self> {
        Self::from_nested(nested)
    }
}

fn check_len(axis: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(AnalyserError::Ragged {
            axis,
            expected,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(layers: usize, heads: usize, keys: usize) -> AttentionStack {
        let queries = 2;
        let len = layers * heads * queries * keys;
        let values = (0..len).map(|v| v as f32).collect();
        AttentionStack::from_shape_vec([layers, 1, heads, queries, keys], values).unwrap()
    }

    #[test]
    fn head_rows_reads_last_query() {
        let attn = stack(2, 3, 4);
        let rows = attn.head_rows(1).unwrap();
        assert_eq!(rows.shape(), &[3, 4]);
        // layer 1, head 0, query 1 starts at ((1 * 3 + 0) * 2 + 1) * 4
        assert_eq!(rows[[0, 0]], 28.0);
        assert!(attn.head_rows(2).is_none());
    }

    #[test]
    fn layer_average_is_mean_over_heads() {
        let attn = stack(2, 3, 4);
        let avg = attn.layer_average();
        assert_eq!(avg.shape(), &[2, 4]);
        for layer in 0..2 {
            let rows = attn.head_rows(layer).unwrap();
            for key in 0..4 {
                let mean = rows.column(key).sum() / 3.0;
                assert!((avg[[layer, key]] - mean).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn nested_rejects_ragged_rows() {
        let nested = vec![vec![vec![vec![vec![0.5, 0.5], vec![1.0]]]]];
        let err = AttentionStack::from_nested(nested).unwrap_err();
        assert!(matches!(err, AnalyserError::Ragged { axis: "key", .. }));
    }

    #[test]
    fn nested_rejects_empty() {
        let err = AttentionStack::from_nested(Vec::new()).unwrap_err();
        assert!(matches!(err, AnalyserError::EmptyAxis(_)));
    }

    #[test]
    fn deserializes_from_json() {
        let attn: AttentionStack =
            serde_json::from_str("[[[[[0.25, 0.75]], [[0.5, 0.5]]]]]").unwrap();
        assert_eq!(attn.shape(), [1, 1, 2, 1, 2]);
        assert_eq!(attn.layer_average().row(0).to_vec(), vec![0.375, 0.625]);
    }
}
