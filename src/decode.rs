//! Turning token ids into the text shown on the diagrams.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{AnalyserError, Result};

/// Maps a single token id to display text.
///
/// Tokens are decoded one at a time, so a word split into several pieces
/// shows up as several labels (`under`, `stood`).
pub trait TokenDecoder {
    fn decode(&self, id: u32) -> Result<String>;
}

/// Labels for a generated sequence: decimal ids, or decoded text when a
/// decoder is given.
pub fn label_tokens(ids: &[u32], decoder: Option<&dyn TokenDecoder>) -> Result<Vec<String>> {
    match decoder {
        Some(decoder) => ids.iter().map(|&id| decoder.decode(id)).collect(),
        None => Ok(ids.iter().map(u32::to_string).collect()),
    }
}

/// Decoder backed by a GPT-2 style `vocab.json` (byte-level BPE pieces).
#[derive(Debug, Clone)]
pub struct Gpt2Vocab {
    pieces: HashMap<u32, String>,
    byte_of: HashMap<char, u8>,
}

impl Gpt2Vocab {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let encoder: HashMap<String, u32> = serde_json::from_str(&raw)?;
        Ok(Self::from_encoder(encoder))
    }

    pub fn from_encoder(encoder: HashMap<String, u32>) -> Self {
        let pieces = encoder.into_iter().map(|(piece, id)| (id, piece)).collect();
        let byte_of = bytes_to_unicode()
            .into_iter()
            .enumerate()
            .map(|(byte, ch)| (ch, byte as u8))
            .collect();
        Self { pieces, byte_of }
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}

impl TokenDecoder for Gpt2Vocab {
    fn decode(&self, id: u32) -> Result<String> {
        let piece = self.pieces.get(&id).ok_or(AnalyserError::UnknownToken(id))?;
        let bytes: Vec<u8> = piece
            .chars()
            .flat_map(|ch| match self.byte_of.get(&ch) {
                Some(&b) => vec![b],
                None => ch.to_string().into_bytes(),
            })
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// The byte-level BPE alphabet: printable bytes map to themselves, the rest
/// are shifted above U+0100 so every byte has a visible character.
fn bytes_to_unicode() -> [char; 256] {
    let printable = |b: u32| {
        (u32::from('!')..=u32::from('~')).contains(&b)
            || (u32::from('¡')..=u32::from('¬')).contains(&b)
            || (u32::from('®')..=u32::from('ÿ')).contains(&b)
    };
    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for b in 0..256u32 {
        let code = if printable(b) {
            b
        } else {
            shifted += 1;
            255 + shifted
        };
        table[b as usize] = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
    }
    table
}

/// Decoder backed by a Hugging Face `tokenizer.json`.
#[cfg(feature = "hf-tokenizer")]
pub struct HfDecoder {
    inner: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfDecoder {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| AnalyserError::Tokenizer(e.to_string()))?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenDecoder for HfDecoder {
    fn decode(&self, id: u32) -> Result<String> {
        self.inner
            .decode(&[id], false)
            .map_err(|e| AnalyserError::Tokenizer(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Gpt2Vocab {
        let encoder = [("I", 40), ("Ġlike", 588), ("Ġmovie", 3807), ("Ċ", 198), (".", 13)]
            .into_iter()
            .map(|(piece, id)| (piece.to_string(), id))
            .collect();
        Gpt2Vocab::from_encoder(encoder)
    }

    #[test]
    fn byte_table_shifts_space_and_newline() {
        let table = bytes_to_unicode();
        assert_eq!(table[b' ' as usize], 'Ġ');
        assert_eq!(table[b'\n' as usize], 'Ċ');
        assert_eq!(table[b'a' as usize], 'a');
    }

    #[test]
    fn decodes_leading_space_pieces() {
        let vocab = vocab();
        assert_eq!(vocab.decode(588).unwrap(), " like");
        assert_eq!(vocab.decode(198).unwrap(), "\n");
        assert_eq!(vocab.decode(40).unwrap(), "I");
    }

    #[test]
    fn unknown_id_is_an_error() {
        assert!(matches!(
            vocab().decode(7),
            Err(AnalyserError::UnknownToken(7))
        ));
    }

    #[test]
    fn labels_without_decoder_are_ids() {
        assert_eq!(label_tokens(&[40, 588], None).unwrap(), vec!["40", "588"]);
        let vocab = vocab();
        assert_eq!(
            label_tokens(&[40, 588, 13], Some(&vocab)).unwrap(),
            vec!["I", " like", "."]
        );
    }
}
