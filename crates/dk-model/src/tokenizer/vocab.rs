use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;
use super::{Token, TokenType};

/// Token table loaded from GGUF metadata: texts, merge scores, attributes
/// and the special ids.
#[derive(Debug, Clone)]
pub struct Vocab {
    pub tokens: Vec<String>,
    /// SentencePiece merge scores; zero when the file carries none.
    pub scores: Vec<f32>,
    pub types: Vec<TokenType>,
    pub token_to_id: HashMap<String, Token>,
    pub bos: Option<Token>,
    pub eos: Option<Token>,
    /// End-of-turn token, for chat models that stop on it.
    pub eot: Option<Token>,
    pub unk: Option<Token>,
    pub pad: Option<Token>,
    pub nl: Option<Token>,
}

/// An optional `u32` id key, validated against the vocabulary size.
fn special_id(metadata: &GgufMetadata, key: &str, n_vocab: usize) -> Result<Option<Token>> {
    match metadata.get_u32(key) {
        Ok(id) if (id as usize) < n_vocab => Ok(Some(id as Token)),
        Ok(id) => Err(ModelError::TokenizerError(format!(
            "{} = {} is outside the vocabulary of {}",
            key, id, n_vocab
        ))),
        Err(ModelError::MissingKey(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Byte value of a `<0xHH>` piece.
pub(crate) fn parse_byte_piece(text: &str) -> Option<u8> {
    let hex = text.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

impl Vocab {
    /// Reads `tokenizer.ggml.tokens` plus the optional `scores`,
    /// `token_type` and `*_token_id` keys.
    ///
    /// Special ids missing from the metadata are looked up by their
    /// conventional text (`<s>`, `</s>`, `<unk>`, `<|endoftext|>`).
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<Vocab> {
        let tokens = metadata.get_string_array("tokenizer.ggml.tokens")?;
        let n = tokens.len();
        if n == 0 || n > Token::MAX as usize {
            return Err(ModelError::TokenizerError(format!("unusable vocabulary size {}", n)));
        }

        let scores = match metadata.get_f32_array("tokenizer.ggml.scores") {
            Ok(s) if s.len() == n => s,
            Ok(s) => {
                return Err(ModelError::TokenizerError(format!(
                    "{} scores for {} tokens",
                    s.len(),
                    n
                )))
            }
            Err(ModelError::MissingKey(_)) => vec![0.0; n],
            Err(e) => return Err(e),
        };

        let mut token_to_id = HashMap::with_capacity(n);
        for (id, text) in tokens.iter().enumerate() {
            // first occurrence wins for duplicated texts
            token_to_id.entry(text.clone()).or_insert(id as Token);
        }
        let by_text = |text: &str| token_to_id.get(text).copied();

        let bos = special_id(metadata, "tokenizer.ggml.bos_token_id", n)?
            .or_else(|| by_text("<s>"));
        let eos = special_id(metadata, "tokenizer.ggml.eos_token_id", n)?
            .or_else(|| by_text("</s>"))
            .or_else(|| by_text("<|endoftext|>"));
        let eot = special_id(metadata, "tokenizer.ggml.eot_token_id", n)?;
        let unk = special_id(metadata, "tokenizer.ggml.unknown_token_id", n)?
            .or_else(|| by_text("<unk>"));
        let pad = special_id(metadata, "tokenizer.ggml.padding_token_id", n)?;
        let nl = by_text("\n").or_else(|| by_text("<0x0A>")).or_else(|| by_text("Ċ"));

        let types = match metadata.get_i32_array("tokenizer.ggml.token_type") {
            Ok(raw) if raw.len() == n => raw.into_iter().map(TokenType::from_gguf).collect(),
            Ok(raw) => {
                return Err(ModelError::TokenizerError(format!(
                    "{} token types for {} tokens",
                    raw.len(),
                    n
                )))
            }
            Err(ModelError::MissingKey(_)) => tokens
                .iter()
                .enumerate()
                .map(|(id, text)| {
                    let id = Some(id as Token);
                    if id == bos || id == eos {
                        TokenType::Control
                    } else if id == unk {
                        TokenType::Unknown
                    } else if parse_byte_piece(text).is_some() {
                        TokenType::Byte
                    } else {
                        TokenType::Normal
                    }
                })
                .collect(),
            Err(e) => return Err(e),
        };

        Ok(Vocab {
            tokens,
            scores,
            types,
            token_to_id,
            bos,
            eos,
            eot,
            unk,
            pad,
            nl,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn id(&self, text: &str) -> Option<Token> {
        self.token_to_id.get(text).copied()
    }

    /// Index for `token`, if it is inside the vocabulary.
    pub(crate) fn index(&self, token: Token) -> Option<usize> {
        usize::try_from(token).ok().filter(|&i| i < self.tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::GgufMetadataValue;

    fn strings(items: &[&str]) -> GgufMetadataValue {
        GgufMetadataValue::Array(
            8,
            items.iter().map(|s| GgufMetadataValue::String(s.to_string())).collect(),
        )
    }

    #[test]
    fn test_specials_by_text_and_inferred_types() {
        let mut meta = GgufMetadata::default();
        meta.entries.insert(
            "tokenizer.ggml.tokens".into(),
            strings(&["<unk>", "<s>", "</s>", "<0x0A>", "a"]),
        );
        let vocab = Vocab::from_gguf(&meta).unwrap();
        assert_eq!((vocab.unk, vocab.bos, vocab.eos), (Some(0), Some(1), Some(2)));
        assert_eq!(vocab.nl, Some(3));
        assert_eq!(vocab.pad, None);
        assert_eq!(
            vocab.types,
            vec![
                TokenType::Unknown,
                TokenType::Control,
                TokenType::Control,
                TokenType::Byte,
                TokenType::Normal
            ]
        );
        assert_eq!(vocab.scores, vec![0.0; 5]);
    }

    #[test]
    fn test_explicit_ids_override_and_are_checked() {
        let mut meta = GgufMetadata::default();
        meta.entries.insert("tokenizer.ggml.tokens".into(), strings(&["x", "y", "<s>"]));
        meta.entries.insert("tokenizer.ggml.bos_token_id".into(), GgufMetadataValue::U32(0));
        assert_eq!(Vocab::from_gguf(&meta).unwrap().bos, Some(0));

        meta.entries.insert("tokenizer.ggml.eos_token_id".into(), GgufMetadataValue::U32(3));
        assert!(matches!(Vocab::from_gguf(&meta), Err(ModelError::TokenizerError(_))));
    }

    #[test]
    fn test_byte_piece() {
        assert_eq!(parse_byte_piece("<0x41>"), Some(0x41));
        assert_eq!(parse_byte_piece("<0xff>"), Some(0xff));
        assert_eq!(parse_byte_piece("<0x4>"), None);
        assert_eq!(parse_byte_piece("0x41"), None);
    }
}
