//! Text ↔ token conversion driven by the vocabulary stored in a GGUF file.
//!
//! Two families are supported:
//! - SentencePiece (`tokenizer.ggml.model = "llama"`): spaces are escaped as
//!   `▁`, merges are score-driven, unknown characters fall back to `<0xHH>`
//!   byte pieces.
//! - GPT-2 BPE (`"gpt2"`): bytes are mapped to printable characters and
//!   merged by rank from `tokenizer.ggml.merges`.

pub mod bpe;
pub mod vocab;

use std::collections::HashMap;

use thiserror::Error;

use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;
use bpe::MergeRule;
pub use vocab::Vocab;

/// Token identifier. Only meaningful for the vocabulary that produced it.
pub type Token = i32;

const SPM_SPACE: char = '▁';

/// Per-token attribute, as stored in `tokenizer.ggml.token_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl TokenType {
    pub fn from_gguf(raw: i32) -> TokenType {
        match raw {
            2 => TokenType::Unknown,
            3 => TokenType::Control,
            4 => TokenType::UserDefined,
            5 => TokenType::Unused,
            6 => TokenType::Byte,
            _ => TokenType::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    SentencePiece,
    Gpt2,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VocabError {
    #[error("output buffer too small: {required} required")]
    BufferTooSmall { required: usize },
    #[error("token {0} is not in the vocabulary")]
    InvalidToken(Token),
    #[error("no token can represent {0:?}")]
    Unrepresentable(String),
}

pub struct Tokenizer {
    kind: TokenizerKind,
    vocab: Vocab,
    merge_ranks: HashMap<(String, String), usize>,
    /// Control and user-defined pieces keyed by first byte, longest first.
    specials: HashMap<u8, Vec<Token>>,
    byte_tokens: [Option<Token>; 256],
    add_bos: bool,
    add_eos: bool,
    /// GPT-2 byte ↔ char mapping; empty for SentencePiece.
    byte_chars: [char; 256],
    char_bytes: HashMap<char, u8>,
}

impl Tokenizer {
    /// Build from GGUF metadata. `tokenizer.ggml.model` defaults to `llama`.
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<Tokenizer> {
        let kind = match metadata.get_string("tokenizer.ggml.model") {
            Ok("llama") | Err(ModelError::MissingKey(_)) => TokenizerKind::SentencePiece,
            Ok("gpt2") => TokenizerKind::Gpt2,
            Ok(other) => {
                return Err(ModelError::TokenizerError(format!(
                    "unsupported tokenizer model '{}'",
                    other
                )))
            }
            Err(e) => return Err(e),
        };
        let vocab = Vocab::from_gguf(metadata)?;

        let mut merge_ranks = HashMap::new();
        match metadata.get_string_array("tokenizer.ggml.merges") {
            Ok(merges) => {
                for (rank, entry) in merges.iter().enumerate() {
                    let (a, b) = entry.split_once(' ').ok_or_else(|| {
                        ModelError::TokenizerError(format!("invalid merge entry: {:?}", entry))
                    })?;
                    merge_ranks.entry((a.to_string(), b.to_string())).or_insert(rank);
                }
            }
            Err(ModelError::MissingKey(_)) => {}
            Err(e) => return Err(e),
        }

        let flag = |key: &str, default: bool| match metadata.get_bool(key) {
            Ok(b) => Ok(b),
            Err(ModelError::MissingKey(_)) => Ok(default),
            Err(e) => Err(e),
        };
        let add_bos = flag("tokenizer.ggml.add_bos_token", kind == TokenizerKind::SentencePiece)?;
        let add_eos = flag("tokenizer.ggml.add_eos_token", false)?;

        let mut by_length: Vec<Token> = (0..vocab.len())
            .filter(|&i| {
                matches!(vocab.types[i], TokenType::Control | TokenType::UserDefined)
                    && !vocab.tokens[i].is_empty()
            })
            .map(|i| i as Token)
            .collect();
        by_length.sort_by_key(|&t| std::cmp::Reverse(vocab.tokens[t as usize].len()));
        let mut specials: HashMap<u8, Vec<Token>> = HashMap::new();
        for t in by_length {
            if let Some(&first) = vocab.tokens[t as usize].as_bytes().first() {
                specials.entry(first).or_default().push(t);
            }
        }

        let mut byte_tokens = [None; 256];
        for (i, slot) in byte_tokens.iter_mut().enumerate() {
            *slot = vocab.id(&format!("<0x{:02X}>", i));
        }

        let (byte_chars, char_bytes) = match kind {
            TokenizerKind::Gpt2 => {
                let table = bpe::byte_to_char_table();
                let reverse = table.iter().enumerate().map(|(b, &c)| (c, b as u8)).collect();
                (table, reverse)
            }
            TokenizerKind::SentencePiece => (['\0'; 256], HashMap::new()),
        };

        Ok(Tokenizer {
            kind,
            vocab,
            merge_ranks,
            specials,
            byte_tokens,
            add_bos,
            add_eos,
            byte_chars,
            char_bytes,
        })
    }

    pub fn kind(&self) -> TokenizerKind {
        self.kind
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn n_tokens(&self) -> usize {
        self.vocab.len()
    }

    pub fn bos(&self) -> Option<Token> {
        self.vocab.bos
    }

    pub fn eos(&self) -> Option<Token> {
        self.vocab.eos
    }

    pub fn eot(&self) -> Option<Token> {
        self.vocab.eot
    }

    pub fn unk(&self) -> Option<Token> {
        self.vocab.unk
    }

    pub fn pad(&self) -> Option<Token> {
        self.vocab.pad
    }

    pub fn nl(&self) -> Option<Token> {
        self.vocab.nl
    }

    pub fn add_bos(&self) -> bool {
        self.add_bos
    }

    pub fn add_eos(&self) -> bool {
        self.add_eos
    }

    /// Whether generation should stop after `token`.
    pub fn is_eog(&self, token: Token) -> bool {
        Some(token) == self.vocab.eos || Some(token) == self.vocab.eot
    }

    pub fn token_text(&self, token: Token) -> Option<&str> {
        self.vocab.index(token).map(|i| self.vocab.tokens[i].as_str())
    }

    pub fn token_type(&self, token: Token) -> Option<TokenType> {
        self.vocab.index(token).map(|i| self.vocab.types[i])
    }

    pub fn token_score(&self, token: Token) -> Option<f32> {
        self.vocab.index(token).map(|i| self.vocab.scores[i])
    }

    /// Tokenize into a fresh vector.
    ///
    /// `add_special` adds BOS/EOS as configured by the vocabulary.
    /// `parse_special` turns literal control/user-defined texts into their
    /// single tokens instead of spelling them out.
    pub fn tokenize_to_vec(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> std::result::Result<Vec<Token>, VocabError> {
        let mut out = Vec::with_capacity(text.len() + 2);
        if add_special && self.add_bos {
            if let Some(bos) = self.vocab.bos {
                out.push(bos);
            }
        }

        let mut rest = text;
        while !rest.is_empty() {
            let hit = if parse_special { self.find_special(rest) } else { None };
            match hit {
                Some((at, token)) => {
                    self.encode_fragment(&rest[..at], &mut out)?;
                    out.push(token);
                    rest = &rest[at + self.vocab.tokens[token as usize].len()..];
                }
                None => {
                    self.encode_fragment(rest, &mut out)?;
                    rest = "";
                }
            }
        }

        if add_special && self.add_eos {
            if let Some(eos) = self.vocab.eos {
                out.push(eos);
            }
        }
        Ok(out)
    }

    /// Tokenize into `out` and return the number of tokens written.
    ///
    /// When `out` is too small nothing meaningful is written and the error
    /// carries the required length.
    pub fn tokenize(
        &self,
        text: &str,
        out: &mut [Token],
        add_special: bool,
        parse_special: bool,
    ) -> std::result::Result<usize, VocabError> {
        let tokens = self.tokenize_to_vec(text, add_special, parse_special)?;
        if tokens.len() > out.len() {
            return Err(VocabError::BufferTooSmall {
                required: tokens.len(),
            });
        }
        out[..tokens.len()].copy_from_slice(&tokens);
        Ok(tokens.len())
    }

    /// Leftmost special piece in `text`, longest on ties.
    ///
    /// Only positions whose byte starts some special are tried. A special
    /// is valid UTF-8, so it can never match from inside a multi-byte char.
    fn find_special(&self, text: &str) -> Option<(usize, Token)> {
        if self.specials.is_empty() {
            return None;
        }
        let bytes = text.as_bytes();
        bytes.iter().enumerate().find_map(|(at, b)| {
            self.specials
                .get(b)?
                .iter()
                .find(|&&t| bytes[at..].starts_with(self.vocab.tokens[t as usize].as_bytes()))
                .map(|&t| (at, t))
        })
    }

    fn encode_fragment(
        &self,
        text: &str,
        out: &mut Vec<Token>,
    ) -> std::result::Result<(), VocabError> {
        if text.is_empty() {
            return Ok(());
        }
        let mut symbols: Vec<String> = match self.kind {
            TokenizerKind::SentencePiece => text
                .chars()
                .map(|c| if c == ' ' { SPM_SPACE.to_string() } else { c.to_string() })
                .collect(),
            TokenizerKind::Gpt2 => text
                .bytes()
                .map(|b| self.byte_chars[b as usize].to_string())
                .collect(),
        };

        let rule = if self.merge_ranks.is_empty() {
            MergeRule::Scored
        } else {
            MergeRule::Ranked(&self.merge_ranks)
        };
        bpe::merge(&mut symbols, &self.vocab, &rule);

        for sym in &symbols {
            if let Some(id) = self.vocab.id(sym) {
                out.push(id);
                continue;
            }
            // byte fallback for pieces the vocabulary lacks
            let raw = match self.kind {
                TokenizerKind::SentencePiece => sym.replace(SPM_SPACE, " ").into_bytes(),
                TokenizerKind::Gpt2 => {
                    sym.chars().filter_map(|c| self.char_bytes.get(&c).copied()).collect()
                }
            };
            for b in raw {
                match self.byte_tokens[b as usize].or(self.vocab.unk) {
                    Some(id) => out.push(id),
                    None => return Err(VocabError::Unrepresentable(sym.clone())),
                }
            }
        }
        Ok(())
    }

    /// Visit the rendered bytes of `token` in order.
    fn for_each_piece_chunk(
        &self,
        token: Token,
        special: bool,
        mut emit: impl FnMut(&[u8]),
    ) -> std::result::Result<(), VocabError> {
        let i = self.vocab.index(token).ok_or(VocabError::InvalidToken(token))?;
        let text = self.vocab.tokens[i].as_str();
        match self.vocab.types[i] {
            TokenType::Byte => match vocab::parse_byte_piece(text) {
                Some(b) => emit(std::slice::from_ref(&b)),
                None => emit(text.as_bytes()),
            },
            TokenType::Control | TokenType::Unknown | TokenType::Unused => {
                if special {
                    emit(text.as_bytes());
                }
            }
            TokenType::Normal | TokenType::UserDefined => {
                let mut buf = [0u8; 4];
                for c in text.chars() {
                    match self.kind {
                        TokenizerKind::SentencePiece if c == SPM_SPACE => {
                            emit(b" ".as_slice())
                        }
                        TokenizerKind::Gpt2 => match self.char_bytes.get(&c) {
                            Some(b) => emit(std::slice::from_ref(b)),
                            None => emit(c.encode_utf8(&mut buf).as_bytes()),
                        },
                        _ => emit(c.encode_utf8(&mut buf).as_bytes()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Render one token into `buf` without allocating.
    ///
    /// Up to `lstrip` leading spaces are dropped. Control, unknown and
    /// unused tokens render as nothing unless `special` is set. Returns the
    /// number of bytes written.
    pub fn token_to_piece(
        &self,
        token: Token,
        buf: &mut [u8],
        lstrip: usize,
        special: bool,
    ) -> std::result::Result<usize, VocabError> {
        let mut to_strip = lstrip;
        let mut required = 0usize;
        self.for_each_piece_chunk(token, special, |chunk| {
            required += chunk.len() - strip_spaces(chunk, &mut to_strip);
        })?;
        if required > buf.len() {
            return Err(VocabError::BufferTooSmall { required });
        }

        to_strip = lstrip;
        let mut written = 0usize;
        self.for_each_piece_chunk(token, special, |chunk| {
            let chunk = &chunk[strip_spaces(chunk, &mut to_strip)..];
            buf[written..written + chunk.len()].copy_from_slice(chunk);
            written += chunk.len();
        })?;
        Ok(written)
    }

    /// Render a whole token sequence to a `String` (lossy for split UTF-8).
    pub fn detokenize(
        &self,
        tokens: &[Token],
        special: bool,
    ) -> std::result::Result<String, VocabError> {
        let mut bytes = Vec::new();
        for &t in tokens {
            self.for_each_piece_chunk(t, special, |chunk| bytes.extend_from_slice(chunk))?;
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Number of leading spaces to drop from `chunk`, spending `budget`.
/// The first non-space byte ends stripping for the rest of the piece.
fn strip_spaces(chunk: &[u8], budget: &mut usize) -> usize {
    let n = chunk.iter().take(*budget).take_while(|&&b| b == b' ').count();
    *budget = if n < chunk.len() { 0 } else { *budget - n };
    n
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

    fn spm() -> Tokenizer {
        let mut pieces = vec!["<unk>".to_string(), "<s>".to_string(), "</s>".to_string()];
        pieces.extend((0..=255u8).map(|b| format!("<0x{:02X}>", b)));
        let words = [
            "▁", "h", "e", "l", "o", "t", "w", "r", "d", "he", "ll", "▁t", "▁the", "llo",
            "hello", "▁w",
        ];
        pieces.extend(words.iter().map(|s| s.to_string()));
        let n = pieces.len();
        let scores: Vec<GgufMetadataValue> = (0..n)
            .map(|i| {
                let score = if i < 259 { 0.0 } else { pieces[i].chars().count() as f32 };
                GgufMetadataValue::F32(score)
            })
            .collect();

        let mut meta = GgufMetadata::default();
        meta.entries
            .insert("tokenizer.ggml.model".into(), GgufMetadataValue::String("llama".into()));
        meta.entries.insert(
            "tokenizer.ggml.tokens".into(),
            GgufMetadataValue::Array(
                8,
                pieces.into_iter().map(GgufMetadataValue::String).collect(),
            ),
        );
        meta.entries.insert("tokenizer.ggml.scores".into(), GgufMetadataValue::Array(6, scores));
        Tokenizer::from_gguf(&meta).unwrap()
    }

    fn render(tok: &Tokenizer, tokens: &[Token]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        for &t in tokens {
            let n = tok.token_to_piece(t, &mut buf, 0, false).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_spm_merges_words() {
        let tok = spm();
        let ids = tok.tokenize_to_vec(" the", false, false).unwrap();
        assert_eq!(ids, vec![tok.vocab().id("▁the").unwrap()]);
        let ids = tok.tokenize_to_vec("hello", false, false).unwrap();
        assert_eq!(ids, vec![tok.vocab().id("hello").unwrap()]);
    }

    #[test]
    fn test_round_trip_with_byte_fallback() {
        let tok = spm();
        for text in ["hello world", "  the\n", "héllo ✓ wörld", "<s> not special", ""] {
            let ids = tok.tokenize_to_vec(text, false, false).unwrap();
            assert_eq!(render(&tok, &ids), text.as_bytes(), "text {:?}", text);
        }
    }

    #[test]
    fn test_add_and_parse_special() {
        let tok = spm();
        let bos = tok.bos().unwrap();
        let eos = tok.eos().unwrap();
        assert!(tok.add_bos());
        assert!(!tok.add_eos());

        let ids = tok.tokenize_to_vec("he", true, false).unwrap();
        assert_eq!(ids[0], bos);

        let ids = tok.tokenize_to_vec("he</s>he", false, true).unwrap();
        let he = tok.vocab().id("he").unwrap();
        assert_eq!(ids, vec![he, eos, he]);

        let ids = tok.tokenize_to_vec("he</s>", false, false).unwrap();
        assert!(!ids.contains(&eos));
    }

    #[test]
    fn test_tokenize_reports_required_length() {
        let tok = spm();
        let mut small = [0; 1];
        let err = tok.tokenize("hello world", &mut small, true, false).unwrap_err();
        let required = match err {
            VocabError::BufferTooSmall { required } => required,
            other => panic!("unexpected {:?}", other),
        };
        let mut buf = vec![0; required];
        assert_eq!(tok.tokenize("hello world", &mut buf, true, false).unwrap(), required);
        assert_eq!(buf[0], tok.bos().unwrap());
    }

    #[test]
    fn test_piece_rendering_rules() {
        let tok = spm();
        let mut buf = [0u8; 16];
        let the = tok.vocab().id("▁the").unwrap();
        assert_eq!(tok.token_to_piece(the, &mut buf, 0, false).unwrap(), 4);
        assert_eq!(&buf[..4], b" the");
        assert_eq!(tok.token_to_piece(the, &mut buf, 1, false).unwrap(), 3);
        assert_eq!(&buf[..3], b"the");

        let bos = tok.bos().unwrap();
        assert_eq!(tok.token_to_piece(bos, &mut buf, 0, false).unwrap(), 0);
        assert_eq!(tok.token_to_piece(bos, &mut buf, 0, true).unwrap(), 3);
        assert_eq!(&buf[..3], b"<s>");

        let mut tiny = [0u8; 2];
        assert_eq!(
            tok.token_to_piece(the, &mut tiny, 0, false),
            Err(VocabError::BufferTooSmall { required: 4 })
        );
        assert_eq!(
            tok.token_to_piece(10_000, &mut buf, 0, false),
            Err(VocabError::InvalidToken(10_000))
        );
    }

    #[test]
    fn test_gpt2_round_trip() {
        let table = bpe::byte_to_char_table();
        let mut pieces: Vec<String> = table.iter().map(|c| c.to_string()).collect();
        pieces.extend(["Ġt", "he", "Ġthe", "<|endoftext|>"].iter().map(|s| s.to_string()));
        let mut meta = GgufMetadata::default();
        meta.entries
            .insert("tokenizer.ggml.model".into(), GgufMetadataValue::String("gpt2".into()));
        let refs: Vec<&str> = pieces.iter().map(String::as_str).collect();
        meta.entries.insert("tokenizer.ggml.tokens".into(), strings(&refs));
        meta.entries.insert("tokenizer.ggml.merges".into(), strings(&["Ġ t", "h e", "Ġt he"]));
        let tok = Tokenizer::from_gguf(&meta).unwrap();

        assert_eq!(tok.kind(), TokenizerKind::Gpt2);
        assert!(!tok.add_bos());
        assert_eq!(tok.eos(), tok.vocab().id("<|endoftext|>"));

        let ids = tok.tokenize_to_vec(" the", false, false).unwrap();
        assert_eq!(ids, vec![tok.vocab().id("Ġthe").unwrap()]);
        let text = "naïve the\tend";
        let ids = tok.tokenize_to_vec(text, false, false).unwrap();
        assert_eq!(render(&tok, &ids), text.as_bytes());
        assert_eq!(tok.detokenize(&ids, false).unwrap(), text);
    }

    #[test]
    fn test_long_text_with_many_specials() {
        let tok = spm();
        let eos = tok.eos().unwrap();
        let hello = tok.vocab().id("hello").unwrap();
        let text = "hello</s>é".repeat(2000);

        let ids = tok.tokenize_to_vec(&text, false, true).unwrap();
        assert_eq!(ids.iter().filter(|&&t| t == eos).count(), 2000);
        assert_eq!(ids.iter().filter(|&&t| t == hello).count(), 2000);
        // é has no piece of its own: two byte tokens per repetition
        assert_eq!(ids.len(), 2000 * 4);
        assert_eq!(tok.detokenize(&ids, true).unwrap(), text);
    }
}
