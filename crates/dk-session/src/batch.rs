use thiserror::Error;

use crate::{Pos, SeqId, Token};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch is full ({capacity} tokens)")]
    Full { capacity: usize },
    #[error("{field} has {got} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("token at index {index} belongs to no sequence")]
    EmptySequenceList { index: usize },
    #[error("index {index} declares {declared} sequence ids but lists {actual}")]
    SeqCountMismatch {
        index: usize,
        declared: i32,
        actual: usize,
    },
    #[error("positions overflow the position type")]
    PositionOverflow,
}

/// Tokens submitted to one `Context::decode` call.
///
/// Parallel arrays, one entry per token: id, absolute position, the
/// sequences it belongs to, and whether its logits are wanted. The builder
/// methods keep the arrays the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    tokens: Vec<Token>,
    positions: Vec<Pos>,
    seq_ids: Vec<Vec<SeqId>>,
    logits: Vec<bool>,
    capacity: usize,
}

impl Batch {
    /// An empty batch that accepts up to `capacity` tokens.
    pub fn new(capacity: usize) -> Self {
        Self {
            tokens: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            seq_ids: Vec::with_capacity(capacity),
            logits: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one token.
    pub fn add(
        &mut self,
        token: Token,
        pos: Pos,
        seq_ids: &[SeqId],
        logits: bool,
    ) -> Result<(), BatchError> {
        if self.tokens.len() >= self.capacity {
            return Err(BatchError::Full {
                capacity: self.capacity,
            });
        }
        if seq_ids.is_empty() {
            return Err(BatchError::EmptySequenceList {
                index: self.tokens.len(),
            });
        }
        self.tokens.push(token);
        self.positions.push(pos);
        self.seq_ids.push(seq_ids.to_vec());
        self.logits.push(logits);
        Ok(())
    }

    /// Remove every token, keeping the capacity.
    pub fn clear(&mut self) {
        self.tokens.clear();
        self.positions.clear();
        self.seq_ids.clear();
        self.logits.clear();
    }

    /// Assemble a batch from caller-built arrays, checking that they agree.
    pub fn from_parts(
        tokens: Vec<Token>,
        positions: Vec<Pos>,
        n_seq_id: Vec<i32>,
        seq_ids: Vec<Vec<SeqId>>,
        logits: Vec<bool>,
    ) -> Result<Batch, BatchError> {
        let n = tokens.len();
        for (field, got) in [
            ("positions", positions.len()),
            ("n_seq_id", n_seq_id.len()),
            ("seq_ids", seq_ids.len()),
            ("logits", logits.len()),
        ] {
            if got != n {
                return Err(BatchError::LengthMismatch { field, expected: n, got });
            }
        }
        for (index, (&declared, ids)) in n_seq_id.iter().zip(&seq_ids).enumerate() {
            if usize::try_from(declared).ok() != Some(ids.len()) {
                return Err(BatchError::SeqCountMismatch {
                    index,
                    declared,
                    actual: ids.len(),
                });
            }
            if ids.is_empty() {
                return Err(BatchError::EmptySequenceList { index });
            }
        }
        Ok(Batch {
            tokens,
            positions,
            seq_ids,
            logits,
            capacity: n,
        })
    }

    /// `tokens` on sequence 0 at `start_pos, start_pos + 1, ...`, with only
    /// the last token's logits wanted.
    pub fn single_sequence(tokens: &[Token], start_pos: Pos) -> Result<Batch, BatchError> {
        let mut batch = Batch::new(tokens.len());
        for (i, &token) in tokens.iter().enumerate() {
            let pos = i32::try_from(i)
                .ok()
                .and_then(|i| start_pos.checked_add(i))
                .ok_or(BatchError::PositionOverflow)?;
            batch.add(token, pos, &[0], false)?;
        }
        batch.mark_last_for_logits();
        Ok(batch)
    }

    /// Want logits for the last token only.
    pub fn mark_last_for_logits(&mut self) {
        self.logits.fill(false);
        if let Some(last) = self.logits.last_mut() {
            *last = true;
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn positions(&self) -> &[Pos] {
        &self.positions
    }

    pub fn seq_ids(&self, index: usize) -> Option<&[SeqId]> {
        self.seq_ids.get(index).map(Vec::as_slice)
    }

    pub fn n_seq_id(&self, index: usize) -> Option<usize> {
        self.seq_ids.get(index).map(Vec::len)
    }

    pub fn logits(&self) -> &[bool] {
        &self.logits
    }

    /// Number of tokens whose logits are wanted.
    pub fn n_outputs(&self) -> usize {
        self.logits.iter().filter(|&&l| l).count()
    }
}
