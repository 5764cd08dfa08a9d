use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use super::vocab::Vocab;

/// How adjacent symbols are chosen for merging.
pub(crate) enum MergeRule<'a> {
    /// GPT-2 style: the pair with the lowest rank in the merge list.
    Ranked(&'a HashMap<(String, String), usize>),
    /// SentencePiece style: the pair whose concatenation is a vocabulary
    /// entry with the highest score.
    Scored,
}

impl MergeRule<'_> {
    /// Priority of merging `a` and `b`; lower is better. `None` if the pair
    /// cannot merge.
    fn priority(&self, vocab: &Vocab, a: &str, b: &str) -> Option<f64> {
        match self {
            MergeRule::Ranked(ranks) => {
                let rank = ranks.get(&(a.to_string(), b.to_string()))?;
                // a ranked merge must still land on a vocabulary entry
                vocab.id(&[a, b].concat())?;
                Some(*rank as f64)
            }
            MergeRule::Scored => {
                let id = vocab.id(&[a, b].concat())?;
                Some(-(vocab.scores[id as usize] as f64))
            }
        }
    }
}

/// A mergeable adjacent pair, as queued. `len` is the combined byte length
/// when queued; a pair whose symbols have changed since is skipped.
struct Candidate {
    priority: f64,
    left: usize,
    right: usize,
    len: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: lowest priority first, then leftmost
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.left.cmp(&self.left))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

fn candidate(
    symbols: &[String],
    vocab: &Vocab,
    rule: &MergeRule<'_>,
    left: usize,
    right: usize,
) -> Option<Candidate> {
    let priority = rule.priority(vocab, &symbols[left], &symbols[right])?;
    Some(Candidate {
        priority,
        left,
        right,
        len: symbols[left].len() + symbols[right].len(),
    })
}

/// Repeatedly merge the best adjacent pair until no pair qualifies.
/// Ties go to the leftmost pair.
///
/// Symbols form a linked list over their original slots and pairs wait in
/// a priority queue, so each merge only re-queues its two new neighbours.
pub(crate) fn merge(symbols: &mut Vec<String>, vocab: &Vocab, rule: &MergeRule<'_>) {
    let n = symbols.len();
    if n < 2 {
        return;
    }
    let mut prev: Vec<Option<usize>> = (0..n).map(|i| i.checked_sub(1)).collect();
    let mut next: Vec<Option<usize>> = (0..n).map(|i| Some(i + 1).filter(|&j| j < n)).collect();
    let mut live = vec![true; n];

    let mut queue: BinaryHeap<Candidate> =
        (0..n - 1).filter_map(|i| candidate(symbols, vocab, rule, i, i + 1)).collect();

    while let Some(c) = queue.pop() {
        let fresh = live[c.left]
            && live[c.right]
            && next[c.left] == Some(c.right)
            && symbols[c.left].len() + symbols[c.right].len() == c.len;
        if !fresh {
            continue;
        }
        let right = std::mem::take(&mut symbols[c.right]);
        symbols[c.left].push_str(&right);
        live[c.right] = false;
        next[c.left] = next[c.right];
        if let Some(after) = next[c.left] {
            prev[after] = Some(c.left);
            queue.extend(candidate(symbols, vocab, rule, c.left, after));
        }
        if let Some(before) = prev[c.left] {
            queue.extend(candidate(symbols, vocab, rule, before, c.left));
        }
    }

    let mut keep = live.into_iter();
    symbols.retain(|_| keep.next().unwrap_or(false));
}

fn is_printable_byte(b: u8) -> bool {
    matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF)
}

/// GPT-2 byte-to-character table: printable bytes map to themselves, the
/// rest to consecutive code points from U+0100.
pub(crate) fn byte_to_char_table() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut next = 256u32;
    for b in 0..=255u8 {
        table[b as usize] = if is_printable_byte(b) {
            b as char
        } else {
            let c = char::from_u32(next).unwrap_or('\u{FFFD}');
            next += 1;
            c
        };
    }
    table
}
