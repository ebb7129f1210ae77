//! Byte-level BPE merge engine.
//!
//! Encoding starts from one token per input byte and repeatedly merges the
//! adjacent pair with the lowest rank, leftmost first on ties, until no
//! adjacent pair has a rule. Rule `r` produces token `256 + r`, so merged
//! ids never collide with byte ids or with each other.
//!
//! Serialized table: `rule_count:u32` followed by `rule_count` records of
//! `left:u32, right:u32, rank:u32`, little endian. Trailing bytes are ignored.

use std::collections::HashMap;

use crate::error::{CapacityError, FormatError, Result};
use crate::format::ByteReader;

pub const BYTE_VOCAB: u32 = 256;
pub const RULE_SIZE: usize = 12;
pub const DEFAULT_SCRATCH_CAPACITY: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRule {
    pub left: u32,
    pub right: u32,
    pub rank: u32,
}

impl MergeRule {
    pub fn new(left: u32, right: u32, rank: u32) -> Self {
        Self { left, right, rank }
    }

    pub fn merged_id(&self) -> u32 {
        BYTE_VOCAB + self.rank
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeTable {
    ranks: HashMap<(u32, u32), u32>,
}

impl MergeTable {
    /// Build from rules in any order. Ranks must be unique; a pair listed
    /// twice keeps its lowest rank.
    pub fn from_rules<I: IntoIterator<Item = MergeRule>>(rules: I) -> Result<Self> {
        let mut ranks: HashMap<(u32, u32), u32> = HashMap::new();
        let mut seen_ranks = std::collections::HashSet::new();
        for rule in rules {
            if rule.rank > u32::MAX - BYTE_VOCAB {
                return Err(invalid(format!("rank {} overflows the token id space", rule.rank)));
            }
            if !seen_ranks.insert(rule.rank) {
                return Err(invalid(format!("duplicate rank {}", rule.rank)));
            }
            ranks
                .entry((rule.left, rule.right))
                .and_modify(|r| *r = (*r).min(rule.rank))
                .or_insert(rule.rank);
        }
        Ok(Self { ranks })
    }

    /// Decode a serialized table, checking the record count against the
    /// bytes actually present.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let count = r.read_u32().map_err(|_| invalid("missing rule count".into()))? as usize;
        let needed = count.checked_mul(RULE_SIZE);
        if needed.is_none_or(|n| n > r.remaining()) {
            return Err(invalid(format!(
                "{count} rules need {} bytes, segment has {}",
                count.saturating_mul(RULE_SIZE),
                r.remaining()
            )));
        }

        let mut rules = Vec::with_capacity(count);
        for _ in 0..count {
            rules.push(MergeRule {
                left: r.read_u32()?,
                right: r.read_u32()?,
                rank: r.read_u32()?,
            });
        }
        Self::from_rules(rules)
    }

    /// Serialize rules in the on-disk form.
    pub fn encode(rules: &[MergeRule]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + rules.len() * RULE_SIZE);
        out.extend_from_slice(&(rules.len() as u32).to_le_bytes());
        for rule in rules {
            out.extend_from_slice(&rule.left.to_le_bytes());
            out.extend_from_slice(&rule.right.to_le_bytes());
            out.extend_from_slice(&rule.rank.to_le_bytes());
        }
        out
    }

    pub fn rank(&self, left: u32, right: u32) -> Option<u32> {
        self.ranks.get(&(left, right)).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

fn invalid(msg: String) -> crate::error::NodalError {
    FormatError::InvalidMergeTable(msg).into()
}

pub struct BpeEngine<'t> {
    table: &'t MergeTable,
    capacity: usize,
}

impl<'t> BpeEngine<'t> {
    pub fn new(table: &'t MergeTable) -> Self {
        Self::with_capacity(table, DEFAULT_SCRATCH_CAPACITY)
    }

    /// `capacity` bounds the working sequence (one token per input byte).
    pub fn with_capacity(table: &'t MergeTable, capacity: usize) -> Self {
        Self { table, capacity }
    }

    pub fn encode(&self, input: &[u8]) -> Result<Vec<u32>> {
        if input.len() > self.capacity {
            return Err(CapacityError {
                what: "bpe scratch",
                requested: input.len(),
                max: self.capacity,
            }
            .into());
        }
        let mut tokens: Vec<u32> = input.iter().map(|&b| b as u32).collect();
        self.merge(&mut tokens);
        Ok(tokens)
    }

    /// Apply merges to `tokens` until no adjacent pair has a rule. Each merge
    /// shortens the sequence by exactly one.
    pub fn merge(&self, tokens: &mut Vec<u32>) {
        while tokens.len() >= 2 {
            let mut best: Option<(usize, u32)> = None;
            for i in 0..tokens.len() - 1 {
                if let Some(rank) = self.table.rank(tokens[i], tokens[i + 1]) {
                    // strict < keeps the leftmost pair on equal rank
                    if best.is_none_or(|(_, r)| rank < r) {
                        best = Some((i, rank));
                    }
                }
            }
            let Some((idx, rank)) = best else { break };
            tokens[idx] = BYTE_VOCAB + rank;
            tokens.remove(idx + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodalError;

    const A: u32 = b'a' as u32;
    const B: u32 = b'b' as u32;
    const C: u32 = b'c' as u32;

    #[test]
    fn test_lowest_rank_wins() {
        let table =
            MergeTable::from_rules([MergeRule::new(A, B, 0), MergeRule::new(B, C, 1)]).unwrap();
        let tokens = BpeEngine::new(&table).encode(b"abc").unwrap();
        // (a,b) merges first; no rule for (ab, c)
        assert_eq!(tokens, vec![256, C]);
    }

    #[test]
    fn test_rule_order_does_not_matter() {
        let table =
            MergeTable::from_rules([MergeRule::new(B, C, 1), MergeRule::new(A, B, 0)]).unwrap();
        assert_eq!(BpeEngine::new(&table).encode(b"abc").unwrap(), vec![256, C]);
    }

    #[test]
    fn test_lower_rank_on_the_right() {
        let table =
            MergeTable::from_rules([MergeRule::new(A, B, 1), MergeRule::new(B, C, 0)]).unwrap();
        assert_eq!(BpeEngine::new(&table).encode(b"abc").unwrap(), vec![A, 256]);
    }

    #[test]
    fn test_leftmost_tie_break() {
        let table = MergeTable::from_rules([MergeRule::new(A, A, 0)]).unwrap();
        assert_eq!(BpeEngine::new(&table).encode(b"aaa").unwrap(), vec![256, A]);
        assert_eq!(BpeEngine::new(&table).encode(b"aaaa").unwrap(), vec![256, 256]);
    }

    #[test]
    fn test_chained_merges() {
        let table = MergeTable::from_rules([
            MergeRule::new(A, B, 0),
            MergeRule::new(256, C, 1),
        ])
        .unwrap();
        assert_eq!(BpeEngine::new(&table).encode(b"abcab").unwrap(), vec![257, 256]);
    }

    #[test]
    fn test_no_rules_is_identity() {
        let table = MergeTable::default();
        assert_eq!(BpeEngine::new(&table).encode(b"hi").unwrap(), vec![104, 105]);
        assert!(BpeEngine::new(&table).encode(b"").unwrap().is_empty());
    }

    #[test]
    fn test_scratch_capacity() {
        let table = MergeTable::default();
        let engine = BpeEngine::with_capacity(&table, 4);
        assert!(engine.encode(b"abcd").is_ok());
        assert!(matches!(
            engine.encode(b"abcde"),
            Err(NodalError::Capacity(CapacityError { requested: 5, max: 4, .. }))
        ));
    }

    #[test]
    fn test_serialized_table() {
        let rules = [MergeRule::new(A, B, 0), MergeRule::new(B, C, 1)];
        let mut bytes = MergeTable::encode(&rules);
        bytes.extend_from_slice(&[0xFF; 3]);
        let table = MergeTable::parse(&bytes).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rank(B, C), Some(1));
        assert_eq!(table.rank(C, B), None);
    }

    #[test]
    fn test_rejects_bad_tables() {
        let mut bytes = MergeTable::encode(&[MergeRule::new(A, B, 0)]);
        bytes[0] = 2;
        assert!(matches!(
            MergeTable::parse(&bytes),
            Err(NodalError::Format(FormatError::InvalidMergeTable(_)))
        ));
        assert!(MergeTable::parse(&[1, 0]).is_err());
        assert!(MergeTable::from_rules([MergeRule::new(A, B, 3), MergeRule::new(B, C, 3)]).is_err());
    }

    #[test]
    fn test_duplicate_pair_keeps_lowest_rank() {
        let table =
            MergeTable::from_rules([MergeRule::new(A, B, 5), MergeRule::new(A, B, 2)]).unwrap();
        assert_eq!(table.rank(A, B), Some(2));
    }
}
