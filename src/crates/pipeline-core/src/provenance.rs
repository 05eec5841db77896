//! Provenance segments and chains (SPEC_FULL §3).
//!
//! Every message carries an ordered chain of segments recording which
//! `send` produced it and at which fan-out index. Segments are a value
//! type rather than the source's `"uuid:index:fanout"` string so the hot
//! path never re-parses text; `Display`/`FromStr` exist only for the
//! snapshot and logging boundary.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One hop in a provenance chain: `"<uuid>:<index>:<fanout>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvenanceSegment {
    pub uuid: u128,
    pub index: u32,
    pub fanout: u32,
}

impl ProvenanceSegment {
    pub fn new(uuid: u128, index: u32, fanout: u32) -> Self {
        Self {
            uuid,
            index,
            fanout,
        }
    }

    /// A fresh segment for emission `uuid` at fan-out position `index` of
    /// `fanout` total surviving elements.
    pub fn fresh(index: u32, fanout: u32) -> Self {
        Self::new(Uuid::new_v4().as_u128(), index, fanout)
    }

    /// The `"<0:1>"`-shaped suffix used by Alignment rule A (§4.3),
    /// ignoring the uuid.
    pub fn suffix(&self) -> (u32, u32) {
        (self.index, self.fanout)
    }
}

impl fmt::Display for ProvenanceSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}:{}:{}", self.uuid, self.index, self.fanout)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid provenance segment: {0}")]
pub struct ParseSegmentError(String);

impl FromStr for ProvenanceSegment {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (uuid_s, index_s, fanout_s) = match (parts.next(), parts.next(), parts.next()) {
            (Some(u), Some(i), Some(f)) => (u, i, f),
            _ => return Err(ParseSegmentError(s.to_string())),
        };
        let uuid = u128::from_str_radix(uuid_s, 16).map_err(|_| ParseSegmentError(s.to_string()))?;
        let index: u32 = index_s.parse().map_err(|_| ParseSegmentError(s.to_string()))?;
        let fanout: u32 = fanout_s.parse().map_err(|_| ParseSegmentError(s.to_string()))?;
        Ok(Self::new(uuid, index, fanout))
    }
}

/// An ordered sequence of [`ProvenanceSegment`]s shared by all descendants
/// of a single emission chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceChain(pub Vec<ProvenanceSegment>);

impl ProvenanceChain {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments(segments: Vec<ProvenanceSegment>) -> Self {
        Self(segments)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends `segment`, returning a new chain (parents are never
    /// mutated in place — every `send` works from a fresh copy, SPEC_FULL
    /// §4.1).
    pub fn with_appended(&self, segment: ProvenanceSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// Replaces the final segment. Used by the list collector's
    /// completeness rule (§4.4) to mark `"<uuid>:0:1"`.
    pub fn with_last_replaced(&self, segment: ProvenanceSegment) -> Self {
        let mut segments = self.0.clone();
        if let Some(last) = segments.last_mut() {
            *last = segment;
        } else {
            segments.push(segment);
        }
        Self(segments)
    }

    /// `true` if the final segment's suffix is `(0, 1)` — "already the
    /// sole aggregated output of a prior collection" (§4.4 [ADDED]).
    pub fn ends_already_aggregated(&self) -> bool {
        matches!(self.0.last(), Some(seg) if seg.suffix() == (0, 1))
    }

    /// All segments with `fanout > 1`, as suffix pairs — the set used by
    /// Alignment rule A (§4.3).
    pub fn fanout_suffixes(&self) -> Vec<(u32, u32)> {
        self.0
            .iter()
            .filter(|seg| seg.fanout > 1)
            .map(|seg| seg.suffix())
            .collect()
    }

    /// `true` if `self`'s fan-out suffix set is a subset of `other`'s —
    /// the alignment test from §4.3.
    pub fn fanout_suffixes_subset_of(&self, other: &ProvenanceChain) -> bool {
        let other_suffixes = other.fanout_suffixes();
        self.fanout_suffixes()
            .iter()
            .all(|s| other_suffixes.contains(s))
    }

    /// Longest common prefix across several chains, used when an
    /// aggregate multi-input `run` joins messages from several ports
    /// (§4.3).
    pub fn common_prefix(chains: &[ProvenanceChain]) -> ProvenanceChain {
        let Some(first) = chains.first() else {
            return ProvenanceChain::new();
        };
        let mut prefix_len = first.0.len();
        for chain in &chains[1..] {
            let max_len = prefix_len.min(chain.0.len());
            let mut matched = 0;
            while matched < max_len && first.0[matched] == chain.0[matched] {
                matched += 1;
            }
            prefix_len = matched;
        }
        ProvenanceChain(first.0[..prefix_len].to_vec())
    }

    /// Shared prefix with the final segment stripped, joined with `"|"` —
    /// the collector buffer key (§4.6).
    pub fn collector_key(&self) -> String {
        let prefix_len = self.0.len().saturating_sub(1);
        self.0[..prefix_len]
            .iter()
            .map(|seg| seg.to_string())
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|seg| seg.to_string()).collect()
    }

    pub fn from_strings(strings: &[String]) -> Result<Self, ParseSegmentError> {
        let segments = strings
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_round_trips_through_display_and_from_str() {
        let seg = ProvenanceSegment::new(0xdead_beef, 3, 7);
        let parsed: ProvenanceSegment = seg.to_string().parse().unwrap();
        assert_eq!(seg, parsed);
    }

    #[test]
    fn common_prefix_stops_at_first_divergence() {
        let uuid_a = Uuid::new_v4().as_u128();
        let uuid_b = Uuid::new_v4().as_u128();
        let shared = ProvenanceSegment::new(uuid_a, 0, 1);
        let a = ProvenanceChain(vec![shared, ProvenanceSegment::new(uuid_b, 0, 2)]);
        let b = ProvenanceChain(vec![shared, ProvenanceSegment::new(uuid_b, 1, 2)]);
        let prefix = ProvenanceChain::common_prefix(&[a, b]);
        assert_eq!(prefix.0, vec![shared]);
    }

    #[test]
    fn empty_chains_have_empty_common_prefix() {
        assert!(ProvenanceChain::common_prefix(&[]).is_empty());
    }

    #[test]
    fn fanout_suffix_subset_ignores_uuid() {
        let uuid_a = Uuid::new_v4().as_u128();
        let uuid_b = Uuid::new_v4().as_u128();
        let anchor = ProvenanceChain(vec![ProvenanceSegment::new(uuid_a, 2, 5)]);
        let candidate = ProvenanceChain(vec![ProvenanceSegment::new(uuid_b, 2, 5)]);
        assert!(anchor.fanout_suffixes_subset_of(&candidate));
    }

    #[test]
    fn ends_already_aggregated_detects_zero_one_suffix() {
        let chain = ProvenanceChain(vec![ProvenanceSegment::new(1, 0, 1)]);
        assert!(chain.ends_already_aggregated());
        let other = ProvenanceChain(vec![ProvenanceSegment::new(1, 2, 5)]);
        assert!(!other.ends_already_aggregated());
    }
}
