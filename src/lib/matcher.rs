//! Resolve an observed index read against the configured indexes of a lane.
//!
//! A configured index matches when it is within [`MAX_MISMATCHES`] of the observed index.  The
//! observed index is compared only over the length of the configured index; any positions the
//! observed index is missing count as mismatches.  A configured index equal to the observed index
//! wins outright.  Otherwise a read resolves to a sample only when exactly one configured index
//! is one mismatch away; when more than one is, the read is [`ResolvedLabel::Ambiguous`].

use std::cell::RefCell;

use ahash::AHashSet;
use anyhow::anyhow;
use cached::SizedCache;
use clap::{ArgEnum, PossibleValue};

/// The largest number of mismatches at which a configured index still matches.
pub const MAX_MISMATCHES: usize = 1;

/// Counting stops once a distance reaches this value, it can no longer match.
const STOP_AT_DISTANCE: usize = MAX_MISMATCHES + 1;

/// The number of observed indexes remembered by the [`CachedHammingDistanceMatcher`].
const CACHE_SIZE: usize = 100_000;

/// The outcome of resolving one observed index.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum ResolvedLabel {
    /// Exactly one configured index matched.
    Sample { sample_index: usize, mismatches: usize },
    /// No configured index matched.
    Undetermined,
    /// More than one configured index matched.
    Ambiguous,
}

#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    HammingDistance,
    CachedHammingDistance,
}

impl MatcherKind {
    pub fn possible_values<'a>() -> impl Iterator<Item = PossibleValue<'a>> {
        MatcherKind::value_variants().iter().filter_map(ArgEnum::to_possible_value)
    }

    /// Build a matcher of this kind over the configured indexes of one lane.
    pub fn build(self, indexes: Vec<Vec<u8>>) -> Box<dyn Matcher + Send> {
        match self {
            Self::HammingDistance => Box::new(HammingDistanceMatcher::new(indexes)),
            Self::CachedHammingDistance => Box::new(CachedHammingDistanceMatcher::new(indexes)),
        }
    }
}

impl std::str::FromStr for MatcherKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for variant in Self::value_variants() {
            if variant.to_possible_value().map_or(false, |v| v.matches(s, false)) {
                return Ok(*variant);
            }
        }
        Err(anyhow!("Invalid variant: {}", s))
    }
}

/// The base trait for all matching algorithms.
///
/// Implementations must be pure: the same observed index always resolves to the same label.
pub trait Matcher {
    fn resolve(&self, observed: &[u8]) -> ResolvedLabel;

    /// The configured indexes, in sample order.
    fn indexes(&self) -> &[Vec<u8>];
}

/// Compares the observed index against every configured index.
#[derive(Debug, Clone)]
pub struct HammingDistanceMatcher {
    indexes: Vec<Vec<u8>>,
}

impl HammingDistanceMatcher {
    pub fn new(indexes: Vec<Vec<u8>>) -> Self {
        Self { indexes }
    }
}

impl Matcher for HammingDistanceMatcher {
    fn resolve(&self, observed: &[u8]) -> ResolvedLabel {
        resolve_independently(observed, &self.indexes)
    }

    fn indexes(&self) -> &[Vec<u8>] {
        &self.indexes
    }
}

/// A [`HammingDistanceMatcher`] that remembers the labels of recently seen observed indexes.
///
/// The cache is owned by the matcher so lanes demultiplexed concurrently never share entries.
pub struct CachedHammingDistanceMatcher {
    inner: HammingDistanceMatcher,
    cache: RefCell<SizedCache<Vec<u8>, ResolvedLabel>>,
}

impl CachedHammingDistanceMatcher {
    pub fn new(indexes: Vec<Vec<u8>>) -> Self {
        Self {
            inner: HammingDistanceMatcher::new(indexes),
            cache: RefCell::new(SizedCache::with_size(CACHE_SIZE)),
        }
    }
}

impl Matcher for CachedHammingDistanceMatcher {
    fn resolve(&self, observed: &[u8]) -> ResolvedLabel {
        let cache = &mut *self.cache.borrow_mut();
        let key = observed.to_vec();
        if let Some(label) = cached::Cached::cache_get(cache, &key) {
            return *label;
        }
        let label = self.inner.resolve(observed);
        cached::Cached::cache_set(cache, key, label);
        label
    }

    fn indexes(&self) -> &[Vec<u8>] {
        self.inner.indexes()
    }
}

/// Resolve `observed` by computing its distance to each configured index in turn.
fn resolve_independently(observed: &[u8], indexes: &[Vec<u8>]) -> ResolvedLabel {
    // The first candidate at each distance, and how many were seen at that distance
    let mut exact: (Option<usize>, usize) = (None, 0);
    let mut one_mismatch: (Option<usize>, usize) = (None, 0);
    for (sample_index, index) in indexes.iter().enumerate() {
        let candidates = match hamming_distance(observed, index) {
            0 => &mut exact,
            1 => &mut one_mismatch,
            _ => continue,
        };
        candidates.0.get_or_insert(sample_index);
        candidates.1 += 1;
    }
    match (exact, one_mismatch) {
        ((Some(sample_index), 1), _) => ResolvedLabel::Sample { sample_index, mismatches: 0 },
        ((None, _), (Some(sample_index), 1)) => {
            ResolvedLabel::Sample { sample_index, mismatches: 1 }
        }
        ((None, _), (None, _)) => ResolvedLabel::Undetermined,
        _ => ResolvedLabel::Ambiguous,
    }
}

/// Hamming distance of `observed`, truncated to the length of `expected`, from `expected`.
///
/// Positions of `expected` beyond the end of `observed` count as mismatches.  Counting stops at
/// [`STOP_AT_DISTANCE`], so any larger distance is reported as that value.
pub fn hamming_distance(observed: &[u8], expected: &[u8]) -> usize {
    let mut dist = expected.len().saturating_sub(observed.len());
    if dist >= STOP_AT_DISTANCE {
        return STOP_AT_DISTANCE;
    }
    for (a, b) in observed.iter().zip(expected.iter()) {
        if a != b {
            dist += 1;
            if dist >= STOP_AT_DISTANCE {
                break;
            }
        }
    }
    dist
}

/// Reverse complement of a DNA sequence; anything but `ACGT` becomes `N`.
pub fn reverse_complement(bases: &[u8]) -> Vec<u8> {
    bases
        .iter()
        .rev()
        .map(|b| match b.to_ascii_uppercase() {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            _ => b'N',
        })
        .collect()
}

/// Detects observed indexes that are the reverse complement of a configured index, which usually
/// means the index was entered in the wrong orientation in the sample sheet.
#[derive(Debug)]
pub struct ReverseComplementChecker {
    index_length: usize,
    reverse_complements: AHashSet<Vec<u8>>,
}

impl ReverseComplementChecker {
    pub fn new(indexes: &[Vec<u8>]) -> Self {
        let index_length = indexes.first().map_or(0, Vec::len);
        let reverse_complements = indexes
            .iter()
            .map(|index| reverse_complement(index))
            .filter(|rc| !indexes.contains(rc))
            .collect();
        Self { index_length, reverse_complements }
    }

    /// True if the observed index, truncated to the configured length, is exactly the reverse
    /// complement of a configured index.
    pub fn is_reverse_complement(&self, observed: &[u8]) -> bool {
        observed.len() >= self.index_length
            && self.reverse_complements.contains(&observed[..self.index_length])
    }
}
