use std::convert::TryFrom;
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

pub type VariationIndex = usize;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

// Allowed rounding slack when checking that weights do not over-allocate.
const WEIGHT_TOLERANCE: f64 = 1e-6;

// Range ends are rounded to a multiple of 1 / RANGE_END_SCALE, far finer than any hash output,
// so summation error never moves an end past a bucket the weights leave unallocated.
const RANGE_END_SCALE: f64 = 1e9;

/// Selects the bucketing hash. Every implementation of the protocol must produce identical
/// buckets for a given version, so existing versions can never change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HashVersion {
    /// `fnv1a32(value + seed) % 1000 / 1000`
    #[default]
    V1,
    /// `fnv1a32(fnv1a32(seed + value).to_string()) % 10000 / 10000`; finer grained and less
    /// prone to correlation between experiments with similar seeds.
    V2,
}

#[derive(Debug, PartialEq)]
pub struct UnsupportedHashVersion(u8);

impl fmt::Display for UnsupportedHashVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported hash version {}", self.0)
    }
}

impl TryFrom<u8> for HashVersion {
    type Error = UnsupportedHashVersion;

    fn try_from(version: u8) -> Result<Self, Self::Error> {
        match version {
            1 => Ok(HashVersion::V1),
            2 => Ok(HashVersion::V2),
            other => Err(UnsupportedHashVersion(other)),
        }
    }
}

impl From<HashVersion> for u8 {
    fn from(version: HashVersion) -> Self {
        match version {
            HashVersion::V1 => 1,
            HashVersion::V2 => 2,
        }
    }
}

// 32-bit FNV-1a over UTF-16 code units, which is what sibling implementations hash.
fn fnv1a32(s: &str) -> u32 {
    s.encode_utf16().fold(FNV_OFFSET_BASIS, |hash, unit| {
        (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministically maps `seed` and `value` to a bucket in `[0, 1)`.
pub fn hash(seed: &str, value: &str, version: HashVersion) -> f64 {
    match version {
        HashVersion::V1 => {
            let mut input = String::with_capacity(value.len() + seed.len());
            input.push_str(value);
            input.push_str(seed);
            f64::from(fnv1a32(&input) % 1000) / 1000.0
        }
        HashVersion::V2 => {
            let mut input = String::with_capacity(value.len() + seed.len());
            input.push_str(seed);
            input.push_str(value);
            let first = fnv1a32(&input).to_string();
            f64::from(fnv1a32(&first) % 10_000) / 10_000.0
        }
    }
}

/// Splits the whole range evenly between `num_variations`.
pub fn equal_weights(num_variations: usize) -> Vec<f64> {
    if num_variations == 0 {
        return vec![];
    }
    vec![1.0 / num_variations as f64; num_variations]
}

/// Returns the weights to bucket with: `weights` when they are usable for `num_variations`,
/// an equal split otherwise.
///
/// Weights are usable when there is one per variation, none is negative, and together they
/// allocate at most the whole range. Whatever they leave unallocated is an excluded bucket.
pub fn effective_weights(num_variations: usize, weights: Option<&[f64]>) -> Vec<f64> {
    let weights = match weights {
        Some(weights) => weights,
        None => return equal_weights(num_variations),
    };

    if weights.len() != num_variations {
        warn!(
            "{} weights given for {} variations; using an equal split",
            weights.len(),
            num_variations
        );
        return equal_weights(num_variations);
    }

    let total: f64 = weights.iter().sum();
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || total > 1.0 + WEIGHT_TOLERANCE {
        warn!(
            "weights {:?} do not describe a valid allocation; using an equal split",
            weights
        );
        return equal_weights(num_variations);
    }

    weights.to_vec()
}

/// Clamps a coverage fraction into `[0, 1]`; absent coverage means everyone.
pub(crate) fn effective_coverage(coverage: Option<f64>) -> f64 {
    match coverage {
        None => 1.0,
        Some(c) if c.is_nan() => 0.0,
        Some(c) => c.clamp(0.0, 1.0),
    }
}

/// Picks the variation whose range contains `bucket`.
///
/// Ranges are laid end to end from zero, each `weight * coverage` wide, so lowering coverage
/// shrinks every range proportionally and leaves buckets above the scaled total unassigned.
pub fn choose_variation(bucket: f64, weights: &[f64], coverage: f64) -> Option<VariationIndex> {
    let mut cumulative = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        cumulative += weight * coverage;
        if bucket < range_end(cumulative) {
            return Some(index);
        }
    }
    None
}

// `[0.1, 0.2]` accumulates to 0.30000000000000004, which must still end at 0.3.
fn range_end(cumulative: f64) -> f64 {
    (cumulative * RANGE_END_SCALE).round() / RANGE_END_SCALE
}

/// A slice of a shared hash space.
///
/// Experiments in the same namespace with disjoint ranges never share a participant. Encoded as
/// an `[id, rangeStart, rangeEnd]` tuple.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(from = "(String, f64, f64)", into = "(String, f64, f64)")]
pub struct Namespace {
    pub id: String,
    pub range_start: f64,
    pub range_end: f64,
}

impl Namespace {
    pub fn new(id: impl Into<String>, range_start: f64, range_end: f64) -> Self {
        Namespace {
            id: id.into(),
            range_start,
            range_end,
        }
    }

    /// Returns true if a subject identified by `hash_value` falls in this namespace's range.
    pub fn contains(&self, hash_value: &str) -> bool {
        let seed = format!("__{}", self.id);
        let n = hash(&seed, hash_value, HashVersion::V1);
        n >= self.range_start && n < self.range_end
    }
}

impl From<(String, f64, f64)> for Namespace {
    fn from((id, range_start, range_end): (String, f64, f64)) -> Self {
        Namespace {
            id,
            range_start,
            range_end,
        }
    }
}

impl From<Namespace> for (String, f64, f64) {
    fn from(ns: Namespace) -> Self {
        (ns.id, ns.range_start, ns.range_end)
    }
}

/// Returns true if the subject identified by `hash_value` falls within `namespace`.
pub fn in_namespace(hash_value: &str, namespace: &Namespace) -> bool {
    namespace.contains(hash_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("", "a", HashVersion::V1, 0.22)]
    #[test_case("", "b", HashVersion::V1, 0.077)]
    #[test_case("b", "a", HashVersion::V1, 0.946)]
    #[test_case("ef", "d", HashVersion::V1, 0.652)]
    #[test_case("asdf", "8952klfjas09ujkasdf", HashVersion::V1, 0.335)]
    #[test_case("", "123", HashVersion::V1, 0.011)]
    #[test_case("", "a", HashVersion::V2, 0.0216)]
    #[test_case("", "b", HashVersion::V2, 0.9054)]
    #[test_case("b", "a", HashVersion::V2, 0.665)]
    #[test_case("ef", "d", HashVersion::V2, 0.8601)]
    #[test_case("asdf", "8952klfjas09ujkasdf", HashVersion::V2, 0.5491)]
    fn hash_matches_reference_values(seed: &str, value: &str, version: HashVersion, expected: f64) {
        let actual = hash(seed, value, version);
        assert!(
            (actual - expected).abs() < 1e-9,
            "hash({:?}, {:?}) = {}, expected {}",
            seed,
            value,
            actual,
            expected
        );
    }

    #[test]
    fn fnv_hashes_utf16_code_units() {
        assert_eq!(fnv1a32(""), FNV_OFFSET_BASIS);
        assert_eq!(fnv1a32("a"), 0xe40c_292c);
        assert_eq!(fnv1a32("é"), 1_812_687_940);
        assert_eq!(fnv1a32("😀"), 3_409_036_472, "surrogate pairs hash as two units");
    }

    #[test]
    fn parses_hash_versions() {
        assert_eq!(serde_json::from_str::<HashVersion>("2").unwrap(), HashVersion::V2);
        assert!(serde_json::from_str::<HashVersion>("3").is_err());
        assert_eq!(serde_json::to_string(&HashVersion::V1).unwrap(), "1");
    }

    #[test]
    fn weights_fall_back_to_equal_split() {
        assert_eq!(effective_weights(2, None), vec![0.5, 0.5]);
        assert_eq!(effective_weights(2, Some(&[0.2, 0.3])), vec![0.2, 0.3]);
        assert_eq!(effective_weights(3, Some(&[0.5, 0.5])), equal_weights(3));
        assert_eq!(effective_weights(2, Some(&[0.7, 0.7])), vec![0.5, 0.5]);
        assert_eq!(effective_weights(2, Some(&[1.5, -0.5])), vec![0.5, 0.5]);
        assert_eq!(effective_weights(0, None), Vec::<f64>::new());
    }

    #[test]
    fn coverage_is_clamped() {
        assert_eq!(effective_coverage(None), 1.0);
        assert_eq!(effective_coverage(Some(1.5)), 1.0);
        assert_eq!(effective_coverage(Some(-1.0)), 0.0);
        assert_eq!(effective_coverage(Some(f64::NAN)), 0.0);
        assert_eq!(effective_coverage(Some(0.25)), 0.25);
    }

    #[test]
    fn chooses_variation_by_range() {
        let weights = [0.5, 0.5];
        assert_eq!(choose_variation(0.0, &weights, 1.0), Some(0));
        assert_eq!(choose_variation(0.499, &weights, 1.0), Some(0));
        assert_eq!(choose_variation(0.5, &weights, 1.0), Some(1));
        assert_eq!(choose_variation(0.999, &weights, 1.0), Some(1));

        assert_eq!(choose_variation(0.2, &weights, 0.5), Some(0));
        assert_eq!(choose_variation(0.3, &weights, 0.5), Some(1));
        assert_eq!(
            choose_variation(0.5, &weights, 0.5),
            None,
            "above the scaled total is unassigned"
        );

        let partial = [0.1, 0.2];
        assert_eq!(choose_variation(0.25, &partial, 1.0), Some(1));
        assert_eq!(
            choose_variation(0.3, &partial, 1.0),
            None,
            "unallocated remainder is excluded"
        );

        assert_eq!(choose_variation(0.299, &partial, 1.0), Some(1));
        assert_eq!(choose_variation(0.6, &[0.2, 0.4], 1.0), None);
        assert_eq!(choose_variation(0.5999, &[0.2, 0.4], 1.0), Some(1));
        assert_eq!(choose_variation(0.7, &[0.1, 0.2, 0.4], 1.0), None);
        assert_eq!(choose_variation(0.3, &[0.1, 0.2, 0.7], 1.0), Some(2));

        assert_eq!(choose_variation(0.0, &[0.0, 1.0], 1.0), Some(1));
        assert_eq!(choose_variation(0.0, &[], 1.0), None);
    }

    #[test]
    fn namespace_membership() {
        // "__pricing" buckets: "123" => 0.169, "1" => 0.764
        let lower = Namespace::new("pricing", 0.0, 0.5);
        let upper = Namespace::new("pricing", 0.5, 1.0);

        assert!(in_namespace("123", &lower));
        assert!(!in_namespace("123", &upper));
        assert!(!in_namespace("1", &lower));
        assert!(in_namespace("1", &upper));
    }

    #[test]
    fn namespace_serializes_as_tuple() {
        let ns: Namespace = serde_json::from_str(r#"["pricing", 0, 0.5]"#).unwrap();
        assert_eq!(ns, Namespace::new("pricing", 0.0, 0.5));
        assert_eq!(
            serde_json::to_string(&ns).unwrap(),
            r#"["pricing",0.0,0.5]"#
        );
    }

    proptest! {
        #[test]
        fn hash_is_deterministic_and_in_range(seed in ".*", value in ".*", v2 in any::<bool>()) {
            let version = if v2 { HashVersion::V2 } else { HashVersion::V1 };
            let n = hash(&seed, &value, version);
            prop_assert!((0.0..1.0).contains(&n));
            prop_assert_eq!(n, hash(&seed, &value, version));
        }
    }

    proptest! {
        #[test]
        fn lower_coverage_never_includes_more(
            bucket in 0.0..1.0f64,
            high in 0.0..=1.0f64,
            fraction in 0.0..=1.0f64,
        ) {
            let low = high * fraction;
            let weights = equal_weights(3);
            if choose_variation(bucket, &weights, low).is_some() {
                prop_assert!(choose_variation(bucket, &weights, high).is_some());
            }
        }
    }

    proptest! {
        #[test]
        fn disjoint_namespace_ranges_are_exclusive(value in ".+", split in 0.0..=1.0f64) {
            let first = Namespace::new("shared", 0.0, split);
            let second = Namespace::new("shared", split, 1.0);
            prop_assert!(!(in_namespace(&value, &first) && in_namespace(&value, &second)));
        }
    }

    proptest! {
        #[test]
        fn unallocated_buckets_are_excluded(
            step in 0u32..1000,
            tenths in prop::collection::vec(0u32..=3, 2..=4),
        ) {
            // Hash outputs and typical weights both sit on decimal grids.
            let bucket = f64::from(step) / 1000.0;
            let weights: Vec<f64> = tenths.iter().map(|t| f64::from(*t) / 10.0).collect();
            let allocated = f64::from(tenths.iter().sum::<u32>()) / 10.0;
            if bucket >= allocated {
                prop_assert_eq!(choose_variation(bucket, &weights, 1.0), None);
            } else {
                prop_assert!(choose_variation(bucket, &weights, 1.0).is_some());
            }
        }
    }
}
