//! Version specifiers and the interval algebra behind them.
//!
//! A textual specifier (`>=2.25, <3`) is a conjunction of clauses. Every
//! clause lowers to a [`VersionSet`]: an ordered list of disjoint,
//! non-adjacent intervals over [`Version`]. Sets are kept in that canonical
//! form by every operation, so emptiness is a length check and equality is
//! structural. Nothing here enumerates versions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

use crate::error::ConstraintError;
use crate::version::Version;

type Interval = (Bound<Version>, Bound<Version>);

/// A set of versions as canonical disjoint intervals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSet {
    segments: Vec<Interval>,
}

impl VersionSet {
    /// The set containing no version. Intersections with it stay empty.
    pub fn empty() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Every version.
    pub fn full() -> Self {
        Self {
            segments: vec![(Bound::Unbounded, Bound::Unbounded)],
        }
    }

    pub fn singleton(v: Version) -> Self {
        Self {
            segments: vec![(Bound::Included(v.clone()), Bound::Included(v))],
        }
    }

    pub fn at_least(v: Version) -> Self {
        Self::from_interval(Bound::Included(v), Bound::Unbounded)
    }

    pub fn greater_than(v: Version) -> Self {
        Self::from_interval(Bound::Excluded(v), Bound::Unbounded)
    }

    pub fn at_most(v: Version) -> Self {
        Self::from_interval(Bound::Unbounded, Bound::Included(v))
    }

    pub fn less_than(v: Version) -> Self {
        Self::from_interval(Bound::Unbounded, Bound::Excluded(v))
    }

    /// `[lower, upper)`
    pub fn between(lower: Version, upper: Version) -> Self {
        Self::from_interval(Bound::Included(lower), Bound::Excluded(upper))
    }

    fn from_interval(lower: Bound<Version>, upper: Bound<Version>) -> Self {
        if interval_is_valid(&lower, &upper) {
            Self {
                segments: vec![(lower, upper)],
            }
        } else {
            Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_full(&self) -> bool {
        matches!(
            self.segments.as_slice(),
            [(Bound::Unbounded, Bound::Unbounded)]
        )
    }

    /// The single version this set admits, if it is a singleton.
    pub fn as_singleton(&self) -> Option<&Version> {
        match self.segments.as_slice() {
            [(Bound::Included(a), Bound::Included(b))] if a == b => Some(a),
            _ => None,
        }
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.segments.iter().any(|(lo, hi)| {
            let above = match lo {
                Bound::Unbounded => true,
                Bound::Included(l) => v >= l,
                Bound::Excluded(l) => v > l,
            };
            let below = match hi {
                Bound::Unbounded => true,
                Bound::Included(h) => v <= h,
                Bound::Excluded(h) => v < h,
            };
            above && below
        })
    }

    pub fn complement(&self) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        let mut start: Option<Bound<Version>> = Some(Bound::Unbounded);
        for (lo, hi) in &self.segments {
            if let Some(s) = start.take() {
                let gap_end = match lo {
                    Bound::Unbounded => None,
                    Bound::Included(v) => Some(Bound::Excluded(v.clone())),
                    Bound::Excluded(v) => Some(Bound::Included(v.clone())),
                };
                if let Some(end) = gap_end {
                    if interval_is_valid(&s, &end) {
                        segments.push((s, end));
                    }
                }
            }
            start = match hi {
                Bound::Unbounded => None,
                Bound::Included(v) => Some(Bound::Excluded(v.clone())),
                Bound::Excluded(v) => Some(Bound::Included(v.clone())),
            };
        }
        if let Some(s) = start {
            segments.push((s, Bound::Unbounded));
        }
        Self { segments }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut segments = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.segments.len() && j < other.segments.len() {
            let (alo, ahi) = &self.segments[i];
            let (blo, bhi) = &other.segments[j];
            let lo = if cmp_lower(alo, blo) == Ordering::Greater {
                alo
            } else {
                blo
            };
            let hi = if cmp_upper(ahi, bhi) == Ordering::Less {
                ahi
            } else {
                bhi
            };
            if interval_is_valid(lo, hi) {
                segments.push((lo.clone(), hi.clone()));
            }
            if cmp_upper(ahi, bhi) == Ordering::Less {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self { segments }.normalized()
    }

    pub fn union(&self, other: &Self) -> Self {
        self.complement()
            .intersection(&other.complement())
            .complement()
    }

    pub fn difference(&self, other: &Self) -> Self {
        self.intersection(&other.complement())
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.intersection(other).is_empty()
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        &self.intersection(other) == self
    }

    /// Merge touching intervals left adjacent by an operation.
    fn normalized(mut self) -> Self {
        let mut merged: Vec<Interval> = Vec::with_capacity(self.segments.len());
        for (lo, hi) in self.segments.drain(..) {
            if let Some((_, prev_hi)) = merged.last_mut() {
                let touches = match (&*prev_hi, &lo) {
                    (Bound::Excluded(a), Bound::Included(b))
                    | (Bound::Included(a), Bound::Excluded(b)) => a == b,
                    (Bound::Included(a), Bound::Included(b)) => a == b,
                    _ => false,
                };
                if touches {
                    *prev_hi = hi;
                    continue;
                }
            }
            merged.push((lo, hi));
        }
        Self { segments: merged }
    }
}

fn cmp_lower(a: &Bound<Version>, b: &Bound<Version>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Less),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Greater),
    }
}

fn cmp_upper(a: &Bound<Version>, b: &Bound<Version>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Greater),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Less),
    }
}

fn interval_is_valid(lo: &Bound<Version>, hi: &Bound<Version>) -> bool {
    match (lo, hi) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
        (Bound::Included(l), Bound::Included(h)) => l <= h,
        (Bound::Included(l), Bound::Excluded(h))
        | (Bound::Excluded(l), Bound::Included(h))
        | (Bound::Excluded(l), Bound::Excluded(h)) => l < h,
    }
}

impl fmt::Display for VersionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("<none>");
        }
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|(lo, hi)| match (lo, hi) {
                (Bound::Unbounded, Bound::Unbounded) => "*".to_string(),
                (Bound::Included(a), Bound::Included(b)) if a == b => format!("=={a}"),
                (Bound::Included(a), Bound::Excluded(b))
                    if !a.is_local() && b == &a.local_ceiling() =>
                {
                    format!("=={a}")
                }
                (lo, hi) => {
                    let mut clauses = Vec::new();
                    match lo {
                        Bound::Included(v) => match (v.floor_release(), v.ceiling_release()) {
                            (Some(release), _) => clauses.push(format!(">={release}")),
                            (None, Some(capped)) => clauses.push(format!(">{capped}")),
                            (None, None) => clauses.push(format!(">={v}")),
                        },
                        Bound::Excluded(v) => clauses.push(format!(">{v}")),
                        Bound::Unbounded => {}
                    }
                    match hi {
                        Bound::Included(v) => clauses.push(format!("<={v}")),
                        Bound::Excluded(v) => match (v.floor_release(), v.ceiling_release()) {
                            (Some(release), _) => clauses.push(format!("<{release}")),
                            (None, Some(capped)) => clauses.push(format!("<={capped}")),
                            (None, None) => clauses.push(format!("<{v}")),
                        },
                        Bound::Unbounded => {}
                    }
                    clauses.join(", ")
                }
            })
            .collect();
        f.write_str(&parts.join(" | "))
    }
}

/// Comparison operator of one specifier clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
    Equal,
    ArbitraryEqual,
    NotEqual,
    Compatible,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::ArbitraryEqual => "===",
            Operator::NotEqual => "!=",
            Operator::Compatible => "~=",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
        }
    }
}

/// A single clause such as `>=2.25` or `==1.4.*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionSpecifier {
    pub operator: Operator,
    pub version: Version,
    pub wildcard: bool,
}

impl VersionSpecifier {
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let s = input.trim();
        let err = |reason: &str| ConstraintError::Specifier {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        const OPERATORS: [(&str, Operator); 8] = [
            ("===", Operator::ArbitraryEqual),
            ("~=", Operator::Compatible),
            ("==", Operator::Equal),
            ("!=", Operator::NotEqual),
            ("<=", Operator::LessEqual),
            (">=", Operator::GreaterEqual),
            ("<", Operator::Less),
            (">", Operator::Greater),
        ];
        let (operator, rest) = OPERATORS
            .iter()
            .find_map(|(tok, op)| s.strip_prefix(tok).map(|rest| (*op, rest.trim())))
            .ok_or_else(|| err("missing comparison operator"))?;

        let (raw_version, wildcard) = match rest.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (rest, false),
        };
        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(err("wildcards are only allowed with == and !="));
        }
        let version = Version::parse(raw_version).map_err(|e| err(&e.to_string()))?;
        if wildcard && (version.is_prerelease() || version.is_local()) {
            return Err(err("wildcard prefix must be a plain release"));
        }
        if operator == Operator::Compatible && version.release().len() < 2 {
            return Err(err("~= needs at least two release segments"));
        }
        Ok(Self {
            operator,
            version,
            wildcard,
        })
    }

    pub fn to_set(&self) -> VersionSet {
        let v = &self.version;
        match (self.operator, self.wildcard) {
            (Operator::Equal, true) => prefix_set(v, v.release().len()),
            (Operator::NotEqual, true) => prefix_set(v, v.release().len()).complement(),
            (Operator::ArbitraryEqual, _) => VersionSet::singleton(v.clone()),
            (Operator::Equal, _) => with_locals(v),
            (Operator::NotEqual, _) => with_locals(v).complement(),
            (Operator::GreaterEqual, _) => VersionSet::at_least(v.clone()),
            // `>1.0` admits neither `1.0` nor `1.0+local`.
            (Operator::Greater, _) if !v.is_local() => VersionSet::at_least(v.local_ceiling()),
            (Operator::Greater, _) => VersionSet::greater_than(v.clone()),
            (Operator::LessEqual, _) if !v.is_local() => VersionSet::less_than(v.local_ceiling()),
            (Operator::LessEqual, _) => VersionSet::at_most(v.clone()),
            (Operator::Less, _) => {
                // `<2.0` must not admit `2.0a1`.
                if v.is_plain_release() {
                    VersionSet::less_than(v.series_floor())
                } else {
                    VersionSet::less_than(v.clone())
                }
            }
            (Operator::Compatible, _) => VersionSet::at_least(v.clone())
                .intersection(&prefix_set(v, v.release().len() - 1)),
        }
    }
}

/// `v` itself; without a local label of its own, also every `v+local`.
fn with_locals(v: &Version) -> VersionSet {
    if v.is_local() {
        VersionSet::singleton(v.clone())
    } else {
        VersionSet::between(v.clone(), v.local_ceiling())
    }
}

/// Every version whose first `len` release segments equal `v`'s.
fn prefix_set(v: &Version, len: usize) -> VersionSet {
    VersionSet::between(v.prefix_floor(len), v.next_prefix_floor(len))
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.as_str(), self.version)?;
        if self.wildcard {
            f.write_str(".*")?;
        }
        Ok(())
    }
}

/// A conjunction of clauses. The empty conjunction admits every version.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionSpecifiers(Vec<VersionSpecifier>);

impl VersionSpecifiers {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::any());
        }
        trimmed
            .split(',')
            .map(VersionSpecifier::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn clauses(&self) -> &[VersionSpecifier] {
        &self.0
    }

    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_set(&self) -> VersionSet {
        self.0
            .iter()
            .fold(VersionSet::full(), |acc, clause| acc.intersection(&clause.to_set()))
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.to_set().contains(v)
    }

    /// False when the clauses contradict each other (`>=3, <2`).
    pub fn is_satisfiable(&self) -> bool {
        !self.to_set().is_empty()
    }

    /// Whether a clause names a pre-release, opting the package into them.
    pub fn mentions_prerelease(&self) -> bool {
        self.0.iter().any(|c| c.version.is_prerelease())
    }

    /// Conjunction of two specifier lists.
    pub fn and(&self, other: &Self) -> Self {
        let mut clauses = self.0.clone();
        for clause in &other.0 {
            if !clauses.contains(clause) {
                clauses.push(clause.clone());
            }
        }
        Self(clauses)
    }
}

impl fmt::Display for VersionSpecifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(", "))
    }
}

impl FromStr for VersionSpecifiers {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionSpecifiers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSpecifiers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn set(s: &str) -> VersionSet {
        VersionSpecifiers::parse(s).unwrap().to_set()
    }

    #[test]
    fn range_membership() {
        let s = set(">=2.25, <3.0");
        assert!(s.contains(&v("2.25")));
        assert!(s.contains(&v("2.31.0")));
        assert!(!s.contains(&v("3.0")));
        assert!(!s.contains(&v("2.24.9")));
    }

    #[test]
    fn less_than_excludes_prereleases_of_bound() {
        let s = set("<2.0");
        assert!(!s.contains(&v("2.0a1")));
        assert!(s.contains(&v("1.9.9")));
        assert!(set("<2.0rc1").contains(&v("2.0b3")));
    }

    #[test]
    fn wildcard_equality() {
        let s = set("==1.4.*");
        assert!(s.contains(&v("1.4")));
        assert!(s.contains(&v("1.4.99")));
        assert!(!s.contains(&v("1.5")));
        let ne = set("!=1.4.*");
        assert!(ne.contains(&v("1.5")));
        assert!(!ne.contains(&v("1.4.2")));
    }

    #[test]
    fn compatible_release() {
        let s = set("~=1.4.5");
        assert!(s.contains(&v("1.4.5")));
        assert!(s.contains(&v("1.4.9")));
        assert!(!s.contains(&v("1.5.0")));
        let s2 = set("~=2.2");
        assert!(s2.contains(&v("2.9")));
        assert!(!s2.contains(&v("3.0")));
    }

    #[test]
    fn contradiction_is_detectable_and_propagates() {
        let impossible = set(">=3, <2");
        assert!(impossible.is_empty());
        assert!(impossible.intersection(&set(">=1")).is_empty());
        assert!(!VersionSpecifiers::parse(">=3, <2").unwrap().is_satisfiable());
    }

    #[test]
    fn complement_round_trip() {
        let s = set(">=1.0, <2.0");
        assert_eq!(s.complement().complement(), s);
        assert!(s.complement().contains(&v("0.9")));
        assert!(s.complement().contains(&v("2.0")));
        assert_eq!(VersionSet::full().complement(), VersionSet::empty());
    }

    #[test]
    fn union_merges_adjacent() {
        let a = VersionSet::between(v("1.0"), v("2.0"));
        let b = VersionSet::at_least(v("2.0"));
        assert_eq!(a.union(&b), VersionSet::at_least(v("1.0")));
    }

    #[test]
    fn subset_and_difference() {
        let narrow = set(">=1.5, <1.8");
        let wide = set(">=1.0, <2.0");
        assert!(narrow.is_subset_of(&wide));
        assert!(!wide.is_subset_of(&narrow));
        let diff = wide.difference(&narrow);
        assert!(diff.contains(&v("1.2")));
        assert!(!diff.contains(&v("1.6")));
    }

    #[test]
    fn not_equal_splits_range() {
        let s = set("!=1.5");
        assert!(s.contains(&v("1.4")));
        assert!(!s.contains(&v("1.5")));
        assert!(s.contains(&v("1.6")));
    }

    #[test]
    fn specifier_display_round_trip() {
        let spec = VersionSpecifiers::parse(">= 2.25 ,<3,!=2.27.*").unwrap();
        assert_eq!(spec.to_string(), ">=2.25, <3, !=2.27.*");
        assert_eq!(VersionSpecifiers::parse(&spec.to_string()).unwrap(), spec);
    }

    #[test]
    fn rejects_malformed_clauses() {
        assert!(VersionSpecifiers::parse("2.0").is_err());
        assert!(VersionSpecifiers::parse(">=1.*").is_err());
        assert!(VersionSpecifiers::parse("~=1").is_err());
        assert!(VersionSpecifiers::parse(">=abc").is_err());
    }

    #[test]
    fn set_display() {
        assert_eq!(set(">=2.0").to_string(), ">=2.0");
        assert_eq!(VersionSet::singleton(v("1.0")).to_string(), "==1.0");
        assert_eq!(VersionSet::full().to_string(), "*");
        assert_eq!(VersionSet::empty().to_string(), "<none>");
        assert_eq!(set(">=1.4.2, <2").to_string(), ">=1.4.2, <2");
        assert_eq!(set("~=1.4.2").to_string(), ">=1.4.2, <1.5");
        assert_eq!(set("==1.0").to_string(), "==1.0");
        assert_eq!(set("<=1.0").to_string(), "<=1.0");
        assert_eq!(set(">1.0").to_string(), ">1.0");
    }

    #[test]
    fn lower_bounds_fold_back_to_releases() {
        assert_eq!(set("<2.0").complement().to_string(), ">=2.0");
        let shared = set("==1.0").union(&set("<2.0").complement());
        assert_eq!(shared.to_string(), "==1.0 | >=2.0");
    }

    #[test]
    fn plain_versions_admit_their_local_variants() {
        assert!(set("==1.0").contains(&v("1.0+cpu")));
        assert!(set("<=1.0").contains(&v("1.0+cpu")));
        assert!(!set("!=1.0").contains(&v("1.0+cpu")));
        assert!(!set(">1.0").contains(&v("1.0+cpu")));
        assert!(set(">1.0").contains(&v("1.0.post1")));
        assert!(!set("==1.0").contains(&v("1.0.post0")));
        assert!(!set("==1.0+cpu").contains(&v("1.0+gpu")));
        assert!(set("==1.0+cpu").contains(&v("1.0+cpu")));
        assert!(set(">=1.0+cpu").contains(&v("1.0+gpu")));
    }
}
