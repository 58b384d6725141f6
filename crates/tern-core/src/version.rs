//! Package version parsing, normalization, and ordering.
//!
//! Versions follow the Python packaging scheme:
//! - `[N!]N(.N)*[{a|b|rc}N][.postN][.devN][+local]`
//! - Trailing zero release segments are insignificant (`1.0 == 1.0.0`)
//! - Within one release: `.devN` < pre-releases < final < `.postN`
//! - A local label sorts after the same version without one
//!
//! Alternate spellings (`1.0-ALPHA.1`, `1.0-1`, `v2`) are accepted and
//! rendered in canonical form by `Display`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::ConstraintError;

/// A parsed, normalized version.
#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<PreRelease>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Vec<LocalSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreKind {
    Alpha,
    Beta,
    Rc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PreRelease {
    pub kind: PreKind,
    pub number: u64,
}

/// Local label segment. Text sorts before numbers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum LocalSegment {
    Text(String),
    Number(u64),
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreRelease),
    Final,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    Released,
}

impl Version {
    /// A final release with the given segments, e.g. `Version::new([2, 25])`.
    pub fn new(release: impl IntoIterator<Item = u64>) -> Self {
        let mut release: Vec<u64> = release.into_iter().collect();
        if release.is_empty() {
            release.push(0);
        }
        Self {
            epoch: 0,
            release,
            pre: None,
            post: None,
            dev: None,
            local: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        Parser::new(input).parse()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn pre(&self) -> Option<PreRelease> {
        self.pre
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// No pre, post, dev or local part: `2.0` but not `2.0.post1`.
    pub fn is_plain_release(&self) -> bool {
        self.pre.is_none() && self.post.is_none() && self.dev.is_none() && self.local.is_empty()
    }

    /// The same version without its local label.
    pub fn without_local(&self) -> Self {
        Self {
            local: Vec::new(),
            ..self.clone()
        }
    }

    /// The smallest version above every local variant of this one:
    /// `1.0` → `1.0.post0.dev0`, `1.0.dev2` → `1.0.dev3`.
    pub fn local_ceiling(&self) -> Self {
        let base = self.without_local();
        match self.dev {
            Some(n) => Self {
                dev: Some(n + 1),
                ..base
            },
            None => Self {
                post: Some(self.post.map_or(0, |p| p + 1)),
                dev: Some(0),
                ..base
            },
        }
    }

    /// For a local ceiling of a version without a dev part
    /// (`1.0.post0.dev0`) the version it caps (`1.0`).
    pub fn ceiling_release(&self) -> Option<Self> {
        match (self.post, self.dev) {
            (Some(post), Some(0)) if self.local.is_empty() => Some(Self {
                post: post.checked_sub(1),
                dev: None,
                ..self.clone()
            }),
            _ => None,
        }
    }

    /// The smallest version of this release series: `1.2` → `1.2.dev0`.
    pub fn series_floor(&self) -> Self {
        Self {
            epoch: self.epoch,
            release: self.release.clone(),
            pre: None,
            post: None,
            dev: Some(0),
            local: Vec::new(),
        }
    }

    /// Floor of the series named by the first `len` release segments:
    /// `1.2.3` with `len = 2` → `1.2.dev0`.
    pub fn prefix_floor(&self, len: usize) -> Self {
        Self {
            release: self.release_prefix(len),
            ..self.series_floor()
        }
    }

    /// Floor of the series after the first `len` release segments:
    /// `1.2.3` with `len = 2` → `1.3.dev0`.
    pub fn next_prefix_floor(&self, len: usize) -> Self {
        let mut release = self.release_prefix(len);
        if let Some(last) = release.last_mut() {
            *last += 1;
        }
        Self {
            release,
            ..self.series_floor()
        }
    }

    /// For a series floor (`1.2.dev0`) the release it opens (`1.2`).
    pub fn floor_release(&self) -> Option<Self> {
        if self.dev == Some(0) && self.pre.is_none() && self.post.is_none() && self.local.is_empty()
        {
            Some(Self {
                dev: None,
                ..self.clone()
            })
        } else {
            None
        }
    }

    fn release_prefix(&self, len: usize) -> Vec<u64> {
        (0..len.max(1))
            .map(|i| self.release.get(i).copied().unwrap_or(0))
            .collect()
    }

    /// Release segments with trailing zeros removed (comparison identity).
    fn significant_release(&self) -> &[u64] {
        let mut end = self.release.len();
        while end > 1 && self.release[end - 1] == 0 {
            end -= 1;
        }
        &self.release[..end]
    }

    fn pre_key(&self) -> PreKey {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => PreKey::DevOnly,
            (Some(pre), _, _) => PreKey::Pre(pre),
            _ => PreKey::Final,
        }
    }

    fn dev_key(&self) -> DevKey {
        match self.dev {
            Some(n) => DevKey::Dev(n),
            None => DevKey::Released,
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_release(&self.release, &other.release))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        self.significant_release().hash(state);
        self.pre.hash(state);
        self.post.hash(state);
        self.dev.hash(state);
        self.local.hash(state);
    }
}

fn compare_release(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        f.write_str(&release.join("."))?;
        if let Some(pre) = self.pre {
            let tag = match pre.kind {
                PreKind::Alpha => "a",
                PreKind::Beta => "b",
                PreKind::Rc => "rc",
            };
            write!(f, "{tag}{}", pre.number)?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{post}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        if !self.local.is_empty() {
            let local: Vec<String> = self
                .local
                .iter()
                .map(|s| match s {
                    LocalSegment::Text(t) => t.clone(),
                    LocalSegment::Number(n) => n.to_string(),
                })
                .collect();
            write!(f, "+{}", local.join("."))?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

struct Parser<'a> {
    original: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(original: &'a str) -> Self {
        let lowered = original.trim().to_ascii_lowercase();
        let body = lowered.strip_prefix('v').unwrap_or(&lowered).to_string();
        Self {
            original,
            chars: body.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: &str) -> ConstraintError {
        ConstraintError::Version {
            input: self.original.to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn number(&mut self) -> Option<u64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits.parse().ok()
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn skip_separator(&mut self) -> bool {
        if self.peek().is_some_and(|c| matches!(c, '.' | '-' | '_')) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Try a `[sep]word[sep]N` suffix; rewinds when `accept` rejects the word.
    fn tagged_suffix(&mut self, accept: impl Fn(&str) -> bool) -> Option<(String, Option<u64>)> {
        let save = self.pos;
        self.skip_separator();
        let word = self.word();
        if word.is_empty() || !accept(&word) {
            self.pos = save;
            return None;
        }
        let before_number = self.pos;
        self.skip_separator();
        let number = self.number();
        if number.is_none() {
            self.pos = before_number;
        }
        Some((word, number))
    }

    fn parse(mut self) -> Result<Version, ConstraintError> {
        if self.chars.is_empty() {
            return Err(self.error("empty version"));
        }

        let mut epoch = 0;
        let first = self.number().ok_or_else(|| self.error("expected a number"))?;
        let mut release = vec![first];
        if self.peek() == Some('!') {
            self.pos += 1;
            epoch = first;
            release.clear();
            release.push(
                self.number()
                    .ok_or_else(|| self.error("expected release after epoch"))?,
            );
        }
        while self.peek() == Some('.')
            && self
                .chars
                .get(self.pos + 1)
                .is_some_and(|c| c.is_ascii_digit())
        {
            self.pos += 1;
            if let Some(n) = self.number() {
                release.push(n);
            }
        }

        let pre = self
            .tagged_suffix(|w| {
                matches!(
                    w,
                    "a" | "alpha" | "b" | "beta" | "c" | "rc" | "pre" | "preview"
                )
            })
            .map(|(word, n)| {
                let kind = match word.as_str() {
                    "a" | "alpha" => PreKind::Alpha,
                    "b" | "beta" => PreKind::Beta,
                    _ => PreKind::Rc,
                };
                PreRelease {
                    kind,
                    number: n.unwrap_or(0),
                }
            });

        let mut post = self
            .tagged_suffix(|w| matches!(w, "post" | "rev" | "r"))
            .map(|(_, n)| n.unwrap_or(0));
        if post.is_none() && self.peek() == Some('-') {
            let save = self.pos;
            self.pos += 1;
            match self.number() {
                Some(n) => post = Some(n),
                None => self.pos = save,
            }
        }

        let dev = self
            .tagged_suffix(|w| w == "dev")
            .map(|(_, n)| n.unwrap_or(0));

        let mut local = Vec::new();
        if self.peek() == Some('+') {
            self.pos += 1;
            let rest: String = self.chars[self.pos..].iter().collect();
            for part in rest.split(['.', '-', '_']) {
                if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(self.error("invalid local version label"));
                }
                local.push(match part.parse::<u64>() {
                    Ok(n) => LocalSegment::Number(n),
                    Err(_) => LocalSegment::Text(part.to_string()),
                });
            }
            self.pos = self.chars.len();
        }

        if self.pos != self.chars.len() {
            return Err(self.error("unexpected trailing characters"));
        }

        Ok(Version {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }
}
