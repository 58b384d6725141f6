//! Environment markers: boolean predicates over target facts.
//!
//! A marker is a closed tree of comparison leaves joined by `and`/`or`,
//! with negation pushed into the leaf operator wherever one exists.
//! Constructors flatten nested same-kind nodes and fold constants, so the
//! tree printed by `Display` parses back to an identical tree.
//!
//! Universal resolution keeps markers symbolic; single-target resolution
//! evaluates them against a [`TargetEnvironment`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::environment::TargetEnvironment;
use crate::error::ConstraintError;
use crate::name::ExtraName;
use crate::specifier::{Operator, VersionSpecifier};
use crate::version::Version;

/// The fact a marker leaf inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerKey {
    PythonVersion,
    PythonFullVersion,
    OsName,
    SysPlatform,
    PlatformSystem,
    PlatformMachine,
    ImplementationName,
    Extra,
}

impl MarkerKey {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerKey::PythonVersion => "python_version",
            MarkerKey::PythonFullVersion => "python_full_version",
            MarkerKey::OsName => "os_name",
            MarkerKey::SysPlatform => "sys_platform",
            MarkerKey::PlatformSystem => "platform_system",
            MarkerKey::PlatformMachine => "platform_machine",
            MarkerKey::ImplementationName => "implementation_name",
            MarkerKey::Extra => "extra",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "python_version" => MarkerKey::PythonVersion,
            "python_full_version" => MarkerKey::PythonFullVersion,
            "os_name" => MarkerKey::OsName,
            "sys_platform" => MarkerKey::SysPlatform,
            "platform_system" => MarkerKey::PlatformSystem,
            "platform_machine" => MarkerKey::PlatformMachine,
            "implementation_name" => MarkerKey::ImplementationName,
            "extra" => MarkerKey::Extra,
            _ => return None,
        })
    }

    fn is_version(self) -> bool {
        matches!(self, MarkerKey::PythonVersion | MarkerKey::PythonFullVersion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerOperator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compatible,
    ArbitraryEqual,
    /// `key in "value"`: the fact is a substring of the value.
    In,
    NotIn,
    /// `"value" in key`: the value is a substring of the fact.
    Contains,
    NotContains,
}

impl MarkerOperator {
    fn as_str(self) -> &'static str {
        match self {
            MarkerOperator::Equal => "==",
            MarkerOperator::NotEqual => "!=",
            MarkerOperator::Less => "<",
            MarkerOperator::LessEqual => "<=",
            MarkerOperator::Greater => ">",
            MarkerOperator::GreaterEqual => ">=",
            MarkerOperator::Compatible => "~=",
            MarkerOperator::ArbitraryEqual => "===",
            MarkerOperator::In | MarkerOperator::Contains => "in",
            MarkerOperator::NotIn | MarkerOperator::NotContains => "not in",
        }
    }

    fn negated(self) -> Option<Self> {
        Some(match self {
            MarkerOperator::Equal => MarkerOperator::NotEqual,
            MarkerOperator::NotEqual => MarkerOperator::Equal,
            MarkerOperator::Less => MarkerOperator::GreaterEqual,
            MarkerOperator::GreaterEqual => MarkerOperator::Less,
            MarkerOperator::LessEqual => MarkerOperator::Greater,
            MarkerOperator::Greater => MarkerOperator::LessEqual,
            MarkerOperator::In => MarkerOperator::NotIn,
            MarkerOperator::NotIn => MarkerOperator::In,
            MarkerOperator::Contains => MarkerOperator::NotContains,
            MarkerOperator::NotContains => MarkerOperator::Contains,
            MarkerOperator::Compatible | MarkerOperator::ArbitraryEqual => return None,
        })
    }

    /// Operator seen from the other side: `"3.8" <= python_version`.
    fn flipped(self) -> Self {
        match self {
            MarkerOperator::Less => MarkerOperator::Greater,
            MarkerOperator::LessEqual => MarkerOperator::GreaterEqual,
            MarkerOperator::Greater => MarkerOperator::Less,
            MarkerOperator::GreaterEqual => MarkerOperator::LessEqual,
            MarkerOperator::In => MarkerOperator::Contains,
            MarkerOperator::NotIn => MarkerOperator::NotContains,
            other => other,
        }
    }
}

/// One comparison leaf.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerExpression {
    pub key: MarkerKey,
    pub operator: MarkerOperator,
    pub value: String,
}

impl MarkerExpression {
    fn new(key: MarkerKey, operator: MarkerOperator, value: String) -> Result<Self, String> {
        if key.is_version()
            && !matches!(
                operator,
                MarkerOperator::In
                    | MarkerOperator::NotIn
                    | MarkerOperator::Contains
                    | MarkerOperator::NotContains
            )
        {
            VersionSpecifier::parse(&format!("{}{}", operator.as_str(), value))
                .map_err(|e| e.to_string())?;
        }
        let value = if key == MarkerKey::Extra {
            ExtraName::new(&value)
                .map_err(|e| e.to_string())?
                .to_string()
        } else {
            value
        };
        Ok(Self {
            key,
            operator,
            value,
        })
    }

    /// The `python_full_version` leaf matching one `requires-python`
    /// clause.
    pub fn python_full_version(clause: &VersionSpecifier) -> Self {
        let operator = match clause.operator {
            Operator::Equal => MarkerOperator::Equal,
            Operator::ArbitraryEqual => MarkerOperator::ArbitraryEqual,
            Operator::NotEqual => MarkerOperator::NotEqual,
            Operator::Compatible => MarkerOperator::Compatible,
            Operator::Less => MarkerOperator::Less,
            Operator::LessEqual => MarkerOperator::LessEqual,
            Operator::Greater => MarkerOperator::Greater,
            Operator::GreaterEqual => MarkerOperator::GreaterEqual,
        };
        let value = if clause.wildcard {
            format!("{}.*", clause.version)
        } else {
            clause.version.to_string()
        };
        Self {
            key: MarkerKey::PythonFullVersion,
            operator,
            value,
        }
    }

    pub fn evaluate(&self, env: &TargetEnvironment, extras: &[ExtraName]) -> bool {
        let fact: &str = match self.key {
            MarkerKey::Extra => return self.evaluate_extra(extras),
            MarkerKey::PythonVersion | MarkerKey::PythonFullVersion => {
                let version = if self.key == MarkerKey::PythonVersion {
                    &env.python_version
                } else {
                    &env.python_full_version
                };
                return self.evaluate_version(version);
            }
            MarkerKey::OsName => &env.os_name,
            MarkerKey::SysPlatform => &env.sys_platform,
            MarkerKey::PlatformSystem => &env.platform_system,
            MarkerKey::PlatformMachine => &env.platform_machine,
            MarkerKey::ImplementationName => &env.implementation_name,
        };
        let value = self.value.as_str();
        match self.operator {
            MarkerOperator::Equal | MarkerOperator::Compatible | MarkerOperator::ArbitraryEqual => {
                fact == value
            }
            MarkerOperator::NotEqual => fact != value,
            MarkerOperator::Less => fact < value,
            MarkerOperator::LessEqual => fact <= value,
            MarkerOperator::Greater => fact > value,
            MarkerOperator::GreaterEqual => fact >= value,
            MarkerOperator::In => value.contains(fact),
            MarkerOperator::NotIn => !value.contains(fact),
            MarkerOperator::Contains => fact.contains(value),
            MarkerOperator::NotContains => !fact.contains(value),
        }
    }

    fn evaluate_version(&self, version: &Version) -> bool {
        let listed = || {
            self.value
                .split_whitespace()
                .filter_map(|v| Version::parse(v).ok())
                .any(|v| &v == version)
        };
        match self.operator {
            MarkerOperator::In => listed(),
            MarkerOperator::NotIn => !listed(),
            MarkerOperator::Contains => version.to_string().contains(&self.value),
            MarkerOperator::NotContains => !version.to_string().contains(&self.value),
            op => VersionSpecifier::parse(&format!("{}{}", op.as_str(), self.value))
                .map(|spec| spec.to_set().contains(version))
                .unwrap_or(false),
        }
    }

    fn evaluate_extra(&self, extras: &[ExtraName]) -> bool {
        let active = extras.iter().any(|e| e.as_str() == self.value);
        match self.operator {
            MarkerOperator::NotEqual | MarkerOperator::NotIn | MarkerOperator::NotContains => {
                !active
            }
            _ => active,
        }
    }
}

impl fmt::Display for MarkerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted = if self.value.contains('"') {
            format!("'{}'", self.value)
        } else {
            format!("\"{}\"", self.value)
        };
        match self.operator {
            MarkerOperator::Contains | MarkerOperator::NotContains => {
                write!(f, "{quoted} {} {}", self.operator.as_str(), self.key.as_str())
            }
            op => write!(f, "{} {} {quoted}", self.key.as_str(), op.as_str()),
        }
    }
}

/// A marker predicate tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerTree {
    True,
    False,
    Expression(MarkerExpression),
    And(Vec<MarkerTree>),
    Or(Vec<MarkerTree>),
    /// Negation of a leaf whose operator has no inverse (`~=`, `===`).
    Not(Box<MarkerTree>),
}

impl MarkerTree {
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let tokens = tokenize(input).map_err(|reason| ConstraintError::Marker {
            input: input.to_string(),
            reason,
        })?;
        let mut parser = MarkerParser { tokens, pos: 0 };
        let tree = parser.or_expr();
        let tree = tree.and_then(|t| {
            if parser.pos == parser.tokens.len() {
                Ok(t)
            } else {
                Err("unexpected trailing input".to_string())
            }
        });
        tree.map_err(|reason| ConstraintError::Marker {
            input: input.to_string(),
            reason,
        })
    }

    pub fn expression(key: MarkerKey, operator: MarkerOperator, value: &str) -> Self {
        match MarkerExpression::new(key, operator, value.to_string()) {
            Ok(expr) => MarkerTree::Expression(expr),
            Err(_) => MarkerTree::Expression(MarkerExpression {
                key,
                operator,
                value: value.to_string(),
            }),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, MarkerTree::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, MarkerTree::False)
    }

    /// Conjunction with constant folding and flattening.
    pub fn and(self, other: MarkerTree) -> MarkerTree {
        combine(self, other, true)
    }

    /// Disjunction with constant folding and flattening.
    pub fn or(self, other: MarkerTree) -> MarkerTree {
        combine(self, other, false)
    }

    pub fn negate(&self) -> MarkerTree {
        match self {
            MarkerTree::True => MarkerTree::False,
            MarkerTree::False => MarkerTree::True,
            MarkerTree::Expression(expr) => match expr.operator.negated() {
                Some(op) => MarkerTree::Expression(MarkerExpression {
                    operator: op,
                    ..expr.clone()
                }),
                None => MarkerTree::Not(Box::new(self.clone())),
            },
            MarkerTree::And(children) => children
                .iter()
                .map(MarkerTree::negate)
                .fold(MarkerTree::False, MarkerTree::or),
            MarkerTree::Or(children) => children
                .iter()
                .map(MarkerTree::negate)
                .fold(MarkerTree::True, MarkerTree::and),
            MarkerTree::Not(inner) => (**inner).clone(),
        }
    }

    pub fn evaluate(&self, env: &TargetEnvironment, extras: &[ExtraName]) -> bool {
        match self {
            MarkerTree::True => true,
            MarkerTree::False => false,
            MarkerTree::Expression(expr) => expr.evaluate(env, extras),
            MarkerTree::And(children) => children.iter().all(|c| c.evaluate(env, extras)),
            MarkerTree::Or(children) => children.iter().any(|c| c.evaluate(env, extras)),
            MarkerTree::Not(inner) => !inner.evaluate(env, extras),
        }
    }

    /// Every leaf in the tree, in order of appearance.
    pub fn expressions(&self) -> Vec<&MarkerExpression> {
        let mut out = Vec::new();
        self.collect_expressions(&mut out);
        out
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a MarkerExpression>) {
        match self {
            MarkerTree::True | MarkerTree::False => {}
            MarkerTree::Expression(expr) => out.push(expr),
            MarkerTree::And(children) | MarkerTree::Or(children) => {
                for child in children {
                    child.collect_expressions(out);
                }
            }
            MarkerTree::Not(inner) => inner.collect_expressions(out),
        }
    }

    /// Whether any leaf tests `extra`.
    pub fn mentions_extra(&self) -> bool {
        self.expressions().iter().any(|e| e.key == MarkerKey::Extra)
    }

    /// Replace every `extra` leaf by its truth value under `extras`,
    /// leaving the environment part of the marker symbolic.
    pub fn assume_extras(&self, extras: &[ExtraName]) -> MarkerTree {
        match self {
            MarkerTree::Expression(expr) if expr.key == MarkerKey::Extra => {
                if expr.evaluate_extra(extras) {
                    MarkerTree::True
                } else {
                    MarkerTree::False
                }
            }
            MarkerTree::And(children) => children
                .iter()
                .map(|c| c.assume_extras(extras))
                .fold(MarkerTree::True, MarkerTree::and),
            MarkerTree::Or(children) => children
                .iter()
                .map(|c| c.assume_extras(extras))
                .fold(MarkerTree::False, MarkerTree::or),
            MarkerTree::Not(inner) => inner.assume_extras(extras).negate(),
            other => other.clone(),
        }
    }

    /// `None` for an always-true marker.
    pub fn into_option(self) -> Option<MarkerTree> {
        if self.is_true() {
            None
        } else {
            Some(self)
        }
    }
}

fn combine(a: MarkerTree, b: MarkerTree, conjunction: bool) -> MarkerTree {
    let (absorbing, identity) = if conjunction {
        (MarkerTree::False, MarkerTree::True)
    } else {
        (MarkerTree::True, MarkerTree::False)
    };
    if a == absorbing || b == absorbing {
        return absorbing;
    }
    let mut children: Vec<MarkerTree> = Vec::new();
    for tree in [a, b] {
        let parts = match tree {
            MarkerTree::And(c) if conjunction => c,
            MarkerTree::Or(c) if !conjunction => c,
            t if t == identity => Vec::new(),
            t => vec![t],
        };
        for part in parts {
            if !children.contains(&part) {
                children.push(part);
            }
        }
    }
    match children.len() {
        0 => identity,
        1 => children.pop().unwrap_or(identity),
        _ if conjunction => MarkerTree::And(children),
        _ => MarkerTree::Or(children),
    }
}

impl fmt::Display for MarkerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerTree::True => f.write_str("true"),
            MarkerTree::False => f.write_str("false"),
            MarkerTree::Expression(expr) => write!(f, "{expr}"),
            MarkerTree::And(children) => {
                let parts: Vec<String> = children
                    .iter()
                    .map(|c| match c {
                        MarkerTree::Or(_) => format!("({c})"),
                        _ => c.to_string(),
                    })
                    .collect();
                f.write_str(&parts.join(" and "))
            }
            MarkerTree::Or(children) => {
                let parts: Vec<String> = children.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" or "))
            }
            MarkerTree::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

impl FromStr for MarkerTree {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MarkerTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MarkerTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Op(MarkerOperator),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or("unterminated string")?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' | '!' | '<' | '>' | '~' => {
                let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
                let (op, len) = [
                    ("===", MarkerOperator::ArbitraryEqual),
                    ("==", MarkerOperator::Equal),
                    ("!=", MarkerOperator::NotEqual),
                    ("<=", MarkerOperator::LessEqual),
                    (">=", MarkerOperator::GreaterEqual),
                    ("~=", MarkerOperator::Compatible),
                    ("<", MarkerOperator::Less),
                    (">", MarkerOperator::Greater),
                ]
                .iter()
                .find(|(tok, _)| rest.starts_with(tok))
                .map(|(tok, op)| (*op, tok.len()))
                .ok_or_else(|| format!("unknown operator at `{rest}`"))?;
                tokens.push(Token::Op(op));
                i += len;
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character `{other}`")),
        }
    }
    Ok(tokens)
}

struct MarkerParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl MarkerParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == kw)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or_expr(&mut self) -> Result<MarkerTree, String> {
        let mut tree = self.and_expr()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            tree = tree.or(self.and_expr()?);
        }
        Ok(tree)
    }

    fn and_expr(&mut self) -> Result<MarkerTree, String> {
        let mut tree = self.atom()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            tree = tree.and(self.atom()?);
        }
        Ok(tree)
    }

    fn atom(&mut self) -> Result<MarkerTree, String> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected `)`".to_string()),
                }
            }
            Some(Token::Ident(s)) if s == "not" => {
                self.pos += 1;
                Ok(self.atom()?.negate())
            }
            Some(Token::Ident(s)) if s == "true" => {
                self.pos += 1;
                Ok(MarkerTree::True)
            }
            Some(Token::Ident(s)) if s == "false" => {
                self.pos += 1;
                Ok(MarkerTree::False)
            }
            _ => self.comparison(),
        }
    }

    fn operator(&mut self) -> Result<MarkerOperator, String> {
        match self.next() {
            Some(Token::Op(op)) => Ok(op),
            Some(Token::Ident(s)) if s == "in" => Ok(MarkerOperator::In),
            Some(Token::Ident(s)) if s == "not" => match self.next() {
                Some(Token::Ident(s)) if s == "in" => Ok(MarkerOperator::NotIn),
                _ => Err("expected `in` after `not`".to_string()),
            },
            other => Err(format!("expected an operator, found {other:?}")),
        }
    }

    fn comparison(&mut self) -> Result<MarkerTree, String> {
        let lhs = self.next().ok_or("expected a marker expression")?;
        let op = self.operator()?;
        let rhs = self.next().ok_or("expected a value")?;
        let (key, op, value) = match (lhs, rhs) {
            (Token::Ident(k), Token::Str(v)) => (k, op, v),
            (Token::Str(v), Token::Ident(k)) => (k, op.flipped(), v),
            _ => return Err("a comparison needs one key and one quoted value".to_string()),
        };
        let key = MarkerKey::parse(&key).ok_or_else(|| format!("unknown marker key `{key}`"))?;
        MarkerExpression::new(key, op, value).map(MarkerTree::Expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Platform;

    fn linux() -> TargetEnvironment {
        TargetEnvironment::new(Platform::Linux, "x86_64", &Version::new([3, 12, 1]))
    }

    fn macos() -> TargetEnvironment {
        TargetEnvironment::new(Platform::Macos, "aarch64", &Version::new([3, 9]))
    }

    fn m(s: &str) -> MarkerTree {
        MarkerTree::parse(s).unwrap()
    }

    #[test]
    fn requires_python_clauses_become_full_version_leaves() {
        let spec = crate::specifier::VersionSpecifiers::parse(">=3.10, !=3.11.*").unwrap();
        let leaves: Vec<MarkerExpression> = spec
            .clauses()
            .iter()
            .map(MarkerExpression::python_full_version)
            .collect();
        assert_eq!(leaves[0].to_string(), r#"python_full_version >= "3.10""#);
        assert_eq!(leaves[1].to_string(), r#"python_full_version != "3.11.*""#);
        assert!(leaves[0].evaluate(&linux(), &[]));
        assert!(!leaves[0].evaluate(&macos(), &[]));
        let py311 = TargetEnvironment::new(Platform::Linux, "x86_64", &Version::new([3, 11, 4]));
        assert!(!leaves[1].evaluate(&py311, &[]));
    }

    #[test]
    fn evaluates_platform_and_version() {
        let marker = m(r#"sys_platform == "linux" and python_version >= "3.10""#);
        assert!(marker.evaluate(&linux(), &[]));
        assert!(!marker.evaluate(&macos(), &[]));
    }

    #[test]
    fn or_and_precedence() {
        let marker = m(r#"os_name == "nt" or sys_platform == "darwin" and python_version < "3.10""#);
        assert!(marker.evaluate(&macos(), &[]));
        assert!(!marker.evaluate(&linux(), &[]));
    }

    #[test]
    fn reversed_and_in_operators() {
        assert!(m(r#""3.8" <= python_version"#).evaluate(&linux(), &[]));
        assert!(m(r#"sys_platform in "linux darwin""#).evaluate(&macos(), &[]));
        assert!(m(r#""86" in platform_machine"#).evaluate(&linux(), &[]));
        assert!(m(r#"python_version not in "3.8 3.9""#).evaluate(&linux(), &[]));
    }

    #[test]
    fn extras_are_matched_by_normalized_name() {
        let marker = m(r#"extra == "Socks_Proxy""#);
        let extras = [ExtraName::new("socks-proxy").unwrap()];
        assert!(marker.evaluate(&linux(), &extras));
        assert!(!marker.evaluate(&linux(), &[]));
        assert!(marker.mentions_extra());
    }

    #[test]
    fn assume_extras_keeps_environment_part() {
        let marker = m(r#"extra == "socks" and sys_platform == "linux""#);
        let socks = [ExtraName::new("socks").unwrap()];
        assert_eq!(marker.assume_extras(&[]), MarkerTree::False);
        assert_eq!(marker.assume_extras(&socks), m(r#"sys_platform == "linux""#));
    }

    #[test]
    fn negation_pushes_into_operators() {
        let marker = m(r#"sys_platform == "linux" and python_version < "3.11""#);
        let negated = marker.negate();
        assert_eq!(
            negated.to_string(),
            r#"sys_platform != "linux" or python_version >= "3.11""#
        );
        for env in [linux(), macos()] {
            assert_eq!(negated.evaluate(&env, &[]), !marker.evaluate(&env, &[]));
        }
    }

    #[test]
    fn compatible_negation_uses_not_node() {
        let marker = m(r#"python_version ~= "3.9""#);
        let negated = marker.negate();
        assert!(matches!(negated, MarkerTree::Not(_)));
        assert_eq!(m(&negated.to_string()), negated);
        assert_eq!(negated.negate(), marker);
    }

    #[test]
    fn constant_folding() {
        let a = m(r#"os_name == "nt""#);
        assert_eq!(a.clone().and(MarkerTree::True), a);
        assert_eq!(a.clone().or(MarkerTree::True), MarkerTree::True);
        assert_eq!(a.clone().and(MarkerTree::False), MarkerTree::False);
        assert_eq!(a.clone().and(a.clone()), a);
    }

    #[test]
    fn display_parse_round_trip() {
        for raw in [
            r#"sys_platform == "linux" and (python_version < "3.9" or os_name == "nt")"#,
            r#"platform_machine == "arm64" and sys_platform == "darwin" or implementation_name == "pypy""#,
            r#""x" not in platform_machine"#,
        ] {
            let tree = m(raw);
            assert_eq!(m(&tree.to_string()), tree, "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_markers() {
        assert!(MarkerTree::parse(r#"sys_platform = "linux""#).is_err());
        assert!(MarkerTree::parse(r#"unknown_key == "x""#).is_err());
        assert!(MarkerTree::parse(r#"python_version >= "three""#).is_err());
        assert!(MarkerTree::parse(r#"(os_name == "nt""#).is_err());
        assert!(MarkerTree::parse(r#"os_name == "nt" and"#).is_err());
    }
}
