//! SQL-injection heuristics over request inputs.
//!
//! The scanner walks every string leaf of the query, route parameters and
//! parsed body and tests it against an ordered list of case-insensitive
//! patterns. The first match wins and only its rule name is reported.
//!
//! # Rules
//!
//! | Name                     | Catches                                              |
//! |--------------------------|------------------------------------------------------|
//! | `quote_comment`          | a quote (raw or `%27`) later followed by `--` or `#` |
//! | `equals_terminator`      | `=` followed by a quote, `--` or `;`                 |
//! | `quote_or`               | `' or`, including `%27`, `%6F`, `%72` obfuscation    |
//! | `quote_union`            | `' union`                                            |
//! | `exec_stored_procedure`  | `exec sp_...` / `exec xp_...`                        |
//! | `union_all_select`       | `union all select`                                   |
//! | `sql_keyword`            | bare DML/DDL keywords such as `DROP` or `DELETE`     |
//!
//! These are heuristics, not a parser. Ordinary prose trips them: "please
//! update my profile" and "I'd like to drop-in" are both rejected by
//! `sql_keyword`. Parameterized queries remain the real defense.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

/// Ordered `(name, pattern)` pairs making up the standard rule set.
const STANDARD_PATTERNS: [(&str, &str); 7] = [
    ("quote_comment", r"(%27|')[^\n]*(--|%2d%2d|#|%23)"),
    ("equals_terminator", r"(%3d|=)[^\n]*(%27|'|--|%3b|;)"),
    ("quote_or", r"(%27|')(\s|\+|%20)*(o|%6f|%4f)(r|%72|%52)"),
    ("quote_union", r"(%27|')(\s|\+|%20)*union"),
    ("exec_stored_procedure", r"\bexec(ute)?(\s|\+|%20)+(s|x)p_?\w+"),
    ("union_all_select", r"union(\s|\+|%20)+all(\s|\+|%20)+select"),
    (
        "sql_keyword",
        r"\b(insert|update|delete|drop|alter|exec|execute|truncate|declare|information_schema)\b",
    ),
];

/// Request surface a suspicious value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Query,
    RouteParams,
    Body,
}

impl InputSource {
    pub fn as_str(self) -> &'static str {
        match self {
            InputSource::Query => "query",
            InputSource::RouteParams => "route_params",
            InputSource::Body => "body",
        }
    }
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of scanning one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Suspicious {
        source: InputSource,
        rule: &'static str,
    },
}

impl ScanVerdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, ScanVerdict::Clean)
    }
}

/// One named, compiled pattern.
#[derive(Debug, Clone)]
pub struct InjectionRule {
    name: &'static str,
    regex: Regex,
}

impl InjectionRule {
    /// Compile a case-insensitive rule.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { name, regex })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

/// Immutable scanner shared by all requests.
#[derive(Debug, Clone)]
pub struct InjectionScanner {
    rules: Vec<InjectionRule>,
}

impl InjectionScanner {
    /// Scanner with the standard rule set.
    ///
    /// # Errors
    ///
    /// Returns a regex error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        let rules = STANDARD_PATTERNS
            .iter()
            .map(|&(name, pattern)| InjectionRule::new(name, pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_rules(rules))
    }

    pub fn with_rules(rules: Vec<InjectionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[InjectionRule] {
        &self.rules
    }

    /// Name of the first rule matching `value`, if any.
    pub fn check_str(&self, value: &str) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| rule.is_match(value))
            .map(InjectionRule::name)
    }

    /// First match among the string leaves of `value`.
    ///
    /// Object keys, numbers, booleans and null are not inspected.
    pub fn check_value(&self, value: &Value) -> Option<&'static str> {
        match value {
            Value::String(s) => self.check_str(s),
            Value::Array(items) => items.iter().find_map(|v| self.check_value(v)),
            Value::Object(map) => map.values().find_map(|v| self.check_value(v)),
            Value::Null | Value::Bool(_) | Value::Number(_) => None,
        }
    }

    /// Scan query, route parameters and body in that order.
    pub fn scan(&self, query: &Value, route_params: &Value, body: &Value) -> ScanVerdict {
        [
            (InputSource::Query, query),
            (InputSource::RouteParams, route_params),
            (InputSource::Body, body),
        ]
        .into_iter()
        .find_map(|(source, value)| {
            self.check_value(value)
                .map(|rule| ScanVerdict::Suspicious { source, rule })
        })
        .unwrap_or(ScanVerdict::Clean)
    }
}
