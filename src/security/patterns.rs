//! Suspicious-input detection rules.
//!
//! Rules run in a fixed order over the canonical JSON text of a request's
//! body, query and path params. The first match wins.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// What a rule is looking for. Declaration order is evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatternCategory {
    PathTraversal,
    InjectionKeywords,
    ScriptInjection,
    CodeExecution,
}

impl PatternCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternCategory::PathTraversal => "path-traversal",
            PatternCategory::InjectionKeywords => "injection-keywords",
            PatternCategory::ScriptInjection => "script-injection",
            PatternCategory::CodeExecution => "code-execution",
        }
    }
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detection rule.
#[derive(Debug)]
pub struct PatternRule {
    pub id: &'static str,
    pub category: PatternCategory,
    regex: Regex,
}

impl PatternRule {
    pub fn new(
        id: &'static str,
        category: PatternCategory,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            id,
            category,
            regex: Regex::new(pattern)?,
        })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

const BUILTIN_RULES: &[(&str, PatternCategory, &str)] = &[
    ("dot-dot-slash", PatternCategory::PathTraversal, r"\.\.[/\\]"),
    ("encoded-dot-dot", PatternCategory::PathTraversal, r"(?i)%2e%2e(?:%2f|%5c|/|\\)"),
    ("union-select", PatternCategory::InjectionKeywords, r"(?i)\bunion\s+(?:all\s+)?select\b"),
    (
        "stacked-statement",
        PatternCategory::InjectionKeywords,
        r"(?i);\s*(?:drop|delete|insert|update|alter|truncate|create|exec|shutdown)\b",
    ),
    (
        "ddl-statement",
        PatternCategory::InjectionKeywords,
        r"(?i)\b(?:drop|alter|truncate)\s+(?:table|database|schema)\b",
    ),
    ("dml-statement", PatternCategory::InjectionKeywords, r"(?i)\b(?:insert\s+into|delete\s+from)\b"),
    (
        "quote-tautology",
        PatternCategory::InjectionKeywords,
        r"(?i)'\s*(?:or|and)\s+'?\w+'?\s*=\s*'?\w+",
    ),
    ("quote-comment", PatternCategory::InjectionKeywords, r"'\s*(?:--|#|/\*)"),
    ("script-tag", PatternCategory::ScriptInjection, r"(?i)<\s*script\b"),
    ("javascript-uri", PatternCategory::ScriptInjection, r"(?i)\bjavascript\s*:"),
    (
        "event-handler",
        PatternCategory::ScriptInjection,
        r"(?i)\bon(?:error|load|click|mouseover|focus|submit)\s*=",
    ),
    ("embedded-frame", PatternCategory::ScriptInjection, r"(?i)<\s*(?:iframe|object|embed)\b"),
    (
        "eval-call",
        PatternCategory::CodeExecution,
        r"(?i)\b(?:eval|exec|execsync|spawn|system|passthru|shell_exec|popen)\(",
    ),
    (
        "runtime-access",
        PatternCategory::CodeExecution,
        r"(?i)\brequire\(|\bchild_process\b|\bprocess\.(?:exit|kill|env)\b|\bnew\s+Function\(",
    ),
];

static BUILTIN: LazyLock<Vec<PatternRule>> = LazyLock::new(|| {
    BUILTIN_RULES
        .iter()
        .map(|(id, category, pattern)| {
            PatternRule::new(id, *category, pattern).expect("built-in pattern compiles")
        })
        .collect()
});

/// An immutable, ordered list of rules.
#[derive(Debug, Clone, Copy)]
pub struct PatternSet {
    rules: &'static [PatternRule],
}

impl PatternSet {
    /// The gateway's built-in rules.
    pub fn builtin() -> Self {
        Self { rules: &BUILTIN }
    }

    /// Evaluate rules in order; the first matching rule is returned.
    pub fn first_match(&self, haystack: &str) -> Option<&'static PatternRule> {
        self.rules.iter().find(|rule| rule.is_match(haystack))
    }

    pub fn rules(&self) -> &'static [PatternRule] {
        self.rules
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::builtin()
    }
}
