//! The capability policy applied to user scripts.
//!
//! This is a textual filter. It catches the obvious spellings of the blocked
//! capabilities so that users get an early, readable error; the actual
//! isolation comes from running scripts in a fresh engine context that has no
//! host globals to reach (see [`crate::ScriptRunner`]).

use lazy_static::lazy_static;
use regex::Regex;

/// A blocked capability and the pattern that detects it.
#[derive(Debug)]
pub struct BannedPattern {
    /// Short name of the capability, e.g. `eval`.
    pub capability: &'static str,
    /// User-facing explanation.
    pub message: &'static str,
    pattern: Regex,
}

impl BannedPattern {
    fn new(capability: &'static str, pattern: &str, message: &'static str) -> Self {
        Self {
            capability,
            message,
            pattern: Regex::new(pattern).unwrap(),
        }
    }

    pub fn is_match(&self, script: &str) -> bool {
        self.pattern.is_match(script)
    }
}

lazy_static! {
    static ref BANNED_PATTERNS: Vec<BannedPattern> = vec![
        BannedPattern::new("eval", r"(?i)\beval\s*\(", "eval() is not allowed"),
        BannedPattern::new(
            "Function constructor",
            r"(?i)\bnew\s+Function\s*\(",
            "Function constructor is not allowed",
        ),
        BannedPattern::new(
            "fetch",
            r"(?i)\bfetch\s*\(",
            "fetch() is not allowed - scripts only receive query results",
        ),
        BannedPattern::new(
            "XMLHttpRequest",
            r"(?i)\bXMLHttpRequest\b",
            "XMLHttpRequest is not allowed - scripts only receive query results",
        ),
        BannedPattern::new("window", r"(?i)\bwindow\.", "window access is not allowed"),
        BannedPattern::new("document", r"(?i)\bdocument\.", "document access is not allowed"),
        BannedPattern::new("globalThis", r"\bglobalThis\b", "globalThis access is not allowed"),
    ];
}

/// All patterns in the policy, in reporting order.
pub fn banned_patterns() -> &'static [BannedPattern] {
    &BANNED_PATTERNS
}

/// Returns every banned pattern the script matches, in policy order.
pub fn scan(script: &str) -> Vec<&'static BannedPattern> {
    BANNED_PATTERNS
        .iter()
        .filter(|p| p.is_match(script))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn capabilities(script: &str) -> Vec<&'static str> {
        scan(script).into_iter().map(|p| p.capability).collect()
    }

    #[test]
    fn clean_script_passes() {
        let script = r#"
            function processData(accounts, contacts) {
                const evaluation = accounts.length;
                return { evaluation: evaluation, documents: contacts.length };
            }
        "#;
        assert!(scan(script).is_empty());
    }

    #[test]
    fn detects_each_capability() {
        assert_eq!(capabilities("eval('1+1')"), vec!["eval"]);
        assert_eq!(capabilities("EVAL ('1')"), vec!["eval"]);
        assert_eq!(
            capabilities("const f = new Function('return 1');"),
            vec!["Function constructor"]
        );
        assert_eq!(capabilities("fetch('/x')"), vec!["fetch"]);
        assert_eq!(capabilities("new XMLHttpRequest()"), vec!["XMLHttpRequest"]);
        assert_eq!(capabilities("window.location = 'x'"), vec!["window"]);
        assert_eq!(capabilities("document.cookie"), vec!["document"]);
        assert_eq!(capabilities("globalThis.x = 1"), vec!["globalThis"]);
    }

    #[test]
    fn reports_multiple_violations_in_policy_order() {
        assert_eq!(
            capabilities("document.title = eval('x'); window.alert(1);"),
            vec!["eval", "window", "document"]
        );
    }

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(banned_patterns().len(), 7);
    }
}
