//! Top-level modules referenced by `import` statements

use regex::Regex;
use std::sync::OnceLock;

const IMPORT_PATTERN: &str =
    r"(?m)^[ \t]*(?:from[ \t]+([A-Za-z_][\w.]*)[ \t]+import\b|import[ \t]+([^#;\r\n]+))";

fn import_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(IMPORT_PATTERN).ok())
        .as_ref()
}

/// Modules named by `import x` and `from x import y`, first occurrence order.
/// Relative imports are skipped.
pub fn referenced_modules(source: &str) -> Vec<String> {
    let Some(pattern) = import_pattern() else {
        return Vec::new();
    };

    let mut modules: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let top = name.split('.').next().unwrap_or(name);
        if !top.is_empty() && !modules.iter().any(|m| m == top) {
            modules.push(top.to_string());
        }
    };

    for captures in pattern.captures_iter(source) {
        if let Some(module) = captures.get(1) {
            push(module.as_str());
        } else if let Some(list) = captures.get(2) {
            for item in list.as_str().split(',') {
                // `import a.b as c`
                if let Some(name) = item.split_whitespace().next() {
                    if name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
                        push(name);
                    }
                }
            }
        }
    }
    modules
}
