//! Types crossing the host/engine boundary.

use serde::{Deserialize, Serialize};

use crate::classify::{classify, TokenClass};

/// Identifier of a compiled artifact retained inside one engine. Only
/// meaningful to the engine that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub u64);

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A unit of script source ready for compilation.
///
/// The engine wraps `body` in a function with `params` as formals, so a
/// trailing `return entry(...)` statement in the body produces the run
/// result. `label` names the unit in diagnostics and V8 stack traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    pub label: String,
    pub params: Vec<String>,
    pub body: String,
}

/// A top-level function declaration found in script source, offered as a
/// possible entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCandidate {
    pub name: String,
    pub params: Vec<String>,
}

/// Scan source for entry-point candidates: top-level `function`
/// declarations (plain, `async`, or generator). Nested functions do not
/// count, and names with a leading underscore are treated as internal
/// helpers and skipped.
pub fn entry_candidates(code: &str) -> Vec<EntryCandidate> {
    let spans = classify(code);
    let mut candidates = Vec::new();
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < spans.len() {
        let span = &spans[i];
        let text = &code[span.start..span.end];

        match span.class {
            TokenClass::Operator => {
                match text {
                    "{" | "(" | "[" => depth += 1,
                    "}" | ")" | "]" => depth = (depth - 1).max(0),
                    _ => {}
                }
                i += 1;
            }
            TokenClass::Keyword if text == "function" && depth == 0 => {
                // Optional generator star, then the name.
                let mut j = i + 1;
                if let Some(next) = spans.get(j) {
                    if &code[next.start..next.end] == "*" {
                        j += 1;
                    }
                }
                let name = match spans.get(j) {
                    Some(s) if s.class == TokenClass::Identifier => {
                        code[s.start..s.end].to_string()
                    }
                    // Anonymous function expression; not a declaration.
                    _ => {
                        i += 1;
                        continue;
                    }
                };
                let params = read_formals(code, &spans, &mut j);
                if !name.starts_with('_') {
                    candidates.push(EntryCandidate { name, params });
                }
                i = j;
            }
            _ => {
                i += 1;
            }
        }
    }

    candidates
}

/// Read `(a, b = 1, ...rest)` starting after the function name at
/// `spans[*j]`; advances `*j` past the closing parenthesis. Only the
/// formal names are kept.
fn read_formals(
    code: &str,
    spans: &[crate::classify::ClassifiedSpan],
    j: &mut usize,
) -> Vec<String> {
    let mut params = Vec::new();
    *j += 1;

    // Expect the opening parenthesis.
    match spans.get(*j) {
        Some(s) if &code[s.start..s.end] == "(" => {}
        _ => return params,
    }
    *j += 1;

    let mut paren_depth = 1;
    let mut expecting_name = true;
    while let Some(span) = spans.get(*j) {
        let text = &code[span.start..span.end];
        match span.class {
            TokenClass::Operator => match text {
                "(" | "[" | "{" => paren_depth += 1,
                ")" | "]" | "}" => {
                    paren_depth -= 1;
                    if paren_depth == 0 {
                        *j += 1;
                        break;
                    }
                }
                "," if paren_depth == 1 => expecting_name = true,
                _ => {}
            },
            TokenClass::Identifier if paren_depth == 1 && expecting_name => {
                params.push(text.to_string());
                expecting_name = false;
            }
            _ => {}
        }
        *j += 1;
    }

    params
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_top_level_functions() {
        let code = r#"
            function alpha(a, b) { return a + b; }
            async function beta() { return 1; }
            function* gamma(x) { yield x; }
        "#;

        let found = entry_candidates(code);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].name, "alpha");
        assert_eq!(found[0].params, vec!["a", "b"]);
        assert_eq!(found[1].name, "beta");
        assert!(found[1].params.is_empty());
        assert_eq!(found[2].name, "gamma");
        assert_eq!(found[2].params, vec!["x"]);
    }

    #[test]
    fn test_skips_nested_functions() {
        let code = r#"
            function outer() {
                function inner() { return 2; }
                return inner();
            }
        "#;

        let found = entry_candidates(code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "outer");
    }

    #[test]
    fn test_skips_underscore_helpers() {
        let code = "function _helper() {} function main() {}";
        let found = entry_candidates(code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "main");
    }

    #[test]
    fn test_default_and_rest_params_keep_names_only() {
        let code = "function f(a = 1, ...rest) {}";
        let found = entry_candidates(code);
        assert_eq!(found[0].params, vec!["a", "rest"]);
    }

    #[test]
    fn test_ignores_function_keyword_in_strings_and_comments() {
        let code = r#"
            // function fake() {}
            const s = "function alsoFake() {}";
            function real() {}
        "#;

        let found = entry_candidates(code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "real");
    }

    #[test]
    fn test_no_candidates_in_plain_expression() {
        assert!(entry_candidates("1 + 2").is_empty());
    }
}
