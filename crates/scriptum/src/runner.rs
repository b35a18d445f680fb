//! Script runner: compile caching, dispatch, source services.
//!
//! One runner exists per script lease. It keeps a single-slot compile cache
//! keyed by the script's fingerprint: a run whose fingerprint matches the
//! cached trigger reuses the compiled artifact, anything else recompiles and
//! swaps the slot. Stale artifacts never execute.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use scriptum_js_runtime::{
    classify, entry_candidates, ArtifactId, CompileUnit, EngineError, EntryCandidate, TokenClass,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::ScriptContext;
use crate::error::{ContextError, ScriptError};
use crate::fingerprint::Fingerprint;
use crate::marshal::TransferableValue;
use crate::param::Parameter;
use crate::result::{RunError, RunOutcome, RunStats};

#[derive(Debug, Clone, Copy)]
struct CompiledEntry {
    trigger: Fingerprint,
    artifact: ArtifactId,
}

/// Dispatches one script's runs into its leased context.
#[derive(Debug)]
pub struct ScriptRunner {
    context: Arc<ScriptContext>,
    label: String,
    timeout_ms: Option<u64>,
    cache: Mutex<Option<CompiledEntry>>,
}

impl ScriptRunner {
    pub fn new(
        context: Arc<ScriptContext>,
        label: impl Into<String>,
        timeout_ms: Option<u64>,
    ) -> Self {
        Self {
            context,
            label: label.into(),
            timeout_ms,
            cache: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<ScriptContext> {
        &self.context
    }

    /// Compile (if the trigger moved) and execute.
    ///
    /// `values` are positional, one per parameter. Script-level failures
    /// come back as [`RunOutcome::Failure`]; `Err` means the caller or the
    /// infrastructure broke contract.
    pub async fn run(
        &self,
        code: &str,
        parameters: &[Parameter],
        values: &[TransferableValue],
        trigger: Fingerprint,
        cancel: CancellationToken,
    ) -> Result<(RunOutcome, RunStats), ScriptError> {
        if self.context.is_terminated() {
            return Err(ContextError::Terminated.into());
        }

        let started_at = Utc::now();
        let clock = Instant::now();

        let cached = *self.cache.lock();
        let (artifact, recompiled) = match cached {
            Some(entry) if entry.trigger == trigger => (entry.artifact, false),
            stale => {
                debug!(label = %self.label, %trigger, "fingerprint moved, compiling");
                let unit = CompileUnit {
                    label: self.label.clone(),
                    params: parameters.iter().map(|p| p.name().to_string()).collect(),
                    body: code.to_string(),
                };
                match self.context.engine().compile(unit).await {
                    Ok(artifact) => {
                        *self.cache.lock() = Some(CompiledEntry { trigger, artifact });
                        if let Some(old) = stale {
                            let _ = self.context.engine().discard(old.artifact).await;
                        }
                        (artifact, true)
                    }
                    Err(EngineError::Js(message)) => {
                        let stats = self.stats(started_at, &clock, true);
                        self.log_finished(&stats, false);
                        return Ok((RunOutcome::failure(vec![RunError::compile(message)]), stats));
                    }
                    Err(other) => return Err(map_engine_error(other)),
                }
            }
        };

        let args: Vec<serde_json::Value> = values.iter().cloned().map(Into::into).collect();
        let outcome = match self
            .context
            .engine()
            .execute(artifact, args, self.timeout_ms, cancel)
            .await
        {
            Ok(value) => RunOutcome::success(TransferableValue::from(value)),
            Err(EngineError::Js(message)) => {
                RunOutcome::failure(vec![RunError::execute(message)])
            }
            Err(other) => return Err(map_engine_error(other)),
        };

        let stats = self.stats(started_at, &clock, recompiled);
        self.log_finished(&stats, outcome.is_success());
        Ok((outcome, stats))
    }

    /// Drop the cached artifact, freeing its slot in the engine.
    pub async fn invalidate(&self) {
        let cached = self.cache.lock().take();
        if let Some(entry) = cached {
            let _ = self.context.engine().discard(entry.artifact).await;
        }
    }

    fn stats(&self, started_at: chrono::DateTime<Utc>, clock: &Instant, recompiled: bool) -> RunStats {
        RunStats {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            recompiled,
        }
    }

    fn log_finished(&self, stats: &RunStats, success: bool) {
        info!(
            label = %self.label,
            context = %self.context.id(),
            duration_ms = stats.duration_ms,
            recompiled = stats.recompiled,
            success,
            "script run finished"
        );
    }
}

fn map_engine_error(error: EngineError) -> ScriptError {
    match error {
        EngineError::Cancelled => ScriptError::Cancelled,
        EngineError::Terminated => ScriptError::Context(ContextError::Terminated),
        other => ScriptError::Engine(other),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Result of [`parse`]: rewritten code plus the derived parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScript {
    /// Original source with an explicit trailing call to the entry.
    pub code: String,
    /// Name of the chosen entry function.
    pub entry: String,
    pub parameters: Vec<Parameter>,
}

/// Derive a runnable script from free-form source.
///
/// Candidates are the source's top-level function declarations. A single
/// candidate is chosen automatically; with more, `select_entry` must name
/// one. `make_parameter` builds a [`Parameter`] per formal of the chosen
/// entry, in order. The returned code ends with an explicit call so the
/// entry's result becomes the run result.
pub fn parse<S, F>(code: &str, select_entry: S, make_parameter: F) -> Result<ParsedScript, ScriptError>
where
    S: FnOnce(&[EntryCandidate]) -> Option<String>,
    F: Fn(&str) -> Result<Parameter, ScriptError>,
{
    let candidates = entry_candidates(code);
    if candidates.is_empty() {
        return Err(ScriptError::NoEntryCandidates);
    }

    let chosen_name = if candidates.len() == 1 {
        candidates[0].name.clone()
    } else {
        match select_entry(&candidates) {
            Some(name) => name,
            None => {
                return Err(ScriptError::EntryNotSelected {
                    candidates: candidates.len(),
                })
            }
        }
    };
    let chosen = candidates
        .iter()
        .find(|candidate| candidate.name == chosen_name)
        .ok_or(ScriptError::UnknownEntry(chosen_name))?;

    let mut parameters = Vec::with_capacity(chosen.params.len());
    for formal in &chosen.params {
        parameters.push(make_parameter(formal)?);
    }

    // Arguments are positional; parameter names may differ from the entry's
    // own formals.
    let arguments: Vec<&str> = parameters.iter().map(Parameter::name).collect();
    let invocation = format!("return {}({});", chosen.name, arguments.join(", "));
    let code = format!("{}\n{invocation}\n", code.trim_end());

    Ok(ParsedScript {
        code,
        entry: chosen.name.clone(),
        parameters,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Formatted view
// ─────────────────────────────────────────────────────────────────────────────

/// Display class of one run of source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewClass {
    Keyword,
    Identifier,
    Number,
    String,
    Comment,
    Operator,
    Unknown,
}

impl From<TokenClass> for ViewClass {
    fn from(class: TokenClass) -> Self {
        match class {
            TokenClass::Keyword => ViewClass::Keyword,
            TokenClass::Identifier => ViewClass::Identifier,
            TokenClass::Number => ViewClass::Number,
            TokenClass::String => ViewClass::String,
            TokenClass::Comment => ViewClass::Comment,
            TokenClass::Operator => ViewClass::Operator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedRun {
    pub text: String,
    pub class: ViewClass,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattedLine {
    pub runs: Vec<FormattedRun>,
}

/// Split source into per-line display runs.
///
/// Segment boundaries are the union of line breaks and classified token
/// spans: classified segments carry their token class, everything between
/// them (whitespace included) surfaces as `Unknown`. A span crossing a line
/// break, like a block comment, contributes a run to every line it touches.
pub fn formatted_view(code: &str) -> Vec<FormattedLine> {
    let spans = classify(code);
    let mut lines = Vec::new();
    let mut span_idx = 0;
    let mut line_start = 0;

    for raw_line in code.split_inclusive('\n') {
        let line_end = line_start + raw_line.len();
        let content_end = if raw_line.ends_with('\n') {
            line_end - 1
        } else {
            line_end
        };

        let mut runs = Vec::new();
        let mut pos = line_start;

        while span_idx < spans.len() && spans[span_idx].end <= line_start {
            span_idx += 1;
        }
        let mut i = span_idx;
        while i < spans.len() && spans[i].start < content_end {
            let span = spans[i];
            let seg_start = span.start.max(pos);
            let seg_end = span.end.min(content_end);
            if seg_start > pos {
                runs.push(FormattedRun {
                    text: code[pos..seg_start].to_string(),
                    class: ViewClass::Unknown,
                });
            }
            if seg_end > seg_start {
                runs.push(FormattedRun {
                    text: code[seg_start..seg_end].to_string(),
                    class: span.class.into(),
                });
                pos = seg_end;
            }
            if span.end <= content_end {
                i += 1;
            } else {
                // Span continues on the next line.
                break;
            }
        }
        if pos < content_end {
            runs.push(FormattedRun {
                text: code[pos..content_end].to_string(),
                class: ViewClass::Unknown,
            });
        }

        lines.push(FormattedLine { runs });
        span_idx = i;
        line_start = line_end;
    }

    lines
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextId;
    use crate::engine::mock::MockEngine;
    use crate::engine::ScriptEngine;
    use crate::param::ParamKind;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn runner_with(mock: Arc<MockEngine>) -> ScriptRunner {
        let context = Arc::new(ScriptContext::new(ContextId::Shared, Box::new(mock)));
        ScriptRunner::new(context, "test", None)
    }

    fn params(names: &[&str]) -> Vec<Parameter> {
        names
            .iter()
            .map(|n| Parameter::new(n, ParamKind::Object).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_cache_hit_skips_compilation() {
        let mock = Arc::new(MockEngine::new());
        let runner = runner_with(mock.clone());
        let trigger = Fingerprint(7);

        for _ in 0..3 {
            let (outcome, _) = runner
                .run("return 1;", &[], &[], trigger, CancellationToken::new())
                .await
                .unwrap();
            assert!(outcome.is_success());
        }

        assert_eq!(mock.compile_count.load(Ordering::Relaxed), 1);
        assert_eq!(mock.execute_count.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_fingerprint_move_recompiles_and_discards() {
        let mock = Arc::new(MockEngine::new());
        let runner = runner_with(mock.clone());

        let (_, stats) = runner
            .run("return 1;", &[], &[], Fingerprint(1), CancellationToken::new())
            .await
            .unwrap();
        assert!(stats.recompiled);

        let (_, stats) = runner
            .run("return 2;", &[], &[], Fingerprint(2), CancellationToken::new())
            .await
            .unwrap();
        assert!(stats.recompiled);

        assert_eq!(mock.compile_count.load(Ordering::Relaxed), 2);
        // The artifact from the first compile was freed.
        assert_eq!(mock.discard_count.load(Ordering::Relaxed), 1);
        assert_eq!(mock.live_artifacts(), 1);
    }

    #[tokio::test]
    async fn test_values_dispatch_positionally() {
        let mock = Arc::new(MockEngine::new());
        let runner = runner_with(mock.clone());

        let parameters = params(&["a", "b"]);
        let values = vec![
            TransferableValue::Integer(1),
            TransferableValue::Text("two".into()),
        ];
        let (outcome, _) = runner
            .run("noop", &parameters, &values, Fingerprint(3), CancellationToken::new())
            .await
            .unwrap();

        // The mock echoes its arguments, proving order was preserved.
        assert_eq!(
            outcome.value(),
            Some(&TransferableValue::from(json!([1, "two"])))
        );
        let unit = mock.compiled_unit(ArtifactId(1)).unwrap();
        assert_eq!(unit.params, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_script_throw_is_failure_data() {
        let mock = Arc::new(MockEngine::with_exec(|_, _| {
            Err(EngineError::Js("boom at line 1".into()))
        }));
        let runner = runner_with(mock);

        let (outcome, _) = runner
            .run("throw", &[], &[], Fingerprint(4), CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.errors()[0].phase, crate::result::RunPhase::Execute);
        assert!(outcome.errors()[0].message.contains("boom"));
    }

    #[tokio::test]
    async fn test_compile_failure_is_failure_data() {
        let mock = Arc::new(MockEngine::new());
        mock.set_compile_failure("unexpected token");
        let runner = runner_with(mock.clone());

        let (outcome, stats) = runner
            .run("syntax error", &[], &[], Fingerprint(5), CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.errors()[0].phase, crate::result::RunPhase::Compile);
        assert!(stats.recompiled);

        // The failed compile left no cache entry, so the next run compiles
        // again and succeeds.
        let (outcome, _) = runner
            .run("syntax error", &[], &[], Fingerprint(5), CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(mock.compile_count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_cancellation_is_an_error() {
        let mock = Arc::new(MockEngine::new());
        let runner = runner_with(mock);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner
            .run("slow", &[], &[], Fingerprint(6), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Cancelled));
    }

    #[tokio::test]
    async fn test_terminated_context_fails_fast() {
        let mock = Arc::new(MockEngine::new());
        let runner = runner_with(mock.clone());
        mock.terminate();

        let err = runner
            .run("x", &[], &[], Fingerprint(8), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Context(ContextError::Terminated)));
    }

    // ── parse ──

    #[test]
    fn test_parse_single_candidate_auto_selected() {
        let code = "function rate(base, offset) { return base + offset; }";
        let parsed = parse(
            code,
            |_| None,
            |formal| Parameter::new(formal, ParamKind::Float),
        )
        .unwrap();

        assert_eq!(parsed.entry, "rate");
        assert_eq!(parsed.parameters.len(), 2);
        assert_eq!(parsed.parameters[0].name(), "base");
        assert!(parsed.code.ends_with("return rate(base, offset);\n"));
    }

    #[test]
    fn test_parse_selector_picks_among_candidates() {
        let code = "function one() { return 1; }\nfunction two() { return 2; }";
        let parsed = parse(
            code,
            |candidates| {
                assert_eq!(candidates.len(), 2);
                Some("two".to_string())
            },
            |formal| Parameter::new(formal, ParamKind::Object),
        )
        .unwrap();
        assert_eq!(parsed.entry, "two");
        assert!(parsed.code.ends_with("return two();\n"));
    }

    #[test]
    fn test_parse_selector_abstains() {
        let code = "function one() {}\nfunction two() {}";
        let err = parse(code, |_| None, |f| Parameter::new(f, ParamKind::Object)).unwrap_err();
        assert!(matches!(err, ScriptError::EntryNotSelected { candidates: 2 }));
    }

    #[test]
    fn test_parse_no_candidates() {
        let err = parse("let x = 1;", |_| None, |f| Parameter::new(f, ParamKind::Object))
            .unwrap_err();
        assert!(matches!(err, ScriptError::NoEntryCandidates));
    }

    #[test]
    fn test_parse_selector_naming_stranger_fails() {
        let code = "function one() {}\nfunction two() {}";
        let err = parse(
            code,
            |_| Some("three".to_string()),
            |f| Parameter::new(f, ParamKind::Object),
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::UnknownEntry(name) if name == "three"));
    }

    // ── formatted view ──

    #[test]
    fn test_view_classifies_per_line() {
        let lines = formatted_view("let x = 1;\nreturn x;");
        assert_eq!(lines.len(), 2);

        let first = &lines[0];
        assert_eq!(first.runs[0].text, "let");
        assert_eq!(first.runs[0].class, ViewClass::Keyword);
        // The space between tokens surfaces as unknown.
        assert_eq!(first.runs[1].text, " ");
        assert_eq!(first.runs[1].class, ViewClass::Unknown);

        let texts: String = first.runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, "let x = 1;");
    }

    #[test]
    fn test_view_splits_block_comment_across_lines() {
        let lines = formatted_view("/* a\nb */ 1");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].runs[0].text, "/* a");
        assert_eq!(lines[0].runs[0].class, ViewClass::Comment);
        assert_eq!(lines[1].runs[0].text, "b */");
        assert_eq!(lines[1].runs[0].class, ViewClass::Comment);

        let last = lines[1].runs.last().unwrap();
        assert_eq!(last.class, ViewClass::Number);
        assert_eq!(last.text, "1");
    }

    #[test]
    fn test_view_empty_line_has_no_runs() {
        let lines = formatted_view("a\n\nb");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].runs.is_empty());
    }

    #[test]
    fn test_view_reassembles_source() {
        let code = "function f(x) {\n  // doubles\n  return x * 2;\n}";
        let rebuilt: String = formatted_view(code)
            .iter()
            .map(|line| {
                line.runs
                    .iter()
                    .map(|run| run.text.as_str())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(rebuilt, code);
    }
}
