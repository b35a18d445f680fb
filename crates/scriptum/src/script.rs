//! The script facade.
//!
//! A [`Script`] owns code, declared parameters, a return declaration, and
//! options. Running it completes the supplied parameter values against the
//! declarations, leases an isolation context per the hosting policy, and
//! dispatches through a [`ScriptRunner`]. The runner lease is keyed on the
//! fingerprint and the hosting policy: while both stand still the cached
//! runner is reused, otherwise a fresh lease is taken before the old one is
//! released, so an individual sandbox survives its own recompile.

use scriptum_store::ObjectStore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::context::{ContextId, ContextLease, ContextManager};
use crate::error::{ContextError, ScriptError};
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::marshal::{ConverterRegistry, TransferableValue};
use crate::options::{HostingPolicy, ScriptingOptions};
use crate::param::{ParamKind, Parameter, ParameterValue};
use crate::result::{RunError, RunOutcome};
use crate::runner::{formatted_view, parse, FormattedLine, ParsedScript, ScriptRunner};

#[derive(Debug)]
struct ActiveLease {
    lease: ContextLease,
    runner: ScriptRunner,
    policy: HostingPolicy,
    trigger: Fingerprint,
}

/// A hosted script.
#[derive(Debug)]
pub struct Script {
    label: String,
    code: String,
    parameters: Vec<Parameter>,
    return_kind: Option<ParamKind>,
    options: ScriptingOptions,
    timeout_ms: Option<u64>,
    individual_key: Option<Uuid>,
    active: Option<ActiveLease>,
    disposed: bool,
}

impl Script {
    pub fn new(code: impl Into<String>, options: ScriptingOptions) -> Self {
        let mut script = Self {
            label: "script".to_string(),
            code: code.into(),
            parameters: Vec::new(),
            return_kind: None,
            options,
            timeout_ms: None,
            individual_key: None,
            active: None,
            disposed: false,
        };
        script.ensure_individual_key();
        script
    }

    /// Build a script from [`parse`] output: rewritten code plus derived
    /// parameters.
    pub fn from_parsed(parsed: ParsedScript, options: ScriptingOptions) -> Self {
        let entry = parsed.entry.clone();
        let mut script = Self::new(parsed.code, options).with_label(entry);
        script.parameters = parsed.parameters;
        script
    }

    /// Parse free-form source and build the script in one step.
    pub fn parse_source<S, F>(
        code: &str,
        options: ScriptingOptions,
        select_entry: S,
        make_parameter: F,
    ) -> Result<Self, ScriptError>
    where
        S: FnOnce(&[scriptum_js_runtime::EntryCandidate]) -> Option<String>,
        F: Fn(&str) -> Result<Parameter, ScriptError>,
    {
        let parsed = parse(code, select_entry, make_parameter)?;
        Ok(Self::from_parsed(parsed, options))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_return_kind(mut self, kind: ParamKind) -> Self {
        self.return_kind = Some(kind);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Replace the source. Takes effect on the next run through the
    /// fingerprint moving.
    pub fn set_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn options(&self) -> &ScriptingOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ScriptingOptions) {
        self.options = options;
        self.ensure_individual_key();
    }

    pub fn return_kind(&self) -> Option<ParamKind> {
        self.return_kind
    }

    /// Identity of the currently leased context, if any.
    pub fn context_id(&self) -> Option<ContextId> {
        self.active.as_ref().map(|active| active.lease.id())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_individual_key(&mut self) {
        if self.options.hosting == HostingPolicy::IndividualSandbox && self.individual_key.is_none()
        {
            self.individual_key = Some(Uuid::new_v4());
        }
    }

    /// Structural fingerprint: parameter set, code, options, return
    /// declaration, and, for individually sandboxed scripts, the private
    /// sandbox key. Two otherwise identical private-sandbox scripts
    /// therefore never compare equal.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut builder = fold_content(
            FingerprintBuilder::new(),
            &self.code,
            &self.parameters,
            &self.options,
            self.return_kind,
        );
        if self.options.hosting == HostingPolicy::IndividualSandbox {
            let key = self.individual_key.map(|k| k.to_string());
            builder = builder.push_opt_str(key.as_deref());
        }
        builder.finish()
    }

    /// Run the script.
    ///
    /// Contract violations (undeclared or missing parameters, disposed
    /// script, dead context) return `Err`. Everything the script itself got
    /// wrong returns `Ok` carrying [`RunOutcome::Failure`]: compile
    /// diagnostics, thrown exceptions, and a returned value whose kind does
    /// not match the declared one.
    pub async fn run(
        &mut self,
        manager: &ContextManager,
        store: &ObjectStore,
        registry: &ConverterRegistry,
        supplied: &[ParameterValue],
        cancel: CancellationToken,
    ) -> Result<RunOutcome, ScriptError> {
        if self.disposed {
            return Err(ScriptError::Disposed);
        }
        self.ensure_individual_key();

        let values = self.complete_values(store, registry, supplied)?;
        let trigger = self.fingerprint();

        let reusable = self.active.as_ref().is_some_and(|active| {
            active.policy == self.options.hosting
                && active.trigger == trigger
                && !active.lease.context().is_terminated()
        });
        if !reusable {
            // Lease the replacement before releasing the old one so an
            // individual sandbox is never torn down by its own recompile.
            let lease = manager.lease(self.options.hosting, self.individual_key)?;
            if let ContextId::Individual(key) = lease.id() {
                self.individual_key = Some(key);
            }
            let runner =
                ScriptRunner::new(lease.context().clone(), self.label.clone(), self.timeout_ms);
            let displaced = self.active.replace(ActiveLease {
                lease,
                runner,
                policy: self.options.hosting,
                trigger,
            });
            if let Some(old) = displaced {
                debug!(label = %self.label, from = %old.lease.id(), "turning over context lease");
                old.runner.invalidate().await;
                manager.release(old.lease);
            }
        }

        let Some(active) = self.active.as_ref() else {
            return Err(ContextError::Terminated.into());
        };
        let (outcome, _stats) = active
            .runner
            .run(&self.code, &self.parameters, &values, trigger, cancel)
            .await?;

        if let (Some(declared), RunOutcome::Success { value }) = (self.return_kind, &outcome) {
            if !value.is_null() && !declared.accepts(value.kind()) {
                // The script produced the wrong thing, which is its own
                // failure, not the caller's.
                return Ok(RunOutcome::failure(vec![RunError::execute(format!(
                    "returned value kind '{}' does not match declared '{declared}'",
                    value.kind(),
                ))]));
            }
        }
        Ok(outcome)
    }

    /// Complete supplied values against the declared parameters, producing
    /// one wire value per declaration in order. Undeclared and missing
    /// names are each reported as one aggregated error naming all
    /// offenders.
    fn complete_values(
        &self,
        store: &ObjectStore,
        registry: &ConverterRegistry,
        supplied: &[ParameterValue],
    ) -> Result<Vec<TransferableValue>, ScriptError> {
        let undeclared: Vec<String> = supplied
            .iter()
            .filter(|pv| {
                !self
                    .parameters
                    .iter()
                    .any(|p| p.name() == pv.parameter().name())
            })
            .map(|pv| pv.parameter().name().to_string())
            .collect();
        if !undeclared.is_empty() {
            return Err(ScriptError::UndeclaredParameters(undeclared));
        }

        let mut missing = Vec::new();
        let mut values = Vec::with_capacity(self.parameters.len());
        for parameter in &self.parameters {
            // Later duplicates win.
            let found = supplied
                .iter()
                .rev()
                .find(|pv| pv.parameter().name() == parameter.name());
            match found {
                Some(pv) => values.push(pv.resolve(store, registry)?),
                None if parameter.is_optional() => values.push(
                    parameter
                        .default_value()
                        .cloned()
                        .unwrap_or(TransferableValue::Null),
                ),
                None => missing.push(parameter.name().to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(ScriptError::MissingParameters(missing));
        }
        Ok(values)
    }

    /// Per-line classified view of the source.
    pub fn formatted_view(&self) -> Vec<FormattedLine> {
        formatted_view(&self.code)
    }

    /// Release the context lease. Owning an individual sandbox tears it
    /// down. Idempotent; running a disposed script is an error.
    pub async fn dispose(&mut self, manager: &ContextManager) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(active) = self.active.take() {
            active.runner.invalidate().await;
            manager.release(active.lease);
            debug!(label = %self.label, "script disposed");
        }
    }
}

/// Structural equality is fingerprint equality, not instance identity.
impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

/// Registration identity of a script: everything that makes two scripts
/// interchangeable for caching and store dedup. The private sandbox key
/// stays out, so re-registering identical content dedups even under an
/// individual-sandbox policy.
pub fn content_fingerprint(
    code: &str,
    parameters: &[Parameter],
    options: &ScriptingOptions,
    return_kind: Option<ParamKind>,
) -> Fingerprint {
    fold_content(FingerprintBuilder::new(), code, parameters, options, return_kind).finish()
}

fn fold_content(
    builder: FingerprintBuilder,
    code: &str,
    parameters: &[Parameter],
    options: &ScriptingOptions,
    return_kind: Option<ParamKind>,
) -> FingerprintBuilder {
    let mut builder = builder.push_u32(parameters.len() as u32);
    for parameter in parameters {
        builder = builder.push_hash(parameter.structural_hash());
    }
    builder
        .push_str(code)
        .push_hash(options.structural_hash())
        .push_opt_hash(return_kind.map(ParamKind::tag))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
