//! Post-decode initialization rules.
//!
//! A [`RuleSet`] maps parameter types to ordered lists of mutators. Processing
//! a decoded value visits every inlined structure, deepest first, and then
//! the root. Each visit runs the type's [`Initialize`](crate::Initialize)
//! hook, if it declares one, followed by the rules registered for the type.
//!
//! # Example
//!
//! ```
//! use param_bind_core::*;
//!
//! #[derive(Debug, Default)]
//! struct Serve {
//!     port: u16,
//! }
//!
//! impl Params for Serve {
//!     fn fields() -> Vec<FieldDecl> {
//!         vec![FieldDecl::flag::<u16>("port", "port")]
//!     }
//!
//!     fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
//!         match index {
//!             0 => Some(Slot::value(&mut self.port)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let mut rules = RuleSet::new();
//! rules.add(|serve: &mut Serve| {
//!     if serve.port == 0 {
//!         serve.port = 8080;
//!     }
//! });
//!
//! let mut serve = Serve::default();
//! rules.process(&mut serve).unwrap();
//! assert_eq!(serve.port, 8080);
//! ```

use std::any::{Any, TypeId, type_name};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{Dispatch, debug, dispatcher, trace};

use crate::access::{self, AccessError};
use crate::field::{Params, RuleError, Structure};
use crate::spec::{FieldPath, ParamSpec, SpecError, spec_of};

/// Errors raised while processing a value.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The root type's spec could not be derived.
    #[error("invalid parameter spec: {0}")]
    Spec(#[from] SpecError),
    /// The value is not the type the spec was derived for.
    #[error("value is '{actual}', spec was derived for '{expected}'")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// An inline path did not lead to a structure.
    #[error("inline field '{field}' at {path} is not addressable")]
    Unaddressable { field: String, path: FieldPath },
    /// A rule or initialization hook failed.
    #[error(transparent)]
    Rule(RuleError),
}

impl ProcessError {
    /// The error returned by the failing rule or hook, if that is the cause.
    pub fn into_rule_error(self) -> Option<RuleError> {
        match self {
            ProcessError::Rule(err) => Some(err),
            _ => None,
        }
    }
}

type Apply = Box<dyn Fn(&mut dyn Any) -> Result<(), RuleError> + Send + Sync>;

/// A mutator bound to one parameter type.
pub struct Rule {
    type_id: TypeId,
    type_name: &'static str,
    apply: Apply,
}

impl Rule {
    /// Creates an infallible rule for `T`.
    pub fn new<T: Params>(rule: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        Self::fallible(move |value: &mut T| {
            rule(value);
            Ok(())
        })
    }

    /// Creates a rule for `T` whose failure aborts processing.
    pub fn fallible<T: Params>(
        rule: impl Fn(&mut T) -> Result<(), RuleError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            apply: Box::new(move |value: &mut dyn Any| match value.downcast_mut::<T>() {
                Some(value) => rule(value),
                None => {
                    Err(format!("rule for '{}' applied to another type", type_name::<T>()).into())
                }
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Appends this rule to `rule_set`.
    pub fn register(self, rule_set: &mut RuleSet) {
        rule_set.register(self);
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Rule engine settings.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Logger scoped around each processing pass; discards by default.
    pub log: Dispatch,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            log: Dispatch::none(),
        }
    }
}

impl InitConfig {
    pub fn with_log(mut self, log: Dispatch) -> Self {
        self.log = log;
        self
    }
}

/// Type-keyed registry of initialization rules.
///
/// Registration needs `&mut self`; processing only `&self`, so a finished
/// set can be shared across threads processing independent values.
#[derive(Debug, Default)]
pub struct RuleSet {
    config: InitConfig,
    rules: HashMap<TypeId, Vec<Rule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InitConfig) -> Self {
        Self {
            config,
            rules: HashMap::new(),
        }
    }

    /// Appends `rule` after any rules already registered for its type.
    pub fn register(&mut self, rule: Rule) -> &mut Self {
        self.rules.entry(rule.type_id).or_default().push(rule);
        self
    }

    /// Registers an infallible rule for `T`.
    pub fn add<T: Params>(&mut self, rule: impl Fn(&mut T) + Send + Sync + 'static) -> &mut Self {
        self.register(Rule::new(rule))
    }

    /// Registers a fallible rule for `T`.
    pub fn add_fallible<T: Params>(
        &mut self,
        rule: impl Fn(&mut T) -> Result<(), RuleError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(Rule::fallible(rule))
    }

    /// Number of rules registered for `T`.
    pub fn rule_count<T: Params>(&self) -> usize {
        self.rules.get(&TypeId::of::<T>()).map_or(0, Vec::len)
    }

    /// Processes `root` with the spec of `T`.
    pub fn process<T: Params>(&self, root: &mut T) -> Result<(), ProcessError> {
        dispatcher::with_default(&self.config.log, || {
            let spec = spec_of::<T>()?;
            self.process_spec(&spec, root)
        })
    }

    /// Processes `root` with an already derived spec.
    ///
    /// Every inline reachable from `spec` is visited before the root, deeper
    /// inlines first; inlines of equal depth keep pre-order discovery order.
    /// Absent optional inlines are created before they are visited. The first
    /// failing hook or rule aborts the pass; earlier mutations are kept.
    pub fn process_spec(
        &self,
        spec: &ParamSpec,
        root: &mut dyn Structure,
    ) -> Result<(), ProcessError> {
        dispatcher::with_default(&self.config.log, || {
            check_type(spec, root)?;

            let mut inlines = spec.all_inlines();
            inlines.sort_by_key(|inline| Reverse(inline.path.depth()));

            for inline in &inlines {
                let (value, materialized) = access::resolve_structure(&mut *root, &inline.path)
                    .map_err(|err| unaddressable(err, &inline.field))?;
                if materialized {
                    debug!(field = %inline.field, type_name = inline.spec.type_name, "Materialized inline structure");
                }
                self.visit(&inline.spec, value)?;
            }

            self.visit(spec, root)
        })
    }

    fn visit(&self, spec: &ParamSpec, value: &mut dyn Structure) -> Result<(), ProcessError> {
        let init = spec.init();
        let rules = self.rules.get(&spec.type_id());
        if init.is_none() && rules.is_none() {
            trace!(type_name = spec.type_name, "No initialization for type");
            return Ok(());
        }

        check_type(spec, value)?;
        let value = value.as_any_mut();

        if let Some(init) = init {
            trace!(type_name = spec.type_name, "Running init hook");
            init(&mut *value).map_err(ProcessError::Rule)?;
        }

        for rule in rules.into_iter().flatten() {
            trace!(type_name = rule.type_name, "Applying rule");
            (rule.apply)(&mut *value).map_err(ProcessError::Rule)?;
        }

        Ok(())
    }
}

fn check_type(spec: &ParamSpec, value: &dyn Structure) -> Result<(), ProcessError> {
    if value.as_any().type_id() != spec.type_id() {
        return Err(ProcessError::TypeMismatch {
            expected: spec.type_name,
            actual: value.type_name(),
        });
    }
    Ok(())
}

fn unaddressable(err: AccessError, field: &str) -> ProcessError {
    ProcessError::Unaddressable {
        field: field.to_string(),
        path: err.path().clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::field::{FieldDecl, InitFn, Initialize, Slot, init_hook};
    use crate::testing::capture;

    #[derive(Debug, Default)]
    struct Limits {
        retries: u32,
        trace: Vec<&'static str>,
    }

    impl Initialize for Limits {
        fn initialize(&mut self) -> Result<(), RuleError> {
            self.trace.push("hook");
            Ok(())
        }
    }

    impl Params for Limits {
        const INIT: Option<InitFn> = Some(init_hook::<Self>);

        fn fields() -> Vec<FieldDecl> {
            vec![FieldDecl::flag::<u32>("retries", "retries")]
        }

        fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
            match index {
                0 => Some(Slot::value(&mut self.retries)),
                _ => None,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Task {
        name: String,
        limits: Option<Limits>,
    }

    impl Params for Task {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::flag::<String>("name", "name"),
                FieldDecl::inline::<Limits>("limits"),
            ]
        }

        fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
            match index {
                0 => Some(Slot::value(&mut self.name)),
                1 => Some(Slot::optional(&mut self.limits)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_hook_runs_before_rules_in_registration_order() {
        let mut rules = RuleSet::new();
        rules
            .add(|limits: &mut Limits| limits.trace.push("first"))
            .add(|limits: &mut Limits| limits.trace.push("second"));

        let mut task = Task::default();
        rules.process(&mut task).unwrap();

        let limits = task.limits.unwrap();
        assert_eq!(limits.trace, vec!["hook", "first", "second"]);
    }

    #[test]
    fn test_absent_inline_is_materialized() {
        let rules = RuleSet::new();
        let mut task = Task::default();
        assert!(task.limits.is_none());

        rules.process(&mut task).unwrap();
        assert_eq!(task.limits.unwrap().trace, vec!["hook"]);
    }

    #[test]
    fn test_failing_rule_aborts_and_keeps_earlier_mutations() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut rules = RuleSet::new();

        let log = Arc::clone(&seen);
        rules.add(move |limits: &mut Limits| {
            limits.retries = 3;
            log.lock().unwrap().push("limits");
        });
        rules.add_fallible(|_: &mut Limits| Err("retries exhausted".into()));
        let log = Arc::clone(&seen);
        rules.add(move |_: &mut Task| log.lock().unwrap().push("task"));

        let mut task = Task::default();
        let err = rules.process(&mut task).unwrap_err();

        assert_eq!(err.to_string(), "retries exhausted");
        assert_eq!(err.into_rule_error().unwrap().to_string(), "retries exhausted");
        assert_eq!(task.limits.unwrap().retries, 3);
        assert_eq!(*seen.lock().unwrap(), vec!["limits"]);
    }

    #[test]
    fn test_type_without_hook_or_rules_is_skipped() {
        let mut rules = RuleSet::new();
        rules.add(|task: &mut Task| task.name.push_str("-checked"));
        assert_eq!(rules.rule_count::<Task>(), 1);
        assert_eq!(rules.rule_count::<Limits>(), 0);

        let mut task = Task {
            name: "build".to_string(),
            ..Task::default()
        };
        rules.process(&mut task).unwrap();
        assert_eq!(task.name, "build-checked");
    }

    #[test]
    fn test_process_spec_rejects_other_type() {
        let rules = RuleSet::new();
        let spec = spec_of::<Task>().unwrap();
        let mut limits = Limits::default();
        let err = rules.process_spec(&spec, &mut limits).unwrap_err();
        assert!(matches!(err, ProcessError::TypeMismatch { .. }));
    }

    #[test]
    fn test_first_derivation_logs_to_configured_dispatch() {
        #[derive(Debug, Default)]
        struct Stage {
            order: u8,
        }

        impl Params for Stage {
            fn fields() -> Vec<FieldDecl> {
                vec![FieldDecl::flag::<u8>("order", "order")]
            }

            fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
                match index {
                    0 => Some(Slot::value(&mut self.order)),
                    _ => None,
                }
            }
        }

        let (log, captured) = capture();
        let mut rules = RuleSet::with_config(InitConfig::default().with_log(log));
        rules.add(|stage: &mut Stage| stage.order += 1);

        let mut stage = Stage::default();
        rules.process(&mut stage).unwrap();

        assert_eq!(stage.order, 1);
        let text = captured.text();
        assert!(text.contains("Derived parameter spec"), "log: {text}");
        assert!(text.contains("Applying rule"), "log: {text}");
    }
}
