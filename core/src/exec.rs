//! Dispatch configuration and the command spec registry.
//!
//! [`CommandSpecs`] maps target paths (`["remote", "add"]`) to the spec of
//! the command registered there, plus optional opaque metadata. Every
//! registered command also contributes its flags to the shared flag set of
//! its own path and of each ancestor path, so a parent knows every flag its
//! subcommands accept. Collisions are settled by the policies in
//! [`ExecConfig`].
//!
//! # Example
//!
//! ```
//! use param_bind_core::*;
//!
//! #[derive(Debug, Default)]
//! struct Add {
//!     fetch: bool,
//!     names: Vec<String>,
//! }
//!
//! impl Params for Add {
//!     fn fields() -> Vec<FieldDecl> {
//!         vec![
//!             FieldDecl::flag::<bool>("fetch", "fetch").elide(true),
//!             FieldDecl::argument::<Vec<String>>("names"),
//!         ]
//!     }
//!
//!     fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
//!         match index {
//!             0 => Some(Slot::value(&mut self.fetch)),
//!             1 => Some(Slot::value(&mut self.names)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let mut specs = CommandSpecs::new();
//! specs.register::<Add>(&["remote", "add"]).unwrap();
//! assert!(specs.flags(&["remote"]).unwrap().contains_key("fetch"));
//!
//! let input = Input::new().with_target(["remote", "rename"]);
//! let err = specs.resolve(&input).unwrap_err();
//! assert_eq!(err.to_string(), "unspecified target 'remote rename'");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{Dispatch, debug, dispatcher};

use crate::field::Params;
use crate::input::Input;
use crate::merge::{
    ConflictError, ExecConflict, FlagConflict, Info, InfoConflict, default_exec_conflict,
    default_flag_conflict, default_info_conflict, merge_flags, resolve_overwrite,
};
use crate::spec::{Flag, ParamSpec, SpecError, spec_of};

/// Invoked when an input's target has no registered command.
pub type ExecUnspecified = Arc<dyn Fn(&Input) -> Result<(), ExecError> + Send + Sync>;

/// Errors raised by the command registry.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unspecified target '{0}'")]
    Unspecified(String),
    #[error("target '{target}': {source}")]
    Conflict {
        target: String,
        #[source]
        source: ConflictError,
    },
    #[error("invalid parameter spec: {0}")]
    Spec(#[from] SpecError),
}

/// Fails with [`ExecError::Unspecified`] naming the input's target.
pub fn default_exec_unspecified(input: &Input) -> Result<(), ExecError> {
    Err(ExecError::Unspecified(input.target_display()))
}

/// Policies and logging for [`CommandSpecs`].
#[derive(Clone)]
pub struct ExecConfig {
    /// Logger scoped around registration and resolution; discards by default.
    pub log: Dispatch,
    pub exec_unspecified: ExecUnspecified,
    pub exec_conflict: ExecConflict,
    pub info_conflict: InfoConflict,
    pub flag_conflict: FlagConflict,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            log: Dispatch::none(),
            exec_unspecified: Arc::new(default_exec_unspecified),
            exec_conflict: Arc::new(default_exec_conflict),
            info_conflict: Arc::new(default_info_conflict),
            flag_conflict: Arc::new(default_flag_conflict),
        }
    }
}

impl ExecConfig {
    pub fn with_log(mut self, log: Dispatch) -> Self {
        self.log = log;
        self
    }

    pub fn with_exec_unspecified(
        mut self,
        policy: impl Fn(&Input) -> Result<(), ExecError> + Send + Sync + 'static,
    ) -> Self {
        self.exec_unspecified = Arc::new(policy);
        self
    }

    pub fn with_exec_conflict(
        mut self,
        policy: impl Fn(&ParamSpec, &ParamSpec) -> Result<bool, ConflictError> + Send + Sync + 'static,
    ) -> Self {
        self.exec_conflict = Arc::new(policy);
        self
    }

    pub fn with_info_conflict(
        mut self,
        policy: impl Fn(&Info, &Info) -> Result<bool, ConflictError> + Send + Sync + 'static,
    ) -> Self {
        self.info_conflict = Arc::new(policy);
        self
    }

    pub fn with_flag_conflict(
        mut self,
        policy: impl Fn(&Flag, &Flag) -> Result<(), ConflictError> + Send + Sync + 'static,
    ) -> Self {
        self.flag_conflict = Arc::new(policy);
        self
    }
}

impl fmt::Debug for ExecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecConfig")
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Entry {
    exec: Option<Arc<ParamSpec>>,
    info: Option<Info>,
    flags: BTreeMap<String, Flag>,
}

/// Command specs and metadata keyed by target path.
#[derive(Default)]
pub struct CommandSpecs {
    config: ExecConfig,
    entries: BTreeMap<Vec<String>, Entry>,
}

impl fmt::Debug for CommandSpecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpecs")
            .field("config", &self.config)
            .field("targets", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CommandSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Registers the spec of `T` at `target`.
    pub fn register<T: Params>(&mut self, target: &[&str]) -> Result<(), ExecError> {
        let spec = spec_of::<T>()?;
        self.register_exec(target, spec)
    }

    /// Registers a command spec at `target`.
    ///
    /// When the path already holds a spec, `exec_conflict` decides whether the
    /// update replaces it. A kept original leaves the registry unchanged. An
    /// applied update merges its flags into `target` and every ancestor path
    /// under `flag_conflict`; if any merge is refused nothing is changed.
    /// Replacing a spec first withdraws the flags only it contributed.
    pub fn register_exec(&mut self, target: &[&str], spec: Arc<ParamSpec>) -> Result<(), ExecError> {
        let log = self.config.log.clone();
        dispatcher::with_default(&log, || {
            let key = target_key(target);

            let mut replacing = false;
            if let Some(original) = self.entries.get(&key).and_then(|entry| entry.exec.as_ref()) {
                let overwrite = (self.config.exec_conflict)(&**original, &*spec)
                    .map_err(|source| conflict(&key, source))?;
                if !overwrite {
                    debug!(command = %key.join(" "), kept = original.type_name, "Kept existing exec");
                    return Ok(());
                }
                replacing = true;
            }

            let mut merged = Vec::with_capacity(key.len() + 1);
            for depth in 0..=key.len() {
                let prefix = &key[..depth];
                let mut flags = if replacing {
                    self.flags_without(prefix, &key)
                        .map_err(|source| conflict(prefix, source))?
                } else {
                    self.entries
                        .get(prefix)
                        .map(|entry| entry.flags.clone())
                        .unwrap_or_default()
                };
                merge_flags(&mut flags, spec.flags.values(), &*self.config.flag_conflict)
                    .map_err(|source| conflict(prefix, source))?;
                merged.push((prefix.to_vec(), flags));
            }

            for (prefix, flags) in merged {
                self.entries.entry(prefix).or_default().flags = flags;
            }

            debug!(
                command = %key.join(" "),
                type_name = spec.type_name,
                flags = spec.flags.len(),
                "Registered exec"
            );
            self.entries.entry(key).or_default().exec = Some(spec);
            Ok(())
        })
    }

    /// Rebuilds the flag set of `prefix` from every exec at or below it,
    /// leaving out the one registered at `skip`.
    fn flags_without(
        &self,
        prefix: &[String],
        skip: &[String],
    ) -> Result<BTreeMap<String, Flag>, ConflictError> {
        let mut flags = BTreeMap::new();
        for (key, entry) in self.entries.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if key.as_slice() == skip {
                continue;
            }
            if let Some(exec) = &entry.exec {
                merge_flags(&mut flags, exec.flags.values(), &*self.config.flag_conflict)?;
            }
        }
        Ok(flags)
    }

    /// Registers opaque metadata at `target`, settling a collision with
    /// `info_conflict`.
    pub fn register_info(&mut self, target: &[&str], info: Info) -> Result<(), ExecError> {
        let log = self.config.log.clone();
        dispatcher::with_default(&log, || {
            let key = target_key(target);
            let entry = self.entries.entry(key.clone()).or_default();

            let resolved = match entry.info.take() {
                Some(original) => {
                    let kept = Arc::clone(&original);
                    match resolve_overwrite(original, info, |o, u| (self.config.info_conflict)(o, u)) {
                        Ok(resolved) => resolved,
                        Err(source) => {
                            entry.info = Some(kept);
                            return Err(conflict(&key, source));
                        }
                    }
                }
                None => info,
            };
            entry.info = Some(resolved);
            debug!(command = %key.join(" "), "Registered info");
            Ok(())
        })
    }

    /// The command spec registered at `target`.
    pub fn exec(&self, target: &[&str]) -> Option<&Arc<ParamSpec>> {
        self.entries.get(&target_key(target))?.exec.as_ref()
    }

    /// Metadata registered at `target`.
    pub fn info(&self, target: &[&str]) -> Option<&Info> {
        self.entries.get(&target_key(target))?.info.as_ref()
    }

    /// Flags accepted at `target` or below it.
    pub fn flags(&self, target: &[&str]) -> Option<&BTreeMap<String, Flag>> {
        self.entries
            .get(&target_key(target))
            .map(|entry| &entry.flags)
    }

    /// Paths that hold a command spec, in lexicographic order.
    pub fn targets(&self) -> impl Iterator<Item = &[String]> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.exec.is_some())
            .map(|(key, _)| key.as_slice())
    }

    /// Looks up the command spec for `input.target`.
    ///
    /// An unknown target is handed to `exec_unspecified`; when that policy
    /// succeeds the result is `Ok(None)`.
    pub fn resolve(&self, input: &Input) -> Result<Option<&Arc<ParamSpec>>, ExecError> {
        dispatcher::with_default(&self.config.log, || {
            let exec = self
                .entries
                .get(input.target.as_slice())
                .and_then(|entry| entry.exec.as_ref());
            match exec {
                Some(spec) => {
                    debug!(command = %input.target_display(), type_name = spec.type_name, "Resolved target");
                    Ok(Some(spec))
                }
                None => {
                    debug!(command = %input.target_display(), "Target not registered");
                    (self.config.exec_unspecified)(input)?;
                    Ok(None)
                }
            }
        })
    }
}

fn target_key(target: &[&str]) -> Vec<String> {
    target.iter().map(ToString::to_string).collect()
}

fn conflict(target: &[String], source: ConflictError) -> ExecError {
    ExecError::Conflict {
        target: target.join(" "),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;
    use crate::field::{FieldDecl, Slot};

    #[derive(Debug, Default)]
    struct Add {
        verbose: bool,
        url: String,
    }

    impl Params for Add {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::flag::<bool>("verbose", "verbose").elide(true),
                FieldDecl::flag::<String>("url", "url"),
            ]
        }

        fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
            match index {
                0 => Some(Slot::value(&mut self.verbose)),
                1 => Some(Slot::value(&mut self.url)),
                _ => None,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Remove {
        verbose: bool,
        force: bool,
    }

    impl Params for Remove {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::flag::<bool>("verbose", "verbose"),
                FieldDecl::flag::<bool>("force", "force").elide(true),
            ]
        }

        fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
            match index {
                0 => Some(Slot::value(&mut self.verbose)),
                1 => Some(Slot::value(&mut self.force)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_flags_propagate_to_ancestors() {
        let mut specs = CommandSpecs::new();
        specs.register::<Add>(&["remote", "add"]).unwrap();

        for target in [&[][..], &["remote"][..], &["remote", "add"][..]] {
            let flags = specs.flags(target).unwrap();
            assert!(flags.contains_key("verbose"), "missing at {target:?}");
            assert!(flags.contains_key("url"));
        }
        assert!(specs.exec(&["remote"]).is_none());
        assert_eq!(specs.targets().count(), 1);
    }

    #[test]
    fn test_sibling_flag_conflict_is_atomic() {
        let mut specs = CommandSpecs::new();
        specs.register::<Add>(&["remote", "add"]).unwrap();

        let err = specs.register::<Remove>(&["remote", "remove"]).unwrap_err();
        assert!(matches!(&err, ExecError::Conflict { target, .. } if target.is_empty()));
        assert!(
            err.source()
                .unwrap()
                .to_string()
                .contains("incompatible elide behavior 'true' and 'false'")
        );

        assert!(specs.exec(&["remote", "remove"]).is_none());
        assert!(!specs.flags(&["remote"]).unwrap().contains_key("force"));
        assert!(specs.flags(&["remote", "remove"]).is_none());
    }

    #[test]
    fn test_second_exec_refused_by_default() {
        let mut specs = CommandSpecs::new();
        specs.register::<Add>(&["add"]).unwrap();

        let err = specs.register::<Add>(&["add"]).unwrap_err();
        assert!(err.to_string().contains("exec already exists"));
    }

    #[test]
    fn test_exec_conflict_policy_can_keep_or_replace() {
        let keep = ExecConfig::default()
            .with_exec_conflict(|_, _| Ok(false))
            .with_flag_conflict(|_, _| Ok(()));
        let mut specs = CommandSpecs::with_config(keep);
        specs.register::<Add>(&["sync"]).unwrap();
        specs.register::<Remove>(&["sync"]).unwrap();
        assert_eq!(
            ParamSpec::type_id(specs.exec(&["sync"]).unwrap()),
            ParamSpec::type_id(&spec_of::<Add>().unwrap())
        );
        assert!(!specs.flags(&["sync"]).unwrap().contains_key("force"));

        let replace = ExecConfig::default()
            .with_exec_conflict(|_, _| Ok(true))
            .with_flag_conflict(|_, _| Ok(()));
        let mut specs = CommandSpecs::with_config(replace);
        specs.register::<Add>(&["sync"]).unwrap();
        specs.register::<Remove>(&["sync"]).unwrap();
        assert_eq!(
            ParamSpec::type_id(specs.exec(&["sync"]).unwrap()),
            ParamSpec::type_id(&spec_of::<Remove>().unwrap())
        );
        assert!(specs.flags(&["sync"]).unwrap().contains_key("force"));
    }

    #[test]
    fn test_replaced_exec_flags_are_withdrawn() {
        let replace = ExecConfig::default()
            .with_exec_conflict(|_, _| Ok(true))
            .with_flag_conflict(|_, _| Ok(()));
        let mut specs = CommandSpecs::with_config(replace);
        specs.register::<Add>(&["sync", "push"]).unwrap();
        specs.register::<Add>(&["sync", "pull"]).unwrap();
        specs.register::<Remove>(&["sync", "push"]).unwrap();

        let push: Vec<_> = specs.flags(&["sync", "push"]).unwrap().keys().cloned().collect();
        assert_eq!(push, vec!["force", "verbose"]);

        for target in [&[][..], &["sync"][..]] {
            let flags = specs.flags(target).unwrap();
            assert!(flags.contains_key("force"), "missing at {target:?}");
            assert!(flags.contains_key("url"), "sibling flag dropped at {target:?}");
        }

        let mut specs = CommandSpecs::with_config(
            ExecConfig::default()
                .with_exec_conflict(|_, _| Ok(true))
                .with_flag_conflict(|_, _| Ok(())),
        );
        specs.register::<Add>(&["sync"]).unwrap();
        specs.register::<Remove>(&["sync"]).unwrap();
        for target in [&[][..], &["sync"][..]] {
            assert!(!specs.flags(target).unwrap().contains_key("url"), "stale at {target:?}");
        }
    }

    #[test]
    fn test_info_conflict_keeps_original() {
        let mut specs = CommandSpecs::new();
        specs.register_info(&["add"], Arc::new("add a remote")).unwrap();

        let err = specs.register_info(&["add"], Arc::new("other")).unwrap_err();
        assert!(matches!(
            err,
            ExecError::Conflict {
                source: ConflictError::InfoExists,
                ..
            }
        ));
        let info = specs.info(&["add"]).unwrap();
        assert_eq!(info.downcast_ref::<&str>(), Some(&"add a remote"));
    }

    #[test]
    fn test_resolve_known_and_unknown_targets() {
        let mut specs = CommandSpecs::new();
        specs.register::<Add>(&["remote", "add"]).unwrap();

        let input = Input::new().with_target(["remote", "add"]);
        assert!(specs.resolve(&input).unwrap().is_some());

        let err = specs.resolve(&Input::new().with_target(["remote"])).unwrap_err();
        assert_eq!(err.to_string(), "unspecified target 'remote'");
    }

    #[test]
    fn test_custom_unspecified_policy() {
        let config = ExecConfig::default().with_exec_unspecified(|_| Ok(()));
        let specs = CommandSpecs::with_config(config);
        let resolved = specs.resolve(&Input::new().with_target(["help"])).unwrap();
        assert!(resolved.is_none());
    }
}
