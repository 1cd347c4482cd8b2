//! Spec merging with pluggable conflict policies.
//!
//! When the same logical target receives parameter specs from more than one
//! source (a command registered twice, or shared flag sets composed across
//! commands), the pieces are combined here. Each collision is settled by a
//! policy function:
//!
//! - [`FlagConflict`] decides whether two flags of the same name can coexist;
//!   the original flag is always the one kept.
//! - [`ExecConflict`] and [`InfoConflict`] decide whether an update replaces
//!   the original command spec or metadata (`Ok(true)`), is dropped
//!   (`Ok(false)`), or aborts the merge.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use param_bind_core::*;
//!
//! let mut shared = BTreeMap::new();
//! let verbose = Flag {
//!     name: "verbose".into(),
//!     field: "verbose".into(),
//!     path: FieldPath::root(0),
//!     elide: Elide { allow: true },
//! };
//! merge_flags(&mut shared, [&verbose], &default_flag_conflict).unwrap();
//!
//! let strict = Flag { elide: Elide { allow: false }, ..verbose.clone() };
//! assert!(merge_flags(&mut shared, [&strict], &default_flag_conflict).is_err());
//! assert_eq!(shared["verbose"], verbose);
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::spec::{Flag, ParamSpec};

/// Opaque per-command metadata.
pub type Info = Arc<dyn Any + Send + Sync>;

/// Decides whether `update` may join a flag set that already holds `original`.
pub type FlagConflict = Arc<dyn Fn(&Flag, &Flag) -> Result<(), ConflictError> + Send + Sync>;

/// Decides whether `update` metadata replaces `original`.
pub type InfoConflict = Arc<dyn Fn(&Info, &Info) -> Result<bool, ConflictError> + Send + Sync>;

/// Decides whether an `update` command spec replaces `original`.
pub type ExecConflict =
    Arc<dyn Fn(&ParamSpec, &ParamSpec) -> Result<bool, ConflictError> + Send + Sync>;

/// A collision a policy refused to settle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// Two flags of the same name disagree on elision.
    #[error("flag '{name}': incompatible elide behavior '{original}' and '{update}'")]
    Elide {
        name: String,
        original: bool,
        update: bool,
    },
    /// Two specs were derived for different types.
    #[error("cannot merge spec of '{update}' into spec of '{original}'")]
    TypeMismatch {
        original: &'static str,
        update: &'static str,
    },
    /// Two specs bind the positional arguments to different fields.
    #[error("argument bound to both '{original}' and '{update}'")]
    Argument { original: String, update: String },
    /// A command spec is already registered.
    #[error("exec already exists: '{original}', rejected '{update}'")]
    ExecExists {
        original: &'static str,
        update: &'static str,
    },
    /// Command metadata is already registered.
    #[error("info already exists")]
    InfoExists,
    /// Refused by a caller-supplied policy.
    #[error("{0}")]
    Rejected(String),
}

/// Accepts flags unless they disagree on [`Elide::allow`](crate::Elide).
///
/// Any other difference is accepted; the original flag is kept.
pub fn default_flag_conflict(original: &Flag, update: &Flag) -> Result<(), ConflictError> {
    if original.elide.allow != update.elide.allow {
        return Err(ConflictError::Elide {
            name: original.name.clone(),
            original: original.elide.allow,
            update: update.elide.allow,
        });
    }
    Ok(())
}

/// Always refuses to replace existing metadata.
pub fn default_info_conflict(_original: &Info, _update: &Info) -> Result<bool, ConflictError> {
    Err(ConflictError::InfoExists)
}

/// Always refuses to replace an existing command spec.
pub fn default_exec_conflict(
    original: &ParamSpec,
    update: &ParamSpec,
) -> Result<bool, ConflictError> {
    Err(ConflictError::ExecExists {
        original: original.type_name,
        update: update.type_name,
    })
}

/// Merges `update` flags into `flags`.
///
/// Every collision is checked before anything is inserted, so a refused
/// merge leaves `flags` unchanged.
pub fn merge_flags<'f>(
    flags: &mut BTreeMap<String, Flag>,
    update: impl IntoIterator<Item = &'f Flag>,
    policy: &dyn Fn(&Flag, &Flag) -> Result<(), ConflictError>,
) -> Result<(), ConflictError> {
    let mut added: Vec<&Flag> = Vec::new();
    for flag in update {
        match flags.get(&flag.name) {
            Some(original) => policy(original, flag)?,
            None => added.push(flag),
        }
    }

    for flag in added {
        flags
            .entry(flag.name.clone())
            .or_insert_with(|| flag.clone());
    }
    Ok(())
}

/// Combines two specs of the same logical target.
///
/// Both specs must be derived for the same type, since flag paths address
/// fields of that type. Flags are the union under `policy`; the argument must
/// agree when both define one; inlines are the union by path, `original`
/// first.
pub fn merge_params(
    original: &ParamSpec,
    update: &ParamSpec,
    policy: &dyn Fn(&Flag, &Flag) -> Result<(), ConflictError>,
) -> Result<ParamSpec, ConflictError> {
    if ParamSpec::type_id(original) != ParamSpec::type_id(update) {
        return Err(ConflictError::TypeMismatch {
            original: original.type_name,
            update: update.type_name,
        });
    }

    let mut merged = original.clone();
    merge_flags(&mut merged.flags, update.flags.values(), policy)?;

    match (&original.args, &update.args) {
        (Some(left), Some(right)) if left.path != right.path => {
            return Err(ConflictError::Argument {
                original: left.field.clone(),
                update: right.field.clone(),
            });
        }
        (None, Some(right)) => merged.args = Some(right.clone()),
        _ => {}
    }

    for inline in &update.inlines {
        if !merged.inlines.iter().any(|known| known.path == inline.path) {
            merged.inlines.push(inline.clone());
        }
    }

    Ok(merged)
}

/// Applies an overwrite decision: `update` when the policy allows it,
/// `original` otherwise.
pub fn resolve_overwrite<T>(
    original: T,
    update: T,
    policy: impl FnOnce(&T, &T) -> Result<bool, ConflictError>,
) -> Result<T, ConflictError> {
    if policy(&original, &update)? {
        Ok(update)
    } else {
        Ok(original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDecl, Params, Slot};
    use crate::spec::{Elide, FieldPath, spec_of};

    fn flag(name: &str, index: usize, allow: bool) -> Flag {
        Flag {
            name: name.to_string(),
            field: name.to_string(),
            path: FieldPath::root(index),
            elide: Elide { allow },
        }
    }

    #[derive(Debug, Default)]
    struct Fetch {
        all: bool,
        remotes: Vec<String>,
    }

    impl Params for Fetch {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::flag::<bool>("all", "all").elide(true),
                FieldDecl::argument::<Vec<String>>("remotes"),
            ]
        }

        fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
            match index {
                0 => Some(Slot::value(&mut self.all)),
                1 => Some(Slot::value(&mut self.remotes)),
                _ => None,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Pull {
        rebase: bool,
        all: bool,
        refs: Vec<String>,
    }

    impl Params for Pull {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::flag::<bool>("rebase", "rebase").elide(true),
                FieldDecl::flag::<bool>("all", "all"),
                FieldDecl::argument::<Vec<String>>("refs"),
            ]
        }

        fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
            match index {
                0 => Some(Slot::value(&mut self.rebase)),
                1 => Some(Slot::value(&mut self.all)),
                2 => Some(Slot::value(&mut self.refs)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_equal_elide_keeps_original() {
        let mut flags = BTreeMap::new();
        let original = flag("verbose", 0, true);
        merge_flags(&mut flags, [&original], &default_flag_conflict).unwrap();

        let update = flag("verbose", 3, true);
        merge_flags(&mut flags, [&update], &default_flag_conflict).unwrap();
        assert_eq!(flags["verbose"].path, FieldPath::root(0));
    }

    #[test]
    fn test_differing_elide_is_refused_atomically() {
        let mut flags = BTreeMap::new();
        merge_flags(&mut flags, [&flag("verbose", 0, true)], &default_flag_conflict).unwrap();

        let extra = flag("quiet", 1, false);
        let clash = flag("verbose", 2, false);
        let err = merge_flags(&mut flags, [&extra, &clash], &default_flag_conflict).unwrap_err();

        assert_eq!(
            err,
            ConflictError::Elide {
                name: "verbose".to_string(),
                original: true,
                update: false,
            }
        );
        assert!(!flags.contains_key("quiet"));
    }

    #[test]
    fn test_custom_policy_can_be_stricter() {
        let strict = |original: &Flag, update: &Flag| {
            if original.path != update.path {
                return Err(ConflictError::Rejected(format!(
                    "flag '{}' bound to different fields",
                    original.name
                )));
            }
            Ok(())
        };

        let mut flags = BTreeMap::new();
        merge_flags(&mut flags, [&flag("level", 0, false)], &strict).unwrap();
        let err = merge_flags(&mut flags, [&flag("level", 1, false)], &strict).unwrap_err();
        assert!(matches!(err, ConflictError::Rejected(_)));
    }

    #[test]
    fn test_merge_params_refuses_other_type() {
        let fetch = spec_of::<Fetch>().unwrap();
        let pull = spec_of::<Pull>().unwrap();

        let lax = |_: &Flag, _: &Flag| Ok(());
        let err = merge_params(&fetch, &pull, &lax).unwrap_err();
        assert!(matches!(err, ConflictError::TypeMismatch { .. }));
        assert!(err.to_string().contains("Pull"));

        let input = crate::input::Input::new().with_flag("rebase", "true");
        let mut target = Fetch::default();
        let decoded = crate::decode::Decoder::new(input).decode_spec(&fetch, &mut target);
        assert!(decoded.is_err());
        assert!(!target.all);
    }

    #[test]
    fn test_merge_params_refuses_elide_mismatch() {
        let fetch = spec_of::<Fetch>().unwrap();
        let mut strict = (*fetch).clone();
        strict.flags.get_mut("all").unwrap().elide = Elide { allow: false };

        let err = merge_params(&fetch, &strict, &default_flag_conflict).unwrap_err();
        assert!(matches!(err, ConflictError::Elide { ref name, .. } if name == "all"));
    }

    #[test]
    fn test_merge_params_unions_flags_and_checks_argument() {
        let fetch = spec_of::<Fetch>().unwrap();

        let mut partial = (*fetch).clone();
        partial.flags.clear();
        partial.args = None;
        let merged = merge_params(&partial, &fetch, &default_flag_conflict).unwrap();
        assert_eq!(merged.flags.len(), 1);
        assert_eq!(merged.flag("all").unwrap().elide, Elide { allow: true });
        assert_eq!(merged.args.as_ref().unwrap().field, "remotes");
        assert_eq!(ParamSpec::type_id(&merged), ParamSpec::type_id(&fetch));

        let mut moved = (*fetch).clone();
        if let Some(args) = moved.args.as_mut() {
            args.path = FieldPath::root(0);
        }
        let err = merge_params(&fetch, &moved, &default_flag_conflict).unwrap_err();
        assert!(matches!(err, ConflictError::Argument { .. }));
    }

    #[test]
    fn test_default_exec_and_info_policies_refuse() {
        let fetch = spec_of::<Fetch>().unwrap();
        let pull = spec_of::<Pull>().unwrap();
        assert!(matches!(
            resolve_overwrite(Arc::clone(&fetch), pull, |o, u| default_exec_conflict(o, u)),
            Err(ConflictError::ExecExists { .. })
        ));

        let original: Info = Arc::new("fetch objects");
        let update: Info = Arc::new("download objects");
        assert_eq!(
            resolve_overwrite(original, update, default_info_conflict).unwrap_err(),
            ConflictError::InfoExists
        );
    }

    #[test]
    fn test_overwrite_policy_replaces() {
        let fetch = spec_of::<Fetch>().unwrap();
        let pull = spec_of::<Pull>().unwrap();

        let kept =
            resolve_overwrite(Arc::clone(&fetch), Arc::clone(&pull), |_, _| Ok(false)).unwrap();
        assert!(Arc::ptr_eq(&kept, &fetch));

        let replaced =
            resolve_overwrite(Arc::clone(&fetch), Arc::clone(&pull), |_, _| Ok(true)).unwrap();
        assert!(Arc::ptr_eq(&replaced, &pull));
    }
}
