//! Parameter spec model and derivation.
//!
//! A [`ParamSpec`] is the bindable surface of one [`Params`] type: its flags
//! by name, at most one positional [`Argument`], and the [`Inline`]
//! structures whose own surfaces are merged into it. Specs are derived once
//! per type and cached for the life of the process.

use std::any::{TypeId, type_name};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use crate::field::{Binding, FieldKind, InitFn, Params};

/// Address of a field relative to a root structure.
///
/// Each step is a declared field index. The path is never empty; its length
/// is the nesting depth of the addressed field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<usize>);

impl FieldPath {
    /// Path to a field of the root structure.
    pub fn root(index: usize) -> Self {
        Self(vec![index])
    }

    /// Builds a path from explicit steps; `None` if there are none.
    ///
    /// # Examples
    ///
    /// ```
    /// use param_bind_core::FieldPath;
    ///
    /// let path = FieldPath::new([2, 0]).unwrap();
    /// assert_eq!(path.depth(), 2);
    /// assert!(FieldPath::new([]).is_none());
    /// ```
    pub fn new(steps: impl IntoIterator<Item = usize>) -> Option<Self> {
        let steps: Vec<usize> = steps.into_iter().collect();
        (!steps.is_empty()).then_some(Self(steps))
    }

    /// Path to field `index` of the structure at this path.
    pub fn child(&self, index: usize) -> Self {
        let mut steps = self.0.clone();
        steps.push(index);
        Self(steps)
    }

    /// This path re-rooted below `prefix`.
    pub fn prefixed(&self, prefix: &FieldPath) -> Self {
        let mut steps = prefix.0.clone();
        steps.extend_from_slice(&self.0);
        Self(steps)
    }

    pub fn steps(&self) -> &[usize] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", steps.join("."))
    }
}

/// Whether a flag may be given without a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Elide {
    pub allow: bool,
}

/// A named flag bound to one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flag {
    pub name: String,
    /// Dotted field name from the root (e.g. `common.verbose`).
    pub field: String,
    pub path: FieldPath,
    pub elide: Elide,
}

/// The positional-argument field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Argument {
    pub field: String,
    pub path: FieldPath,
}

/// A nested structure merged into its parent's surface.
#[derive(Debug, Clone, Serialize)]
pub struct Inline {
    pub field: String,
    pub path: FieldPath,
    pub spec: Arc<ParamSpec>,
}

/// Bindable surface of a [`Params`] type.
#[derive(Clone, Serialize)]
pub struct ParamSpec {
    pub type_name: &'static str,
    #[serde(skip)]
    type_id: TypeId,
    /// Flags of this type and of every inlined structure, by name.
    pub flags: BTreeMap<String, Flag>,
    pub args: Option<Argument>,
    /// Directly inlined structures in declaration order.
    pub inlines: Vec<Inline>,
    #[serde(rename = "has_init", serialize_with = "serialize_present")]
    init: Option<InitFn>,
}

fn serialize_present<S: Serializer>(
    init: &Option<InitFn>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(init.is_some())
}

impl ParamSpec {
    pub(crate) fn empty<T: Params>() -> Self {
        Self {
            type_name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            flags: BTreeMap::new(),
            args: None,
            inlines: Vec::new(),
            init: T::INIT,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.flags.get(name)
    }

    /// Returns `true` if the type declares a custom-initialization hook.
    pub fn has_init(&self) -> bool {
        self.init.is_some()
    }

    pub(crate) fn init(&self) -> Option<InitFn> {
        self.init
    }

    /// Every inline reachable from this spec, with paths rooted here.
    ///
    /// Entries are listed in pre-order: each inline precedes the inlines
    /// nested inside it, and siblings keep declaration order.
    pub fn all_inlines(&self) -> Vec<Inline> {
        let mut collected = Vec::new();
        collect_inlines(&self.inlines, None, &mut collected);
        collected
    }

    fn insert_flag(&mut self, flag: Flag) -> Result<(), SpecError> {
        if let Some(existing) = self.flags.get(&flag.name) {
            return Err(SpecError::DuplicateFlagName {
                name: flag.name,
                first: existing.field.clone(),
                second: flag.field,
            });
        }
        self.flags.insert(flag.name.clone(), flag);
        Ok(())
    }

    fn insert_argument(&mut self, argument: Argument) -> Result<(), SpecError> {
        if let Some(existing) = &self.args {
            return Err(SpecError::MultipleArgumentFields {
                first: existing.field.clone(),
                second: argument.field,
            });
        }
        self.args = Some(argument);
        Ok(())
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("type_name", &self.type_name)
            .field("flags", &self.flags)
            .field("args", &self.args)
            .field("inlines", &self.inlines)
            .field("has_init", &self.has_init())
            .finish()
    }
}

fn collect_inlines(inlines: &[Inline], parent: Option<&Inline>, out: &mut Vec<Inline>) {
    for inline in inlines {
        let rooted = match parent {
            Some(parent) => Inline {
                field: format!("{}.{}", parent.field, inline.field),
                path: inline.path.prefixed(&parent.path),
                spec: Arc::clone(&inline.spec),
            },
            None => inline.clone(),
        };
        out.push(rooted.clone());
        collect_inlines(&inline.spec.inlines, Some(&rooted), out);
    }
}

/// Errors raised while deriving a [`ParamSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// Two fields map to the same flag name.
    #[error("duplicate flag name '{name}' on fields '{first}' and '{second}'")]
    DuplicateFlagName {
        name: String,
        first: String,
        second: String,
    },
    /// More than one field is argument-bound.
    #[error("multiple argument fields '{first}' and '{second}'")]
    MultipleArgumentFields { first: String, second: String },
    /// An inline-marked field is not a structure.
    #[error("inline field '{field}' is not a structure: {kind}")]
    InvalidInlineField { field: String, kind: String },
    /// The argument-bound field is not a sequence.
    #[error("argument field '{field}' is not a sequence: {kind}")]
    InvalidArgumentField { field: String, kind: String },
    /// Elision allowed on a flag that cannot be set without a value.
    #[error("field '{field}' allows elision but is {kind}, not bool")]
    IncompatibleElision { field: String, kind: String },
    /// Flag name is empty, contains whitespace, or starts with `-`.
    #[error("invalid flag name '{name}' on field '{field}'")]
    InvalidFlagName { name: String, field: String },
    /// A type inlines itself, directly or through other types.
    #[error("type '{0}' inlines itself")]
    RecursiveInline(String),
}

type CacheEntry = Result<Arc<ParamSpec>, SpecError>;

static SPEC_CACHE: LazyLock<RwLock<HashMap<TypeId, CacheEntry>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

thread_local! {
    static IN_PROGRESS: RefCell<Vec<TypeId>> = const { RefCell::new(Vec::new()) };
}

/// Returns the spec of `T`, deriving it on first use.
///
/// Results, including failures, are cached by type. Concurrent first calls
/// may both derive; the first stored result wins and both are identical.
pub fn spec_of<T: Params>() -> Result<Arc<ParamSpec>, SpecError> {
    let key = TypeId::of::<T>();
    if let Some(entry) = SPEC_CACHE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return entry.clone();
    }

    let derived = derive_guarded::<T>();
    SPEC_CACHE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key)
        .or_insert(derived)
        .clone()
}

fn derive_guarded<T: Params>() -> CacheEntry {
    let key = TypeId::of::<T>();
    let reentered = IN_PROGRESS.with_borrow_mut(|stack| {
        if stack.contains(&key) {
            true
        } else {
            stack.push(key);
            false
        }
    });
    if reentered {
        return Err(SpecError::RecursiveInline(type_name::<T>().to_string()));
    }

    let result = derive::<T>().map(Arc::new);
    IN_PROGRESS.with_borrow_mut(|stack| stack.retain(|id| *id != key));
    result
}

fn derive<T: Params>() -> Result<ParamSpec, SpecError> {
    let mut spec = ParamSpec::empty::<T>();

    for (index, decl) in T::fields().into_iter().enumerate() {
        let path = FieldPath::root(index);
        match decl.binding {
            Binding::Flag { names, elide } => {
                if elide.allow && !matches!(decl.kind, FieldKind::Bool) {
                    return Err(SpecError::IncompatibleElision {
                        field: decl.name.to_string(),
                        kind: decl.kind.to_string(),
                    });
                }
                if names.is_empty() {
                    return Err(SpecError::InvalidFlagName {
                        name: String::new(),
                        field: decl.name.to_string(),
                    });
                }
                for name in names {
                    validate_flag_name(&name, decl.name)?;
                    spec.insert_flag(Flag {
                        name,
                        field: decl.name.to_string(),
                        path: path.clone(),
                        elide,
                    })?;
                }
            }
            Binding::Argument => {
                if !matches!(decl.kind, FieldKind::Sequence) {
                    return Err(SpecError::InvalidArgumentField {
                        field: decl.name.to_string(),
                        kind: decl.kind.to_string(),
                    });
                }
                spec.insert_argument(Argument {
                    field: decl.name.to_string(),
                    path,
                })?;
            }
            Binding::Inline => {
                let FieldKind::Structure(structure) = decl.kind else {
                    return Err(SpecError::InvalidInlineField {
                        field: decl.name.to_string(),
                        kind: decl.kind.to_string(),
                    });
                };
                let nested = structure.spec()?;
                for flag in nested.flags.values() {
                    spec.insert_flag(Flag {
                        name: flag.name.clone(),
                        field: format!("{}.{}", decl.name, flag.field),
                        path: flag.path.prefixed(&path),
                        elide: flag.elide,
                    })?;
                }
                if let Some(args) = &nested.args {
                    spec.insert_argument(Argument {
                        field: format!("{}.{}", decl.name, args.field),
                        path: args.path.prefixed(&path),
                    })?;
                }
                spec.inlines.push(Inline {
                    field: decl.name.to_string(),
                    path,
                    spec: nested,
                });
            }
            Binding::Ignored => {}
        }
    }

    debug!(
        type_name = spec.type_name,
        flags = spec.flags.len(),
        args = spec.args.is_some(),
        inlines = spec.inlines.len(),
        "Derived parameter spec"
    );
    Ok(spec)
}

fn validate_flag_name(name: &str, field: &str) -> Result<(), SpecError> {
    if name.is_empty() || name.starts_with('-') || name.chars().any(char::is_whitespace) {
        return Err(SpecError::InvalidFlagName {
            name: name.to_string(),
            field: field.to_string(),
        });
    }
    Ok(())
}
