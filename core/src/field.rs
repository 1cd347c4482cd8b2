//! Table-driven field access for bindable parameter structures.
//!
//! A parameter structure declares its shape once through [`Params::fields`]
//! and exposes each declared field through [`Params::field_mut`]. Field
//! indices are positions in the declared list, so a
//! [`FieldPath`](crate::FieldPath) is a sequence of such indices walked
//! through [`Structure`] trait objects.
//!
//! # Examples
//!
//! ```
//! use param_bind_core::*;
//!
//! #[derive(Debug, Default)]
//! struct Build {
//!     release: bool,
//!     jobs: u32,
//!     targets: Vec<String>,
//! }
//!
//! impl Params for Build {
//!     fn fields() -> Vec<FieldDecl> {
//!         vec![
//!             FieldDecl::flag::<bool>("release", "release").elide(true),
//!             FieldDecl::flag::<u32>("jobs", "jobs").alias("j"),
//!             FieldDecl::argument::<Vec<String>>("targets"),
//!         ]
//!     }
//!
//!     fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
//!         match index {
//!             0 => Some(Slot::value(&mut self.release)),
//!             1 => Some(Slot::value(&mut self.jobs)),
//!             2 => Some(Slot::value(&mut self.targets)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let spec = spec_of::<Build>().unwrap();
//! assert_eq!(spec.flag("j").unwrap().field, "jobs");
//! assert_eq!(spec.args.as_ref().unwrap().field, "targets");
//! ```

use std::any::{Any, type_name};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::spec::{Elide, ParamSpec, SpecError, spec_of};

/// Boxed error carried through conversion, rule, and hook failures.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Error returned verbatim by a failing rule or custom-initialization hook.
pub type RuleError = BoxError;

/// Type-erased custom-initialization hook, see [`init_hook`].
pub type InitFn = fn(&mut dyn Any) -> Result<(), RuleError>;

/// A structure whose fields can be bound from command input.
pub trait Params: Any + Default {
    /// Custom-initialization hook run before any registered rule.
    ///
    /// Types opt in with `const INIT: Option<InitFn> = Some(init_hook::<Self>);`
    /// after implementing [`Initialize`].
    const INIT: Option<InitFn> = None;

    /// Declared fields, in declaration order.
    fn fields() -> Vec<FieldDecl>;

    /// Mutable access to the declared field at `index`.
    fn field_mut(&mut self, index: usize) -> Option<Slot<'_>>;
}

/// Custom initialization a parameter structure opts into.
pub trait Initialize {
    /// Runs once per processing pass, before registered rules for the type.
    fn initialize(&mut self) -> Result<(), RuleError>;
}

/// Adapts [`Initialize::initialize`] for storage in [`Params::INIT`].
pub fn init_hook<T: Initialize + Any>(value: &mut dyn Any) -> Result<(), RuleError> {
    match value.downcast_mut::<T>() {
        Some(value) => value.initialize(),
        None => Err(format!("init hook for '{}' applied to another type", type_name::<T>()).into()),
    }
}

/// Object-safe view over any [`Params`] implementor.
pub trait Structure: Any {
    /// Mutable access to the declared field at `index`.
    fn field_slot(&mut self, index: usize) -> Option<Slot<'_>>;

    /// Name of the concrete type.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Params> Structure for T {
    fn field_slot(&mut self, index: usize) -> Option<Slot<'_>> {
        self.field_mut(index)
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An optional nested structure that is created on first access.
pub trait OptionalInline {
    /// Returns `true` if the structure is present.
    fn is_set(&self) -> bool;

    /// Returns the structure, attaching a default instance if absent.
    fn get_or_insert(&mut self) -> &mut dyn Structure;

    /// Drops the structure.
    fn clear(&mut self);
}

impl<T: Params> OptionalInline for Option<T> {
    fn is_set(&self) -> bool {
        self.is_some()
    }

    fn get_or_insert(&mut self) -> &mut dyn Structure {
        self.get_or_insert_with(T::default)
    }

    fn clear(&mut self) {
        *self = None;
    }
}

/// Mutable handle to one declared field.
pub enum Slot<'a> {
    /// A leaf that converts raw strings.
    Value(&'a mut dyn FieldValue),
    /// A nested structure that is always present.
    Inline(&'a mut dyn Structure),
    /// A nested structure that may be absent.
    Optional(&'a mut dyn OptionalInline),
    /// A declared field with no conversion support.
    Opaque(&'static str),
}

impl<'a> Slot<'a> {
    pub fn value<V: FieldValue>(value: &'a mut V) -> Self {
        Slot::Value(value)
    }

    pub fn inline<T: Params>(value: &'a mut T) -> Self {
        Slot::Inline(value)
    }

    pub fn optional<T: Params>(value: &'a mut Option<T>) -> Self {
        Slot::Optional(value)
    }

    pub fn opaque<V>(_value: &'a mut V) -> Self {
        Slot::Opaque(type_name::<V>())
    }
}

impl fmt::Debug for Slot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Value(_) => f.write_str("Slot::Value"),
            Slot::Inline(inner) => write!(f, "Slot::Inline({})", inner.type_name()),
            Slot::Optional(inner) => write!(f, "Slot::Optional(set: {})", inner.is_set()),
            Slot::Opaque(type_name) => write!(f, "Slot::Opaque({type_name})"),
        }
    }
}

/// Failure converting a raw string into a field.
#[derive(Debug, Error)]
pub enum ValueError {
    /// The field cannot be populated from a string.
    #[error("unsupported field kind '{0}'")]
    Unsupported(&'static str),
    /// The raw string did not convert.
    #[error(transparent)]
    Invalid(BoxError),
}

/// A field that is populated from raw input strings.
///
/// Scalars replace their value; sequences append one element per call.
/// A failed conversion leaves scalar fields untouched.
pub trait FieldValue {
    fn decode(&mut self, raw: &str) -> Result<(), ValueError>;

    /// Declared kind, used during spec derivation.
    fn kind() -> FieldKind
    where
        Self: Sized;
}

/// Error for boolean strings outside the accepted spellings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid boolean '{0}'")]
pub struct ParseBoolError(String);

/// Parses `1 t T TRUE true True` and `0 f F FALSE false False`.
///
/// # Examples
///
/// ```
/// use param_bind_core::parse_bool;
///
/// assert_eq!(parse_bool("T").unwrap(), true);
/// assert_eq!(parse_bool("0").unwrap(), false);
/// assert!(parse_bool("yes").is_err());
/// ```
pub fn parse_bool(raw: &str) -> Result<bool, ParseBoolError> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(ParseBoolError(raw.to_string())),
    }
}

impl FieldValue for bool {
    fn decode(&mut self, raw: &str) -> Result<(), ValueError> {
        *self = parse_bool(raw).map_err(|err| ValueError::Invalid(Box::new(err)))?;
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::Bool
    }
}

macro_rules! from_str_value {
    ($($ty:ty),+ $(,)?) => {$(
        impl FieldValue for $ty {
            fn decode(&mut self, raw: &str) -> Result<(), ValueError> {
                *self = raw
                    .parse::<$ty>()
                    .map_err(|err| ValueError::Invalid(Box::new(err)))?;
                Ok(())
            }

            fn kind() -> FieldKind {
                FieldKind::Scalar
            }
        }
    )+};
}

from_str_value!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, char, String,
    PathBuf,
);

impl<V: FieldValue + Default> FieldValue for Option<V> {
    fn decode(&mut self, raw: &str) -> Result<(), ValueError> {
        match self {
            Some(value) => value.decode(raw),
            None => {
                let mut value = V::default();
                value.decode(raw)?;
                *self = Some(value);
                Ok(())
            }
        }
    }

    fn kind() -> FieldKind {
        V::kind()
    }
}

impl<V: FieldValue + Default> FieldValue for Vec<V> {
    fn decode(&mut self, raw: &str) -> Result<(), ValueError> {
        let mut value = V::default();
        value.decode(raw)?;
        self.push(value);
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::Sequence
    }
}

/// Reference to a nested structure type, resolved lazily during derivation.
#[derive(Clone, Copy)]
pub struct StructureRef {
    pub type_name: &'static str,
    derive: fn() -> Result<Arc<ParamSpec>, SpecError>,
}

impl StructureRef {
    /// Derives (or fetches the cached) spec of the referenced type.
    pub fn spec(&self) -> Result<Arc<ParamSpec>, SpecError> {
        (self.derive)()
    }
}

impl fmt::Debug for StructureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StructureRef").field(&self.type_name).finish()
    }
}

/// Declared kind of a field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Bool,
    Scalar,
    /// Growable ordered sequence.
    Sequence,
    Structure(StructureRef),
    /// Any other type, named for diagnostics.
    Other(&'static str),
}

impl FieldKind {
    pub fn of<V: FieldValue>() -> Self {
        V::kind()
    }

    pub fn structure<T: Params>() -> Self {
        FieldKind::Structure(StructureRef {
            type_name: type_name::<T>(),
            derive: spec_of::<T>,
        })
    }

    pub fn other<V>() -> Self {
        FieldKind::Other(type_name::<V>())
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Bool => f.write_str("bool"),
            FieldKind::Scalar => f.write_str("scalar"),
            FieldKind::Sequence => f.write_str("sequence"),
            FieldKind::Structure(structure) => write!(f, "structure '{}'", structure.type_name),
            FieldKind::Other(type_name) => write!(f, "'{type_name}'"),
        }
    }
}

/// How a declared field participates in binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Bound to one or more flag names.
    Flag { names: Vec<String>, elide: Elide },
    /// Bound to the positional arguments.
    Argument,
    /// Nested structure merged into the parent's surface.
    Inline,
    Ignored,
}

/// One declared field of a parameter structure.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    /// Field name, used in diagnostics.
    pub name: &'static str,
    pub kind: FieldKind,
    pub binding: Binding,
}

impl FieldDecl {
    pub fn new(name: &'static str, kind: FieldKind, binding: Binding) -> Self {
        Self {
            name,
            kind,
            binding,
        }
    }

    /// Declares a field bound to the flag `flag`.
    pub fn flag<V: FieldValue>(name: &'static str, flag: &str) -> Self {
        Self::new(
            name,
            V::kind(),
            Binding::Flag {
                names: vec![flag.to_string()],
                elide: Elide::default(),
            },
        )
    }

    /// Declares the positional-argument field.
    pub fn argument<V: FieldValue>(name: &'static str) -> Self {
        Self::new(name, V::kind(), Binding::Argument)
    }

    /// Declares a nested structure whose surface is merged into the parent.
    pub fn inline<T: Params>(name: &'static str) -> Self {
        Self::new(name, FieldKind::structure::<T>(), Binding::Inline)
    }

    pub fn ignored<V>(name: &'static str) -> Self {
        Self::new(name, FieldKind::other::<V>(), Binding::Ignored)
    }

    /// Adds another flag name for the same field. No-op for non-flag fields.
    pub fn alias(mut self, flag: &str) -> Self {
        if let Binding::Flag { names, .. } = &mut self.binding {
            names.push(flag.to_string());
        }
        self
    }

    /// Sets whether the flag may appear without a value. No-op for non-flag fields.
    pub fn elide(mut self, allow: bool) -> Self {
        if let Binding::Flag { elide, .. } = &mut self.binding {
            elide.allow = allow;
        }
        self
    }
}
