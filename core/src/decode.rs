//! Binding tokenized input into parameter structures.
//!
//! Flags are applied in input order and the first failure stops decoding.
//! Mutations made before a failure are kept; decode into a scratch value
//! when the target must stay untouched on error.
//!
//! # Example
//!
//! ```
//! use param_bind_core::*;
//!
//! #[derive(Debug, Default)]
//! struct Copy {
//!     force: bool,
//!     paths: Vec<std::path::PathBuf>,
//! }
//!
//! impl Params for Copy {
//!     fn fields() -> Vec<FieldDecl> {
//!         vec![
//!             FieldDecl::flag::<bool>("force", "force").alias("f").elide(true),
//!             FieldDecl::argument::<Vec<std::path::PathBuf>>("paths"),
//!         ]
//!     }
//!
//!     fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
//!         match index {
//!             0 => Some(Slot::value(&mut self.force)),
//!             1 => Some(Slot::value(&mut self.paths)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let input = Input::new().with_flag("f", "true").with_arg("a.txt").with_arg("b/");
//! let mut params = Copy::default();
//! Decoder::new(input).decode(&mut params).unwrap();
//!
//! assert!(params.force);
//! assert_eq!(params.paths.len(), 2);
//! ```

use thiserror::Error;
use tracing::{Dispatch, debug, dispatcher, trace};

use crate::access::{self, AccessError};
use crate::field::{BoxError, Params, Slot, Structure, ValueError};
use crate::input::{Input, InputFlag};
use crate::spec::{FieldPath, ParamSpec, SpecError, spec_of};

/// Errors raised while decoding input into a parameter structure.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The target type's spec could not be derived.
    #[error("invalid parameter spec: {0}")]
    Spec(#[from] SpecError),
    /// The input names a flag the spec does not declare.
    #[error("unknown flag '{0}'")]
    UnknownFlag(String),
    /// The bound field cannot be populated from a string.
    #[error("unsupported field type '{type_name}' for field '{field}'")]
    UnsupportedFieldType {
        field: String,
        type_name: &'static str,
    },
    /// A flag value did not convert into the field's type.
    #[error("invalid value '{raw}' for flag '{name}'")]
    InvalidValue {
        name: String,
        raw: String,
        #[source]
        source: BoxError,
    },
    /// A positional value did not convert into the argument's element type.
    #[error("invalid value '{raw}' for argument {index} of '{field}'")]
    InvalidArgument {
        field: String,
        index: usize,
        raw: String,
        #[source]
        source: BoxError,
    },
    /// Positional values were given but the spec has no argument field.
    #[error("unexpected arguments: {count} given, none accepted")]
    UnexpectedArgs { count: usize },
    /// A field path steps through something that is not a structure.
    #[error("field '{field}' is not reachable, {path} does not address a structure")]
    NotAStructure { field: String, path: FieldPath },
    /// The structure has no accessor for a declared field.
    #[error("field '{field}' at {path} has no accessor")]
    MissingField { field: String, path: FieldPath },
    /// The target is not the type the spec was derived for.
    #[error("target is '{actual}', spec was derived for '{expected}'")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

impl DecodeError {
    fn access(err: AccessError, field: &str) -> Self {
        let path = err.path().clone();
        let field = field.to_string();
        match err {
            AccessError::Missing { .. } => DecodeError::MissingField { field, path },
            AccessError::NotAStructure { .. } => DecodeError::NotAStructure { field, path },
        }
    }
}

/// Decoder settings.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Logger scoped around each decode call; discards by default.
    pub log: Dispatch,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            log: Dispatch::none(),
        }
    }
}

impl DecoderConfig {
    pub fn with_log(mut self, log: Dispatch) -> Self {
        self.log = log;
        self
    }
}

/// Binds one [`Input`] into parameter structures.
#[derive(Debug, Clone)]
pub struct Decoder {
    input: Input,
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(input: Input) -> Self {
        Self::with_config(input, DecoderConfig::default())
    }

    pub fn with_config(input: Input, config: DecoderConfig) -> Self {
        Self { input, config }
    }

    /// Decodes the input into `target`, deriving the spec of `T` if needed.
    ///
    /// # Errors
    ///
    /// Returns the first failure in input order; see [`DecodeError`].
    pub fn decode<T: Params>(&self, target: &mut T) -> Result<(), DecodeError> {
        dispatcher::with_default(&self.config.log, || {
            let spec = spec_of::<T>()?;
            self.decode_spec(&spec, target)
        })
    }

    /// Decodes the input into `target` using an already derived spec.
    pub fn decode_spec(
        &self,
        spec: &ParamSpec,
        target: &mut dyn Structure,
    ) -> Result<(), DecodeError> {
        if target.as_any().type_id() != spec.type_id() {
            return Err(DecodeError::TypeMismatch {
                expected: spec.type_name,
                actual: target.type_name(),
            });
        }

        dispatcher::with_default(&self.config.log, || {
            for flag in &self.input.flags {
                self.decode_flag(spec, target, flag)?;
            }
            self.decode_args(spec, target)
        })
    }

    fn decode_flag(
        &self,
        spec: &ParamSpec,
        target: &mut dyn Structure,
        flag: &InputFlag,
    ) -> Result<(), DecodeError> {
        let Some(flag_spec) = spec.flag(&flag.name) else {
            debug!(flag = %flag.name, type_name = spec.type_name, "Unknown flag");
            return Err(DecodeError::UnknownFlag(flag.name.clone()));
        };

        let absent = access::first_absent(&mut *target, &flag_spec.path);
        let slot = access::resolve(&mut *target, &flag_spec.path)
            .map_err(|err| DecodeError::access(err, &flag_spec.field))?;
        let unsupported = |type_name| DecodeError::UnsupportedFieldType {
            field: flag_spec.field.clone(),
            type_name,
        };

        let decoded = match slot {
            Slot::Value(value) => value.decode(&flag.value).map_err(|err| match err {
                ValueError::Unsupported(type_name) => unsupported(type_name),
                ValueError::Invalid(source) => DecodeError::InvalidValue {
                    name: flag.name.clone(),
                    raw: flag.value.clone(),
                    source,
                },
            }),
            Slot::Opaque(type_name) => Err(unsupported(type_name)),
            Slot::Inline(structure) => Err(unsupported(structure.type_name())),
            Slot::Optional(_) => Err(unsupported("optional structure")),
        };

        // A failed conversion leaves no structure attached on its behalf.
        if let Err(err) = decoded {
            if let Some(path) = absent {
                access::detach(target, &path);
            }
            return Err(err);
        }

        trace!(flag = %flag.name, field = %flag_spec.field, "Decoded flag");
        Ok(())
    }

    fn decode_args(&self, spec: &ParamSpec, target: &mut dyn Structure) -> Result<(), DecodeError> {
        let args = &self.input.args;
        if args.is_empty() {
            return Ok(());
        }

        let Some(arg_spec) = &spec.args else {
            debug!(count = args.len(), type_name = spec.type_name, "Unexpected arguments");
            return Err(DecodeError::UnexpectedArgs { count: args.len() });
        };

        let slot = access::resolve(target, &arg_spec.path)
            .map_err(|err| DecodeError::access(err, &arg_spec.field))?;
        let value = match slot {
            Slot::Value(value) => value,
            Slot::Opaque(type_name) => {
                return Err(DecodeError::UnsupportedFieldType {
                    field: arg_spec.field.clone(),
                    type_name,
                });
            }
            Slot::Inline(structure) => {
                return Err(DecodeError::UnsupportedFieldType {
                    field: arg_spec.field.clone(),
                    type_name: structure.type_name(),
                });
            }
            Slot::Optional(_) => {
                return Err(DecodeError::UnsupportedFieldType {
                    field: arg_spec.field.clone(),
                    type_name: "optional structure",
                });
            }
        };

        for (index, raw) in args.iter().enumerate() {
            value.decode(raw).map_err(|err| match err {
                ValueError::Unsupported(type_name) => DecodeError::UnsupportedFieldType {
                    field: arg_spec.field.clone(),
                    type_name,
                },
                ValueError::Invalid(source) => DecodeError::InvalidArgument {
                    field: arg_spec.field.clone(),
                    index,
                    raw: raw.clone(),
                    source,
                },
            })?;
        }

        trace!(count = args.len(), field = %arg_spec.field, "Decoded arguments");
        Ok(())
    }
}
