//! Parameter specs, input binding and post-decode initialization for
//! command-line tools.
//!
//! A command's parameters are an ordinary struct that implements [`Params`]:
//! a table of field declarations plus indexed mutable access. From that the
//! crate provides:
//!
//! - [`spec_of`]: derives and caches the [`ParamSpec`] of a type: flags by
//!   name, at most one positional [`Argument`], and [`Inline`] structures
//!   whose flags are lifted into the parent.
//! - [`Decoder`]: binds a tokenized [`Input`] into a value, in input order,
//!   stopping at the first failure.
//! - [`RuleSet`]: runs per-type initialization rules over a decoded value,
//!   deepest inline structures first and the root last.
//! - [`merge_flags`] / [`merge_params`]: combine spec fragments under
//!   pluggable conflict policies, used by the [`CommandSpecs`] registry.
//!
//! # Example
//!
//! ```
//! use param_bind_core::*;
//!
//! #[derive(Debug, Default)]
//! struct Global {
//!     verbose: bool,
//! }
//!
//! impl Params for Global {
//!     fn fields() -> Vec<FieldDecl> {
//!         vec![FieldDecl::flag::<bool>("verbose", "verbose").alias("v").elide(true)]
//!     }
//!
//!     fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
//!         match index {
//!             0 => Some(Slot::value(&mut self.verbose)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! #[derive(Debug, Default)]
//! struct Build {
//!     global: Global,
//!     jobs: u32,
//!     targets: Vec<String>,
//! }
//!
//! impl Params for Build {
//!     fn fields() -> Vec<FieldDecl> {
//!         vec![
//!             FieldDecl::inline::<Global>("global"),
//!             FieldDecl::flag::<u32>("jobs", "jobs").alias("j"),
//!             FieldDecl::argument::<Vec<String>>("targets"),
//!         ]
//!     }
//!
//!     fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
//!         match index {
//!             0 => Some(Slot::inline(&mut self.global)),
//!             1 => Some(Slot::value(&mut self.jobs)),
//!             2 => Some(Slot::value(&mut self.targets)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let spec = spec_of::<Build>().unwrap();
//! assert_eq!(spec.flag("v").unwrap().field, "global.verbose");
//!
//! let input = Input::new().with_flag("v", "true").with_arg("lib").with_arg("bin");
//! let mut build = Build::default();
//! Decoder::new(input).decode(&mut build).unwrap();
//!
//! let mut rules = RuleSet::new();
//! rules.add(|build: &mut Build| {
//!     if build.jobs == 0 {
//!         build.jobs = 4;
//!     }
//! });
//! rules.process(&mut build).unwrap();
//!
//! assert!(build.global.verbose);
//! assert_eq!(build.jobs, 4);
//! assert_eq!(build.targets, vec!["lib", "bin"]);
//! ```

mod access;
mod decode;
mod exec;
mod field;
mod init;
mod input;
mod merge;
mod spec;
#[cfg(test)]
mod testing;

pub use decode::{DecodeError, Decoder, DecoderConfig};
pub use exec::{CommandSpecs, ExecConfig, ExecError, ExecUnspecified, default_exec_unspecified};
pub use field::{
    Binding, BoxError, FieldDecl, FieldKind, FieldValue, InitFn, Initialize, OptionalInline,
    Params, ParseBoolError, RuleError, Slot, Structure, StructureRef, ValueError, init_hook,
    parse_bool,
};
pub use init::{InitConfig, ProcessError, Rule, RuleSet};
pub use input::{Input, InputFlag};
pub use merge::{
    ConflictError, ExecConflict, FlagConflict, Info, InfoConflict, default_exec_conflict,
    default_flag_conflict, default_info_conflict, merge_flags, merge_params, resolve_overwrite,
};
pub use spec::{Argument, Elide, FieldPath, Flag, Inline, ParamSpec, SpecError, spec_of};
