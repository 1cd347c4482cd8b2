//! Field path resolution over [`Structure`] trait objects.
//!
//! Intermediate optional structures are created on the way down, so any
//! path that exists in the spec resolves on a default-initialized value.

use thiserror::Error;

use crate::field::{Slot, Structure};
use crate::spec::FieldPath;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum AccessError {
    #[error("no field at step {step} of {path}")]
    Missing { path: FieldPath, step: usize },
    #[error("field at step {step} of {path} is not a structure")]
    NotAStructure { path: FieldPath, step: usize },
}

impl AccessError {
    pub(crate) fn path(&self) -> &FieldPath {
        match self {
            AccessError::Missing { path, .. } | AccessError::NotAStructure { path, .. } => path,
        }
    }
}

/// Resolves `path` to the slot of its last step.
pub(crate) fn resolve<'a>(
    root: &'a mut dyn Structure,
    path: &FieldPath,
) -> Result<Slot<'a>, AccessError> {
    let Some((last, parents)) = path.steps().split_last() else {
        return Err(AccessError::Missing {
            path: path.clone(),
            step: 0,
        });
    };

    let mut current = root;
    for (step, &index) in parents.iter().enumerate() {
        current = match current.field_slot(index) {
            Some(Slot::Inline(structure)) => structure,
            Some(Slot::Optional(optional)) => optional.get_or_insert(),
            Some(_) => {
                return Err(AccessError::NotAStructure {
                    path: path.clone(),
                    step,
                });
            }
            None => {
                return Err(AccessError::Missing {
                    path: path.clone(),
                    step,
                });
            }
        };
    }

    current.field_slot(*last).ok_or_else(|| AccessError::Missing {
        path: path.clone(),
        step: parents.len(),
    })
}

/// Path of the first absent optional structure that resolving `path` would
/// attach, if any.
pub(crate) fn first_absent(root: &mut dyn Structure, path: &FieldPath) -> Option<FieldPath> {
    let (_, parents) = path.steps().split_last()?;

    let mut current = root;
    for (depth, &index) in parents.iter().enumerate() {
        current = match current.field_slot(index)? {
            Slot::Inline(structure) => structure,
            Slot::Optional(optional) if optional.is_set() => optional.get_or_insert(),
            Slot::Optional(_) => return FieldPath::new(parents[..=depth].iter().copied()),
            Slot::Value(_) | Slot::Opaque(_) => return None,
        };
    }
    None
}

/// Drops the optional structure at `path`.
pub(crate) fn detach(root: &mut dyn Structure, path: &FieldPath) {
    if let Ok(Slot::Optional(optional)) = resolve(root, path) {
        optional.clear();
    }
}

/// Resolves `path` to a nested structure, attaching a default instance if
/// it is absent. The flag reports whether one was attached.
pub(crate) fn resolve_structure<'a>(
    root: &'a mut dyn Structure,
    path: &FieldPath,
) -> Result<(&'a mut dyn Structure, bool), AccessError> {
    match resolve(root, path)? {
        Slot::Inline(structure) => Ok((structure, false)),
        Slot::Optional(optional) => {
            let materialized = !optional.is_set();
            Ok((optional.get_or_insert(), materialized))
        }
        Slot::Value(_) | Slot::Opaque(_) => Err(AccessError::NotAStructure {
            path: path.clone(),
            step: path.depth() - 1,
        }),
    }
}
