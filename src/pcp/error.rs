//! Composition errors.
//!
//! Errors found while composing are data problems, not failures of the
//! engine: the offending arc or value is dropped (or used as-is) and the error
//! is recorded so the caller can report it.

use thiserror::Error;

use super::arcs::ArcType;
use crate::sdf::{LayerOffset, Path};

/// A recoverable problem found during composition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompositionError {
    #[error("Sublayer cycle: @{layer}@ includes @{sublayer}@, which is already being composed")]
    SublayerCycle { layer: String, sublayer: String },

    #[error("Could not open sublayer @{sublayer}@ of @{layer}@: {reason}")]
    InvalidSublayerPath {
        layer: String,
        sublayer: String,
        reason: String,
    },

    #[error("Invalid offset {offset} for sublayer @{sublayer}@ of @{layer}@, using identity")]
    InvalidSublayerOffset {
        layer: String,
        sublayer: String,
        offset: LayerOffset,
    },

    #[error("{arc_type} arc from {site} to {target} forms a cycle")]
    ArcCycle {
        arc_type: ArcType,
        site: String,
        target: String,
    },

    #[error("{arc_type} arc at {site} has invalid target <{path}>: {reason}")]
    InvalidPrimPath {
        arc_type: ArcType,
        site: String,
        path: Path,
        reason: String,
    },

    #[error("{arc_type} arc at {site} could not open @{asset_path}@: {reason}")]
    InvalidAssetPath {
        arc_type: ArcType,
        site: String,
        asset_path: String,
        reason: String,
    },

    #[error("{arc_type} arc at {site} to @{asset_path}@ has no target prim: {reason}")]
    UnresolvedPrimPath {
        arc_type: ArcType,
        site: String,
        asset_path: String,
        reason: String,
    },

    #[error("Ignoring relocate <{from}> -> <{to}> in @{layer}@: {reason}")]
    InvalidRelocate {
        layer: String,
        from: Path,
        to: Path,
        reason: String,
    },

    #[error("Invalid value for '{field}' at {site}: {reason}")]
    InvalidFieldValue {
        field: String,
        site: String,
        reason: String,
    },
}

/// The variant of a [`CompositionError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SublayerCycle,
    InvalidSublayerPath,
    InvalidSublayerOffset,
    ArcCycle,
    InvalidPrimPath,
    InvalidAssetPath,
    UnresolvedPrimPath,
    InvalidRelocate,
    InvalidFieldValue,
}

impl CompositionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompositionError::SublayerCycle { .. } => ErrorKind::SublayerCycle,
            CompositionError::InvalidSublayerPath { .. } => ErrorKind::InvalidSublayerPath,
            CompositionError::InvalidSublayerOffset { .. } => ErrorKind::InvalidSublayerOffset,
            CompositionError::ArcCycle { .. } => ErrorKind::ArcCycle,
            CompositionError::InvalidPrimPath { .. } => ErrorKind::InvalidPrimPath,
            CompositionError::InvalidAssetPath { .. } => ErrorKind::InvalidAssetPath,
            CompositionError::UnresolvedPrimPath { .. } => ErrorKind::UnresolvedPrimPath,
            CompositionError::InvalidRelocate { .. } => ErrorKind::InvalidRelocate,
            CompositionError::InvalidFieldValue { .. } => ErrorKind::InvalidFieldValue,
        }
    }

    /// The arc type involved, for arc errors.
    pub fn arc_type(&self) -> Option<ArcType> {
        match self {
            CompositionError::ArcCycle { arc_type, .. }
            | CompositionError::InvalidPrimPath { arc_type, .. }
            | CompositionError::InvalidAssetPath { arc_type, .. }
            | CompositionError::UnresolvedPrimPath { arc_type, .. } => Some(*arc_type),
            _ => None,
        }
    }
}
