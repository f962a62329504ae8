//! Linear algebra routines for constraint resolution
//!
//! [`reduce`] removes linearly dependent rows before the constraint systems
//! are assembled, [`gauss`] solves them exactly over the rationals, and
//! [`permutation`] tracks column orders across both.

pub mod gauss;
pub mod permutation;
pub mod reduce;
