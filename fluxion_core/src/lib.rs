//! Core rust implementation of Fluxion, a crate for resolving linear flux
//! constraints on metabolic networks.
#![allow(unused)]

pub mod configuration;
pub mod constraint;
pub mod diagnostics;
pub mod expr;
pub mod flux_system;
pub mod linalg;
pub mod network;
pub mod standard_form;
