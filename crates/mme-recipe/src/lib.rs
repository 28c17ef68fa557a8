#![warn(missing_docs)]

//! Step planner for matrix engine workloads.
//!
//! A convolution or GEMM is cut into steps the engine can run with its geometry and suspension
//! buffer. [RecipeGenerator](components::RecipeGenerator) chooses which input stays resident,
//! splits every axis into grids and writes the resulting sub-views into a
//! [Recipe](components::Recipe).

extern crate alloc;

#[macro_use]
extern crate derive_new;

/// Planning domain: workloads, grids, reuse analysis and the recipe generator.
pub mod components;

/// Global configuration and recipe logging.
pub mod config;

mod error;

pub use error::*;
