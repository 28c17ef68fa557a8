mod constants;
mod generator;
mod grid;
mod hardware;
mod params;
mod recipe;
mod recipe_grids;
mod sb_reuse;
mod splitter;
mod tensor;

#[cfg(test)]
pub(crate) mod test_utils;

pub use constants::*;
pub use generator::*;
pub use grid::*;
pub use hardware::*;
pub use params::*;
pub use recipe::*;
pub use recipe_grids::*;
pub use sb_reuse::*;
pub use splitter::*;
pub use tensor::*;
