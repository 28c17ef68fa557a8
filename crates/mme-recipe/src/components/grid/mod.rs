mod axis_grid;
mod base;
mod common_dim;

pub use axis_grid::*;
pub use base::*;
pub use common_dim::*;

/// Borrowed grid of either kind.
#[derive(Debug, Clone, Copy)]
pub enum GridRef<'g, 'a> {
    /// An axis grid.
    Axis(&'g Grid),
    /// A common dim grid.
    CommonDim(&'g CommonDimGrid<'a>),
}

impl GridView for GridRef<'_, '_> {
    fn base(&self) -> &GridBase {
        match self {
            GridRef::Axis(grid) => grid.base(),
            GridRef::CommonDim(grid) => grid.base(),
        }
    }

    fn is_partial_step(&self, idx_in_template: u32) -> bool {
        match self {
            GridRef::Axis(grid) => grid.is_partial_step(idx_in_template),
            GridRef::CommonDim(grid) => grid.is_partial_step(idx_in_template),
        }
    }

    fn is_multi_step(&self) -> bool {
        match self {
            GridRef::Axis(grid) => grid.is_multi_step(),
            GridRef::CommonDim(grid) => grid.is_multi_step(),
        }
    }
}
