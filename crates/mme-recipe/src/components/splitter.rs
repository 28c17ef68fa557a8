use alloc::{format, vec, vec::Vec};
use smallvec::SmallVec;

use super::{
    GEMM_DIM_B1, GridRef, GridType, GridView, MAX_TENSOR_DIMS, MultiDimSubView, Recipe,
    RecipeGrids, SingleDimSubView, SizeArray,
};
use crate::{RecipeError, RecipeResult, error::ensure};

/// Offsets of a multi dimensional step as its split dim wraps into the dims above it.
///
/// Dims whose size is zero are excluded and never count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiDimCounter {
    first_counting_dim: usize,
    limits: SizeArray,
    counters: SizeArray,
}

impl MultiDimCounter {
    /// A counter over `sizes` starting at `split_dim`.
    pub fn new(sizes: &SizeArray, split_dim: usize) -> Self {
        let mut limits = [0; MAX_TENSOR_DIMS];
        limits[split_dim] = sizes[split_dim];
        for dim in split_dim + 1..MAX_TENSOR_DIMS {
            limits[dim] = sizes[dim];
        }

        Self {
            first_counting_dim: split_dim,
            limits,
            counters: [0; MAX_TENSOR_DIMS],
        }
    }

    /// Current offset of every dim.
    pub fn counters(&self) -> &SizeArray {
        &self.counters
    }

    /// Moves `step_size` elements along the split dim, carrying into the dims above it.
    pub fn advance(&mut self, step_size: u32) -> RecipeResult<()> {
        let first = self.first_counting_dim;
        ensure(
            step_size <= self.limits[first],
            "Step is larger than the split dim",
        )?;
        self.counters[first] += step_size;

        for dim in first..MAX_TENSOR_DIMS {
            if self.counters[dim] < self.limits[dim] {
                break;
            }
            if self.limits[dim] == 0 {
                continue;
            }
            ensure(
                self.counters[dim] == self.limits[dim],
                "Counter skipped past its limit",
            )?;
            self.counters[dim] = 0;

            let mut next = dim + 1;
            if next < MAX_TENSOR_DIMS && self.limits[next] == 0 {
                next += 1;
            }
            if next < MAX_TENSOR_DIMS {
                self.counters[next] += 1;
                ensure(
                    self.limits[next] == 0 || self.counters[next] <= self.limits[next],
                    "Carry overflowed the counter",
                )?;
            }
        }

        Ok(())
    }
}

/// Writes the sub-views of every grid step into the recipe.
///
/// Single step grids produce one sub-view covering their whole view.
pub struct SubViewSplitter<'r, 'g, 'a> {
    recipe: &'r mut Recipe,
    grids: &'g RecipeGrids<'a>,
}

impl<'r, 'g, 'a> SubViewSplitter<'r, 'g, 'a> {
    /// A splitter over created grids.
    pub fn new(recipe: &'r mut Recipe, grids: &'g RecipeGrids<'a>) -> Self {
        Self { recipe, grids }
    }

    /// Fills the recipe's sub-views and partial counts.
    pub fn split(&mut self) -> RecipeResult<()> {
        ensure(self.recipe.gemm_nr != 0, "A recipe holds at least one gemm")?;
        ensure(
            !self.grids.common_dim_grids().is_empty(),
            "Grids are not initialized",
        )?;
        self.common_dim_reset()?;

        let grids = self.grids;
        for grid in [grids.fcd_grid(), grids.sp_grid()] {
            let grid = GridRef::Axis(grid);
            match grid.is_multi_step() {
                true => self.split_axis(grid)?,
                false => self.no_split(grid)?,
            }
        }

        let gemm_nr = self.recipe.gemm_nr as usize;
        let mut partials_nr = 0;
        let mut partials_nr_per_gemm: SmallVec<[u32; 2]> = smallvec::smallvec![0; gemm_nr];
        for (gemm, partials) in partials_nr_per_gemm.iter_mut().enumerate() {
            for cd_idx in grids.common_dim_range(gemm) {
                let grid = grids.common_dim_grid(cd_idx);
                let mut split_on_batch_dims = false;

                if grid.is_multi_step() {
                    match grid.grid_type() {
                        GridType::Batch => {
                            split_on_batch_dims = grid.split_dim().unwrap_or(0) >= GEMM_DIM_B1;
                            // A batch only split of a single gemm has no partials.
                            if gemm_nr == 1 {
                                self.recipe.split_on_batch_dims = split_on_batch_dims;
                            }
                            self.split_conv_or_batch(GridRef::CommonDim(grid))?;
                        }
                        GridType::Conv => {
                            self.split_conv_or_batch(GridRef::CommonDim(grid))?;
                            if grid.is_partial_to_memory() {
                                self.recipe.partial_to_memory = true;
                            }
                        }
                        GridType::Sp => {
                            ensure(cd_idx == 0, "A spatial common dim is never cut")?;
                            self.split_axis(GridRef::CommonDim(grid))?;
                        }
                        GridType::Fcd => {
                            return Err(RecipeError::Invariant("The FCD is never reduced".into()));
                        }
                    }
                } else {
                    self.common_dim_no_split(GridRef::CommonDim(grid))?;
                }

                let grid_partials = match split_on_batch_dims {
                    true => 1,
                    false => grid.partials_nr(),
                };
                partials_nr += grid_partials;
                *partials += grid_partials;
            }
        }

        if self.recipe.masked_bgemm {
            self.interleave_gemms(&partials_nr_per_gemm)?;
        }

        log::trace!(
            "Split recipe into {} FCD, {} SP and {} non spatial sub-views, {partials_nr} partials",
            self.recipe.fcd_subviews.len(),
            self.recipe.sp_subviews.len(),
            self.recipe.non_spatial_subviews.len()
        );
        self.recipe.partials_nr = partials_nr;
        self.recipe.partials_nr_per_gemm = partials_nr_per_gemm;

        Ok(())
    }

    fn single_dim_subviews(
        &mut self,
        grid_type: GridType,
    ) -> RecipeResult<&mut Vec<SingleDimSubView>> {
        match grid_type {
            GridType::Fcd => Ok(&mut self.recipe.fcd_subviews),
            GridType::Sp => Ok(&mut self.recipe.sp_subviews),
            grid_type => Err(RecipeError::Invariant(format!(
                "The {grid_type} grid has no single dim sub-views"
            ))),
        }
    }

    fn common_dim_reset(&mut self) -> RecipeResult<()> {
        match self.grids.common_dim_grid(0).grid_type() {
            GridType::Conv | GridType::Batch => self.recipe.non_spatial_subviews.clear(),
            grid_type => self.single_dim_subviews(grid_type)?.clear(),
        }
        Ok(())
    }

    fn no_split(&mut self, grid: GridRef) -> RecipeResult<()> {
        match grid.grid_type() {
            GridType::Conv => {
                self.recipe.non_spatial_subviews =
                    vec![MultiDimSubView::new(*grid.bases(), *grid.sizes())];
            }
            grid_type => {
                let subview =
                    SingleDimSubView::new(grid.view_base(), grid.view_size(), grid.orig_view_size());
                *self.single_dim_subviews(grid_type)? = vec![subview];
            }
        }
        Ok(())
    }

    fn split_axis(&mut self, grid: GridRef) -> RecipeResult<()> {
        if grid.grid_type() == GridType::Conv {
            self.recipe.non_spatial_subviews.clear();
            return self.split_conv_or_batch(grid);
        }

        let subviews = self.single_dim_subviews(grid.grid_type())?;
        subviews.clear();
        let mut base = grid.view_base();
        for step in 0..grid.grid_size() {
            let size = grid.step_size(step);
            subviews.push(SingleDimSubView::new(base, size, grid.valid_step_size(step)));
            base += size;
        }

        ensure(
            base == grid.view_base() + grid.view_size(),
            &format!("Steps of the {} grid do not cover its view", grid.grid_type()),
        )
    }

    fn common_dim_no_split(&mut self, grid: GridRef) -> RecipeResult<()> {
        match grid.grid_type() {
            GridType::Conv | GridType::Batch => {
                self.recipe
                    .non_spatial_subviews
                    .push(MultiDimSubView::new(*grid.bases(), *grid.sizes()));
            }
            grid_type => {
                let base = grid.base();
                let subview = SingleDimSubView::new(
                    grid.view_base(),
                    base.calc_view_size(false, 0..MAX_TENSOR_DIMS),
                    base.calc_view_size(true, 0..MAX_TENSOR_DIMS),
                );
                self.single_dim_subviews(grid_type)?.push(subview);
            }
        }
        Ok(())
    }

    // Dims below the split dim stay whole, dims above it advance one at a time.
    fn split_conv_or_batch(&mut self, grid: GridRef) -> RecipeResult<()> {
        let split_dim = grid.split_dim().unwrap_or(0);
        let sizes = *grid.sizes();
        let mut sizes_per_step = sizes;
        sizes_per_step[split_dim + 1..].fill(1);

        let view_size = grid.view_size();
        let mut counter = MultiDimCounter::new(&sizes, split_dim);
        let mut covered = 0;
        for step in 0..grid.grid_size() {
            let step_size = grid.step_size(step);
            let mut subview = MultiDimSubView::new(*grid.bases(), sizes_per_step);
            subview.sizes[split_dim] = step_size;
            for dim in split_dim..MAX_TENSOR_DIMS {
                subview.bases[dim] += counter.counters()[dim];
            }
            self.recipe.non_spatial_subviews.push(subview);

            counter.advance(step_size)?;
            covered += step_size;
            ensure(covered <= view_size, "Steps overflow the grid view")?;
        }

        ensure(
            covered == view_size,
            &format!("Steps of the {} grid do not cover its view", grid.grid_type()),
        )
    }

    // Both gemms accumulate together, so their partials alternate per activation.
    fn interleave_gemms(&mut self, partials_nr_per_gemm: &[u32]) -> RecipeResult<()> {
        let activations = self.recipe.batches();
        let subviews = &self.recipe.non_spatial_subviews;
        let expected: u32 = partials_nr_per_gemm.iter().sum::<u32>() * activations;
        ensure(
            subviews.len() == expected as usize,
            "Masked gemm sub-views do not match their partials",
        )?;

        let mut next_per_gemm: SmallVec<[usize; 2]> = SmallVec::new();
        let mut start = 0;
        for partials in partials_nr_per_gemm {
            next_per_gemm.push(start);
            start += (activations * partials) as usize;
        }

        let mut interleaved = Vec::with_capacity(subviews.len());
        for _ in 0..activations {
            for (gemm, partials) in partials_nr_per_gemm.iter().enumerate() {
                for _ in 0..*partials {
                    interleaved.push(subviews[next_per_gemm[gemm]]);
                    next_per_gemm[gemm] += 1;
                }
            }
        }
        self.recipe.non_spatial_subviews = interleaved;

        Ok(())
    }
}
