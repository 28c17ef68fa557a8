use core::ops::{Deref, Range};

use alloc::format;
use smallvec::SmallVec;

use super::{
    CommonDimGrid, CommonDimParams, GEMM_DIM_B1, Grid, GridType, GridView, InputOperand,
    MAX_TENSOR_DIMS, Recipe, RecipeConstants, SbReuse, SbReuseType, TensorView,
    calc_common_dim_alignment, product,
};
use crate::{RecipeError, RecipeResult, error::ensure};

/// Iterations a one byte hardware loop can run.
const ONE_BYTE_MAX_LOOPS_NR: u32 = 1 << 8;

/// Maximum number of geometries a single step may cover on each output axis.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCapacities {
    /// Geometries along the output's fast dim.
    pub fcd: u32,
    /// Geometries along the output's spatial dim.
    pub sp: u32,
}

impl StepCapacities {
    /// No limit on either axis.
    pub fn unlimited() -> Self {
        Self::new(u32::MAX, u32::MAX)
    }
}

/// Every grid of one recipe.
///
/// Index 0 of the axis grids is the FCD grid, index 1 the SP grid, or the filter grid of the
/// weights gradient. Common dim grids are laid out gemm after gemm, one per common dim cut.
#[derive(Debug, Clone, Default)]
pub struct RecipeGrids<'a> {
    grids: SmallVec<[Grid; 2]>,
    common_dim_grids: SmallVec<[CommonDimGrid<'a>; 2]>,
    num_cd_cuts: SmallVec<[u32; 2]>,
}

impl<'a> RecipeGrids<'a> {
    /// The grid over the output's fast dim.
    ///
    /// # Panics
    ///
    /// Before the grids are initialized.
    pub fn fcd_grid(&self) -> &Grid {
        &self.grids[0]
    }

    /// Mutable [RecipeGrids::fcd_grid].
    pub fn fcd_grid_mut(&mut self) -> &mut Grid {
        &mut self.grids[0]
    }

    /// The grid over the output's spatial dim, or the filter dims of the weights gradient.
    ///
    /// # Panics
    ///
    /// Before the grids are initialized.
    pub fn sp_grid(&self) -> &Grid {
        &self.grids[1]
    }

    /// Mutable [RecipeGrids::sp_grid].
    pub fn sp_grid_mut(&mut self) -> &mut Grid {
        &mut self.grids[1]
    }

    /// All common dim grids.
    pub fn common_dim_grids(&self) -> &[CommonDimGrid<'a>] {
        &self.common_dim_grids
    }

    /// The common dim grid at `idx`.
    ///
    /// # Panics
    ///
    /// When `idx` is out of range.
    pub fn common_dim_grid(&self, idx: usize) -> &CommonDimGrid<'a> {
        &self.common_dim_grids[idx]
    }

    /// Number of common dim cuts of `gemm`.
    pub fn num_cd_cuts(&self, gemm: usize) -> u32 {
        self.num_cd_cuts.get(gemm).copied().unwrap_or(0)
    }

    /// Indices of the common dim grids of `gemm`.
    pub fn common_dim_range(&self, gemm: usize) -> Range<usize> {
        let start: u32 = self.num_cd_cuts.iter().take(gemm).sum();
        let start = start as usize;
        start..start + self.num_cd_cuts(gemm) as usize
    }
}

#[derive(Debug)]
struct GridsParams {
    capacities: StepCapacities,
    common_dim: SmallVec<[CommonDimParams; 2]>,
}

/// Builds the [RecipeGrids] of a recipe.
///
/// Grids are initialized from the recipe's views, then created once the step capacities and
/// reuse policy are known.
#[derive(Debug)]
pub struct RecipeGridsCreator<'a> {
    constants: &'a RecipeConstants<'a>,
    grids: RecipeGrids<'a>,
}

impl<'a> Deref for RecipeGridsCreator<'a> {
    type Target = RecipeGrids<'a>;

    fn deref(&self) -> &Self::Target {
        &self.grids
    }
}

impl<'a> RecipeGridsCreator<'a> {
    /// A creator without grids.
    pub fn new(constants: &'a RecipeConstants<'a>) -> Self {
        Self {
            constants,
            grids: RecipeGrids::default(),
        }
    }

    /// Mutable access to the grids.
    pub fn grids_mut(&mut self) -> &mut RecipeGrids<'a> {
        &mut self.grids
    }

    /// Releases the grids.
    pub fn into_grids(self) -> RecipeGrids<'a> {
        self.grids
    }

    /// Builds the grids over the recipe's views.
    ///
    /// Only the recipe's views are read, the layer params may describe a larger problem.
    pub fn init(&mut self, recipe: &Recipe) -> RecipeResult<()> {
        ensure(self.grids.grids.is_empty(), "Grids are initialized once")?;
        let gemm_nr = recipe.gemm_nr as usize;
        ensure(
            gemm_nr != 0
                && [recipe.a_views.len(), recipe.b_views.len(), recipe.c_views.len()]
                    .iter()
                    .all(|len| *len >= gemm_nr)
                && [recipe.a_roi_sizes.len(), recipe.b_roi_sizes.len(), recipe.c_roi_sizes.len()]
                    .iter()
                    .all(|len| *len >= gemm_nr),
            "Recipe views do not cover every gemm",
        )?;

        let c = &recipe.c_views[0];
        self.grids
            .grids
            .push(Grid::flat(GridType::Fcd, c.bases[0], c.sizes[0], c.sizes[0])?);

        match self.constants.params.op.is_dedw() {
            true => self.init_dedw(recipe),
            false => self.init_conv_or_batch(recipe),
        }
    }

    /// Chooses the step capacities and reuse policy, then creates every grid.
    pub fn create(&mut self, recipe: &Recipe, capacities: StepCapacities) -> RecipeResult<()> {
        if self.grids.grids.is_empty() {
            return Err(RecipeError::NotCreated {
                grid_type: GridType::Fcd,
            });
        }
        let params = self.define_grids(recipe, capacities)?;
        self.create_grids(recipe, &params)
    }

    // The reduction of the weights gradient runs over the spatial dims of B.
    fn init_dedw(&mut self, recipe: &Recipe) -> RecipeResult<()> {
        let b = &recipe.b_views[0];
        let mut bases = b.bases;
        let mut sizes = recipe.b_roi_sizes[0];
        bases[0] = 0;
        sizes[0] = 0;
        self.grids.num_cd_cuts.push(1);
        self.grids.common_dim_grids.push(CommonDimGrid::new(
            GridType::Sp,
            bases,
            sizes,
            b.sizes,
            self.constants,
            0,
            false,
        )?);

        let geometry = self.constants.geometry;
        let c = &recipe.c_views[0];
        let mut bases = c.bases;
        let mut sizes = c.sizes;
        bases[0] = 0;
        sizes[0] = 0;
        let dim = geometry.concurrent_dim;
        sizes[dim] = sizes[dim].div_ceil(geometry.concurrency);
        self.grids
            .grids
            .push(Grid::new(GridType::Conv, bases, sizes, sizes, 1)?);

        Ok(())
    }

    fn init_conv_or_batch(&mut self, recipe: &Recipe) -> RecipeResult<()> {
        let params = self.constants.params;
        let c = &recipe.c_views[0];
        let c_roi = &recipe.c_roi_sizes[0];

        let (grid_type, sp_grid) = match params.op.is_gemm() {
            true => (
                GridType::Batch,
                Grid::flat(GridType::Sp, c.bases[1], c_roi[1], c.sizes[1])?,
            ),
            false => (
                GridType::Conv,
                Grid::flat(
                    GridType::Sp,
                    params.sp_base,
                    product(&c_roi[1..]),
                    product(&c.sizes[1..]),
                )?,
            ),
        };
        self.grids.grids.push(sp_grid);

        let fcd_dim = match params.op.is_transposed(InputOperand::B) {
            true => 1,
            false => 0,
        };
        for gemm in 0..recipe.gemm_nr as usize {
            let cuts = self.common_dim_cuts(recipe, gemm)?;
            self.grids.num_cd_cuts.push(cuts.len() as u32);
            let c_view = &recipe.c_views[gemm];

            for cut in cuts.iter() {
                let mut bases = cut.bases;
                let mut sizes = cut.sizes;
                // Broadcast inputs take the batch sizes of the output.
                if grid_type == GridType::Batch {
                    bases[GEMM_DIM_B1..].copy_from_slice(&c_view.bases[GEMM_DIM_B1..]);
                    sizes[GEMM_DIM_B1..].copy_from_slice(&c_view.sizes[GEMM_DIM_B1..]);
                }
                bases[fcd_dim] = 0;
                sizes[fcd_dim] = 0;
                self.grids.common_dim_grids.push(CommonDimGrid::new(
                    grid_type,
                    bases,
                    sizes,
                    sizes,
                    self.constants,
                    fcd_dim,
                    cuts.len() > 1,
                )?);
            }
        }

        Ok(())
    }

    /// B view of `gemm`, cut in two at the requested common dim point.
    ///
    /// Cut points that do not meet the common dim alignment are ignored.
    fn common_dim_cuts(
        &self,
        recipe: &Recipe,
        gemm: usize,
    ) -> RecipeResult<SmallVec<[TensorView; 2]>> {
        let params = self.constants.params;
        let b = recipe.b_views[gemm];
        let mut cut_point = params.cd_cut_point;
        if calc_common_dim_alignment(self.constants, recipe, cut_point, false, false) != cut_point {
            cut_point = 0;
        }
        if cut_point == 0 {
            return Ok(smallvec::smallvec![b]);
        }

        let cd = params.op.common_dim_of(InputOperand::B);
        ensure(cut_point < b.sizes[cd], "Common dim cut point is outside of B")?;
        let mut prefix = b;
        prefix.bases[cd] = 0;
        prefix.sizes[cd] = cut_point;
        let mut remainder = b;
        remainder.bases[cd] = cut_point;
        remainder.sizes[cd] -= cut_point;

        log::debug!("Cutting the common dim of gemm {gemm} at {cut_point}");

        Ok(smallvec::smallvec![prefix, remainder])
    }

    fn define_grids(
        &self,
        recipe: &Recipe,
        capacities: StepCapacities,
    ) -> RecipeResult<GridsParams> {
        let mut params = GridsParams {
            capacities,
            common_dim: SmallVec::new(),
        };

        if recipe.reuse.operand.is_none() {
            params.capacities = StepCapacities::unlimited();
            self.define_spatial_grids(&mut params.capacities);
            for _ in 0..self.grids.common_dim_grids.len() {
                params
                    .common_dim
                    .push(self.define_common_dim_grid(recipe, SbReuseType::NoReuse)?);
            }
            return Ok(params);
        }

        if capacities.fcd == 0 {
            return Err(RecipeError::ZeroStepCapacity {
                grid_type: GridType::Fcd,
            });
        }
        if capacities.sp == 0 {
            return Err(RecipeError::ZeroStepCapacity {
                grid_type: GridType::Sp,
            });
        }
        self.define_spatial_grids(&mut params.capacities);

        for gemm in 0..recipe.gemm_nr as usize {
            for cd_idx in self.grids.common_dim_range(gemm) {
                let sb_reuse = SbReuse::new(self.constants, recipe, &self.grids, cd_idx, None)?;
                if sb_reuse.is_partial() {
                    let common_dim =
                        sb_reuse.define_common_dim_grid_for_partial_reuse(params.capacities.sp)?;
                    sb_reuse.define_spatial_grids_for_partial_reuse(
                        &mut params.capacities,
                        common_dim.partial_to_memory,
                    )?;
                    params.common_dim.push(common_dim);
                } else {
                    ensure(
                        self.grids.num_cd_cuts(gemm) == 1,
                        "A cut common dim is always partial",
                    )?;
                    params.common_dim.push(
                        self.define_common_dim_grid(recipe, SbReuseType::NonPartialReuse)?,
                    );
                    sb_reuse.define_spatial_grids_for_non_partial_reuse(&mut params.capacities)?;
                }
            }
        }

        Ok(params)
    }

    // Hardware loops over the output are one byte counters.
    fn define_spatial_grids(&self, capacities: &mut StepCapacities) {
        capacities.fcd = capacities.fcd.min(ONE_BYTE_MAX_LOOPS_NR);
        // Spatial steps of fwd and dedx run on the unbounded tetris loop.
        if !self.constants.params.op.is_fwd_or_dedx() {
            capacities.sp = capacities.sp.min(ONE_BYTE_MAX_LOOPS_NR);
        }
    }

    fn define_common_dim_grid(
        &self,
        recipe: &Recipe,
        reuse_type: SbReuseType,
    ) -> RecipeResult<CommonDimParams> {
        ensure(
            matches!(reuse_type, SbReuseType::NoReuse | SbReuseType::NonPartialReuse),
            "Whole common dim grids either reuse fully or not at all",
        )?;
        let forced_partial = recipe.gemm_nr > 1;

        let (last_included_dim, max_fit_nr) = match self.constants.params.op.is_gemm() {
            true => {
                let geometry = self.constants.geometry;
                let c_sizes = &recipe.c_views[0].sizes;
                let loop_size = |dim: usize| match dim == geometry.concurrent_dim {
                    true => ONE_BYTE_MAX_LOOPS_NR * geometry.concurrency,
                    false => ONE_BYTE_MAX_LOOPS_NR,
                };

                // The last batch dim is walked by the outer loop.
                let mut last = GEMM_DIM_B1;
                while last < MAX_TENSOR_DIMS - 1 {
                    if c_sizes[last] > loop_size(last) || forced_partial {
                        break;
                    }
                    last += 1;
                }
                let max_fit_nr = match forced_partial {
                    true => 1,
                    false => c_sizes[last],
                };
                (last, max_fit_nr.min(loop_size(last)))
            }
            false => {
                let b_sizes = &recipe.b_views[0].sizes;
                let fcd_dim = self.grids.common_dim_grid(0).fcd_dim();
                (0..MAX_TENSOR_DIMS)
                    .rev()
                    .find(|dim| *dim != fcd_dim && b_sizes[*dim] != 0)
                    .map(|dim| (dim, b_sizes[dim]))
                    .ok_or_else(|| {
                        RecipeError::InvalidConfig("The common dim of B is empty".into())
                    })?
            }
        };
        ensure(max_fit_nr != 0, "Common dim grid cannot fit any unit")?;

        Ok(CommonDimParams {
            reuse_type: Some(reuse_type),
            last_included_dim: Some(last_included_dim),
            atomic_unit_length: 1,
            max_fit_nr,
            forced_partial,
            partial_to_memory: false,
        })
    }

    fn create_grids(&mut self, recipe: &Recipe, params: &GridsParams) -> RecipeResult<()> {
        let constants = self.constants;
        let geometry = constants.geometry;
        // Concurrent gemms of one core cannot be split in steps.
        let multi_step_possible = geometry.core_concurrency == 1 || constants.params.op.is_dedw();

        let fcd_grid = self.grids.fcd_grid_mut();
        fcd_grid.create(geometry.width, params.capacities.fcd)?;
        ensure(
            multi_step_possible || !fcd_grid.is_multi_step(),
            "FCD grid cannot be split with concurrent gemms",
        )?;

        // Ports interleaved on a short first spatial dim stay idle.
        let mut available_sp_size = geometry.height;
        let interleaving = recipe.c_views[0].sizes[1];
        let interleaved_ports = geometry.interleaved_spatial_ports(InputOperand::A.into());
        if interleaving < interleaved_ports {
            available_sp_size = available_sp_size / interleaved_ports * interleaving;
        }
        let sp_grid = self.grids.sp_grid_mut();
        sp_grid.create(available_sp_size, params.capacities.sp)?;
        ensure(
            multi_step_possible || !sp_grid.is_multi_step(),
            "SP grid cannot be split with concurrent gemms",
        )?;

        ensure(
            params.common_dim.len() == self.grids.common_dim_grids.len(),
            "Every common dim grid needs a policy",
        )?;
        let op = constants.params.op;
        let any_transposed =
            op.is_transposed(InputOperand::A) || op.is_transposed(InputOperand::B);
        let b_cd = op.common_dim_of(InputOperand::B);
        let cl_elems = constants.hardware.cl_size / recipe.elem_size();

        for gemm in 0..recipe.gemm_nr as usize {
            for cd_idx in self.grids.common_dim_range(gemm) {
                let grid = &mut self.grids.common_dim_grids[cd_idx];
                grid.create(&params.common_dim[cd_idx])?;

                // Partials split on the channels start on a cache line.
                let first_cd_dim = grid.first_cd_dim();
                if any_transposed
                    && grid.grid_size() > 1
                    && grid.sizes()[first_cd_dim] != recipe.b_views[gemm].sizes[b_cd]
                    && grid.split_dim() == Some(first_cd_dim)
                    && cl_elems != 0
                {
                    ensure(
                        grid.step_size(0) % cl_elems == 0,
                        &format!("Partial step of common dim grid {cd_idx} is not CL aligned"),
                    )?;
                }
            }
        }

        log::debug!(
            "Created grids: FCD {} steps, SP {} steps, {} common dim grids",
            self.grids.fcd_grid().grid_size(),
            self.grids.sp_grid().grid_size(),
            self.grids.common_dim_grids.len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{InternalOperand, test_utils::Fixture};
    use pretty_assertions::assert_eq;

    fn recipe_for(fixture: &Fixture, reused: Option<InputOperand>, raster: bool) -> Recipe {
        let params = &fixture.params;
        let mut recipe = Recipe::new(params.op, raster);
        for operand in [InternalOperand::A, InternalOperand::B, InternalOperand::C] {
            let view = *params.operand(operand);
            match operand {
                InternalOperand::A => {
                    recipe.a_views.push(view);
                    recipe.a_roi_sizes.push(view.sizes);
                }
                InternalOperand::B => {
                    recipe.b_views.push(view);
                    recipe.b_roi_sizes.push(view.sizes);
                }
                InternalOperand::C => {
                    recipe.c_views.push(view);
                    recipe.c_roi_sizes.push(view.sizes);
                }
            }
        }
        recipe.reuse.operand = reused;
        recipe
    }

    #[test]
    fn fwd_grids_without_reuse() {
        let fixture = Fixture::fwd();
        let constants = fixture.constants();
        let recipe = recipe_for(&fixture, None, true);
        let mut creator = RecipeGridsCreator::new(&constants);
        creator.init(&recipe).unwrap();

        assert_eq!(creator.sp_grid().view_size(), 256);
        assert_eq!(creator.num_cd_cuts(0), 1);
        assert_eq!(creator.common_dim_grid(0).sizes(), &[0, 64, 3, 3, 1]);

        creator
            .create(&recipe, StepCapacities::new(4, 4))
            .unwrap();
        // 256 channels over a 128 wide geometry.
        assert_eq!(creator.fcd_grid().grid_size(), 1);
        // 256 pixels over a 64 high geometry, unlimited on the tetris loop.
        assert_eq!(creator.sp_grid().grid_size(), 1);
        assert_eq!(creator.common_dim_grid(0).grid_size(), 1);
        assert!(!creator.common_dim_grid(0).is_multi_step());
    }

    #[test]
    fn capacities_are_bounded_by_one_byte_loops() {
        let fixture = Fixture::gemm();
        let constants = fixture.constants();
        let creator = RecipeGridsCreator::new(&constants);

        let mut capacities = StepCapacities::unlimited();
        creator.define_spatial_grids(&mut capacities);
        assert_eq!(capacities, StepCapacities::new(256, 256));

        let fixture = Fixture::fwd();
        let constants = fixture.constants();
        let creator = RecipeGridsCreator::new(&constants);
        let mut capacities = StepCapacities::unlimited();
        creator.define_spatial_grids(&mut capacities);
        assert_eq!(capacities, StepCapacities::new(256, u32::MAX));
    }

    #[test]
    fn gemm_batches_fit_one_step() {
        let fixture = Fixture::gemm();
        let constants = fixture.constants();
        let recipe = recipe_for(&fixture, None, true);
        let mut creator = RecipeGridsCreator::new(&constants);
        creator.init(&recipe).unwrap();

        let params = creator
            .define_common_dim_grid(&recipe, SbReuseType::NoReuse)
            .unwrap();
        assert_eq!(params.last_included_dim, Some(4));
        assert_eq!(params.max_fit_nr, 1);
        assert!(!params.forced_partial);

        creator.create(&recipe, StepCapacities::unlimited()).unwrap();
        let grid = creator.common_dim_grid(0);
        assert_eq!(grid.grid_type(), GridType::Batch);
        assert_eq!(grid.grid_size(), 1);
    }

    #[test]
    fn cut_point_splits_the_common_dim() {
        let mut fixture = Fixture::fwd();
        fixture.params.cd_cut_point = 24;
        let constants = fixture.constants();
        let recipe = recipe_for(&fixture, None, true);
        let mut creator = RecipeGridsCreator::new(&constants);
        creator.init(&recipe).unwrap();

        assert_eq!(creator.num_cd_cuts(0), 2);
        assert_eq!(creator.common_dim_range(0), 0..2);
        assert_eq!(creator.common_dim_grid(0).sizes()[1], 24);
        assert_eq!(creator.common_dim_grid(1).sizes()[1], 40);
        assert_eq!(creator.common_dim_grid(1).bases()[1], 24);
        assert!(creator.common_dim_grid(1).has_multiple_cd_cuts());
    }

    #[test]
    fn dedw_reduces_over_the_spatial_dims() {
        let fixture = Fixture::dedw();
        let constants = fixture.constants();
        let recipe = recipe_for(&fixture, None, true);
        let mut creator = RecipeGridsCreator::new(&constants);
        creator.init(&recipe).unwrap();

        let cd_grid = creator.common_dim_grid(0);
        assert_eq!(cd_grid.grid_type(), GridType::Sp);
        assert_eq!(cd_grid.view_size(), 256);
        assert_eq!(creator.sp_grid().grid_type(), GridType::Conv);
    }

    #[test]
    fn create_requires_init() {
        let fixture = Fixture::fwd();
        let constants = fixture.constants();
        let recipe = recipe_for(&fixture, None, true);
        let mut creator = RecipeGridsCreator::new(&constants);

        assert_eq!(
            creator.create(&recipe, StepCapacities::unlimited()),
            Err(RecipeError::NotCreated {
                grid_type: GridType::Fcd
            })
        );
    }
}
