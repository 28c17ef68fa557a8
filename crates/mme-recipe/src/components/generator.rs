use alloc::{sync::Arc, vec::Vec};
use hashbrown::HashMap;

use super::{
    GEMM_DIM_B1, GridType, GridView, InputOperand, InternalOperand, OperationKind, Recipe,
    RecipeConstants, RecipeGrids, RecipeGridsCreator, SbReuse, SecondOperandReuse, SignalingMode,
    SizeArray, StepCapacities, SubViewSplitter, SubViewType, TensorView, WalkPattern, product,
};
use crate::{
    RecipeError, RecipeResult,
    config::{GlobalConfig, Logger, planner::PlannerConfig, planner::RecipeLogLevel},
    error::ensure,
};

/// Padded ROI sizes of the A, B and C views of one gemm.
///
/// Zero length common dims become one element, spatial dims are padded to the interleaved
/// ports reading them and the concurrent batch dim to the geometry concurrency.
pub fn calc_roi_sizes(
    constants: &RecipeConstants,
    a: &SizeArray,
    b: &SizeArray,
    c: &SizeArray,
) -> [SizeArray; 3] {
    let op = constants.params.op;
    let geometry = constants.geometry;
    let ports = |operand: InternalOperand| geometry.interleaved_spatial_ports(operand);
    let (mut a, mut b, mut c) = (*a, *b, *c);

    for (sizes, operand) in [(&mut a, InputOperand::A), (&mut b, InputOperand::B)] {
        let cd = op.common_dim_of(operand);
        if sizes[cd] == 0 {
            sizes[cd] = 1;
        }
    }

    // Readers of a batched operand must not wrap into the next batch.
    if op.is_gemm() {
        let c_ports = match op.is_transposed(InputOperand::A) {
            true => ports(InternalOperand::A),
            false => ports(InternalOperand::C),
        };
        a[1] = a[1].next_multiple_of(ports(InternalOperand::A));
        b[1] = b[1].next_multiple_of(ports(InternalOperand::B));
        c[1] = c[1].next_multiple_of(c_ports);
    } else if op == OperationKind::Fwd {
        b[1] = b[1].next_multiple_of(ports(InternalOperand::B));
    }

    for (sizes, operand) in [(&mut a, InternalOperand::A), (&mut b, InternalOperand::B)] {
        let dim = geometry.sp_interleaving_dim(operand);
        sizes[dim] = sizes[dim].max(ports(operand));
    }
    let c_dim = geometry.sp_interleaving_dim(InternalOperand::C);
    let mut c_ports = ports(InternalOperand::C);
    if op.is_transposed(InputOperand::A) {
        c_ports = c_ports.max(ports(InternalOperand::A));
    }
    c[c_dim] = c[c_dim].max(c_ports);

    if geometry.supports_concurrency() {
        let dim = geometry.concurrent_dim;
        let concurrency = geometry.concurrency;
        if !op.is_dedw() {
            a[dim] = a[dim].next_multiple_of(concurrency);
            b[dim] = b[dim].next_multiple_of(concurrency);
        }
        c[dim] = c[dim].next_multiple_of(concurrency);
    }

    [a, b, c]
}

/// Plans the recipe of one workload.
///
/// Creating the generator sets up the views, the reuse operand and the grids. [generate] then
/// sizes the grids and writes the sub-views.
///
/// [generate]: RecipeGenerator::generate
#[derive(Debug)]
pub struct RecipeGenerator<'a> {
    constants: &'a RecipeConstants<'a>,
    config: PlannerConfig,
    logger: Logger,
    recipe: Recipe,
    grids: RecipeGridsCreator<'a>,
    fcd_geo_per_reuse: u32,
    sp_geo_per_reuse: u32,
}

impl<'a> RecipeGenerator<'a> {
    /// A generator configured from [GlobalConfig].
    pub fn new(constants: &'a RecipeConstants<'a>) -> RecipeResult<Self> {
        let config: Arc<GlobalConfig> = GlobalConfig::get();
        Self::with_config(constants, &config)
    }

    /// A generator configured from `config`.
    pub fn with_config(
        constants: &'a RecipeConstants<'a>,
        config: &GlobalConfig,
    ) -> RecipeResult<Self> {
        let params = constants.params;
        let mut this = Self {
            constants,
            config: config.planner.clone(),
            logger: Logger::from_config(&config.logger),
            recipe: Recipe::new(params.op, params.is_pattern_raster()),
            grids: RecipeGridsCreator::new(constants),
            fcd_geo_per_reuse: 1,
            sp_geo_per_reuse: 1,
        };
        this.init()?;

        Ok(this)
    }

    /// The recipe planned so far.
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Releases the recipe.
    pub fn into_recipe(self) -> Recipe {
        self.recipe
    }

    /// Geometries one reuse covers along the output's fast dim.
    pub fn fcd_geo_per_reuse(&self) -> u32 {
        self.fcd_geo_per_reuse
    }

    /// Geometries one reuse covers along the output's spatial dim, [u32::MAX] without reuse.
    pub fn sp_geo_per_reuse(&self) -> u32 {
        self.sp_geo_per_reuse
    }

    /// Whether a common dim is split into partial sums.
    pub fn is_partial_sb_reuse(&self) -> RecipeResult<bool> {
        if (0..self.recipe.gemm_nr as usize).any(|gemm| self.grids.num_cd_cuts(gemm) > 1) {
            return Ok(true);
        }
        if self.recipe.reuse.operand.is_none() {
            return Ok(false);
        }
        let sb_reuse = SbReuse::new(self.constants, &self.recipe, &self.grids, 0, None)?;
        Ok(sb_reuse.is_partial())
    }

    /// Creates the grids and writes every sub-view of the recipe.
    pub fn generate(&mut self) -> RecipeResult<&Recipe> {
        ensure(
            self.recipe.fcd_subviews.is_empty(),
            "A recipe is generated once",
        )?;
        log::trace!("Generating recipe for op {}", self.recipe.op);

        let capacities = StepCapacities::new(self.fcd_geo_per_reuse, self.sp_geo_per_reuse);
        self.grids.create(&self.recipe, capacities)?;
        if self.config.pipeline_level_hint {
            self.handle_pipeline_level_hint()?;
        }

        SubViewSplitter::new(&mut self.recipe, &self.grids).split()?;

        if self.config.second_operand_reuse {
            self.handle_2d_sb_reuse()?;
        }
        self.set_signal_amount()?;

        log::trace!("Finished generating recipe for op {}", self.recipe.op);
        for line in self.recipe.debug_info(true) {
            log::trace!("{line}");
        }
        self.log_recipe();

        Ok(&self.recipe)
    }

    fn init(&mut self) -> RecipeResult<()> {
        let params = self.constants.params;
        log::trace!("Initializing recipe for op {}", params.op);

        for operand in [InternalOperand::A, InternalOperand::B, InternalOperand::C] {
            self.push_view(operand, *params.operand(operand));
        }
        if params.strategy.masked_bgemm {
            for operand in [InternalOperand::A, InternalOperand::B, InternalOperand::C] {
                let view = params.aux_operand(operand).ok_or_else(|| {
                    RecipeError::InvalidConfig(
                        "Masked batched gemm requires auxiliary tensors".into(),
                    )
                })?;
                self.push_view(operand, *view);
            }
            self.recipe.gemm_nr = 2;
            self.recipe.masked_bgemm = true;
            self.recipe.concurrent_dim = self.constants.geometry.concurrent_dim;
            self.recipe.concurrency = self.constants.geometry.concurrency;
        }

        for gemm in 0..self.recipe.gemm_nr as usize {
            let [a, b, c] = calc_roi_sizes(
                self.constants,
                &self.recipe.a_views[gemm].sizes,
                &self.recipe.b_views[gemm].sizes,
                &self.recipe.c_views[gemm].sizes,
            );
            self.recipe.a_roi_sizes.push(a);
            self.recipe.b_roi_sizes.push(b);
            self.recipe.c_roi_sizes.push(c);
        }

        self.fcd_geo_per_reuse = self.calc_fcd_geo_per_reuse();
        self.sp_geo_per_reuse = self.calc_sp_geo_per_reuse()?;
        self.calc_reuse_operand();
        self.grids.init(&self.recipe)?;

        if let Some(operand) = self.recipe.reuse.operand {
            let utilization =
                SbReuse::new(self.constants, &self.recipe, &self.grids, 0, None)?.utilization();
            log::debug!("Reusing {operand}, SB utilization {utilization}");
            self.recipe.reuse.sb_utilization = utilization;
        }

        Ok(())
    }

    fn push_view(&mut self, operand: InternalOperand, view: TensorView) {
        match operand {
            InternalOperand::A => self.recipe.a_views.push(view),
            InternalOperand::B => self.recipe.b_views.push(view),
            InternalOperand::C => self.recipe.c_views.push(view),
        }
    }

    fn sb_reuse_enabled(&self) -> bool {
        self.config.sb_reuse && self.constants.params.is_sb_reuse()
    }

    fn calc_fcd_geo_per_reuse(&self) -> u32 {
        let c = &self.recipe.c_views[0];
        c.sizes[0].div_ceil(self.constants.geometry.width)
    }

    // Adjacent geometries produced while the reused operand stays resident.
    fn calc_sp_geo_per_reuse(&self) -> RecipeResult<u32> {
        if !self.sb_reuse_enabled() {
            return Ok(u32::MAX);
        }

        let params = self.constants.params;
        let geometry = self.constants.geometry;
        let pattern = params.strategy.pattern;
        let unsupported = || RecipeError::UnsupportedPattern { pattern };
        let c = &self.recipe.c_views[0];
        let c_roi = &self.recipe.c_roi_sizes[0];
        let height = geometry.height;

        if params.op.is_fwd_or_dedx() {
            // Every filter contributes to the same output.
            return Ok(product(&c_roi[1..]).div_ceil(height));
        }

        if params.op.is_dedw() {
            let fcd_steps = c.sizes[0].div_ceil(geometry.width);
            let c_steps = c.sizes[1].div_ceil(height);
            let mut filter_sizes = [0; 3];
            filter_sizes.copy_from_slice(&c.sizes[GEMM_DIM_B1..]);
            let concurrent = geometry.concurrent_dim - GEMM_DIM_B1;
            filter_sizes[concurrent] = filter_sizes[concurrent].div_ceil(geometry.concurrency);
            let filter_steps = product(&filter_sizes);

            // A single fast step makes the channels and filters adjacent.
            if fcd_steps == 1 {
                return Ok(c_steps * filter_steps);
            }
            return match pattern {
                WalkPattern::SpReductionFkc => Ok(c_steps),
                WalkPattern::SpReductionCkf => Ok(filter_steps),
                WalkPattern::SpReductionKcf | WalkPattern::SpReductionKfc => {
                    Ok(c_steps * filter_steps)
                }
                WalkPattern::SpReductionCfk | WalkPattern::SpReductionFck => Ok(1),
                _ => Err(unsupported()),
            };
        }

        let c_steps = c_roi[1].div_ceil(height);
        if c.batches() == 1 {
            return Ok(c_steps);
        }
        // Only one batch is covered per reuse.
        match pattern {
            WalkPattern::SpReductionFck
            | WalkPattern::SpReductionCfk
            | WalkPattern::SpReductionCkf
            | WalkPattern::SpReductionKcf => Ok(1),
            WalkPattern::SpReductionKfc | WalkPattern::SpReductionFkc => Ok(c_steps),
            _ => Err(unsupported()),
        }
    }

    fn calc_reuse_operand(&mut self) {
        if !self.sb_reuse_enabled() {
            return;
        }

        let params = self.constants.params;
        // Whether the reuse may move to the other direction when the first one has one step.
        let mut can_transfer_raster = true;
        if params.op.is_gemm() {
            let batches = self.recipe.c_views[0].batches();
            if batches > self.config.max_batch_nr_for_sb_reuse && !params.strategy.masked_bgemm {
                log::debug!("{batches} batches are too many to reuse");
                return;
            }
            match params.strategy.pattern {
                // Moving to the next batch replaces both inputs.
                WalkPattern::SpReductionKcf | WalkPattern::SpReductionCkf => return,
                WalkPattern::SpReductionKfc | WalkPattern::SpReductionCfk => {
                    can_transfer_raster = false
                }
                _ => {}
            }
        }

        let reuse = &mut self.recipe.reuse;
        match self.recipe.raster {
            true => {
                if self.fcd_geo_per_reuse > 1 {
                    reuse.operand = Some(InputOperand::A);
                } else if can_transfer_raster && self.sp_geo_per_reuse > 1 {
                    reuse.operand = Some(InputOperand::B);
                    self.recipe.raster = false;
                }
            }
            false => {
                if self.sp_geo_per_reuse > 1 {
                    reuse.operand = Some(InputOperand::B);
                } else if can_transfer_raster && self.fcd_geo_per_reuse > 1 {
                    reuse.operand = Some(InputOperand::A);
                    self.recipe.raster = true;
                }
            }
        }
    }

    /// Widens the FCD or SP grid towards the pipeline depth, never below one geometry per step.
    fn handle_pipeline_level_hint(&mut self) -> RecipeResult<()> {
        let pipeline_level = self.constants.params.strategy.pipeline_level;
        if pipeline_level <= 1 {
            return Ok(());
        }

        let geometry = self.constants.geometry;
        let accums_nr = self.constants.hardware.accums_nr;
        let raster = self.recipe.raster;
        let reused = self.recipe.reuse.operand;
        let grids = self.grids.grids_mut();
        let fcd_geo_nr = grids.fcd_grid().view_size().div_ceil(geometry.width);
        let sp_geo_nr = grids.sp_grid().view_size().div_ceil(geometry.height);

        let first = match raster {
            true => (GridType::Sp, sp_geo_nr.min(pipeline_level)),
            false => (GridType::Fcd, fcd_geo_nr.min(pipeline_level)),
        };
        extend_grid(grids, first.0, first.1)?;

        let fcd_size = grids.fcd_grid().grid_size();
        let sp_size = grids.sp_grid().grid_size();
        if fcd_size * sp_size >= pipeline_level {
            return Ok(());
        }

        // Extra throughput from the other direction, keeping the reused operand's accumulators.
        let second = match raster {
            true => {
                let max_steps = match reused {
                    Some(InputOperand::A) => fcd_geo_nr / accums_nr,
                    _ => fcd_geo_nr,
                };
                (GridType::Fcd, max_steps.min(pipeline_level.div_ceil(sp_size)))
            }
            false => {
                let max_steps = match reused {
                    Some(InputOperand::B) => sp_geo_nr / accums_nr,
                    _ => sp_geo_nr,
                };
                (GridType::Sp, max_steps.min(pipeline_level.div_ceil(fcd_size)))
            }
        };
        extend_grid(grids, second.0, second.1)
    }

    /// Decides, per spatial sub-view, whether the other operand also fits the SB.
    fn handle_2d_sb_reuse(&mut self) -> RecipeResult<()> {
        let Some(first) = self.recipe.reuse.operand else {
            return Ok(());
        };
        let single_geo = match first {
            InputOperand::A => self.sp_geo_per_reuse == 1,
            InputOperand::B => self.fcd_geo_per_reuse == 1,
        };
        if single_geo || self.grids.common_dim_grid(0).is_partial_reuse() {
            return Ok(());
        }

        let operand = first.other();
        let subview_type = self.spatial_subview_type(operand);
        let subviews_nr = self.spatial_subviews_nr(subview_type);
        ensure(subviews_nr != 0, "No spatial sub-views to reuse on")?;

        let mut cache = HashMap::<u32, bool>::new();
        let mut reused = Vec::with_capacity(subviews_nr);
        for idx in 0..subviews_nr {
            let length = self.spatial_length(subview_type, idx);
            ensure(length != 0, "Empty spatial sub-view")?;
            let fits = match cache.get(&length) {
                Some(fits) => *fits,
                None => {
                    let sb_reuse =
                        SbReuse::new(self.constants, &self.recipe, &self.grids, 0, Some(length))?;
                    let fits = !sb_reuse.is_partial();
                    cache.insert(length, fits);
                    fits
                }
            };
            reused.push(fits);
        }

        log::debug!(
            "Second reuse of {operand}: {} of {subviews_nr} {subview_type} sub-views",
            reused.iter().filter(|fits| **fits).count()
        );
        if reused.iter().any(|fits| *fits) {
            self.recipe.reuse.second = Some(SecondOperandReuse::new(operand, subview_type, reused));
        }

        Ok(())
    }

    fn spatial_subview_type(&self, operand: InputOperand) -> SubViewType {
        match (operand, self.grids.sp_grid().grid_type()) {
            (InputOperand::A, GridType::Sp) => SubViewType::Sp,
            (InputOperand::A, _) => SubViewType::NonSpatial,
            (InputOperand::B, _) => SubViewType::Fcd,
        }
    }

    fn spatial_subviews_nr(&self, subview_type: SubViewType) -> usize {
        match subview_type {
            SubViewType::Fcd => self.recipe.fcd_subviews.len(),
            SubViewType::Sp => self.recipe.sp_subviews.len(),
            SubViewType::NonSpatial => self.recipe.non_spatial_subviews.len(),
        }
    }

    fn spatial_length(&self, subview_type: SubViewType, idx: usize) -> u32 {
        match subview_type {
            SubViewType::Fcd => self.recipe.fcd_subviews[idx].view_size,
            SubViewType::Sp => self.recipe.sp_subviews[idx].view_size,
            SubViewType::NonSpatial => {
                // The SB holds a whole geometry height of channels.
                let mut sizes = self.recipe.non_spatial_subviews[idx].sizes;
                sizes[1] = sizes[1].max(self.constants.geometry.height);
                sizes.iter().filter(|size| **size != 0).product()
            }
        }
    }

    fn set_signal_amount(&mut self) -> RecipeResult<()> {
        let controls = &self.constants.params.controls;
        if controls.signaling_mode != SignalingMode::Amount {
            return Ok(());
        }

        let sp_nr = match self.grids.sp_grid().grid_type() {
            GridType::Sp => self.recipe.sp_subviews.len(),
            _ => self.recipe.non_spatial_subviews.len(),
        };
        let storing_nr = (self.recipe.fcd_subviews.len() * sp_nr) as u32;
        ensure(storing_nr != 0, "Recipe has no storing steps")?;
        self.recipe.signal_amount = controls.signal_amount.div_ceil(storing_nr);

        Ok(())
    }

    fn log_recipe(&mut self) {
        if !self.logger.is_enabled() {
            return;
        }
        let verbose = match self.logger.log_level() {
            RecipeLogLevel::Disabled => return,
            RecipeLogLevel::Basic => false,
            RecipeLogLevel::Full => true,
        };
        self.logger
            .log_recipe(&self.recipe.debug_info(verbose).join("\n"));
    }
}

// Single template axis grids only, filter grids keep their layout.
fn extend_grid(
    grids: &mut RecipeGrids,
    grid_type: GridType,
    new_size: u32,
) -> RecipeResult<()> {
    let grid = match grid_type {
        GridType::Fcd => grids.fcd_grid_mut(),
        _ => grids.sp_grid_mut(),
    };
    if grid.grid_type() == GridType::Conv
        || new_size <= grid.grid_size()
        || grid.grid_size() != grid.template().steps_nr()
    {
        return Ok(());
    }
    grid.extend(new_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Controls, test_utils::Fixture};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn config(planner: PlannerConfig) -> GlobalConfig {
        GlobalConfig {
            planner,
            ..Default::default()
        }
    }

    fn no_reuse() -> GlobalConfig {
        config(PlannerConfig {
            sb_reuse: false,
            ..Default::default()
        })
    }

    #[rstest]
    #[case(WalkPattern::SpReductionFck, Some(InputOperand::A))]
    #[case(WalkPattern::SpReductionCfk, Some(InputOperand::A))]
    #[case(WalkPattern::SpReductionKfc, Some(InputOperand::B))]
    #[case(WalkPattern::SpReductionFkc, Some(InputOperand::B))]
    #[case(WalkPattern::SpReductionKcf, None)]
    #[case(WalkPattern::SpReductionCkf, None)]
    fn batched_gemm_reuse_operand(
        #[case] pattern: WalkPattern,
        #[case] expected: Option<InputOperand>,
    ) {
        let mut fixture = Fixture::gemm();
        fixture.params.strategy.pattern = pattern;
        let constants = fixture.constants();
        let generator = RecipeGenerator::with_config(&constants, &GlobalConfig::default()).unwrap();

        assert_eq!(generator.fcd_geo_per_reuse(), 2);
        assert_eq!(generator.recipe().reuse.operand, expected);
    }

    #[test]
    fn too_many_batches_disable_reuse() {
        let fixture = Fixture::gemm();
        let constants = fixture.constants();
        let config = config(PlannerConfig {
            max_batch_nr_for_sb_reuse: 1,
            ..Default::default()
        });
        let generator = RecipeGenerator::with_config(&constants, &config).unwrap();

        assert_eq!(generator.recipe().reuse.operand, None);
    }

    #[test]
    fn disabled_reuse_leaves_the_spatial_axis_unbounded() {
        let fixture = Fixture::fwd();
        let constants = fixture.constants();
        let generator = RecipeGenerator::with_config(&constants, &no_reuse()).unwrap();

        assert_eq!(generator.sp_geo_per_reuse(), u32::MAX);
        assert_eq!(generator.recipe().reuse.operand, None);
        assert!(!generator.is_partial_sb_reuse().unwrap());
    }

    #[test]
    fn fwd_reuse_moves_to_the_spatial_axis() {
        // One geometry covers the output channels.
        let fixture = Fixture::new(
            OperationKind::Fwd,
            [64, 32, 8, 1, 1],
            [128, 64, 3, 3, 1],
            [128, 32, 8, 1, 1],
            WalkPattern::SpReductionFck,
        );
        let constants = fixture.constants();
        let generator = RecipeGenerator::with_config(&constants, &GlobalConfig::default()).unwrap();

        assert_eq!(generator.fcd_geo_per_reuse(), 1);
        assert_eq!(generator.sp_geo_per_reuse(), 4);
        assert_eq!(generator.recipe().reuse.operand, Some(InputOperand::B));
        assert!(!generator.recipe().raster);
        let utilization = generator.recipe().reuse.sb_utilization;
        assert!(utilization > 0.0 && utilization <= 1.0);
    }

    #[test]
    fn dedw_spatial_geometries_follow_the_pattern() {
        let mut fixture = Fixture::dedw();
        fixture.params.strategy.pattern = WalkPattern::ZReductionKsf;
        let constants = fixture.constants();
        // 128 output channels fit one geometry, the pattern does not matter.
        let generator = RecipeGenerator::with_config(&constants, &GlobalConfig::default()).unwrap();
        assert_eq!(generator.sp_geo_per_reuse(), 9);

        let mut fixture = Fixture::new(
            OperationKind::Dedw,
            [64, 16, 16, 1, 1],
            [256, 64, 3, 3, 1],
            [256, 16, 16, 1, 1],
            WalkPattern::ZReductionKsf,
        );
        let constants = fixture.constants();
        assert_eq!(
            RecipeGenerator::with_config(&constants, &GlobalConfig::default()).err(),
            Some(RecipeError::UnsupportedPattern {
                pattern: WalkPattern::ZReductionKsf
            })
        );

        fixture.params.strategy.pattern = WalkPattern::SpReductionCkf;
        let constants = fixture.constants();
        let generator = RecipeGenerator::with_config(&constants, &GlobalConfig::default()).unwrap();
        assert_eq!(generator.sp_geo_per_reuse(), 9);
    }

    #[test]
    fn gemm_roi_is_padded_to_interleaved_ports() {
        let mut fixture = Fixture::new(
            OperationKind::Ab,
            [128, 250, 2, 1, 1],
            [256, 128, 2, 1, 1],
            [256, 250, 2, 1, 1],
            WalkPattern::SpReductionFck,
        );
        fixture.geometry.interleaved_spatial_ports = [4, 4, 2];
        fixture.geometry.concurrency = 4;
        let constants = fixture.constants();
        let params = &fixture.params;

        let [a, b, c] = calc_roi_sizes(
            &constants,
            &params.x.sizes,
            &params.w.sizes,
            &params.y.sizes,
        );
        assert_eq!(a, [128, 252, 4, 1, 1]);
        assert_eq!(b, [256, 128, 4, 1, 1]);
        // A is transposed, C takes its ports.
        assert_eq!(c, [256, 252, 4, 1, 1]);
    }

    #[test]
    fn zero_common_dim_is_padded() {
        let fixture = Fixture::new(
            OperationKind::Ab,
            [0, 64, 1, 1, 1],
            [64, 0, 1, 1, 1],
            [64, 64, 1, 1, 1],
            WalkPattern::SpReductionFck,
        );
        // Validation rejects an empty common dim.
        let constants = RecipeConstants {
            params: &fixture.params,
            geometry: &fixture.geometry,
            hardware: &fixture.hardware,
        };
        let params = &fixture.params;

        let [a, b, _] = calc_roi_sizes(
            &constants,
            &params.x.sizes,
            &params.w.sizes,
            &params.y.sizes,
        );
        assert_eq!(a[0], 1);
        assert_eq!(b[1], 1);
    }

    #[test]
    fn pipeline_hint_widens_the_spatial_axis_first() {
        let mut fixture = Fixture::fwd();
        fixture.params.strategy.pipeline_level = 4;
        let constants = fixture.constants();
        let mut generator = RecipeGenerator::with_config(&constants, &no_reuse()).unwrap();
        let recipe = generator.generate().unwrap();

        assert_eq!(recipe.fcd_subviews.len(), 1);
        assert_eq!(recipe.sp_subviews.len(), 4);
        assert!(recipe.sp_subviews.iter().all(|sp| sp.view_size == 64));
    }

    #[test]
    fn pipeline_hint_falls_back_to_the_fast_axis() {
        let mut fixture = Fixture::fwd();
        fixture.params.strategy.pipeline_level = 8;
        let constants = fixture.constants();
        let mut generator = RecipeGenerator::with_config(&constants, &no_reuse()).unwrap();
        let recipe = generator.generate().unwrap();

        assert_eq!(recipe.fcd_subviews.len(), 2);
        assert_eq!(recipe.sp_subviews.len(), 4);
    }

    #[test]
    fn pipeline_hint_can_be_disabled() {
        let mut fixture = Fixture::fwd();
        fixture.params.strategy.pipeline_level = 4;
        let constants = fixture.constants();
        let config = config(PlannerConfig {
            sb_reuse: false,
            pipeline_level_hint: false,
            ..Default::default()
        });
        let mut generator = RecipeGenerator::with_config(&constants, &config).unwrap();

        assert_eq!(generator.generate().unwrap().sp_subviews.len(), 1);
    }

    #[test]
    fn signal_amount_is_spread_over_storing_steps() {
        let mut fixture = Fixture::fwd();
        fixture.params.strategy.pipeline_level = 8;
        fixture.params.controls = Controls {
            signaling_mode: SignalingMode::Amount,
            signal_amount: 10,
            ..Default::default()
        };
        let constants = fixture.constants();
        let mut generator = RecipeGenerator::with_config(&constants, &no_reuse()).unwrap();

        // 2 FCD by 4 SP storing steps.
        assert_eq!(generator.generate().unwrap().signal_amount, 2);
    }

    #[test]
    fn a_recipe_is_generated_once() {
        let fixture = Fixture::fwd();
        let constants = fixture.constants();
        let mut generator = RecipeGenerator::with_config(&constants, &no_reuse()).unwrap();

        generator.generate().unwrap();
        assert!(generator.generate().is_err());
    }
}
