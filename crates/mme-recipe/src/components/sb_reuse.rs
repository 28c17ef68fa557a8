use alloc::format;

use super::{
    CommonDimParams, GridType, GridView, InputOperand, InternalOperand, MAX_TENSOR_DIMS,
    BATCH_DIMS_NR, Recipe, RecipeConstants, RecipeGrids, SbReuseType, StepCapacities, product,
};
use crate::{RecipeError, RecipeResult, error::ensure};

/// Rounds `val` to the granule the reduction tree consumes along the common dim.
///
/// The granule is the common dim alignment of B's data type times the spatial interleaving of
/// the non transposed inputs, and at least a cache line when `align_to_cl`. Values below the
/// granule are raised to it.
pub fn calc_common_dim_alignment(
    constants: &RecipeConstants,
    recipe: &Recipe,
    val: u32,
    align_to_cl: bool,
    round_down: bool,
) -> u32 {
    let geometry = constants.geometry;
    let op = constants.params.op;
    let b_view = recipe
        .b_views
        .first()
        .unwrap_or_else(|| constants.params.operand(InternalOperand::B));

    let mut base = match align_to_cl {
        true => (constants.hardware.cl_size / recipe.elem_size()).max(1),
        false => 1,
    };
    let data_type_alignment = constants.hardware.common_dim_alignment(b_view.data_type);

    // Every interleaved port must still see an aligned share of the common dim.
    let mut interleaving = 1;
    for operand in [InputOperand::A, InputOperand::B] {
        if !op.is_transposed(operand) {
            interleaving = interleaving.max(geometry.interleaved_spatial_ports(operand.into()));
        }
    }
    for dim in 1..geometry.sp_interleaving_dim(InternalOperand::A) {
        interleaving *= b_view.sizes[dim].max(1);
    }
    base = base.max(data_type_alignment * interleaving);

    if val < base {
        return base;
    }
    match round_down {
        true => val / base * base,
        false => val.div_ceil(base) * base,
    }
}

/// Whether the reused input starts and strides on memory cache lines.
pub fn is_input_aligned(constants: &RecipeConstants, reused: InputOperand) -> bool {
    let view = constants.params.operand(reused.into());
    let elem_size = view.data_type.size();
    let memory_cl_size = constants.hardware.memory_cl_size;

    (view.strides[1] * elem_size) % memory_cl_size == 0
        && (view.bases[0] * elem_size) % memory_cl_size == 0
}

fn misalignment_factor(constants: &RecipeConstants, reused: InputOperand) -> u32 {
    // A misaligned read brings an extra cache line for every line.
    match is_input_aligned(constants, reused) {
        true => 1,
        false => 2,
    }
}

fn sb_size_in_cls(constants: &RecipeConstants) -> u32 {
    match constants.params.controls.sb_size_in_cls {
        0 => constants.hardware.sb_size_in_cls,
        cls => cls,
    }
}

/// Fraction of one port's suspension buffer occupied by `elements_per_port_nr` elements of the
/// reused input, misaligned cache lines counted twice.
///
/// The result is in `(0, 1]` for every footprint that fits the buffer and grows with it.
pub fn calc_sb_utilization(
    constants: &RecipeConstants,
    reused: InputOperand,
    elements_per_port_nr: u32,
) -> f32 {
    let elem_size = constants.params.operand(reused.into()).data_type.size();
    let used_bytes =
        elements_per_port_nr as u64 * elem_size as u64 * misalignment_factor(constants, reused) as u64;
    let sb_bytes = sb_size_in_cls(constants) as u64 * constants.hardware.cl_size as u64;

    used_bytes as f32 / sb_bytes as f32
}

/// Elements of one port's suspension buffer usable by the reused input.
///
/// A misaligned input only gets half of the buffer, so the rest of the planning can ignore
/// misalignment.
pub fn calc_single_sb_size(
    constants: &RecipeConstants,
    reused: Option<InputOperand>,
) -> RecipeResult<u32> {
    let reused = reused.unwrap_or(InputOperand::A);
    let elem_size = constants.params.operand(reused.into()).data_type.size();
    let sb_cls = sb_size_in_cls(constants) / misalignment_factor(constants, reused);

    let cl_elems = constants.hardware.cl_size / elem_size;
    let memory_cl_elems = constants.hardware.memory_cl_size / elem_size;
    ensure(
        memory_cl_elems >= cl_elems,
        "Memory cache line is smaller than the engine cache line",
    )?;

    match sb_cls * cl_elems {
        0 => Err(RecipeError::SbTooSmall { sb_elements: 0 }),
        sb_size => Ok(sb_size),
    }
}

/// Reuse analysis of one common dim grid.
///
/// The first reuse keeps the recipe's reused operand resident. A second reuse checks whether the
/// other operand also fits, given the spatial length of one of its sub-views.
#[derive(Debug, Clone)]
pub struct SbReuse<'g, 'a> {
    constants: &'a RecipeConstants<'a>,
    recipe: &'g Recipe,
    grids: &'g RecipeGrids<'a>,
    cd_idx: usize,
    second_operand_spatial_length: Option<u32>,
    reuse_operand: InputOperand,
    sb_size: u32,
    span: u32,
    common_dim_size: u32,
}

impl<'g, 'a> SbReuse<'g, 'a> {
    /// Analyses the common dim grid `cd_idx` of a recipe that reuses an operand.
    pub fn new(
        constants: &'a RecipeConstants<'a>,
        recipe: &'g Recipe,
        grids: &'g RecipeGrids<'a>,
        cd_idx: usize,
        second_operand_spatial_length: Option<u32>,
    ) -> RecipeResult<Self> {
        let first_operand = recipe.reuse.operand.ok_or_else(|| {
            RecipeError::InvalidConfig("SB reuse analysis requires a reused operand".into())
        })?;
        let reuse_operand = match second_operand_spatial_length {
            None => first_operand,
            Some(_) => first_operand.other(),
        };
        ensure(
            cd_idx < grids.common_dim_grids().len(),
            "Common dim grid index is out of range",
        )?;

        let mut this = Self {
            constants,
            recipe,
            grids,
            cd_idx,
            second_operand_spatial_length,
            reuse_operand,
            sb_size: calc_single_sb_size(constants, Some(reuse_operand))?,
            span: 0,
            common_dim_size: 0,
        };
        this.span = this.calc_span()?;
        this.common_dim_size = this.calc_common_dim_size()?;

        log::trace!(
            "SB reuse of {reuse_operand}: sb size {}, span {}, common dim size {}",
            this.sb_size,
            this.span,
            this.common_dim_size
        );

        Ok(this)
    }

    /// Operand kept resident.
    pub fn reuse_operand(&self) -> InputOperand {
        self.reuse_operand
    }

    /// Whether this is the first reuse level.
    pub fn is_first_reuse(&self) -> bool {
        self.second_operand_spatial_length.is_none()
    }

    /// Usable elements of one port's buffer.
    pub fn sb_size(&self) -> u32 {
        self.sb_size
    }

    /// Common dim elements reachable while the resident data stays in the buffer.
    pub fn span(&self) -> u32 {
        self.span
    }

    /// Common dim elements the resident operand occupies.
    pub fn common_dim_size(&self) -> u32 {
        self.common_dim_size
    }

    /// Whether the resident operand does not fit the buffer along the whole common dim.
    pub fn is_partial(&self) -> bool {
        self.common_dim_size > self.span
            || self.recipe.gemm_nr > 1
            || self.grids.num_cd_cuts(0) > 1
    }

    /// Buffer utilization of the resident part of the common dim.
    pub fn utilization(&self) -> f32 {
        let resident = self.common_dim_size.min(self.span);
        let per_port = resident.div_ceil(self.common_dim_ports());
        let elements = per_port
            * self.constants.geometry.eu_facing_port_size(self.reuse_operand.into())
            * self.port_repeats().unwrap_or(1);

        calc_sb_utilization(self.constants, self.reuse_operand, elements)
    }

    /// Common dim policy for a partial reuse.
    pub fn define_common_dim_grid_for_partial_reuse(
        &self,
        sp_step_capacity: u32,
    ) -> RecipeResult<CommonDimParams> {
        match self.grids.common_dim_grid(self.cd_idx).grid_type() {
            GridType::Conv | GridType::Batch => {
                self.define_conv_or_batch_grid_for_partial_reuse(sp_step_capacity)
            }
            GridType::Sp => self.define_sp_grid_for_partial_reuse(),
            grid_type => Err(RecipeError::InvalidConfig(format!(
                "A {grid_type} grid cannot split the common dim"
            ))),
        }
    }

    /// Restricts the output grids so partial sums fit the accumulators.
    ///
    /// The resident operand can only be replayed along one output row or column.
    pub fn define_spatial_grids_for_partial_reuse(
        &self,
        capacities: &mut StepCapacities,
        partial_to_memory: bool,
    ) -> RecipeResult<()> {
        let hardware = self.constants.hardware;
        let acc_capacity = match partial_to_memory {
            true => hardware.max_sb_reuse,
            false => {
                let accums_nr = match self.constants.geometry.double_accums {
                    true => hardware.accums_nr * 2,
                    false => hardware.accums_nr,
                };
                accums_nr.min(hardware.max_sb_reuse)
            }
        };

        match self.reuse_operand {
            InputOperand::A => {
                ensure(self.recipe.raster, "Reusing A requires a raster walk")?;
                capacities.fcd = capacities.fcd.min(acc_capacity);
                capacities.sp = 1;
            }
            InputOperand::B => {
                ensure(!self.recipe.raster, "Reusing B requires a non raster walk")?;
                capacities.sp = capacities.sp.min(acc_capacity);
                capacities.fcd = 1;
            }
        }

        Ok(())
    }

    /// Bounds the replays of a resident operand that fits the buffer.
    pub fn define_spatial_grids_for_non_partial_reuse(
        &self,
        capacities: &mut StepCapacities,
    ) -> RecipeResult<()> {
        let max_reuse = self.constants.hardware.max_sb_reuse;

        match self.reuse_operand {
            InputOperand::A => {
                ensure(self.recipe.raster, "Reusing A requires a raster walk")?;
                capacities.fcd = capacities.fcd.min(max_reuse);
            }
            InputOperand::B => {
                ensure(!self.recipe.raster, "Reusing B requires a non raster walk")?;
                capacities.sp = capacities.sp.min(max_reuse);
            }
        }

        Ok(())
    }

    fn align(&self, val: u32, align_to_cl: bool, round_down: bool) -> u32 {
        calc_common_dim_alignment(self.constants, self.recipe, val, align_to_cl, round_down)
    }

    fn align_to_cl(&self, val: u32) -> u32 {
        let elem_size = self.recipe.elem_size();
        (val * elem_size).next_multiple_of(self.constants.hardware.cl_size) / elem_size
    }

    fn is_reuse_transposed(&self) -> bool {
        self.constants.params.op.is_transposed(self.reuse_operand)
    }

    // Ports reading the common dim of a non transposed operand together.
    fn common_dim_ports(&self) -> u32 {
        match self.is_reuse_transposed() {
            true => 1,
            false => {
                self.constants
                    .geometry
                    .core_spatial_eu_ports(self.reuse_operand.into())
                    * self.constants.geometry.cd_concurrency
            }
        }
    }

    // A second reuse keeps the whole spatial sub-view resident.
    fn port_repeats(&self) -> RecipeResult<u32> {
        let Some(spatial_length) = self.second_operand_spatial_length else {
            return Ok(1);
        };
        let geometry = self.constants.geometry;
        let port_size = geometry.port_size(self.reuse_operand.into());
        ensure(spatial_length != 0, "Second operand has an empty spatial length")?;

        let total_ports = spatial_length.div_ceil(port_size);
        let ports_size_per_geo = match self.reuse_operand {
            InputOperand::A => geometry.height,
            InputOperand::B => geometry.width,
        };
        ensure(
            ports_size_per_geo % port_size == 0,
            "Geometry is not a whole number of ports",
        )?;

        Ok(total_ports.div_ceil(ports_size_per_geo / port_size))
    }

    fn calc_span(&self) -> RecipeResult<u32> {
        let eu_facing_port_size = self
            .constants
            .geometry
            .eu_facing_port_size(self.reuse_operand.into());
        let span = self.sb_size / (eu_facing_port_size * self.port_repeats()?)
            * self.common_dim_ports();
        let aligned = self.align(span, false, true);

        if span == 0 || aligned > span {
            return Err(RecipeError::SbTooSmall {
                sb_elements: self.sb_size,
            });
        }

        Ok(aligned)
    }

    fn calc_common_dim_size(&self) -> RecipeResult<u32> {
        let params = self.constants.params;
        let geometry = self.constants.geometry;
        let mut size = params.single_gemm_cd();

        let readers = [InputOperand::A, InputOperand::B]
            .into_iter()
            .map(|operand| match params.op.is_transposed(operand) {
                true => 1,
                false => geometry.interleaved_spatial_ports(operand.into()),
            })
            .max()
            .unwrap_or(1);

        // Spatial padding of the interleaved readers.
        let sp_dim = geometry.sp_interleaving_dim(InternalOperand::A);
        let b_sp_size = params.operand(InternalOperand::B).sizes[sp_dim];
        if params.op.is_dedw() && b_sp_size != 0 && b_sp_size < readers {
            size = size / b_sp_size * readers;
        }

        if self.is_reuse_transposed() {
            size = self.align_to_cl(size);
        }
        let b_view = self
            .recipe
            .b_views
            .first()
            .unwrap_or_else(|| params.operand(InternalOperand::B));
        let data_type_alignment = self.constants.hardware.common_dim_alignment(b_view.data_type);
        size = size.next_multiple_of(readers.max(data_type_alignment));

        if params.op.is_fwd_or_dedx() {
            let sizes = self.grids.common_dim_grid(self.cd_idx).sizes();
            size *= product(&sizes[2..]);
        }

        ensure(size != 0, "Common dim size is empty")?;
        Ok(size)
    }

    fn define_sp_grid_for_partial_reuse(&self) -> RecipeResult<CommonDimParams> {
        ensure(self.cd_idx == 0, "The weights gradient has a single common dim grid")?;
        let atomic_unit_length = self.align(1, false, true);
        ensure(
            self.span % atomic_unit_length == 0,
            "SB span is not a whole number of atomic units",
        )?;
        let sp_length = self.grids.common_dim_grid(self.cd_idx).view_size();
        ensure(
            sp_length.div_ceil(self.span) >= 2,
            "Partial reuse needs at least two splits",
        )?;

        Ok(CommonDimParams {
            reuse_type: Some(SbReuseType::PartialNoDimIncluded),
            last_included_dim: None,
            atomic_unit_length,
            max_fit_nr: self.span / atomic_unit_length,
            ..Default::default()
        })
    }

    fn define_conv_or_batch_grid_for_partial_reuse(
        &self,
        sp_step_capacity: u32,
    ) -> RecipeResult<CommonDimParams> {
        let grid = self.grids.common_dim_grid(self.cd_idx);
        let sizes = grid.sizes();
        let align_to_cl = self.is_reuse_transposed();
        let dims_nr = match grid.grid_type() {
            GridType::Batch => MAX_TENSOR_DIMS - BATCH_DIMS_NR,
            _ => MAX_TENSOR_DIMS,
        };

        let mut last_included_dim = None;
        let mut split_dim = None;
        let mut max_fit_length = 1;
        for (dim, size) in sizes.iter().enumerate().take(dims_nr) {
            if dim == grid.fcd_dim() {
                continue;
            }
            ensure(*size != 0, "Common dim grid has an empty dim")?;

            let mut fit_length = max_fit_length * size;
            // Higher dims are whole multiples of the aligned lower ones.
            if dim <= 1 {
                fit_length = self.align(fit_length, false, false);
                if align_to_cl {
                    fit_length = self.align_to_cl(fit_length);
                }
            }
            if fit_length > self.span {
                split_dim = Some(dim);
                break;
            }
            last_included_dim = Some(dim);
            max_fit_length = fit_length;
            if fit_length == self.span {
                split_dim = Some(dim);
                break;
            }
        }
        ensure(split_dim != Some(grid.fcd_dim()), "The FCD cannot be split")?;

        let params = match (last_included_dim, split_dim) {
            (Some(_), None) => {
                ensure(
                    self.grids.num_cd_cuts(0) > 1 || self.recipe.gemm_nr > 1,
                    "A common dim that fits whole is only split by cuts",
                )?;
                let max_fit_nr = match grid.grid_type() {
                    GridType::Batch => sizes[grid.first_cd_dim()],
                    _ => 1,
                };
                CommonDimParams {
                    reuse_type: Some(SbReuseType::PartialAllDimsIncluded),
                    last_included_dim,
                    atomic_unit_length: 1,
                    max_fit_nr,
                    ..Default::default()
                }
            }
            (Some(last), Some(split)) => {
                ensure(
                    grid.grid_type() != GridType::Batch,
                    "Batches never share the SB",
                )?;
                ensure(last + 1 < dims_nr, "The last dim cannot be included")?;
                let max_fit_nr = (self.span / max_fit_length).min(sizes[split]);
                ensure(max_fit_nr != 0, "Nothing fits the SB span")?;

                let params = self.constants.params;
                let partials_nr = product(&sizes[last + 1..dims_nr]);
                let to_memory = params.strategy.partials_to_memory
                    && !params.operand(InternalOperand::C).data_type.is_fp8()
                    // Port constrained geometries lose more without reuse than through memory.
                    && partials_nr <= 3
                    && sp_step_capacity >= 8
                    && self.constants.geometry.port_constrained;
                let reuse_type = match to_memory {
                    true => SbReuseType::PartialAtLeastOneDimIncludedToMemory,
                    false => SbReuseType::PartialAtLeastOneDimIncluded,
                };

                CommonDimParams {
                    reuse_type: Some(reuse_type),
                    last_included_dim,
                    atomic_unit_length: 1,
                    max_fit_nr,
                    partial_to_memory: to_memory,
                    ..Default::default()
                }
            }
            (None, _) => self.define_no_dim_included(sizes[grid.first_cd_dim()])?,
        };

        log::debug!(
            "Partial reuse of {} on common dim grid {}: {params:?}",
            self.reuse_operand,
            self.cd_idx
        );

        Ok(params)
    }

    fn define_no_dim_included(&self, first_cd_dim_size: u32) -> RecipeResult<CommonDimParams> {
        let initial = match self.is_reuse_transposed() {
            true => self.constants.hardware.cl_size / self.recipe.elem_size(),
            false => 1,
        };
        // The atomic unit is always a whole cache line.
        let atomic_unit_length = self.align(initial, true, true);
        if atomic_unit_length == 0 || atomic_unit_length > self.span {
            return Err(RecipeError::SbTooSmall {
                sb_elements: self.sb_size,
            });
        }

        let aligned_size = first_cd_dim_size.next_multiple_of(atomic_unit_length);
        let splits_nr = aligned_size.div_ceil(self.span);
        ensure(splits_nr >= 2, "Partial reuse needs at least two splits")?;
        let mut max_fit_nr = aligned_size.div_ceil(splits_nr * atomic_unit_length);
        if max_fit_nr * atomic_unit_length > self.span {
            max_fit_nr -= 1;
        }
        ensure(
            max_fit_nr != 0 && max_fit_nr * atomic_unit_length <= self.span,
            "SB span is smaller than the units that should fit it",
        )?;

        Ok(CommonDimParams {
            reuse_type: Some(SbReuseType::PartialNoDimIncluded),
            last_included_dim: None,
            atomic_unit_length,
            max_fit_nr,
            ..Default::default()
        })
    }
}
