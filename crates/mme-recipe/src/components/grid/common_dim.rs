use alloc::format;
use derive_more::derive::Display;
use serde::{Deserialize, Serialize};

use super::base::{GridBase, GridType, GridView};
use crate::{
    RecipeError, RecipeResult,
    components::{MAX_TENSOR_DIMS, RecipeConstants, SizeArray},
    error::ensure,
};

/// How the resident operand is replayed along the common dim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum SbReuseType {
    /// No operand stays resident.
    #[display("no_reuse")]
    NoReuse,
    /// Partial reuse where whole dims of the common dim fit the SB.
    #[display("partial_at_least_one_dim_included")]
    PartialAtLeastOneDimIncluded,
    /// Like [SbReuseType::PartialAtLeastOneDimIncluded], reducing partials in memory.
    #[display("partial_at_least_one_dim_included_to_memory")]
    PartialAtLeastOneDimIncludedToMemory,
    /// Partial reuse where not even the first common dim fits the SB.
    #[display("partial_no_dim_included")]
    PartialNoDimIncluded,
    /// The whole common dim fits, but it is cut into several grids.
    #[display("partial_all_dims_included")]
    PartialAllDimsIncluded,
    /// The whole common dim fits the SB.
    #[display("non_partial_reuse")]
    NonPartialReuse,
}

impl SbReuseType {
    /// Whether the common dim is split into several partial sums.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            SbReuseType::PartialAtLeastOneDimIncluded
                | SbReuseType::PartialAtLeastOneDimIncludedToMemory
                | SbReuseType::PartialNoDimIncluded
        )
    }

    /// Whether partial sums are reduced in memory.
    pub fn is_partial_to_memory(&self) -> bool {
        matches!(self, SbReuseType::PartialAtLeastOneDimIncludedToMemory)
    }

    /// Whether at least one whole dim fits the SB.
    pub fn is_at_least_one_dim_included(&self) -> bool {
        matches!(
            self,
            SbReuseType::PartialAtLeastOneDimIncluded
                | SbReuseType::PartialAtLeastOneDimIncludedToMemory
        )
    }
}

/// Policy used to create a [CommonDimGrid].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommonDimParams {
    /// Reuse policy, required.
    pub reuse_type: Option<SbReuseType>,
    /// Highest dim whose data fully fits one step, `None` when no dim does.
    pub last_included_dim: Option<usize>,
    /// Granule of the split, in elements.
    pub atomic_unit_length: u32,
    /// Maximum atomic units per step.
    pub max_fit_nr: u32,
    /// Split even though the whole common dim would fit.
    pub forced_partial: bool,
    /// Partial sums are reduced in memory.
    pub partial_to_memory: bool,
}

/// Splits the common (reduction) dim of the B operand.
#[derive(Debug, Clone)]
pub struct CommonDimGrid<'a> {
    base: GridBase,
    constants: &'a RecipeConstants<'a>,
    fcd_dim: usize,
    multiple_cd_cuts: bool,
    reuse_type: Option<SbReuseType>,
    creation: Option<CommonDimParams>,
}

impl<'a> CommonDimGrid<'a> {
    /// A grid over a B view whose `fcd_dim` has been cleared to zero.
    pub fn new(
        grid_type: GridType,
        bases: SizeArray,
        sizes: SizeArray,
        orig_sizes: SizeArray,
        constants: &'a RecipeConstants<'a>,
        fcd_dim: usize,
        multiple_cd_cuts: bool,
    ) -> RecipeResult<Self> {
        if fcd_dim > 1 {
            return Err(RecipeError::SplitDimOutOfRange {
                dim: fcd_dim,
                max: 2,
            });
        }
        ensure(
            sizes[fcd_dim] == 0,
            "The FCD of a common dim grid must be cleared",
        )?;

        Ok(Self {
            base: GridBase::new(grid_type, bases, sizes, orig_sizes, None),
            constants,
            fcd_dim,
            multiple_cd_cuts,
            reuse_type: None,
            creation: None,
        })
    }

    /// Splits the common dim according to `params`.
    ///
    /// Creating again with the same parameters is a no-op.
    pub fn create(&mut self, params: &CommonDimParams) -> RecipeResult<()> {
        if let Some(creation) = &self.creation {
            return match creation == params {
                true => Ok(()),
                false => Err(RecipeError::AlreadyCreated {
                    grid_type: self.base.grid_type,
                }),
            };
        }
        let reuse_type = params.reuse_type.ok_or_else(|| {
            RecipeError::InvalidConfig(format!(
                "The {} grid has no reuse policy",
                self.base.grid_type
            ))
        })?;
        if !params.forced_partial && (params.max_fit_nr == 0 || params.atomic_unit_length == 0) {
            return Err(RecipeError::InvalidConfig(format!(
                "The {} grid needs non-zero fit and atomic unit",
                self.base.grid_type
            )));
        }

        self.reuse_type = Some(reuse_type);
        self.base.template.atomic_unit_length = params.atomic_unit_length;
        self.base.split_dim = Some(self.calc_split_dim(reuse_type, params.last_included_dim)?);

        if reuse_type.is_partial() {
            if params.last_included_dim.is_none()
                != (reuse_type == SbReuseType::PartialNoDimIncluded)
            {
                return Err(RecipeError::InvalidConfig(format!(
                    "Reuse {reuse_type} does not match the last included dim {:?}",
                    params.last_included_dim
                )));
            }
            if reuse_type.is_at_least_one_dim_included() {
                self.split_at_least_one_dim_included(params.max_fit_nr)?;
            } else {
                self.split_no_dim_included(params.max_fit_nr)?;
            }
            self.base.template.balance()?;
        } else {
            self.split_at_least_one_dim_included(params.max_fit_nr)?;
        }

        let template = &self.base.template;
        ensure(
            template.units_nr_per_first_step <= params.max_fit_nr
                && template.units_nr_per_last_step <= params.max_fit_nr,
            "Common dim steps exceed the fit",
        )?;
        self.calc_grid_size();
        self.base.check_template()?;
        self.base.created = true;
        self.creation = Some(*params);

        log::trace!(
            "Created common dim {} grid: {reuse_type}, split dim {:?}, {} steps, template {:?}",
            self.base.grid_type,
            self.base.split_dim,
            self.base.grid_size,
            self.base.template
        );

        Ok(())
    }

    /// Reuse policy the grid was created with.
    pub fn reuse_type(&self) -> Option<SbReuseType> {
        self.reuse_type
    }

    /// Dimension equivalent to the output's FCD, cleared in this grid.
    pub fn fcd_dim(&self) -> usize {
        self.fcd_dim
    }

    /// First dimension of the common dim.
    pub fn first_cd_dim(&self) -> usize {
        1 - self.fcd_dim
    }

    /// Whether the common dim is cut into several grids.
    pub fn has_multiple_cd_cuts(&self) -> bool {
        self.multiple_cd_cuts
    }

    /// Whether the common dim is split into partial sums.
    pub fn is_partial_reuse(&self) -> bool {
        self.reuse_type.is_some_and(|reuse| reuse.is_partial())
    }

    /// Whether partial sums are reduced in memory.
    pub fn is_partial_to_memory(&self) -> bool {
        self.reuse_type
            .is_some_and(|reuse| reuse.is_partial_to_memory())
    }

    /// Whether the whole common dim fits one step.
    pub fn is_all_dims_included(&self) -> bool {
        self.reuse_type == Some(SbReuseType::PartialAllDimsIncluded)
    }

    /// Number of partial sums an accumulator tracks, counting the first batch only for GEMMs.
    pub fn partials_nr(&self) -> u32 {
        match self.base.grid_type {
            GridType::Batch => self.base.template.steps_nr(),
            _ => self.base.grid_size,
        }
    }

    fn calc_split_dim(
        &self,
        reuse_type: SbReuseType,
        last_included_dim: Option<usize>,
    ) -> RecipeResult<usize> {
        let sizes = &self.base.sizes;
        let split_dim = match (reuse_type.is_at_least_one_dim_included(), last_included_dim) {
            (true, Some(last)) => {
                let split_dim = last + 1;
                if split_dim == self.fcd_dim {
                    split_dim + 1
                } else {
                    split_dim
                }
            }
            (true, None) => {
                return Err(RecipeError::InvalidConfig(format!(
                    "Reuse {reuse_type} requires a last included dim"
                )));
            }
            (false, None) => self.first_cd_dim(),
            (false, Some(last)) if last == MAX_TENSOR_DIMS - 1 => last,
            // Batches can be sliced without creating partials.
            (false, Some(last)) if self.constants.params.op.is_gemm() => last,
            (false, Some(last)) => {
                ensure(
                    last + 2 <= MAX_TENSOR_DIMS && sizes[last + 1] == 0,
                    "Expected an empty dim above the last included dim",
                )?;
                last
            }
        };

        if split_dim >= MAX_TENSOR_DIMS {
            return Err(RecipeError::SplitDimOutOfRange {
                dim: split_dim,
                max: MAX_TENSOR_DIMS,
            });
        }
        if let Some(last) = last_included_dim {
            if last >= MAX_TENSOR_DIMS {
                return Err(RecipeError::SplitDimOutOfRange {
                    dim: last,
                    max: MAX_TENSOR_DIMS,
                });
            }
            ensure(sizes[last] != 0, "The last included dim is empty")?;
        }

        Ok(split_dim)
    }

    // Last step is strictly smaller than the first ones and appears at most once.
    fn split_at_least_one_dim_included(&mut self, max_fit_nr: u32) -> RecipeResult<()> {
        let template = &mut self.base.template;
        ensure(
            template.atomic_unit_length == 1,
            "Whole dims are split in units of one",
        )?;
        ensure(max_fit_nr != 0, "Cannot fit zero units in a step")?;

        let split_dim = self.base.split_dim.unwrap_or(0);
        let included = self.base.sizes[split_dim];
        template.units_nr_per_first_step = max_fit_nr;
        template.first_steps_nr = included / max_fit_nr;
        template.units_nr_per_last_step = included - template.first_steps_nr * max_fit_nr;
        template.last_steps_nr = u32::from(template.units_nr_per_last_step != 0);

        ensure(
            template.units_nr_per_last_step < template.units_nr_per_first_step,
            "Last common dim step must be smaller than the first ones",
        )
    }

    // Exactly one last step, which may carry the misaligned unit.
    fn split_no_dim_included(&mut self, max_fit_nr: u32) -> RecipeResult<()> {
        // The spatial grid squashes the whole view into one common dim.
        let first_cd_len = match self.base.grid_type {
            GridType::Sp => self.base.calc_view_size(false, 0..MAX_TENSOR_DIMS),
            _ => self.base.sizes[self.first_cd_dim()],
        };
        let template = &mut self.base.template;
        let max_step_len = template.atomic_unit_length * max_fit_nr;
        ensure(max_step_len != 0, "Common dim step length is zero")?;
        let steps_nr = first_cd_len.div_ceil(max_step_len);
        ensure(
            steps_nr >= 2,
            "A common dim that fits one step must include whole dims",
        )?;

        template.units_nr_per_first_step = max_fit_nr;
        template.first_steps_nr = steps_nr - 1;
        let first_steps_len = template.first_steps_nr * max_step_len;
        let last_step_len = first_cd_len - first_steps_len;
        template.units_nr_per_last_step = last_step_len.div_ceil(template.atomic_unit_length);
        template.last_steps_nr = 1;
        template.partial_unit_length = first_cd_len % template.atomic_unit_length;

        ensure(
            template.units_nr_per_last_step > 0
                && template.units_nr_per_last_step <= template.units_nr_per_first_step,
            "Wrong distribution of the common dim units",
        )
    }

    fn calc_grid_size(&mut self) {
        let repetitions: u32 = match self.base.grid_type {
            GridType::Sp => 1,
            _ => {
                let start = (self.base.split_dim.unwrap_or(0) + 1).max(2);
                self.base.sizes[start.min(MAX_TENSOR_DIMS)..]
                    .iter()
                    .filter(|size| **size != 0)
                    .product()
            }
        };

        self.base.grid_size = self.base.template.steps_nr() * repetitions;
    }
}

impl GridView for CommonDimGrid<'_> {
    fn base(&self) -> &GridBase {
        &self.base
    }

    fn is_partial_step(&self, idx_in_template: u32) -> bool {
        self.reuse_type == Some(SbReuseType::PartialNoDimIncluded)
            && idx_in_template + 1 == self.base.template.steps_nr()
    }

    fn is_multi_step(&self) -> bool {
        if !(self.base.created && self.base.grid_size >= 2) {
            return false;
        }
        if self.multiple_cd_cuts || self.is_partial_reuse() {
            return true;
        }

        self.base.grid_type == GridType::Batch
    }
}
