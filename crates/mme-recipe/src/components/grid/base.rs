use core::ops::Range;

use alloc::format;
use derive_more::derive::Display;
use serde::{Deserialize, Serialize};

use crate::{
    RecipeResult,
    components::{MAX_TENSOR_DIMS, SizeArray},
    error::ensure,
};

/// What a grid splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum GridType {
    /// The flattened spatial axis of the output.
    #[display("SP")]
    Sp,
    /// The fast changing axis of the output.
    #[display("FCD")]
    Fcd,
    /// The filter dims of a convolution.
    #[display("CONV")]
    Conv,
    /// The batch dims of a GEMM.
    #[display("BATCH")]
    Batch,
}

/// The repeating pattern of step sizes of a created grid.
///
/// A template holds `first_steps_nr` steps of `units_nr_per_first_step` atomic units followed by
/// `last_steps_nr` steps of `units_nr_per_last_step` units. One step of the template may replace
/// one of its atomic units with `partial_unit_length` elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTemplate {
    /// Smallest indivisible chunk of the axis, in elements.
    pub atomic_unit_length: u32,
    /// Atomic units of each first step.
    pub units_nr_per_first_step: u32,
    /// Number of first steps.
    pub first_steps_nr: u32,
    /// Atomic units of each last step.
    pub units_nr_per_last_step: u32,
    /// Number of last steps.
    pub last_steps_nr: u32,
    /// Elements of the misaligned unit, `0` when every unit is whole.
    pub partial_unit_length: u32,
}

impl StepTemplate {
    /// Steps in one template.
    pub fn steps_nr(&self) -> u32 {
        self.first_steps_nr + self.last_steps_nr
    }

    /// Atomic units in one template.
    pub fn units_nr(&self) -> u32 {
        self.first_steps_nr * self.units_nr_per_first_step
            + self.last_steps_nr * self.units_nr_per_last_step
    }

    /// Atomic units of the step at `idx_in_template`.
    pub fn units_at(&self, idx_in_template: u32) -> u32 {
        if idx_in_template < self.first_steps_nr {
            self.units_nr_per_first_step
        } else {
            self.units_nr_per_last_step
        }
    }

    /// Whether no two steps differ by more than one atomic unit, first steps being the larger.
    pub fn is_balanced(&self) -> bool {
        if self.first_steps_nr == 0 {
            return false;
        }
        if self.last_steps_nr == 0 {
            return true;
        }

        self.units_nr_per_first_step >= self.units_nr_per_last_step
            && self.units_nr_per_first_step - self.units_nr_per_last_step <= 1
    }

    /// Redistributes the units of the template so that it is balanced.
    pub fn balance(&mut self) -> RecipeResult<()> {
        if self.is_balanced() {
            return Ok(());
        }

        let steps_nr = self.steps_nr();
        let units_nr = self.units_nr();
        let optimal_units = units_nr / steps_nr;
        ensure(optimal_units > 0, "Balancing produced empty steps")?;
        let outliers = units_nr % steps_nr;

        if outliers == 0 {
            self.units_nr_per_first_step = optimal_units;
            self.first_steps_nr = steps_nr;
            self.units_nr_per_last_step = 0;
            self.last_steps_nr = 0;
        } else {
            self.units_nr_per_first_step = optimal_units + 1;
            self.first_steps_nr = outliers;
            self.units_nr_per_last_step = optimal_units;
            self.last_steps_nr = steps_nr - outliers;
        }

        ensure(self.is_balanced(), "Balancing left the grid unbalanced")?;
        ensure(
            self.units_nr() == units_nr,
            "Balancing changed the number of units",
        )
    }

    /// Spreads `ceil(view_size / atomic_unit_length)` units over `steps_nr` steps.
    ///
    /// First steps get one more unit than last steps when the units don't divide evenly.
    pub fn distribute_uniformly(&mut self, steps_nr: u32, view_size: u32) -> RecipeResult<()> {
        ensure(steps_nr != 0, "Cannot distribute over zero steps")?;
        ensure(self.atomic_unit_length != 0, "Atomic unit is not set")?;
        let units_nr = view_size.div_ceil(self.atomic_unit_length);
        ensure(units_nr >= steps_nr, "Distribution would create empty steps")?;

        let floor_units = units_nr / steps_nr;
        let remaining = units_nr % steps_nr;

        self.units_nr_per_first_step = if remaining == 0 {
            floor_units
        } else {
            floor_units + 1
        };
        self.first_steps_nr = match (steps_nr, remaining) {
            (1, _) => 1,
            (_, 0) => steps_nr / 2,
            (_, remaining) => remaining,
        };
        self.units_nr_per_last_step = floor_units;
        self.last_steps_nr = steps_nr - self.first_steps_nr;

        ensure(
            self.units_nr() == units_nr,
            "Distribution changed the number of units",
        )
    }
}

/// State shared by every grid kind.
///
/// Bases and sizes are fixed at construction. The step template and grid size are set once when
/// the owning grid is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridBase {
    pub(crate) grid_type: GridType,
    pub(crate) bases: SizeArray,
    pub(crate) sizes: SizeArray,
    pub(crate) orig_sizes: SizeArray,
    pub(crate) split_dim: Option<usize>,
    pub(crate) grid_size: u32,
    pub(crate) template: StepTemplate,
    pub(crate) created: bool,
}

impl GridBase {
    pub(crate) fn new(
        grid_type: GridType,
        bases: SizeArray,
        sizes: SizeArray,
        orig_sizes: SizeArray,
        split_dim: Option<usize>,
    ) -> Self {
        Self {
            grid_type,
            bases,
            sizes,
            orig_sizes,
            split_dim,
            grid_size: 0,
            template: StepTemplate::default(),
            created: false,
        }
    }

    /// Product of the extents in `dims`, skipping dims whose size is zero.
    pub fn calc_view_size(&self, orig_size: bool, dims: Range<usize>) -> u32 {
        dims.filter(|dim| self.sizes[*dim] != 0)
            .map(|dim| {
                if orig_size {
                    self.orig_sizes[dim]
                } else {
                    self.sizes[dim]
                }
            })
            .product()
    }

    /// Size of the view from the split dim upward when `in_atomic_units`, of the whole view
    /// otherwise.
    pub fn view_size(&self, in_atomic_units: bool, orig_size: bool) -> u32 {
        let start = match (in_atomic_units, self.split_dim) {
            (true, Some(split_dim)) => split_dim,
            _ => 0,
        };
        self.calc_view_size(orig_size, start..MAX_TENSOR_DIMS)
    }

    /// Elements of the step at `idx_in_template`, given whether it carries the partial unit.
    pub(crate) fn template_step_size(&self, idx_in_template: u32, partial: bool) -> u32 {
        let template = &self.template;
        let size = template.units_at(idx_in_template) * template.atomic_unit_length;

        if template.partial_unit_length != 0 && partial {
            size - template.atomic_unit_length + template.partial_unit_length
        } else {
            size
        }
    }

    pub(crate) fn check_template(&self) -> RecipeResult<()> {
        let template = &self.template;
        ensure(
            template.atomic_unit_length != 0
                && template.units_nr_per_first_step != 0
                && template.first_steps_nr != 0,
            &format!("The {} grid has an empty step template", self.grid_type),
        )?;
        ensure(
            self.grid_size != 0 && self.grid_size % template.steps_nr() == 0,
            &format!(
                "The {} grid size is not a whole number of templates",
                self.grid_type
            ),
        )
    }
}

/// Read access shared by all grid kinds.
pub trait GridView {
    /// The shared grid state.
    fn base(&self) -> &GridBase;

    /// Whether the step at `idx_in_template` carries the partial unit.
    fn is_partial_step(&self, idx_in_template: u32) -> bool;

    /// Whether the grid splits its view in two or more steps.
    fn is_multi_step(&self) -> bool {
        let base = self.base();
        base.created && base.grid_size >= 2
    }

    /// The axis this grid splits.
    fn grid_type(&self) -> GridType {
        self.base().grid_type
    }

    /// Offsets of the view.
    fn bases(&self) -> &SizeArray {
        &self.base().bases
    }

    /// Extents of the view, padded.
    fn sizes(&self) -> &SizeArray {
        &self.base().sizes
    }

    /// Extents of the view before padding.
    fn orig_sizes(&self) -> &SizeArray {
        &self.base().orig_sizes
    }

    /// Dimension being split.
    fn split_dim(&self) -> Option<usize> {
        self.base().split_dim
    }

    /// Number of steps, `0` before creation.
    fn grid_size(&self) -> u32 {
        self.base().grid_size
    }

    /// The step template.
    fn template(&self) -> &StepTemplate {
        &self.base().template
    }

    /// Offset of the view on the split dim.
    fn view_base(&self) -> u32 {
        self.base().bases[self.split_dim().unwrap_or(0)]
    }

    /// Size of the view from the split dim upward, in elements.
    fn view_size(&self) -> u32 {
        self.base().view_size(true, false)
    }

    /// Size of the unpadded view from the split dim upward, in elements.
    fn orig_view_size(&self) -> u32 {
        self.base().view_size(true, true)
    }

    /// Elements of the step at `step_idx`.
    ///
    /// # Panics
    ///
    /// When `step_idx` is not smaller than [GridView::grid_size].
    fn step_size(&self, step_idx: u32) -> u32 {
        let base = self.base();
        assert!(
            step_idx < base.grid_size,
            "Step {step_idx} is outside of the {} grid of {} steps",
            base.grid_type,
            base.grid_size
        );
        let idx_in_template = step_idx % base.template.steps_nr();
        base.template_step_size(idx_in_template, self.is_partial_step(idx_in_template))
    }

    /// Elements covered by the steps before `step_idx`.
    fn step_offset(&self, step_idx: u32) -> u32 {
        let base = self.base();
        let steps_nr = base.template.steps_nr();
        let template_len: u32 = (0..steps_nr)
            .map(|idx| base.template_step_size(idx, self.is_partial_step(idx)))
            .sum();
        let in_template: u32 = (0..step_idx % steps_nr)
            .map(|idx| base.template_step_size(idx, self.is_partial_step(idx)))
            .sum();

        (step_idx / steps_nr) * template_len + in_template
    }

    /// Elements of the step at `step_idx` that fall inside the unpadded view.
    fn valid_step_size(&self, step_idx: u32) -> u32 {
        let remaining = self
            .orig_view_size()
            .saturating_sub(self.step_offset(step_idx));
        self.step_size(step_idx).min(remaining)
    }

    /// Elements of the last atomic unit of the unpadded view, `0` when it is whole.
    fn valid_partial_unit_length(&self) -> u32 {
        match self.template().atomic_unit_length {
            0 => 0,
            atomic => self.orig_view_size() % atomic,
        }
    }
}
