use alloc::{format, string::String, vec::Vec};
use core::fmt::Debug;
use derive_more::derive::Display;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{InputOperand, InternalOperand, OperationKind, SizeArray, TensorView};

/// One step of a one dimensional grid.
#[derive(new, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleDimSubView {
    /// Offset of the step.
    pub view_base: u32,
    /// Extent of the step, padded.
    pub view_size: u32,
    /// Extent of the step inside the unpadded view.
    pub view_orig_size: u32,
}

/// One step of a multi dimensional grid.
#[derive(new, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiDimSubView {
    /// Offset of the step in every dimension.
    pub bases: SizeArray,
    /// Extent of the step in every dimension.
    pub sizes: SizeArray,
}

impl MultiDimSubView {
    /// Number of elements covered by the step, skipping cleared dims.
    pub fn volume(&self) -> u32 {
        self.sizes.iter().filter(|size| **size != 0).product()
    }
}

/// The sub-view list a decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum SubViewType {
    /// Steps along the output's fast dim.
    #[display("FCD")]
    Fcd,
    /// Steps along the output's spatial dim.
    #[display("SP")]
    Sp,
    /// Steps along the filter or batch dims.
    #[display("NON_SPATIAL")]
    NonSpatial,
}

/// Reuse of the second operand on top of the first one.
#[derive(new, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondOperandReuse {
    /// Operand kept resident in a second level.
    pub operand: InputOperand,
    /// Sub-views the decisions are indexed by.
    pub subview_type: SubViewType,
    /// Whether each sub-view reuses the second operand.
    pub reused: Vec<bool>,
}

/// Which operands stay resident in the suspension buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReuseInfo {
    /// Operand kept resident, if any.
    pub operand: Option<InputOperand>,
    /// Fraction of the SB the resident operand occupies.
    pub sb_utilization: f32,
    /// Reuse of the other operand, if enabled.
    pub second: Option<SecondOperandReuse>,
}

impl ReuseInfo {
    /// Whether `operand` is the first level reused operand.
    pub fn is_reused(&self, operand: InputOperand) -> bool {
        self.operand == Some(operand)
    }

    /// Short name of the reuse combination.
    pub fn label(&self) -> &'static str {
        match (self.operand, self.second.is_some()) {
            (None, _) => "N/A",
            (Some(InputOperand::A), false) => "A",
            (Some(InputOperand::B), false) => "B",
            (Some(InputOperand::A), true) => "AB",
            (Some(InputOperand::B), true) => "BA",
        }
    }
}

/// The step plan of one workload.
///
/// The views are indexed by gemm. A masked batched gemm appends its auxiliary views after the
/// main ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    /// Operation being planned.
    pub op: OperationKind,
    /// Whether the output is walked in raster order.
    pub raster: bool,
    /// Gemms accumulated together.
    pub gemm_nr: u32,
    /// Whether the recipe holds a masked batched gemm.
    pub masked_bgemm: bool,
    /// Batch dim processed concurrently.
    pub concurrent_dim: usize,
    /// Batches processed concurrently.
    pub concurrency: u32,
    /// A views per gemm.
    pub a_views: SmallVec<[TensorView; 2]>,
    /// B views per gemm.
    pub b_views: SmallVec<[TensorView; 2]>,
    /// C views per gemm.
    pub c_views: SmallVec<[TensorView; 2]>,
    /// Padded A sizes per gemm.
    pub a_roi_sizes: SmallVec<[SizeArray; 2]>,
    /// Padded B sizes per gemm.
    pub b_roi_sizes: SmallVec<[SizeArray; 2]>,
    /// Padded C sizes per gemm.
    pub c_roi_sizes: SmallVec<[SizeArray; 2]>,
    /// Steps along the output's fast dim.
    pub fcd_subviews: Vec<SingleDimSubView>,
    /// Steps along the output's spatial dim.
    pub sp_subviews: Vec<SingleDimSubView>,
    /// Steps along the filter or batch dims.
    pub non_spatial_subviews: Vec<MultiDimSubView>,
    /// Suspension buffer reuse.
    pub reuse: ReuseInfo,
    /// Partial sums of all gemms.
    pub partials_nr: u32,
    /// Partial sums of each gemm.
    pub partials_nr_per_gemm: SmallVec<[u32; 2]>,
    /// Partial sums are reduced in memory.
    pub partial_to_memory: bool,
    /// The common dim is only split on batch dims.
    pub split_on_batch_dims: bool,
    /// Signals per storing step in amount signaling, `0` otherwise.
    pub signal_amount: u32,
}

impl Recipe {
    /// An empty recipe for `op`.
    pub fn new(op: OperationKind, raster: bool) -> Self {
        Self {
            op,
            raster,
            gemm_nr: 1,
            masked_bgemm: false,
            concurrent_dim: 0,
            concurrency: 1,
            a_views: SmallVec::new(),
            b_views: SmallVec::new(),
            c_views: SmallVec::new(),
            a_roi_sizes: SmallVec::new(),
            b_roi_sizes: SmallVec::new(),
            c_roi_sizes: SmallVec::new(),
            fcd_subviews: Vec::new(),
            sp_subviews: Vec::new(),
            non_spatial_subviews: Vec::new(),
            reuse: ReuseInfo::default(),
            partials_nr: 0,
            partials_nr_per_gemm: SmallVec::new(),
            partial_to_memory: false,
            split_on_batch_dims: false,
            signal_amount: 0,
        }
    }

    /// View of `operand` for `gemm`.
    ///
    /// # Panics
    ///
    /// When `gemm` is not smaller than [Recipe::gemm_nr].
    pub fn view(&self, operand: InternalOperand, gemm: usize) -> &TensorView {
        match operand {
            InternalOperand::A => &self.a_views[gemm],
            InternalOperand::B => &self.b_views[gemm],
            InternalOperand::C => &self.c_views[gemm],
        }
    }

    /// Padded sizes of `operand` for `gemm`.
    pub fn roi_sizes(&self, operand: InternalOperand, gemm: usize) -> &SizeArray {
        match operand {
            InternalOperand::A => &self.a_roi_sizes[gemm],
            InternalOperand::B => &self.b_roi_sizes[gemm],
            InternalOperand::C => &self.c_roi_sizes[gemm],
        }
    }

    /// Whether `operand` stays resident in the suspension buffer.
    pub fn is_reused(&self, operand: InputOperand) -> bool {
        self.reuse.is_reused(operand)
    }

    /// Size in bytes of the elements the engine reads.
    pub fn elem_size(&self) -> u32 {
        self.a_views
            .first()
            .map(|view| view.data_type.size())
            .unwrap_or(1)
    }

    /// Number of batches of the first gemm's output.
    pub fn batches(&self) -> u32 {
        self.c_views
            .first()
            .map(TensorView::batches)
            .unwrap_or(1)
    }

    /// Human readable description, one summary line followed by the sub-views when `verbose`.
    pub fn debug_info(&self, verbose: bool) -> Vec<String> {
        let non_spatial = match self.op.is_gemm() {
            true => "BATCH",
            false => "CONV",
        };
        let utilization = match self.reuse.operand {
            Some(_) => format!(
                ", SBUtilization={}%",
                (self.reuse.sb_utilization * 100.0) as u32
            ),
            None => String::new(),
        };

        let mut info = Vec::new();
        info.push(format!(
            "op={}, raster={}, reuse={}, FCD={}, SP={}, {non_spatial}={}{utilization}",
            self.op,
            self.raster,
            self.reuse.label(),
            self.fcd_subviews.len(),
            self.sp_subviews.len(),
            self.non_spatial_subviews.len(),
        ));

        if verbose {
            push_subviews(&mut info, "FCD", &self.fcd_subviews);
            push_subviews(&mut info, "SP", &self.sp_subviews);
            push_subviews(&mut info, non_spatial, &self.non_spatial_subviews);
        }

        info
    }
}

fn push_subviews<T: Debug>(info: &mut Vec<String>, name: &str, subviews: &[T]) {
    info.push(format!("{name} sub-views:"));
    for (idx, subview) in subviews.iter().enumerate() {
        info.push(format!("    {idx}: {subview:?}"));
    }
}
