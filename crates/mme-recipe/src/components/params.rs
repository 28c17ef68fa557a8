use derive_more::derive::Display;
use serde::{Deserialize, Serialize};

use super::tensor::{InputOperand, InternalOperand, TensorView, product};
use crate::{RecipeResult, error::ensure_config};

/// The matrix operation being planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum OperationKind {
    /// Forward convolution.
    #[display("fwd")]
    Fwd,
    /// Gradient of a convolution with respect to its input.
    #[display("dedx")]
    Dedx,
    /// Gradient of a transposed convolution with respect to its input.
    #[display("transposed_dedx")]
    TransposedDedx,
    /// Gradient of a convolution with respect to its weights.
    #[display("dedw")]
    Dedw,
    /// `C = A * B`.
    #[display("ab")]
    Ab,
    /// `C = A * B^T`.
    #[display("abt")]
    Abt,
    /// `C = A^T * B`.
    #[display("atb")]
    Atb,
    /// `C = A^T * B^T`.
    #[display("atbt")]
    Atbt,
}

impl OperationKind {
    /// Whether the operation is the weights gradient.
    pub fn is_dedw(&self) -> bool {
        matches!(self, OperationKind::Dedw)
    }

    /// Whether the operation is one of the input gradients.
    pub fn is_dedx(&self) -> bool {
        matches!(self, OperationKind::Dedx | OperationKind::TransposedDedx)
    }

    /// Whether the operation walks filters along the common dimension.
    pub fn is_fwd_or_dedx(&self) -> bool {
        matches!(self, OperationKind::Fwd) || self.is_dedx()
    }

    /// Whether the operation is a (batched) GEMM.
    pub fn is_gemm(&self) -> bool {
        matches!(
            self,
            OperationKind::Ab | OperationKind::Abt | OperationKind::Atb | OperationKind::Atbt
        )
    }

    /// Whether the accelerator reads the given input transposed, that is with its common
    /// dimension at dimension 0.
    pub fn is_transposed(&self, operand: InputOperand) -> bool {
        match (self, operand) {
            (OperationKind::Fwd | OperationKind::Ab | OperationKind::TransposedDedx, op) => {
                op == InputOperand::A
            }
            (OperationKind::Dedx | OperationKind::Abt, _) => true,
            (OperationKind::Dedw | OperationKind::Atb, _) => false,
            (OperationKind::Atbt, op) => op == InputOperand::B,
        }
    }

    /// Dimension holding the common dim of the given input.
    pub fn common_dim_of(&self, operand: InputOperand) -> usize {
        if self.is_transposed(operand) { 0 } else { 1 }
    }
}

/// Order in which the accelerator walks the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum WalkPattern {
    /// Spatial reduction, loops k, f, c from outer to inner.
    #[display("sp_reduction_kfc")]
    SpReductionKfc,
    /// Spatial reduction, loops f, k, c.
    #[display("sp_reduction_fkc")]
    SpReductionFkc,
    /// Spatial reduction, loops f, c, k.
    #[display("sp_reduction_fck")]
    SpReductionFck,
    /// Spatial reduction, loops c, f, k.
    #[display("sp_reduction_cfk")]
    SpReductionCfk,
    /// Spatial reduction, loops k, c, f.
    #[display("sp_reduction_kcf")]
    SpReductionKcf,
    /// Spatial reduction, loops c, k, f.
    #[display("sp_reduction_ckf")]
    SpReductionCkf,
    /// Filter reduction, loops k, s, f.
    #[display("z_reduction_ksf")]
    ZReductionKsf,
    /// Filter reduction, loops s, k, f.
    #[display("z_reduction_skf")]
    ZReductionSkf,
}

impl WalkPattern {
    /// Whether the walk completes the fast output dimension before moving spatially.
    pub fn is_raster(&self) -> bool {
        matches!(
            self,
            WalkPattern::SpReductionFck | WalkPattern::SpReductionCfk | WalkPattern::ZReductionSkf
        )
    }
}

/// How the accelerator signals completed work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingMode {
    /// One signal per stored output.
    #[default]
    Output,
    /// A fixed amount of signals spread over the storing steps.
    Amount,
}

/// Strategy chosen by the compiler for this workload.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    /// Walk pattern over the output.
    pub pattern: WalkPattern,
    /// Whether an input may be kept resident in the suspension buffer.
    #[new(value = "true")]
    pub sb_reuse: bool,
    /// Whether a masked auxiliary gemm is accumulated with the main one.
    #[new(default)]
    pub masked_bgemm: bool,
    /// Whether partial sums may be reduced in memory instead of accumulators.
    #[new(default)]
    pub partials_to_memory: bool,
    /// Number of activations the graph pipeline would like to overlap.
    #[new(value = "1")]
    pub pipeline_level: u32,
}

/// Fine-grained overrides of the hardware defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    /// SB capacity in cache lines, `0` uses the hardware value.
    #[serde(default)]
    pub sb_size_in_cls: u32,
    /// Signaling mode of the produced steps.
    #[serde(default)]
    pub signaling_mode: SignalingMode,
    /// Total amount of signals in [SignalingMode::Amount].
    #[serde(default)]
    pub signal_amount: u32,
}

/// Auxiliary tensors of a masked batched GEMM.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxTensors {
    /// Auxiliary X.
    pub x: TensorView,
    /// Auxiliary W.
    pub w: TensorView,
    /// Auxiliary Y.
    pub y: TensorView,
}

/// Everything the compiler tells the planner about one workload.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerParams {
    /// Operation kind.
    pub op: OperationKind,
    /// The X tensor.
    pub x: TensorView,
    /// The W tensor.
    pub w: TensorView,
    /// The Y tensor.
    pub y: TensorView,
    /// Strategy selected by the compiler.
    pub strategy: Strategy,
    /// Hardware overrides.
    #[new(default)]
    #[serde(default)]
    pub controls: Controls,
    /// Auxiliary tensors for masked batched GEMM.
    #[new(default)]
    #[serde(default)]
    pub aux: Option<AuxTensors>,
    /// Offset of the output's flattened spatial window.
    #[new(default)]
    #[serde(default)]
    pub sp_base: u32,
    /// Common dim position where the compiler asks to cut the reduction, `0` for none.
    #[new(default)]
    #[serde(default)]
    pub cd_cut_point: u32,
}

impl LayerParams {
    /// The tensor bound to an accelerator operand.
    pub fn operand(&self, operand: InternalOperand) -> &TensorView {
        Self::map_operand(self.op, operand, &self.x, &self.w, &self.y)
    }

    /// The auxiliary tensor bound to an accelerator operand.
    pub fn aux_operand(&self, operand: InternalOperand) -> Option<&TensorView> {
        self.aux
            .as_ref()
            .map(|aux| Self::map_operand(self.op, operand, &aux.x, &aux.w, &aux.y))
    }

    fn map_operand<'a>(
        op: OperationKind,
        operand: InternalOperand,
        x: &'a TensorView,
        w: &'a TensorView,
        y: &'a TensorView,
    ) -> &'a TensorView {
        match (op, operand) {
            (OperationKind::Dedx | OperationKind::TransposedDedx, InternalOperand::A) => y,
            (OperationKind::Dedx | OperationKind::TransposedDedx, InternalOperand::B) => w,
            (OperationKind::Dedx | OperationKind::TransposedDedx, InternalOperand::C) => x,
            (OperationKind::Dedw, InternalOperand::A) => x,
            (OperationKind::Dedw, InternalOperand::B) => y,
            (OperationKind::Dedw, InternalOperand::C) => w,
            (_, InternalOperand::A) => x,
            (_, InternalOperand::B) => w,
            (_, InternalOperand::C) => y,
        }
    }

    /// Common dim length of a single gemm, in elements.
    pub fn single_gemm_cd(&self) -> u32 {
        match self.op {
            OperationKind::Fwd => self.x.sizes[0],
            OperationKind::Dedx | OperationKind::TransposedDedx => self.y.sizes[0],
            OperationKind::Dedw => product(&self.y.sizes[1..]),
            OperationKind::Ab | OperationKind::Abt => self.x.sizes[0],
            OperationKind::Atb | OperationKind::Atbt => self.x.sizes[1],
        }
    }

    /// Whether the strategy walks in raster order.
    pub fn is_pattern_raster(&self) -> bool {
        self.strategy.pattern.is_raster()
    }

    /// Whether SB reuse may be used at all.
    pub fn is_sb_reuse(&self) -> bool {
        self.strategy.sb_reuse
    }

    /// Checks the parameters are consistent before planning.
    pub fn validate(&self) -> RecipeResult<()> {
        if self.strategy.masked_bgemm {
            ensure_config(
                self.op.is_gemm(),
                "Masked batched gemm is only supported for gemm operations",
            )?;
            ensure_config(
                self.aux.is_some(),
                "Masked batched gemm requires auxiliary tensors",
            )?;
        }

        let c = self.operand(InternalOperand::C);
        ensure_config(
            c.sizes[0] != 0 && c.sizes[1] != 0,
            "Output tensor must have non-empty fast and spatial dimensions",
        )?;
        ensure_config(
            self.single_gemm_cd() != 0,
            "Common dimension must not be empty",
        )?;

        if self.cd_cut_point != 0 {
            ensure_config(
                !self.op.is_gemm(),
                "Common dim cut point is only supported for convolutions",
            )?;
            ensure_config(
                self.cd_cut_point < self.single_gemm_cd(),
                "Common dim cut point must fall inside the common dim",
            )?;
        }

        if self.controls.signaling_mode == SignalingMode::Amount {
            ensure_config(
                self.controls.signal_amount != 0,
                "Signaling by amount requires a non-zero signal amount",
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::DataType;
    use rstest::rstest;

    #[rstest]
    #[case(OperationKind::Fwd, true, false)]
    #[case(OperationKind::Ab, true, false)]
    #[case(OperationKind::TransposedDedx, true, false)]
    #[case(OperationKind::Dedx, true, true)]
    #[case(OperationKind::Abt, true, true)]
    #[case(OperationKind::Dedw, false, false)]
    #[case(OperationKind::Atb, false, false)]
    #[case(OperationKind::Atbt, false, true)]
    fn transposition_per_operation(
        #[case] op: OperationKind,
        #[case] a: bool,
        #[case] b: bool,
    ) {
        assert_eq!(op.is_transposed(InputOperand::A), a);
        assert_eq!(op.is_transposed(InputOperand::B), b);
    }

    #[test]
    fn operands_follow_the_operation() {
        let x = TensorView::dense([8, 4, 1, 1, 1], DataType::Bf16);
        let w = TensorView::dense([16, 8, 1, 1, 1], DataType::Bf16);
        let y = TensorView::dense([16, 4, 1, 1, 1], DataType::Bf16);
        let strategy = Strategy::new(WalkPattern::SpReductionFck);

        let dedx = LayerParams::new(OperationKind::Dedx, x, w, y, strategy);
        assert_eq!(dedx.operand(InternalOperand::A), &y);
        assert_eq!(dedx.operand(InternalOperand::C), &x);
        assert_eq!(dedx.single_gemm_cd(), 16);

        let dedw = LayerParams::new(OperationKind::Dedw, x, w, y, strategy);
        assert_eq!(dedw.operand(InternalOperand::B), &y);
        assert_eq!(dedw.operand(InternalOperand::C), &w);
        assert_eq!(dedw.single_gemm_cd(), 4);
    }

    #[test]
    fn masked_bgemm_needs_aux_tensors() {
        let view = TensorView::dense([8, 8, 2, 1, 1], DataType::Bf16);
        let mut strategy = Strategy::new(WalkPattern::SpReductionFck);
        strategy.masked_bgemm = true;
        let params = LayerParams::new(OperationKind::Ab, view, view, view, strategy);

        assert!(params.validate().is_err());
    }

    #[test]
    fn cd_cut_point_past_the_common_dim_is_rejected() {
        let x = TensorView::dense([64, 32, 8, 1, 1], DataType::Bf16);
        let w = TensorView::dense([256, 64, 3, 3, 1], DataType::Bf16);
        let y = TensorView::dense([256, 32, 8, 1, 1], DataType::Bf16);
        let strategy = Strategy::new(WalkPattern::SpReductionFck);
        let mut params = LayerParams::new(OperationKind::Fwd, x, w, y, strategy);

        params.cd_cut_point = 32;
        assert!(params.validate().is_ok());
        params.cd_cut_point = 64;
        assert!(matches!(
            params.validate(),
            Err(crate::RecipeError::InvalidConfig(_))
        ));
        params.cd_cut_point = 1000;
        assert!(matches!(
            params.validate(),
            Err(crate::RecipeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn cd_cut_point_on_gemm_is_rejected() {
        let x = TensorView::dense([64, 32, 8, 1, 1], DataType::Bf16);
        let w = TensorView::dense([256, 64, 8, 1, 1], DataType::Bf16);
        let y = TensorView::dense([256, 32, 8, 1, 1], DataType::Bf16);
        let strategy = Strategy::new(WalkPattern::SpReductionFck);
        let mut params = LayerParams::new(OperationKind::Ab, x, w, y, strategy);
        params.cd_cut_point = 32;

        assert!(matches!(
            params.validate(),
            Err(crate::RecipeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn raster_patterns() {
        assert!(WalkPattern::SpReductionFck.is_raster());
        assert!(WalkPattern::ZReductionSkf.is_raster());
        assert!(!WalkPattern::ZReductionKsf.is_raster());
        assert!(!WalkPattern::SpReductionKfc.is_raster());
    }
}
