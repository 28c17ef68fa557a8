use super::{
    DataType, GeometryAttributes, GeometryLayout, HardwareCaps, LayerParams, OperationKind,
    RecipeConstants, SizeArray, Strategy, TensorView, WalkPattern,
};

/// Owns the planning inputs of one test workload.
pub struct Fixture {
    pub params: LayerParams,
    pub geometry: GeometryAttributes,
    pub hardware: HardwareCaps,
}

impl Fixture {
    pub fn new(
        op: OperationKind,
        x: SizeArray,
        w: SizeArray,
        y: SizeArray,
        pattern: WalkPattern,
    ) -> Self {
        let params = LayerParams::new(
            op,
            TensorView::dense(x, DataType::Bf16),
            TensorView::dense(w, DataType::Bf16),
            TensorView::dense(y, DataType::Bf16),
            Strategy::new(pattern),
        );

        Self {
            params,
            geometry: GeometryAttributes::from_layout(GeometryLayout::TwoWide, 64, 64),
            hardware: HardwareCaps::default(),
        }
    }

    /// 64 input channels, 256 output channels, 3x3 filter over a 32x8 image.
    pub fn fwd() -> Self {
        Self::new(
            OperationKind::Fwd,
            [64, 32, 8, 1, 1],
            [256, 64, 3, 3, 1],
            [256, 32, 8, 1, 1],
            WalkPattern::SpReductionFck,
        )
    }

    /// Weights gradient of a 64 to 128 channels 3x3 convolution over a 16x16 image.
    pub fn dedw() -> Self {
        Self::new(
            OperationKind::Dedw,
            [64, 16, 16, 1, 1],
            [128, 64, 3, 3, 1],
            [128, 16, 16, 1, 1],
            WalkPattern::SpReductionFck,
        )
    }

    /// Two batches of a 256x128 by 128x256 product.
    pub fn gemm() -> Self {
        Self::new(
            OperationKind::Ab,
            [128, 256, 2, 1, 1],
            [256, 128, 2, 1, 1],
            [256, 256, 2, 1, 1],
            WalkPattern::SpReductionFck,
        )
    }

    pub fn constants(&self) -> RecipeConstants<'_> {
        RecipeConstants::new(&self.params, &self.geometry, &self.hardware).unwrap()
    }
}
