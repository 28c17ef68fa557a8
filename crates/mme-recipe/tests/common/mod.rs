#![allow(dead_code)]

use mme_recipe::components::{
    DataType, GeometryAttributes, GeometryLayout, HardwareCaps, LayerParams, MultiDimSubView,
    OperationKind, RecipeConstants, SingleDimSubView, SizeArray, Strategy, TensorView,
    WalkPattern,
};

/// Inputs of one planned workload.
pub struct Workload {
    pub params: LayerParams,
    pub geometry: GeometryAttributes,
    pub hardware: HardwareCaps,
}

impl Workload {
    pub fn new(
        op: OperationKind,
        x: SizeArray,
        w: SizeArray,
        y: SizeArray,
        pattern: WalkPattern,
    ) -> Self {
        Self {
            params: LayerParams::new(
                op,
                TensorView::dense(x, DataType::Bf16),
                TensorView::dense(w, DataType::Bf16),
                TensorView::dense(y, DataType::Bf16),
                Strategy::new(pattern),
            ),
            geometry: GeometryAttributes::from_layout(GeometryLayout::TwoWide, 64, 64),
            hardware: HardwareCaps::default(),
        }
    }

    pub fn constants(&self) -> RecipeConstants<'_> {
        RecipeConstants::new(&self.params, &self.geometry, &self.hardware).unwrap()
    }
}

/// Asserts the steps tile `[base, base + size)` without gaps.
pub fn assert_covers(subviews: &[SingleDimSubView], base: u32, size: u32) {
    let mut next = base;
    for subview in subviews {
        assert_eq!(subview.view_base, next, "gap before {subview:?}");
        assert!(subview.view_size != 0, "empty step {subview:?}");
        assert!(subview.view_orig_size <= subview.view_size);
        next += subview.view_size;
    }
    assert_eq!(next, base + size);
}

/// Elements covered by all multi dimensional steps.
pub fn total_volume(subviews: &[MultiDimSubView]) -> u32 {
    subviews.iter().map(MultiDimSubView::volume).sum()
}
