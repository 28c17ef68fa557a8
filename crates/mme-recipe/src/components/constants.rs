use super::{GeometryAttributes, HardwareCaps, LayerParams};
use crate::RecipeResult;

/// Read-only inputs shared by every planning component of one workload.
#[derive(Debug, Clone, Copy)]
pub struct RecipeConstants<'a> {
    /// Workload parameters.
    pub params: &'a LayerParams,
    /// Selected geometry.
    pub geometry: &'a GeometryAttributes,
    /// Hardware capabilities.
    pub hardware: &'a HardwareCaps,
}

impl<'a> RecipeConstants<'a> {
    /// Bundles the inputs after checking each of them.
    pub fn new(
        params: &'a LayerParams,
        geometry: &'a GeometryAttributes,
        hardware: &'a HardwareCaps,
    ) -> RecipeResult<Self> {
        params.validate()?;
        geometry.validate()?;
        hardware.validate()?;

        Ok(Self {
            params,
            geometry,
            hardware,
        })
    }
}
