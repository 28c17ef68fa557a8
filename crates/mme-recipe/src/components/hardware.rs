use derive_more::derive::Display;
use serde::{Deserialize, Serialize};

use super::tensor::{BATCH_DIMS_NR, DataType, GEMM_DIM_B1, InternalOperand, MAX_TENSOR_DIMS};
use crate::{RecipeError, RecipeResult, error::ensure_config};

/// Capabilities of the accelerator the recipe targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCaps {
    /// Cache line size of the engine's read path, in bytes.
    #[serde(default = "default_cl_size")]
    pub cl_size: u32,
    /// Cache line size of the memory subsystem, in bytes.
    #[serde(default = "default_cl_size")]
    pub memory_cl_size: u32,
    /// Suspension buffer capacity of one port, in cache lines.
    #[serde(default = "default_sb_size_in_cls")]
    pub sb_size_in_cls: u32,
    /// Number of accumulators available for partial sums.
    #[serde(default = "default_accums_nr")]
    pub accums_nr: u32,
    /// Maximum number of steps a resident operand may be replayed.
    #[serde(default = "default_max_sb_reuse")]
    pub max_sb_reuse: u32,
    /// Common dim alignment required by 8-bit types, in elements.
    #[serde(default = "default_fp8_alignment")]
    pub fp8_common_dim_alignment: u32,
    /// Maximum tensor rank the engine addresses.
    #[serde(default = "default_max_tensor_dims")]
    pub max_tensor_dims: u32,
}

fn default_cl_size() -> u32 {
    128
}

fn default_sb_size_in_cls() -> u32 {
    64
}

fn default_accums_nr() -> u32 {
    4
}

fn default_max_sb_reuse() -> u32 {
    16
}

fn default_fp8_alignment() -> u32 {
    1
}

fn default_max_tensor_dims() -> u32 {
    MAX_TENSOR_DIMS as u32
}

impl Default for HardwareCaps {
    fn default() -> Self {
        Self {
            cl_size: default_cl_size(),
            memory_cl_size: default_cl_size(),
            sb_size_in_cls: default_sb_size_in_cls(),
            accums_nr: default_accums_nr(),
            max_sb_reuse: default_max_sb_reuse(),
            fp8_common_dim_alignment: default_fp8_alignment(),
            max_tensor_dims: default_max_tensor_dims(),
        }
    }
}

impl HardwareCaps {
    /// Number of common dim elements the reduction tree consumes at once for a data type.
    pub fn common_dim_alignment(&self, data_type: DataType) -> u32 {
        if data_type.is_fp8() {
            self.fp8_common_dim_alignment
        } else {
            1
        }
    }

    /// Checks the description can be planned for.
    pub fn validate(&self) -> RecipeResult<()> {
        ensure_config(self.cl_size != 0, "Cache line size must not be zero")?;
        ensure_config(
            self.memory_cl_size >= self.cl_size,
            "Memory cache line must be at least the engine cache line",
        )?;
        if self.sb_size_in_cls == 0 {
            return Err(RecipeError::SbTooSmall { sb_elements: 0 });
        }
        ensure_config(self.accums_nr != 0, "At least one accumulator is required")?;
        ensure_config(self.max_sb_reuse != 0, "Maximum SB reuse must not be zero")?;
        ensure_config(
            self.fp8_common_dim_alignment != 0,
            "Common dim alignment must not be zero",
        )?;
        ensure_config(
            self.max_tensor_dims as usize == MAX_TENSOR_DIMS,
            "The engine must address five dimensional tensors",
        )?;

        Ok(())
    }
}

/// Arrangement of execution units in a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum GeometryLayout {
    /// Two units stacked along the spatial axis.
    #[display("2xh")]
    TwoHigh,
    /// Two units side by side along the fast axis.
    #[display("2xw")]
    TwoWide,
    /// Four units stacked along the spatial axis.
    #[display("4xh")]
    FourHigh,
    /// Four units side by side along the fast axis.
    #[display("4xw")]
    FourWide,
}

impl GeometryLayout {
    /// Number of execution units along (fast, spatial).
    pub fn units(&self) -> (u32, u32) {
        match self {
            GeometryLayout::TwoHigh => (1, 2),
            GeometryLayout::TwoWide => (2, 1),
            GeometryLayout::FourHigh => (1, 4),
            GeometryLayout::FourWide => (4, 1),
        }
    }
}

/// Attributes of the selected geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryAttributes {
    /// Unit arrangement.
    pub layout: GeometryLayout,
    /// Output elements produced along the fast dimension per step.
    pub width: u32,
    /// Output elements produced along the spatial dimension per step.
    pub height: u32,
    /// Port size per operand, in elements.
    pub port_size: [u32; 3],
    /// Size of the port side facing the execution unit, per operand.
    pub eu_facing_port_size: [u32; 3],
    /// Ports of one core interleaving on the common dim, per operand.
    pub core_spatial_eu_ports: [u32; 3],
    /// Ports interleaved on the first spatial dim, per operand.
    pub interleaved_spatial_ports: [u32; 3],
    /// Dimension the spatial ports interleave on, per operand.
    pub sp_interleaving_dim: [usize; 3],
    /// Cores interleaving on the common dim.
    pub cd_concurrency: u32,
    /// Batch dimension processed concurrently.
    pub concurrent_dim: usize,
    /// Number of batches processed concurrently.
    pub concurrency: u32,
    /// Number of gemms executed concurrently by one core.
    pub core_concurrency: u32,
    /// Whether each accumulator is doubled.
    pub double_accums: bool,
    /// Whether throughput is bound by the input ports.
    pub port_constrained: bool,
}

impl GeometryAttributes {
    /// Attributes of a geometry built from units of `eu_width` by `eu_height` output elements.
    pub fn from_layout(layout: GeometryLayout, eu_width: u32, eu_height: u32) -> Self {
        let (wide, high) = layout.units();

        Self {
            layout,
            width: eu_width * wide,
            height: eu_height * high,
            port_size: [eu_height, eu_width, eu_width],
            eu_facing_port_size: [eu_height, eu_width, eu_width],
            core_spatial_eu_ports: [1; 3],
            interleaved_spatial_ports: [1; 3],
            sp_interleaving_dim: [1; 3],
            cd_concurrency: 1,
            concurrent_dim: GEMM_DIM_B1,
            concurrency: 1,
            core_concurrency: 1,
            double_accums: false,
            port_constrained: false,
        }
    }

    /// Port size of an operand.
    pub fn port_size(&self, operand: InternalOperand) -> u32 {
        self.port_size[operand.index()]
    }

    /// Execution-unit facing port size of an operand.
    pub fn eu_facing_port_size(&self, operand: InternalOperand) -> u32 {
        self.eu_facing_port_size[operand.index()]
    }

    /// Ports of one core interleaving on the common dim.
    pub fn core_spatial_eu_ports(&self, operand: InternalOperand) -> u32 {
        self.core_spatial_eu_ports[operand.index()]
    }

    /// Ports interleaved on the first spatial dimension.
    pub fn interleaved_spatial_ports(&self, operand: InternalOperand) -> u32 {
        self.interleaved_spatial_ports[operand.index()]
    }

    /// Dimension the spatial ports interleave on.
    pub fn sp_interleaving_dim(&self, operand: InternalOperand) -> usize {
        self.sp_interleaving_dim[operand.index()]
    }

    /// Whether several batches are processed concurrently.
    pub fn supports_concurrency(&self) -> bool {
        self.concurrency > 1
    }

    /// Checks the attributes can be planned for.
    pub fn validate(&self) -> RecipeResult<()> {
        ensure_config(
            self.width != 0 && self.height != 0,
            "Geometry must not be empty",
        )?;
        for operand in [InternalOperand::A, InternalOperand::B, InternalOperand::C] {
            ensure_config(
                self.port_size(operand) != 0
                    && self.eu_facing_port_size(operand) != 0
                    && self.core_spatial_eu_ports(operand) != 0
                    && self.interleaved_spatial_ports(operand) != 0,
                "Port attributes must not be zero",
            )?;
            let dim = self.sp_interleaving_dim(operand);
            if dim >= MAX_TENSOR_DIMS {
                return Err(RecipeError::SplitDimOutOfRange {
                    dim,
                    max: MAX_TENSOR_DIMS,
                });
            }
        }
        if !(GEMM_DIM_B1..GEMM_DIM_B1 + BATCH_DIMS_NR).contains(&self.concurrent_dim) {
            return Err(RecipeError::SplitDimOutOfRange {
                dim: self.concurrent_dim,
                max: MAX_TENSOR_DIMS,
            });
        }
        ensure_config(
            self.cd_concurrency != 0 && self.concurrency != 0 && self.core_concurrency != 0,
            "Concurrency factors must not be zero",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_scales_the_unit() {
        let geo = GeometryAttributes::from_layout(GeometryLayout::FourWide, 128, 64);
        assert_eq!((geo.width, geo.height), (512, 64));

        let geo = GeometryAttributes::from_layout(GeometryLayout::TwoHigh, 128, 64);
        assert_eq!((geo.width, geo.height), (128, 128));
        assert!(geo.validate().is_ok());
    }

    #[test]
    fn caps_reject_empty_sb() {
        let caps = HardwareCaps {
            sb_size_in_cls: 0,
            ..Default::default()
        };
        assert_eq!(
            caps.validate(),
            Err(RecipeError::SbTooSmall { sb_elements: 0 })
        );
    }

    #[test]
    fn caps_load_from_toml_with_defaults() {
        let caps: HardwareCaps = toml::from_str("sb_size_in_cls = 32\naccums_nr = 8").unwrap();
        assert_eq!(caps.sb_size_in_cls, 32);
        assert_eq!(caps.accums_nr, 8);
        assert_eq!(caps.cl_size, 128);
        assert_eq!(caps.common_dim_alignment(DataType::Bf16), 1);
    }
}
