use derive_more::derive::Display;
use serde::{Deserialize, Serialize};

/// Number of dimensions every tensor view carries.
pub const MAX_TENSOR_DIMS: usize = 5;

/// Number of trailing batch dimensions of GEMM operands.
pub const BATCH_DIMS_NR: usize = 3;

/// First batch dimension of GEMM operands.
pub const GEMM_DIM_B1: usize = MAX_TENSOR_DIMS - BATCH_DIMS_NR;

/// One extent (or offset) per tensor dimension, dimension 0 being the fastest changing.
pub type SizeArray = [u32; MAX_TENSOR_DIMS];

/// Builds a [SizeArray] with `first` at dimension 0 and `fill` everywhere else.
pub fn size_array(first: u32, fill: u32) -> SizeArray {
    let mut sizes = [fill; MAX_TENSOR_DIMS];
    sizes[0] = first;
    sizes
}

/// Product of the given extents.
pub fn product(sizes: &[u32]) -> u32 {
    sizes.iter().product()
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit float.
    #[display("fp32")]
    Fp32,
    /// 16-bit brain float.
    #[display("bf16")]
    Bf16,
    /// 16-bit IEEE float.
    #[display("fp16")]
    Fp16,
    /// 8-bit float with 4 exponent bits.
    #[display("fp8_143")]
    Fp8E4M3,
    /// 8-bit float with 5 exponent bits.
    #[display("fp8_152")]
    Fp8E5M2,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> u32 {
        match self {
            DataType::Fp32 => 4,
            DataType::Bf16 | DataType::Fp16 => 2,
            DataType::Fp8E4M3 | DataType::Fp8E5M2 => 1,
        }
    }

    /// Whether the type is one of the 8-bit floats.
    pub fn is_fp8(&self) -> bool {
        matches!(self, DataType::Fp8E4M3 | DataType::Fp8E5M2)
    }
}

/// A strided window over a tensor.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorView {
    /// Offset of the window in every dimension.
    pub bases: SizeArray,
    /// Extent of the window in every dimension.
    pub sizes: SizeArray,
    /// Stride of every dimension, in elements.
    pub strides: SizeArray,
    /// Element type.
    pub data_type: DataType,
}

impl TensorView {
    /// A dense view starting at the origin.
    pub fn dense(sizes: SizeArray, data_type: DataType) -> Self {
        let mut strides = [1; MAX_TENSOR_DIMS];
        for dim in 1..MAX_TENSOR_DIMS {
            strides[dim] = strides[dim - 1] * sizes[dim - 1].max(1);
        }

        Self {
            bases: [0; MAX_TENSOR_DIMS],
            sizes,
            strides,
            data_type,
        }
    }

    /// Number of batches, the product of the trailing batch dimensions.
    pub fn batches(&self) -> u32 {
        product(&self.sizes[GEMM_DIM_B1..])
    }
}

/// The two inputs of the multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum InputOperand {
    /// Left-hand side.
    A,
    /// Right-hand side.
    B,
}

impl InputOperand {
    /// The operand that is not `self`.
    pub fn other(&self) -> Self {
        match self {
            InputOperand::A => InputOperand::B,
            InputOperand::B => InputOperand::A,
        }
    }
}

/// The operands as the accelerator sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum InternalOperand {
    /// Left-hand side.
    A,
    /// Right-hand side.
    B,
    /// Output.
    C,
}

impl InternalOperand {
    /// Position of the operand in per-operand arrays.
    pub fn index(&self) -> usize {
        match self {
            InternalOperand::A => 0,
            InternalOperand::B => 1,
            InternalOperand::C => 2,
        }
    }
}

impl From<InputOperand> for InternalOperand {
    fn from(value: InputOperand) -> Self {
        match value {
            InputOperand::A => InternalOperand::A,
            InputOperand::B => InternalOperand::B,
        }
    }
}
