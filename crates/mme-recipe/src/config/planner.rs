use super::logger::LogLevel;

/// Knobs of the recipe planner.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PlannerConfig {
    /// Whether an input may be kept resident in the suspension buffer.
    #[serde(default = "enabled")]
    pub sb_reuse: bool,
    /// Whether grids are widened to the pipeline depth requested by the strategy.
    #[serde(default = "enabled")]
    pub pipeline_level_hint: bool,
    /// Whether the second input may also be kept resident.
    #[serde(default)]
    pub second_operand_reuse: bool,
    /// Batched gemms with more batches than this never reuse, unless masked.
    #[serde(default = "max_batch_nr_default")]
    pub max_batch_nr_for_sb_reuse: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            sb_reuse: true,
            pipeline_level_hint: true,
            second_operand_reuse: false,
            max_batch_nr_for_sb_reuse: max_batch_nr_default(),
        }
    }
}

fn enabled() -> bool {
    true
}

fn max_batch_nr_default() -> u32 {
    16
}

/// Verbosity of the recipe logs.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RecipeLogLevel {
    /// Nothing is logged.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,
    /// One summary line per recipe.
    #[serde(rename = "basic")]
    Basic,
    /// The summary followed by every sub-view.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for RecipeLogLevel {}
