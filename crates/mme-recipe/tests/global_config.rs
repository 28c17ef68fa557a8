mod common;

use common::*;
use mme_recipe::components::{OperationKind, RecipeGenerator, WalkPattern};
use mme_recipe::config::{GlobalConfig, planner::PlannerConfig};

// The only test of this binary, the global config is set once per process.
#[test]
fn generator_reads_the_global_config() {
    GlobalConfig::set(GlobalConfig {
        planner: PlannerConfig {
            sb_reuse: false,
            ..Default::default()
        },
        ..Default::default()
    });

    let workload = Workload::new(
        OperationKind::Fwd,
        [64, 32, 8, 1, 1],
        [256, 64, 3, 3, 1],
        [256, 32, 8, 1, 1],
        WalkPattern::SpReductionFck,
    );
    let constants = workload.constants();
    let mut generator = RecipeGenerator::new(&constants).unwrap();

    assert_eq!(generator.recipe().reuse.operand, None);
    assert_eq!(generator.sp_geo_per_reuse(), u32::MAX);
    let recipe = generator.generate().unwrap();
    assert_eq!(recipe.fcd_subviews.len(), 1);
    assert_eq!(recipe.sp_subviews.len(), 1);
}
