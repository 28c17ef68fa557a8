mod common;

use common::*;
use mme_recipe::components::{
    AuxTensors, Controls, DataType, InputOperand, OperationKind, RecipeGenerator, SignalingMode,
    TensorView, WalkPattern,
};
use mme_recipe::config::{GlobalConfig, LoggerConfig, planner::RecipeLogLevel};
use pretty_assertions::assert_eq;

fn default_config() -> GlobalConfig {
    GlobalConfig::default()
}

#[test_log::test]
fn fwd_recipe_covers_the_output() {
    let workload = Workload::new(
        OperationKind::Fwd,
        [64, 32, 8, 1, 1],
        [256, 64, 3, 3, 1],
        [256, 32, 8, 1, 1],
        WalkPattern::SpReductionFck,
    );
    let constants = workload.constants();
    let mut generator = RecipeGenerator::with_config(&constants, &default_config()).unwrap();
    let recipe = generator.generate().unwrap();

    assert_eq!(recipe.reuse.operand, Some(InputOperand::A));
    assert!(recipe.raster);
    assert_covers(&recipe.fcd_subviews, 0, 256);
    assert_covers(&recipe.sp_subviews, 0, 256);
    // Every channel of every filter tap is reduced once.
    assert_eq!(total_volume(&recipe.non_spatial_subviews), 64 * 9);
    assert_eq!(recipe.partials_nr, recipe.non_spatial_subviews.len() as u32);
}

#[test_log::test]
fn fwd_partial_reuse_splits_the_filters() {
    let workload = Workload::new(
        OperationKind::Fwd,
        [64, 32, 16, 1, 1],
        [256, 64, 3, 3, 1],
        [256, 32, 16, 1, 1],
        WalkPattern::SpReductionKfc,
    );
    let constants = workload.constants();
    let mut generator = RecipeGenerator::with_config(&constants, &default_config()).unwrap();
    assert_eq!(generator.recipe().reuse.operand, Some(InputOperand::B));
    assert!(generator.is_partial_sb_reuse().unwrap());

    let recipe = generator.generate().unwrap();
    assert!(!recipe.raster);
    assert_covers(&recipe.fcd_subviews, 0, 256);
    assert_covers(&recipe.sp_subviews, 0, 512);
    assert!(recipe.non_spatial_subviews.len() > 1);
    assert_eq!(total_volume(&recipe.non_spatial_subviews), 64 * 9);
    assert_eq!(recipe.partials_nr_per_gemm.as_slice(), &[recipe.partials_nr]);
}

#[test_log::test]
fn dedw_recipe_reduces_over_the_image() {
    let workload = Workload::new(
        OperationKind::Dedw,
        [64, 16, 16, 1, 1],
        [128, 64, 3, 3, 1],
        [128, 16, 16, 1, 1],
        WalkPattern::SpReductionFck,
    );
    let constants = workload.constants();
    let mut generator = RecipeGenerator::with_config(&constants, &default_config()).unwrap();
    let recipe = generator.generate().unwrap();

    assert_covers(&recipe.fcd_subviews, 0, 128);
    // The filter grid walks the weights, the reduction walks the image.
    assert_eq!(total_volume(&recipe.non_spatial_subviews), 64 * 9);
    let reduced: u32 = recipe.sp_subviews.iter().map(|sp| sp.view_size).sum();
    assert_eq!(reduced, 16 * 16);
}

#[test_log::test]
fn batched_gemm_covers_every_batch() {
    let workload = Workload::new(
        OperationKind::Ab,
        [128, 256, 2, 1, 1],
        [256, 128, 2, 1, 1],
        [256, 256, 2, 1, 1],
        WalkPattern::SpReductionFck,
    );
    let constants = workload.constants();
    let mut generator = RecipeGenerator::with_config(&constants, &default_config()).unwrap();
    let recipe = generator.generate().unwrap();

    assert_eq!(recipe.gemm_nr, 1);
    assert_covers(&recipe.fcd_subviews, 0, 256);
    assert_covers(&recipe.sp_subviews, 0, 256);
    assert_eq!(total_volume(&recipe.non_spatial_subviews), 128 * 2);
}

#[test_log::test]
fn masked_bgemm_interleaves_both_gemms() {
    let mut workload = Workload::new(
        OperationKind::Ab,
        [128, 256, 2, 1, 1],
        [256, 128, 2, 1, 1],
        [256, 256, 2, 1, 1],
        WalkPattern::SpReductionFck,
    );
    let aux = |sizes| TensorView::dense(sizes, DataType::Bf16);
    workload.params.strategy.masked_bgemm = true;
    workload.params.aux = Some(AuxTensors::new(
        aux([64, 256, 2, 1, 1]),
        aux([256, 64, 2, 1, 1]),
        aux([256, 256, 2, 1, 1]),
    ));
    let constants = workload.constants();
    let mut generator = RecipeGenerator::with_config(&constants, &default_config()).unwrap();
    assert!(generator.is_partial_sb_reuse().unwrap());

    let recipe = generator.generate().unwrap();
    assert_eq!(recipe.gemm_nr, 2);
    assert!(recipe.masked_bgemm);
    assert_eq!(recipe.a_views.len(), 2);
    assert_eq!(recipe.partials_nr_per_gemm.len(), 2);
    assert_eq!(
        recipe.partials_nr,
        recipe.partials_nr_per_gemm.iter().sum::<u32>()
    );
    assert_eq!(
        recipe.non_spatial_subviews.len() as u32,
        recipe.partials_nr * recipe.batches()
    );
    assert_eq!(total_volume(&recipe.non_spatial_subviews), (128 + 64) * 2);
}

#[test_log::test]
fn common_dim_cut_makes_the_reduction_partial() {
    let mut workload = Workload::new(
        OperationKind::Fwd,
        [64, 32, 8, 1, 1],
        [256, 64, 3, 3, 1],
        [256, 32, 8, 1, 1],
        WalkPattern::SpReductionFck,
    );
    workload.params.cd_cut_point = 24;
    let constants = workload.constants();
    let mut generator = RecipeGenerator::with_config(&constants, &default_config()).unwrap();
    assert!(generator.is_partial_sb_reuse().unwrap());

    let recipe = generator.generate().unwrap();
    assert!(recipe.partials_nr >= 2);
    assert_eq!(total_volume(&recipe.non_spatial_subviews), 64 * 9);
}

#[test_log::test]
fn signal_amount_follows_the_storing_steps() {
    let mut workload = Workload::new(
        OperationKind::Fwd,
        [64, 32, 8, 1, 1],
        [256, 64, 3, 3, 1],
        [256, 32, 8, 1, 1],
        WalkPattern::SpReductionFck,
    );
    workload.params.controls = Controls {
        signaling_mode: SignalingMode::Amount,
        signal_amount: 7,
        ..Default::default()
    };
    let constants = workload.constants();
    let mut generator = RecipeGenerator::with_config(&constants, &default_config()).unwrap();
    let recipe = generator.generate().unwrap();

    let storing = (recipe.fcd_subviews.len() * recipe.sp_subviews.len()) as u32;
    assert_eq!(recipe.signal_amount, 7u32.div_ceil(storing));
}

#[test_log::test]
fn recipe_summary_is_written_to_the_log_file() {
    let path = std::env::temp_dir().join("mme-recipe-integration.log");
    let _ = std::fs::remove_file(&path);
    let config = GlobalConfig {
        logger: LoggerConfig {
            file: Some(path.clone()),
            append: false,
            level: RecipeLogLevel::Basic,
            ..Default::default()
        },
        ..Default::default()
    };
    let workload = Workload::new(
        OperationKind::Fwd,
        [64, 32, 8, 1, 1],
        [256, 64, 3, 3, 1],
        [256, 32, 8, 1, 1],
        WalkPattern::SpReductionFck,
    );
    let constants = workload.constants();
    let mut generator = RecipeGenerator::with_config(&constants, &config).unwrap();
    let summary = generator.generate().unwrap().debug_info(false);
    drop(generator);

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.trim_end(), summary[0]);
    assert!(content.starts_with("op=fwd, raster=true, reuse=A"));
}

#[test]
fn config_round_trips_through_toml() {
    let mut config = GlobalConfig::default();
    config.planner.second_operand_reuse = true;
    config.planner.max_batch_nr_for_sb_reuse = 4;
    config.logger.level = RecipeLogLevel::Full;

    let content = toml::to_string_pretty(&config).unwrap();
    let parsed: GlobalConfig = toml::from_str(&content).unwrap();

    assert_eq!(parsed, config);
}
