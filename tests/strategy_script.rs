use std::fs;

use tcgen::file::StrategyFile;
use tcgen::pipeline::{enabled_phases, PhaseKind};
use tcgen::transform::OpKind;
use tcgen::{build_script, check_strategy, resolve_strategy, StrategyError, StrategyRequest};

/// Helper: write a strategy file into a temp dir and resolve it.
fn resolve_file(source: &str) -> (tcgen::MatmulStrategy, StrategyFile) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("strategy.toml");
    fs::write(&path, source).expect("write strategy file");
    let file = StrategyFile::load(&path).unwrap_or_else(|d| panic!("{}", d.message));
    let strategy = resolve_strategy(&StrategyRequest {
        file: Some(&file),
        ..Default::default()
    })
    .unwrap_or_else(|d| panic!("{}", d.message));
    (strategy, file)
}

#[test]
fn test_f16_file_builds_wmma_script() {
    let (strategy, file) = resolve_file(
        r#"[strategy]
use_mma_sync = false
reduction_tile_size = 32

[problem]
m = 4096
n = 4096
k = 4096
lhs_element = "f16"
rhs_element = "f16"

[target]
name = "sm_86"
"#,
    );
    check_strategy(&strategy, Some(&file)).unwrap();
    assert!(strategy.cli_options_specified);

    let script = build_script(&strategy).unwrap();
    let tensor_core = script
        .ops
        .iter()
        .find(|op| op.kind == OpKind::ConvertToTensorCore)
        .unwrap();
    assert_eq!(tensor_core.attrs, vec![("form", "wmma".to_string())]);

    // 16-bit operands move eight elements per lane.
    let vectorize = script.ops.iter().find(|op| op.kind == OpKind::Vectorize).unwrap();
    assert!(vectorize.attrs[0].1.ends_with("x8"), "{}", vectorize);
}

#[test]
fn test_turing_target_without_async_copies() {
    let (strategy, file) = resolve_file(
        "[strategy]\nuse_async_copies = false\n\n[target]\nname = \"sm_75\"\n",
    );
    check_strategy(&strategy, Some(&file)).unwrap();
    let phases = enabled_phases(&strategy);
    assert!(!phases.contains(&PhaseKind::AsyncCopies));

    let script = build_script(&strategy).unwrap();
    assert_eq!(script.count(OpKind::ConvertToAsyncCopies), 0);
    assert_eq!(script.count(OpKind::MultiBuffer), 0);
    assert_eq!(script.count(OpKind::PipelineSharedMemoryCopies), 0);
}

#[test]
fn test_volta_rejects_default_features() {
    let (strategy, file) = resolve_file("[target]\nname = \"sm_70\"\n");
    let diags = check_strategy(&strategy, Some(&file)).unwrap_err();
    let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
    assert!(messages.contains(&"target sm_70 has no asynchronous copies"));
    assert!(messages.contains(&"target sm_70 has no synchronized mma form"));

    match build_script(&strategy) {
        Err(StrategyError::InvalidConfig(errors)) => assert_eq!(errors.len(), diags.len()),
        other => panic!("expected invalid config, got {:?}", other.map(|s| s.ops.len())),
    }
}

#[test]
fn test_unaligned_problem_hoists_and_narrows_copies() {
    let (strategy, _) = resolve_file("[problem]\nm = 1000\nn = 1002\nk = 1024\n");
    let script = build_script(&strategy).unwrap();
    assert_eq!(script.count(OpKind::HoistOutputPadding), 1);

    // n = 1002 only admits 2-wide vectors for the rhs and result copies.
    let vectorize = script.ops.iter().find(|op| op.kind == OpKind::Vectorize).unwrap();
    assert!(vectorize.attrs[1].1.ends_with("x2"), "{}", vectorize);
    assert!(vectorize.attrs[2].1.ends_with("x2"), "{}", vectorize);
}

#[test]
fn test_same_configuration_same_fingerprint() {
    let (a, _) = resolve_file("[strategy]\npipeline_depth = 2\n");
    let (b, _) = resolve_file("[strategy]\npipeline_depth = 2   # same\n");
    assert_eq!(
        build_script(&a).unwrap().fingerprint(),
        build_script(&b).unwrap().fingerprint()
    );
    let (c, _) = resolve_file("[strategy]\npipeline_depth = 4\n");
    assert_ne!(
        build_script(&a).unwrap().fingerprint(),
        build_script(&c).unwrap().fingerprint()
    );
}
