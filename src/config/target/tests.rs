use super::*;

#[test]
fn test_sm80_defaults() {
    let target = GpuTarget::sm80();
    assert_eq!(target.name, "sm_80");
    assert_eq!(target.warp_size, 32);
    assert!(target.async_copy);
    assert!(target.mma_sync);
    assert_eq!(target.max_threads_per_block, 1024);
    assert_eq!(GpuTarget::default(), target);
}

#[test]
fn test_resolve_builtins() {
    for name in BUILTIN_TARGETS {
        let target = GpuTarget::resolve(name).unwrap();
        assert_eq!(&target.name, name);
        assert_eq!(target.warp_size, 32);
    }
    assert!(!GpuTarget::resolve("sm_75").unwrap().async_copy);
    assert!(!GpuTarget::resolve("sm_70").unwrap().mma_sync);
}

#[test]
fn test_resolve_rejects_path_traversal() {
    assert!(GpuTarget::resolve("../etc/passwd").is_err());
    assert!(GpuTarget::resolve("./sneaky").is_err());
    assert!(GpuTarget::resolve("foo/bar").is_err());
    assert!(GpuTarget::resolve(".hidden").is_err());
}

#[test]
fn test_resolve_unknown_lists_builtins() {
    let err = GpuTarget::resolve("gfx942").unwrap_err();
    assert!(err.message.contains("unknown target 'gfx942'"));
    assert!(err.help.unwrap().contains("sm_80"));
}

#[test]
fn test_mma_shapes() {
    let target = GpuTarget::sm80();
    assert_eq!(target.mma_shape(true, ElementType::F16), MmaShape::new(16, 8, 16));
    assert_eq!(target.mma_shape(true, ElementType::F32), MmaShape::new(16, 8, 8));
    assert_eq!(target.mma_shape(false, ElementType::F16), MmaShape::new(16, 16, 16));
    assert_eq!(target.mma_shape(false, ElementType::I8), MmaShape::new(16, 16, 32));
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wave.toml");
    std::fs::write(
        &path,
        r#"
# hypothetical 64-lane part
[target]
name = "wave64"
display_name = "Wave64 GPU"
warp_size = 64
async_copy = false
max_threads_per_block = 256
"#,
    )
    .unwrap();

    let target = GpuTarget::load(&path).unwrap();
    assert_eq!(target.name, "wave64");
    assert_eq!(target.display_name, "Wave64 GPU");
    assert_eq!(target.warp_size, 64);
    assert!(!target.async_copy);
    assert!(target.mma_sync);
    assert_eq!(target.max_threads_per_block, 256);
}

#[test]
fn test_load_rejects_bad_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[target]\nname = \"bad\"\nwarp_size = lots\n").unwrap();
    let err = GpuTarget::load(&path).unwrap_err();
    assert!(err.message.contains("invalid target.warp_size"));

    std::fs::write(&path, "[target]\nwarp_size = 32\n").unwrap();
    let err = GpuTarget::load(&path).unwrap_err();
    assert!(err.message.contains("missing target.name"));
}
