//! # 发现阶段集成测试
//!
//! 在临时目录中构造输入树，验证任务列表的确定性和排除规则。

use std::fs;
use std::path::Path;

use pipeline_core::{
    DiscoveryError, Layout, discover, discover_animation_run, scan_folders, select,
};
use tempfile::TempDir;

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"").unwrap();
}

/// 构造一个典型的输入树
fn asset_tree() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let r = root.path();
    touch(&r.join("zombie/zombie.fbx"));
    touch(&r.join("zombie/zombie_diffuse.png"));
    touch(&r.join("female_casual/model.FBX"));
    touch(&r.join("female_casual/skin.jpg"));
    touch(&r.join("male_casual/b_model.fbx"));
    touch(&r.join("male_casual/a_model.fbx"));
    touch(&r.join("male_casual/notes.txt"));
    fs::create_dir_all(r.join("empty_folder")).unwrap();
    touch(&r.join("stray.fbx"));
    root
}

#[test]
fn test_discovery_is_deterministic() {
    let root = asset_tree();
    let out = tempfile::tempdir().unwrap();
    let layout = Layout::default();

    let first = discover(root.path(), out.path(), &layout).unwrap();
    let second = discover(root.path(), out.path(), &layout).unwrap();
    assert_eq!(first, second);

    let names: Vec<_> = first.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["female_casual", "male_casual", "zombie"]);
}

#[test]
fn test_units_match_folders_with_models() {
    let root = asset_tree();
    let out = tempfile::tempdir().unwrap();
    let units = discover(root.path(), out.path(), &Layout::default()).unwrap();

    // empty_folder 被排除，根目录下的散落文件被忽略
    assert_eq!(units.len(), 3);

    let male = &units[1];
    assert_eq!(male.model_source_path, root.path().join("male_casual/a_model.fbx"));
    assert!(male.auxiliary_files.is_empty());
    assert_eq!(male.output_path, out.path().join("male_casual.glb"));

    let female = &units[0];
    assert_eq!(female.auxiliary_files, vec![root.path().join("female_casual/skin.jpg")]);
}

#[test]
fn test_scan_includes_empty_folders() {
    let root = asset_tree();
    let folders = scan_folders(root.path(), &Layout::default()).unwrap();

    let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["empty_folder", "female_casual", "male_casual", "zombie"]);
    assert!(folders[0].model_files.is_empty());
    assert_eq!(folders[2].model_files.len(), 2);
}

#[test]
fn test_missing_root() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("nope");
    let err = discover(&missing, root.path(), &Layout::default()).unwrap_err();
    assert_eq!(err, DiscoveryError::InputRootMissing { path: missing });
}

#[test]
fn test_root_without_units() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("only_textures")).unwrap();
    touch(&root.path().join("only_textures/a.png"));

    let err = discover(root.path(), root.path(), &Layout::default()).unwrap_err();
    assert!(matches!(err, DiscoveryError::NoAssetUnitsFound { .. }));
}

#[test]
fn test_filter_by_absent_name_excludes_only_that_name() {
    let root = asset_tree();
    let out = tempfile::tempdir().unwrap();
    let units = discover(root.path(), out.path(), &Layout::default()).unwrap();

    let requested = vec!["zombie".to_string(), "ghost".to_string()];
    let selection = select(units, &requested);
    assert_eq!(selection.units.len(), 1);
    assert_eq!(selection.units[0].name, "zombie");
    assert_eq!(selection.unknown, vec!["ghost".to_string()]);
}

#[test]
fn test_custom_layout_extensions() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("prop/crate.obj"));
    touch(&root.path().join("prop/crate.tga"));

    let layout = Layout {
        model_extensions: vec!["obj".to_string()],
        texture_extensions: vec!["tga".to_string()],
    };
    let units = discover(root.path(), root.path(), &layout).unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].auxiliary_files.len(), 1);
}

fn animation_tree() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let r = root.path();
    touch(&r.join("Ch20_nonPBR.fbx"));
    touch(&r.join("walk.fbx"));
    touch(&r.join("Idle.FBX"));
    touch(&r.join("readme.md"));
    touch(&r.join("nested/jump.fbx"));
    root
}

#[test]
fn test_animation_run() {
    let root = animation_tree();
    let run = discover_animation_run(root.path(), "Ch20_nonPBR.fbx", &Layout::default()).unwrap();

    assert_eq!(run.base.path, root.path().join("Ch20_nonPBR.fbx"));
    assert_eq!(run.base.display_name, "Ch20_nonPBR");

    let clips: Vec<_> = run.sources.iter().map(|s| s.clip_name.as_str()).collect();
    assert_eq!(clips, vec!["Idle", "walk"]);
    assert_eq!(run.input_paths().count(), 3);
}

#[test]
fn test_base_name_matches_case_insensitively() {
    let root = animation_tree();
    let run = discover_animation_run(root.path(), "ch20_nonpbr.FBX", &Layout::default()).unwrap();

    assert_eq!(run.base.path, root.path().join("Ch20_nonPBR.fbx"));
    assert_eq!(run.base.display_name, "Ch20_nonPBR");
    let clips: Vec<_> = run.sources.iter().map(|s| s.clip_name.as_str()).collect();
    assert_eq!(clips, vec!["Idle", "walk"]);
}

#[test]
fn test_missing_base_lists_candidates() {
    let root = animation_tree();
    let err = discover_animation_run(root.path(), "Hero.fbx", &Layout::default()).unwrap_err();

    match err {
        DiscoveryError::BaseCharacterMissing { path, candidates } => {
            assert_eq!(path, root.path().join("Hero.fbx"));
            assert_eq!(candidates, vec!["Ch20_nonPBR.fbx", "Idle.FBX", "walk.fbx"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_base_only_has_no_sources() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("Ch20_nonPBR.fbx"));

    let err =
        discover_animation_run(root.path(), "Ch20_nonPBR.fbx", &Layout::default()).unwrap_err();
    assert!(matches!(err, DiscoveryError::NoAnimationSources { .. }));
}

#[test]
fn test_missing_animation_root() {
    let root = tempfile::tempdir().unwrap();
    let err = discover_animation_run(&root.path().join("fbxAnimation"), "Ch20_nonPBR.fbx", &Layout::default())
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::InputRootMissing { .. }));
}
