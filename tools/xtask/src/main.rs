//! # xtask - 开发辅助工具
//!
//! 提供本地质量门禁与开发辅助命令。
//!
//! ## 命令
//!
//! - `check-all`: 运行 fmt、clippy、test
//! - `cov-core`: 运行 pipeline-core 覆盖率
//! - `layout-check`: 检查输入目录布局（缺失模型、多模型、会被忽略的嵌套文件）

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use pipeline_core::{DiscoveryError, Layout, PipelineConfig, discover_animation_run, scan_folders};
use walkdir::WalkDir;
use xshell::{Shell, cmd};

fn run(step: &str, cmd: xshell::Cmd<'_>) -> anyhow::Result<()> {
    eprintln!("\n==> {step}");
    cmd.run().map_err(|e| anyhow::anyhow!("{step} failed: {e}"))
}

fn ensure_cargo_llvm_cov_available(sh: &Shell) -> anyhow::Result<()> {
    match cmd!(sh, "cargo llvm-cov --version").quiet().ignore_stdout().run() {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!(
            "cargo llvm-cov 不可用。\n\
请先安装：\n\
  - cargo install cargo-llvm-cov\n\
  - rustup component add llvm-tools-preview\n\
然后重试。"
        ),
    }
}

fn main() -> ExitCode {
    if let Err(e) = real_main() {
        eprintln!("xtask error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::from(0)
}

fn real_main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let sub = args.next().unwrap_or_else(|| "help".to_string());
    let sh = Shell::new()?;

    match sub.as_str() {
        "check-all" => {
            run("cargo fmt --all -- --check", cmd!(sh, "cargo fmt --all -- --check"))?;
            run(
                "cargo clippy --workspace --all-targets",
                cmd!(sh, "cargo clippy --workspace --all-targets"),
            )?;
            run("cargo test --workspace", cmd!(sh, "cargo test --workspace"))?;
        }
        "cov-core" => {
            ensure_cargo_llvm_cov_available(&sh)?;
            run(
                "cargo llvm-cov -p pipeline-core --html",
                cmd!(sh, "cargo llvm-cov -p pipeline-core --html"),
            )?;

            eprintln!("\nCoverage HTML: target/llvm-cov/html/index.html");
        }
        "layout-check" => {
            let input = args.next().map(PathBuf::from);
            let anim_input = args.next().map(PathBuf::from);
            layout_check(input, anim_input)?;
        }
        "help" | "-h" | "--help" => {
            print_help();
        }
        other => anyhow::bail!("unknown xtask subcommand: {other}"),
    }

    Ok(())
}

fn print_help() {
    eprintln!(
        r#"xtask - 开发辅助工具

USAGE:
  cargo xtask <command>

COMMANDS:
  check-all       运行 fmt、clippy、test 门禁检查
  cov-core        运行 pipeline-core 覆盖率报告
  layout-check    检查输入目录布局

LAYOUT-CHECK:
  cargo xtask layout-check [input] [anim_input]

  不带参数：读取 pipeline.json（不存在时使用默认的 fbx/ 与 fbxAnimation/）
  带路径参数：检查指定目录

  检查内容：
    - 没有模型文件的资源文件夹
    - 有多个模型文件的资源文件夹（只会使用字典序第一个）
    - 层级过深、转换时会被忽略的模型文件
    - 动画目录中的基础角色和动画文件

ALIASES (in .cargo/config.toml):
  cargo check-all     -> cargo xtask check-all
  cargo cov-core      -> cargo xtask cov-core
  cargo layout-check  -> cargo xtask layout-check
"#
    );
}

//=============================================================================
// layout-check 命令实现
//=============================================================================

/// 布局检查结果
#[derive(Default)]
struct LayoutCheckResult {
    /// 检查的资源文件夹数量
    folders_checked: usize,
    /// 可转换的资源数量
    convertible: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn layout_check(input: Option<PathBuf>, anim_input: Option<PathBuf>) -> anyhow::Result<()> {
    let config = PipelineConfig::load("pipeline.json")?;
    let input = input.unwrap_or_else(|| config.input_dir.clone());
    let anim_input = anim_input.unwrap_or_else(|| config.anim_input_dir.clone());

    let mut result = LayoutCheckResult::default();

    eprintln!("==> 检查资源目录 {}...\n", input.display());
    check_asset_root(&input, &config.layout, &mut result);

    if anim_input.exists() {
        eprintln!("==> 检查动画目录 {}...\n", anim_input.display());
        check_animation_root(&anim_input, &config.base_character, &config.layout, &mut result);
    } else {
        result
            .warnings
            .push(format!("动画目录不存在: {}", anim_input.display()));
    }

    print_check_result(&result);

    if !result.errors.is_empty() {
        anyhow::bail!("布局检查发现错误");
    }
    Ok(())
}

fn check_asset_root(root: &Path, layout: &Layout, result: &mut LayoutCheckResult) {
    let folders = match scan_folders(root, layout) {
        Ok(folders) => folders,
        Err(e) => {
            result.errors.push(e.to_string());
            return;
        }
    };

    for folder in &folders {
        result.folders_checked += 1;
        match folder.model_files.len() {
            0 => result
                .warnings
                .push(format!("{}: 没有模型文件，不会被转换", folder.name)),
            1 => result.convertible += 1,
            n => {
                result.convertible += 1;
                result.warnings.push(format!(
                    "{}: 有 {n} 个模型文件，只会使用 {}",
                    folder.name,
                    file_name(&folder.model_files[0])
                ));
            }
        }
    }

    if result.convertible == 0 {
        result
            .errors
            .push(format!("{} 中没有可转换的资源", root.display()));
    }

    // 根目录下的模型文件和更深层的模型文件都不参与转换
    for path in ignored_models(root, layout, 2) {
        result.warnings.push(format!(
            "{}: 不在 <资源文件夹>/ 的直接子级，会被忽略",
            path.display()
        ));
    }
}

fn check_animation_root(
    root: &Path,
    base_character: &str,
    layout: &Layout,
    result: &mut LayoutCheckResult,
) {
    match discover_animation_run(root, base_character, layout) {
        Ok(run) => {
            eprintln!("基础角色: {}", run.base.path.display());
            for source in &run.sources {
                eprintln!("  - {} → {}", file_name(&source.path), source.clip_name);
            }
            eprintln!();
        }
        Err(DiscoveryError::BaseCharacterMissing { path, candidates }) => {
            result.errors.push(format!(
                "基础角色不存在: {}（可用: {}）",
                path.display(),
                candidates.join(", ")
            ));
        }
        Err(e) => result.errors.push(e.to_string()),
    }

    for path in ignored_models(root, layout, 1) {
        result
            .warnings
            .push(format!("{}: 动画文件位于子目录中，会被忽略", path.display()));
    }
}

/// 深度不等于 `depth` 的模型文件
fn ignored_models(root: &Path, layout: &Layout, depth: usize) -> Vec<PathBuf> {
    let mut ignored: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.depth() != depth)
        .map(|e| e.into_path())
        .filter(|p| layout.is_model(p))
        .collect();
    ignored.sort();
    ignored
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 输出检查结果
fn print_check_result(result: &LayoutCheckResult) {
    eprintln!("─────────────────────────────────────────────────────");
    eprintln!(
        "检查完成: {} 个资源文件夹，{} 个可转换",
        result.folders_checked, result.convertible
    );
    eprintln!();

    for error in &result.errors {
        eprintln!("[ERROR] {error}");
    }
    for warning in &result.warnings {
        eprintln!("[WARN] {warning}");
    }

    let error_count = result.errors.len();
    let warn_count = result.warnings.len();

    eprintln!();
    if error_count > 0 {
        eprintln!("❌ {} 个错误, {} 个警告", error_count, warn_count);
    } else if warn_count > 0 {
        eprintln!("⚠️  0 个错误, {} 个警告", warn_count);
    } else {
        eprintln!("✅ 检查通过，无错误");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_ignored_models_by_depth() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("stray.fbx"));
        touch(&root.path().join("hero/hero.fbx"));
        touch(&root.path().join("hero/old/hero_v1.fbx"));
        touch(&root.path().join("hero/skin.png"));

        let ignored = ignored_models(root.path(), &Layout::default(), 2);
        assert_eq!(
            ignored,
            vec![
                root.path().join("hero/old/hero_v1.fbx"),
                root.path().join("stray.fbx"),
            ]
        );
    }

    #[test]
    fn test_asset_root_findings() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("hero/a.fbx"));
        touch(&root.path().join("hero/b.fbx"));
        fs::create_dir_all(root.path().join("empty")).unwrap();

        let mut result = LayoutCheckResult::default();
        check_asset_root(root.path(), &Layout::default(), &mut result);

        assert_eq!(result.folders_checked, 2);
        assert_eq!(result.convertible, 1);
        assert!(result.errors.is_empty());
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[1].contains("a.fbx"));
    }

    #[test]
    fn test_missing_base_character_is_error() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("walk.fbx"));

        let mut result = LayoutCheckResult::default();
        check_animation_root(root.path(), "Ch20_nonPBR.fbx", &Layout::default(), &mut result);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("walk.fbx"));
    }
}
