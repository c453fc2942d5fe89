//! # Asset Pipeline
//!
//! 3D 资源管线 - 把 FBX 资源转换为 GLB，并把多个动画合并到同一个角色上。
//!
//! ## 用法
//!
//! ```bash
//! # 在项目根目录使用 cargo 运行
//! cargo run -p asset-pipeline -- list
//! cargo run -p asset-pipeline -- convert
//! cargo run -p asset-pipeline -- convert male_casual female_casual --verbose
//! cargo run -p asset-pipeline -- combine --base-character Ch20_nonPBR.fbx
//!
//! # 或安装后直接使用
//! cargo install --path tools/asset-pipeline
//! asset-pipeline convert --jobs 4 --blender /opt/blender/blender
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pipeline_core::{
    DiscoveryError, Invoker, PipelineConfig, PipelineError, SkipReason, aggregate,
    combine_animations, convert_all, discover, discover_animation_run, package_path, probe,
    scan_folders, select,
};
use tracing::Level;

#[derive(Parser)]
#[command(name = "asset-pipeline")]
#[command(about = "3D 资源管线 - 将 FBX 转换为 GLB 并合并动画")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件（默认：pipeline.json）
    #[arg(long, default_value = "pipeline.json", global = true)]
    config: PathBuf,

    /// 资源输入目录（默认：fbx）
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// 动画输入目录（默认：fbxAnimation）
    #[arg(long, global = true)]
    anim_input: Option<PathBuf>,

    /// 输出目录（默认：glb）
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Blender 可执行文件
    #[arg(long, global = true)]
    blender: Option<PathBuf>,

    /// 单次调用超时（秒）
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    /// 并发调用数
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// 显示命令行和外部工具的原始输出
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出输入目录中的资源及转换状态
    List,

    /// 转换资源（不指定名字时转换全部）
    Convert {
        /// 资源文件夹名
        names: Vec<String>,
    },

    /// 把动画合并到基础角色上
    Combine {
        /// 基础角色文件名（位于动画输入目录下）
        #[arg(long)]
        base_character: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            if let Some(hint) = remediation(&e) {
                eprintln!();
                eprintln!("💡 {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::List => list_assets(&config),
        Commands::Convert { names } => convert_assets(&config, &names).await,
        Commands::Combine { base_character } => {
            let base = base_character.unwrap_or_else(|| config.base_character.clone());
            combine(&config, &base).await
        }
    }
}

/// 配置优先级：命令行 > 配置文件 > 默认值
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(&cli.config)?;

    if let Some(input) = &cli.input {
        config.input_dir = input.clone();
    }
    if let Some(anim_input) = &cli.anim_input {
        config.anim_input_dir = anim_input.clone();
    }
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Some(blender) = &cli.blender {
        config.tool.program = blender.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.tool.run_timeout_secs = timeout;
    }
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }

    config.validate()?;
    config.resolve_paths()?;
    Ok(config)
}

fn list_assets(config: &PipelineConfig) -> Result<ExitCode> {
    let folders = scan_folders(&config.input_dir, &config.layout)?;
    if folders.is_empty() {
        println!("⚠️  {} 中没有资源文件夹", config.input_dir.display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("📋 可用资源: {}", config.input_dir.display());
    println!();
    for (i, folder) in folders.iter().enumerate() {
        let status = if folder.model_files.is_empty() {
            "⚠️  没有模型文件"
        } else if package_path(&config.output_dir, &folder.name).exists() {
            "✅ GLB 已存在"
        } else {
            "⬜ 尚未转换"
        };

        println!("  {:2}. {}", i + 1, folder.name);
        println!("      模型: {}", folder.model_files.len());
        println!("      贴图: {}", folder.texture_files.len());
        println!("      状态: {status}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn convert_assets(config: &PipelineConfig, names: &[String]) -> Result<ExitCode> {
    let tool = config.tool_spec();
    let version = probe(&tool).await?;
    println!("🔧 {version}");

    let units = discover(&config.input_dir, &config.output_dir, &config.layout)?;
    let selection = select(units, names);
    for name in &selection.unknown {
        println!("⚠️  资源 '{name}' 不存在，已忽略");
    }
    if selection.units.is_empty() {
        bail!("没有可转换的资源");
    }

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("无法创建输出目录 {}", config.output_dir.display()))?;

    println!("📦 转换 {} 个资源...", selection.units.len());
    let invoker = Invoker::new(tool);
    let jobs = convert_all(&invoker, selection.units, &config.options(), config.jobs).await?;

    let summary = aggregate(jobs)?;
    for job in summary.jobs() {
        match job.state() {
            pipeline_core::JobState::Succeeded => println!("  ✅ {}", job.unit.name),
            _ => println!("  ❌ {}", job.unit.name),
        }
    }
    println!();
    print!("{}", summary.render());

    // 单个资源失败不影响退出码
    Ok(ExitCode::SUCCESS)
}

async fn combine(config: &PipelineConfig, base_character: &str) -> Result<ExitCode> {
    let tool = config.tool_spec();
    let version = probe(&tool).await?;
    println!("🔧 {version}");

    let run = discover_animation_run(&config.anim_input_dir, base_character, &config.layout)?;
    println!(
        "🎬 使用基础角色 {} 合并 {} 个动画文件",
        base_character,
        run.sources.len()
    );
    for source in &run.sources {
        println!("  - {} → {}", source.path.display(), source.clip_name);
    }

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("无法创建输出目录 {}", config.output_dir.display()))?;

    let invoker = Invoker::new(tool);
    let outcome = combine_animations(&invoker, &run, &config.output_dir, &config.options()).await?;

    println!();
    println!("📋 保留的动画片段:");
    for action in &outcome.inventory.actions {
        println!(
            "  - {} (帧 {}..{}, {} 个关键帧)",
            action.name, action.frame_start, action.frame_end, action.keyframes
        );
    }
    for skipped in &outcome.merged.skipped {
        let marker = match skipped.reason {
            SkipReason::ImportFailed(_) | SkipReason::ClipTransferFailed(_) => "❌",
            SkipReason::NoArmatureInSource | SkipReason::NoMotionData => "⚠️ ",
        };
        println!("  {marker} 跳过 {}: {}", skipped.source.display(), skipped.reason);
    }

    if outcome.merged.clips.is_empty() {
        println!("⚠️  没有保留任何动画片段");
    }
    println!();
    println!("✅ 动画合并完成: {}", outcome.output_path.display());
    println!(
        "   片段: {} / 跳过: {}",
        outcome.merged.clips.len(),
        outcome.merged.skipped.len()
    );
    Ok(ExitCode::SUCCESS)
}

/// 面向用户的修复建议
fn remediation(err: &anyhow::Error) -> Option<String> {
    let discovery = err.downcast_ref::<DiscoveryError>().or_else(|| {
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Discovery(e)) => Some(e),
            _ => None,
        }
    });
    if let Some(e) = discovery {
        return match e {
            DiscoveryError::BaseCharacterMissing { path, candidates } => {
                let dir = path.parent().map(|p| p.display().to_string()).unwrap_or_default();
                if candidates.is_empty() {
                    return Some(format!("{dir} 中没有任何模型文件"));
                }
                let mut hint = format!("{dir} 中可用的模型文件:\n");
                for candidate in candidates {
                    hint.push_str(&format!("  - {candidate}\n"));
                }
                hint.push_str("\n可以指定其中一个作为基础角色:\n");
                hint.push_str("  asset-pipeline combine --base-character FILENAME.fbx");
                Some(hint)
            }
            DiscoveryError::InputRootMissing { path } => Some(format!(
                "请创建目录 {} 并放入源文件，或通过 --input / --anim-input 指定其他目录",
                path.display()
            )),
            _ => None,
        };
    }

    let invoke = err.downcast_ref::<pipeline_core::InvokeError>().or_else(|| {
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Invoke(e)) => Some(e),
            Some(PipelineError::Session(pipeline_core::SessionError::Transport(e))) => Some(e),
            Some(PipelineError::Merge(pipeline_core::MergeError::Session(
                pipeline_core::SessionError::Transport(e),
            ))) => Some(e),
            _ => None,
        }
    });
    invoke.and_then(|e| e.hint()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "asset-pipeline",
            "convert",
            "hero",
            "villain",
            "--jobs",
            "4",
            "--timeout",
            "30",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.jobs, Some(4));
        assert_eq!(cli.timeout, Some(30));
        assert!(cli.verbose);
        match cli.command {
            Commands::Convert { names } => assert_eq!(names, vec!["hero", "villain"]),
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_cli_overrides_config() {
        let dir = std::env::temp_dir().join("asset-pipeline-cli-test-missing");
        let cli = Cli::try_parse_from([
            "asset-pipeline",
            "--config",
            dir.join("pipeline.json").to_str().unwrap(),
            "--output",
            "dist",
            "--blender",
            "/opt/blender/blender",
            "list",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert!(config.output_dir.ends_with("dist"));
        assert!(config.output_dir.is_absolute());
        assert_eq!(config.tool.program, PathBuf::from("/opt/blender/blender"));
        assert_eq!(config.jobs, 1);
    }

    #[test]
    fn test_remediation_for_missing_base() {
        let err = anyhow::Error::from(DiscoveryError::BaseCharacterMissing {
            path: PathBuf::from("/anim/Hero.fbx"),
            candidates: vec!["Ch20_nonPBR.fbx".to_string(), "walk.fbx".to_string()],
        });
        let hint = remediation(&err).unwrap();
        assert!(hint.contains("  - Ch20_nonPBR.fbx"));
        assert!(hint.contains("--base-character"));
    }

    #[test]
    fn test_remediation_for_missing_tool() {
        let err = anyhow::Error::from(pipeline_core::InvokeError::ToolUnavailable {
            program: "blender".to_string(),
            reason: "No such file or directory".to_string(),
        });
        assert!(remediation(&err).is_some_and(|h| h.contains("ln -s")));
    }
}
