//! # Config 模块
//!
//! 管线配置，集中管理所有配置项。
//!
//! ## 配置优先级
//!
//! 1. 命令行参数（最高）
//! 2. 配置文件 (pipeline.json)
//! 3. 默认值（最低）

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::discovery::Layout;
use crate::invoke::ToolSpec;
use crate::options::{ExportOptions, ImportOptions, PipelineOptions};

/// 管线配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 资源输入目录（每个子目录一个资源）
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// 动画输入目录（基础角色 + 动画文件）
    #[serde(default = "default_anim_input_dir")]
    pub anim_input_dir: PathBuf,

    /// 输出目录
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// 默认基础角色文件名（位于 anim_input_dir 下）
    #[serde(default = "default_base_character")]
    pub base_character: String,

    /// 并发调用数
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// 文件分类规则
    #[serde(default)]
    pub layout: Layout,

    /// 外部工具配置
    #[serde(default)]
    pub tool: ToolConfig,

    /// FBX 导入参数
    #[serde(default)]
    pub import: ImportOptions,

    /// glTF 导出参数
    #[serde(default)]
    pub export: ExportOptions,
}

/// 外部工具配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// 可执行文件（名字或路径）
    #[serde(default = "default_tool_program")]
    pub program: PathBuf,

    /// 启动参数模板，`{script}` 会被替换为 worker 程序路径
    #[serde(default = "default_tool_args")]
    pub args: Vec<String>,

    /// 可用性探测参数
    #[serde(default = "default_probe_args")]
    pub probe_args: Vec<String>,

    /// 探测超时（秒）
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// 单次调用超时（秒）
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

// 默认值函数
fn default_input_dir() -> PathBuf {
    PathBuf::from("fbx")
}

fn default_anim_input_dir() -> PathBuf {
    PathBuf::from("fbxAnimation")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("glb")
}

fn default_base_character() -> String {
    "Ch20_nonPBR.fbx".to_string()
}

fn default_jobs() -> usize {
    1
}

fn default_tool_program() -> PathBuf {
    PathBuf::from("blender")
}

fn default_tool_args() -> Vec<String> {
    [
        "--background",
        "--factory-startup",
        "--python-exit-code",
        "1",
        "--python",
        crate::invoke::SCRIPT_PLACEHOLDER,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_probe_args() -> Vec<String> {
    vec!["--version".to_string()]
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_run_timeout_secs() -> u64 {
    600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            anim_input_dir: default_anim_input_dir(),
            output_dir: default_output_dir(),
            base_character: default_base_character(),
            jobs: default_jobs(),
            layout: Layout::default(),
            tool: ToolConfig::default(),
            import: ImportOptions::default(),
            export: ExportOptions::default(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_tool_program(),
            args: default_tool_args(),
            probe_args: default_probe_args(),
            probe_timeout_secs: default_probe_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    /// 加载配置文件
    ///
    /// 文件不存在时使用默认配置；文件存在但无法解析时返回错误。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "配置文件不存在，使用默认配置");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        info!(path = %path.display(), "配置文件加载成功");
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, json).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("jobs 必须至少为 1".to_string()));
        }

        if self.tool.probe_timeout_secs == 0 || self.tool.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid("超时时间必须大于 0 秒".to_string()));
        }

        if !self
            .tool
            .args
            .iter()
            .any(|a| a.contains(crate::invoke::SCRIPT_PLACEHOLDER))
        {
            return Err(ConfigError::Invalid(format!(
                "tool.args 中必须包含 {} 占位符",
                crate::invoke::SCRIPT_PLACEHOLDER
            )));
        }

        if self.layout.model_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "layout.model_extensions 不能为空".to_string(),
            ));
        }

        if self.base_character.trim().is_empty() {
            return Err(ConfigError::Invalid("base_character 不能为空".to_string()));
        }

        Ok(())
    }

    /// 把所有目录解析为绝对路径
    ///
    /// worker 程序只接收绝对路径，不依赖工具进程的工作目录。
    pub fn resolve_paths(&mut self) -> Result<(), ConfigError> {
        for dir in [
            &mut self.input_dir,
            &mut self.anim_input_dir,
            &mut self.output_dir,
        ] {
            let resolved = std::path::absolute(&*dir).map_err(|e| {
                ConfigError::Invalid(format!("无法解析路径 {}: {e}", dir.display()))
            })?;
            *dir = resolved;
        }
        Ok(())
    }

    pub fn tool_spec(&self) -> ToolSpec {
        ToolSpec {
            program: self.tool.program.clone(),
            args: self.tool.args.clone(),
            probe_args: self.tool.probe_args.clone(),
            probe_timeout: Duration::from_secs(self.tool.probe_timeout_secs),
            run_timeout: Duration::from_secs(self.tool.run_timeout_secs),
        }
    }

    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            import: self.import.clone(),
            export: self.export.clone(),
        }
    }
}

/// 配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("配置文件读取失败: {} - {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("配置文件写入失败: {} - {message}", path.display())]
    Write { path: PathBuf, message: String },

    #[error("配置序列化失败: {} - {message}", path.display())]
    Serialize { path: PathBuf, message: String },

    #[error("配置文件解析失败: {} - {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("配置验证失败: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.base_character, "Ch20_nonPBR.fbx");
        assert_eq!(config.jobs, 1);
        assert!(config.validate().is_ok());
        assert_eq!(config.tool_spec().run_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "output_dir": "dist", "tool": { "program": "/opt/blender/blender" } }"#,
        )
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("dist"));
        assert_eq!(config.tool.program, PathBuf::from("/opt/blender/blender"));
        assert_eq!(config.tool.probe_timeout_secs, 10);
        assert_eq!(config.input_dir, PathBuf::from("fbx"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();

        config.jobs = 0;
        assert!(config.validate().is_err());
        config.jobs = 4;

        config.tool.args = vec!["--background".to_string()];
        assert!(config.validate().is_err());
        config.tool.args = default_tool_args();

        config.tool.run_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(dir.path().join("nope.json")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut config = PipelineConfig::default();
        config.jobs = 3;
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap().jobs, 3);
    }

    #[test]
    fn test_save_to_missing_dir_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("pipeline.json");
        assert!(matches!(
            PipelineConfig::default().save(&path),
            Err(ConfigError::Write { .. })
        ));
    }

    #[test]
    fn test_resolve_paths_is_absolute() {
        let mut config = PipelineConfig::default();
        config.resolve_paths().unwrap();
        assert!(config.input_dir.is_absolute());
        assert!(config.output_dir.is_absolute());
    }
}
