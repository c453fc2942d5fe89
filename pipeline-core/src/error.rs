//! # Error 模块
//!
//! 定义 pipeline-core 中使用的错误类型。
//!
//! 错误按影响范围分层：
//! - 前置条件缺失（输入目录、外部工具、基础角色）在任何工作开始前中止
//! - 单次调用失败只影响对应的任务，不会中止其他任务
//! - 单个动画源失败不算错误，只记录为跳过（见 [`crate::merge::SkipReason`]）

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::job::JobState;

/// 发现阶段错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    /// 输入目录不存在或无法列出
    #[error("输入目录不存在或无法读取: {}", path.display())]
    InputRootMissing { path: PathBuf },

    /// 输入目录中没有任何可转换的资源文件夹
    #[error("输入目录中没有包含模型文件的子目录: {}", root.display())]
    NoAssetUnitsFound { root: PathBuf },

    /// 基础角色文件不存在
    #[error("基础角色文件不存在: {}", path.display())]
    BaseCharacterMissing {
        path: PathBuf,
        /// 同目录下可作为基础角色的候选文件名
        candidates: Vec<String>,
    },

    /// 排除基础角色后没有剩余的动画文件
    #[error("{} 中没有动画文件（已排除基础角色 {base}）", root.display())]
    NoAnimationSources { root: PathBuf, base: String },
}

/// 外部工具调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvokeError {
    /// 外部工具不可用（探测失败、超时或无法启动）
    #[error("外部工具不可用: {program} - {reason}")]
    ToolUnavailable { program: String, reason: String },

    /// worker 程序写入后不可见
    #[error("worker 程序写入失败: {} - {reason}", path.display())]
    WorkerScriptWriteFailed { path: PathBuf, reason: String },

    /// 外部工具以非零状态退出
    #[error("外部工具执行失败（退出码 {}）: {}", fmt_exit_code(*exit_code), stderr.trim())]
    ToolExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
        script: PathBuf,
    },

    /// 外部工具超时，已被强制终止
    #[error("外部工具执行超时（{}s），已强制终止", timeout.as_secs())]
    ToolTimedOut { timeout: Duration, script: PathBuf },

    /// 与子进程通信时的 IO 错误
    #[error("{context}: {message}")]
    Io { context: String, message: String },
}

impl InvokeError {
    /// 面向用户的修复建议
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ToolUnavailable { .. } => Some(
                "请安装 Blender 并将其加入 PATH，或通过 --blender / 配置文件 tool.program 指定路径。\n\
macOS 上可以创建软链接：\n\
  ln -s /Applications/Blender.app/Contents/MacOS/Blender /usr/local/bin/blender",
            ),
            Self::ToolTimedOut { .. } => Some("可以通过 --timeout 或配置文件 tool.run_timeout_secs 放宽时限"),
            _ => None,
        }
    }
}

fn fmt_exit_code(code: Option<i32>) -> String {
    code.map_or_else(|| "被信号终止".to_string(), |c| c.to_string())
}

/// 场景会话错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// 工具执行了请求但报告失败，会话仍然可用
    #[error("{op} 失败: {message}")]
    Rejected { op: &'static str, message: String },

    /// 回复无法解析或输出流提前关闭
    #[error("{op} 协议错误: {message}")]
    Protocol { op: &'static str, message: String },

    /// 进程级失败（超时、退出、管道断开）
    #[error(transparent)]
    Transport(#[from] InvokeError),
}

impl SessionError {
    /// 是否使整个会话失效
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// 动画合并的致命错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    /// 基础角色导入失败
    #[error("基础角色导入失败: {} - {message}", path.display())]
    BaseImportFailed { path: PathBuf, message: String },

    /// 基础角色中没有骨架
    #[error("基础角色中没有找到骨架: {}", path.display())]
    BaseArmatureMissing { path: PathBuf },

    /// 基础角色中有多个骨架
    #[error("基础角色中有多个骨架（{}）: {}", armatures.join(", "), path.display())]
    AmbiguousBaseArmature { path: PathBuf, armatures: Vec<String> },

    /// 会话失效
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// 任务状态迁移错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("任务 '{unit}' 不能从 {from} 迁移到 {to}")]
    InvalidTransition {
        unit: String,
        from: JobState,
        to: JobState,
    },
}

/// 汇总错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SummaryError {
    /// 仍有任务未结束
    #[error("任务 '{unit}' 仍处于 {state} 状态，不能汇总")]
    IncompleteRun { unit: String, state: JobState },
}

/// pipeline-core 统一错误类型
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("动画合并失败: {0}")]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Summary(#[from] SummaryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_is_not_fatal() {
        let rejected = SessionError::Rejected {
            op: "import",
            message: "bad file".to_string(),
        };
        assert!(!rejected.is_fatal());

        let timed_out = SessionError::from(InvokeError::ToolTimedOut {
            timeout: Duration::from_secs(1),
            script: PathBuf::from("/tmp/w.py"),
        });
        assert!(timed_out.is_fatal());
    }

    #[test]
    fn test_execution_failed_message_carries_stderr() {
        let err = InvokeError::ToolExecutionFailed {
            exit_code: Some(3),
            stderr: "Traceback: boom\n".to_string(),
            script: PathBuf::from("/tmp/w.py"),
        };
        let msg = err.to_string();
        assert!(msg.contains("3"));
        assert!(msg.contains("Traceback: boom"));
    }

    #[test]
    fn test_unavailable_has_hint() {
        let err = InvokeError::ToolUnavailable {
            program: "blender".to_string(),
            reason: "not found".to_string(),
        };
        assert!(err.hint().is_some_and(|h| h.contains("PATH")));
    }
}
