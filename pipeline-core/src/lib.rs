//! # Pipeline Core
//!
//! 3D 资源管线的核心库：把 FBX 源文件转换为 GLB，并把多个动画合并到同一个骨架上。
//!
//! ## 架构概述
//!
//! 真正的导入/导出由外部工具（Blender）完成。本库负责编排：
//!
//! ```text
//! discovery                 invoke                    session
//!   │ AssetUnit / Run          │ 隔离的子进程调用         │ 请求/回复
//!   └──────────► convert ──────┴──────► BlenderSession ◄─┘
//!                  │                         ▲
//!                  │                  merge（动画合并）
//!                  ▼
//!               summary
//! ```
//!
//! - 每次调用独占一个场景、一个临时目录和一个子进程，调用之间不共享状态
//! - 单个资源或单个动画源的失败只被记录，不会中止整批任务
//!
//! ## 模块结构
//!
//! - [`discovery`]：扫描输入目录，生成确定性的任务列表
//! - [`naming`]：动画片段命名
//! - [`invoke`]：外部工具调用协议（worker 程序、临时目录、超时）
//! - [`session`]：场景会话 trait 与 Blender 实现
//! - [`merge`]：动画合并算法
//! - [`convert`]：调用驱动（单资源转换、批量并发、动画合并）
//! - [`job`] / [`summary`]：任务状态与结果汇总
//! - [`config`] / [`options`]：配置与工具参数
//! - [`error`]：错误类型定义

pub mod config;
pub mod convert;
pub mod discovery;
pub mod error;
pub mod invoke;
pub mod job;
pub mod merge;
pub mod naming;
pub mod options;
pub mod session;
pub mod summary;

// 重导出核心类型
pub use config::{ConfigError, PipelineConfig, ToolConfig};
pub use convert::{CombineOutcome, combine_animations, convert_all, convert_unit};
pub use discovery::{
    AnimationRun, AnimationSource, AssetUnit, BaseCharacter, FolderScan, Layout, Selection,
    discover, discover_animation_run, package_path, scan_folders, select,
};
pub use error::{
    DiscoveryError, InvokeError, JobError, MergeError, PipelineError, SessionError,
    SummaryError,
};
pub use invoke::{InvocationResult, Invoker, ToolSpec, probe};
pub use job::{ConversionJob, JobState};
pub use merge::{MergedCharacter, RetainedClip, SkipReason, SkippedSource, merge_animations};
pub use options::{ExportOptions, ImportOptions, PipelineOptions};
pub use session::{BlenderSession, SceneInventory, SceneSession};
pub use summary::{RunSummary, aggregate};
