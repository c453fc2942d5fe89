//! # Merge 模块
//!
//! 动画合并：把多个动画文件中的片段保留到同一个基础骨架上。
//!
//! ## 单个动画源的处理流程
//!
//! ```text
//! import ──失败──▶ Skipped(ImportFailed)
//!   │
//! 找骨架 ──无──▶ Skipped(NoArmatureInSource)
//!   │
//! 取片段 ──无──▶ Skipped(NoMotionData)
//!   │
//! 改名 + 保留 ──失败──▶ Skipped(ClipTransferFailed)
//!   │
//! Retained
//!
//! 以上任一结果之后都会删除本次导入的全部对象
//! ```
//!
//! 动画源严格按顺序处理。只有进程级错误会中止整个合并。

use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::discovery::{AnimationRun, AnimationSource, BaseCharacter};
use crate::error::{MergeError, SessionError};
use crate::naming::ClipNamer;
use crate::options::ImportOptions;
use crate::session::{ImportHandle, SceneObject, SceneSession};

/// 动画源被跳过的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ImportFailed(String),
    NoArmatureInSource,
    NoMotionData,
    ClipTransferFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImportFailed(message) => write!(f, "导入失败: {message}"),
            Self::NoArmatureInSource => write!(f, "文件中没有骨架"),
            Self::NoMotionData => write!(f, "骨架上没有动画数据"),
            Self::ClipTransferFailed(message) => write!(f, "片段转移失败: {message}"),
        }
    }
}

/// 保留下来的片段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedClip {
    pub source: PathBuf,
    /// 最终片段名
    pub name: String,
}

/// 被跳过的动画源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub source: PathBuf,
    pub clip_name: String,
    pub reason: SkipReason,
}

/// 单个动画源的最终状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Retained(RetainedClip),
    Skipped(SkippedSource),
}

/// 合并结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedCharacter {
    pub base: BaseCharacter,
    /// 基础骨架
    pub armature: SceneObject,
    /// 按发现顺序保留的片段
    pub clips: Vec<RetainedClip>,
    pub skipped: Vec<SkippedSource>,
}

impl MergedCharacter {
    pub fn clip_names(&self) -> Vec<&str> {
        self.clips.iter().map(|c| c.name.as_str()).collect()
    }
}

/// 在会话中执行一次动画合并
///
/// 基础角色导入失败、没有骨架或有多个骨架时，在处理任何动画源之前返回错误。
/// 全部动画源都被跳过时仍然成功（零个片段）。
pub async fn merge_animations<S: SceneSession>(
    session: &mut S,
    run: &AnimationRun,
    options: &ImportOptions,
) -> Result<MergedCharacter, MergeError> {
    let armature = import_base(session, &run.base, options).await?;
    info!(base = %run.base.path.display(), armature = %armature.name, "基础骨架已导入");

    let mut merged = MergedCharacter {
        base: run.base.clone(),
        armature,
        clips: Vec::new(),
        skipped: Vec::new(),
    };
    let mut namer = ClipNamer::new();

    for source in &run.sources {
        match merge_source(session, &merged.armature, source, options, &mut namer).await? {
            SourceOutcome::Retained(clip) => {
                info!(source = %clip.source.display(), clip = %clip.name, "动画片段已保留");
                merged.clips.push(clip);
            }
            SourceOutcome::Skipped(skipped) => {
                warn!(source = %skipped.source.display(), reason = %skipped.reason, "动画源已跳过");
                merged.skipped.push(skipped);
            }
        }
    }

    if merged.clips.is_empty() {
        warn!(base = %run.base.path.display(), "没有保留任何动画片段");
    }
    Ok(merged)
}

async fn import_base<S: SceneSession>(
    session: &mut S,
    base: &BaseCharacter,
    options: &ImportOptions,
) -> Result<SceneObject, MergeError> {
    let handle = match session.import(&base.path, options).await {
        Ok(handle) => handle,
        Err(SessionError::Rejected { message, .. }) => {
            return Err(MergeError::BaseImportFailed {
                path: base.path.clone(),
                message,
            });
        }
        Err(e) => return Err(e.into()),
    };

    match handle.armatures().as_slice() {
        [] => Err(MergeError::BaseArmatureMissing {
            path: base.path.clone(),
        }),
        [armature] => Ok((*armature).clone()),
        many => Err(MergeError::AmbiguousBaseArmature {
            path: base.path.clone(),
            armatures: many.iter().map(|o| o.name.clone()).collect(),
        }),
    }
}

async fn merge_source<S: SceneSession>(
    session: &mut S,
    base: &SceneObject,
    source: &AnimationSource,
    options: &ImportOptions,
    namer: &mut ClipNamer,
) -> Result<SourceOutcome, SessionError> {
    let handle = match session.import(&source.path, options).await {
        Ok(handle) => handle,
        Err(SessionError::Rejected { message, .. }) => {
            return Ok(skipped(source, SkipReason::ImportFailed(message)));
        }
        Err(e) => return Err(e),
    };

    let outcome = extract_clip(session, base, source, &handle, namer).await?;
    session.discard(&handle.objects).await?;
    Ok(outcome)
}

async fn extract_clip<S: SceneSession>(
    session: &mut S,
    base: &SceneObject,
    source: &AnimationSource,
    handle: &ImportHandle,
    namer: &mut ClipNamer,
) -> Result<SourceOutcome, SessionError> {
    let Some(armature) = handle.first_armature() else {
        return Ok(skipped(source, SkipReason::NoArmatureInSource));
    };

    let clip = match session.active_clip(armature).await {
        Ok(Some(clip)) => clip,
        Ok(None) => return Ok(skipped(source, SkipReason::NoMotionData)),
        Err(SessionError::Rejected { message, .. }) => {
            return Ok(skipped(source, SkipReason::ClipTransferFailed(message)));
        }
        Err(e) => return Err(e),
    };

    let wanted = namer.claim(&source.clip_name);
    match session.retain_clip(base, &clip, &wanted).await {
        Ok(actual) => {
            if actual != wanted {
                warn!(wanted = %wanted, actual = %actual, "工具修改了片段名");
                namer.release(&wanted);
                namer.reserve(&actual);
            }
            Ok(SourceOutcome::Retained(RetainedClip {
                source: source.path.clone(),
                name: actual,
            }))
        }
        Err(SessionError::Rejected { message, .. }) => {
            namer.release(&wanted);
            Ok(skipped(source, SkipReason::ClipTransferFailed(message)))
        }
        Err(e) => Err(e),
    }
}

fn skipped(source: &AnimationSource, reason: SkipReason) -> SourceOutcome {
    SourceOutcome::Skipped(SkippedSource {
        source: source.path.clone(),
        clip_name: source.clip_name.clone(),
        reason,
    })
}
