//! # Convert 模块
//!
//! 调用驱动：每个资源单元或每次动画合并对应一次独立调用（一个会话）。
//!
//! - 单资源转换：reset → import → inspect → export → finish
//! - 动画合并：reset → merge → inspect → export → finish
//!
//! 步骤失败时，会话仍可用则正常结束，否则强制终止。

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::discovery::{AnimationRun, AssetUnit};
use crate::error::{InvokeError, JobError, MergeError, PipelineError, SessionError};
use crate::invoke::{InvocationResult, Invoker, WorkDescriptor, tail};
use crate::job::ConversionJob;
use crate::merge::{MergedCharacter, merge_animations};
use crate::options::PipelineOptions;
use crate::session::{BlenderSession, SceneInventory, SceneSession};

/// 失败日志中保留的 stderr 行数
const STDERR_TAIL_LINES: usize = 20;

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn failure_log(err: &SessionError, result: Option<&InvocationResult>) -> String {
    let mut log = err.to_string();
    // 非零退出的错误信息本身已带有 stderr
    if matches!(
        err,
        SessionError::Transport(InvokeError::ToolExecutionFailed { .. })
    ) {
        return log;
    }
    let stderr = result
        .map(|r| tail(&r.stderr, STDERR_TAIL_LINES))
        .unwrap_or_default();
    if !stderr.is_empty() {
        log.push('\n');
        log.push_str(&stderr);
    }
    log
}

/// 步骤失败后关闭会话，返回已捕获的输出
async fn close_after_failure(session: BlenderSession, err: &SessionError) -> Option<InvocationResult> {
    if err.is_fatal() {
        return Some(session.abort().await);
    }
    match session.finish().await {
        Ok(result) => Some(result),
        Err(e) => {
            debug!(error = %e, "失败后结束会话时出错");
            None
        }
    }
}

async fn conversion_steps<S: SceneSession>(
    session: &mut S,
    unit: &AssetUnit,
    options: &PipelineOptions,
) -> Result<(), SessionError> {
    session.reset().await?;
    let imported = session.import(&unit.model_source_path, &options.import).await?;
    debug!(unit = %unit.name, objects = imported.objects.len(), "模型已导入");

    session.inspect().await?.log(&unit.name);
    session.export(&unit.output_path, &options.export).await
}

async fn run_conversion(
    invoker: &Invoker,
    unit: &AssetUnit,
    options: &PipelineOptions,
) -> Result<InvocationResult, String> {
    let descriptor = WorkDescriptor {
        label: unit.name.clone(),
        inputs: vec![path_string(&unit.model_source_path)],
        output: path_string(&unit.output_path),
    };
    let mut session = BlenderSession::open(invoker, &descriptor).map_err(|e| e.to_string())?;

    match conversion_steps(&mut session, unit, options).await {
        Ok(()) => session.finish().await.map_err(|e| e.to_string()),
        Err(e) => {
            let result = close_after_failure(session, &e).await;
            Err(failure_log(&e, result.as_ref()))
        }
    }
}

/// 转换单个资源单元
///
/// 任务必须处于 `Pending`；返回时已处于 `Succeeded` 或 `Failed`。
pub async fn convert_unit(
    invoker: &Invoker,
    job: &mut ConversionJob,
    options: &PipelineOptions,
) -> Result<(), JobError> {
    job.dispatch()?;
    info!(unit = %job.unit.name, model = %job.unit.model_source_path.display(), "开始转换");

    match run_conversion(invoker, &job.unit, options).await {
        Ok(_) => {
            info!(unit = %job.unit.name, output = %job.unit.output_path.display(), "转换成功");
            let log = format!("已导出 {}", job.unit.output_path.display());
            job.succeed(log)
        }
        Err(log) => {
            warn!(unit = %job.unit.name, reason = %log.lines().next().unwrap_or_default(), "转换失败");
            job.fail(log)
        }
    }
}

/// 转换全部资源单元
///
/// 最多 `jobs` 个调用同时进行。全部任务结束后按发现顺序返回。
pub async fn convert_all(
    invoker: &Invoker,
    units: Vec<AssetUnit>,
    options: &PipelineOptions,
    jobs: usize,
) -> Result<Vec<ConversionJob>, JobError> {
    let total = units.len();
    info!(total, jobs, "开始批量转换");

    let mut finished: Vec<(usize, Result<ConversionJob, JobError>)> =
        stream::iter(units.into_iter().enumerate())
            .map(|(index, unit)| async move {
                let mut job = ConversionJob::new(unit);
                let outcome = convert_unit(invoker, &mut job, options).await;
                debug!(index, total, unit = %job.unit.name, state = %job.state(), "任务结束");
                (index, outcome.map(|()| job))
            })
            .buffer_unordered(jobs.max(1))
            .collect()
            .await;

    finished.sort_by_key(|(index, _)| *index);
    finished.into_iter().map(|(_, job)| job).collect()
}

/// 动画合并的结果
#[derive(Debug, Clone)]
pub struct CombineOutcome {
    pub merged: MergedCharacter,
    /// 导出前的场景清单
    pub inventory: SceneInventory,
    pub output_path: PathBuf,
    pub invocation: InvocationResult,
}

async fn combine_steps<S: SceneSession>(
    session: &mut S,
    run: &AnimationRun,
    output_path: &Path,
    options: &PipelineOptions,
) -> Result<(MergedCharacter, SceneInventory), MergeError> {
    session.reset().await?;
    let merged = merge_animations(session, run, &options.import).await?;

    let inventory = session.inspect().await?;
    inventory.log(&run.base.display_name);

    session.export(output_path, &options.export).await?;
    Ok((merged, inventory))
}

/// 把动画合并到基础角色并导出
///
/// 输出为 `<output_dir>/<基础角色名>_with_animations.glb`。
pub async fn combine_animations(
    invoker: &Invoker,
    run: &AnimationRun,
    output_dir: &Path,
    options: &PipelineOptions,
) -> Result<CombineOutcome, PipelineError> {
    let output_path = run.output_path(output_dir);
    let descriptor = WorkDescriptor {
        label: format!("combine-{}", run.base.display_name),
        inputs: run.input_paths().map(path_string).collect(),
        output: path_string(&output_path),
    };

    info!(
        base = %run.base.path.display(),
        sources = run.sources.len(),
        output = %output_path.display(),
        "开始合并动画"
    );
    let mut session = BlenderSession::open(invoker, &descriptor)?;

    match combine_steps(&mut session, run, &output_path, options).await {
        Ok((merged, inventory)) => {
            let invocation = session.finish().await?;
            info!(
                clips = merged.clips.len(),
                skipped = merged.skipped.len(),
                output = %output_path.display(),
                "动画合并完成"
            );
            Ok(CombineOutcome {
                merged,
                inventory,
                output_path,
                invocation,
            })
        }
        Err(e) => {
            let result = match &e {
                MergeError::Session(session_error) => {
                    close_after_failure(session, session_error).await
                }
                _ => session.finish().await.ok(),
            };
            if let Some(result) = result.filter(|r| !r.stderr.is_empty()) {
                warn!(stderr = %tail(&result.stderr, STDERR_TAIL_LINES), "外部工具错误输出");
            }
            Err(e.into())
        }
    }
}
