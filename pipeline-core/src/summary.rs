//! # Summary 模块
//!
//! 汇总所有任务的最终状态。只在全部任务都结束之后调用。

use std::fmt::Write as _;

use crate::error::SummaryError;
use crate::job::{ConversionJob, JobState};

/// 一次运行的汇总，构造后不再修改
#[derive(Debug, Clone)]
pub struct RunSummary {
    total: usize,
    succeeded: usize,
    failed: usize,
    per_job_detail: Vec<ConversionJob>,
}

/// 汇总任务结果
///
/// 任何任务仍处于 `Pending`/`Dispatched` 时返回 [`SummaryError::IncompleteRun`]。
pub fn aggregate(jobs: Vec<ConversionJob>) -> Result<RunSummary, SummaryError> {
    if let Some(job) = jobs.iter().find(|j| !j.state().is_terminal()) {
        return Err(SummaryError::IncompleteRun {
            unit: job.unit.name.clone(),
            state: job.state(),
        });
    }

    let succeeded = jobs
        .iter()
        .filter(|j| j.state() == JobState::Succeeded)
        .count();

    Ok(RunSummary {
        total: jobs.len(),
        succeeded,
        failed: jobs.len() - succeeded,
        per_job_detail: jobs,
    })
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// 全部任务（发现顺序）
    pub fn jobs(&self) -> &[ConversionJob] {
        &self.per_job_detail
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConversionJob> {
        self.per_job_detail
            .iter()
            .filter(|j| j.state() == JobState::Failed)
    }

    /// 面向用户的汇总文本
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "--- 转换汇总 ---");
        let _ = writeln!(out, "成功: {}", self.succeeded);
        let _ = writeln!(out, "失败: {}", self.failed);
        let _ = writeln!(out, "总计: {}", self.total);

        if self.failed > 0 {
            let _ = writeln!(out, "失败项:");
            for job in self.failures() {
                let reason = job.log().lines().next().unwrap_or("未知错误");
                let _ = writeln!(out, "  ✗ {}: {}", job.unit.name, reason);
            }
        }
        out
    }
}
