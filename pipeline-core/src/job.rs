//! 转换任务与状态迁移

use std::fmt;

use crate::discovery::AssetUnit;
use crate::error::JobError;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Dispatched => write!(f, "Dispatched"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// 一个资源单元的转换任务
///
/// 状态只能按 `Pending → Dispatched → Succeeded | Failed` 迁移。
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionJob {
    pub unit: AssetUnit,
    state: JobState,
    log: String,
}

impl ConversionJob {
    pub fn new(unit: AssetUnit) -> Self {
        Self {
            unit,
            state: JobState::Pending,
            log: String::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn dispatch(&mut self) -> Result<(), JobError> {
        self.transition(JobState::Pending, JobState::Dispatched)
    }

    pub fn succeed(&mut self, log: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobState::Dispatched, JobState::Succeeded)?;
        self.log = log.into();
        Ok(())
    }

    pub fn fail(&mut self, log: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobState::Dispatched, JobState::Failed)?;
        self.log = log.into();
        Ok(())
    }

    fn transition(&mut self, expected: JobState, to: JobState) -> Result<(), JobError> {
        if self.state != expected {
            return Err(JobError::InvalidTransition {
                unit: self.unit.name.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job() -> ConversionJob {
        ConversionJob::new(AssetUnit {
            name: "hero".to_string(),
            model_source_path: PathBuf::from("/in/hero/hero.fbx"),
            auxiliary_files: Vec::new(),
            output_path: PathBuf::from("/out/hero.glb"),
        })
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        assert_eq!(job.state(), JobState::Pending);
        job.dispatch().unwrap();
        job.succeed("ok").unwrap();
        assert_eq!(job.state(), JobState::Succeeded);
        assert_eq!(job.log(), "ok");
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_cannot_finish_undispatched_job() {
        let mut job = job();
        let err = job.fail("boom").unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidTransition {
                unit: "hero".to_string(),
                from: JobState::Pending,
                to: JobState::Failed,
            }
        );
        assert_eq!(job.state(), JobState::Pending);
    }

    #[test]
    fn test_cannot_dispatch_twice() {
        let mut job = job();
        job.dispatch().unwrap();
        assert!(job.dispatch().is_err());
    }
}
