//! # Invoke 模块
//!
//! 外部工具的隔离调用协议。
//!
//! ## 一次调用的生命周期
//!
//! ```text
//! probe()                 版本探测（有超时），失败则不触碰文件系统
//!   │
//! WorkArea::prepare()     私有临时目录 + 唯一命名的 worker 程序
//!   │
//! Invoker::spawn()        启动子进程，工作目录指向临时目录
//!   │                     stdout / stderr 全量捕获
//! RunningTool::wait()     有超时；超时则强制终止
//!   │
//! drop                    无论结果如何都删除 worker 程序与临时目录
//! ```
//!
//! 调用之间不共享任何可变状态，可以并发执行。

mod worker;

pub use worker::{WorkDescriptor, WorkerProgram};

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tempfile::{TempDir, TempPath};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use crate::error::InvokeError;

/// 启动参数中 worker 程序路径的占位符
pub const SCRIPT_PLACEHOLDER: &str = "{script}";

/// worker 程序回复行的前缀，其余 stdout 行视为工具日志
pub const REPLY_PREFIX: &str = "@@PIPELINE ";

/// 进程结束后等待输出管道排空的时限
const OUTPUT_DRAIN: Duration = Duration::from_secs(5);

static INVOCATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 外部工具的启动方式
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub program: PathBuf,
    /// 参数模板，包含 [`SCRIPT_PLACEHOLDER`]
    pub args: Vec<String>,
    pub probe_args: Vec<String>,
    pub probe_timeout: Duration,
    pub run_timeout: Duration,
}

impl ToolSpec {
    /// 用 worker 程序路径展开参数模板
    pub fn command_args(&self, script: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                if arg == SCRIPT_PLACEHOLDER {
                    script.as_os_str().to_os_string()
                } else {
                    OsString::from(arg.replace(SCRIPT_PLACEHOLDER, &script.to_string_lossy()))
                }
            })
            .collect()
    }

    /// 完整命令行（用于日志）
    pub fn command_line(&self, script: &Path) -> String {
        std::iter::once(self.program.as_os_str().to_os_string())
            .chain(self.command_args(script))
            .map(|arg| arg.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn unavailable(&self, reason: impl Into<String>) -> InvokeError {
        InvokeError::ToolUnavailable {
            program: self.program.display().to_string(),
            reason: reason.into(),
        }
    }
}

/// 探测外部工具是否可用，返回版本行
pub async fn probe(tool: &ToolSpec) -> Result<String, InvokeError> {
    let mut cmd = Command::new(&tool.program);
    cmd.args(&tool.probe_args)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let output = match timeout(tool.probe_timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(tool.unavailable(e.to_string())),
        Err(_) => {
            return Err(tool.unavailable(format!(
                "探测超时（{}s）",
                tool.probe_timeout.as_secs()
            )));
        }
    };

    if !output.status.success() {
        return Err(tool.unavailable(format!("探测命令退出状态 {}", output.status)));
    }

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    debug!(program = %tool.program.display(), version = %version, "外部工具可用");
    Ok(version)
}

/// 一次调用的最终结果
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub exit_code: Option<i32>,
    /// 去掉协议回复行之后的 stdout
    pub stdout: String,
    pub stderr: String,
    /// worker 程序路径（调用结束时已被删除）
    pub script_path: PathBuf,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// 取文本最后 `lines` 行
pub fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// 单次调用的私有临时区域
///
/// drop 时先删除 worker 程序，再删除整个目录。
#[derive(Debug)]
struct WorkArea {
    script: TempPath,
    dir: TempDir,
}

impl WorkArea {
    fn prepare(program: &WorkerProgram) -> Result<Self, InvokeError> {
        let id = INVOCATION_COUNTER.fetch_add(1, Ordering::Relaxed);

        let dir = tempfile::Builder::new()
            .prefix(&format!("asset-pipeline-{}-{id}-", std::process::id()))
            .tempdir()
            .map_err(|e| InvokeError::Io {
                context: "创建临时工作目录失败".to_string(),
                message: e.to_string(),
            })?;

        let mut file = tempfile::Builder::new()
            .prefix(&format!("worker-{id}-"))
            .suffix(&format!(".{}", program.extension))
            .tempfile_in(dir.path())
            .map_err(|e| InvokeError::WorkerScriptWriteFailed {
                path: dir.path().to_path_buf(),
                reason: e.to_string(),
            })?;

        let written = file
            .write_all(program.text.as_bytes())
            .and_then(|()| file.flush());
        if let Err(e) = written {
            return Err(InvokeError::WorkerScriptWriteFailed {
                path: file.path().to_path_buf(),
                reason: e.to_string(),
            });
        }

        let script = file.into_temp_path();
        if !script.is_file() {
            return Err(InvokeError::WorkerScriptWriteFailed {
                path: script.to_path_buf(),
                reason: "写入后文件不可见".to_string(),
            });
        }

        Ok(Self { script, dir })
    }
}

/// 外部工具调用器
#[derive(Debug, Clone)]
pub struct Invoker {
    tool: ToolSpec,
}

impl Invoker {
    pub fn new(tool: ToolSpec) -> Self {
        Self { tool }
    }

    /// 一次性调用：运行 worker 程序直到结束
    pub async fn invoke(&self, program: &WorkerProgram) -> Result<InvocationResult, InvokeError> {
        self.spawn(program)?.wait().await
    }

    /// 启动工具并保持 stdin 打开（会话使用）
    pub fn spawn(&self, program: &WorkerProgram) -> Result<RunningTool, InvokeError> {
        let work = WorkArea::prepare(program)?;
        let args = self.tool.command_args(&work.script);
        debug!(
            target: "tool",
            label = %program.label,
            command = %self.tool.command_line(&work.script),
            "启动外部工具"
        );

        let mut child = Command::new(&self.tool.program)
            .args(&args)
            .current_dir(work.dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.tool.unavailable(e.to_string()))?;

        let stdin = child.stdin.take();
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(InvokeError::Io {
                context: "获取工具输出管道失败".to_string(),
                message: program.label.clone(),
            });
        };

        let (replies_tx, replies) = mpsc::unbounded_channel();
        Ok(RunningTool {
            child,
            stdin,
            replies,
            stdout_task: tokio::spawn(capture_stdout(stdout, replies_tx)),
            stderr_task: tokio::spawn(capture_stderr(stderr)),
            deadline: Instant::now() + self.tool.run_timeout,
            run_timeout: self.tool.run_timeout,
            collected: None,
            work,
        })
    }
}

/// 运行中的外部工具
///
/// 整个调用共享一个截止时间。drop 时子进程被终止、临时文件被删除。
#[derive(Debug)]
pub struct RunningTool {
    child: Child,
    stdin: Option<ChildStdin>,
    replies: mpsc::UnboundedReceiver<String>,
    stdout_task: JoinHandle<String>,
    stderr_task: JoinHandle<String>,
    deadline: Instant,
    run_timeout: Duration,
    /// 输出管道只能排空一次
    collected: Option<InvocationResult>,
    work: WorkArea,
}

impl RunningTool {
    pub fn script_path(&self) -> &Path {
        &self.work.script
    }

    /// 写入一行请求
    pub async fn send_line(&mut self, line: &str) -> Result<(), InvokeError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(InvokeError::Io {
                context: "向外部工具写入请求失败".to_string(),
                message: "stdin 已关闭".to_string(),
            });
        };

        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        let written = timeout_at(self.deadline, write).await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(InvokeError::Io {
                context: "向外部工具写入请求失败".to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(self.timed_out()),
        }
    }

    /// 等待下一条回复；输出流关闭时返回 `None`
    pub async fn next_reply(&mut self) -> Result<Option<String>, InvokeError> {
        let received = timeout_at(self.deadline, self.replies.recv()).await;
        match received {
            Ok(reply) => Ok(reply),
            Err(_) => Err(self.timed_out()),
        }
    }

    /// 发送请求并等待回复
    ///
    /// 写入失败或输出流关闭时等待进程退出；非零退出报告为
    /// [`InvokeError::ToolExecutionFailed`]。
    pub async fn request(&mut self, line: &str) -> Result<Option<String>, InvokeError> {
        if let Err(e) = self.send_line(line).await {
            if matches!(e, InvokeError::Io { .. }) {
                self.exit_failure().await?;
            }
            return Err(e);
        }

        let reply = self.next_reply().await?;
        if reply.is_none() {
            self.exit_failure().await?;
        }
        Ok(reply)
    }

    /// 等待已停止通信的进程退出，非零退出时返回错误
    async fn exit_failure(&mut self) -> Result<(), InvokeError> {
        drop(self.stdin.take());

        let status = match timeout_at(self.deadline, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(InvokeError::Io {
                    context: "等待外部工具退出失败".to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => return Err(self.timed_out()),
        };
        if status.success() {
            return Ok(());
        }

        let result = self.collect(status.code()).await;
        warn!(
            exit_code = ?result.exit_code,
            script = %result.script_path.display(),
            "外部工具在会话中途退出"
        );
        Err(InvokeError::ToolExecutionFailed {
            exit_code: result.exit_code,
            stderr: result.stderr,
            script: result.script_path,
        })
    }

    /// 关闭 stdin 并等待进程结束
    pub async fn wait(mut self) -> Result<InvocationResult, InvokeError> {
        drop(self.stdin.take());

        let waited = timeout_at(self.deadline, self.child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(InvokeError::Io {
                    context: "等待外部工具退出失败".to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                let err = self.timed_out();
                let _ = self.child.wait().await;
                return Err(err);
            }
        };

        let result = self.collect(status.code()).await;
        debug!(
            target: "tool",
            exit_code = ?result.exit_code,
            script = %result.script_path.display(),
            "外部工具已退出"
        );

        if !status.success() {
            return Err(InvokeError::ToolExecutionFailed {
                exit_code: result.exit_code,
                stderr: result.stderr,
                script: result.script_path,
            });
        }
        Ok(result)
    }

    /// 强制终止并收集已有输出
    pub async fn kill(mut self) -> InvocationResult {
        drop(self.stdin.take());
        let _ = self.child.kill().await;
        let exit_code = self
            .child
            .try_wait()
            .ok()
            .flatten()
            .and_then(|status| status.code());
        self.collect(exit_code).await
    }

    fn timed_out(&mut self) -> InvokeError {
        let _ = self.child.start_kill();
        warn!(
            script = %self.script_path().display(),
            timeout_secs = self.run_timeout.as_secs(),
            "外部工具超时，已强制终止"
        );
        InvokeError::ToolTimedOut {
            timeout: self.run_timeout,
            script: self.script_path().to_path_buf(),
        }
    }

    async fn collect(&mut self, exit_code: Option<i32>) -> InvocationResult {
        if let Some(collected) = &self.collected {
            return collected.clone();
        }

        let stdout = drain(&mut self.stdout_task).await;
        let stderr = drain(&mut self.stderr_task).await;
        let result = InvocationResult {
            exit_code,
            stdout,
            stderr,
            script_path: self.script_path().to_path_buf(),
        };
        self.collected = Some(result.clone());
        result
    }
}

async fn drain(task: &mut JoinHandle<String>) -> String {
    match timeout(OUTPUT_DRAIN, &mut *task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R, mut on_line: impl FnMut(String)) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(['\r', '\n']).to_string());
            }
        }
    }
}

async fn capture_stdout(stdout: ChildStdout, replies: mpsc::UnboundedSender<String>) -> String {
    let mut captured = String::new();
    read_lines(stdout, |line| {
        if let Some(reply) = line.strip_prefix(REPLY_PREFIX) {
            let _ = replies.send(reply.to_string());
        } else {
            debug!(target: "tool", "{line}");
            captured.push_str(&line);
            captured.push('\n');
        }
    })
    .await;
    captured
}

async fn capture_stderr(stderr: ChildStderr) -> String {
    let mut captured = String::new();
    read_lines(stderr, |line| {
        debug!(target: "tool", "stderr: {line}");
        captured.push_str(&line);
        captured.push('\n');
    })
    .await;
    captured
}
