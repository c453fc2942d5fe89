//! 基于 worker 程序的场景会话

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ClipHandle, ImportHandle, SceneInventory, SceneObject, SceneSession};
use crate::error::{InvokeError, SessionError};
use crate::invoke::{InvocationResult, Invoker, RunningTool, WorkDescriptor, WorkerProgram};
use crate::options::{ExportOptions, ImportOptions};

/// 发给 worker 的请求（每行一个）
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Reset,
    Import {
        path: &'a Path,
        options: &'a ImportOptions,
    },
    ActiveClip {
        object: &'a str,
    },
    RetainClip {
        base: &'a str,
        clip: &'a str,
        name: &'a str,
    },
    Discard {
        objects: Vec<&'a str>,
    },
    Inspect,
    Export {
        path: &'a Path,
        options: &'a ExportOptions,
    },
    Quit,
}

impl Request<'_> {
    fn op(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Import { .. } => "import",
            Self::ActiveClip { .. } => "active_clip",
            Self::RetainClip { .. } => "retain_clip",
            Self::Discard { .. } => "discard",
            Self::Inspect => "inspect",
            Self::Export { .. } => "export",
            Self::Quit => "quit",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ImportedObjects {
    objects: Vec<SceneObject>,
}

#[derive(Debug, Deserialize)]
struct RetainedName {
    name: String,
}

/// 解析一行回复
fn decode_reply(op: &'static str, line: Option<String>) -> Result<serde_json::Value, SessionError> {
    let Some(line) = line else {
        return Err(SessionError::Protocol {
            op,
            message: "工具在回复前关闭了输出".to_string(),
        });
    };

    let reply: Reply = serde_json::from_str(&line).map_err(|e| SessionError::Protocol {
        op,
        message: format!("无法解析回复 '{line}': {e}"),
    })?;

    if !reply.ok {
        return Err(SessionError::Rejected {
            op,
            message: reply.error.unwrap_or_else(|| "未知错误".to_string()),
        });
    }
    Ok(reply.data)
}

/// 驱动 Blender 中运行的 worker 程序
///
/// 不可克隆；[`finish`](Self::finish) 和 [`abort`](Self::abort) 消耗会话。
#[derive(Debug)]
pub struct BlenderSession {
    tool: RunningTool,
    label: String,
}

impl BlenderSession {
    /// 合成 worker 程序并启动工具
    pub fn open(invoker: &Invoker, descriptor: &WorkDescriptor) -> Result<Self, InvokeError> {
        let program = WorkerProgram::session(descriptor);
        let tool = invoker.spawn(&program)?;
        Ok(Self {
            tool,
            label: descriptor.label.clone(),
        })
    }

    async fn call<T: DeserializeOwned>(&mut self, request: Request<'_>) -> Result<T, SessionError> {
        let op = request.op();
        let line = serde_json::to_string(&request).map_err(|e| SessionError::Protocol {
            op,
            message: format!("请求编码失败: {e}"),
        })?;

        debug!(label = %self.label, op, "发送请求");
        let reply = self.tool.request(&line).await?;
        let data = decode_reply(op, reply)?;

        serde_json::from_value(data).map_err(|e| SessionError::Protocol {
            op,
            message: format!("回复数据格式错误: {e}"),
        })
    }

    /// 请求 worker 退出并等待进程结束
    pub async fn finish(mut self) -> Result<InvocationResult, SessionError> {
        self.call::<()>(Request::Quit).await?;
        Ok(self.tool.wait().await?)
    }

    /// 强制终止
    pub async fn abort(self) -> InvocationResult {
        self.tool.kill().await
    }
}

impl SceneSession for BlenderSession {
    async fn reset(&mut self) -> Result<(), SessionError> {
        self.call(Request::Reset).await
    }

    async fn import(
        &mut self,
        path: &Path,
        options: &ImportOptions,
    ) -> Result<ImportHandle, SessionError> {
        let imported: ImportedObjects = self.call(Request::Import { path, options }).await?;
        Ok(ImportHandle {
            source: path.to_path_buf(),
            objects: imported.objects,
        })
    }

    async fn active_clip(
        &mut self,
        object: &SceneObject,
    ) -> Result<Option<ClipHandle>, SessionError> {
        self.call(Request::ActiveClip {
            object: &object.name,
        })
        .await
    }

    async fn retain_clip(
        &mut self,
        base: &SceneObject,
        clip: &ClipHandle,
        name: &str,
    ) -> Result<String, SessionError> {
        let retained: RetainedName = self
            .call(Request::RetainClip {
                base: &base.name,
                clip: &clip.name,
                name,
            })
            .await?;
        Ok(retained.name)
    }

    async fn discard(&mut self, objects: &[SceneObject]) -> Result<(), SessionError> {
        let objects = objects.iter().map(|o| o.name.as_str()).collect();
        self.call(Request::Discard { objects }).await
    }

    async fn inspect(&mut self) -> Result<SceneInventory, SessionError> {
        self.call(Request::Inspect).await
    }

    async fn export(&mut self, path: &Path, options: &ExportOptions) -> Result<(), SessionError> {
        self.call(Request::Export { path, options }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ObjectKind;

    #[test]
    fn test_request_is_tagged_by_op() {
        let json = serde_json::to_value(Request::RetainClip {
            base: "Armature",
            clip: "mixamo.com",
            name: "walk",
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "op": "retain_clip", "base": "Armature", "clip": "mixamo.com", "name": "walk" })
        );

        let json = serde_json::to_value(Request::Quit).unwrap();
        assert_eq!(json, serde_json::json!({ "op": "quit" }));
    }

    #[test]
    fn test_import_request_carries_options() {
        let options = ImportOptions::default();
        let json = serde_json::to_value(Request::Import {
            path: Path::new("/anim/walk.fbx"),
            options: &options,
        })
        .unwrap();
        assert_eq!(json["op"], "import");
        assert_eq!(json["path"], "/anim/walk.fbx");
        assert_eq!(json["options"]["axis_up"], "Y");
    }

    #[test]
    fn test_decode_ok_reply() {
        let data = decode_reply(
            "import",
            Some(r#"{"ok": true, "data": {"objects": [{"name": "Armature", "kind": "armature"}]}}"#.to_string()),
        )
        .unwrap();
        let imported: ImportedObjects = serde_json::from_value(data).unwrap();
        assert_eq!(imported.objects, vec![SceneObject::new("Armature", ObjectKind::Armature)]);
    }

    #[test]
    fn test_decode_empty_ok_reply_as_unit() {
        let data = decode_reply("reset", Some(r#"{"ok": true}"#.to_string())).unwrap();
        let (): () = serde_json::from_value(data).unwrap();
    }

    #[test]
    fn test_decode_rejected_reply() {
        let err = decode_reply(
            "import",
            Some(r#"{"ok": false, "error": "RuntimeError: bad file"}"#.to_string()),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SessionError::Rejected {
                op: "import",
                message: "RuntimeError: bad file".to_string(),
            }
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_decode_malformed_or_missing_reply_is_fatal() {
        let err = decode_reply("inspect", Some("not json".to_string())).unwrap_err();
        assert!(matches!(err, SessionError::Protocol { op: "inspect", .. }));
        assert!(err.is_fatal());

        let err = decode_reply("export", None).unwrap_err();
        assert!(matches!(err, SessionError::Protocol { op: "export", .. }));
    }
}
