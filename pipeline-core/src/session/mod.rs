//! # Session 模块
//!
//! 一次调用持有的唯一场景。所有场景操作都通过 [`SceneSession`] 完成，
//! 合并算法只依赖这个 trait，测试中可以用内存实现替换外部工具。

mod blender;

pub use blender::BlenderSession;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SessionError;
use crate::options::{ExportOptions, ImportOptions};

/// 场景对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Armature,
    Mesh,
    Empty,
    #[serde(other)]
    Other,
}

/// 场景中的一个对象
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    pub kind: ObjectKind,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn is_armature(&self) -> bool {
        self.kind == ObjectKind::Armature
    }
}

/// 一次导入引入的全部对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportHandle {
    pub source: PathBuf,
    pub objects: Vec<SceneObject>,
}

impl ImportHandle {
    /// 引入的骨架，按名字排序
    pub fn armatures(&self) -> Vec<&SceneObject> {
        let mut armatures: Vec<_> = self.objects.iter().filter(|o| o.is_armature()).collect();
        armatures.sort_by(|a, b| a.name.cmp(&b.name));
        armatures
    }

    pub fn first_armature(&self) -> Option<&SceneObject> {
        self.armatures().into_iter().next()
    }
}

/// 一个动画片段（Blender action）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipHandle {
    pub name: String,
}

/// 动画片段统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub name: String,
    pub frame_start: f32,
    pub frame_end: f32,
    pub keyframes: usize,
}

/// 场景清单（导出前打印）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneInventory {
    #[serde(default)]
    pub armatures: Vec<String>,
    #[serde(default)]
    pub meshes: usize,
    #[serde(default)]
    pub actions: Vec<ActionSummary>,
}

impl SceneInventory {
    pub fn log(&self, label: &str) {
        debug!(
            label = %label,
            armatures = ?self.armatures,
            meshes = self.meshes,
            actions = self.actions.len(),
            "场景清单"
        );
        for action in &self.actions {
            debug!(
                label = %label,
                action = %action.name,
                frames = %format!("{}..{}", action.frame_start, action.frame_end),
                keyframes = action.keyframes,
                "  动画片段"
            );
        }
    }
}

/// 对单个场景的操作
///
/// 一个实现只对应一个场景，不能在调用之间共享。
#[allow(async_fn_in_trait)]
pub trait SceneSession {
    /// 清空场景
    async fn reset(&mut self) -> Result<(), SessionError>;

    /// 导入模型；失败时工具自行移除不完整的对象
    async fn import(
        &mut self,
        path: &Path,
        options: &ImportOptions,
    ) -> Result<ImportHandle, SessionError>;

    /// 对象当前的动画片段
    async fn active_clip(&mut self, object: &SceneObject)
    -> Result<Option<ClipHandle>, SessionError>;

    /// 把片段改名并保留到基础骨架上，返回实际名字
    async fn retain_clip(
        &mut self,
        base: &SceneObject,
        clip: &ClipHandle,
        name: &str,
    ) -> Result<String, SessionError>;

    /// 删除对象
    async fn discard(&mut self, objects: &[SceneObject]) -> Result<(), SessionError>;

    async fn inspect(&mut self) -> Result<SceneInventory, SessionError>;

    /// 导出整个场景
    async fn export(&mut self, path: &Path, options: &ExportOptions) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_armatures_sorted_by_name() {
        let handle = ImportHandle {
            source: PathBuf::from("/anim/walk.fbx"),
            objects: vec![
                SceneObject::new("Mesh", ObjectKind::Mesh),
                SceneObject::new("Rig_B", ObjectKind::Armature),
                SceneObject::new("Rig_A", ObjectKind::Armature),
            ],
        };
        let names: Vec<_> = handle.armatures().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Rig_A", "Rig_B"]);
        assert_eq!(handle.first_armature().unwrap().name, "Rig_A");
    }

    #[test]
    fn test_unknown_object_kind() {
        let object: SceneObject =
            serde_json::from_str(r#"{ "name": "Cam", "kind": "camera" }"#).unwrap();
        assert_eq!(object.kind, ObjectKind::Other);
        assert!(!object.is_armature());
    }
}
