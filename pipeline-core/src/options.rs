//! # Options 模块
//!
//! 传给外部工具导入/导出算子的参数。
//!
//! 字段名与 Blender 算子的关键字参数一一对应，worker 程序直接以 `**options`
//! 展开调用；本 crate 只负责组装，不解释其中的含义。

use serde::{Deserialize, Serialize};

/// FBX 导入参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// 导入动画
    pub use_anim: bool,
    /// 动画偏移
    pub anim_offset: f32,
    pub use_subsurf: bool,
    pub use_custom_normals: bool,
    /// 在子目录中搜索贴图
    pub use_image_search: bool,
    pub use_alpha_decals: bool,
    pub decal_offset: f32,
    pub use_prepost_rot: bool,
    /// 前向轴
    pub axis_forward: String,
    /// 向上轴
    pub axis_up: String,
    /// 全局缩放
    pub global_scale: f32,
    pub bake_space_transform: bool,
    pub force_connect_children: bool,
    pub automatic_bone_orientation: bool,
    pub primary_bone_axis: String,
    pub secondary_bone_axis: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            use_anim: true,
            anim_offset: 1.0,
            use_subsurf: false,
            use_custom_normals: true,
            use_image_search: true,
            use_alpha_decals: false,
            decal_offset: 0.0,
            use_prepost_rot: true,
            axis_forward: "-Z".to_string(),
            axis_up: "Y".to_string(),
            global_scale: 1.0,
            bake_space_transform: false,
            force_connect_children: false,
            automatic_bone_orientation: false,
            primary_bone_axis: "Y".to_string(),
            secondary_bone_axis: "X".to_string(),
        }
    }
}

/// glTF 导出参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// 输出格式（GLB / GLTF_SEPARATE）
    pub export_format: String,
    pub export_texcoords: bool,
    pub export_normals: bool,
    /// 材质导出模式（EXPORT / PLACEHOLDER / NONE）
    pub export_materials: String,
    pub export_image_format: String,
    pub export_cameras: bool,
    pub export_lights: bool,
    /// Y 轴向上
    pub export_yup: bool,
    /// 烘焙修改器
    pub export_apply: bool,
    pub export_animations: bool,
    pub export_frame_range: bool,
    pub export_force_sampling: bool,
    /// 每条 NLA 轨道导出为独立动画
    pub export_nla_strips: bool,
    pub export_def_bones: bool,
    pub export_current_frame: bool,
    /// 导出骨骼蒙皮
    pub export_skins: bool,
    pub export_all_influences: bool,
    /// 导出形态键
    pub export_morph: bool,
    pub export_optimize_animation_size: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            export_format: "GLB".to_string(),
            export_texcoords: true,
            export_normals: true,
            export_materials: "EXPORT".to_string(),
            export_image_format: "AUTO".to_string(),
            export_cameras: false,
            export_lights: false,
            export_yup: true,
            export_apply: true,
            export_animations: true,
            export_frame_range: false,
            export_force_sampling: false,
            export_nla_strips: true,
            export_def_bones: false,
            export_current_frame: false,
            export_skins: true,
            export_all_influences: false,
            export_morph: true,
            export_optimize_animation_size: true,
        }
    }
}

/// 一次导出所需的全部参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    #[serde(default)]
    pub import: ImportOptions,
    #[serde(default)]
    pub export: ExportOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_export_options_keep_defaults() {
        let options: ExportOptions =
            serde_json::from_str(r#"{ "export_morph": false }"#).unwrap();
        assert!(!options.export_morph);
        assert_eq!(options.export_format, "GLB");
        assert!(options.export_nla_strips);
    }

    #[test]
    fn test_import_options_serialize_as_keywords() {
        let json = serde_json::to_value(ImportOptions::default()).unwrap();
        assert_eq!(json["axis_forward"], "-Z");
        assert_eq!(json["use_anim"], true);
    }
}
