//! # Discovery 模块
//!
//! 扫描输入目录，生成确定性的任务列表。
//!
//! ## 目录约定
//!
//! ```text
//! fbx/                    fbxAnimation/
//! ├── male_casual/        ├── Ch20_nonPBR.fbx   (基础角色)
//! │   ├── model.fbx       ├── walk.fbx
//! │   └── diffuse.png     └── run.fbx
//! └── female_casual/
//!     └── ...
//! ```
//!
//! 所有列表都按文件名字典序排列，对未变化的目录重复扫描得到完全相同的结果。

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DiscoveryError;
use crate::naming::assign_clip_names;

/// 输出包的扩展名
pub const PACKAGE_EXTENSION: &str = "glb";

/// 输出包路径：`<output_dir>/<name>.glb`
pub fn package_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{name}.{PACKAGE_EXTENSION}"))
}

/// 文件分类规则（扩展名不区分大小写）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default = "default_model_extensions")]
    pub model_extensions: Vec<String>,

    #[serde(default = "default_texture_extensions")]
    pub texture_extensions: Vec<String>,
}

fn default_model_extensions() -> Vec<String> {
    vec!["fbx".to_string()]
}

fn default_texture_extensions() -> Vec<String> {
    vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()]
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            model_extensions: default_model_extensions(),
            texture_extensions: default_texture_extensions(),
        }
    }
}

impl Layout {
    pub fn is_model(&self, path: &Path) -> bool {
        has_extension(path, &self.model_extensions)
    }

    pub fn is_texture(&self, path: &Path) -> bool {
        has_extension(path, &self.texture_extensions)
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// 单个资源文件夹的扫描结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderScan {
    pub name: String,
    pub path: PathBuf,
    pub model_files: Vec<PathBuf>,
    pub texture_files: Vec<PathBuf>,
}

/// 一个可转换的资源单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUnit {
    /// 文件夹名，同时是输出文件的 stem
    pub name: String,
    pub model_source_path: PathBuf,
    /// 贴图等附属文件
    pub auxiliary_files: Vec<PathBuf>,
    pub output_path: PathBuf,
}

/// 列出目录下的文件（不递归），按文件名排序
fn sorted_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// 扫描输入目录的所有直接子目录
///
/// 包括没有模型文件的子目录（`list` 命令需要展示它们）。
pub fn scan_folders(root: &Path, layout: &Layout) -> Result<Vec<FolderScan>, DiscoveryError> {
    let entries = fs::read_dir(root).map_err(|_| DiscoveryError::InputRootMissing {
        path: root.to_path_buf(),
    })?;

    let mut folders = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let files = match sorted_files(&path) {
            Ok(files) => files,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "无法读取资源文件夹，已跳过");
                continue;
            }
        };

        let (model_files, rest): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| layout.is_model(f));
        let texture_files = rest.into_iter().filter(|f| layout.is_texture(f)).collect();

        folders.push(FolderScan {
            name: entry.file_name().to_string_lossy().to_string(),
            path,
            model_files,
            texture_files,
        });
    }

    // 按文件夹名排序，确保顺序稳定
    folders.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(folders)
}

/// 发现所有资源单元
///
/// - 没有模型文件的子目录被排除并记录警告
/// - 有多个模型文件时取字典序第一个并记录警告
pub fn discover(
    root: &Path,
    output_dir: &Path,
    layout: &Layout,
) -> Result<Vec<AssetUnit>, DiscoveryError> {
    let folders = scan_folders(root, layout)?;

    let mut units = Vec::new();
    for folder in folders {
        let Some(model) = folder.model_files.first() else {
            warn!(folder = %folder.path.display(), "文件夹中没有模型文件，已排除");
            continue;
        };

        if folder.model_files.len() > 1 {
            warn!(
                folder = %folder.path.display(),
                count = folder.model_files.len(),
                selected = %model.display(),
                "文件夹中有多个模型文件，使用字典序第一个"
            );
        }

        debug!(unit = %folder.name, model = %model.display(), textures = folder.texture_files.len(), "发现资源单元");
        units.push(AssetUnit {
            output_path: package_path(output_dir, &folder.name),
            model_source_path: model.clone(),
            auxiliary_files: folder.texture_files,
            name: folder.name,
        });
    }

    if units.is_empty() {
        return Err(DiscoveryError::NoAssetUnitsFound {
            root: root.to_path_buf(),
        });
    }

    Ok(units)
}

/// 按名字筛选后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// 选中的单元（保持发现顺序）
    pub units: Vec<AssetUnit>,
    /// 请求了但不存在的名字
    pub unknown: Vec<String>,
}

/// 把发现结果限制到调用方请求的名字
///
/// `requested` 为空时选中全部单元。
pub fn select(units: Vec<AssetUnit>, requested: &[String]) -> Selection {
    if requested.is_empty() {
        return Selection {
            units,
            unknown: Vec::new(),
        };
    }

    let known: HashSet<&str> = units.iter().map(|u| u.name.as_str()).collect();
    let mut unknown: Vec<String> = Vec::new();
    for name in requested {
        if !known.contains(name.as_str()) && !unknown.contains(name) {
            warn!(name = %name, "请求的资源不存在，已忽略");
            unknown.push(name.clone());
        }
    }

    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let units = units
        .into_iter()
        .filter(|u| wanted.contains(u.name.as_str()))
        .collect();

    Selection { units, unknown }
}

/// 接收动画的基础角色
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseCharacter {
    pub path: PathBuf,
    pub display_name: String,
}

/// 一个动画源文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationSource {
    pub path: PathBuf,
    /// 在本次运行中唯一的片段名
    pub clip_name: String,
}

/// 一次动画合并运行的输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationRun {
    pub base: BaseCharacter,
    pub sources: Vec<AnimationSource>,
}

impl AnimationRun {
    /// 合并结果路径：`<output_dir>/<基础角色名>_with_animations.glb`
    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        package_path(
            output_dir,
            &format!("{}_with_animations", self.base.display_name),
        )
    }

    /// 本次运行会读取的全部文件
    pub fn input_paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.base.path.as_path())
            .chain(self.sources.iter().map(|s| s.path.as_path()))
    }
}

/// 在已列出的模型文件中找到基础角色
///
/// 精确匹配优先；否则忽略 ASCII 大小写匹配（大小写不敏感的文件系统上
/// 两种写法指向同一个文件）。
fn resolve_base(model_files: &[PathBuf], base_file_name: &str) -> Option<PathBuf> {
    let names: Vec<(&PathBuf, String)> = model_files.iter().map(|p| (p, file_name_of(p))).collect();
    names
        .iter()
        .find(|(_, name)| name == base_file_name)
        .or_else(|| {
            names
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(base_file_name))
        })
        .map(|(path, _)| (*path).clone())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 发现一次动画合并运行
///
/// 动画源是 `anim_root` 下（不递归）除基础角色外的全部模型文件，按文件名排序。
pub fn discover_animation_run(
    anim_root: &Path,
    base_file_name: &str,
    layout: &Layout,
) -> Result<AnimationRun, DiscoveryError> {
    let files = sorted_files(anim_root).map_err(|_| DiscoveryError::InputRootMissing {
        path: anim_root.to_path_buf(),
    })?;
    let model_files: Vec<PathBuf> = files.into_iter().filter(|f| layout.is_model(f)).collect();

    let Some(base_path) = resolve_base(&model_files, base_file_name) else {
        let candidates = model_files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect();
        return Err(DiscoveryError::BaseCharacterMissing {
            path: anim_root.join(base_file_name),
            candidates,
        });
    };

    let source_paths: Vec<PathBuf> = model_files
        .into_iter()
        .filter(|p| *p != base_path)
        .collect();

    if source_paths.is_empty() {
        return Err(DiscoveryError::NoAnimationSources {
            root: anim_root.to_path_buf(),
            base: file_name_of(&base_path),
        });
    }

    let clip_names = assign_clip_names(&source_paths);
    let sources = source_paths
        .into_iter()
        .zip(clip_names)
        .map(|(path, clip_name)| AnimationSource { path, clip_name })
        .collect();

    Ok(AnimationRun {
        base: BaseCharacter {
            display_name: crate::naming::clip_stem(&base_path),
            path: base_path,
        },
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> AssetUnit {
        AssetUnit {
            name: name.to_string(),
            model_source_path: PathBuf::from(format!("/in/{name}/{name}.fbx")),
            auxiliary_files: Vec::new(),
            output_path: PathBuf::from(format!("/out/{name}.glb")),
        }
    }

    #[test]
    fn test_layout_extension_is_case_insensitive() {
        let layout = Layout::default();
        assert!(layout.is_model(Path::new("a/Hero.FBX")));
        assert!(layout.is_texture(Path::new("a/skin.JPeG")));
        assert!(!layout.is_model(Path::new("a/readme.txt")));
        assert!(!layout.is_model(Path::new("a/fbx")));
    }

    #[test]
    fn test_select_reports_unknown_and_keeps_order() {
        let units = vec![unit("a"), unit("b"), unit("c")];
        let requested = vec!["c".to_string(), "zzz".to_string(), "a".to_string()];
        let selection = select(units, &requested);

        let names: Vec<_> = selection.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(selection.unknown, vec!["zzz".to_string()]);
    }

    #[test]
    fn test_select_empty_request_keeps_all() {
        let selection = select(vec![unit("a"), unit("b")], &[]);
        assert_eq!(selection.units.len(), 2);
        assert!(selection.unknown.is_empty());
    }

    #[test]
    fn test_select_duplicate_request_selects_once() {
        let requested = vec!["a".to_string(), "a".to_string(), "x".to_string(), "x".to_string()];
        let selection = select(vec![unit("a"), unit("b")], &requested);
        assert_eq!(selection.units.len(), 1);
        assert_eq!(selection.unknown, vec!["x".to_string()]);
    }

    #[test]
    fn test_output_path_for_animation_run() {
        let run = AnimationRun {
            base: BaseCharacter {
                path: PathBuf::from("/anim/Ch20_nonPBR.fbx"),
                display_name: "Ch20_nonPBR".to_string(),
            },
            sources: Vec::new(),
        };
        assert_eq!(
            run.output_path(Path::new("/out")),
            PathBuf::from("/out/Ch20_nonPBR_with_animations.glb")
        );
    }
}
