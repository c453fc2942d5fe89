//! 动画片段命名

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// 从文件名派生片段名（取文件 stem）
pub fn clip_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "clip".to_string())
}

/// 片段名分配器
///
/// 同名时追加递增后缀：`walk`、`walk_2`、`walk_3`……
/// 后缀候选本身已被占用时继续递增。
#[derive(Debug, Clone, Default)]
pub struct ClipNamer {
    taken: HashSet<String>,
}

impl ClipNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 申请一个名字，返回实际分配到的唯一名字
    pub fn claim(&mut self, wanted: &str) -> String {
        if self.taken.insert(wanted.to_string()) {
            return wanted.to_string();
        }

        let mut counter = 2;
        loop {
            let candidate = format!("{wanted}_{counter}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// 标记名字已被占用（如工具自行改名后的结果）
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    /// 释放一个未被使用的名字
    pub fn release(&mut self, name: &str) {
        self.taken.remove(name);
    }
}

/// 按顺序为一组动画文件分配唯一片段名
pub fn assign_clip_names(paths: &[PathBuf]) -> Vec<String> {
    let mut namer = ClipNamer::new();
    paths.iter().map(|p| namer.claim(&clip_stem(p))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_stems_are_disambiguated() {
        let paths = vec![
            PathBuf::from("/anim/a/walk.fbx"),
            PathBuf::from("/anim/run.fbx"),
            PathBuf::from("/anim/b/walk.fbx"),
        ];
        let names = assign_clip_names(&paths);
        assert_eq!(names[0], "walk");
        assert_eq!(names[1], "run");
        assert_ne!(names[2], "walk");
        assert_eq!(names[2], "walk_2");
    }

    #[test]
    fn test_suffix_skips_taken_candidates() {
        let mut namer = ClipNamer::new();
        assert_eq!(namer.claim("walk_2"), "walk_2");
        assert_eq!(namer.claim("walk"), "walk");
        assert_eq!(namer.claim("walk"), "walk_3");
    }

    #[test]
    fn test_release_frees_name() {
        let mut namer = ClipNamer::new();
        assert_eq!(namer.claim("idle"), "idle");
        namer.release("idle");
        assert_eq!(namer.claim("idle"), "idle");
    }

    #[test]
    fn test_clip_stem() {
        assert_eq!(clip_stem(Path::new("/x/Jump Attack.fbx")), "Jump Attack");
        assert_eq!(clip_stem(Path::new("/x/walk.anim.fbx")), "walk.anim");
    }
}
