//! worker 程序合成
//!
//! worker 是在外部工具内运行的命令循环：每行 stdin 是一个 JSON 请求，
//! 每个请求产生一行以 [`REPLY_PREFIX`] 开头的回复。
//! 本次调用允许读写的绝对路径在合成时写入程序文本，worker 拒绝其他路径。

use serde::Serialize;

use super::REPLY_PREFIX;

/// 一个待执行的 worker 程序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProgram {
    /// 日志中使用的名字
    pub label: String,
    pub text: String,
    /// 文件扩展名（不含点）
    pub extension: String,
}

/// 一次调用涉及的路径
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkDescriptor {
    pub label: String,
    /// 允许导入的文件（绝对路径）
    pub inputs: Vec<String>,
    /// 唯一允许写出的文件（绝对路径）
    pub output: String,
}

impl WorkerProgram {
    pub fn new(label: impl Into<String>, text: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
            extension: extension.into(),
        }
    }

    /// 合成场景会话 worker（Blender Python）
    pub fn session(descriptor: &WorkDescriptor) -> Self {
        // 描述符先编码成 JSON 文本，再编码成字符串字面量；JSON 字符串同时是合法的 Python 字面量
        let literal = serde_json::to_string(descriptor)
            .and_then(|json| serde_json::to_string(&json))
            .unwrap_or_else(|_| "\"{}\"".to_string());
        let prefix = serde_json::to_string(REPLY_PREFIX).unwrap_or_else(|_| "\"\"".to_string());

        let text = SESSION_TEMPLATE
            .replace("__DESCRIPTOR__", &literal)
            .replace("__PREFIX__", &prefix);
        Self::new(descriptor.label.clone(), text, "py")
    }
}

const SESSION_TEMPLATE: &str = r#"import json
import os
import sys
import traceback

import bpy

DESCRIPTOR = json.loads(__DESCRIPTOR__)
PREFIX = __PREFIX__
ALLOWED_INPUTS = set(DESCRIPTOR["inputs"])
OUTPUT = DESCRIPTOR["output"]


def reply(ok, data=None, error=None):
    message = {"ok": ok}
    if data is not None:
        message["data"] = data
    if error is not None:
        message["error"] = error
    print(PREFIX + json.dumps(message), flush=True)


def filter_options(operator, options):
    known = operator.get_rna_type().properties.keys()
    return {key: value for key, value in options.items() if key in known}


def describe(obj):
    return {"name": obj.name, "kind": obj.type.lower()}


def find_object(name):
    obj = bpy.data.objects.get(name)
    if obj is None:
        raise KeyError("object not found: " + name)
    return obj


def remove_objects_except(before):
    for obj in [o for o in bpy.data.objects if o.name not in before]:
        bpy.data.objects.remove(obj, do_unlink=True)


def importer_for(path):
    ext = os.path.splitext(path)[1].lower()
    if ext == ".fbx":
        return bpy.ops.import_scene.fbx, True
    if ext == ".obj":
        return bpy.ops.wm.obj_import, False
    if ext in (".gltf", ".glb"):
        return bpy.ops.import_scene.gltf, False
    raise ValueError("unsupported model format: " + ext)


def op_reset(request):
    bpy.ops.wm.read_factory_settings(use_empty=True)


def op_import(request):
    path = request["path"]
    if path not in ALLOWED_INPUTS:
        raise PermissionError("path not declared for this invocation: " + path)
    operator, takes_options = importer_for(path)
    options = filter_options(operator, request.get("options") or {}) if takes_options else {}

    before = set(bpy.data.objects.keys())
    try:
        result = operator(filepath=path, **options)
    except Exception:
        remove_objects_except(before)
        raise
    if "FINISHED" not in result:
        remove_objects_except(before)
        raise RuntimeError("importer returned " + ",".join(sorted(result)))

    return {"objects": [describe(o) for o in bpy.data.objects if o.name not in before]}


def op_active_clip(request):
    obj = find_object(request["object"])
    animation = obj.animation_data
    if animation is None or animation.action is None:
        return None
    return {"name": animation.action.name}


def op_retain_clip(request):
    base = find_object(request["base"])
    action = bpy.data.actions.get(request["clip"])
    if action is None:
        raise KeyError("action not found: " + request["clip"])

    action.name = request["name"]
    action.use_fake_user = True
    for obj in bpy.data.objects:
        if obj is not base and obj.animation_data and obj.animation_data.action == action:
            obj.animation_data.action = None

    animation = base.animation_data or base.animation_data_create()
    track = animation.nla_tracks.new()
    track.name = action.name
    strip = track.strips.new(action.name, int(action.frame_range[0]), action)
    strip.name = action.name
    return {"name": action.name}


def op_discard(request):
    for name in request["objects"]:
        obj = bpy.data.objects.get(name)
        if obj is not None:
            bpy.data.objects.remove(obj, do_unlink=True)
    try:
        bpy.ops.outliner.orphans_purge(do_recursive=True)
    except Exception:
        pass


def op_inspect(request):
    actions = []
    for action in bpy.data.actions:
        keyframes = sum(len(curve.keyframe_points) for curve in action.fcurves)
        start, end = action.frame_range
        actions.append({
            "name": action.name,
            "frame_start": float(start),
            "frame_end": float(end),
            "keyframes": keyframes,
        })
    return {
        "armatures": sorted(o.name for o in bpy.data.objects if o.type == "ARMATURE"),
        "meshes": sum(1 for o in bpy.data.objects if o.type == "MESH"),
        "actions": actions,
    }


def op_export(request):
    path = request["path"]
    if path != OUTPUT:
        raise PermissionError("output not declared for this invocation: " + path)
    os.makedirs(os.path.dirname(path), exist_ok=True)
    operator = bpy.ops.export_scene.gltf
    options = filter_options(operator, request.get("options") or {})
    result = operator(filepath=path, **options)
    if "FINISHED" not in result:
        raise RuntimeError("exporter returned " + ",".join(sorted(result)))
    if not os.path.isfile(path):
        raise RuntimeError("exporter finished but wrote nothing: " + path)


HANDLERS = {
    "reset": op_reset,
    "import": op_import,
    "active_clip": op_active_clip,
    "retain_clip": op_retain_clip,
    "discard": op_discard,
    "inspect": op_inspect,
    "export": op_export,
}


def main():
    print("worker ready: " + DESCRIPTOR["label"], flush=True)
    while True:
        line = sys.stdin.readline()
        if not line:
            return
        line = line.strip()
        if not line:
            continue
        try:
            request = json.loads(line)
        except ValueError as e:
            reply(False, error="malformed request: " + str(e))
            continue

        op = request.get("op")
        if op == "quit":
            reply(True)
            return
        handler = HANDLERS.get(op)
        if handler is None:
            reply(False, error="unknown op: " + str(op))
            continue
        try:
            reply(True, data=handler(request))
        except Exception as e:
            traceback.print_exc(file=sys.stderr)
            sys.stderr.flush()
            reply(False, error="%s: %s" % (type(e).__name__, e))


main()
"#;
