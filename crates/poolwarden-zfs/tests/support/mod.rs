#![allow(dead_code)]

use poolwarden_core::config::WardenConfig;
use poolwarden_zfs::ZfsManager;
use serde_json::{json, Value};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

/// One script serves as both `zfs` and `zpool`; it picks its role from its
/// file name and keeps state in `state.json` beside itself.
const FAKE_SCRIPT: &str = r##"#!/usr/bin/env python3
import json
import os
import sys
import time

HERE = os.path.dirname(os.path.abspath(__file__))
STATE = os.path.join(HERE, "state.json")
TOOL = os.path.basename(__file__).split(".")[0]

with open(STATE, "r", encoding="utf-8") as fh:
    state = json.load(fh)

args = sys.argv[1:]
with open(os.path.join(HERE, "calls.log"), "a", encoding="utf-8") as fh:
    fh.write(json.dumps([TOOL] + args) + "\n")

if state.get("delay"):
    time.sleep(state["delay"])


def save():
    with open(STATE, "w", encoding="utf-8") as fh:
        json.dump(state, fh)


def fail(msg, code=1):
    print(msg, file=sys.stderr)
    sys.exit(code)


def split(rest, valued=(), flags=()):
    opts, pos, i = {}, [], 0
    while i < len(rest):
        a = rest[i]
        if a in valued:
            opts.setdefault(a, []).append(rest[i + 1])
            i += 2
        elif a in flags:
            opts[a] = True
            i += 1
        else:
            pos.append(a)
            i += 1
    return opts, pos


def props_of(opts):
    return dict(kv.split("=", 1) for kv in opts.get("-o", []))


def need_dataset(name):
    if name not in state["datasets"]:
        fail(f"cannot open '{name}': dataset does not exist")


def need_snapshot(name):
    if not any(s["name"] == name for s in state["snapshots"]):
        fail(f"cannot open '{name}': dataset does not exist")


def need_pool(name):
    if name not in state["pools"]:
        fail(f"cannot open '{name}': no such pool")


def tick():
    state["clock"] = state.get("clock", 100) + 1
    return str(state["clock"])


def emit(rows, cols):
    for row in rows:
        print("\t".join(str(row.get(c, "-")) for c in cols))


def zfs_list(rest):
    opts, pos = split(rest, ("-o", "-t", "-d", "-s"), ("-H", "-p", "-r"))
    cols = opts["-o"][0].split(",")
    types = opts.get("-t", ["filesystem"])[0].split(",")
    scope = pos[0] if pos else None
    if scope is not None:
        need_dataset(scope)
    direct = "-d" in opts and scope is not None
    rows = []
    for name, ds in state["datasets"].items():
        if ds["type"] in types:
            rows.append({"name": name, "type": ds["type"]})
    # dataset scope is not honored, so stray entries leak into scoped listings
    if "filesystem" in types:
        for name in state.get("stray", []):
            rows.append({"name": name, "type": "filesystem"})
    if "snapshot" in types:
        for snap in sorted(state["snapshots"], key=lambda s: int(s["creation"])):
            if direct and snap["name"].split("@")[0] != scope:
                continue
            rows.append(dict(snap, type="snapshot"))
    if "bookmark" in types:
        for mark in state["bookmarks"]:
            if direct and mark["name"].split("#")[0] != scope:
                continue
            rows.append(dict(mark, type="bookmark"))
    emit(rows, cols)


def zfs_get(rest):
    target = rest[-1]
    if target in state.get("broken", []):
        fail(f"cannot get properties of '{target}': I/O error")
    if target in state["datasets"]:
        ds = state["datasets"][target]
        props = dict(ds.get("props", {}))
        props["type"] = ds["type"]
    else:
        need_snapshot(target)
        props = {"type": "snapshot"}
    for key, value in props.items():
        print(f"{key}\t{value}")


def zfs_set(rest):
    assignment, target = rest
    key, value = assignment.split("=", 1)
    need_dataset(target)
    if key in state.get("readonly", []):
        fail(f"cannot set property for '{target}': '{key}' is readonly")
    state["datasets"][target].setdefault("props", {})[key] = value
    save()


def zfs_create(rest):
    opts, pos = split(rest, ("-o", "-V"), ("-p",))
    name = pos[0]
    props = props_of(opts)
    kind = "filesystem"
    if "-V" in opts:
        kind = "volume"
        props["volsize"] = opts["-V"][0]
    state["datasets"][name] = {"type": kind, "props": props}
    save()


def zfs_destroy(rest):
    opts, pos = split(rest, (), ("-r", "-f"))
    name = pos[0]
    if "@" in name:
        need_snapshot(name)
        state["snapshots"] = [s for s in state["snapshots"] if s["name"] != name]
    else:
        need_dataset(name)
        doomed = [d for d in state["datasets"] if d == name or d.startswith(name + "/")]
        if len(doomed) > 1 and "-r" not in opts:
            fail(f"cannot destroy '{name}': filesystem has children")
        for d in doomed:
            del state["datasets"][d]
        state["snapshots"] = [s for s in state["snapshots"] if s["name"].split("@")[0] not in doomed]
    save()


def zfs_snapshot(rest):
    opts, pos = split(rest, ("-o",), ("-r",))
    name = pos[0]
    need_dataset(name.split("@")[0])
    if any(s["name"] == name for s in state["snapshots"]):
        fail(f"cannot create snapshot '{name}': dataset already exists")
    state["snapshots"].append({"name": name, "creation": tick(), "used": "0B", "refer": "96K"})
    save()


def zfs_rollback(rest):
    opts, pos = split(rest, (), ("-r", "-f", "-R"))
    name = pos[0]
    need_snapshot(name)
    dataset = name.split("@")[0]
    creation = next(int(s["creation"]) for s in state["snapshots"] if s["name"] == name)
    newer = [s for s in state["snapshots"]
             if s["name"].split("@")[0] == dataset and int(s["creation"]) > creation]
    if newer and "-r" not in opts:
        fail(f"cannot rollback to '{name}': more recent snapshots or bookmarks exist")
    state["snapshots"] = [s for s in state["snapshots"] if s not in newer]
    save()


def zfs_bookmark(rest):
    snapshot, mark = rest
    need_snapshot(snapshot)
    state["bookmarks"].append({"name": mark, "creation": tick()})
    save()


def zfs_clone(rest):
    opts, pos = split(rest, ("-o",), ("-p",))
    snapshot, target = pos
    need_snapshot(snapshot)
    props = props_of(opts)
    props["origin"] = snapshot
    state["datasets"][target] = {"type": "filesystem", "props": props}
    save()


def zfs_rename(rest):
    opts, pos = split(rest, (), ("-r", "-f", "-p"))
    src, dst = pos
    need_dataset(src)
    state["datasets"][dst] = state["datasets"].pop(src)
    for snap in state["snapshots"]:
        ds, _, tag = snap["name"].partition("@")
        if ds == src:
            snap["name"] = f"{dst}@{tag}"
    save()


def zfs_mount(rest, mounted):
    name = rest[-1]
    need_dataset(name)
    state["datasets"][name].setdefault("props", {})["mounted"] = mounted
    save()


def zfs_space(rest):
    need_dataset(rest[-1])
    print("root\t1.5K\tnone")
    print("alice\t20M\t1G")


def zfs_send(rest):
    opts, pos = split(rest, ("-t", "-I", "-i"), ("--raw", "-c", "-w"))
    if "-t" not in opts:
        need_snapshot(pos[0])
    sys.stdout.buffer.write(b"STREAM" * state.get("stream_chunks", 1024))


def zfs_receive(rest):
    opts, pos = split(rest, (), ("-F", "-u", "-v"))
    target = pos[0]
    data = sys.stdin.buffer.read()
    state.setdefault("received", {})[target] = len(data)
    state["datasets"].setdefault(target, {"type": "filesystem", "props": {}})
    save()
    if "-v" in opts:
        print(f"received {len(data)}B stream into {target}")


def zfs_main():
    sub, rest = args[0], args[1:]
    if sub == "list":
        zfs_list(rest)
    elif sub == "get":
        zfs_get(rest)
    elif sub == "set":
        zfs_set(rest)
    elif sub == "create":
        zfs_create(rest)
    elif sub == "destroy":
        zfs_destroy(rest)
    elif sub == "snapshot":
        zfs_snapshot(rest)
    elif sub == "rollback":
        zfs_rollback(rest)
    elif sub == "bookmark":
        zfs_bookmark(rest)
    elif sub == "clone":
        zfs_clone(rest)
    elif sub == "promote":
        need_dataset(rest[0])
    elif sub == "rename":
        zfs_rename(rest)
    elif sub == "mount":
        zfs_mount(rest, "yes")
    elif sub == "unmount":
        zfs_mount(rest, "no")
    elif sub in ("userspace", "groupspace"):
        zfs_space(rest)
    elif sub == "diff":
        need_snapshot(rest[0])
        print("M\t/tank/data/")
        print("+\t/tank/data/new.txt")
    elif sub == "send":
        zfs_send(rest)
    elif sub == "receive":
        zfs_receive(rest)
    else:
        fail("unexpected args: " + " ".join(args), 2)


def zpool_main():
    sub, rest = args[0], args[1:]
    pools = state["pools"]
    if sub == "list":
        for name, pool in pools.items():
            print(f"{name}\t{pool['guid']}\t{pool['health']}")
    elif sub == "get":
        opts, pos = split(rest, ("-o",), ("-H", "-p"))
        keys, name = pos
        need_pool(name)
        pool = pools[name]
        if opts["-o"][0] == "name,property,value,source":
            for key, value in pool.get("props", {}).items():
                print(f"{name}\t{key}\t{value}\tlocal")
            for key, value in pool.get("features", {}).items():
                print(f"{name}\tfeature@{key}\t{value}\tlocal")
        else:
            for key in keys.split(","):
                if key in pool.get("props", {}):
                    print(f"{key}\t{pool['props'][key]}")
    elif sub == "status":
        name = rest[-1]
        need_pool(name)
        print(f"  pool: {name}\n state: {pools[name]['health']}\nconfig:\n\n\t{name}\tONLINE\n\nerrors: No known data errors")
    elif sub == "iostat":
        print("              capacity     operations     bandwidth")
        print("pool        alloc   free   read  write   read  write")
        for name in pools:
            print(f"{name}        1.2G  8.8G      0      1    512  4.0K")
    elif sub == "create":
        opts, pos = split(rest, ("-o", "-R"), ("-f",))
        name, devices = pos[0], pos[1:]
        if name in pools:
            fail(f"cannot create '{name}': pool already exists")
        pools[name] = {"guid": str(9000 + len(pools)), "health": "ONLINE",
                       "props": props_of(opts), "devices": devices}
        state["datasets"][name] = {"type": "filesystem", "props": {}}
        save()
    elif sub == "destroy":
        name = rest[-1]
        need_pool(name)
        del pools[name]
        for ds in [d for d in state["datasets"] if d == name or d.startswith(name + "/")]:
            del state["datasets"][ds]
        save()
    elif sub == "export":
        name = rest[-1]
        need_pool(name)
        state.setdefault("exported", {})[name] = pools.pop(name)
        save()
    elif sub == "import":
        opts, pos = split(rest, ("-d", "-o"), ("-f",))
        exported = state.setdefault("exported", {})
        if not pos:
            for name in exported:
                print(f"   pool: {name}\n     id: {exported[name]['guid']}")
            return
        name = pos[0]
        if name not in exported:
            fail(f"cannot import '{name}': no such pool available")
        pools[name] = exported.pop(name)
        save()
    elif sub == "scrub":
        need_pool(rest[-1])
    elif sub == "clear":
        need_pool(rest[0])
    elif sub == "replace":
        opts, pos = split(rest, (), ("-f",))
        name, old = pos[0], pos[1]
        need_pool(name)
        devices = pools[name].setdefault("devices", [])
        if old not in devices:
            fail(f"cannot replace {old}: no such device in pool")
        if len(pos) > 2:
            devices[devices.index(old)] = pos[2]
        save()
    elif sub == "add":
        opts, pos = split(rest, (), ("-f",))
        name = pos[0]
        need_pool(name)
        pools[name].setdefault("devices", []).extend(pos[1:])
        save()
    elif sub == "set":
        assignment, name = rest
        need_pool(name)
        key, value = assignment.split("=", 1)
        if key in state.get("readonly", []):
            fail(f"cannot set property for '{name}': '{key}' is readonly")
        pools[name].setdefault("props", {})[key] = value
        save()
    elif sub == "history":
        for name in ([rest[0]] if rest else list(pools)):
            need_pool(name)
            print(f"History for '{name}':")
            for line in state.get("history", {}).get(name, []):
                print(line)
    else:
        fail("unexpected args: " + " ".join(args), 2)


if not args:
    sys.exit(2)
if TOOL == "zfs":
    zfs_main()
else:
    zpool_main()
"##;

pub fn default_state() -> Value {
    json!({
        "pools": {
            "tank": {
                "guid": "1234567890",
                "health": "ONLINE",
                "props": {"ashift": "12", "autotrim": "off", "comment": "-"},
                "features": {"async_destroy": "enabled", "encryption": "active"}
            }
        },
        "datasets": {
            "tank": {"type": "filesystem", "props": {"compression": "lz4", "mountpoint": "/tank"}},
            "tank/data": {"type": "filesystem", "props": {"compression": "off", "quota": "none"}},
            "tank/vol": {"type": "volume", "props": {"volsize": "10G", "volblocksize": "16K"}}
        },
        "snapshots": [
            {"name": "tank/data@s0", "creation": "100", "used": "0B", "refer": "96K"}
        ],
        "bookmarks": [],
        "stray": [],
        "history": {
            "tank": [
                "2024-01-01.10:00:00 zpool create tank mirror sda sdb",
                "2024-01-01.10:05:00 zfs create tank/data",
                "2024-01-01.10:06:00 zfs create tank/database"
            ]
        }
    })
}

pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_state(default_state())
    }

    pub fn with_state(state: Value) -> Self {
        let dir = tempdir().unwrap();
        for tool in ["zfs", "zpool"] {
            let path = dir.path().join(format!("{tool}.py"));
            fs::write(&path, FAKE_SCRIPT).unwrap();
            make_executable(&path);
        }
        fs::write(dir.path().join("state.json"), state.to_string()).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> WardenConfig {
        let mut config = WardenConfig::default();
        config.zfs.zfs_path = Some(self.script("zfs"));
        config.zfs.zpool_path = Some(self.script("zpool"));
        config.zfs.timeout_secs = 10;
        config.zfs.replication_timeout_secs = 10;
        config
    }

    pub fn manager(&self) -> ZfsManager {
        ZfsManager::from_config(&self.config()).unwrap()
    }

    pub fn dry_run_manager(&self) -> ZfsManager {
        let mut config = self.config();
        config.zfs.dry_run = true;
        ZfsManager::from_config(&config).unwrap()
    }

    pub fn state(&self) -> Value {
        let raw = fs::read_to_string(self.dir.path().join("state.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    /// Every argv the fake saw, tool name first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        match fs::read_to_string(self.dir.path().join("calls.log")) {
            Ok(log) => log
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Calls whose subcommand is `sub`.
    pub fn calls_to(&self, tool: &str, sub: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|call| call[0] == tool && call.get(1).map(String::as_str) == Some(sub))
            .collect()
    }

    pub fn clear_calls(&self) {
        let _ = fs::remove_file(self.dir.path().join("calls.log"));
    }

    fn script(&self, tool: &str) -> String {
        self.dir
            .path()
            .join(format!("{tool}.py"))
            .to_string_lossy()
            .into_owned()
    }
}

pub fn props(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn names(data: &Value) -> Vec<String> {
    data.as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["name"].as_str().unwrap().to_string())
        .collect()
}

pub fn scratch(fixture: &Fixture, name: &str) -> PathBuf {
    fixture.path().join(name)
}

fn make_executable(path: &Path) {
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}
