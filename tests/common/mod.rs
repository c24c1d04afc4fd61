#![allow(dead_code)]

//! In-memory transport double shared by the integration tests.
//!
//! Models a small POSIX tree (files, dirs, symlinks) plus a scriptable shell:
//! common commands (`mkdir -p`, `rm -rf`, `command -v`, `find | wc`, `du`)
//! are emulated against the tree, and tests register hooks for anything
//! domain-specific (curl, tar, findmnt, telemetry commands).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drivebay::errors::{GatewayError, Result};
use drivebay::session::Session;
use drivebay::transport::{ExecOutput, ProgressFn, RemoteEntry, RemoteStat, Transport};
use tempfile::TempDir;

pub const TEST_ROOT: &str = "/srv/storage";

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

pub fn ok_exec(stdout: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

pub fn failed_exec(exit_code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

/// Extracts the single-quoted argument following `flag`, e.g.
/// `quoted_arg_after("curl -o '/tmp/x' 'http://u'", "-o")` -> `/tmp/x`.
/// Tolerates both `-o '/x'` and 7z-style `-o'/x'` spellings.
pub fn quoted_arg_after(command: &str, flag: &str) -> Option<String> {
    let idx = command.find(flag)?;
    let rest = command[idx + flag.len()..].trim_start();
    let rest = rest.strip_prefix('\'')?;
    rest.split('\'').next().map(str::to_string)
}

#[derive(Default)]
pub struct MockFs {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub symlinks: BTreeMap<String, String>,
    pub tools: BTreeSet<String>,
    /// Paths whose `mkdir` is refused, for exercising degraded hosts.
    pub fail_mkdir: BTreeSet<String>,
}

impl MockFs {
    pub fn add_dir(&mut self, path: &str) {
        let mut acc = String::new();
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            acc.push('/');
            acc.push_str(seg);
            self.dirs.insert(acc.clone());
        }
    }

    pub fn add_file(&mut self, path: &str, data: &[u8]) {
        if let Some(idx) = path.rfind('/') {
            if idx > 0 {
                self.add_dir(&path[..idx]);
            }
        }
        self.files.insert(path.to_string(), data.to_vec());
    }

    pub fn add_symlink(&mut self, link: &str, target: &str) {
        self.symlinks.insert(link.to_string(), target.to_string());
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.files.retain(|p, _| p != path && !p.starts_with(&prefix));
        self.dirs.retain(|p| p != path && !p.starts_with(&prefix));
        self.symlinks.retain(|p, _| p != path && !p.starts_with(&prefix));
    }

    fn files_under(&self, dir: &str) -> Vec<(String, u64)> {
        let prefix = format!("{dir}/");
        self.files
            .iter()
            .filter(|(p, _)| p.as_str() == dir || p.starts_with(&prefix))
            .map(|(p, d)| (p.clone(), d.len() as u64))
            .collect()
    }
}

type ExecHook = Box<dyn Fn(&str, &mut MockFs) -> Option<ExecOutput>>;

#[derive(Clone, Default)]
pub struct MockTransport {
    fs: Arc<Mutex<MockFs>>,
    hooks: Arc<Mutex<Vec<ExecHook>>>,
    log: Arc<Mutex<Vec<(String, Option<Duration>)>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.with_fs(|fs| fs.add_dir(TEST_ROOT));
        transport
    }

    pub fn with_fs<R>(&self, f: impl FnOnce(&mut MockFs) -> R) -> R {
        f(&mut self.fs.lock().unwrap())
    }

    pub fn add_hook(&self, hook: impl Fn(&str, &mut MockFs) -> Option<ExecOutput> + 'static) {
        self.hooks.lock().unwrap().push(Box::new(hook));
    }

    pub fn add_tool(&self, name: &str) {
        self.with_fs(|fs| {
            fs.tools.insert(name.to_string());
        });
    }

    pub fn commands(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    /// Every exec with the channel-level timeout it was given.
    pub fn exec_calls(&self) -> Vec<(String, Option<Duration>)> {
        self.log.lock().unwrap().clone()
    }

    pub fn file_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.with_fs(|fs| fs.files.get(path).cloned())
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.with_fs(|fs| fs.dirs.contains(path))
    }

    /// True when any path in the tree contains `fragment`; used to assert the
    /// absence of leftover temp artifacts.
    pub fn any_path_contains(&self, fragment: &str) -> bool {
        self.with_fs(|fs| {
            fs.files.keys().any(|p| p.contains(fragment))
                || fs.dirs.iter().any(|p| p.contains(fragment))
        })
    }

    fn canonical(fs: &MockFs, path: &str) -> String {
        let mut current = normalize(path);
        for _ in 0..16 {
            let mut changed = false;
            for (link, target) in &fs.symlinks {
                if current == *link {
                    current = target.clone();
                    changed = true;
                    break;
                }
                let prefix = format!("{link}/");
                if let Some(rest) = current.strip_prefix(&prefix) {
                    current = format!("{}/{}", target.trim_end_matches('/'), rest);
                    changed = true;
                    break;
                }
            }
            if !changed {
                break;
            }
            current = normalize(&current);
        }
        current
    }

    fn builtin(command: &str, fs: &mut MockFs) -> Option<ExecOutput> {
        // `timeout Ns <cmd>` wraps the real command.
        let command = command
            .strip_prefix("timeout ")
            .and_then(|rest| rest.split_once(' ').map(|(_, c)| c))
            .unwrap_or(command);

        if let Some(rest) = command.strip_prefix("command -v ") {
            let tool = rest.trim_matches('\'');
            return Some(if fs.tools.contains(tool) {
                ok_exec(&format!("/usr/bin/{tool}\n"))
            } else {
                failed_exec(1, "")
            });
        }

        if command.split(" && ").all(|part| part.starts_with("mkdir -p ")) {
            for part in command.split(" && ") {
                if let Some(path) = quoted_arg_after(part, "mkdir -p") {
                    fs.add_dir(&path);
                }
            }
            return Some(ok_exec(""));
        }

        if command.starts_with("rm -rf ") {
            if let Some(path) = quoted_arg_after(command, "rm -rf") {
                fs.remove_tree(&path);
            }
            return Some(ok_exec(""));
        }

        if command.starts_with("find ") && command.contains("| wc -l") {
            let dir = quoted_arg_after(command, "find")?;
            let count = fs.files_under(&dir).len();
            return Some(ok_exec(&format!("{count}\n")));
        }

        if command.starts_with("du -sb ") {
            let dir = quoted_arg_after(command, "du -sb")?;
            let total: u64 = fs.files_under(&dir).iter().map(|(_, size)| size).sum();
            return Some(ok_exec(&format!("{total}\t{dir}\n")));
        }

        None
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

impl Transport for MockTransport {
    fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<ExecOutput> {
        self.log
            .lock()
            .unwrap()
            .push((command.to_string(), timeout));
        let mut fs = self.fs.lock().unwrap();
        for hook in self.hooks.lock().unwrap().iter() {
            if let Some(output) = hook(command, &mut fs) {
                return Ok(output);
            }
        }
        Ok(Self::builtin(command, &mut fs).unwrap_or_else(|| ok_exec("")))
    }

    fn stat(&self, path: &str) -> Result<Option<RemoteStat>> {
        let fs = self.fs.lock().unwrap();
        let canonical = Self::canonical(&fs, path);
        if fs.dirs.contains(&canonical) {
            return Ok(Some(RemoteStat {
                size: 0,
                is_dir: true,
            }));
        }
        Ok(fs.files.get(&canonical).map(|data| RemoteStat {
            size: data.len() as u64,
            is_dir: false,
        }))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let fs = self.fs.lock().unwrap();
        let canonical = Self::canonical(&fs, path);
        if !fs.dirs.contains(&canonical) {
            return Err(GatewayError::NotFound { path: canonical });
        }
        let prefix = format!("{canonical}/");
        let direct_child = |p: &str| -> Option<String> {
            p.strip_prefix(&prefix)
                .filter(|rest| !rest.contains('/'))
                .map(str::to_string)
        };

        let mut entries = Vec::new();
        for (p, data) in &fs.files {
            if let Some(name) = direct_child(p) {
                entries.push(RemoteEntry {
                    name,
                    size: data.len() as u64,
                    is_dir: false,
                });
            }
        }
        for p in &fs.dirs {
            if let Some(name) = direct_child(p) {
                entries.push(RemoteEntry {
                    name,
                    size: 0,
                    is_dir: true,
                });
            }
        }
        for (p, target) in &fs.symlinks {
            if let Some(name) = direct_child(p) {
                let is_dir = fs.dirs.contains(target);
                entries.push(RemoteEntry {
                    name,
                    size: 0,
                    is_dir,
                });
            }
        }
        Ok(entries)
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let mut fs = self.fs.lock().unwrap();
        let canonical = Self::canonical(&fs, path);
        if fs.fail_mkdir.contains(&canonical) {
            return Err(GatewayError::Transport(format!(
                "mkdir '{canonical}' refused"
            )));
        }
        fs.dirs.insert(canonical);
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        let mut fs = self.fs.lock().unwrap();
        let normalized = normalize(path);
        // A symlink is removed itself, never its target.
        if fs.symlinks.remove(&normalized).is_some() {
            return Ok(());
        }
        let canonical = Self::canonical(&fs, path);
        if fs.files.remove(&canonical).is_none() {
            return Err(GatewayError::NotFound { path: canonical });
        }
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> Result<()> {
        let mut fs = self.fs.lock().unwrap();
        let canonical = Self::canonical(&fs, path);
        let prefix = format!("{canonical}/");
        let occupied = fs.files.keys().any(|p| p.starts_with(&prefix))
            || fs.dirs.iter().any(|p| p.starts_with(&prefix))
            || fs.symlinks.keys().any(|p| p.starts_with(&prefix));
        if occupied {
            return Err(GatewayError::Transport(format!(
                "directory '{canonical}' is not empty"
            )));
        }
        if !fs.dirs.remove(&canonical) {
            return Err(GatewayError::NotFound { path: canonical });
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut fs = self.fs.lock().unwrap();
        let from = Self::canonical(&fs, from);
        let to = Self::canonical(&fs, to);

        if let Some(data) = fs.files.remove(&from) {
            fs.remove_tree(&to);
            fs.files.insert(to, data);
            return Ok(());
        }
        if fs.dirs.contains(&from) {
            fs.remove_tree(&to);
            let from_prefix = format!("{from}/");
            let moved_files: Vec<(String, Vec<u8>)> = fs
                .files
                .iter()
                .filter(|(p, _)| p.starts_with(&from_prefix))
                .map(|(p, d)| (format!("{to}/{}", &p[from_prefix.len()..]), d.clone()))
                .collect();
            let moved_dirs: Vec<String> = fs
                .dirs
                .iter()
                .filter(|p| p.starts_with(&from_prefix))
                .map(|p| format!("{to}/{}", &p[from_prefix.len()..]))
                .collect();
            fs.remove_tree(&from);
            fs.dirs.insert(to.clone());
            fs.dirs.extend(moved_dirs);
            fs.files.extend(moved_files);
            return Ok(());
        }
        Err(GatewayError::NotFound { path: from })
    }

    fn realpath(&self, path: &str) -> Result<String> {
        let fs = self.fs.lock().unwrap();
        Ok(Self::canonical(&fs, path))
    }

    fn put(&self, local: &Path, remote: &str, progress: ProgressFn) -> Result<u64> {
        let data = std::fs::read(local)?;
        let size = data.len() as u64;
        // Two progress calls model a streamed transfer.
        progress(size / 2);
        progress(size);
        let mut fs = self.fs.lock().unwrap();
        let canonical = Self::canonical(&fs, remote);
        fs.files.insert(canonical, data);
        Ok(size)
    }

    fn get(&self, remote: &str, local: &Path, progress: ProgressFn) -> Result<u64> {
        let data = {
            let fs = self.fs.lock().unwrap();
            let canonical = Self::canonical(&fs, remote);
            fs.files
                .get(&canonical)
                .cloned()
                .ok_or(GatewayError::NotFound { path: canonical })?
        };
        let size = data.len() as u64;
        std::fs::write(local, data)?;
        progress(size / 2);
        progress(size);
        Ok(size)
    }

    fn close(&self) {}
}

/// Fresh mock plus a session rooted at [`TEST_ROOT`].
pub fn mock_session() -> (MockTransport, Session) {
    let transport = MockTransport::new();
    let session = Session::with_transport(Box::new(transport.clone()), TEST_ROOT)
        .expect("session over mock transport");
    (transport, session)
}
