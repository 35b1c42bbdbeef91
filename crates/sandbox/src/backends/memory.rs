//! In-memory sandbox runtime.
//!
//! Models containers with private root filesystems and named volumes shared
//! between them, with Docker's copy semantics: copy-out of a directory is
//! rooted at its name, copy-in merges beneath an existing directory. Used by
//! tests, with hooks for failure and delay injection and call accounting.

use crate::archive::{self, ArchiveEntry};
use crate::error::{SandboxError, SandboxResult};
use crate::path::{normalize_absolute, normalize_relative, split_parent};
use crate::traits::{
    ExecOutput, PathKind, PathStat, SandboxId, SandboxRuntime, SandboxSpec, VolumeBinding,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

/// Runtime operations that can be counted, failed or delayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Create,
    Start,
    Stop,
    Remove,
    Exec,
    CopyInto,
    CopyFrom,
}

#[derive(Debug)]
enum Target {
    Any,
    Containing(String),
    Exactly(String),
}

impl Target {
    fn matches(&self, name: &str) -> bool {
        match self {
            Target::Any => true,
            Target::Containing(fragment) => name.contains(fragment.as_str()),
            Target::Exactly(exact) => name == exact,
        }
    }
}

#[derive(Debug)]
struct InjectedFailure {
    op: RuntimeOp,
    target: Target,
    /// Remaining failures, or unlimited when `None`.
    remaining: Option<usize>,
}

/// A filesystem tree keyed by relative path. The empty path is the root.
#[derive(Debug, Default)]
struct FsTree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Bytes>,
    /// Symlinks by path, never followed.
    links: BTreeMap<String, String>,
}

impl FsTree {
    fn is_dir(&self, rel: &str) -> bool {
        rel.is_empty() || self.dirs.contains(rel)
    }

    fn kind(&self, rel: &str) -> Option<PathKind> {
        if self.is_dir(rel) {
            Some(PathKind::Directory)
        } else if self.files.contains_key(rel) {
            Some(PathKind::File)
        } else if self.links.contains_key(rel) {
            Some(PathKind::Other)
        } else {
            None
        }
    }

    fn mkdir_p(&mut self, rel: &str) -> Result<(), String> {
        let mut prefix = String::new();
        for component in rel.split('/').filter(|c| !c.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            if self.files.contains_key(&prefix) || self.links.contains_key(&prefix) {
                return Err(format!("{prefix}: not a directory"));
            }
            self.dirs.insert(prefix.clone());
        }
        Ok(())
    }

    fn write(&mut self, rel: &str, data: Bytes) -> Result<(), String> {
        if self.is_dir(rel) {
            return Err(format!("{rel}: is a directory"));
        }
        if let Some((parent, _)) = rel.rsplit_once('/') {
            self.mkdir_p(parent)?;
        }
        self.links.remove(rel);
        self.files.insert(rel.to_string(), data);
        Ok(())
    }

    fn descendants(&self, rel: &str) -> (Vec<&String>, Vec<(&String, &Bytes)>) {
        let prefix = if rel.is_empty() {
            String::new()
        } else {
            format!("{rel}/")
        };
        let dirs = self.dirs.iter().filter(|d| d.starts_with(&prefix)).collect();
        let files = self
            .files
            .iter()
            .filter(|(f, _)| f.starts_with(&prefix))
            .collect();
        (dirs, files)
    }

    /// Immediate children of a directory, sorted.
    fn children(&self, rel: &str) -> Vec<(String, PathKind, u64)> {
        let (dirs, files) = self.descendants(rel);
        let strip = |path: &str| -> Option<String> {
            let tail = if rel.is_empty() {
                path
            } else {
                &path[rel.len() + 1..]
            };
            (!tail.contains('/')).then(|| tail.to_string())
        };
        let mut out: Vec<_> = dirs
            .into_iter()
            .filter_map(|d| strip(d).map(|n| (n, PathKind::Directory, 0)))
            .chain(
                files
                    .into_iter()
                    .filter_map(|(f, data)| strip(f).map(|n| (n, PathKind::File, data.len() as u64))),
            )
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Archive entries for `rel`, rooted at `name`.
    fn archive(&self, rel: &str, name: &str) -> Option<Vec<ArchiveEntry>> {
        match self.kind(rel)? {
            PathKind::File => {
                let data = self.files.get(rel)?.clone();
                Some(vec![ArchiveEntry::file(name, data)])
            }
            // A copy-out of a link yields no regular member.
            PathKind::Other => Some(Vec::new()),
            PathKind::Directory => {
                let (dirs, files) = self.descendants(rel);
                let skip = if rel.is_empty() { 0 } else { rel.len() + 1 };
                let mut entries: Vec<ArchiveEntry> = vec![ArchiveEntry::directory(name)];
                entries.extend(
                    dirs.into_iter()
                        .map(|d| ArchiveEntry::directory(format!("{name}/{}", &d[skip..]))),
                );
                entries.extend(
                    files
                        .into_iter()
                        .map(|(f, data)| ArchiveEntry::file(format!("{name}/{}", &f[skip..]), data.clone())),
                );
                entries.sort_by(|a, b| a.path().cmp(b.path()));
                Some(entries)
            }
        }
    }
}

#[derive(Debug)]
struct Container {
    name: String,
    running: bool,
    root: FsTree,
    binds: Vec<VolumeBinding>,
}

impl Container {
    /// Volume owning `abs` (longest mount prefix) and the path relative to it.
    fn locate(&self, abs: &str) -> (Option<String>, String) {
        let mut best: Option<&VolumeBinding> = None;
        for bind in &self.binds {
            let mp = bind.mount_point.as_str();
            let covers = abs == mp || abs.starts_with(&format!("{mp}/"));
            if covers && best.is_none_or(|b| b.mount_point.len() < mp.len()) {
                best = Some(bind);
            }
        }
        match best {
            Some(bind) => {
                let rel = abs[bind.mount_point.len()..].trim_start_matches('/');
                (Some(bind.volume.clone()), rel.to_string())
            }
            None => (None, abs.trim_start_matches('/').to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, Container>,
    names: HashMap<String, String>,
    volumes: HashMap<String, FsTree>,
    failures: Vec<InjectedFailure>,
    delays: HashMap<RuntimeOp, Duration>,
    calls: HashMap<RuntimeOp, usize>,
    removals: HashMap<String, usize>,
    created: Vec<String>,
}

impl State {
    fn resolve_id(&self, id: &str) -> Option<String> {
        if self.containers.contains_key(id) {
            Some(id.to_string())
        } else {
            self.names.get(id).cloned()
        }
    }

    fn container(&self, id: &SandboxId) -> SandboxResult<(&String, &Container)> {
        self.resolve_id(id.as_str())
            .and_then(|key| self.containers.get_key_value(&key))
            .ok_or_else(|| SandboxError::NotFound(format!("no such container: {id}")))
    }

    fn container_mut(&mut self, id: &SandboxId) -> SandboxResult<&mut Container> {
        let key = self
            .resolve_id(id.as_str())
            .ok_or_else(|| SandboxError::NotFound(format!("no such container: {id}")))?;
        self.containers
            .get_mut(&key)
            .ok_or_else(|| SandboxError::NotFound(format!("no such container: {id}")))
    }

    /// Filesystem holding `abs` inside the container, and the relative path.
    fn fs_mut(&mut self, id: &SandboxId, abs: &str) -> SandboxResult<(&mut FsTree, String)> {
        let (volume, rel) = self.container(id)?.1.locate(abs);
        match volume {
            Some(volume) => Ok((self.volumes.entry(volume).or_default(), rel)),
            None => Ok((&mut self.container_mut(id)?.root, rel)),
        }
    }

    /// Record the call and apply any matching injected failure.
    fn check(&mut self, op: RuntimeOp, name: &str) -> SandboxResult<Option<Duration>> {
        *self.calls.entry(op).or_default() += 1;

        let hit = self
            .failures
            .iter()
            .position(|f| f.op == op && f.target.matches(name));
        if let Some(index) = hit {
            let exhausted = match self.failures[index].remaining.as_mut() {
                Some(remaining) => {
                    *remaining -= 1;
                    *remaining == 0
                }
                None => false,
            };
            if exhausted {
                self.failures.remove(index);
            }
            let message = format!("injected {op:?} failure for {name}");
            return Err(match op {
                RuntimeOp::Create => SandboxError::CreateFailed(message),
                RuntimeOp::Start => SandboxError::StartFailed(message),
                RuntimeOp::Stop => SandboxError::StopFailed(message),
                RuntimeOp::Remove => SandboxError::RemoveFailed(message),
                RuntimeOp::Exec => SandboxError::ExecFailed {
                    command: name.to_string(),
                    exit_code: 1,
                    stderr: message,
                },
                RuntimeOp::CopyInto | RuntimeOp::CopyFrom => SandboxError::TransferFailed(message),
            });
        }
        Ok(self.delays.get(&op).copied())
    }

    fn name_of(&self, id: &SandboxId) -> String {
        self.container(id)
            .map(|(_, c)| c.name.clone())
            .unwrap_or_else(|_| id.to_string())
    }
}

/// In-memory [`SandboxRuntime`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check for injected failures, then sleep out any injected delay with
    /// the lock released.
    async fn enter(&self, op: RuntimeOp, name: &str) -> SandboxResult<()> {
        let delay = self.state.lock().await.check(op, name)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn enter_for(&self, op: RuntimeOp, id: &SandboxId) -> SandboxResult<()> {
        let name = self.state.lock().await.name_of(id);
        self.enter(op, &name).await
    }

    /// Register a container (e.g. a testnet node). Its id is its name.
    pub async fn add_container(
        &self,
        name: &str,
        running: bool,
        binds: Vec<VolumeBinding>,
    ) -> SandboxId {
        let mut state = self.state.lock().await;
        for bind in &binds {
            state.volumes.entry(bind.volume.clone()).or_default();
        }
        state.containers.insert(
            name.to_string(),
            Container {
                name: name.to_string(),
                running,
                root: FsTree::default(),
                binds,
            },
        );
        state.names.insert(name.to_string(), name.to_string());
        SandboxId::new(name)
    }

    /// Create a named volume if it does not exist.
    pub async fn add_volume(&self, volume: &str) {
        self.state
            .lock()
            .await
            .volumes
            .entry(volume.to_string())
            .or_default();
    }

    /// Write a file inside a container, creating parent directories.
    pub async fn write_file(&self, id: &SandboxId, path: &str, data: impl Into<Bytes>) -> SandboxResult<()> {
        let path = normalize_absolute(path)?;
        let mut state = self.state.lock().await;
        let (fs, rel) = state.fs_mut(id, &path)?;
        fs.write(&rel, data.into()).map_err(SandboxError::TransferFailed)
    }

    /// Place a symlink at `path` inside a container, creating parent
    /// directories. Copy-outs report it as [`PathKind::Other`].
    pub async fn write_symlink(&self, id: &SandboxId, path: &str, target: &str) -> SandboxResult<()> {
        let path = normalize_absolute(path)?;
        let mut state = self.state.lock().await;
        let (fs, rel) = state.fs_mut(id, &path)?;
        if fs.kind(&rel).is_some() {
            return Err(SandboxError::TransferFailed(format!("{path}: already exists")));
        }
        if let Some((parent, _)) = rel.rsplit_once('/') {
            fs.mkdir_p(parent).map_err(SandboxError::TransferFailed)?;
        }
        fs.links.insert(rel, target.to_string());
        Ok(())
    }

    /// Create a directory (and parents) inside a container.
    pub async fn make_dir(&self, id: &SandboxId, path: &str) -> SandboxResult<()> {
        let path = normalize_absolute(path)?;
        let mut state = self.state.lock().await;
        let (fs, rel) = state.fs_mut(id, &path)?;
        fs.mkdir_p(&rel).map_err(SandboxError::TransferFailed)
    }

    pub async fn read_file(&self, id: &SandboxId, path: &str) -> Option<Bytes> {
        let path = normalize_absolute(path).ok()?;
        let mut state = self.state.lock().await;
        let (fs, rel) = state.fs_mut(id, &path).ok()?;
        fs.files.get(&rel).cloned()
    }

    /// Names of the entries directly inside a directory.
    pub async fn list_dir(&self, id: &SandboxId, path: &str) -> Vec<String> {
        let Ok(path) = normalize_absolute(path) else {
            return Vec::new();
        };
        let mut state = self.state.lock().await;
        match state.fs_mut(id, &path) {
            Ok((fs, rel)) if fs.is_dir(&rel) => {
                fs.children(&rel).into_iter().map(|(n, _, _)| n).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Files in a volume, keyed by path relative to the volume root.
    pub async fn volume_files(&self, volume: &str) -> BTreeMap<String, Bytes> {
        self.state
            .lock()
            .await
            .volumes
            .get(volume)
            .map(|fs| fs.files.clone())
            .unwrap_or_default()
    }

    pub async fn write_volume_file(&self, volume: &str, rel: &str, data: impl Into<Bytes>) -> SandboxResult<()> {
        let rel = normalize_relative(rel)?;
        let mut state = self.state.lock().await;
        state
            .volumes
            .entry(volume.to_string())
            .or_default()
            .write(&rel, data.into())
            .map_err(SandboxError::TransferFailed)
    }

    /// Names of containers that currently exist.
    pub async fn live_containers(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.containers.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    /// Names passed to `create`, in call order.
    pub async fn created_names(&self) -> Vec<String> {
        self.state.lock().await.created.clone()
    }

    /// Number of `remove` calls that targeted the sandbox named `name`.
    pub async fn removal_attempts(&self, name: &str) -> usize {
        let state = self.state.lock().await;
        state.removals.get(name).copied().unwrap_or(0)
    }

    pub async fn calls(&self, op: RuntimeOp) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Fail every future `op`.
    pub async fn fail_on(&self, op: RuntimeOp) {
        self.push_failure(op, Target::Any, None).await;
    }

    /// Fail the next `op` only.
    pub async fn fail_once(&self, op: RuntimeOp) {
        self.push_failure(op, Target::Any, Some(1)).await;
    }

    /// Fail every future `op` against sandboxes whose name contains `fragment`.
    pub async fn fail_on_matching(&self, op: RuntimeOp, fragment: &str) {
        self.push_failure(op, Target::Containing(fragment.to_string()), None).await;
    }

    /// Fail every future `op` against the sandbox named exactly `name`.
    pub async fn fail_on_sandbox(&self, op: RuntimeOp, name: &str) {
        self.push_failure(op, Target::Exactly(name.to_string()), None).await;
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// Delay every future `op` by `delay`.
    pub async fn delay_on(&self, op: RuntimeOp, delay: Duration) {
        self.state.lock().await.delays.insert(op, delay);
    }

    async fn push_failure(&self, op: RuntimeOp, target: Target, remaining: Option<usize>) {
        self.state.lock().await.failures.push(InjectedFailure {
            op,
            target,
            remaining,
        });
    }

    fn run_exec(state: &mut State, id: &SandboxId, argv: &[String]) -> SandboxResult<ExecOutput> {
        let exit = |code: i64, stdout: String, stderr: String| ExecOutput {
            stdout,
            stderr,
            exit_code: code,
        };
        let Some((program, args)) = argv.split_first() else {
            return Ok(exit(127, String::new(), "exec: no command".to_string()));
        };

        match program.as_str() {
            "true" | "sleep" => Ok(exit(0, String::new(), String::new())),
            "mkdir" => {
                let parents = args.iter().any(|a| a == "-p");
                for path in args.iter().filter(|a| !a.starts_with('-')) {
                    let Ok(abs) = normalize_absolute(path) else {
                        return Ok(exit(1, String::new(), format!("mkdir: invalid path {path}")));
                    };
                    let (fs, rel) = state.fs_mut(id, &abs)?;
                    let result = if parents {
                        fs.mkdir_p(&rel)
                    } else if fs.kind(&rel).is_some() {
                        Err(format!("can't create directory '{abs}': File exists"))
                    } else if !fs.is_dir(rel.rsplit_once('/').map_or("", |(p, _)| p)) {
                        Err(format!("can't create directory '{abs}': No such file or directory"))
                    } else {
                        fs.mkdir_p(&rel)
                    };
                    if let Err(e) = result {
                        return Ok(exit(1, String::new(), format!("mkdir: {e}")));
                    }
                }
                Ok(exit(0, String::new(), String::new()))
            }
            "ls" => {
                let long = args.iter().any(|a| a.starts_with('-') && a.contains('l'));
                let targets: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
                let mut stdout = String::new();
                for path in targets {
                    let Ok(abs) = normalize_absolute(path) else {
                        return Ok(exit(1, stdout, format!("ls: {path}: No such file or directory")));
                    };
                    let (fs, rel) = state.fs_mut(id, &abs)?;
                    let listing = match fs.kind(&rel) {
                        None => {
                            return Ok(exit(2, stdout, format!("ls: {abs}: No such file or directory")));
                        }
                        Some(PathKind::File) => {
                            let size = fs.files.get(&rel).map_or(0, |d| d.len() as u64);
                            vec![(abs.clone(), PathKind::File, size)]
                        }
                        Some(PathKind::Directory) => fs.children(&rel),
                        Some(PathKind::Other) => vec![(abs.clone(), PathKind::Other, 0)],
                    };
                    for (name, kind, size) in listing {
                        if long {
                            let mode = match kind {
                                PathKind::File => "-rw-------",
                                PathKind::Directory => "drwxr-xr-x",
                                PathKind::Other => "lrwxrwxrwx",
                            };
                            stdout.push_str(&format!("{mode}    1 root     root {size:>12} Jan  1 00:00 {name}\n"));
                        } else {
                            stdout.push_str(&name);
                            stdout.push('\n');
                        }
                    }
                }
                Ok(exit(0, stdout, String::new()))
            }
            other => Ok(exit(
                127,
                String::new(),
                format!("exec: \"{other}\": executable file not found in $PATH"),
            )),
        }
    }
}

#[async_trait]
impl SandboxRuntime for MemoryBackend {
    #[instrument(skip(self, spec), fields(backend = "memory", name = %spec.name))]
    async fn create(&self, spec: &SandboxSpec) -> SandboxResult<SandboxId> {
        self.enter(RuntimeOp::Create, &spec.name).await?;

        let mut state = self.state.lock().await;
        state.created.push(spec.name.clone());
        if state.names.contains_key(&spec.name) {
            return Err(SandboxError::CreateFailed(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let mut binds = Vec::with_capacity(spec.binds.len());
        for bind in &spec.binds {
            let mount_point = normalize_absolute(&bind.mount_point)?;
            state.volumes.entry(bind.volume.clone()).or_default();
            binds.push(VolumeBinding::new(bind.volume.clone(), mount_point));
        }
        let id = Uuid::new_v4().simple().to_string();
        state.containers.insert(
            id.clone(),
            Container {
                name: spec.name.clone(),
                running: false,
                root: FsTree::default(),
                binds,
            },
        );
        state.names.insert(spec.name.clone(), id.clone());
        Ok(SandboxId::new(id))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn start(&self, id: &SandboxId) -> SandboxResult<()> {
        self.enter_for(RuntimeOp::Start, id).await?;
        self.state.lock().await.container_mut(id)?.running = true;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn stop(&self, id: &SandboxId, _timeout: Duration) -> SandboxResult<()> {
        self.enter_for(RuntimeOp::Stop, id).await?;
        self.state.lock().await.container_mut(id)?.running = false;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn remove(&self, id: &SandboxId, force: bool) -> SandboxResult<()> {
        {
            let mut state = self.state.lock().await;
            let name = state.name_of(id);
            *state.removals.entry(name).or_default() += 1;
        }
        self.enter_for(RuntimeOp::Remove, id).await?;

        let mut state = self.state.lock().await;
        let key = state
            .resolve_id(id.as_str())
            .ok_or_else(|| SandboxError::NotFound(format!("no such container: {id}")))?;
        if let Some(container) = state.containers.get(&key)
            && container.running
            && !force
        {
            return Err(SandboxError::RemoveFailed(format!(
                "cannot remove running container {id}, stop it first or use force"
            )));
        }
        if let Some(container) = state.containers.remove(&key) {
            state.names.remove(&container.name);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn exec(&self, id: &SandboxId, argv: &[String]) -> SandboxResult<ExecOutput> {
        self.enter_for(RuntimeOp::Exec, id).await?;
        let mut state = self.state.lock().await;
        if !state.container(id)?.1.running {
            return Err(SandboxError::ExecFailed {
                command: argv.join(" "),
                exit_code: 126,
                stderr: format!("container {id} is not running"),
            });
        }
        Self::run_exec(&mut state, id, argv)
    }

    #[instrument(skip(self, archive), fields(backend = "memory", size = archive.len()))]
    async fn copy_into(&self, id: &SandboxId, dest_dir: &str, archive: Bytes) -> SandboxResult<()> {
        self.enter_for(RuntimeOp::CopyInto, id).await?;
        let dest_dir = normalize_absolute(dest_dir)?;
        let entries = archive::decode(&archive)?;

        let mut state = self.state.lock().await;
        let (fs, rel) = state.fs_mut(id, &dest_dir)?;
        if !fs.is_dir(&rel) {
            return Err(SandboxError::NotFound(format!(
                "Could not find the file {dest_dir} in container {id}"
            )));
        }
        for entry in entries {
            let target = if rel.is_empty() {
                entry.path().to_string()
            } else {
                format!("{rel}/{}", entry.path())
            };
            let result = match entry {
                ArchiveEntry::Directory { .. } => fs.mkdir_p(&target),
                ArchiveEntry::File { data, .. } => fs.write(&target, data),
            };
            result.map_err(SandboxError::TransferFailed)?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn copy_from(&self, id: &SandboxId, src_path: &str) -> SandboxResult<(Bytes, PathStat)> {
        self.enter_for(RuntimeOp::CopyFrom, id).await?;
        let src_path = normalize_absolute(src_path)?;
        let (_, name) = split_parent(&src_path)?;

        let mut state = self.state.lock().await;
        let (fs, rel) = state.fs_mut(id, &src_path)?;
        let entries = fs.archive(&rel, &name).ok_or_else(|| {
            SandboxError::NotFound(format!("Could not find the file {src_path} in container {id}"))
        })?;
        let stat = match fs.kind(&rel) {
            Some(PathKind::Other) => PathStat {
                name,
                kind: PathKind::Other,
                size: 0,
            },
            _ => archive::root_stat(&entries)?,
        };
        Ok((archive::encode(&entries)?, stat))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
