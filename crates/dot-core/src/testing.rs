//! In-memory container engine for unit tests.
//!
//! Containers are maps of absolute path to file contents plus the set of directories
//! that exist. "Running" a container interprets its shell script line by line with a
//! handful of commands: `echo`, `echo .. > file`, `echoerr`, `cat`, `mkdir -p`,
//! `printenv`, `sleep`, `exit`. As with a real daemon, uploads and redirections into a
//! missing directory fail.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::{Read, Write},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dot_model::RegistryAuth;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    time::Instant,
};

use crate::engine::{ContainerEngine, ContainerSpec, EngineError, LogStream, OutputSinks};

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FakeOp {
    Pull,
    Create,
    Start,
    Wait,
}

#[derive(Debug, Clone)]
pub(crate) struct RunRecord {
    pub name: String,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct Container {
    spec: ContainerSpec,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    started: bool,
    exit: Option<i64>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    containers: HashMap<String, Container>,
    created: Vec<ContainerSpec>,
    removed: Vec<String>,
    pulled: Vec<(String, Option<RegistryAuth>)>,
    runs: Vec<RunRecord>,
    failing: Vec<FakeOp>,
}

#[derive(Default)]
pub(crate) struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, op: FakeOp) {
        self.lock().failing.push(op);
    }

    /// A container that already holds `files`, bypassing create/start.
    pub fn spawn_with_files(&self, files: &[(&str, &str)]) -> String {
        let mut state = self.lock();
        let id = next_id(&mut state);
        let mut container = Container::with_dir("/");
        for (path, body) in files {
            container.write(resolve("/", path), body.as_bytes().to_vec());
        }
        state.containers.insert(id.clone(), container);
        id
    }

    pub fn has_dir(&self, id: &str, path: &str) -> bool {
        let state = self.lock();
        state
            .containers
            .get(id)
            .is_some_and(|c| c.dirs.contains(path))
    }

    pub fn file(&self, id: &str, path: &str) -> Option<String> {
        let state = self.lock();
        let bytes = state.containers.get(id)?.files.get(path)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.lock().created.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    pub fn live(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn pulled(&self) -> Vec<(String, Option<RegistryAuth>)> {
        self.lock().pulled.clone()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().runs.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, op: FakeOp) -> Result<(), EngineError> {
        if self.lock().failing.contains(&op) {
            return Err(EngineError::Api(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn with_container<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Container) -> T,
    ) -> Result<T, EngineError> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NoSuchContainer(id.to_string()))?;
        Ok(f(container))
    }

    async fn execute(&self, id: &str, sinks: &mut OutputSinks) -> Result<i64, EngineError> {
        let spec = self.with_container(id, |c| c.spec.clone())?;
        let started = Instant::now();
        let script = spec.cmd.last().cloned().unwrap_or_default();
        let mut code = 0;

        for line in script.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
            match cmd {
                "echo" => match rest.split_once(" > ") {
                    Some((text, file)) => {
                        let path = resolve(&spec.workdir, file.trim());
                        let body = format!("{text}\n").into_bytes();
                        let parent = parent_of(&path);
                        let written = self.with_container(id, |c| {
                            let exists = c.dirs.contains(&parent);
                            if exists {
                                c.files.insert(path, body);
                            }
                            exists
                        })?;
                        if !written {
                            let file = file.trim();
                            let msg = format!("sh: can't create {file}: nonexistent directory\n");
                            sinks.write(LogStream::Stderr, msg.as_bytes())?;
                            code = 2;
                            break;
                        }
                    }
                    None => sinks.write(LogStream::Stdout, format!("{rest}\n").as_bytes())?,
                },
                "echoerr" => sinks.write(LogStream::Stderr, format!("{rest}\n").as_bytes())?,
                "cat" => {
                    let path = resolve(&spec.workdir, rest.trim());
                    match self.with_container(id, |c| c.files.get(&path).cloned())? {
                        Some(body) => sinks.write(LogStream::Stdout, &body)?,
                        None => {
                            let file = rest.trim();
                            let msg = format!("cat: {file}: No such file or directory\n");
                            sinks.write(LogStream::Stderr, msg.as_bytes())?;
                            code = 1;
                            break;
                        }
                    }
                }
                "mkdir" => {
                    let dir = resolve(&spec.workdir, rest.trim_start_matches("-p").trim());
                    self.with_container(id, |c| c.mkdir_all(&dir))?;
                }
                "printenv" => {
                    let prefix = format!("{}=", rest.trim());
                    if let Some(kv) = spec.env.iter().find(|kv| kv.starts_with(&prefix)) {
                        let value = format!("{}\n", &kv[prefix.len()..]);
                        sinks.write(LogStream::Stdout, value.as_bytes())?;
                    }
                }
                "sleep" => {
                    let secs: f64 = rest.trim().parse().unwrap_or(0.0);
                    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                }
                "exit" => {
                    code = rest.trim().parse().unwrap_or(1);
                    break;
                }
                other => {
                    let msg = format!("sh: {other}: not found\n");
                    sinks.write(LogStream::Stderr, msg.as_bytes())?;
                    code = 127;
                    break;
                }
            }
        }

        let mut state = self.lock();
        state.runs.push(RunRecord {
            name: spec.name.clone(),
            started,
            finished: Instant::now(),
        });
        if let Some(c) = state.containers.get_mut(id) {
            c.exit = Some(code);
        }
        Ok(code)
    }
}

impl Container {
    fn with_dir(dir: &str) -> Self {
        let mut container = Self::default();
        container.mkdir_all(dir);
        container
    }

    fn mkdir_all(&mut self, dir: &str) {
        let mut current = dir.to_string();
        loop {
            let parent = parent_of(&current);
            let done = current == "/";
            self.dirs.insert(current);
            if done {
                break;
            }
            current = parent;
        }
    }

    fn write(&mut self, path: String, body: Vec<u8>) {
        self.mkdir_all(&parent_of(&path));
        self.files.insert(path, body);
    }
}

/// Parent of an absolute, already resolved path.
fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn next_id(state: &mut State) -> String {
    state.next_id += 1;
    format!("fake-{:04}", state.next_id)
}

/// Join `path` onto `base` POSIX-style, folding `.` and `..`.
fn resolve(base: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{path}", if base.is_empty() { "/" } else { base })
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn pull_image(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        progress: &mut (dyn Write + Send),
    ) -> Result<(), EngineError> {
        self.check(FakeOp::Pull)?;
        self.lock()
            .pulled
            .push((image.to_string(), auth.cloned()));
        writeln!(progress, "{image}: Pulling from library")?;
        writeln!(progress, "{image}: Pull complete")?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.check(FakeOp::Create)?;
        let mut state = self.lock();
        let id = next_id(&mut state);
        state.created.push(spec.clone());
        let workdir = resolve("/", &spec.workdir);
        let container = Container {
            spec: spec.clone(),
            ..Container::with_dir(&workdir)
        };
        state.containers.insert(id.clone(), container);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.check(FakeOp::Start)?;
        self.with_container(id, |c| c.started = true)
    }

    async fn stream_logs(&self, id: &str, sinks: &mut OutputSinks) -> Result<(), EngineError> {
        let (started, exit) = self.with_container(id, |c| (c.started, c.exit))?;
        if started && exit.is_none() {
            self.execute(id, sinks).await?;
        }
        sinks.flush()?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        self.check(FakeOp::Wait)?;
        match self.with_container(id, |c| c.exit)? {
            Some(code) => Ok(code),
            None => {
                let mut sinks = OutputSinks::new(std::io::sink(), std::io::sink());
                self.execute(id, &mut sinks).await
            }
        }
    }

    async fn copy_to_container(
        &self,
        id: &str,
        dest: &str,
        archive: Bytes,
    ) -> Result<(), EngineError> {
        let dest = resolve("/", dest);
        if !self.with_container(id, |c| c.dirs.contains(&dest))? {
            return Err(EngineError::NoSuchPath(dest));
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut tar = tar::Archive::new(&archive[..]);
        for entry in tar.entries()? {
            let mut entry = entry?;
            let name = resolve(&dest, &entry.path()?.to_string_lossy());
            let kind = entry.header().entry_type();
            if kind.is_dir() {
                dirs.push(name);
            } else if kind.is_file() {
                let mut body = Vec::new();
                entry.read_to_end(&mut body)?;
                files.push((name, body));
            }
        }
        self.with_container(id, |c| {
            dirs.iter().for_each(|d| c.mkdir_all(d));
            files.into_iter().for_each(|(p, b)| c.write(p, b));
        })
    }

    async fn copy_from_container(
        &self,
        id: &str,
        src: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EngineError> {
        let src = resolve("/", src);
        let base = src.rsplit_once('/').map_or("", |(parent, _)| parent).len() + 1;
        let files: Vec<(String, Vec<u8>)> = self.with_container(id, |c| {
            c.files
                .iter()
                .filter(|(p, _)| **p == src || p.starts_with(&format!("{src}/")))
                .map(|(p, b)| (p[base..].to_string(), b.clone()))
                .collect()
        })?;
        if files.is_empty() {
            return Err(EngineError::NoSuchPath(src));
        }

        let mut builder = tar::Builder::new(Vec::new());
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, &name, &body[..])?;
        }
        let bytes = builder.into_inner()?;
        out.write_all(&bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state
            .containers
            .remove(id)
            .ok_or_else(|| EngineError::NoSuchContainer(id.to_string()))?;
        state.removed.push(id.to_string());
        Ok(())
    }
}

/// Cloneable in-memory writer for capturing job output.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn parent_of_absolute_paths() {
    assert_eq!(parent_of("/app/out/a.txt"), "/app/out");
    assert_eq!(parent_of("/app"), "/");
    assert_eq!(parent_of("/"), "/");
}

#[tokio::test]
async fn upload_into_missing_directory_fails() {
    let engine = FakeEngine::new();
    let id = engine.spawn_with_files(&[("/app/keep.txt", "k")]);
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(1);
    header.set_mode(0o644);
    builder.append_data(&mut header, "msg", &b"x"[..]).unwrap();
    let bytes = Bytes::from(builder.into_inner().unwrap());

    let err = engine
        .copy_to_container(&id, "/app/out", bytes.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoSuchPath(p) if p == "/app/out"));

    engine.copy_to_container(&id, "/app", bytes).await.unwrap();
    assert_eq!(engine.file(&id, "/app/msg").as_deref(), Some("x"));
}

#[test]
fn resolve_folds_relative_segments() {
    assert_eq!(resolve("/app", "out/a.txt"), "/app/out/a.txt");
    assert_eq!(resolve("/app", "./dist/../b"), "/app/b");
    assert_eq!(resolve("/app", "/etc/x"), "/etc/x");
    assert_eq!(resolve("", "x"), "/x");
}
