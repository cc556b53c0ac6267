use std::path::Path;
use std::sync::Arc;
use std::{env, fmt, io};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Request, Response};
use tokio::process::Command;

use crate::types::HttpClient;
use crate::Error;

/// Sends HTTP requests on behalf of the credential resolver
///
/// Implementations return the response regardless of its status code. A failure to resolve
/// the host name must be reported as [`Error::HostNotFound`]; any other failure to obtain a
/// response as [`Error::Transport`].
#[async_trait]
pub trait HttpFetcher: Send + Sync + fmt::Debug {
    /// Send `request` and collect the full response body
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Error>;
}

/// Reads credential files
#[async_trait]
pub trait FileReader: Send + Sync + fmt::Debug {
    /// Read the whole file at `path` as UTF-8
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Whether anything exists at `path`
    async fn exists(&self, path: &Path) -> bool;
}

/// The outcome of running an external command
#[derive(Clone, Debug)]
pub struct CommandOutput {
    /// Whether the process exited successfully
    pub success: bool,
    /// Everything the process wrote to stdout
    pub stdout: Vec<u8>,
}

/// Runs external commands such as `gcloud`
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run `program` with `args` to completion
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Looks up environment variables
pub trait Env: Send + Sync + fmt::Debug {
    /// The value of `key`, if set and valid UTF-8
    fn var(&self, key: &str) -> Option<String>;
}

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current time
    fn now(&self) -> DateTime<Utc>;
}

/// Reads files with [`tokio::fs`]
#[derive(Clone, Copy, Debug, Default)]
pub struct FsReader;

#[async_trait]
impl FileReader for FsReader {
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Spawns processes with [`tokio::process`]
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: output.stdout,
        })
    }
}

/// Reads the environment of the current process
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

/// Wall-clock time from [`Utc::now`]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The set of I/O collaborators shared by a resolver and the credentials it creates
///
/// [`Collaborators::new`] wires up the real implementations; each `with_*` method swaps in
/// a different implementation, which is how tests substitute fakes.
#[derive(Clone, Debug)]
pub struct Collaborators {
    pub(crate) http: Arc<dyn HttpFetcher>,
    pub(crate) files: Arc<dyn FileReader>,
    pub(crate) commands: Arc<dyn CommandRunner>,
    pub(crate) env: Arc<dyn Env>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators backed by a hyper client, the file system, real processes, the process
    /// environment and the system clock
    pub fn new() -> Result<Self, Error> {
        Ok(Self::from_http(Arc::new(HttpClient::new()?)))
    }

    /// Like [`Collaborators::new`], but with the given HTTP implementation
    pub fn from_http(http: Arc<dyn HttpFetcher>) -> Self {
        Self {
            http,
            files: Arc::new(FsReader),
            commands: Arc::new(ProcessRunner),
            env: Arc::new(ProcessEnv),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the HTTP implementation
    pub fn with_http(mut self, http: Arc<dyn HttpFetcher>) -> Self {
        self.http = http;
        self
    }

    /// Replace the file reader
    pub fn with_files(mut self, files: Arc<dyn FileReader>) -> Self {
        self.files = files;
        self
    }

    /// Replace the command runner
    pub fn with_commands(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = commands;
        self
    }

    /// Replace the environment
    pub fn with_env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = env;
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
