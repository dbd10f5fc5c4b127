//! Process-based execution contexts
//!
//! Each sandbox is a child process running the agent program, started in
//! the sandbox base directory with its own process group. Setup messages go
//! over the child's stdin; unloading kills the whole group.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use super::{
    ControlMessage, ExecutionContext, ExecutionHost, TrustDescriptor, ENV_APPLICATION_BASE,
    ENV_APPLICATION_NAME, ENV_CACHE_PATH, ENV_CONFIG_FILE, ENV_DOMAIN_NAME, ENV_IN_SANDBOX,
    ENV_PRIVATE_BIN_PATH, ENV_SHADOW_COPY, ENV_SHADOW_COPY_DIRS,
};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::resolver::ResolverRegistration;
use crate::settings::HostSettings;

/// How long an agent gets to exit on its own once its control channel closes
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Host that runs every sandbox as a separate agent process
#[derive(Debug, Clone)]
pub struct ProcessHost {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessHost {
    pub fn new(
        program: impl AsRef<Path>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_settings(settings: &HostSettings) -> Self {
        Self::new(&settings.agent_program, settings.agent_args.iter().cloned())
    }

    /// Build the agent command for a sandbox
    fn command(&self, name: &str, config: &SandboxConfig, trust: &TrustDescriptor) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&config.base_path)
            .env_clear()
            .envs(&trust.env)
            .env(ENV_DOMAIN_NAME, name)
            .env(ENV_APPLICATION_NAME, &config.application_name)
            .env(ENV_APPLICATION_BASE, &config.base_path)
            .env(ENV_CONFIG_FILE, &config.config_file)
            .env(ENV_SHADOW_COPY, config.copy_on_load.to_string())
            .env(ENV_IN_SANDBOX, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(search_path) = &config.private_search_path {
            cmd.env(ENV_PRIVATE_BIN_PATH, search_path);
        }
        if let Some(dirs) = &config.copy_on_load_dirs {
            cmd.env(ENV_SHADOW_COPY_DIRS, dirs);
        }
        if let Some(cache_path) = &config.cache_path {
            cmd.env(ENV_CACHE_PATH, cache_path);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

#[async_trait]
impl ExecutionHost for ProcessHost {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn create_context(
        &self,
        name: &str,
        config: &SandboxConfig,
        trust: &TrustDescriptor,
    ) -> Result<Box<dyn ExecutionContext>> {
        debug!(
            "Spawning {} for sandbox {} in {}",
            self.program.display(),
            name,
            config.base_path.display()
        );

        let mut child = self
            .command(name, config, trust)
            .spawn()
            .with_context(|| format!("Failed to spawn agent {}", self.program.display()))?;
        let stdin = child.stdin.take();

        info!("Started sandbox process {} (pid: {:?})", name, child.id());

        Ok(Box::new(ProcessContext {
            name: name.to_string(),
            #[cfg(unix)]
            pgid: child.id(),
            child,
            stdin,
        }))
    }
}

/// A sandbox living in a child process
pub struct ProcessContext {
    name: String,
    /// The agent leads its own group; kept since `Child::id` is gone once reaped
    #[cfg(unix)]
    pgid: Option<u32>,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ProcessContext {
    async fn send(&mut self, message: &ControlMessage) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .with_context(|| format!("Control channel of {} is closed", self.name))?;

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        stdin
            .write_all(&line)
            .await
            .with_context(|| format!("Failed to write to sandbox {}", self.name))?;
        stdin.flush().await?;
        Ok(())
    }

    /// Kill every process in the sandbox's group
    #[cfg(unix)]
    fn kill_group(&self) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to kill process group {}", pgid))
            }
        }
    }
}

#[async_trait]
impl ExecutionContext for ProcessContext {
    fn name(&self) -> &str {
        &self.name
    }

    async fn install_resolver(&mut self, registration: &ResolverRegistration) -> Result<()> {
        self.send(&ControlMessage::Resolver(registration.clone())).await
    }

    async fn set_data(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        self.send(&ControlMessage::Data {
            key: key.to_string(),
            value,
        })
        .await
    }

    async fn unload(self: Box<Self>) -> Result<()> {
        let mut this = self;
        // Closing stdin tells a well-behaved agent to exit.
        drop(this.stdin.take());

        let exited = match tokio::time::timeout(EXIT_GRACE, this.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Sandbox process {} exited: {}", this.name, status);
                true
            }
            Ok(Err(err)) => {
                warn!("Failed to wait for sandbox process {}: {}", this.name, err);
                false
            }
            Err(_) => false,
        };

        // Whatever the tests started may outlive the agent itself.
        #[cfg(unix)]
        this.kill_group()?;

        if !exited {
            this.child
                .kill()
                .await
                .with_context(|| format!("Failed to kill sandbox process {}", this.name))?;
        }
        info!("Unloaded sandbox process {}", this.name);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(base: &Path) -> SandboxConfig {
        SandboxConfig {
            application_name: "Tests".into(),
            base_path: base.to_path_buf(),
            config_file: base.join("Foo.dll.config"),
            private_search_path: Some("lib".into()),
            copy_on_load: false,
            copy_on_load_dirs: None,
            cache_path: None,
        }
    }

    #[tokio::test]
    async fn test_context_receives_environment() {
        let base = TempDir::new().unwrap();
        let out = base.path().join("env.txt");
        let script = format!("env > {}; cat > /dev/null", out.display());
        let host = ProcessHost::new("/bin/sh", ["-c".to_string(), script]);
        let trust = TrustDescriptor::empty().with_var("PATH", "/usr/bin:/bin");

        let mut context = host
            .create_context("domain-Foo.dll", &config_for(base.path()), &trust)
            .await
            .unwrap();
        context
            .install_resolver(&ResolverRegistration::default())
            .await
            .unwrap();
        // Give the shell time to write the file before tearing it down
        for _ in 0..50 {
            if std::fs::read_to_string(&out).is_ok_and(|s| s.contains(ENV_IN_SANDBOX)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        context.unload().await.unwrap();

        let env = std::fs::read_to_string(&out).unwrap();
        assert!(env.contains("TESTHOST_DOMAIN_NAME=domain-Foo.dll"));
        assert!(env.contains("TESTHOST_APPLICATION_NAME=Tests"));
        assert!(env.contains("TESTHOST_PRIVATE_BIN_PATH=lib"));
        assert!(env.contains("TESTHOST_SHADOW_COPY=false"));
        assert!(env.contains("TESTHOST_IN_SANDBOX=1"));
        assert!(!env.contains(ENV_CACHE_PATH));
    }

    #[tokio::test]
    async fn test_unload_kills_unresponsive_context() {
        let base = TempDir::new().unwrap();
        let host = ProcessHost::new("/bin/sh", ["-c", "trap '' TERM; sleep 600"]);
        let context = host
            .create_context("domain-hung", &config_for(base.path()), &TrustDescriptor::inherit())
            .await
            .unwrap();

        tokio_test::assert_ok!(context.unload().await);
    }

    /// True while `pid` exists and is not a zombie waiting to be reaped
    fn is_running(pid: i32) -> bool {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            return !stat.contains(") Z");
        }
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None::<nix::sys::signal::Signal>)
            .is_ok()
    }

    #[tokio::test]
    async fn test_unload_kills_processes_left_by_exited_agent() {
        let base = TempDir::new().unwrap();
        let pid_file = base.path().join("pid");
        let script = format!("sleep 600 & echo $! > {}; exit 0", pid_file.display());
        let host = ProcessHost::new("/bin/sh", ["-c".to_string(), script]);
        let context = host
            .create_context("domain-leaky", &config_for(base.path()), &TrustDescriptor::inherit())
            .await
            .unwrap();

        let mut pid = None;
        for _ in 0..50 {
            if let Ok(text) = std::fs::read_to_string(&pid_file) {
                if let Ok(value) = text.trim().parse::<i32>() {
                    pid = Some(value);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let pid = pid.unwrap();
        // Let the agent itself exit first
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(is_running(pid));

        tokio_test::assert_ok!(context.unload().await);

        let mut alive = true;
        for _ in 0..100 {
            alive = is_running(pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "background process {} survived unload", pid);
    }

    #[tokio::test]
    async fn test_agent_exits_on_closed_stdin() {
        let base = TempDir::new().unwrap();
        let host = ProcessHost::new("/bin/sh", ["-c", "cat > /dev/null"]);
        let context = host
            .create_context("domain-polite", &config_for(base.path()), &TrustDescriptor::inherit())
            .await
            .unwrap();

        let started = std::time::Instant::now();
        tokio_test::assert_ok!(context.unload().await);
        assert!(started.elapsed() < EXIT_GRACE);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let base = TempDir::new().unwrap();
        let host = ProcessHost::new(base.path().join("no-such-agent"), Vec::<String>::new());

        let result = host
            .create_context("domain-x", &config_for(base.path()), &TrustDescriptor::inherit())
            .await;
        assert!(result.is_err());
    }
}
