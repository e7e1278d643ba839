//! Remote peer access: command execution and file transfer over ssh/scp,
//! plus launching the traffic generator (see [`generator`]).

pub mod generator;

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use self::generator::GeneratorHandle;
use crate::config::PeerConfig;
use crate::error::{BenchError, Result};

const SSH_OPTIONS: [&str; 6] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=error",
];

/// Output of a remote command. A non-zero exit status is not an error by
/// itself; callers that require success check `status`.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub output: String,
    pub status: i32,
}

impl CmdOutput {
    pub fn ok(&self) -> bool {
        self.status == 0
    }
}

/// A long-lived session with one remote peer (tester or SUT).
///
/// Owned by a single test case between setup and teardown; never shared
/// across test cases.
#[derive(Debug, Clone)]
pub struct RemoteSystem {
    peer: String,
    config: PeerConfig,
}

impl RemoteSystem {
    pub fn new(peer: &str, config: &PeerConfig) -> Self {
        Self {
            peer: peer.to_string(),
            config: config.clone(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    /// Execute a shell command on the peer.
    pub async fn run_cmd(&self, cmd: &str) -> Result<CmdOutput> {
        debug!(peer = %self.peer, %cmd, "running remote command");
        let out = Command::new("ssh")
            .args(SSH_OPTIONS)
            .arg(self.destination())
            .arg(cmd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BenchError::Transport {
                peer: self.peer.clone(),
                detail: format!("ssh: {e}"),
            })?;

        Ok(CmdOutput {
            output: String::from_utf8_lossy(&out.stdout).trim().to_string(),
            status: out.status.code().unwrap_or(-1),
        })
    }

    /// Copy a local file to the peer.
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        if !local.is_file() {
            return Err(BenchError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", local.display()),
            )));
        }

        debug!(peer = %self.peer, local = %local.display(), remote, "uploading file");
        let out = Command::new("scp")
            .args(SSH_OPTIONS)
            .arg(local)
            .arg(format!("{}:{}", self.destination(), remote))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BenchError::Transport {
                peer: self.peer.clone(),
                detail: format!("scp: {e}"),
            })?;

        let status = out.status.code().unwrap_or(-1);
        if status != 0 {
            return Err(BenchError::CommandFailed {
                peer: self.peer.clone(),
                command: format!("scp {}", local.display()),
                status,
            });
        }
        Ok(())
    }

    /// Upload a generator profile from the profiles directory to `/tmp` on
    /// the peer, returning the remote path.
    pub async fn upload_profile(&self, profiles_dir: &Path, name: &str) -> Result<String> {
        let remote = format!("/tmp/{name}");
        self.upload(&profiles_dir.join(name), &remote).await?;
        Ok(remote)
    }

    /// Start the traffic generator on this peer with the given profile and
    /// connect to its control endpoint.
    ///
    /// The remote process is launched as a background task; this call blocks
    /// until the control endpoint accepts a connection, the launch command
    /// exits, or the retry budget runs out. Deallocating a large amount of
    /// hugepages takes a while, so a stale generator instance is killed with
    /// `-w` before the new one starts.
    pub async fn start_generator(
        &self,
        profiles_dir: &Path,
        profile: &str,
        args: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratorHandle> {
        let remote_profile = self.upload_profile(profiles_dir, profile).await?;

        let bin_name = self
            .config
            .generator_bin
            .rsplit('/')
            .next()
            .unwrap_or(&self.config.generator_bin);
        self.run_cmd(&format!("sudo killall -w {bin_name} 2>/dev/null; true"))
            .await?;

        let launch_cmd = format!(
            "cd {dir}; sudo {bin} {args} -f {profile}",
            dir = self.config.generator_dir,
            bin = self.config.generator_bin,
            profile = remote_profile,
        );
        debug!(peer = %self.peer, cmd = %launch_cmd, "starting generator");

        let launcher = self.clone();
        let launch = tokio::spawn(async move { launcher.run_cmd(&launch_cmd).await });

        GeneratorHandle::connect_with_retry(
            &self.peer,
            &self.config.host,
            self.config.control_port,
            launch,
            cancel,
        )
        .await
    }
}
