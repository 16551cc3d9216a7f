use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;

use crate::config::{Config, OutputType};
use crate::error::{Error, Result};
use crate::playlist::Channel;

/// Low-latency ffplay flags shared by every invocation.
const LIVE_FLAGS: &[&str] = &[
    "-fflags",
    "nobuffer",
    "-flags",
    "low_delay",
    "-framedrop",
    "-probesize",
    "1000000",
    "-analyzeduration",
    "2000000",
    "-hide_banner",
    "-fs",
];

/// Command line for one player run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(config: &Config, channel: &Channel) -> Self {
        let mut args: Vec<String> = LIVE_FLAGS.iter().map(|flag| flag.to_string()).collect();
        args.extend([
            "-window_title".to_string(),
            channel.name.clone(),
            "-sync".to_string(),
            "video".to_string(),
        ]);
        if config.output_type == OutputType::Hls {
            args.push("-infbuf".to_string());
        }
        args.push(channel.url.clone());

        Self {
            program: config.player.clone(),
            args,
        }
    }

    /// Start the player with stdout discarded and stderr piped.
    pub fn spawn(&self) -> Result<(Child, Option<ChildStderr>)> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let stderr = child.stderr.take();
        Ok((child, stderr))
    }
}

/// How a supervised player ended.
#[derive(Debug)]
pub struct PlayerExit {
    pub status: io::Result<ExitStatus>,
    /// Terminated through [`PlayerHandle::kill`]
    pub killed: bool,
}

/// Handle to a player process owned by a background task.
///
/// The task waits for the process; [`PlayerHandle::kill`] asks it to
/// terminate the process and resolves once the exit has been observed.
#[derive(Debug)]
pub struct PlayerHandle {
    pid: Option<u32>,
    kill_tx: oneshot::Sender<()>,
    exited_rx: oneshot::Receiver<()>,
}

impl PlayerHandle {
    /// Move `child` into a watcher task. `on_exit` runs before the exit is
    /// reported to a pending `kill`.
    pub fn supervise<F>(mut child: Child, on_exit: F) -> Self
    where
        F: FnOnce(PlayerExit) + Send + 'static,
    {
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = oneshot::channel();

        tokio::spawn(async move {
            // A dropped handle counts as a kill request
            let exit = tokio::select! {
                status = child.wait() => PlayerExit { status, killed: false },
                _ = kill_rx => {
                    terminate(&mut child);
                    PlayerExit { status: child.wait().await, killed: true }
                }
            };
            on_exit(exit);
            let _ = exited_tx.send(());
        });

        Self {
            pid,
            kill_tx,
            exited_rx,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Force-terminate the process and wait until it is gone.
    pub async fn kill(self) {
        let _ = self.kill_tx.send(());
        let _ = self.exited_rx.await;
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok() {
                return;
            }
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!("player already gone: {}", e);
    }
}

/// ffplay on Windows can leave its window behind; close it by title.
#[cfg(windows)]
pub async fn kill_by_title(title: &str) {
    let filter = format!("WindowTitle eq {}", title);
    let result = Command::new("taskkill")
        .args(["/F", "/FI", filter.as_str(), "/T"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        tracing::warn!("taskkill failed for {}: {}", title, e);
    }
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Channel {
        Channel {
            url: "http://stream/news.m3u8".to_string(),
            name: "NEWS HD".to_string(),
            logo: None,
        }
    }

    #[test]
    fn builds_low_latency_command_line() {
        let config = Config {
            player: "/usr/local/bin/ffplay".to_string(),
            ..Config::default()
        };
        let invocation = Invocation::new(&config, &channel());

        assert_eq!(invocation.program, "/usr/local/bin/ffplay");
        assert_eq!(
            invocation.args,
            [
                "-fflags",
                "nobuffer",
                "-flags",
                "low_delay",
                "-framedrop",
                "-probesize",
                "1000000",
                "-analyzeduration",
                "2000000",
                "-hide_banner",
                "-fs",
                "-window_title",
                "NEWS HD",
                "-sync",
                "video",
                "http://stream/news.m3u8",
            ]
        );
    }

    #[test]
    fn hls_output_enables_infinite_buffer() {
        let config = Config {
            output_type: OutputType::Hls,
            ..Config::default()
        };
        let args = Invocation::new(&config, &channel()).args;

        assert_eq!(&args[args.len() - 2..], ["-infbuf", "http://stream/news.m3u8"]);
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let config = Config {
            player: "/nonexistent/livetv-player".to_string(),
            ..Config::default()
        };
        let result = Invocation::new(&config, &channel()).spawn();

        assert!(matches!(result, Err(Error::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_waits_for_exit() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let (tx, rx) = oneshot::channel();
        let handle = PlayerHandle::supervise(child, move |exit| {
            let _ = tx.send(exit);
        });

        handle.kill().await;
        let exit = rx.await.unwrap();

        assert!(exit.killed);
        assert!(!exit.status.unwrap().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn natural_exit_is_reported() {
        let child = Command::new("true").spawn().unwrap();
        let (tx, rx) = oneshot::channel();
        let _handle = PlayerHandle::supervise(child, move |exit| {
            let _ = tx.send(exit);
        });

        let exit = rx.await.unwrap();

        assert!(!exit.killed);
        assert!(exit.status.unwrap().success());
    }
}
