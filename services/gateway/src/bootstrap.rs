//! Process bootstrap: background relaunch, listener bind, pid file and
//! process-wide setup.
//!
//! Everything here runs once, before the accept loop starts.

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use nix::sys::signal::{signal, SigHandler, Signal};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::GatewayError;

/// Flag appended to the relaunched child's arguments.
pub const DAEMON_OFF_FLAG: &str = "--daemon=false";

/// Arguments for the background child: the original arguments (without
/// the program name) with the daemon toggle forced off.
pub fn relaunch_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut child_args: Vec<OsString> = args.into_iter().skip(1).collect();
    child_args.push(OsString::from(DAEMON_OFF_FLAG));
    child_args
}

/// Relaunch the current executable in the background.
///
/// The caller exits right after; the child performs the real bootstrap.
/// Returns the child's pid.
pub fn relaunch_detached() -> Result<u32, GatewayError> {
    let exe = std::env::current_exe().map_err(GatewayError::Relaunch)?;
    let child = Command::new(exe)
        .args(relaunch_args(std::env::args_os()))
        .stdin(Stdio::null())
        .spawn()
        .map_err(GatewayError::Relaunch)?;
    Ok(child.id())
}

/// Resolve the listen address and bind the first address that works.
pub async fn bind_listener(listen_addr: &str) -> Result<TcpListener, GatewayError> {
    let normalized = cns_networking::normalize_listen_addr(listen_addr)?;
    let addrs = tokio::net::lookup_host(normalized.as_str())
        .await
        .map_err(|source| GatewayError::Bind {
            addr: normalized.clone(),
            source,
        })?;

    let mut last_error = None;
    for addr in addrs {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(bind_addr = %addr, "Listener bound");
                return Ok(listener);
            }
            Err(e) => {
                debug!(bind_addr = %addr, error = %e, "Bind attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(GatewayError::Bind {
        addr: normalized,
        source: last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve")
        }),
    })
}

/// Write the current pid, in decimal, to `path`.
pub fn write_pid_file(path: &Path) -> Result<(), GatewayError> {
    fs::write(path, std::process::id().to_string()).map_err(|source| GatewayError::PidFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Detach from the controlling terminal's session.
pub fn detach_session() -> Result<(), GatewayError> {
    nix::unistd::setsid()?;
    Ok(())
}

/// Raise the soft open-file limit to the hard limit. Returns the new limit.
pub fn raise_nofile_limit() -> Result<u64, GatewayError> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
    // An unlimited hard cap cannot be used as a soft NOFILE value
    if soft >= hard || hard == nix::libc::RLIM_INFINITY {
        return Ok(soft as u64);
    }
    setrlimit(Resource::RLIMIT_NOFILE, hard, hard)?;
    Ok(hard as u64)
}

/// Ignore SIGPIPE so writes to a closed peer return EPIPE instead of
/// killing the process.
pub fn ignore_sigpipe() -> Result<(), GatewayError> {
    // SAFETY: installs SIG_IGN, no handler code runs.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }?;
    Ok(())
}

/// Session detach, fd limit and signal setup. Failures are logged only.
pub fn prepare_process() {
    if let Err(e) = detach_session() {
        // Fails with EPERM when already a process group leader
        debug!(error = %e, "setsid skipped");
    }

    match raise_nofile_limit() {
        Ok(limit) => debug!(nofile = limit, "Open file limit set"),
        Err(e) => warn!(error = %e, "Failed to raise open file limit"),
    }

    if let Err(e) = ignore_sigpipe() {
        warn!(error = %e, "Failed to ignore SIGPIPE");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relaunch_args() {
        let args = ["/usr/bin/cns", "--listen-addr", ":8080", "--daemon"]
            .into_iter()
            .map(OsString::from);
        assert_eq!(
            relaunch_args(args),
            vec![
                OsString::from("--listen-addr"),
                OsString::from(":8080"),
                OsString::from("--daemon"),
                OsString::from("--daemon=false"),
            ]
        );
    }

    #[test]
    fn test_relaunch_args_parse_with_daemon_off() {
        let args = ["cns", "--daemon", "--udp-flag", "x"]
            .into_iter()
            .map(OsString::from);
        let mut argv = vec![OsString::from("cns")];
        argv.extend(relaunch_args(args));

        use clap::Parser;
        let config = crate::config::Config::try_parse_from(argv).unwrap();
        assert!(!config.daemon);
        assert_eq!(config.udp_flag, "x");
    }

    #[test]
    fn test_write_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cns.pid");

        write_pid_file(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[test]
    fn test_write_pid_file_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cns.pid");
        assert!(matches!(
            write_pid_file(&path),
            Err(GatewayError::PidFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_listener_ephemeral() {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_listener_rejects_bad_address() {
        assert!(matches!(
            bind_listener("no-port").await,
            Err(GatewayError::ListenAddr(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let first = bind_listener("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();
        assert!(matches!(
            bind_listener(&addr).await,
            Err(GatewayError::Bind { .. })
        ));
    }

    #[test]
    fn test_raise_nofile_limit() {
        let limit = raise_nofile_limit().unwrap();
        assert!(limit > 0);
    }
}
