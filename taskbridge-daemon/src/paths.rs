use std::path::{Path, PathBuf};

pub const DAEMON_LABEL: &str = "dev.taskbridge.daemon";

pub const DAEMON_STDOUT_LOG: &str = "taskbridge.log";
pub const DAEMON_STDERR_LOG: &str = "taskbridge-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn bridge_root(home: &Path) -> PathBuf {
    home.join(".taskbridge")
}

pub fn run_dir(home: &Path) -> PathBuf {
    bridge_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    bridge_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}
