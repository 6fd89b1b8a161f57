//! Local bulk-transfer service provisioning
//!
//! When the bulk-transfer service runs on this computer but is not reachable, it is
//! started from its installation directory with a log configuration pointing into the
//! runtime directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use contracts::{ChannelKind, ContractError};
use tokio::process::{Child, Command};
use tracing::{info, instrument};

use crate::probe::probe;

/// Service executable inside the installation directory
pub const SERVICE_EXECUTABLE: &str = if cfg!(windows) {
    "DataLinkTargetService.exe"
} else {
    "DataLinkTargetService"
};

/// Log configuration template, relative to the installation directory
pub const LOG_CONF_TEMPLATE: &str = "config/DataLinkTargetService.log.conf";

/// Name of the rewritten log configuration in the runtime directory
pub const LOG_CONF_NAME: &str = "DataLinkTargetService.log.conf";

const LOG_FILE_KEY: &str = "log4cplus.appender.AppenderFile.File=";

/// Redirect the file appender of a log configuration into `runtime_dir`
pub fn rewrite_log_config(template: &str, runtime_dir: &Path) -> String {
    let prefix = format!(
        "{LOG_FILE_KEY}{}{}",
        runtime_dir.display(),
        std::path::MAIN_SEPARATOR
    );
    let mut out = String::with_capacity(template.len() + prefix.len());
    for line in template.lines() {
        out.push_str(&line.replace(LOG_FILE_KEY, &prefix));
        out.push('\n');
    }
    out
}

/// Launcher of the bulk-transfer service on this computer
#[derive(Debug, Clone)]
pub struct ServiceLauncher {
    service_dir: PathBuf,
    runtime_dir: PathBuf,
    documents_dir: PathBuf,
    ready_timeout: Duration,
}

impl ServiceLauncher {
    /// `service_dir` holds the executable, `runtime_dir` receives logs and saved files
    pub fn new(service_dir: impl Into<PathBuf>, runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        Self {
            service_dir: service_dir.into(),
            documents_dir: runtime_dir.clone(),
            runtime_dir,
            ready_timeout: crate::probe::PROBE_TIMEOUT,
        }
    }

    /// Working folder handed to the service with `-f`
    pub fn with_documents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.documents_dir = dir.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn service_dir(&self) -> &Path {
        &self.service_dir
    }

    /// Write the rewritten log configuration, returning its path
    pub fn write_log_config(&self) -> Result<PathBuf, ContractError> {
        let template = std::fs::read_to_string(self.service_dir.join(LOG_CONF_TEMPLATE))?;
        let target = self.runtime_dir.join(LOG_CONF_NAME);
        std::fs::write(&target, rewrite_log_config(&template, &self.runtime_dir))?;
        Ok(target)
    }

    /// Start the service and wait until its control port `port` accepts connections
    ///
    /// # Errors
    /// Connection error naming `device` when the installation directory is missing,
    /// the process cannot be spawned or the port never opens
    #[instrument(name = "service_launch", skip(self), fields(dir = %self.service_dir.display()))]
    pub async fn launch(
        &self,
        device: &str,
        address: &str,
        port: u16,
    ) -> Result<Child, ContractError> {
        let fail = |message: String| ContractError::Connection {
            device: device.to_string(),
            channel: ChannelKind::DataLink,
            address: address.to_string(),
            port,
            message,
        };

        if !self.service_dir.is_dir() {
            return Err(fail(format!(
                "service directory '{}' does not exist",
                self.service_dir.display()
            )));
        }
        let log_conf = self
            .write_log_config()
            .map_err(|e| fail(format!("cannot prepare log configuration: {e}")))?;

        info!("starting bulk-transfer service on local computer");
        let child = Command::new(self.service_dir.join(SERVICE_EXECUTABLE))
            .arg("-f")
            .arg(&self.documents_dir)
            .arg("--logconf")
            .arg(&log_conf)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fail(format!("cannot start service: {e}")))?;

        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        while tokio::time::Instant::now() < deadline {
            if probe(address, port, Duration::from_millis(200)).await {
                return Ok(child);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Err(fail("service started but its port did not open".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_log_config() {
        let template = "log4cplus.rootLogger=INFO\nlog4cplus.appender.AppenderFile.File=dlt.log\n";
        let out = rewrite_log_config(template, Path::new("/tmp/run"));
        let expected = format!(
            "log4cplus.rootLogger=INFO\nlog4cplus.appender.AppenderFile.File=/tmp/run{}dlt.log\n",
            std::path::MAIN_SEPARATOR
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn test_write_log_config() {
        let service = tempfile::tempdir().unwrap();
        let runtime = tempfile::tempdir().unwrap();
        std::fs::create_dir(service.path().join("config")).unwrap();
        std::fs::write(
            service.path().join(LOG_CONF_TEMPLATE),
            "log4cplus.appender.AppenderFile.File=x.log\n",
        )
        .unwrap();

        let launcher = ServiceLauncher::new(service.path(), runtime.path());
        let written = launcher.write_log_config().unwrap();
        assert_eq!(written, runtime.path().join(LOG_CONF_NAME));
        let content = std::fs::read_to_string(written).unwrap();
        assert!(content.contains(&runtime.path().display().to_string()));
    }

    #[tokio::test]
    async fn test_missing_service_dir() {
        let launcher = ServiceLauncher::new("/definitely/not/here", "/tmp");
        let err = launcher.launch("tc1", "127.0.0.1", 6161).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("tc1"), "got: {text}");
        assert!(text.contains("127.0.0.1:6161"), "got: {text}");
        assert!(text.contains("does not exist"), "got: {text}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_waits_on_given_port() {
        let service = tempfile::tempdir().unwrap();
        let runtime = tempfile::tempdir().unwrap();
        std::fs::create_dir(service.path().join("config")).unwrap();
        std::fs::write(
            service.path().join(LOG_CONF_TEMPLATE),
            "log4cplus.appender.AppenderFile.File=x.log\n",
        )
        .unwrap();
        std::os::unix::fs::symlink("/bin/sh", service.path().join(SERVICE_EXECUTABLE)).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let launcher = ServiceLauncher::new(service.path(), runtime.path())
            .with_ready_timeout(Duration::from_secs(2));
        let child = launcher.launch("tc1", "127.0.0.1", port).await;
        assert!(child.is_ok(), "got: {:?}", child.err());
    }
}
