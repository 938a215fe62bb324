//! Common test utilities for krmpack integration tests

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestPackage {
    #[allow(dead_code)]
    pub temp: TempDir,
    pub path: PathBuf,
}

impl TestPackage {
    /// Create a package directory with a minimal Kptfile.
    pub fn new(name: &str) -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let path = temp.path().to_path_buf();
        std::fs::write(
            path.join("Kptfile"),
            format!("apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: {name}\n"),
        )
        .expect("Failed to write Kptfile");
        Self { temp, path }
    }

    /// Replace the Kptfile wholesale (for packages declaring pipelines).
    pub fn write_kptfile(&self, content: &str) {
        std::fs::write(self.path.join("Kptfile"), content).expect("Failed to write Kptfile");
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let file_path = self.path.join(rel);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
    }

    pub fn read_file(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path.join(rel)).expect("Failed to read file")
    }

    pub fn file_exists(&self, rel: &str) -> bool {
        self.path.join(rel).exists()
    }

    /// Write an executable shell script into the package.
    #[cfg(unix)]
    pub fn write_script(&self, rel: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let file_path = self.path.join(rel);
        std::fs::write(&file_path, format!("#!/bin/sh\n{body}"))
            .expect("Failed to write script");
        let mut perms = std::fs::metadata(&file_path)
            .expect("Failed to stat script")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&file_path, perms).expect("Failed to chmod script");
    }
}

/// The krmpack binary under test.
pub fn krmpack() -> Command {
    Command::cargo_bin("krmpack").expect("Failed to locate krmpack binary")
}

#[allow(dead_code)]
pub fn krmpack_in(dir: &Path) -> Command {
    let mut cmd = krmpack();
    cmd.current_dir(dir);
    cmd
}

pub const DEPLOYMENT: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx-deployment # edge proxy
  labels:
    app: nginx
spec:
  replicas: 3
";
