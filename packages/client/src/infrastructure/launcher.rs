//! Finds and starts the desktop app (Flatpak or native binary).

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

use crate::{
    domain::{AppLauncher, InstallKind, Installation},
    error::ClientError,
};

pub const FLATPAK_APP_ID: &str = "com.discordapp.Discord";

const SYSTEM_BINARIES: [&str; 2] = ["/usr/bin/discord", "/usr/bin/Discord"];

pub struct DesktopLauncher {
    /// Per-user Flatpak data directory, present once the app has run
    flatpak_dir: Option<PathBuf>,
    native_binaries: Vec<PathBuf>,
}

impl DesktopLauncher {
    pub fn new(flatpak_dir: Option<PathBuf>, native_binaries: Vec<PathBuf>) -> Self {
        Self {
            flatpak_dir,
            native_binaries,
        }
    }

    /// `~/.var/app/<id>`, the system binaries and `~/Discord/Discord`.
    pub fn from_env() -> Self {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let mut native_binaries: Vec<PathBuf> = SYSTEM_BINARIES.iter().map(PathBuf::from).collect();
        if let Some(home) = &home {
            native_binaries.push(home.join("Discord").join("Discord"));
        }
        Self::new(
            home.map(|home| home.join(".var").join("app").join(FLATPAK_APP_ID)),
            native_binaries,
        )
    }

    fn has_flatpak(&self) -> bool {
        self.flatpak_dir.as_deref().is_some_and(Path::exists)
    }

    fn native_binary(&self) -> Option<&Path> {
        self.native_binaries
            .iter()
            .map(PathBuf::as_path)
            .find(|path| path.exists())
    }
}

impl AppLauncher for DesktopLauncher {
    fn installation(&self) -> Installation {
        Installation {
            flatpak: self.has_flatpak(),
            native: self.native_binary().is_some(),
        }
    }

    fn launch(&self) -> Result<InstallKind, ClientError> {
        if self.has_flatpak() {
            spawn_detached(OsStr::new("flatpak"), &["run", FLATPAK_APP_ID])?;
            return Ok(InstallKind::Flatpak);
        }
        if let Some(binary) = self.native_binary() {
            spawn_detached(binary.as_os_str(), &[])?;
            return Ok(InstallKind::Native);
        }
        Err(ClientError::NotInstalled)
    }
}

/// Start `program` in its own process group with no stdio attached.
fn spawn_detached(program: &OsStr, args: &[&str]) -> Result<(), ClientError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| ClientError::Launch(format!("{}: {}", program.to_string_lossy(), e)))?;
    tracing::info!(
        "Started {} (pid {:?})",
        program.to_string_lossy(),
        child.id()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installation_reports_existing_paths() {
        // テスト項目: 存在するパスだけがインストール済みとして報告される
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("Discord");
        std::fs::write(&binary, "").unwrap();
        let launcher = DesktopLauncher::new(
            Some(dir.path().join("missing-flatpak")),
            vec![dir.path().join("missing"), binary],
        );

        // when (操作):
        let installation = launcher.installation();

        // then (期待する結果):
        assert_eq!(
            installation,
            Installation {
                flatpak: false,
                native: true
            }
        );
        assert!(installation.installed());
    }

    #[test]
    fn test_launch_without_install_fails() {
        // テスト項目: どの形態も見つからない場合は NotInstalled を返し、何も起動しない
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let launcher = DesktopLauncher::new(None, vec![dir.path().join("missing")]);

        // when (操作):
        let result = launcher.launch();

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::NotInstalled)));
        assert!(!launcher.installation().installed());
    }

    #[tokio::test]
    async fn test_launch_native_binary() {
        // テスト項目: Flatpak が無ければネイティブのバイナリを起動する
        // given (前提条件):
        let shell = PathBuf::from("/bin/sh");
        if !shell.exists() {
            return;
        }
        let launcher = DesktopLauncher::new(None, vec![shell]);

        // when (操作):
        let result = launcher.launch();

        // then (期待する結果):
        assert_eq!(result.unwrap(), InstallKind::Native);
    }
}
