//! Locating the peer's IPC socket.

use std::path::{Path, PathBuf};

/// Socket file name prefix; the peer numbers its sockets 0-9.
pub const SOCKET_PREFIX: &str = "discord-ipc-";
/// Sandboxed (Flatpak) install location, relative to the runtime directory.
pub const SANDBOX_SUBDIR: &str = "app/com.discordapp.Discord";
/// Number of socket indices tried.
pub const SOCKET_INDICES: u8 = 10;

/// Anything that can produce a connectable socket path.
pub trait EndpointLocator: Send + Sync {
    /// Path of a socket that exists right now, or `None`.
    fn locate(&self) -> Option<PathBuf>;
}

/// Always returns the configured path if it exists.
#[derive(Debug, Clone)]
pub struct FixedEndpoint {
    path: PathBuf,
}

impl FixedEndpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EndpointLocator for FixedEndpoint {
    fn locate(&self) -> Option<PathBuf> {
        self.path.exists().then(|| self.path.clone())
    }
}

/// Looks in the conventional socket locations.
///
/// For each runtime directory and each index 0-9 it tries, in order, the
/// sandboxed subdirectory, the runtime directory itself and the temp directory.
#[derive(Debug, Clone)]
pub struct IpcSocketLocator {
    runtime_dirs: Vec<PathBuf>,
    temp_dir: PathBuf,
}

impl IpcSocketLocator {
    pub fn new(runtime_dirs: Vec<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dirs,
            temp_dir: temp_dir.into(),
        }
    }

    /// Locations derived from the environment: `$XDG_RUNTIME_DIR`, the
    /// default desktop user's `/run/user/1000`, and `$TMPDIR` or `/tmp`.
    pub fn from_env() -> Self {
        let mut runtime_dirs = Vec::new();
        if let Some(dir) = std::env::var_os("XDG_RUNTIME_DIR") {
            runtime_dirs.push(PathBuf::from(dir));
        }
        let default_user_dir = PathBuf::from("/run/user/1000");
        if !runtime_dirs.contains(&default_user_dir) {
            runtime_dirs.push(default_user_dir);
        }
        let temp_dir = std::env::var_os("TMPDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        Self::new(runtime_dirs, temp_dir)
    }

    /// Every candidate path, in lookup order
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for runtime_dir in &self.runtime_dirs {
            for index in 0..SOCKET_INDICES {
                let name = format!("{SOCKET_PREFIX}{index}");
                paths.push(runtime_dir.join(SANDBOX_SUBDIR).join(&name));
                paths.push(runtime_dir.join(&name));
                paths.push(self.temp_dir.join(&name));
            }
        }
        if self.runtime_dirs.is_empty() {
            for index in 0..SOCKET_INDICES {
                paths.push(self.temp_dir.join(format!("{SOCKET_PREFIX}{index}")));
            }
        }
        paths
    }
}

impl Default for IpcSocketLocator {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EndpointLocator for IpcSocketLocator {
    fn locate(&self) -> Option<PathBuf> {
        let found = self.candidates().into_iter().find(|path| Path::exists(path));
        match &found {
            Some(path) => tracing::info!("IPC socket found at {}", path.display()),
            None => tracing::warn!(
                "No IPC socket found (runtime dirs: {:?}, temp dir: {})",
                self.runtime_dirs,
                self.temp_dir.display()
            ),
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_candidates_list_sandbox_first() {
        // テスト項目: 候補はサンドボックス、ランタイム、temp の順に並ぶ
        // given (前提条件):
        let locator = IpcSocketLocator::new(vec![PathBuf::from("/run/user/7")], "/tmp");

        // when (操作):
        let candidates = locator.candidates();

        // then (期待する結果):
        assert_eq!(candidates.len(), 30);
        assert_eq!(
            candidates[0],
            PathBuf::from("/run/user/7/app/com.discordapp.Discord/discord-ipc-0")
        );
        assert_eq!(candidates[1], PathBuf::from("/run/user/7/discord-ipc-0"));
        assert_eq!(candidates[2], PathBuf::from("/tmp/discord-ipc-0"));
        assert_eq!(candidates[29], PathBuf::from("/tmp/discord-ipc-9"));
    }

    #[test]
    fn test_locate_finds_existing_socket() {
        // テスト項目: 存在するソケットパスが返される
        // given (前提条件):
        let runtime = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let socket = runtime.path().join("discord-ipc-3");
        fs::write(&socket, b"").unwrap();
        let locator = IpcSocketLocator::new(vec![runtime.path().to_path_buf()], temp.path());

        // when (操作):
        let found = locator.locate();

        // then (期待する結果):
        assert_eq!(found, Some(socket));
    }

    #[test]
    fn test_locate_returns_none_when_absent() {
        // テスト項目: 候補が存在しない場合は None
        // given (前提条件):
        let runtime = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let locator = IpcSocketLocator::new(vec![runtime.path().to_path_buf()], temp.path());

        // when (操作):
        let found = locator.locate();

        // then (期待する結果):
        assert_eq!(found, None);
    }

    #[test]
    fn test_fixed_endpoint_requires_existing_path() {
        // テスト項目: FixedEndpoint は存在するパスのみ返す
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let locator = FixedEndpoint::new(&path);

        // when (操作):
        let before = locator.locate();
        fs::write(&path, b"").unwrap();
        let after = locator.locate();

        // then (期待する結果):
        assert_eq!(before, None);
        assert_eq!(after, Some(path));
    }
}
