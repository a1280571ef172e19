//! Desktop voice-chat app installation and launch.

#[cfg(test)]
use mockall::automock;
use serde::Serialize;

use crate::error::ClientError;

/// How the desktop app is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallKind {
    Flatpak,
    Native,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Installation {
    pub flatpak: bool,
    pub native: bool,
}

impl Installation {
    pub fn installed(&self) -> bool {
        self.flatpak || self.native
    }
}

/// デスクトップアプリの検出と起動
#[cfg_attr(test, automock)]
pub trait AppLauncher: Send + Sync {
    fn installation(&self) -> Installation;

    /// Flatpak を優先して起動し、起動した形態を返す
    fn launch(&self) -> Result<InstallKind, ClientError>;
}
