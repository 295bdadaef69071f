//! Host platform detection.
//!
//! The platform is resolved once at startup and used to pick raw-reading
//! providers. Collectors never branch on the OS themselves.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin,
    Solaris,
    Other,
}

impl Platform {
    /// Platform this binary was built for.
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        let os = os.to_ascii_lowercase();
        if os.starts_with("linux") {
            Platform::Linux
        } else if os.starts_with("darwin") || os.starts_with("macos") {
            Platform::Darwin
        } else if os.starts_with("solaris") || os.starts_with("sunos") || os == "illumos" {
            Platform::Solaris
        } else {
            Platform::Other
        }
    }

    /// True if the procfs providers can be used.
    pub fn has_procfs(self) -> bool {
        matches!(self, Platform::Linux)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
            Platform::Solaris => "solaris",
            Platform::Other => "other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_os() {
        assert_eq!(Platform::from_os("linux"), Platform::Linux);
        assert_eq!(Platform::from_os("linux42.0"), Platform::Linux);
        assert_eq!(Platform::from_os("macos"), Platform::Darwin);
        assert_eq!(Platform::from_os("darwin42.0"), Platform::Darwin);
        assert_eq!(Platform::from_os("solaris"), Platform::Solaris);
        assert_eq!(Platform::from_os("chunkybacon"), Platform::Other);
    }

    #[test]
    fn test_only_linux_has_procfs() {
        assert!(Platform::Linux.has_procfs());
        assert!(!Platform::Darwin.has_procfs());
        assert!(!Platform::Other.has_procfs());
    }
}
