//! Operating system and architecture detection

use std::fmt;

/// Directory name used by tools that ship a single build for every OS
pub const AGNOSTIC_DIR: &str = "Agnostic";

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingSystem {
    Linux,
    MacOS,
    Bsd,
    Windows,
}

impl OperatingSystem {
    pub const ALL: [OperatingSystem; 4] = [
        OperatingSystem::Linux,
        OperatingSystem::MacOS,
        OperatingSystem::Bsd,
        OperatingSystem::Windows,
    ];

    /// Detect the current operating system at compile time
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            OperatingSystem::Windows
        } else if cfg!(target_os = "macos") {
            OperatingSystem::MacOS
        } else if cfg!(any(
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            OperatingSystem::Bsd
        } else {
            OperatingSystem::Linux
        }
    }

    /// Name used for `Generated/<os>` and `Tools/<name>/<version>/<os>` directories
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperatingSystem::Linux => "Linux",
            OperatingSystem::MacOS => "MacOS",
            OperatingSystem::Bsd => "BSD",
            OperatingSystem::Windows => "Windows",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|os| os.as_str().eq_ignore_ascii_case(name))
    }

    pub const fn is_windows(&self) -> bool {
        matches!(self, OperatingSystem::Windows)
    }

    /// Separator used by PATH-like variables
    pub const fn path_separator(&self) -> char {
        if self.is_windows() {
            ';'
        } else {
            ':'
        }
    }

    /// Extension of the wrapper scripts written by setup
    pub const fn script_extension(&self) -> &'static str {
        if self.is_windows() {
            "cmd"
        } else {
            "sh"
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X64,
    X86,
    Arm64,
    Arm,
}

impl Architecture {
    pub const ALL: [Architecture; 4] = [
        Architecture::X64,
        Architecture::X86,
        Architecture::Arm64,
        Architecture::Arm,
    ];

    /// Detect the current architecture at compile time
    pub const fn current() -> Self {
        if cfg!(target_arch = "aarch64") {
            Architecture::Arm64
        } else if cfg!(target_arch = "arm") {
            Architecture::Arm
        } else if cfg!(target_arch = "x86") {
            Architecture::X86
        } else {
            Architecture::X64
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Architecture::X64 => "x64",
            Architecture::X86 => "x86",
            Architecture::Arm64 => "arm64",
            Architecture::Arm => "arm",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Combined OS and architecture, resolved once at entry and passed down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: OperatingSystem,
    pub arch: Architecture,
}

impl Platform {
    pub const fn new(os: OperatingSystem, arch: Architecture) -> Self {
        Self { os, arch }
    }

    pub const fn current() -> Self {
        Self::new(OperatingSystem::current(), Architecture::current())
    }

    /// Split a PATH-like value into its non-empty entries
    pub fn split_paths(&self, value: &str) -> Vec<String> {
        value
            .split(self.os.path_separator())
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn join_paths<S: AsRef<str>>(&self, entries: &[S]) -> String {
        let separator = self.os.path_separator().to_string();
        entries
            .iter()
            .map(|entry| entry.as_ref())
            .collect::<Vec<_>>()
            .join(&separator)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}
