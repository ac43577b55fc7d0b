use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use crate::platform::OperatingSystem;

/// Snapshot of a process environment, ordered by variable name
pub type EnvironmentVariables = BTreeMap<String, String>;

/// Shell dialect used for generated fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Shell {
    #[value(alias = "sh")]
    Bash,
    Zsh,
    Fish,
    Cmd,
}

impl Shell {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bash" | "sh" => Some(Shell::Bash),
            "zsh" => Some(Shell::Zsh),
            "fish" => Some(Shell::Fish),
            "cmd" => Some(Shell::Cmd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Shell::Bash => "bash",
            Shell::Zsh => "zsh",
            Shell::Fish => "fish",
            Shell::Cmd => "cmd",
        }
    }

    pub fn default_for(os: OperatingSystem) -> Self {
        if os.is_windows() {
            Shell::Cmd
        } else {
            Shell::Bash
        }
    }

    /// Quote a single word for this shell
    pub fn quote(self, value: &str) -> String {
        match self {
            Shell::Bash | Shell::Zsh => quote_posix(value),
            Shell::Fish => quote_fish(value),
            Shell::Cmd => format!("\"{}\"", value.replace('%', "%%")),
        }
    }

    /// Extension given to fragment files so the shell will source them
    pub fn fragment_extension(self) -> &'static str {
        match self {
            Shell::Bash | Shell::Zsh => "sh",
            Shell::Fish => "fish",
            Shell::Cmd => "cmd",
        }
    }
}

/// A single change applied to the calling shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set { name: String, value: String },
    Unset { name: String },
    RemoveFile(PathBuf),
}

impl Mutation {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Mutation::Set {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn unset(name: impl Into<String>) -> Self {
        Mutation::Unset { name: name.into() }
    }

    pub fn restore(name: impl Into<String>, value: Option<String>) -> Self {
        match value {
            Some(value) => Mutation::set(name, value),
            None => Mutation::unset(name),
        }
    }
}

/// Ordered list of mutations rendered for one shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub shell: Shell,
    pub mutations: Vec<Mutation>,
}

impl Fragment {
    pub fn new(shell: Shell, mutations: Vec<Mutation>) -> Self {
        Self { shell, mutations }
    }

    /// Format the fragment for its shell
    pub fn render(&self) -> String {
        let mut output = String::new();
        match self.shell {
            Shell::Bash | Shell::Zsh | Shell::Fish => {
                output.push_str("# Generated by devenv; sourced and removed by the calling script\n")
            }
            Shell::Cmd => output.push_str(
                "@REM Generated by devenv; called and removed by the calling script\r\n",
            ),
        }

        for mutation in &self.mutations {
            match self.shell {
                Shell::Bash | Shell::Zsh => format_posix(&mut output, mutation),
                Shell::Fish => format_fish(&mut output, mutation),
                Shell::Cmd => format_cmd(&mut output, mutation),
            }
        }

        output
    }
}

fn format_posix(output: &mut String, mutation: &Mutation) {
    let _ = match mutation {
        Mutation::Set { name, value } => writeln!(output, "export {}={}", name, quote_posix(value)),
        Mutation::Unset { name } => writeln!(output, "unset {}", name),
        Mutation::RemoveFile(path) => writeln!(
            output,
            "rm -f -- {}",
            quote_posix(&path.to_string_lossy())
        ),
    };
}

fn format_fish(output: &mut String, mutation: &Mutation) {
    let _ = match mutation {
        Mutation::Set { name, value } => writeln!(output, "set -gx {} {}", name, quote_fish(value)),
        Mutation::Unset { name } => writeln!(output, "set -e {}", name),
        Mutation::RemoveFile(path) => writeln!(
            output,
            "rm -f -- {}",
            quote_fish(&path.to_string_lossy())
        ),
    };
}

fn format_cmd(output: &mut String, mutation: &Mutation) {
    let _ = match mutation {
        Mutation::Set { name, value } => {
            write!(output, "@set \"{}={}\"\r\n", name, value.replace('%', "%%"))
        }
        Mutation::Unset { name } => write!(output, "@set {}=\r\n", name),
        Mutation::RemoveFile(path) => write!(
            output,
            "@del /q \"{}\" 2>nul\r\n",
            path.to_string_lossy().replace('%', "%%")
        ),
    };
}

fn quote_posix(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn quote_fish(value: &str) -> String {
    format!("'{}'", value.replace('\\', r"\\").replace('\'', r"\'"))
}

/// Apply mutations to an in-memory environment the way the sourced fragment
/// applies them to a shell.
pub fn apply(variables: &mut EnvironmentVariables, mutations: &[Mutation]) {
    for mutation in mutations {
        match mutation {
            Mutation::Set { name, value } => {
                variables.insert(name.clone(), value.clone());
            }
            Mutation::Unset { name } => {
                variables.remove(name);
            }
            Mutation::RemoveFile(path) => {
                let _ = fs::remove_file(path);
            }
        }
    }
}
