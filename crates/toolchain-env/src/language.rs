//! Canonical language names and the synonym table used to reach them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A language with a known toolchain contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    CSharp,
    Cpp,
    Php,
    Ruby,
    R,
    Shell,
}

impl Language {
    /// Every supported language, in table order.
    pub const ALL: [Language; 9] = [
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::CSharp,
        Language::Cpp,
        Language::Php,
        Language::Ruby,
        Language::R,
        Language::Shell,
    ];

    /// Canonical lowercase key (also the serde representation).
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::Cpp => "cpp",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::R => "r",
            Language::Shell => "shell",
        }
    }

    /// Human-facing toolchain name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "Node.js",
            Language::Java => "Java (JDK)",
            Language::CSharp => ".NET SDK",
            Language::Cpp => "C/C++ compiler",
            Language::Php => "PHP",
            Language::Ruby => "Ruby",
            Language::R => "R",
            Language::Shell => "POSIX shell",
        }
    }

    /// Resolve a free-form language name through the synonym table.
    pub fn parse(name: &str) -> Option<Language> {
        match normalize_language(name).as_str() {
            "python" => Some(Language::Python),
            "javascript" => Some(Language::JavaScript),
            "java" => Some(Language::Java),
            "csharp" => Some(Language::CSharp),
            "cpp" => Some(Language::Cpp),
            "php" => Some(Language::Php),
            "ruby" => Some(Language::Ruby),
            "r" => Some(Language::R),
            "shell" => Some(Language::Shell),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

/// A language name that has no entry in the table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::parse(s).ok_or_else(|| UnknownLanguage(normalize_language(s)))
    }
}

/// Lowercase, trim, and map common abbreviations to canonical names.
///
/// Names without a synonym entry pass through lowercased so callers can
/// still report what was asked for.
pub fn normalize_language(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let canonical = match lowered.as_str() {
        "py" | "python3" | "py3" => "python",
        "js" | "node" | "nodejs" | "node.js" => "javascript",
        "c#" | "cs" | "dotnet" | ".net" => "csharp",
        "c++" | "c" | "cxx" | "cc" => "cpp",
        "rb" => "ruby",
        "rscript" => "r",
        "sh" | "bash" | "posix-shell" => "shell",
        other => other,
    };
    canonical.to_string()
}
