//! Generated code versions.

use serde::{Deserialize, Serialize};
use toolchain_env::{normalize_language, Language};

/// One immutable version of generated code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    /// Normalized language name (may name a language without a toolchain).
    pub language: String,
    /// Declared dependencies, in declaration order, qualifiers preserved.
    pub dependencies: Vec<String>,
    pub source: String,
    pub rationale: String,
}

impl CodeArtifact {
    pub fn new(language: &str, source: impl Into<String>) -> Self {
        Self {
            language: normalize_language(language),
            dependencies: Vec::new(),
            source: source.into(),
            rationale: String::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// The known language, if the name resolves.
    pub fn language_kind(&self) -> Option<Language> {
        Language::parse(&self.language)
    }

    /// A successor carrying new source; everything else is inherited.
    pub fn revised(&self, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..self.clone()
        }
    }
}

/// Append-only arena of artifact versions for one session.
///
/// Version 0 is the generated artifact; each adopted fix appends a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChain {
    initial: CodeArtifact,
    revisions: Vec<CodeArtifact>,
}

impl ArtifactChain {
    pub fn new(initial: CodeArtifact) -> Self {
        Self {
            initial,
            revisions: Vec::new(),
        }
    }

    /// Append a version and return its index.
    pub fn push(&mut self, artifact: CodeArtifact) -> usize {
        self.revisions.push(artifact);
        self.revisions.len()
    }

    pub fn get(&self, version: usize) -> Option<&CodeArtifact> {
        match version {
            0 => Some(&self.initial),
            v => self.revisions.get(v - 1),
        }
    }

    pub fn latest(&self) -> &CodeArtifact {
        self.revisions.last().unwrap_or(&self.initial)
    }

    pub fn latest_version(&self) -> usize {
        self.revisions.len()
    }

    /// Number of versions, always at least one.
    pub fn len(&self) -> usize {
        self.revisions.len() + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodeArtifact> {
        std::iter::once(&self.initial).chain(self.revisions.iter())
    }
}
