//! Capability set for Python snippets.
//!
//! A snippet runs in a fresh namespace seeded with a small allow-list plus the
//! modules it references. References come from a static scan of `import` and
//! `from ... import` lines and from conventional aliases used without an
//! import (`pd.`, `np.`, `plt.`).

use serde::{Deserialize, Serialize};

use crate::pattern::static_regex;

/// One name bound in the snippet namespace before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleBinding {
    /// Name visible to the snippet.
    pub binding: String,
    /// Module to import.
    pub module: String,
    /// Attribute of the module to bind instead of the module itself.
    pub attr: Option<String>,
}

impl ModuleBinding {
    pub fn module(binding: &str, module: &str) -> Self {
        Self {
            binding: binding.to_string(),
            module: module.to_string(),
            attr: None,
        }
    }

    pub fn attr(binding: &str, module: &str, attr: &str) -> Self {
        Self {
            binding: binding.to_string(),
            module: module.to_string(),
            attr: Some(attr.to_string()),
        }
    }
}

const BASE_MODULES: &[&str] = &[
    "os",
    "sys",
    "pathlib",
    "datetime",
    "json",
    "re",
    "math",
    "random",
    "time",
    "collections",
    "csv",
    "io",
];

/// Conventional aliases and the modules they stand for.
const ALIASES: &[(&str, &str)] = &[
    ("pd", "pandas"),
    ("np", "numpy"),
    ("plt", "matplotlib.pyplot"),
    ("mpl", "matplotlib"),
    ("sns", "seaborn"),
];

static_regex! {
    fn import_line() = r"^\s*import\s+(.+?)\s*(?:#.*)?$";
}

static_regex! {
    fn from_import_line() = r"^\s*from\s+([A-Za-z_][\w.]*)\s+import\s+(.+?)\s*(?:#.*)?$";
}

/// The allow-list every snippet gets.
pub fn base_capabilities() -> Vec<ModuleBinding> {
    let mut bindings: Vec<ModuleBinding> = BASE_MODULES
        .iter()
        .map(|m| ModuleBinding::module(m, m))
        .collect();
    bindings.push(ModuleBinding::attr("Path", "pathlib", "Path"));
    bindings.push(ModuleBinding::attr("StringIO", "io", "StringIO"));
    bindings
}

/// Bindings introduced by the snippet's own import statements.
pub fn scan_imports(source: &str) -> Vec<ModuleBinding> {
    let mut found = Vec::new();
    for line in source.lines() {
        if let Some(caps) = from_import_line().and_then(|re| re.captures(line)) {
            let module = &caps[1];
            for name in split_names(&caps[2]) {
                if name == "*" {
                    continue;
                }
                let (attr, binding) = split_alias(name);
                found.push(ModuleBinding::attr(binding, module, attr));
            }
        } else if let Some(caps) = import_line().and_then(|re| re.captures(line)) {
            for name in split_names(&caps[1]) {
                match name.split_once(" as ") {
                    Some((module, alias)) => {
                        found.push(ModuleBinding::module(alias.trim(), module.trim()))
                    }
                    // `import a.b` binds `a`.
                    None => {
                        let top = name.split('.').next().unwrap_or(name);
                        found.push(ModuleBinding::module(top, top));
                    }
                }
            }
        }
    }
    found
}

/// Conventional aliases the snippet uses as `alias.` without importing them.
pub fn referenced_aliases(source: &str) -> Vec<ModuleBinding> {
    ALIASES
        .iter()
        .filter(|(alias, _)| uses_alias(source, alias))
        .map(|(alias, module)| ModuleBinding::module(alias, module))
        .collect()
}

/// Full capability set for a snippet: allow-list, aliases, then imports.
/// Later entries replace earlier ones with the same binding.
pub fn capability_set(source: &str) -> Vec<ModuleBinding> {
    let mut set: Vec<ModuleBinding> = Vec::new();
    let all = base_capabilities()
        .into_iter()
        .chain(referenced_aliases(source))
        .chain(scan_imports(source));
    for binding in all {
        match set.iter_mut().find(|b| b.binding == binding.binding) {
            Some(existing) => *existing = binding,
            None => set.push(binding),
        }
    }
    set
}

fn split_names(list: &str) -> impl Iterator<Item = &str> {
    list.trim_matches(|c: char| c == '(' || c == ')' || c == '\\')
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
}

fn split_alias(name: &str) -> (&str, &str) {
    match name.split_once(" as ") {
        Some((attr, alias)) => (attr.trim(), alias.trim()),
        None => (name, name),
    }
}

fn uses_alias(source: &str, alias: &str) -> bool {
    let needle = format!("{alias}.");
    source.match_indices(&needle).any(|(idx, _)| {
        source[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == '.'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(set: &[ModuleBinding]) -> Vec<&str> {
        set.iter().map(|b| b.binding.as_str()).collect()
    }

    #[test]
    fn test_base_capabilities_include_path_and_stringio() {
        let base = base_capabilities();
        let names = bindings(&base);
        assert!(names.contains(&"os"));
        assert!(names.contains(&"collections"));
        assert!(base.contains(&ModuleBinding::attr("Path", "pathlib", "Path")));
        assert!(base.contains(&ModuleBinding::attr("StringIO", "io", "StringIO")));
    }

    #[test]
    fn test_scan_imports_handles_forms() {
        let source = "import numpy as np, os.path\n\
                      from collections import Counter, OrderedDict as OD  # comment\n\
                      from math import *\n\
                      x = 1\n";
        let found = scan_imports(source);
        assert_eq!(
            found,
            vec![
                ModuleBinding::module("np", "numpy"),
                ModuleBinding::module("os", "os"),
                ModuleBinding::attr("Counter", "collections", "Counter"),
                ModuleBinding::attr("OD", "collections", "OrderedDict"),
            ]
        );
    }

    #[test]
    fn test_referenced_aliases_need_word_boundary() {
        let source = "df = pd.DataFrame()\nvalue = snp.x\n";
        let found = referenced_aliases(source);
        assert_eq!(found, vec![ModuleBinding::module("pd", "pandas")]);
    }

    #[test]
    fn test_capability_set_lets_imports_override_base() {
        let source = "from datetime import datetime\nprint(datetime.now())\n";
        let set = capability_set(source);
        let dt: Vec<_> = set.iter().filter(|b| b.binding == "datetime").collect();
        assert_eq!(dt.len(), 1);
        assert_eq!(dt[0].attr.as_deref(), Some("datetime"));
    }
}
