//! Code memory
//!
//! Structured summaries of files generated so far. The memory is private to
//! the synthesis engine, append-only, and ordered by target index; each
//! generation call sees only the subset [`select_relevant`] picks for its
//! target.

use crate::blueprint::{path_parent, path_stem, TargetFile};
use crate::error::{ExtractionError, SynthesisError};
use regex::Regex;
use repro_artifact::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Module stems that aggregate their directory
const PACKAGE_MODULES: [&str; 4] = ["__init__", "mod", "lib", "index"];

/// Shortest symbol or module name matched against role text
const MIN_MENTION_LEN: usize = 3;

/// Cap on interface lines kept per file
const MAX_INTERFACES: usize = 32;

/// Summary of one generated file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMemoryEntry {
    /// Blueprint index of the target this entry summarizes
    pub target_index: usize,
    /// File path
    pub path: String,
    /// Module stem
    pub module: String,
    /// Public names defined by the file
    pub exported_symbols: Vec<String>,
    /// Modules the file imports
    pub imports: Vec<String>,
    /// Role the blueprint assigned to the file
    pub responsibilities: String,
    /// Signature lines of the public surface
    pub interfaces: Vec<String>,
    /// Hash of the generated content
    pub content_hash: ContentHash,
}

/// Append-only, ordered memory
#[derive(Debug, Clone, Default)]
pub struct CodeMemory {
    entries: Vec<CodeMemoryEntry>,
}

impl CodeMemory {
    /// Create empty memory
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    ///
    /// # Errors
    /// `SynthesisError::MemoryOrder` unless the entry's target index is
    /// greater than every index already recorded
    pub fn append(&mut self, entry: CodeMemoryEntry) -> Result<(), SynthesisError> {
        if let Some(last) = self.entries.last() {
            if entry.target_index <= last.target_index {
                return Err(SynthesisError::MemoryOrder {
                    index: entry.target_index,
                    last: last.target_index,
                });
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Entries in generation order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[CodeMemoryEntry] {
        &self.entries
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entries relevant to `target`, in memory order.
///
/// Pure: the same memory and target always give the same selection. Only
/// entries for targets earlier in blueprint order are considered.
#[must_use]
pub fn select_relevant<'m>(memory: &'m CodeMemory, target: &TargetFile) -> Vec<&'m CodeMemoryEntry> {
    let role_words = words(&target.role);
    memory
        .entries()
        .iter()
        .filter(|entry| entry.target_index < target.index)
        .filter(|entry| {
            is_declared_dependency(entry, target)
                || is_mentioned(entry, &role_words)
                || is_sibling_package(entry, target)
        })
        .collect()
}

fn is_declared_dependency(entry: &CodeMemoryEntry, target: &TargetFile) -> bool {
    target
        .depends_on
        .iter()
        .any(|dep| dep == &entry.path || (!dep.contains('.') && path_stem(dep) == entry.module))
}

fn is_mentioned(entry: &CodeMemoryEntry, role_words: &HashSet<String>) -> bool {
    let mentioned = |name: &str| name.len() >= MIN_MENTION_LEN && role_words.contains(&name.to_lowercase());
    mentioned(&entry.module) || entry.exported_symbols.iter().any(|s| mentioned(s))
}

fn is_sibling_package(entry: &CodeMemoryEntry, target: &TargetFile) -> bool {
    entry.path != target.path
        && path_parent(&entry.path) == target.parent()
        && PACKAGE_MODULES.contains(&entry.module.as_str())
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Derives a memory entry from generated content
pub trait MemoryExtractor: Send + Sync + std::fmt::Debug {
    /// Summarize one file.
    ///
    /// # Errors
    /// Content that cannot be summarized; the caller omits the entry
    fn extract(&self, target: &TargetFile, content: &str) -> Result<CodeMemoryEntry, ExtractionError>;
}

/// Line-oriented definition and import extractor
///
/// Recognizes Python, Rust, JavaScript/TypeScript and Go. Other file types
/// get an entry with no symbols.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolExtractor;

impl SymbolExtractor {
    /// Create extractor
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct LanguageRules {
    definitions: Vec<Regex>,
    imports: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid extractor pattern"))
        .collect()
}

fn python_rules() -> &'static LanguageRules {
    static RULES: OnceLock<LanguageRules> = OnceLock::new();
    RULES.get_or_init(|| LanguageRules {
        definitions: compile(&[
            r"^(?:async\s+)?def\s+([A-Za-z]\w*)",
            r"^class\s+([A-Za-z]\w*)",
            r"^([A-Z][A-Z0-9_]+)\s*(?::[^=]+)?=",
        ]),
        imports: compile(&[r"^\s*import\s+([\w.]+)", r"^\s*from\s+([\w.]+)\s+import"]),
    })
}

fn rust_rules() -> &'static LanguageRules {
    static RULES: OnceLock<LanguageRules> = OnceLock::new();
    RULES.get_or_init(|| LanguageRules {
        definitions: compile(&[
            r"^pub\s+(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|type|const|static|mod)\s+([A-Za-z_]\w*)",
        ]),
        imports: compile(&[r"^\s*(?:pub\s+)?use\s+([\w:]+)"]),
    })
}

fn script_rules() -> &'static LanguageRules {
    static RULES: OnceLock<LanguageRules> = OnceLock::new();
    RULES.get_or_init(|| LanguageRules {
        definitions: compile(&[
            r"^export\s+(?:default\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
        ]),
        imports: compile(&[
            r#"^\s*import\s+.*?from\s+['"]([^'"]+)['"]"#,
            r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
        ]),
    })
}

fn go_rules() -> &'static LanguageRules {
    static RULES: OnceLock<LanguageRules> = OnceLock::new();
    RULES.get_or_init(|| LanguageRules {
        definitions: compile(&[
            r"^func\s+(?:\([^)]*\)\s*)?([A-Z]\w*)",
            r"^type\s+([A-Z]\w*)",
        ]),
        imports: compile(&[r#"^\s*import\s+"([^"]+)""#, r#"^\s+"([\w./-]+)"\s*$"#]),
    })
}

fn rules_for(extension: Option<&str>) -> Option<&'static LanguageRules> {
    match extension? {
        "py" => Some(python_rules()),
        "rs" => Some(rust_rules()),
        "js" | "jsx" | "mjs" | "ts" | "tsx" => Some(script_rules()),
        "go" => Some(go_rules()),
        _ => None,
    }
}

impl MemoryExtractor for SymbolExtractor {
    fn extract(&self, target: &TargetFile, content: &str) -> Result<CodeMemoryEntry, ExtractionError> {
        if content.trim().is_empty() {
            return Err(ExtractionError::EmptyContent);
        }
        if content.contains('\0') {
            return Err(ExtractionError::Binary);
        }

        let mut exported_symbols = Vec::new();
        let mut imports = Vec::new();
        let mut interfaces = Vec::new();

        if let Some(rules) = rules_for(target.extension()) {
            for line in content.lines() {
                for re in &rules.definitions {
                    if let Some(name) = re.captures(line).and_then(|c| c.get(1)) {
                        let name = name.as_str().to_string();
                        if !exported_symbols.contains(&name) {
                            exported_symbols.push(name);
                        }
                        if interfaces.len() < MAX_INTERFACES {
                            interfaces.push(signature(line));
                        }
                        break;
                    }
                }
                for re in &rules.imports {
                    if let Some(module) = re.captures(line).and_then(|c| c.get(1)) {
                        let module = module.as_str().to_string();
                        if !imports.contains(&module) {
                            imports.push(module);
                        }
                    }
                }
            }
        }

        Ok(CodeMemoryEntry {
            target_index: target.index,
            path: target.path.clone(),
            module: target.stem().to_string(),
            exported_symbols,
            imports,
            responsibilities: target.role.clone(),
            interfaces,
            content_hash: ContentHash::compute(content.as_bytes()),
        })
    }
}

/// Definition line without its body opener
fn signature(line: &str) -> String {
    line.trim()
        .trim_end_matches('{')
        .trim_end_matches(':')
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(index: usize, path: &str, role: &str, deps: &[&str]) -> TargetFile {
        TargetFile {
            index,
            path: path.into(),
            role: role.into(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            needs_reference: None,
        }
    }

    fn entry(index: usize, path: &str, symbols: &[&str]) -> CodeMemoryEntry {
        CodeMemoryEntry {
            target_index: index,
            path: path.into(),
            module: path_stem(path).into(),
            exported_symbols: symbols.iter().map(|s| s.to_string()).collect(),
            imports: vec![],
            responsibilities: String::new(),
            interfaces: vec![],
            content_hash: ContentHash::compute(path.as_bytes()),
        }
    }

    fn memory() -> CodeMemory {
        let mut m = CodeMemory::new();
        m.append(entry(0, "pkg/__init__.py", &[])).unwrap();
        m.append(entry(1, "pkg/layers.py", &["Attention", "FeedForward"])).unwrap();
        m.append(entry(2, "data.py", &["load_dataset"])).unwrap();
        m.append(entry(3, "utils.py", &["seed"])).unwrap();
        m
    }

    #[test]
    fn append_enforces_order() {
        let mut m = memory();
        let err = m.append(entry(2, "late.py", &[])).unwrap_err();
        assert!(matches!(err, SynthesisError::MemoryOrder { index: 2, last: 3 }));
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn selects_dependencies_mentions_and_package_modules() {
        let m = memory();
        let t = target(4, "pkg/model.py", "Stacks Attention blocks", &["data.py"]);
        let selected: Vec<_> = select_relevant(&m, &t).iter().map(|e| e.path.as_str()).collect();
        assert_eq!(selected, vec!["pkg/__init__.py", "pkg/layers.py", "data.py"]);
    }

    #[test]
    fn module_stem_mention_counts() {
        let m = memory();
        let t = target(4, "train.py", "training loop using utils for seeding", &[]);
        let selected: Vec<_> = select_relevant(&m, &t).iter().map(|e| e.path.as_str()).collect();
        assert_eq!(selected, vec!["utils.py"]);
    }

    #[test]
    fn later_entries_are_never_selected() {
        let m = memory();
        let t = target(2, "data.py", "uses seed and Attention", &["utils.py"]);
        let selected: Vec<_> = select_relevant(&m, &t).iter().map(|e| e.path.as_str()).collect();
        assert_eq!(selected, vec!["pkg/layers.py"]);
    }

    #[test]
    fn selection_is_idempotent() {
        let m = memory();
        let t = target(4, "pkg/model.py", "Attention model", &["utils.py"]);
        assert_eq!(select_relevant(&m, &t), select_relevant(&m, &t));
    }

    #[test]
    fn python_extraction() {
        let content = "import torch\nfrom pkg.layers import Attention\n\nHIDDEN_DIM = 512\n\nclass Transformer(nn.Module):\n    def forward(self, x):\n        return x\n\ndef build_model(cfg):\n    return Transformer()\n\ndef _private():\n    pass\n";
        let t = target(3, "pkg/model.py", "model", &[]);
        let e = SymbolExtractor.extract(&t, content).unwrap();
        assert_eq!(e.exported_symbols, vec!["HIDDEN_DIM", "Transformer", "build_model"]);
        assert_eq!(e.imports, vec!["torch", "pkg.layers"]);
        assert_eq!(e.interfaces[1], "class Transformer(nn.Module)");
        assert_eq!(e.module, "model");
        assert_eq!(e.target_index, 3);
    }

    #[test]
    fn rust_extraction() {
        let content = "use std::collections::HashMap;\n\npub struct Model {\n    w: f32,\n}\n\npub fn train(m: &mut Model) {}\nfn helper() {}\n";
        let t = target(0, "src/lib.rs", "", &[]);
        let e = SymbolExtractor.extract(&t, content).unwrap();
        assert_eq!(e.exported_symbols, vec!["Model", "train"]);
        assert_eq!(e.imports, vec!["std::collections::HashMap"]);
    }

    #[test]
    fn unknown_language_still_yields_entry() {
        let t = target(0, "README.md", "docs", &[]);
        let e = SymbolExtractor.extract(&t, "# Title\n").unwrap();
        assert!(e.exported_symbols.is_empty());
    }

    #[test]
    fn empty_and_binary_content_fail() {
        let t = target(0, "a.py", "", &[]);
        assert_eq!(SymbolExtractor.extract(&t, "  \n"), Err(ExtractionError::EmptyContent));
        assert_eq!(SymbolExtractor.extract(&t, "x\0y"), Err(ExtractionError::Binary));
    }
}
