//! Pattern-based structural change detection.
//!
//! This is a line heuristic, not a parser: each supported language has a
//! handful of regexes for function, class and import declarations, applied to
//! the added and removed lines of a patch.
//!
//! - a name declared only on added lines is **added**
//! - a name declared only on removed lines is **removed**
//! - a name declared on both sides is **modified**
//! - a function/class named in a hunk header's trailing context that is not
//!   already added or removed is **modified** (its body changed)
//!
//! Multi-line signatures, renames and nested scopes are not resolved.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::models::FileChange;
use crate::patch::split_patch;

/// Declarations detected in one file's patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructuralChanges {
    pub functions_added: BTreeSet<String>,
    pub functions_modified: BTreeSet<String>,
    pub functions_removed: BTreeSet<String>,
    pub classes_added: BTreeSet<String>,
    pub classes_modified: BTreeSet<String>,
    pub classes_removed: BTreeSet<String>,
    pub imports_added: BTreeSet<String>,
    pub imports_removed: BTreeSet<String>,
}

impl StructuralChanges {
    pub fn is_empty(&self) -> bool {
        self.functions_added.is_empty()
            && self.functions_modified.is_empty()
            && self.functions_removed.is_empty()
            && self.classes_added.is_empty()
            && self.classes_modified.is_empty()
            && self.classes_removed.is_empty()
            && self.imports_added.is_empty()
            && self.imports_removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralResult {
    pub changes: StructuralChanges,
    pub analysis_success: bool,
}

/// Declaration patterns for one language. Capture group 1 is the name.
#[derive(Debug)]
struct LanguagePatterns {
    functions: Vec<Regex>,
    classes: Vec<Regex>,
    imports: Vec<Regex>,
}

impl LanguagePatterns {
    fn compile(functions: &[&str], classes: &[&str], imports: &[&str]) -> Self {
        let build = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("declaration patterns are valid"))
                .collect()
        };
        Self {
            functions: build(functions),
            classes: build(classes),
            imports: build(imports),
        }
    }
}

const PYTHON_FUNCTIONS: &[&str] = &[r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\("];
const PYTHON_CLASSES: &[&str] = &[r"^\s*class\s+([A-Za-z_]\w*)\s*[:(]"];
const PYTHON_IMPORTS: &[&str] = &[
    r"^\s*import\s+[\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*\s*$",
    r"^\s*from\s+[\w.]+\s+import\s+.+$",
];

const JS_FUNCTIONS: &[&str] = &[
    r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*[(<]",
    r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>",
];
const JS_CLASSES: &[&str] = &[
    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)",
];
const JS_IMPORTS: &[&str] = &[
    r"^\s*import\s.+$",
    r"^\s*(?:const|let|var)\s+.+=\s*require\(.+\).*$",
];
const TS_CLASSES: &[&str] = &[
    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)",
    r"^\s*(?:export\s+)?interface\s+([A-Za-z_$][\w$]*)",
];

const JAVA_FUNCTIONS: &[&str] = &[
    r"^\s*(?:(?:public|protected|private|static|final|abstract|synchronized|native|default)\s+)+(?:<[^>]+>\s+)?[\w.<>\[\],?]+(?:\s*<[^>]*>)?\s+([A-Za-z_]\w*)\s*\(",
];
const JAVA_CLASSES: &[&str] = &[
    r"^\s*(?:(?:public|protected|private|abstract|final|static|sealed)\s+)*(?:class|interface|enum|record)\s+([A-Za-z_]\w*)",
];
const JAVA_IMPORTS: &[&str] = &[r"^\s*import\s+(?:static\s+)?[\w.]+(?:\.\*)?\s*;\s*$"];

const GO_FUNCTIONS: &[&str] = &[r"^\s*func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*[\[(]"];
const GO_CLASSES: &[&str] = &[r"^\s*type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b"];
const GO_IMPORTS: &[&str] = &[
    r#"^\s*import\s+(?:[\w.]+\s+)?"[^"]+"\s*$"#,
    r#"^\s*(?:[\w.]+\s+)?"[\w./-]+"\s*$"#,
];

const RUST_FUNCTIONS: &[&str] = &[
    r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+([A-Za-z_]\w*)"#,
];
const RUST_CLASSES: &[&str] = &[
    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+([A-Za-z_]\w*)",
];
const RUST_IMPORTS: &[&str] = &[r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+[^;]+;\s*$"];

/// Heuristic structural analyzer with per-language patterns compiled once.
#[derive(Debug)]
pub struct StructuralHeuristic {
    languages: HashMap<&'static str, LanguagePatterns>,
}

impl Default for StructuralHeuristic {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuralHeuristic {
    pub fn new() -> Self {
        let mut languages = HashMap::new();
        languages.insert(
            "python",
            LanguagePatterns::compile(PYTHON_FUNCTIONS, PYTHON_CLASSES, PYTHON_IMPORTS),
        );
        languages.insert(
            "javascript",
            LanguagePatterns::compile(JS_FUNCTIONS, JS_CLASSES, JS_IMPORTS),
        );
        languages.insert(
            "typescript",
            LanguagePatterns::compile(JS_FUNCTIONS, TS_CLASSES, JS_IMPORTS),
        );
        languages.insert(
            "java",
            LanguagePatterns::compile(JAVA_FUNCTIONS, JAVA_CLASSES, JAVA_IMPORTS),
        );
        languages.insert(
            "go",
            LanguagePatterns::compile(GO_FUNCTIONS, GO_CLASSES, GO_IMPORTS),
        );
        languages.insert(
            "rust",
            LanguagePatterns::compile(RUST_FUNCTIONS, RUST_CLASSES, RUST_IMPORTS),
        );
        Self { languages }
    }

    pub fn supports(&self, language: &str) -> bool {
        self.languages.contains_key(language)
    }

    pub fn analyze(&self, change: &FileChange, language: &str) -> StructuralResult {
        let success = |changes| StructuralResult {
            changes,
            analysis_success: true,
        };

        let Some(patch) = change.patch.as_deref() else {
            return success(StructuralChanges::default());
        };
        let Some(patterns) = self.languages.get(language) else {
            return success(StructuralChanges::default());
        };

        let lines = match split_patch(patch) {
            Ok(lines) => lines,
            Err(err) => {
                tracing::warn!(file = %change.filename, error = %err, "structural analysis skipped");
                return StructuralResult {
                    changes: StructuralChanges::default(),
                    analysis_success: false,
                };
            }
        };

        let mut changes = StructuralChanges::default();

        let (added, modified, removed) = diff_names(
            &patterns.functions,
            &lines.added,
            &lines.removed,
            &lines.hunk_contexts,
        );
        changes.functions_added = added;
        changes.functions_modified = modified;
        changes.functions_removed = removed;

        let (added, modified, removed) = diff_names(
            &patterns.classes,
            &lines.added,
            &lines.removed,
            &lines.hunk_contexts,
        );
        changes.classes_added = added;
        changes.classes_modified = modified;
        changes.classes_removed = removed;

        let added_imports = collect_imports(&patterns.imports, &lines.added);
        let removed_imports = collect_imports(&patterns.imports, &lines.removed);
        changes.imports_added = added_imports.difference(&removed_imports).cloned().collect();
        changes.imports_removed = removed_imports.difference(&added_imports).cloned().collect();

        success(changes)
    }
}

type NameSets = (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>);

fn diff_names(patterns: &[Regex], added: &[&str], removed: &[&str], contexts: &[&str]) -> NameSets {
    let on_added = collect_names(patterns, added);
    let on_removed = collect_names(patterns, removed);

    let mut modified: BTreeSet<String> = on_added.intersection(&on_removed).cloned().collect();
    let only_added: BTreeSet<String> = on_added.difference(&on_removed).cloned().collect();
    let only_removed: BTreeSet<String> = on_removed.difference(&on_added).cloned().collect();

    for name in collect_names(patterns, contexts) {
        if !only_added.contains(&name) && !only_removed.contains(&name) {
            modified.insert(name);
        }
    }

    (only_added, modified, only_removed)
}

fn collect_names(patterns: &[Regex], lines: &[&str]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for line in lines {
        for pattern in patterns {
            if let Some(name) = pattern.captures(line).and_then(|c| c.get(1)) {
                names.insert(name.as_str().to_string());
                break;
            }
        }
    }
    names
}

fn collect_imports(patterns: &[Regex], lines: &[&str]) -> BTreeSet<String> {
    lines
        .iter()
        .filter(|line| patterns.iter().any(|p| p.is_match(line)))
        .map(|line| line.trim().to_string())
        .collect()
}
