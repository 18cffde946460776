//! File-path classification: language and file type.
//!
//! The extension table is built once at startup into a [`LanguageTable`] and
//! passed by reference to everything that classifies paths. Extra entries from
//! `[analysis.extensions]` are layered over the built-in set.
//!
//! | Check (first match wins) | `file_type` |
//! |--------------------------|-------------|
//! | `test_*`, `*_test`, `*.spec`, `*Test` stems | `test` |
//! | `.json`, `.yml`, `.yaml`, `.toml`, `.ini`, `.cfg`, well-known names | `config` |
//! | markdown, rst, text | `doc` |
//! | any other known language | `source` |
//! | everything else | `unknown` |

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Language tag for paths the table does not recognize.
pub const UNKNOWN: &str = "unknown";

const BUILTIN_EXTENSIONS: &[(&str, &str)] = &[
    ("py", "python"),
    ("pyi", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
    ("go", "go"),
    ("rs", "rust"),
    ("rb", "ruby"),
    ("php", "php"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("swift", "swift"),
    ("scala", "scala"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("sql", "sql"),
    ("html", "html"),
    ("htm", "html"),
    ("css", "css"),
    ("scss", "css"),
    ("md", "markdown"),
    ("markdown", "markdown"),
    ("rst", "rst"),
    ("txt", "text"),
    ("json", "json"),
    ("yml", "yaml"),
    ("yaml", "yaml"),
    ("toml", "toml"),
    ("xml", "xml"),
    ("ini", "ini"),
    ("cfg", "ini"),
];

/// Exact filenames that carry a language without an extension.
const BUILTIN_FILENAMES: &[(&str, &str)] = &[
    ("Dockerfile", "dockerfile"),
    ("Makefile", "makefile"),
    ("Jenkinsfile", "groovy"),
];

const CONFIG_EXTENSIONS: &[&str] = &["json", "yml", "yaml", "toml", "ini", "cfg"];

const CONFIG_FILENAMES: &[&str] = &[
    "Dockerfile",
    "Makefile",
    "Jenkinsfile",
    ".gitignore",
    ".dockerignore",
    ".editorconfig",
    ".env",
    "Cargo.lock",
    "package-lock.json",
];

const DOC_LANGUAGES: &[&str] = &["markdown", "rst", "text"];

/// Languages with dedicated complexity and structural heuristics.
const SUPPORTED_LANGUAGES: &[&str] = &["python", "javascript", "typescript", "java", "go", "rust"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Source,
    Test,
    Config,
    Doc,
    Unknown,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Source => "source",
            FileType::Test => "test",
            FileType::Config => "config",
            FileType::Doc => "doc",
            FileType::Unknown => "unknown",
        }
    }
}

/// Result of classifying one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub language: String,
    pub file_type: FileType,
}

impl Classification {
    pub fn is_known(&self) -> bool {
        self.language != UNKNOWN
    }
}

/// Immutable extension-to-language table.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    extensions: HashMap<String, String>,
    filenames: HashMap<String, String>,
    supported: HashSet<String>,
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }
}

impl LanguageTable {
    /// Built-in table with `overrides` (extension → language) applied on top.
    ///
    /// Extensions are matched case-insensitively; a leading dot in an
    /// override key is ignored.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut extensions: HashMap<String, String> = BUILTIN_EXTENSIONS
            .iter()
            .map(|(ext, lang)| (ext.to_string(), lang.to_string()))
            .collect();
        for (ext, lang) in overrides {
            extensions.insert(
                ext.trim_start_matches('.').to_ascii_lowercase(),
                lang.to_ascii_lowercase(),
            );
        }

        Self {
            extensions,
            filenames: BUILTIN_FILENAMES
                .iter()
                .map(|(name, lang)| (name.to_string(), lang.to_string()))
                .collect(),
            supported: SUPPORTED_LANGUAGES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Language tag for `path`, or [`UNKNOWN`].
    pub fn detect_language(&self, path: &str) -> String {
        let name = basename(path);
        if name.is_empty() {
            return UNKNOWN.to_string();
        }
        if let Some(lang) = self.filenames.get(name) {
            return lang.clone();
        }
        extension(name)
            .and_then(|ext| self.extensions.get(&ext.to_ascii_lowercase()))
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// Whether `language` has dedicated heuristics.
    pub fn is_supported(&self, language: &str) -> bool {
        self.supported.contains(language)
    }

    pub fn classify(&self, path: &str) -> Classification {
        let language = self.detect_language(path);
        let file_type = determine_file_type(path, &language);
        Classification {
            language,
            file_type,
        }
    }
}

fn determine_file_type(path: &str, language: &str) -> FileType {
    let name = basename(path);
    if is_test_file(path) {
        return FileType::Test;
    }
    if is_config_file(name) {
        return FileType::Config;
    }
    if DOC_LANGUAGES.contains(&language) {
        return FileType::Doc;
    }
    if language != UNKNOWN {
        return FileType::Source;
    }
    FileType::Unknown
}

/// Test-file naming conventions, checked on the file stem.
///
/// `test_` and `_test` are lowercase (Python, Go); `Test` is the JVM
/// convention and is matched case-sensitively.
pub fn is_test_file(path: &str) -> bool {
    let name = basename(path);
    let stem = match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    };
    if stem.is_empty() {
        return false;
    }
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".spec")
        || (stem.ends_with("Test") && stem.len() > "Test".len())
}

fn is_config_file(name: &str) -> bool {
    if CONFIG_FILENAMES.contains(&name) {
        return true;
    }
    if name.starts_with("docker-compose") {
        return true;
    }
    extension(name)
        .map(|ext| CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Extension of a basename; dotfiles like `.env` have none.
fn extension(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => Some(&name[pos + 1..]),
        _ => None,
    }
}
