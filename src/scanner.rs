//! Repository scanner & file classifier (SPEC_FULL §4.E).
//!
//! A read-only index of the working tree, bucketed for the iteration-aware
//! views the orchestrator needs. Writing always goes through `apply.rs`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::content::looks_binary;
use crate::error::Result;

const IGNORE_DIRS: &[&str] = &[
   ".git",
   ".hg",
   ".svn",
   "__pycache__",
   ".mypy_cache",
   ".ruff_cache",
   ".pytest_cache",
   "node_modules",
   "dist",
   "build",
   "target",
   ".tox",
   "htmlcov",
   ".idea",
   ".vscode",
   ".cache",
   "logs",
   "venv",
   ".venv",
   "env",
   ".next",
   ".nuxt",
   "coverage",
];

const IGNORE_FILE_SUFFIXES: &[&str] =
   &[".pyc", ".pyo", ".pyd", ".so", ".dylib", ".exe", ".dll", ".obj", ".a", ".o", ".class", ".jar", ".log", ".tmp", ".swp", ".swo"];

const IGNORE_FILE_BASENAMES: &[&str] = &[".DS_Store", "Thumbs.db", ".coverage", "coverage.xml"];

const DOC_EXTS: &[&str] = &[".md", ".rst", ".adoc", ".org", ".txt", ".markdown"];
const DOC_BASENAMES: &[&str] =
   &["README", "CHANGELOG", "CONTRIBUTING", "LICENSE", "SECURITY", "CODE_OF_CONDUCT"];
const DOC_DIR_HINTS: &[&str] = &["docs", "doc", "documentation", "guides", "site", "book", "mkdocs"];

const SETUP_BASENAMES: &[&str] = &[
   "Cargo.toml",
   "Cargo.lock",
   "package.json",
   "package-lock.json",
   "yarn.lock",
   "pnpm-lock.yaml",
   "Makefile",
   "Dockerfile",
   "docker-compose.yml",
   "docker-compose.yaml",
   ".pre-commit-config.yaml",
   ".pre-commit-config.yml",
   ".gitlab-ci.yml",
   "azure-pipelines.yml",
];
const SETUP_DIR_HINTS: &[&str] = &[".github/workflows", ".github/actions", "ci", ".ci"];

const EXAMPLE_DIR_HINTS: &[&str] = &["examples", "example", "sample", "samples"];

const TEST_DIR_HINTS: &[&str] = &["tests", "test", "spec", "specs"];
const TEST_FILE_PREFIXES: &[&str] = &["test_"];
const TEST_FILE_SUFFIXES: &[&str] = &["_test.py", "_test.go", "_test.rs", "_test.rb", "_test.ts", "_test.js"];
const TEST_FILE_INFIXES: &[&str] = &[".spec.", "_spec."];

const TEXT_CODE_EXTS: &[&str] = &[
   ".py", ".pyi", ".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".go", ".rb", ".rs", ".c", ".cc", ".cpp", ".h",
   ".hpp", ".java", ".kt", ".kts", ".scala", ".swift", ".php", ".pl", ".cs", ".sh", ".bash", ".zsh", ".ps1",
   ".cmd", ".bat", ".toml", ".ini", ".cfg", ".conf", ".yaml", ".yml", ".json", ".jsonc", ".graphql", ".proto",
   ".sql", ".html", ".htm", ".xml", ".svg", ".css", ".scss", ".less",
];

const BINARY_EXTS: &[&str] = &[
   ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".ico", ".webp", ".avif", ".tar", ".gz", ".tgz", ".zip", ".7z",
   ".rar", ".xz", ".bz2", ".zst", ".pdf", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".mp3", ".aac", ".flac",
   ".wav", ".mp4", ".mov", ".avi", ".mkv", ".webm", ".bin", ".exe", ".dll", ".dylib", ".so", ".class",
];

const SNIFF_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
   Code,
   Test,
   Doc,
   Setup,
   Example,
   Other,
}

#[derive(Debug, Default)]
pub struct RepoIndex {
   pub all_files:     Vec<String>,
   pub code_files:    Vec<String>,
   pub test_files:    Vec<String>,
   pub docs_files:    Vec<String>,
   pub setup_files:   Vec<String>,
   pub example_files: Vec<String>,
   pub binary_files:  Vec<String>,
}

impl RepoIndex {
   pub fn summary(&self) -> String {
      format!(
         "{} files (code={}, tests={}, docs={}, setup={}, examples={}, binary={})",
         self.all_files.len(),
         self.code_files.len(),
         self.test_files.len(),
         self.docs_files.len(),
         self.setup_files.len(),
         self.example_files.len(),
         self.binary_files.len(),
      )
   }

   /// Ordered, deduplicated view for the given 1-based iteration number.
   /// Iterations 1-2 get code+tests; iteration 3+ adds docs/setup/examples.
   /// Binary files are always excluded.
   pub fn files_for_iteration(&self, iteration: u32) -> Vec<String> {
      let binary: BTreeSet<&str> = self.binary_files.iter().map(String::as_str).collect();
      let combined: Vec<&String> = if iteration >= 3 {
         self.code_files
            .iter()
            .chain(&self.test_files)
            .chain(&self.docs_files)
            .chain(&self.setup_files)
            .chain(&self.example_files)
            .collect()
      } else {
         self.code_files.iter().chain(&self.test_files).collect()
      };

      let mut seen = BTreeSet::new();
      let mut out = Vec::new();
      for rel in combined {
         if binary.contains(rel.as_str()) {
            continue;
         }
         if seen.insert(rel.as_str()) {
            out.push(rel.clone());
         }
      }
      out.sort();
      out
   }
}

pub struct RepoScanner {
   root: PathBuf,
}

impl RepoScanner {
   pub fn new(root: impl Into<PathBuf>) -> Self {
      Self { root: root.into() }
   }

   pub fn scan(&self) -> Result<RepoIndex> {
      let mut files: Vec<PathBuf> = Vec::new();
      walk(&self.root, &self.root, &mut files);

      let mut rel_paths: Vec<String> = files
         .iter()
         .filter_map(|p| p.strip_prefix(&self.root).ok())
         .map(|p| p.to_string_lossy().replace('\\', "/"))
         .collect();
      rel_paths.sort();

      let mut idx = RepoIndex { all_files: rel_paths.clone(), ..RepoIndex::default() };

      for rel in &rel_paths {
         let abs = self.root.join(rel);
         let category = classify(rel);
         let is_binary = seems_binary(&abs);
         if is_binary {
            idx.binary_files.push(rel.clone());
         }

         match category {
            Category::Doc => idx.docs_files.push(rel.clone()),
            Category::Setup => idx.setup_files.push(rel.clone()),
            Category::Example => idx.example_files.push(rel.clone()),
            Category::Test => {
               idx.test_files.push(rel.clone());
               if !is_binary {
                  idx.code_files.push(rel.clone());
               }
            },
            Category::Code | Category::Other => {
               if !is_binary {
                  idx.code_files.push(rel.clone());
               }
            },
         }
      }

      Ok(idx)
   }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
   let Ok(entries) = std::fs::read_dir(dir) else {
      return;
   };
   for entry in entries.flatten() {
      let path = entry.path();
      let name = entry.file_name();
      let name = name.to_string_lossy();

      let Ok(file_type) = entry.file_type() else {
         continue;
      };
      if file_type.is_symlink() {
         continue;
      }
      if file_type.is_dir() {
         if IGNORE_DIRS.contains(&name.as_ref()) {
            continue;
         }
         walk(root, &path, out);
         continue;
      }
      if !file_type.is_file() {
         continue;
      }
      if IGNORE_FILE_BASENAMES.contains(&name.as_ref()) {
         continue;
      }
      if IGNORE_FILE_SUFFIXES.iter().any(|suf| name.ends_with(suf)) {
         continue;
      }
      out.push(path);
   }
}

fn classify(rel: &str) -> Category {
   let parts: Vec<&str> = rel.split('/').collect();
   let base = parts.last().copied().unwrap_or(rel);
   let dirs = &parts[..parts.len().saturating_sub(1)];
   let low_dirs: Vec<String> = dirs.iter().map(|d| d.to_lowercase()).collect();
   let ext = extension_of(base);

   if SETUP_BASENAMES.contains(&base) {
      return Category::Setup;
   }
   if SETUP_DIR_HINTS.iter().any(|hint| rel.starts_with(&format!("{hint}/")) || rel.contains(&format!("/{hint}/"))) {
      return Category::Setup;
   }

   if TEST_DIR_HINTS.iter().any(|hint| low_dirs.iter().any(|d| d == hint)) {
      return Category::Test;
   }
   if TEST_FILE_PREFIXES.iter().any(|p| base.starts_with(p))
      || TEST_FILE_SUFFIXES.iter().any(|s| base.ends_with(s))
      || TEST_FILE_INFIXES.iter().any(|i| base.contains(i))
   {
      return Category::Test;
   }

   if EXAMPLE_DIR_HINTS.iter().any(|hint| low_dirs.iter().any(|d| d == hint)) {
      return Category::Example;
   }

   if DOC_EXTS.contains(&ext.as_str()) {
      return Category::Doc;
   }
   let stem = base.strip_suffix(&ext).unwrap_or(base);
   if DOC_BASENAMES.contains(&stem.to_uppercase().as_str()) {
      return Category::Doc;
   }
   if dirs.iter().any(|d| DOC_DIR_HINTS.contains(&d.to_lowercase().as_str())) && !TEXT_CODE_EXTS.contains(&ext.as_str()) {
      return Category::Doc;
   }

   if TEXT_CODE_EXTS.contains(&ext.as_str()) {
      return Category::Code;
   }

   Category::Other
}

/// True if `rel` classifies into a deferred bucket (docs, setup/CI, or
/// examples) per the classification precedence above — used by the
/// Orchestrator to gate both reviewed-file and newly-discovered-file
/// patches in iterations 1-2 (§4.G, §8 property 7), independent of whether
/// `rel` was present in a previously-scanned [`RepoIndex`].
pub fn is_deferred_bucket(rel: &str) -> bool {
   matches!(classify(rel), Category::Doc | Category::Setup | Category::Example)
}

fn extension_of(base: &str) -> String {
   match base.rfind('.') {
      Some(idx) if idx > 0 => base[idx..].to_lowercase(),
      _ => String::new(),
   }
}

fn seems_binary(path: &Path) -> bool {
   let ext = extension_of(path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default().as_ref());
   if BINARY_EXTS.contains(&ext.as_str()) {
      return true;
   }
   match std::fs::read(path) {
      Ok(data) => looks_binary(&data[..data.len().min(SNIFF_BYTES)]),
      Err(_) => true,
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn write(dir: &Path, rel: &str, content: &str) {
      let path = dir.join(rel);
      if let Some(parent) = path.parent() {
         std::fs::create_dir_all(parent).unwrap();
      }
      std::fs::write(path, content).unwrap();
   }

   #[test]
   fn classifies_by_precedence() {
      assert_eq!(classify("src/lib.rs"), Category::Code);
      assert_eq!(classify("tests/it_works.rs"), Category::Test);
      assert_eq!(classify("examples/demo.rs"), Category::Example);
      assert_eq!(classify("README.md"), Category::Doc);
      assert_eq!(classify("Cargo.toml"), Category::Setup);
      assert_eq!(classify(".github/workflows/ci.yml"), Category::Setup);
   }

   #[test]
   fn iteration_1_excludes_docs_and_setup() {
      let dir = tempfile::tempdir().unwrap();
      write(dir.path(), "src/lib.rs", "fn main() {}\n");
      write(dir.path(), "tests/it.rs", "#[test] fn t() {}\n");
      write(dir.path(), "README.md", "hello\n");
      write(dir.path(), "Cargo.toml", "[package]\n");

      let idx = RepoScanner::new(dir.path()).scan().unwrap();
      let iter1 = idx.files_for_iteration(1);
      assert!(iter1.contains(&"src/lib.rs".to_string()));
      assert!(iter1.contains(&"tests/it.rs".to_string()));
      assert!(!iter1.contains(&"README.md".to_string()));
      assert!(!iter1.contains(&"Cargo.toml".to_string()));

      let iter3 = idx.files_for_iteration(3);
      assert!(iter3.contains(&"README.md".to_string()));
      assert!(iter3.contains(&"Cargo.toml".to_string()));
   }

   #[test]
   fn prunes_ignored_directories() {
      let dir = tempfile::tempdir().unwrap();
      write(dir.path(), "node_modules/pkg/index.js", "module.exports = {};\n");
      write(dir.path(), "src/main.rs", "fn main() {}\n");

      let idx = RepoScanner::new(dir.path()).scan().unwrap();
      assert!(!idx.all_files.iter().any(|f| f.starts_with("node_modules")));
      assert!(idx.all_files.contains(&"src/main.rs".to_string()));
   }

   #[test]
   fn is_deferred_bucket_matches_docs_setup_and_examples_only() {
      assert!(is_deferred_bucket("README.md"));
      assert!(is_deferred_bucket("Cargo.toml"));
      assert!(is_deferred_bucket(".github/workflows/ci.yml"));
      assert!(is_deferred_bucket("examples/demo.rs"));
      assert!(!is_deferred_bucket("src/lib.rs"));
      assert!(!is_deferred_bucket("tests/it.rs"));
   }

   #[test]
   fn binary_files_excluded_from_iteration_views() {
      let dir = tempfile::tempdir().unwrap();
      let bin_path = dir.path().join("logo.png");
      std::fs::write(&bin_path, [0u8, 1, 2, 3]).unwrap();
      write(dir.path(), "src/lib.rs", "fn main() {}\n");

      let idx = RepoScanner::new(dir.path()).scan().unwrap();
      assert!(idx.binary_files.contains(&"logo.png".to_string()));
      assert!(!idx.files_for_iteration(3).contains(&"logo.png".to_string()));
   }
}
