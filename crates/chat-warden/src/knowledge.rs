//! Knowledge base loader.
//!
//! Concatenates every `.md` and `.txt` file under the knowledge directory
//! into one block of text that is injected into the system prompt.  Loaded
//! once at startup; `reload` re-reads the directory in place.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub struct KnowledgeBase {
    root: PathBuf,
    content: String,
    documents: usize,
}

impl KnowledgeBase {
    /// Read every knowledge document under `root`.  A missing directory is
    /// not an error; the widget simply answers without a knowledge base.
    pub fn load(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut base = Self {
            root,
            content: String::new(),
            documents: 0,
        };
        base.reload();
        base
    }

    /// Re-read the knowledge directory.
    pub fn reload(&mut self) {
        let mut documents = Vec::new();

        if self.root.exists() {
            collect_documents(&self.root, &self.root, &mut documents);
        } else {
            warn!(path = %self.root.display(), "knowledge directory does not exist");
        }

        // Sort by relative path so the prompt is stable across restarts.
        documents.sort_by(|(a, _), (b, _)| a.cmp(b));

        self.documents = documents.len();
        self.content = documents
            .into_iter()
            .map(|(rel, text)| format!("=== {rel} ===\n\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        if self.documents > 0 {
            info!(documents = self.documents, "knowledge base loaded");
        } else {
            info!("no knowledge documents found");
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn document_count(&self) -> usize {
        self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents == 0
    }
}

fn collect_documents(root: &Path, dir: &Path, out: &mut Vec<(String, String)>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), %err, "failed to read knowledge directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_documents(root, &path, out);
            continue;
        }

        let is_knowledge_file = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "md" || ext == "txt");
        if !is_knowledge_file {
            continue;
        }

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .display()
                    .to_string();
                out.push((rel, text));
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read knowledge file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_markdown_and_text_files_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("faq.md"), "Q: hours?\nA: 9-17").unwrap();
        std::fs::write(dir.path().join("prices.txt"), "basic: 10 eur").unwrap();
        std::fs::write(dir.path().join("ignore.json"), "{}").unwrap();

        let base = KnowledgeBase::load(dir.path());
        assert_eq!(base.document_count(), 2);
        assert!(base.content().contains("=== faq.md ==="));
        assert!(base.content().contains("Q: hours?"));
        assert!(base.content().contains("=== prices.txt ==="));
        assert!(!base.content().contains("ignore.json"));
    }

    #[test]
    fn walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("products")).unwrap();
        std::fs::write(dir.path().join("products/widget.md"), "the widget").unwrap();

        let base = KnowledgeBase::load(dir.path());
        assert_eq!(base.document_count(), 1);
        assert!(base.content().contains("widget.md"));
    }

    #[test]
    fn missing_directory_yields_empty_base() {
        let base = KnowledgeBase::load("/does/not/exist");
        assert!(base.is_empty());
        assert_eq!(base.content(), "");
    }

    #[test]
    fn reload_picks_up_new_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = KnowledgeBase::load(dir.path());
        assert!(base.is_empty());

        std::fs::write(dir.path().join("new.md"), "fresh").unwrap();
        base.reload();
        assert_eq!(base.document_count(), 1);
        assert!(base.content().contains("fresh"));
    }
}
