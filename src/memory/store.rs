//! Layered durable memory files.
//!
//! `MEMORY.md` holds long-term facts, `HISTORY.md` accumulates one
//! grep-friendly paragraph per consolidation run, and `YYYY-MM-DD.md` files
//! hold daily notes. Everything lives under `{workspace}/memory/`.

use crate::Result;
use chrono::{Duration, Local};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

fn today_date() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// File-backed memory layers shared by all conversations of a workspace.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    memory_dir: PathBuf,
    memory_file: PathBuf,
    history_file: PathBuf,
}

impl MemoryStore {
    /// Create a new memory store. Creates the directory if needed.
    pub async fn new(workspace: &Path) -> Result<Self> {
        let memory_dir = workspace.join("memory");
        fs::create_dir_all(&memory_dir).await?;
        Ok(Self {
            memory_file: memory_dir.join("MEMORY.md"),
            history_file: memory_dir.join("HISTORY.md"),
            memory_dir,
        })
    }

    /// Path of today's daily note file.
    pub fn today_file(&self) -> PathBuf {
        self.memory_dir.join(format!("{}.md", today_date()))
    }

    pub async fn read_long_term(&self) -> Result<String> {
        read_if_exists(&self.memory_file).await
    }

    pub async fn write_long_term(&self, content: &str) -> Result<()> {
        fs::write(&self.memory_file, content).await?;
        Ok(())
    }

    pub async fn read_history(&self) -> Result<String> {
        read_if_exists(&self.history_file).await
    }

    /// Append one consolidation paragraph to the history log.
    pub async fn append_history(&self, entry: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.history_file)
            .await?;
        file.write_all(format!("{}\n\n", entry.trim_end()).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn read_today(&self) -> Result<String> {
        read_if_exists(&self.today_file()).await
    }

    /// Append content to today's notes, creating the dated header on the
    /// first write of the day.
    pub async fn append_today(&self, content: &str) -> Result<()> {
        let today_file = self.today_file();
        let combined = if today_file.exists() {
            let existing = fs::read_to_string(&today_file).await?;
            format!("{}\n{}", existing, content)
        } else {
            format!("# {}\n\n{}", today_date(), content)
        };
        fs::write(&today_file, combined).await?;
        Ok(())
    }

    /// Combined daily notes from the last `days` days, newest first.
    pub async fn recent_memories(&self, days: u32) -> Result<String> {
        let today = Local::now().date_naive();
        let mut memories = Vec::new();

        for i in 0..days as i64 {
            let date = today - Duration::days(i);
            let path = self
                .memory_dir
                .join(format!("{}.md", date.format("%Y-%m-%d")));
            if path.exists() {
                memories.push(fs::read_to_string(&path).await?);
            }
        }

        Ok(memories.join("\n\n---\n\n"))
    }

    /// All daily note files, newest first.
    pub fn list_memory_files(&self) -> Vec<PathBuf> {
        let pattern = self.memory_dir.join("????-??-??.md");
        let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(|p| p.ok()).collect())
            .unwrap_or_default();
        files.sort();
        files.reverse();
        files
    }

    /// Context loaded into the agent prompt: long-term memory + today's notes.
    pub async fn memory_context(&self) -> Result<String> {
        let mut parts = Vec::new();

        let long_term = self.read_long_term().await?;
        if !long_term.is_empty() {
            parts.push(format!("## Long-term Memory\n{}", long_term));
        }

        let today = self.read_today().await?;
        if !today.is_empty() {
            parts.push(format!("## Today's Notes\n{}", today));
        }

        Ok(parts.join("\n\n"))
    }
}

async fn read_if_exists(path: &Path) -> Result<String> {
    if path.exists() {
        Ok(fs::read_to_string(path).await?)
    } else {
        Ok(String::new())
    }
}
