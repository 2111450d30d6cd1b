use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;

/// Bounded command history persisted one entry per line
pub struct History {
    path: PathBuf,
    entries: VecDeque<String>,
    capacity: usize,
}

impl History {
    pub fn new<P: Into<PathBuf>>(path: P, capacity: usize) -> Self {
        History {
            path: path.into(),
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Read saved entries; a missing file is an empty history
    pub fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let text = fs::read_to_string(&self.path)?;
        self.entries.clear();
        for line in text.lines() {
            self.add(line);
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(entry);
            text.push('\n');
        }
        fs::write(&self.path, text)?;
        Ok(())
    }

    /// Record a line, skipping blanks and immediate repeats
    pub fn add(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.entries.back().map_or(false, |last| last == line) {
            return;
        }
        self.entries.push_back(line.to_string());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }

    pub fn search<'a>(&'a self, pattern: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.entries.iter().filter(move |entry| entry.contains(pattern))
    }
}
