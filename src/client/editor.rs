use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use regex::Regex;

use crate::models::PipelineResult;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Hooks,
    Outline,
    LinkedIn,
    Instagram,
    Blog,
    SeoKeywords,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Hooks,
        Section::Outline,
        Section::LinkedIn,
        Section::Instagram,
        Section::Blog,
        Section::SeoKeywords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Hooks => "hooks",
            Section::Outline => "outline",
            Section::LinkedIn => "linkedin",
            Section::Instagram => "instagram",
            Section::Blog => "blog",
            Section::SeoKeywords => "seo_keywords",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("Unknown section '{}'", s))
    }
}

fn copy_section(section: Section, from: &PipelineResult, to: &mut PipelineResult) {
    match section {
        Section::Hooks => to.hooks = from.hooks.clone(),
        Section::Outline => to.outline = from.outline.clone(),
        Section::LinkedIn => to.linkedin = from.linkedin.clone(),
        Section::Instagram => to.instagram = from.instagram.clone(),
        Section::Blog => to.blog = from.blog.clone(),
        Section::SeoKeywords => to.seo_keywords = from.seo_keywords.clone(),
    }
}

// Fields no section edits. They only differ between the two copies after a restore.
fn copy_unsectioned(from: &PipelineResult, to: &mut PipelineResult) {
    to.image_prompt = from.image_prompt.clone();
    to.scheduled = from.scheduled;
    to.scheduling_message = from.scheduling_message.clone();
    to.image_url = from.image_url.clone();
}

/// `"#rust, ai ,, #crab"` → `["rust", "ai", "crab"]`
pub fn parse_hashtags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|tag| tag.trim())
        .map(|tag| tag.strip_prefix('#').unwrap_or(tag).to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

pub fn format_hashtags(tags: &[String]) -> String {
    tags.iter()
        .map(|tag| format!("#{}", tag))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn char_count(text: &str) -> usize {
    text.chars().count()
}

/// `content-pipeline-<topic with whitespace runs as dashes, lowercased>.json`
pub fn export_filename(topic: &str) -> String {
    format!(
        "content-pipeline-{}.json",
        WHITESPACE_RUN.replace_all(topic, "-").to_lowercase()
    )
}

/// Committed result plus an editable working copy with per-section edit mode.
///
/// Sections are independent: saving or cancelling one never touches another. The committed
/// copy only changes through [`ResultsEditor::save`].
#[derive(Debug, Clone)]
pub struct ResultsEditor {
    committed: PipelineResult,
    editable: PipelineResult,
    editing: HashSet<Section>,
    // Sections whose editable value came from a restored draft rather than the committed copy.
    restored: HashSet<Section>,
    hashtags_raw: Option<String>,
}

impl ResultsEditor {
    pub fn new(results: PipelineResult) -> Self {
        ResultsEditor {
            editable: results.clone(),
            committed: results,
            editing: HashSet::new(),
            restored: HashSet::new(),
            hashtags_raw: None,
        }
    }

    pub fn committed(&self) -> &PipelineResult {
        &self.committed
    }

    pub fn editable(&self) -> &PipelineResult {
        &self.editable
    }

    pub fn is_editing(&self, section: Section) -> bool {
        self.editing.contains(&section)
    }

    pub fn is_editing_any(&self) -> bool {
        !self.editing.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.committed != self.editable
    }

    pub fn hashtags_raw(&self) -> Option<&str> {
        self.hashtags_raw.as_deref()
    }

    /// Replaces the committed copy, e.g. after an image arrives for the current result.
    /// Sections being edited keep their working values.
    pub fn refresh_committed(&mut self, results: PipelineResult) {
        let mut editable = results.clone();
        for section in self.editing.iter().chain(self.restored.iter()) {
            copy_section(*section, &self.editable, &mut editable);
        }
        self.committed = results;
        self.editable = editable;
    }

    pub fn begin_edit(&mut self, section: Section) {
        if !self.restored.contains(&section) {
            copy_section(section, &self.committed, &mut self.editable);
        }
        if section == Section::Instagram {
            self.hashtags_raw = Some(format_hashtags(&self.editable.instagram.hashtags));
        }
        self.editing.insert(section);
    }

    pub fn set_hooks(&mut self, hooks: Vec<String>) {
        self.editable.hooks = hooks;
    }

    pub fn set_text(&mut self, section: Section, text: impl Into<String>) {
        let text = text.into();
        match section {
            Section::Outline => self.editable.outline = text,
            Section::LinkedIn => self.editable.linkedin = text,
            Section::Blog => self.editable.blog = text,
            Section::Instagram => self.editable.instagram.caption = text,
            Section::SeoKeywords => self.editable.seo_keywords = parse_keywords(&text),
            Section::Hooks => self.editable.hooks = text.lines().map(str::to_string).collect(),
        }
    }

    /// Raw comma-separated hashtag field. Parsed only when the Instagram section is saved.
    pub fn set_hashtags_raw(&mut self, raw: impl Into<String>) {
        self.hashtags_raw = Some(raw.into());
    }

    /// Commits one section and returns the new canonical result for the parent.
    pub fn save(&mut self, section: Section) -> PipelineResult {
        if section == Section::Instagram {
            if let Some(raw) = self.hashtags_raw.take() {
                self.editable.instagram.hashtags = parse_hashtags(&raw);
            }
        }
        copy_section(section, &self.editable, &mut self.committed);
        self.editing.remove(&section);
        self.restored.remove(&section);
        if self.editing.is_empty() && self.restored.is_empty() {
            copy_unsectioned(&self.editable, &mut self.committed);
        }
        self.committed.clone()
    }

    pub fn cancel(&mut self, section: Section) {
        copy_section(section, &self.committed, &mut self.editable);
        if section == Section::Instagram {
            self.hashtags_raw = None;
        }
        self.editing.remove(&section);
        self.restored.remove(&section);
    }

    /// Saves every section that is being edited or still holds restored values.
    pub fn save_all(&mut self) -> PipelineResult {
        let pending: Vec<Section> = Section::ALL
            .into_iter()
            .filter(|s| self.editing.contains(s) || self.restored.contains(s))
            .collect();
        for section in pending {
            self.save(section);
        }
        copy_unsectioned(&self.editable, &mut self.committed);
        self.committed.clone()
    }

    /// Loads a snapshot into the working copy only.
    pub fn restore(&mut self, snapshot: PipelineResult) {
        self.editable = snapshot;
        self.hashtags_raw = None;
        self.restored = Section::ALL
            .into_iter()
            .filter(|s| {
                let mut probe = self.committed.clone();
                copy_section(*s, &self.editable, &mut probe);
                probe != self.committed
            })
            .collect();
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.editable).context("Failed to serialize results")
    }

    /// Same as [`ResultsEditor::restore`] but from exported JSON.
    pub fn import_json(&mut self, raw: &str) -> Result<()> {
        let snapshot: PipelineResult =
            serde_json::from_str(raw).context("Not a content pipeline export")?;
        self.restore(snapshot);
        Ok(())
    }
}
