//! Rebuild the four script sections from streamed chunks.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A script section streamed independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// headline
    Title,
    /// opening hook
    Hook,
    /// script body
    Script,
    /// call to action
    Cta,
}

impl Section {
    /// all sections, in display order
    pub const ALL: [Section; 4] = [Self::Title, Self::Hook, Self::Script, Self::Cta];

    /// wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Hook => "hook",
            Self::Script => "script",
            Self::Cta => "cta",
        }
    }
}

impl Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest content of one section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionContent {
    /// full text received so far
    pub content: String,
    /// server finished this section
    pub is_complete: bool,
}

/// Content of all sections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    /// title section
    pub title: SectionContent,
    /// hook section
    pub hook: SectionContent,
    /// script section
    pub script: SectionContent,
    /// cta section
    pub cta: SectionContent,
}

impl Sections {
    /// content of `section`
    pub fn get(&self, section: Section) -> &SectionContent {
        match section {
            Section::Title => &self.title,
            Section::Hook => &self.hook,
            Section::Script => &self.script,
            Section::Cta => &self.cta,
        }
    }

    fn get_mut(&mut self, section: Section) -> &mut SectionContent {
        match section {
            Section::Title => &mut self.title,
            Section::Hook => &mut self.hook,
            Section::Script => &mut self.script,
            Section::Cta => &mut self.cta,
        }
    }

    /// Check if every section is complete
    pub fn is_complete(&self) -> bool {
        Section::ALL.iter().all(|s| self.get(*s).is_complete)
    }
}

/// Accumulates section-scoped content updates of one generation.
///
/// Every update carries the whole text so far, so it replaces the stored value.
/// A completed section ignores any later update until [`clear`](Self::clear).
#[derive(Debug, Default)]
pub struct ContentAssembler {
    sections: Sections,
}

impl ContentAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update to `section`, return false if it was ignored
    pub fn apply<S: Into<String>>(
        &mut self,
        section: Section,
        content: S,
        is_complete: bool,
    ) -> bool {
        let current = self.sections.get_mut(section);

        if current.is_complete {
            log::trace!("Section {} already completed, drop stale update", section);
            return false;
        }

        current.content = content.into();
        current.is_complete = is_complete;
        true
    }

    /// content of one section
    pub fn section(&self, section: Section) -> &SectionContent {
        self.sections.get(section)
    }

    /// copy of all sections
    pub fn snapshot(&self) -> Sections {
        self.sections.clone()
    }

    /// reset all sections to empty and incomplete
    pub fn clear(&mut self) {
        self.sections = Sections::default();
    }
}
