//! Tutorial document model.
//!
//! A tutorial is an ordered document of sections; each section carries the
//! raw instruction text the extractor produced plus any fenced code
//! examples. Values are read-only once loaded.

use serde::{Deserialize, Serialize};

/// A tutorial document to execute and validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tutorial {
    /// Document title
    pub title: String,
    /// Ordered sections
    pub sections: Vec<Section>,
}

/// One tutorial section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Position within the tutorial, 1-based
    pub number: u32,
    /// Section heading
    pub title: String,
    /// Raw natural-language instructions, in document order
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Fenced code examples, in document order
    #[serde(default)]
    pub code_examples: Vec<CodeExample>,
}

/// A fenced code example inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExample {
    /// Fence language tag, empty when absent
    #[serde(default)]
    pub language: String,
    /// The example body
    pub code: String,
}

impl Tutorial {
    /// Create a tutorial with the given title and no sections.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            sections: Vec::new(),
        }
    }

    /// Append a section, returning `self` for chaining.
    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Total instruction count across sections, code examples included.
    pub fn instruction_count(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.instructions.len() + s.code_examples.len())
            .sum()
    }
}

impl Section {
    /// Create an empty section.
    pub fn new(number: u32, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            instructions: Vec::new(),
            code_examples: Vec::new(),
        }
    }

    /// Append a raw instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    /// Append a code example.
    pub fn with_code_example(mut self, language: impl Into<String>, code: impl Into<String>) -> Self {
        self.code_examples.push(CodeExample {
            language: language.into(),
            code: code.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_count_includes_code_examples() {
        let tutorial = Tutorial::new("Getting started")
            .with_section(
                Section::new(1, "Setup")
                    .with_instruction("Create a working directory")
                    .with_code_example("bash", "mkdir demo"),
            )
            .with_section(Section::new(2, "Build").with_instruction("Run the build"));
        assert_eq!(tutorial.instruction_count(), 3);
    }

    #[test]
    fn round_trips_through_json() {
        let tutorial = Tutorial::new("T")
            .with_section(Section::new(1, "S").with_instruction("do the thing"));
        let json = serde_json::to_string(&tutorial).unwrap();
        let back: Tutorial = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tutorial);
    }
}
