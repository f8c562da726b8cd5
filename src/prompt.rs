//! Fill-in-the-blanks builder for edit instructions.

use serde::{Deserialize, Serialize};

pub const ITEM_PLACEHOLDER: &str = "a pair of sunglasses";
pub const POSITION_PLACEHOLDER: &str = "the eyes";
pub const STYLE_PLACEHOLDER: &str = "the original image style";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateField {
    Item,
    Position,
    Style,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePreset {
    pub label: String,
    pub item: String,
    pub position: String,
    pub style: String,
}

impl TemplatePreset {
    pub fn new(label: &str, item: &str, position: &str, style: &str) -> Self {
        Self {
            label: label.to_string(),
            item: item.to_string(),
            position: position.to_string(),
            style: style.to_string(),
        }
    }
}

/// Quick picks offered next to the template.
pub fn presets() -> Vec<TemplatePreset> {
    vec![
        TemplatePreset::new("Santa hat", "a Santa hat", "the top of the head", STYLE_PLACEHOLDER),
        TemplatePreset::new("Sunglasses", ITEM_PLACEHOLDER, POSITION_PLACEHOLDER, STYLE_PLACEHOLDER),
        TemplatePreset::new("Crown", "a crown", "the top of the head", "ornate gold"),
        TemplatePreset::new("Cat ears", "cat ears", "both sides of the head", "cute"),
        TemplatePreset::new("Top hat", "a top hat", "the top of the head", "vintage gentleman"),
        TemplatePreset::new("Flower crown", "a flower crown", "the top of the head", "fresh and natural"),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    placeholder: String,
    value: String,
}

impl Slot {
    fn new(placeholder: &str) -> Self {
        Self {
            placeholder: placeholder.to_string(),
            value: String::new(),
        }
    }

    fn resolved(&self) -> &str {
        match self.value.trim() {
            "" => self.placeholder.trim(),
            value => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    item: Slot,
    position: Slot,
    style: Slot,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::with_placeholders(ITEM_PLACEHOLDER, POSITION_PLACEHOLDER, STYLE_PLACEHOLDER)
    }
}

impl PromptTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placeholders(item: &str, position: &str, style: &str) -> Self {
        Self {
            item: Slot::new(item),
            position: Slot::new(position),
            style: Slot::new(style),
        }
    }

    fn slot_mut(&mut self, field: TemplateField) -> &mut Slot {
        match field {
            TemplateField::Item => &mut self.item,
            TemplateField::Position => &mut self.position,
            TemplateField::Style => &mut self.style,
        }
    }

    pub fn set(&mut self, field: TemplateField, value: impl Into<String>) {
        self.slot_mut(field).value = value.into();
    }

    pub fn value(&self, field: TemplateField) -> &str {
        match field {
            TemplateField::Item => &self.item.value,
            TemplateField::Position => &self.position.value,
            TemplateField::Style => &self.style.value,
        }
    }

    pub fn fill(&mut self, preset: &TemplatePreset) {
        self.item.value = preset.item.clone();
        self.position.value = preset.position.clone();
        self.style.value = preset.style.clone();
    }

    /// Clears the values, keeps the placeholders.
    pub fn reset(&mut self) {
        for field in [TemplateField::Item, TemplateField::Position, TemplateField::Style] {
            self.slot_mut(field).value.clear();
        }
    }

    pub fn render(&self) -> String {
        let item = self.item.resolved();
        if item.is_empty() {
            return String::new();
        }
        format!(
            "Add {}, placed at {}, in {}",
            item,
            self.position.resolved(),
            self.style.resolved()
        )
    }

    pub fn is_valid(&self) -> bool {
        !self.item.resolved().is_empty()
    }
}
