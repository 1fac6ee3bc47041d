//! Class-index to label mapping

use garuda_core::error::LabelLookupError;

/// Placeholder some label maps carry at index 0
const PLACEHOLDER_LABEL: &str = "???";

/// Ordered list of class names as the model was trained with
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse label-map text: one label per line, surrounding whitespace trimmed,
    /// blank lines ignored. A leading `???` placeholder is dropped.
    pub fn parse(text: &str) -> Self {
        let mut names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if names.first().map(String::as_str) == Some(PLACEHOLDER_LABEL) {
            names.remove(0);
        }
        Self { names }
    }

    pub fn get(&self, index: i64) -> Result<&str, LabelLookupError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
            .ok_or(LabelLookupError {
                index,
                table_len: self.names.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
