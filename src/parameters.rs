//! Free-form key/value metadata grouped into named sections. Grounded on
//! `bpfParameterSection.h` / `bpfSectionContainer.h` in `original_source`.

use std::collections::BTreeMap;

/// A free-form key/value parameter map, grouped into sections.
///
/// Uses `BTreeMap` rather than `HashMap` so metadata dumps have a
/// deterministic iteration order — required for the idempotence property in
/// spec.md §8 ("running the conversion twice ... produces bit-identical
/// output files").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSections {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ParameterSections {
    pub fn new() -> Self { Self::default() }

    pub fn set(&mut self, section: impl Into<String>, key: impl Into<String>, value: impl Into<String>) {
        self.sections.entry(section.into()).or_default().insert(key.into(), value.into());
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    pub fn section(&self, section: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(section)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.sections.iter().map(|(name, entries)| (name.as_str(), entries))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sections_iterate_in_deterministic_order() {
        let mut parameters = ParameterSections::new();
        parameters.set("Image", "Name", "sample");
        parameters.set("Acquisition", "Objective", "40x");

        let names: Vec<&str> = parameters.sections().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Acquisition", "Image"]);
    }

    #[test]
    fn get_round_trips_a_value() {
        let mut parameters = ParameterSections::new();
        parameters.set("Image", "Name", "sample");
        assert_eq!(parameters.get("Image", "Name"), Some("sample"));
        assert_eq!(parameters.get("Image", "Missing"), None);
    }
}
