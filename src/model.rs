//! Data shapes passed between the acquisition and download stages.
//!
//! `AcquisitionResult` is serialized as a plain JSON object whose key order is
//! the order in which products were queried, so it can be handed back to
//! `/download_videos` unchanged.

use std::{fmt, path::PathBuf};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

/// Product whose short-form video presence is being looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuery {
    pub name: String,
    pub description: String,
}

impl ProductQuery {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Platform account identifier, stored without its leading `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(String);

impl Handle {
    /// Strips a single leading sigil. Returns `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let bare = trimmed.strip_prefix('@').unwrap_or(trimmed);
        if bare.is_empty() {
            None
        } else {
            Some(Self(bare.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// One entry of the scraping backend's dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub author_handle: String,
    pub url: String,
}

/// Product name to ranked video URLs, in query order.
///
/// A product missing from the map had no resolvable account; a product with an
/// empty list had an account but no verified videos.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionResult {
    entries: Vec<(String, Vec<String>)>,
}

impl AcquisitionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces. A replaced key keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, urls: Vec<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = urls,
            None => self.entries.push((name, urls)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, urls)| urls.as_slice())
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, urls)| (key.as_str(), urls.as_slice()))
    }

    pub fn total_urls(&self) -> usize {
        self.entries.iter().map(|(_, urls)| urls.len()).sum()
    }
}

impl FromIterator<(String, Vec<String>)> for AcquisitionResult {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (name, urls) in iter {
            result.insert(name, urls);
        }
        result
    }
}

impl Serialize for AcquisitionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, urls) in &self.entries {
            map.serialize_entry(name, urls)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AcquisitionResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = AcquisitionResult;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping category labels to arrays of URLs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut result = AcquisitionResult::new();
                while let Some((name, urls)) = access.next_entry::<String, Vec<String>>()? {
                    result.insert(name, urls);
                }
                Ok(result)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Success,
    Failure,
}

/// Result of fetching a single URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub url: String,
    pub category: String,
    pub category_directory: PathBuf,
    pub status: DownloadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }
}

/// Every outcome of a download batch, in request order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadReport {
    pub outcomes: Vec<DownloadOutcome>,
}

impl DownloadReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn first_failure(&self) -> Option<&DownloadOutcome> {
        self.outcomes.iter().find(|o| !o.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_parse_strips_sigil() {
        assert_eq!(Handle::parse("@opal").unwrap().as_str(), "opal");
        assert_eq!(Handle::parse("opal").unwrap().as_str(), "opal");
        assert_eq!(Handle::parse("@opal").unwrap().to_string(), "@opal");
        assert!(Handle::parse("@").is_none());
        assert!(Handle::parse("  ").is_none());
    }

    #[test]
    fn acquisition_result_keeps_insertion_order() {
        let result: AcquisitionResult = [
            ("Zeta".to_string(), vec!["z".to_string()]),
            ("Alpha".to_string(), vec![]),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"Zeta":["z"],"Alpha":[]}"#);
    }

    #[test]
    fn acquisition_result_replace_keeps_position() {
        let mut result = AcquisitionResult::new();
        result.insert("Opal", vec!["a".into()]);
        result.insert("One sec", vec![]);
        result.insert("Opal", vec!["b".into()]);
        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["Opal", "One sec"]);
        assert_eq!(result.get("Opal").unwrap(), ["b".to_string()]);
        assert_eq!(result.total_urls(), 1);
    }

    #[test]
    fn acquisition_result_parses_request_body_in_order() {
        let parsed: AcquisitionResult =
            serde_json::from_str(r#"{"Screen Time": ["u1", "u2"], "Focus": ["u3"]}"#).unwrap();
        assert_eq!(parsed.keys().collect::<Vec<_>>(), vec!["Screen Time", "Focus"]);
        assert_eq!(parsed.total_urls(), 3);
        assert!(serde_json::from_str::<AcquisitionResult>(r#"{"x": "not-a-list"}"#).is_err());
    }

    #[test]
    fn report_counts_outcomes() {
        let outcome = |url: &str, status| DownloadOutcome {
            url: url.into(),
            category: "Opal".into(),
            category_directory: PathBuf::from("vids/opal"),
            status,
            file: None,
            error: None,
        };
        let report = DownloadReport {
            outcomes: vec![
                outcome("a", DownloadStatus::Success),
                outcome("b", DownloadStatus::Failure),
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_succeeded());
        assert_eq!(report.first_failure().unwrap().url, "b");
    }
}
