//! Payload enrichment collaborators.
//!
//! The pipeline only needs the contract: a pure function from payload to
//! rewritten payload (plus any title/labels it surfaced). The bundled
//! [`MarkupEnricher`] keeps the marker-injection behavior; smarter extraction
//! belongs in a replacement implementation, not in the orchestration core.

use postforge_common::Result;
use regex::Regex;

use crate::config::{EnrichConfig, GeoPoint};

/// Result of one enrichment pass over a payload.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub payload: String,
    pub title: Option<String>,
    pub labels: Vec<String>,
}

/// Rewrites payloads with enrichment markers.
pub trait Enricher: Send + Sync {
    /// Inject keyword markers. The returned payload must carry the result
    /// durably; the stage records completion separately.
    fn add_keywords(&self, payload: &str) -> Result<Enrichment>;

    /// Inject a location marker, when one can be determined.
    fn add_location(&self, payload: &str) -> Result<Enrichment>;
}

/// Default enricher: configured keyword list plus a gazetteer of known
/// locations, matched against the payload text.
pub struct MarkupEnricher {
    keywords: Vec<String>,
    locations: Vec<GeoPoint>,
    title_re: Regex,
    search_tag_re: Regex,
    tag_re: Regex,
}

impl MarkupEnricher {
    pub fn new(config: &EnrichConfig) -> Self {
        Self {
            keywords: config.keywords.clone(),
            locations: config.locations.clone(),
            title_re: Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"),
            search_tag_re: Regex::new(r"(?is)<search[^>]*>(.*?)</search>").expect("static regex"),
            tag_re: Regex::new(r"<[^>]+>").expect("static regex"),
        }
    }

    fn visible_text(&self, payload: &str) -> String {
        self.tag_re.replace_all(payload, " ").into_owned()
    }

    /// Insert a marker tag after `</title>` when present, otherwise prepend.
    fn insert_marker(payload: &str, marker: &str) -> String {
        if let Some(pos) = payload.to_ascii_lowercase().find("</title>") {
            let split = pos + "</title>".len();
            format!("{}{}{}", &payload[..split], marker, &payload[split..])
        } else {
            format!("{marker}{payload}")
        }
    }
}

impl Enricher for MarkupEnricher {
    fn add_keywords(&self, payload: &str) -> Result<Enrichment> {
        let text = self.visible_text(payload);

        // Existing marker keywords survive, configured hits are appended.
        let mut keywords: Vec<String> = Vec::new();
        if let Some(caps) = self.search_tag_re.captures(payload) {
            for word in caps[1].split(',') {
                let word = word.trim();
                if !word.is_empty() {
                    keywords.push(word.to_string());
                }
            }
        }
        for keyword in &self.keywords {
            if text.contains(keyword.as_str()) && !keywords.iter().any(|k| k == keyword) {
                keywords.push(keyword.clone());
            }
        }

        let stripped = self.search_tag_re.replace_all(payload, "").into_owned();
        let payload = if keywords.is_empty() {
            stripped
        } else {
            Self::insert_marker(&stripped, &format!("<search>{}</search>", keywords.join(",")))
        };

        let title = self
            .title_re
            .captures(&payload)
            .map(|caps| caps[1].trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Enrichment {
            payload,
            title,
            labels: keywords,
        })
    }

    fn add_location(&self, payload: &str) -> Result<Enrichment> {
        let text = self.visible_text(payload);

        // First gazetteer entry appearing in the text wins. No match is not
        // an error; the item simply carries no location marker.
        let marker = self
            .locations
            .iter()
            .find(|point| text.contains(point.name.as_str()))
            .map(|point| {
                format!(
                    "<georss:point>{} {}</georss:point>",
                    point.latitude, point.longitude
                )
            });

        let payload = match marker {
            Some(marker) if !payload.contains("<georss:point>") => {
                Self::insert_marker(payload, &marker)
            }
            _ => payload.to_string(),
        };

        Ok(Enrichment {
            payload,
            title: None,
            labels: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enricher() -> MarkupEnricher {
        MarkupEnricher::new(&EnrichConfig {
            keywords: vec!["alps".into(), "winter".into()],
            locations: vec![GeoPoint {
                name: "Zermatt".into(),
                latitude: 46.0207,
                longitude: 7.7491,
            }],
        })
    }

    #[test]
    fn test_add_keywords_injects_matching() {
        let e = enricher();
        let result = e
            .add_keywords("<html><head><title>Trip</title></head><body>skiing in the alps</body></html>")
            .unwrap();
        assert!(result.payload.contains("<search>alps</search>"));
        assert_eq!(result.title.as_deref(), Some("Trip"));
        assert_eq!(result.labels, vec!["alps".to_string()]);
    }

    #[test]
    fn test_add_keywords_merges_existing_marker() {
        let e = enricher();
        let result = e
            .add_keywords("<title>t</title><search>snow</search><p>winter photos</p>")
            .unwrap();
        assert!(result.payload.contains("<search>snow,winter</search>"));
        // The old marker was replaced, not duplicated.
        assert_eq!(result.payload.matches("<search>").count(), 1);
    }

    #[test]
    fn test_add_keywords_no_match_leaves_plain() {
        let e = enricher();
        let result = e.add_keywords("<p>nothing relevant</p>").unwrap();
        assert!(!result.payload.contains("<search>"));
        assert!(result.labels.is_empty());
    }

    #[test]
    fn test_add_location_injects_point() {
        let e = enricher();
        let result = e
            .add_location("<title>t</title><p>a week in Zermatt</p>")
            .unwrap();
        assert!(result.payload.contains("<georss:point>46.0207 7.7491</georss:point>"));
    }

    #[test]
    fn test_add_location_is_idempotent() {
        let e = enricher();
        let once = e.add_location("<p>Zermatt</p>").unwrap();
        let twice = e.add_location(&once.payload).unwrap();
        assert_eq!(once.payload, twice.payload);
    }
}
