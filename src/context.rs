use std::collections::HashMap;

use lazy_static::lazy_static;
use log::debug;
use serde::{Deserialize, Serialize};
use url::{ParseError, Url};

use crate::attribute_value::Attributes;
use crate::bucket::VariationIndex;
use crate::condition::Pattern;

/// Everything an evaluation reads about the current subject and how overrides are configured.
///
/// A context is owned by the caller (or by an [crate::Evaluator]) and read as a snapshot at the
/// start of each evaluation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationContext {
    /// Global kill switch; when false no experiment assigns anyone.
    pub enabled: bool,
    pub attributes: Attributes,
    /// Experiment key to the variation index every subject is forced into.
    pub forced_variations: HashMap<String, VariationIndex>,
    /// Disables randomized assignment; only forced variations apply.
    pub qa_mode: bool,
    /// The URL of the current request, if any.
    pub url: Option<String>,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        EvaluationContext {
            enabled: true,
            attributes: Attributes::default(),
            forced_variations: HashMap::new(),
            qa_mode: false,
            url: None,
        }
    }
}

impl EvaluationContext {
    pub fn new(attributes: Attributes) -> Self {
        EvaluationContext {
            attributes,
            ..Default::default()
        }
    }

    /// Looks for a `?<experiment_key>=<index>` override in the context url.
    ///
    /// Returns None unless the parameter is present and names one of the `num_variations`.
    pub(crate) fn query_string_override(
        &self,
        experiment_key: &str,
        num_variations: usize,
    ) -> Option<VariationIndex> {
        let url = parse_url(self.url.as_deref()?)?;
        let (_, raw) = url.query_pairs().find(|(name, _)| name == experiment_key)?;
        match raw.trim().parse::<VariationIndex>() {
            Ok(index) if index < num_variations => Some(index),
            _ => {
                debug!(
                    "ignoring query string override {}={} for {} variations",
                    experiment_key, raw, num_variations
                );
                None
            }
        }
    }

    /// Returns true if the context url, or just its path, matches `pattern`.
    pub(crate) fn url_matches(&self, pattern: &Pattern) -> bool {
        let raw = match self.url.as_deref() {
            Some(raw) => raw,
            None => return false,
        };
        if pattern.is_match(raw) {
            return true;
        }
        parse_url(raw).map_or(false, |url| pattern.is_match(url.path()))
    }
}

lazy_static! {
    static ref RELATIVE_BASE: Url = Url::parse("http://localhost/").unwrap();
}

// Relative urls such as "/signup?btn=1" resolve against a placeholder origin.
fn parse_url(raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(ParseError::RelativeUrlWithoutBase) => RELATIVE_BASE.join(raw).ok(),
        Err(_) => None,
    }
}
