//! Wire types for the niche analysis service.

use crate::errors::{NicheflowError, StreamFailure};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A message on the push channel, tagged by its `status` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The server accepted the job.
    Started {
        /// Optional message.
        #[serde(default)]
        message: Option<String>,
    },
    /// Intermediate progress.
    Processing {
        /// Step label, e.g. `geographic`.
        #[serde(default)]
        step: Option<String>,
        /// Human readable message.
        #[serde(default)]
        message: Option<String>,
    },
    /// Terminal success.
    Completed {
        /// The analysis results.
        results: Value,
    },
    /// Terminal server-reported failure.
    Error {
        /// Failure description.
        #[serde(default)]
        error: Option<String>,
    },
    /// Any other status value.
    #[serde(other)]
    Unknown,
}

impl ProgressEvent {
    /// Returns true for `completed` and `error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}

/// The observable `{step, message}` progress of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Step label.
    pub step: String,
    /// Human readable message.
    pub message: String,
}

impl ProgressUpdate {
    /// Creates a progress update.
    #[must_use]
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }

    /// The value shown before any event arrives.
    #[must_use]
    pub fn initial() -> Self {
        Self::new("starting", "Initializing analysis...")
    }
}

/// Options of an analysis request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeOptions {
    /// Search radius, in miles.
    #[serde(default)]
    pub radius: Option<f64>,
    /// Let the service pick adjacent niches.
    #[serde(default)]
    pub surprise_me: bool,
}

/// Body of the trigger and fallback requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// The service, e.g. `plumber`.
    pub query: String,
    /// The location, e.g. `birmingham al`.
    pub location: String,
    /// Options.
    #[serde(default)]
    pub options: AnalyzeOptions,
}

impl AnalyzeRequest {
    /// Creates a request with default options.
    #[must_use]
    pub fn new(query: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            location: location.into(),
            options: AnalyzeOptions::default(),
        }
    }

    /// Sets the options.
    #[must_use]
    pub fn with_options(mut self, options: AnalyzeOptions) -> Self {
        self.options = options;
        self
    }

    /// Parses free text: the first word is the service, the rest the location.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the text has no service or no location.
    pub fn parse_query(text: &str) -> Result<Self, NicheflowError> {
        let mut words = text.split_whitespace();
        let query = words.next().unwrap_or_default();
        let location = words.collect::<Vec<_>>().join(" ");
        if query.is_empty() || location.is_empty() {
            return Err(NicheflowError::InvalidState(format!(
                "niche query '{text}' must name a service followed by a location"
            )));
        }
        Ok(Self::new(query, location))
    }

    /// Reads a request stored in project data: either a request object or a
    /// free-text query.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for unparseable text and `Serialization` for a
    /// malformed object.
    pub fn from_value(value: &Value) -> Result<Self, NicheflowError> {
        match value {
            Value::String(text) => Self::parse_query(text),
            other => Ok(serde_json::from_value(other.clone())?),
        }
    }
}

/// Response of the fallback request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// Whether the analysis succeeded.
    #[serde(default)]
    pub success: bool,
    /// Results on success.
    #[serde(default)]
    pub data: Option<Value>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalyzeResponse {
    /// A successful response.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Treats the response as a completion.
    ///
    /// # Errors
    ///
    /// Returns `StreamFailure::Fallback` unless `success` is set and `data`
    /// is non-null.
    pub fn into_results(self) -> Result<Value, StreamFailure> {
        match self.data {
            Some(data) if self.success && !data.is_null() => Ok(data),
            _ => Err(StreamFailure::Fallback(
                self.error
                    .unwrap_or_else(|| "analysis service returned no results".to_string()),
            )),
        }
    }
}

/// The `selectedNiche` value derived from analysis results.
#[must_use]
pub fn derive_selected_niche(results: &Value) -> Value {
    let keywords = results
        .pointer("/keywords/all_keywords")
        .filter(|v| v.is_array())
        .cloned()
        .unwrap_or_else(|| json!([]));
    json!({
        "name": results.get("query").cloned().unwrap_or(Value::Null),
        "location": results.get("location").cloned().unwrap_or(Value::Null),
        "keywords": keywords,
    })
}

/// File name for a CSV export of `results`.
#[must_use]
pub fn suggested_export_filename(results: &Value) -> String {
    let field = |key: &str| results.get(key).and_then(Value::as_str).unwrap_or("unknown").to_string();
    format!("niche_analysis_{}_{}.csv", field("query"), field("location"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_events() {
        let processing: ProgressEvent =
            serde_json::from_str(r#"{"status":"processing","step":"geo","message":"Analyzing location data..."}"#)
                .unwrap();
        assert_eq!(
            processing,
            ProgressEvent::Processing {
                step: Some("geo".to_string()),
                message: Some("Analyzing location data...".to_string()),
            }
        );

        let started: ProgressEvent = serde_json::from_str(r#"{"status":"started","message":"Analysis started"}"#).unwrap();
        assert!(!started.is_terminal());

        let completed: ProgressEvent =
            serde_json::from_str(r#"{"status":"completed","results":{"query":"plumber"}}"#).unwrap();
        assert!(completed.is_terminal());

        let error: ProgressEvent = serde_json::from_str(r#"{"status":"error","error":"quota"}"#).unwrap();
        assert_eq!(
            error,
            ProgressEvent::Error {
                error: Some("quota".to_string())
            }
        );
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let event: ProgressEvent = serde_json::from_str(r#"{"status":"heartbeat","at":1}"#).unwrap();
        assert_eq!(event, ProgressEvent::Unknown);
    }

    #[test]
    fn test_completed_without_results_is_malformed() {
        assert!(serde_json::from_str::<ProgressEvent>(r#"{"status":"completed"}"#).is_err());
    }

    #[test]
    fn test_parse_query() {
        let request = AnalyzeRequest::parse_query("plumber  birmingham al").unwrap();
        assert_eq!(request.query, "plumber");
        assert_eq!(request.location, "birmingham al");
        assert_eq!(request.options, AnalyzeOptions::default());

        assert!(AnalyzeRequest::parse_query("plumber").is_err());
        assert!(AnalyzeRequest::parse_query("   ").is_err());
    }

    #[test]
    fn test_request_from_object() {
        let value = json!({"query": "HVAC repair", "location": "Pelham Alabama", "options": {"radius": 40, "surprise_me": true}});
        let request = AnalyzeRequest::from_value(&value).unwrap();
        assert_eq!(request.query, "HVAC repair");
        assert_eq!(request.options.radius, Some(40.0));
        assert!(request.options.surprise_me);

        let encoded = serde_json::to_value(AnalyzeRequest::new("a", "b")).unwrap();
        assert_eq!(encoded, json!({"query": "a", "location": "b", "options": {"radius": null, "surprise_me": false}}));
    }

    #[test]
    fn test_response_into_results() {
        assert_eq!(AnalyzeResponse::ok(json!({"a": 1})).into_results(), Ok(json!({"a": 1})));
        assert_eq!(
            AnalyzeResponse::failed("timeout").into_results(),
            Err(StreamFailure::Fallback("timeout".to_string()))
        );

        let null_data: AnalyzeResponse = serde_json::from_str(r#"{"success":true,"data":null}"#).unwrap();
        assert!(null_data.into_results().is_err());
    }

    #[test]
    fn test_derive_selected_niche() {
        let results = json!({
            "query": "plumber",
            "location": "birmingham al",
            "keywords": {"all_keywords": [{"keyword": "emergency plumber"}]}
        });
        assert_eq!(
            derive_selected_niche(&results),
            json!({
                "name": "plumber",
                "location": "birmingham al",
                "keywords": [{"keyword": "emergency plumber"}]
            })
        );

        let bare = derive_selected_niche(&json!({"query": "roofer"}));
        assert_eq!(bare["keywords"], json!([]));
        assert_eq!(bare["location"], Value::Null);
    }

    #[test]
    fn test_export_filename() {
        let results = json!({"query": "plumber", "location": "Pelham AL"});
        assert_eq!(suggested_export_filename(&results), "niche_analysis_plumber_Pelham AL.csv");
    }
}
