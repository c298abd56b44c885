use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::AppError;
use crate::providers::ToolDefinition;
use crate::retrieval::QueryResult;

pub const QUERY_NOTES_NAME: &str = "query_notes";

/// The single function the model may call mid-conversation.
pub fn query_notes_tool() -> ToolDefinition {
    ToolDefinition {
        name: QUERY_NOTES_NAME.to_string(),
        description: "This function returns notes from the users personal NOTES. If you ask about lets say \
                      Zustand the React state-management library it'll return relevant information from the \
                      users own notes."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "description": "List of queries for the users notes, like 'Zustand Usage' or 'B-Tree Implementation'",
                    "items": { "type": "string" }
                }
            },
            "required": ["queries"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct QueryNotesArguments {
    queries: Vec<String>,
}

/// Decodes `{"queries": [...]}`. Anything else yields no queries.
pub fn parse_query_arguments(raw: &str) -> Vec<String> {
    match serde_json::from_str::<QueryNotesArguments>(raw) {
        Ok(args) => args.queries,
        Err(e) => {
            warn!("Ignoring malformed {} arguments: {}", QUERY_NOTES_NAME, e);
            Vec::new()
        }
    }
}

#[derive(Serialize)]
struct ToolResultPayload<'a> {
    results: &'a [QueryResult],
}

/// Serializes retriever output into the tool-result message content.
pub fn render_tool_results(results: &[QueryResult]) -> Result<String, AppError> {
    Ok(serde_json::to_string(&ToolResultPayload { results })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_arguments() {
        assert_eq!(
            parse_query_arguments(r#"{"queries":["Zustand usage","B-Tree"]}"#),
            vec!["Zustand usage".to_string(), "B-Tree".to_string()]
        );
    }

    #[test]
    fn test_parse_invalid_arguments_is_empty() {
        assert!(parse_query_arguments("").is_empty());
        assert!(parse_query_arguments(r#"{"queries":"not a list"}"#).is_empty());
        assert!(parse_query_arguments(r#"{"queries":["unterminated"#).is_empty());
    }

    #[test]
    fn test_render_payload_shape() {
        let rendered = render_tool_results(&[QueryResult {
            query: "q".to_string(),
            result: vec!["note".to_string()],
        }])
        .unwrap();
        assert_eq!(rendered, r#"{"results":[{"query":"q","result":["note"]}]}"#);
    }

    #[test]
    fn test_tool_schema_requires_queries() {
        let tool = query_notes_tool();
        assert_eq!(tool.name, "query_notes");
        assert_eq!(tool.parameters["required"], json!(["queries"]));
        assert_eq!(tool.parameters["properties"]["queries"]["items"]["type"], "string");
    }
}
