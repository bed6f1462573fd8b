//! The published JSON Schema assertion specs are validated against before
//! normalization (`spec.md` §4.7, §6 "DSL on disk"). Kept as a single
//! literal so it can be served verbatim from `GET /templates`-adjacent
//! tooling or a docs endpoint without re-deriving it from the Rust types.

pub const SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "AssertionSpec",
  "type": "object",
  "properties": {
    "strict": { "type": "boolean" },
    "ignore_fields": {
      "type": "object",
      "additionalProperties": {
        "type": "array",
        "items": { "type": "string" }
      }
    },
    "assertions": {
      "type": "array",
      "items": { "$ref": "#/definitions/assertion" }
    }
  },
  "required": ["assertions"],
  "additionalProperties": false,
  "definitions": {
    "assertion": {
      "type": "object",
      "properties": {
        "diff_type": { "type": "string", "enum": ["added", "removed", "changed"] },
        "entity": { "type": "string", "minLength": 1 },
        "where": { "type": "object" },
        "ignore_fields": { "type": "array", "items": { "type": "string" } },
        "expected_changes": { "type": "object" },
        "expected_count": {
          "oneOf": [
            { "type": "integer", "minimum": 0 },
            {
              "type": "object",
              "properties": {
                "min": { "type": "integer", "minimum": 0 },
                "max": { "type": "integer", "minimum": 0 }
              },
              "additionalProperties": false
            }
          ]
        }
      },
      "required": ["diff_type", "entity"],
      "additionalProperties": false
    }
  }
}"#;
