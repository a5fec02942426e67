use regcheck_recovery::ResponseSchema;
use serde_json::json;

pub const CHECKS_FIELD: &str = "checks";
pub const REQUIREMENTS_FIELD: &str = "requirements";

/// Response shape of an analysis request.
pub fn checks_schema() -> ResponseSchema {
    let pages = json!({ "type": "array", "items": { "type": "integer" } });
    ResponseSchema::new(
        CHECKS_FIELD,
        json!({
            "type": "object",
            "properties": {
                "checks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "requirement": { "type": "string" },
                            "present": { "type": "boolean" },
                            "evidence": { "type": "string" },
                            "pages": pages,
                            "confidence": { "type": "number" },
                            "mustHave": { "type": "boolean" },
                            "evidence_by_file": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "file": { "type": "string" },
                                        "present": { "type": "boolean" },
                                        "evidence": { "type": "string" },
                                        "pages": pages,
                                        "confidence": { "type": "number" }
                                    }
                                }
                            },
                            "law_refs": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "doc_name": { "type": "string" },
                                        "page": { "type": "integer" },
                                        "quote": { "type": "string" }
                                    }
                                }
                            }
                        },
                        "required": ["requirement", "present"]
                    }
                }
            },
            "required": ["checks"]
        }),
    )
}

/// Response shape of catalog generation. An empty list is not an acceptable catalog.
pub fn requirements_schema() -> ResponseSchema {
    ResponseSchema::new(
        REQUIREMENTS_FIELD,
        json!({
            "type": "object",
            "properties": {
                "requirements": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "requirement": { "type": "string" },
                            "field": { "type": "string" },
                            "section": { "type": "string" },
                            "article": { "type": "string" },
                            "mustHave": { "type": "boolean" },
                            "minOccurs": { "type": "integer" },
                            "maxOccurs": { "type": "integer" }
                        },
                        "required": ["requirement", "field", "mustHave", "minOccurs", "maxOccurs"]
                    }
                },
                "notes": { "type": "string" }
            },
            "required": ["requirements"]
        }),
    )
    .non_empty()
}
