use serde_json::{json, Value};
use std::sync::LazyLock;

pub static SCAN_CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["url"],
        "properties": {
            "url": { "type": "string" },
            "flags": {
                "type": "object",
                "properties": {
                    "sqli": { "type": "boolean" },
                    "xss": { "type": "boolean" }
                }
            },
            "dbms": { "type": "string" },
            "crawl_depth": { "type": "integer" },
            "level": { "type": "integer" },
            "risk": { "type": "integer" },
            "threads": { "type": "integer" },
            "tool_timeout_secs": { "type": "integer" },
            "xss_workers": { "type": "integer" },
            "xss_delay_ms": { "type": "integer", "minimum": 0 },
            "enable_exploitation": { "type": "boolean" },
            "headers": { "type": "string" },
            "sqlmap_path": { "type": "string" },
            "dalfox_path": { "type": "string" },
            "tmp_dir": { "type": "string" },
            "output_dir": { "type": "string" }
        }
    })
});
