//! Flow parser for YAML and JSON

use crate::dsl::{Templater, Validator};
use crate::{Flow, Result};
use std::collections::HashMap;
use std::path::Path;

/// Parse a flow from a file path
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Flow> {
    let content = std::fs::read_to_string(path)?;
    parse_string(&content)
}

/// Parse a flow from a YAML string (JSON is a YAML subset and parses too)
pub fn parse_string(content: &str) -> Result<Flow> {
    Ok(serde_yaml::from_str(content)?)
}

/// Parse a flow from JSON
pub fn parse_json(content: &str) -> Result<Flow> {
    Ok(serde_json::from_str(content)?)
}

/// Load a flow: read, pre-render with vars, parse, and validate
///
/// The one-stop entry point used by the CLI and the HTTP surface:
/// 1. Read the file
/// 2. Pre-render it with provided variables (template expansion)
/// 3. Parse the rendered YAML
/// 4. Validate the parsed flow
pub fn load<P: AsRef<Path>>(path: P, vars: HashMap<String, serde_json::Value>) -> Result<Flow> {
    let content = std::fs::read_to_string(path)?;
    let rendered = if vars.is_empty() {
        content
    } else {
        Templater::new().render(&content, &vars)?
    };
    let flow = parse_string(&rendered)?;
    Validator::validate(&flow)?;
    Ok(flow)
}
