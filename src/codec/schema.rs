//! Structural validation of enrollment documents.
//!
//! Checks element presence, required attributes and attribute value
//! domains. Each check returns the list of violations found; an empty list
//! means the document is well formed for its purpose.

use super::tree::{self, XmlElement};
use super::{COMMAND_ROOT, RESPONSE_ROOT};

const COMMAND_TYPES: [&str; 3] = ["CMP", "SO_UPLOAD", "TLT_UPLOAD"];
const VERSION_ATTRIBUTES: [&str; 9] = [
    "productId",
    "versionMci",
    "versionSo",
    "versionMclf",
    "versionContainer",
    "versionMcConfig",
    "versionTlApi",
    "versionDrApi",
    "versionCmp",
];

/// Validate an incoming command document.
pub(crate) fn validate_command_document(root: &XmlElement) -> Vec<String> {
    let mut violations = Vec::new();

    if root.name != COMMAND_ROOT {
        violations.push(format!("unexpected root element '{}'", root.name));
    }

    let lists: Vec<_> = root.children_named("commands").collect();
    let commands = match lists.as_slice() {
        [single] => single,
        [] => {
            violations.push("missing 'commands' element".to_string());
            return violations;
        }
        _ => {
            violations.push("more than one 'commands' element".to_string());
            lists[0]
        }
    };

    for command in &commands.children {
        if command.name != "command" {
            violations.push(format!("unexpected element '{}' in commands", command.name));
            continue;
        }
        match command.attribute("id") {
            Some(id) if id.trim().parse::<u32>().is_ok() => {}
            Some(id) => violations.push(format!("command id '{}' is not a number", id)),
            None => violations.push("command without id".to_string()),
        }
        match command.attribute("type") {
            Some(t) if COMMAND_TYPES.contains(&t) => {}
            Some(t) => violations.push(format!("unknown command type '{}'", t)),
            None => violations.push("command without type".to_string()),
        }
        if let Some(flag) = command.attribute("ignoreError") {
            if flag != "true" && flag != "false" {
                violations.push(format!("ignoreError '{}' is not a boolean", flag));
            }
        }
        if command.child("commandValue").is_none() {
            violations.push("command without commandValue".to_string());
        }
    }

    violations
}

/// Validate an outgoing response document.
pub(crate) fn validate_response_document(root: &XmlElement) -> Vec<String> {
    let mut violations = Vec::new();

    if root.name != RESPONSE_ROOT {
        violations.push(format!("unexpected root element '{}'", root.name));
    }

    for child in &root.children {
        match child.name.as_str() {
            "commandResultList" => validate_result_list(child, &mut violations),
            "systemInformation" => validate_system_info(child, &mut violations),
            "tltInstallationRequest" => validate_trustlet_request(child, &mut violations),
            other => violations.push(format!("unexpected element '{}'", other)),
        }
    }

    violations
}

fn validate_result_list(list: &XmlElement, violations: &mut Vec<String>) {
    for result in &list.children {
        if result.name != "commandResult" {
            violations.push(format!("unexpected element '{}' in result list", result.name));
            continue;
        }
        if result.attribute("id").is_none() {
            violations.push("commandResult without id".to_string());
        }
        let value = result.child("resultValue").is_some();
        let error = result.child("resultError");
        match (value, error) {
            (true, None) => {}
            (false, Some(error)) => {
                if error.attribute("errorCode").is_none() {
                    violations.push("resultError without errorCode".to_string());
                }
            }
            _ => violations
                .push("commandResult needs exactly one of resultValue, resultError".to_string()),
        }
    }
}

fn validate_system_info(info: &XmlElement, violations: &mut Vec<String>) {
    let Some(version) = info.child("mcVersion") else {
        violations.push("systemInformation without mcVersion".to_string());
        return;
    };
    for name in VERSION_ATTRIBUTES {
        match version.attribute(name) {
            None => violations.push(format!("mcVersion without {}", name)),
            Some(value) if name != "productId" && value.parse::<u32>().is_err() => {
                violations.push(format!("mcVersion {} '{}' is not a number", name, value))
            }
            _ => {}
        }
    }
}

fn validate_trustlet_request(request: &XmlElement, violations: &mut Vec<String>) {
    let payload = request
        .child("trustletAxf")
        .or_else(|| request.child("trustletEncryptionKey"));
    let Some(payload) = payload else {
        violations.push("tltInstallationRequest without trustlet data".to_string());
        return;
    };
    for name in ["minTltVersion", "tltPukHash"] {
        if payload.attribute(name).is_none() {
            violations.push(format!("{} without {}", payload.name, name));
        }
    }
    if payload.text.trim().is_empty() {
        violations.push(format!("{} without content", payload.name));
    }
}

/// Validate a document this agent produced. Violations are logged, never
/// fatal: the server has the final word.
pub(crate) fn check_outgoing(document: &[u8]) {
    match tree::parse(document) {
        Ok(root) => {
            let violations = validate_response_document(&root);
            if !violations.is_empty() {
                tracing::warn!(
                    count = violations.len(),
                    first = %violations[0],
                    "Outgoing document failed validation"
                );
            }
        }
        Err(e) => tracing::warn!("Outgoing document is not well formed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violations_of(doc: &str) -> Vec<String> {
        validate_command_document(&tree::parse(doc.as_bytes()).unwrap())
    }

    #[test]
    fn test_valid_command_document() {
        let doc = r#"<ContentManagementCommand><commands>
            <command id="1" type="CMP" ignoreError="false"><commandValue>AQ==</commandValue></command>
            </commands></ContentManagementCommand>"#;
        assert!(violations_of(doc).is_empty());
    }

    #[test]
    fn test_command_document_violations() {
        let doc = r#"<Other><commands>
            <command type="BOGUS" ignoreError="maybe"/>
            </commands></Other>"#;
        let violations = violations_of(doc);
        assert_eq!(violations.len(), 5);
        assert!(violations.iter().any(|v| v.contains("root")));
        assert!(violations.iter().any(|v| v.contains("BOGUS")));

        assert_eq!(violations_of("<ContentManagementCommand/>").len(), 1);
    }

    #[test]
    fn test_result_needs_one_outcome() {
        let doc = r#"<ContentManagementResponse><commandResultList>
            <commandResult id="1"/>
            <commandResult id="2"><resultError/></commandResult>
            </commandResultList></ContentManagementResponse>"#;
        let root = tree::parse(doc.as_bytes()).unwrap();
        let violations = validate_response_document(&root);
        assert_eq!(violations.len(), 2);
    }
}
