//! Semantic validation module
//!
//! Validation rules:
//! - acquisitions only reference configured inputs
//! - device addresses are unique
//! - every layout node references a known device, at most once
//! - the master output 1 carries no agent
//!
//! Devices without acquisitions are reported as warnings.

use std::collections::HashMap;

use contracts::{
    AcquisitionPair, Channel, ContractError, DeviceSpec, LayoutTree, PropertyPath, SetupDocument,
};

/// Validate the document against its layout tree
///
/// Returns the first error encountered, or the list of warnings.
pub fn validate(doc: &SetupDocument, tree: &LayoutTree) -> Result<Vec<String>, ContractError> {
    validate_acquisition_inputs(doc)?;
    validate_unique_addresses(doc)?;
    validate_layout(doc, tree)?;
    Ok(collect_warnings(doc, tree))
}

/// Every referenced input must be configured on that device
fn validate_acquisition_inputs(doc: &SetupDocument) -> Result<(), ContractError> {
    for (name, spec) in &doc.devices {
        let base = PropertyPath::new(["devices", name.as_str()]);
        let groups = [
            ("timestamps", spec.raw_acquisitions().collect::<Vec<_>>()),
            ("histograms", spec.histogram_acquisitions().collect::<Vec<_>>()),
        ];
        for (group, pairs) in groups {
            for (index, pair) in pairs {
                if let Some(missing) = missing_input(spec, &pair) {
                    return Err(ContractError::config_properties(
                        format!(
                            "acquisition [{}, {}] of device '{name}' uses input {missing} which is not configured",
                            pair.reference, pair.stop
                        ),
                        vec![
                            base.join(group)
                                .join("acquisitions")
                                .join((index - 1).to_string()),
                            base.join("inputs"),
                        ],
                    ));
                }
            }
        }
    }
    Ok(())
}

fn missing_input(spec: &DeviceSpec, pair: &AcquisitionPair) -> Option<u8> {
    let configured = |n: u8| Channel::new(n).is_some_and(|c| spec.inputs.contains_key(&c));
    if pair.reference != 0 && !configured(pair.reference) {
        return Some(pair.reference);
    }
    (!configured(pair.stop)).then_some(pair.stop)
}

/// No two devices may share a network address
fn validate_unique_addresses(doc: &SetupDocument) -> Result<(), ContractError> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (name, spec) in &doc.devices {
        if let Some(first) = seen.insert(spec.ip.as_str(), name.as_str()) {
            return Err(ContractError::config_properties(
                format!("devices '{first}' and '{name}' share the address {}", spec.ip),
                vec![
                    PropertyPath::new(["devices", first, "ip"]),
                    PropertyPath::new(["devices", name.as_str(), "ip"]),
                ],
            ));
        }
    }
    Ok(())
}

/// Referential and structural rules of the layout tree
fn validate_layout(doc: &SetupDocument, tree: &LayoutTree) -> Result<(), ContractError> {
    let mut positions: HashMap<&str, &PropertyPath> = HashMap::new();

    for node in tree.nodes() {
        if !doc.devices.contains_key(&node.device) {
            return Err(ContractError::config_property(
                format!("layout references undefined device '{}'", node.device),
                node.path.join("device"),
            ));
        }
        if let Some(first) = positions.insert(node.device.as_str(), &node.path) {
            return Err(ContractError::config_properties(
                format!("device '{}' appears more than once in the layout", node.device),
                vec![first.join("device"), node.path.join("device")],
            ));
        }
    }

    // output 1 of the master is wired to its own start input
    if let Some((channel, _)) = tree
        .agents(LayoutTree::ROOT)
        .find(|(channel, _)| channel.get() == 1)
    {
        return Err(ContractError::config_property(
            "output 1 of the master device is reserved for its own start input and cannot drive an agent",
            tree.root().path.join("agents").join(channel.to_string()),
        ));
    }
    Ok(())
}

fn collect_warnings(doc: &SetupDocument, tree: &LayoutTree) -> Vec<String> {
    let mut warnings = Vec::new();
    for (name, spec) in &doc.devices {
        if tree.find(name).is_none() {
            warnings.push(format!(
                "device '{name}' is not part of the layout and will be ignored"
            ));
        } else if !spec.has_acquisitions() {
            warnings.push(format!("device '{name}' has no acquisitions"));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_json;

    fn check(content: &str) -> Result<Vec<String>, ContractError> {
        let doc = parse_json(content).unwrap();
        let tree = LayoutTree::from_layout(&doc.layout);
        validate(&doc, &tree)
    }

    #[test]
    fn test_valid_config() {
        let warnings = check(
            r#"{
                "devices": {
                    "m": { "ip": "10.0.0.1", "inputs": { "1": {} }, "timestamps": { "acquisitions": [[0, 1]] } },
                    "a": { "ip": "10.0.0.2" }
                },
                "layout": { "device": "m", "agents": { "2": { "device": "a" } } }
            }"#,
        )
        .unwrap();
        assert_eq!(warnings, vec!["device 'a' has no acquisitions".to_string()]);
    }

    #[test]
    fn test_unconfigured_input_names_both_paths() {
        let err = check(
            r#"{
                "devices": {
                    "m": { "ip": "10.0.0.1", "inputs": { "1": {} },
                           "histograms": { "acquisitions": [[1, 1], [1, 3]] } }
                },
                "layout": { "device": "m" }
            }"#,
        )
        .unwrap_err();
        let paths: Vec<String> = err.property_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(
            paths,
            vec!["/devices/m/histograms/acquisitions/1", "/devices/m/inputs"]
        );
        assert!(err.to_string().contains("input 3"), "got: {err}");
    }

    #[test]
    fn test_unconfigured_reference_input() {
        let err = check(
            r#"{
                "devices": {
                    "m": { "ip": "10.0.0.1", "inputs": { "2": {} },
                           "timestamps": { "acquisitions": [[4, 2]] } }
                },
                "layout": { "device": "m" }
            }"#,
        )
        .unwrap_err();
        assert_eq!(
            err.property_paths()[0].to_string(),
            "/devices/m/timestamps/acquisitions/0"
        );
    }

    #[test]
    fn test_duplicate_address() {
        let err = check(
            r#"{
                "devices": { "a": { "ip": "10.0.0.1" }, "b": { "ip": "10.0.0.1" } },
                "layout": { "device": "a", "agents": { "2": { "device": "b" } } }
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("share the address"), "got: {err}");
        assert_eq!(err.property_paths().len(), 2);
    }

    #[test]
    fn test_unknown_root_device() {
        let err = check(
            r#"{ "devices": { "a": { "ip": "10.0.0.1" } }, "layout": { "device": "zz" } }"#,
        )
        .unwrap_err();
        assert_eq!(err.property_paths()[0].to_string(), "/layout/device");
    }

    #[test]
    fn test_unknown_agent_device() {
        let err = check(
            r#"{
                "devices": { "a": { "ip": "10.0.0.1" } },
                "layout": { "device": "a", "agents": { "3": { "device": "ghost" } } }
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.property_paths()[0].to_string(), "/layout/agents/3/device");
    }

    #[test]
    fn test_master_output_one_is_reserved() {
        let err = check(
            r#"{
                "devices": { "a": { "ip": "10.0.0.1" }, "b": { "ip": "10.0.0.2" } },
                "layout": { "device": "a", "agents": { "1": { "device": "b" } } }
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("reserved"), "got: {err}");
        assert_eq!(err.property_paths()[0].to_string(), "/layout/agents/1");
    }

    #[test]
    fn test_agent_output_one_is_allowed() {
        let result = check(
            r#"{
                "devices": {
                    "a": { "ip": "10.0.0.1" }, "b": { "ip": "10.0.0.2" }, "c": { "ip": "10.0.0.3" }
                },
                "layout": { "device": "a", "agents": { "2": {
                    "device": "b", "agents": { "1": { "device": "c" } } } } }
            }"#,
        );
        assert!(result.is_ok(), "Failed: {:?}", result.err());
    }

    #[test]
    fn test_device_twice_in_layout() {
        let err = check(
            r#"{
                "devices": { "a": { "ip": "10.0.0.1" }, "b": { "ip": "10.0.0.2" } },
                "layout": { "device": "a", "agents": {
                    "2": { "device": "b" }, "3": { "device": "b" } } }
            }"#,
        )
        .unwrap_err();
        let paths: Vec<String> = err.property_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(
            paths,
            vec!["/layout/agents/2/device", "/layout/agents/3/device"]
        );
    }

    #[test]
    fn test_device_outside_layout_is_warned() {
        let warnings = check(
            r#"{
                "devices": { "a": { "ip": "10.0.0.1" }, "spare": { "ip": "10.0.0.9" } },
                "layout": { "device": "a" }
            }"#,
        )
        .unwrap();
        assert!(warnings.iter().any(|w| w.contains("'spare' is not part of the layout")));
    }
}
