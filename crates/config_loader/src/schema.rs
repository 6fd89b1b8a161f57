//! Schema conformance
//!
//! Range and length constraints declared on the contract types, plus channel ranges of
//! acquisition pairs, reported with the property path of the offending value.

use contracts::{AcquisitionPair, ContractError, PropertyPath, SetupDocument, CHANNEL_COUNT};
use validator::{Validate, ValidationErrors};

/// Check every device of the document against the schema
pub fn check(doc: &SetupDocument) -> Result<(), ContractError> {
    for (name, spec) in &doc.devices {
        let base = PropertyPath::new(["devices", name.as_str()]);
        report(spec.validate(), &base)?;

        for (channel, input) in &spec.inputs {
            report(input.validate(), &base.join("inputs").join(channel.to_string()))?;
        }
        if let Some(timestamps) = &spec.timestamps {
            let path = base.join("timestamps");
            report(timestamps.validate(), &path)?;
            check_pairs(&timestamps.acquisitions, &path.join("acquisitions"))?;
        }
        if let Some(histograms) = &spec.histograms {
            let path = base.join("histograms");
            report(histograms.validate(), &path)?;
            check_pairs(&histograms.acquisitions, &path.join("acquisitions"))?;
        }
    }
    Ok(())
}

fn report(result: Result<(), ValidationErrors>, base: &PropertyPath) -> Result<(), ContractError> {
    let Err(errors) = result else {
        return Ok(());
    };
    let mut fields: Vec<(String, String)> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = field.to_string();
            errs.iter().map(move |e| (field.clone(), e.to_string()))
        })
        .collect();
    fields.sort();

    match fields.first() {
        Some((field, detail)) => Err(ContractError::config_property(
            format!("schema violation on '{field}': {detail}"),
            base.join(field.as_str()),
        )),
        None => Err(ContractError::config_property(
            format!("schema violation: {errors}"),
            base.clone(),
        )),
    }
}

fn check_pairs(pairs: &[AcquisitionPair], path: &PropertyPath) -> Result<(), ContractError> {
    for (index, pair) in pairs.iter().enumerate() {
        if pair.reference > CHANNEL_COUNT || !(1..=CHANNEL_COUNT).contains(&pair.stop) {
            return Err(ContractError::config_property(
                format!(
                    "acquisition [{}, {}] out of range: reference must be 0..={CHANNEL_COUNT}, stop 1..={CHANNEL_COUNT}",
                    pair.reference, pair.stop
                ),
                path.join(index.to_string()),
            ));
        }
    }
    Ok(())
}
