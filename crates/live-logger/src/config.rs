use anyhow::{bail, Context};
use kwp2000::{FieldList, FieldSpec};
use std::fs;
use std::path::Path;
use tracing::info;

/// Load the ordered field list. `.json` files are read as JSON, anything else
/// as YAML. File order is bind order and record order.
pub fn load_field_list(path: impl AsRef<Path>) -> anyhow::Result<FieldList> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading field list: {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let specs = if is_json {
        parse_json(&raw)
    } else {
        parse_yaml(&raw)
    }
    .with_context(|| format!("parsing field list: {}", path.display()))?;
    let fields = FieldList::from_specs(specs)
        .with_context(|| format!("building field list: {}", path.display()))?;
    info!(
        path = %path.display(),
        fields = fields.len(),
        record_len = fields.record_len(),
        "field list loaded"
    );
    Ok(fields)
}

pub fn parse_json(raw: &str) -> anyhow::Result<Vec<FieldSpec>> {
    let specs: Vec<FieldSpec> = serde_json::from_str(raw)?;
    check_names(&specs)?;
    Ok(specs)
}

pub fn parse_yaml(raw: &str) -> anyhow::Result<Vec<FieldSpec>> {
    let specs: Vec<FieldSpec> = serde_yaml::from_str(raw)?;
    check_names(&specs)?;
    Ok(specs)
}

/// Names identify log columns, so they must be present and unique.
fn check_names(specs: &[FieldSpec]) -> anyhow::Result<()> {
    for (i, spec) in specs.iter().enumerate() {
        if spec.name.trim().is_empty() {
            bail!("field #{i} has an empty name");
        }
        if specs[..i].iter().any(|other| other.name == spec.name) {
            bail!("field #{i}: duplicate name '{}'", spec.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwp2000::{AddressingMethod, Width};
    use std::path::PathBuf;

    fn scratch(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("live-logger-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_json_keeps_file_order() {
        let path = scratch(
            "fields.json",
            r#"[
                {"name": "rpm", "method": "symbol", "address": 3428, "width": "word", "signed": true},
                {"name": "boost", "method": "symbol", "address": 3437, "width": "word", "formula": "%v/10.0"},
                {"name": "gear", "method": "local_id", "address": 12, "width": "byte"}
            ]"#,
        );
        let fields = load_field_list(&path).unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["rpm", "boost", "gear"]);
        assert!(fields[0].signed);
        assert!(fields[1].transform.is_some());
        assert_eq!(fields[2].method, AddressingMethod::LocationId);
        assert_eq!(fields.record_len(), 5);
    }

    #[test]
    fn test_load_yaml() {
        let path = scratch(
            "fields.yaml",
            "- name: coolant\n  method: symbol\n  address: 7\n  width: byte\n  signed: true\n  formula: \"value - 40\"\n",
        );
        let fields = load_field_list(&path).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].width, Width::Byte);
    }

    #[test]
    fn test_bad_formula_is_reported_with_path() {
        let path = scratch(
            "bad-formula.json",
            r#"[{"name": "x", "method": "symbol", "address": 1, "width": "word", "formula": "(%v"}]"#,
        );
        let err = load_field_list(&path).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("bad-formula.json"));
        assert!(msg.contains("field x"));
    }

    #[test]
    fn test_rejects_duplicates_and_empty_lists() {
        let dup = r#"[
            {"name": "a", "method": "symbol", "address": 1, "width": "byte"},
            {"name": "a", "method": "symbol", "address": 2, "width": "byte"}
        ]"#;
        assert!(parse_json(dup).is_err());

        let path = scratch("empty.json", "[]");
        assert!(load_field_list(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_field_list("/nonexistent/fields.json").is_err());
    }
}
