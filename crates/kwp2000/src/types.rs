use crate::error::DefinitionError;
use crate::transform::Transform;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;

/// Largest record a single ReadDataByLocalIdentifier response can carry:
/// the one-byte message length covers the service id and local id too.
pub const MAX_RECORD_LEN: usize = 255 - 2;

/// How the ECU resolves the value behind a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressingMethod {
    /// Entry number in the ECU's symbol table.
    #[serde(rename = "symbol")]
    SymbolAddress,
    /// A predefined local identifier.
    #[serde(rename = "local_id")]
    LocationId,
}

impl fmt::Display for AddressingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressingMethod::SymbolAddress => f.write_str("symbol"),
            AddressingMethod::LocationId => f.write_str("local_id"),
        }
    }
}

/// Encoded size of a field inside the aggregate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    Byte,
    Word,
    Long,
}

impl Width {
    pub const fn len(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Long => 4,
        }
    }
}

/// One field as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub method: AddressingMethod,
    pub address: u16,
    pub width: Width,
    #[serde(default)]
    pub signed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// Binary encoding and display rule of one telemetry value.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub method: AddressingMethod,
    pub address: u16,
    pub width: Width,
    pub signed: bool,
    pub transform: Option<Transform>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, method: AddressingMethod, address: u16, width: Width) -> Self {
        Self {
            name: name.into(),
            method,
            address,
            width,
            signed: false,
            transform: None,
        }
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn with_formula(mut self, formula: &str) -> Result<Self, DefinitionError> {
        let transform = Transform::parse(formula).map_err(|reason| DefinitionError::Formula {
            name: self.name.clone(),
            formula: formula.to_string(),
            reason,
        })?;
        self.transform = Some(transform);
        Ok(self)
    }

    pub fn from_spec(spec: FieldSpec) -> Result<Self, DefinitionError> {
        let mut desc = FieldDescriptor::new(spec.name, spec.method, spec.address, spec.width);
        desc.signed = spec.signed;
        match spec.formula.as_deref().map(str::trim) {
            Some(formula) if !formula.is_empty() => desc.with_formula(formula),
            _ => Ok(desc),
        }
    }
}

/// The ordered, immutable field list of a session.
///
/// The same list drives both the bind order sent to the ECU and the byte
/// layout expected in every record, so it is built once and shared.
#[derive(Debug, Clone)]
pub struct FieldList(Arc<[FieldDescriptor]>);

impl FieldList {
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self, DefinitionError> {
        if fields.is_empty() {
            return Err(DefinitionError::Empty);
        }
        if fields.len() > usize::from(u8::MAX) + 1 {
            return Err(DefinitionError::TooMany(fields.len()));
        }
        let len: usize = fields.iter().map(|f| f.width.len()).sum();
        if len > MAX_RECORD_LEN {
            return Err(DefinitionError::RecordTooLarge {
                len,
                max: MAX_RECORD_LEN,
            });
        }
        Ok(Self(fields.into()))
    }

    pub fn from_specs(specs: Vec<FieldSpec>) -> Result<Self, DefinitionError> {
        let fields = specs
            .into_iter()
            .map(FieldDescriptor::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(fields)
    }

    /// Total record length implied by the declared widths.
    pub fn record_len(&self) -> usize {
        self.0.iter().map(|f| f.width.len()).sum()
    }
}

impl Deref for FieldList {
    type Target = [FieldDescriptor];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A decoded value after the optional transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Outcome of decoding one field on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Value { raw: i64, value: Scalar },
    Failed,
}

impl Reading {
    pub fn scalar(&self) -> Option<Scalar> {
        match self {
            Reading::Value { value, .. } => Some(*value),
            Reading::Failed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserialize() {
        let raw = r#"{"name":"ActualIn.p_AirAmbient","method":"symbol","address":3437,"width":"word","signed":true,"formula":"%v/10.0"}"#;
        let spec: FieldSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.method, AddressingMethod::SymbolAddress);
        assert_eq!(spec.width, Width::Word);
        let desc = FieldDescriptor::from_spec(spec).unwrap();
        assert!(desc.signed);
        assert!(desc.transform.is_some());
    }

    #[test]
    fn test_spec_defaults() {
        let raw = r#"{"name":"MAF.m_AirInlet","method":"local_id","address":105,"width":"long"}"#;
        let spec: FieldSpec = serde_json::from_str(raw).unwrap();
        let desc = FieldDescriptor::from_spec(spec).unwrap();
        assert!(!desc.signed);
        assert!(desc.transform.is_none());
        assert_eq!(desc.width.len(), 4);
    }

    #[test]
    fn test_field_list_limits() {
        assert!(matches!(FieldList::new(vec![]), Err(DefinitionError::Empty)));

        let many: Vec<_> = (0..64)
            .map(|i| FieldDescriptor::new(format!("f{i}"), AddressingMethod::SymbolAddress, i, Width::Long))
            .collect();
        assert!(matches!(
            FieldList::new(many),
            Err(DefinitionError::RecordTooLarge { len: 256, .. })
        ));

        let list = FieldList::new(vec![
            FieldDescriptor::new("a", AddressingMethod::SymbolAddress, 1, Width::Word),
            FieldDescriptor::new("b", AddressingMethod::LocationId, 2, Width::Byte),
        ])
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.record_len(), 3);
        assert_eq!(list[1].name, "b");
    }

    #[test]
    fn test_bad_formula_names_the_field() {
        let spec = FieldSpec {
            name: "rpm".into(),
            method: AddressingMethod::SymbolAddress,
            address: 1,
            width: Width::Word,
            signed: false,
            formula: Some("(%v".into()),
        };
        match FieldDescriptor::from_spec(spec) {
            Err(DefinitionError::Formula { name, .. }) => assert_eq!(name, "rpm"),
            other => panic!("expected formula error, got {other:?}"),
        }
    }
}
