//! The serialized introspection map: `tag → [modules]`, each module → `[functions, signatures,
//! types]`. Fixed as a stable `serde_json` document: the same loaded state always serializes to the same bytes.

use serde::Serialize;

use crate::reflect::Signature;

#[derive(Serialize, Debug, PartialEq)]
pub struct ParameterReport {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct SignatureReport {
    pub parameters: Vec<ParameterReport>,
    pub return_type: Option<String>,
    pub is_async: bool,
    pub variadic: bool,
}

impl From<&Signature> for SignatureReport {
    fn from(sig: &Signature) -> Self {
        SignatureReport {
            parameters: sig
                .parameters
                .iter()
                .map(|p| ParameterReport {
                    name: p.name.clone(),
                    ty: p.ty.as_ref().map(|t| t.name.clone()),
                })
                .collect(),
            return_type: sig.return_type.as_ref().map(|t| t.name.clone()),
            is_async: sig.is_async,
            variadic: sig.variadic,
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub struct FunctionReport {
    pub name: String,
    pub signature: SignatureReport,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct ClassReport {
    pub name: String,
    pub methods: Vec<String>,
    pub static_methods: Vec<String>,
    pub attributes: Vec<String>,
    pub static_attributes: Vec<String>,
}

/// One loaded handle's exported scope, flattened into the shapes `inspect`
/// reports.
#[derive(Serialize, Debug, Default, PartialEq)]
pub struct ModuleReport {
    pub functions: Vec<FunctionReport>,
    pub classes: Vec<ClassReport>,
}

#[derive(Serialize, Debug, Default, PartialEq)]
pub struct LoaderReport {
    pub tag: String,
    pub modules: Vec<ModuleReport>,
}

#[derive(Serialize, Debug, Default, PartialEq)]
pub struct InspectReport {
    pub loaders: Vec<LoaderReport>,
}

impl InspectReport {
    /// Serializes to the document callers of `metacall_inspect` receive.
    /// Byte-stability across repeated calls falls
    /// out of every field here being a `Vec` populated in a fixed order
    /// rather than a `HashMap`.
    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::error::MetacallError::Adapter {
            tag: "inspect".to_string(),
            source: Box::new(e),
        })
    }
}
