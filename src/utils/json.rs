use serde_json::Value;

/// How a key in a partial JSON update changes a nullable text column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPatch {
    Keep,
    Clear,
    Set(String),
}

/// Missing keys keep the value, `null` clears it, strings set it. Numbers
/// and booleans are accepted as their text form.
pub fn field_patch(value: Option<&Value>) -> Result<FieldPatch, String> {
    match value {
        None => Ok(FieldPatch::Keep),
        Some(Value::Null) => Ok(FieldPatch::Clear),
        Some(Value::String(s)) => Ok(FieldPatch::Set(s.to_owned())),
        Some(Value::Number(n)) => Ok(FieldPatch::Set(n.to_string())),
        Some(Value::Bool(b)) => Ok(FieldPatch::Set(b.to_string())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

impl FieldPatch {
    /// The new value, or `None` when the key was absent.
    pub fn resolve(self) -> Option<Option<String>> {
        match self {
            FieldPatch::Keep => None,
            FieldPatch::Clear => Some(None),
            FieldPatch::Set(value) => Some(Some(value)),
        }
    }
}
