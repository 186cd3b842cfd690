//! Structural check of fetched payloads: a JSON object with the expected keys.
//! Field contents are not inspected.

/// Result of [`validate_shape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeCheck {
    Valid,
    /// Parsed as a JSON object but lacks these top-level keys.
    Invalid { missing: Vec<String> },
    /// Not a JSON object at all.
    Unparseable(String),
}

impl ShapeCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, ShapeCheck::Valid)
    }

    /// Human-readable failure reason, `None` when valid.
    pub fn reason(&self) -> Option<String> {
        match self {
            ShapeCheck::Valid => None,
            ShapeCheck::Invalid { missing } => {
                Some(format!("missing keys: {}", missing.join(", ")))
            }
            ShapeCheck::Unparseable(why) => Some(format!("not a JSON object: {}", why)),
        }
    }
}

/// Check that `bytes` is a JSON object containing every key in `required`.
pub fn validate_shape(bytes: &[u8], required: &[String]) -> ShapeCheck {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => return ShapeCheck::Unparseable(e.to_string()),
    };
    let Some(obj) = value.as_object() else {
        let found = match value {
            serde_json::Value::Array(_) => "array",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::Bool(_) => "bool",
            _ => "null",
        };
        return ShapeCheck::Unparseable(format!("top-level value is {}", found));
    };
    let missing: Vec<String> = required
        .iter()
        .filter(|k| !obj.contains_key(k.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        ShapeCheck::Valid
    } else {
        ShapeCheck::Invalid { missing }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn object_with_required_keys() {
        let body = br#"{"bills": [], "pagination": {"count": 0}}"#;
        assert_eq!(
            validate_shape(body, &keys(&["bills", "pagination"])),
            ShapeCheck::Valid
        );
        assert!(validate_shape(b"{}", &[]).is_valid());
    }

    #[test]
    fn reports_missing_keys() {
        let check = validate_shape(br#"{"bills": []}"#, &keys(&["bills", "pagination"]));
        assert_eq!(
            check,
            ShapeCheck::Invalid {
                missing: keys(&["pagination"])
            }
        );
        assert_eq!(check.reason().unwrap(), "missing keys: pagination");
    }

    #[test]
    fn non_object_is_unparseable() {
        assert!(matches!(
            validate_shape(b"[1,2]", &[]),
            ShapeCheck::Unparseable(_)
        ));
        assert!(matches!(
            validate_shape(b"<html>", &[]),
            ShapeCheck::Unparseable(_)
        ));
    }
}
