use crate::{Error, Result};
use serde_json::Value;

/// Identity of the request a plan executes for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: u32,
}

impl RequestContext {
    /// Build a context from a request document, generating a request id when
    /// the document has none. `user_id` is required.
    pub fn from_request(request: &Value) -> Result<Self> {
        let request_id = match request.get("request_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => generate_request_id(),
        };
        let user_id = match request.get("user_id") {
            Some(value) => parse_user_id(value)?,
            None => return Err(Error::Request("missing user_id".to_string())),
        };
        Ok(Self {
            request_id,
            user_id,
        })
    }
}

/// Accept a positive integer, or a string holding one in decimal, up to u32::MAX.
pub fn parse_user_id(value: &Value) -> Result<u32> {
    let type_err = |got: &str| {
        Error::Request(format!(
            "invalid type for user_id: expected positive integer or numeric string, got {got}"
        ))
    };

    let parsed: u64 = match value {
        Value::Null => return Err(type_err("null")),
        Value::Bool(_) => return Err(type_err("boolean")),
        Value::Object(_) => return Err(type_err("object")),
        Value::Array(_) => return Err(type_err("array")),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                v
            } else if let Some(v) = n.as_i64() {
                return Err(Error::Request(format!(
                    "invalid user_id: must be positive integer (got {v})"
                )));
            } else {
                return Err(type_err("float"));
            }
        }
        Value::String(s) => {
            if s.is_empty() {
                return Err(Error::Request("invalid user_id: empty string".to_string()));
            }
            if !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::Request(format!(
                    "invalid user_id: string \"{s}\" is not a valid decimal integer"
                )));
            }
            // All-digit strings only fail to parse on overflow.
            s.parse::<u64>().unwrap_or(u64::MAX)
        }
    };

    if parsed == 0 {
        return Err(Error::Request(
            "invalid user_id: must be positive integer (got 0)".to_string(),
        ));
    }
    u32::try_from(parsed).map_err(|_| {
        Error::Request(format!("invalid user_id: value {parsed} exceeds uint32 max"))
    })
}

pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_valid_ids() {
        for (input, expect) in [
            (json!(123), 123),
            (json!(1), 1),
            (json!(4294967295u64), u32::MAX),
            (json!("123"), 123),
            (json!("0123"), 123),
            (json!("4294967295"), u32::MAX),
        ] {
            assert_eq!(parse_user_id(&input).unwrap(), expect, "{input}");
        }
    }

    #[test]
    fn test_rejects_invalid_ids() {
        for (input, expect) in [
            (json!(null), "got null"),
            (json!(true), "got boolean"),
            (json!(1.5), "got float"),
            (json!({}), "got object"),
            (json!([]), "got array"),
            (json!(0), "positive"),
            (json!(-5), "positive"),
            (json!(4294967296u64), "exceeds"),
            (json!("0"), "positive"),
            (json!(""), "empty"),
            (json!("abc"), "not a valid decimal"),
            (json!(" 123"), "not a valid decimal"),
            (json!("-1"), "not a valid decimal"),
            (json!("4294967296"), "exceeds"),
            (json!("99999999999999999999999"), "exceeds"),
        ] {
            let err = parse_user_id(&input).unwrap_err().to_string();
            assert!(err.contains(expect), "{input}: {err}");
        }
    }

    #[test]
    fn test_request_context() {
        let ctx = RequestContext::from_request(&json!({"request_id": "r-1", "user_id": "42"})).unwrap();
        assert_eq!(
            ctx,
            RequestContext {
                request_id: "r-1".to_string(),
                user_id: 42
            }
        );

        let ctx = RequestContext::from_request(&json!({"user_id": 7})).unwrap();
        assert_eq!(ctx.request_id.len(), 36);

        let err = RequestContext::from_request(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "missing user_id");
    }
}
