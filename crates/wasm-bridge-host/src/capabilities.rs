//! Capability policy for request field access.
//!
//! A [`RequestHandler`] is built per call from the static [`RequestConfig`]
//! and the ambient request of the calling instance. It decides whether the
//! operation is allowed and performs the actual field read or write.

use url::form_urlencoded;

use wasm_bridge_common::{CapabilityError, CoordinatedRequest, RequestConfig};

/// Which part of the request a field key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// `method`, `url`, `id` or `body`.
    Meta,
    /// Top-level key of a JSON object body.
    Body,
    /// Request header, case-insensitive.
    Header,
    /// Router parameter.
    Params,
    /// Per-request state shared between guest calls.
    State,
    /// URL query parameter.
    Query,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Meta => "meta",
            FieldType::Body => "body",
            FieldType::Header => "header",
            FieldType::Params => "params",
            FieldType::State => "state",
            FieldType::Query => "query",
        }
    }
}

impl TryFrom<i32> for FieldType {
    type Error = CapabilityError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FieldType::Meta),
            1 => Ok(FieldType::Body),
            2 => Ok(FieldType::Header),
            3 => Ok(FieldType::Params),
            4 => Ok(FieldType::State),
            5 => Ok(FieldType::Query),
            other => Err(CapabilityError::InvalidFieldType(other)),
        }
    }
}

/// Request capability bound to one call.
pub struct RequestHandler<'a> {
    config: &'a RequestConfig,
    request: Option<&'a mut CoordinatedRequest>,
}

impl<'a> RequestHandler<'a> {
    pub fn new(config: &'a RequestConfig, request: Option<&'a mut CoordinatedRequest>) -> Self {
        Self { config, request }
    }

    /// Read a field of the ambient request.
    ///
    /// `key` is the guest's raw bytes and must be UTF-8.
    pub fn get_field(&self, field_type: i32, key: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        self.check("get_field", self.config.allow_get_field)?;
        let field_type = FieldType::try_from(field_type)?;
        let req = self.request.as_deref().ok_or(CapabilityError::RequestNotSet)?;
        let key = utf8(key, "key")?;

        let value = match field_type {
            FieldType::Meta => match key {
                "method" => Some(req.method.clone().into_bytes()),
                "url" => Some(req.url.clone().into_bytes()),
                "id" => Some(req.id.clone().into_bytes()),
                "body" => Some(req.body.clone()),
                _ => None,
            },
            FieldType::Body => req.body_field(key).map_err(|e| {
                CapabilityError::policy(format!("failed to parse body as JSON: {e}"))
            })?,
            FieldType::Header => req.header(key).map(|v| v.as_bytes().to_vec()),
            FieldType::Params => req.params.get(key).map(|v| v.as_bytes().to_vec()),
            FieldType::State => req.state.get(key).cloned(),
            FieldType::Query => req.query().and_then(|query| {
                form_urlencoded::parse(query.as_bytes())
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| value.into_owned().into_bytes())
            }),
        };

        value.ok_or(CapabilityError::KeyNotFound)
    }

    /// Write a field of the ambient request.
    ///
    /// State values are stored byte for byte. Every other writable field
    /// holds text, so its value must be UTF-8.
    pub fn set_field(
        &mut self,
        field_type: i32,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), CapabilityError> {
        self.check("set_field", self.config.allow_set_field)?;
        let field_type = FieldType::try_from(field_type)?;
        let req = self
            .request
            .as_deref_mut()
            .ok_or(CapabilityError::RequestNotSet)?;
        let key = utf8(key, "key")?;

        match field_type {
            FieldType::Meta | FieldType::Query => {
                return Err(CapabilityError::ReadOnlyField {
                    field: field_type.name().to_string(),
                });
            }
            FieldType::Body => {
                let value = utf8(value, "body value")?;
                req.set_body_field(key, value).map_err(|e| {
                    CapabilityError::policy(format!("failed to set body field: {e}"))
                })?;
            }
            FieldType::Header => req.set_header(key, utf8(value, "header value")?),
            FieldType::Params => {
                let value = utf8(value, "params value")?;
                req.params.insert(key.to_string(), value.to_string());
            }
            FieldType::State => {
                req.state.insert(key.to_string(), value.to_vec());
            }
        }

        Ok(())
    }

    fn check(&self, operation: &str, allowed: bool) -> Result<(), CapabilityError> {
        if !self.config.enabled {
            return Err(CapabilityError::NotEnabled);
        }
        if !allowed {
            return Err(CapabilityError::NotAllowed {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

fn utf8<'b>(bytes: &'b [u8], what: &str) -> Result<&'b str, CapabilityError> {
    std::str::from_utf8(bytes).map_err(|_| CapabilityError::invalid_utf8(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CoordinatedRequest {
        let mut req = CoordinatedRequest::new(
            "POST",
            "/users?page=2&name=a%20b",
            br#"{"user":"alice","count":3}"#.to_vec(),
        );
        req.set_header("X-Trace", "abc");
        req.params.insert("id".into(), "17".into());
        req
    }

    #[test]
    fn test_field_type_discriminants() {
        assert_eq!(FieldType::try_from(0), Ok(FieldType::Meta));
        assert_eq!(FieldType::try_from(5), Ok(FieldType::Query));
        assert_eq!(
            FieldType::try_from(6),
            Err(CapabilityError::InvalidFieldType(6))
        );
        assert!(FieldType::try_from(-1).is_err());
    }

    #[test]
    fn test_get_each_field_type() {
        let config = RequestConfig::default();
        let mut req = request();
        req.state.insert("k".into(), b"v".to_vec());
        let handler = RequestHandler::new(&config, Some(&mut req));

        assert_eq!(handler.get_field(0, b"method").unwrap(), b"POST");
        assert_eq!(handler.get_field(1, b"user").unwrap(), b"alice");
        assert_eq!(handler.get_field(1, b"count").unwrap(), b"3");
        assert_eq!(handler.get_field(2, b"x-trace").unwrap(), b"abc");
        assert_eq!(handler.get_field(3, b"id").unwrap(), b"17");
        assert_eq!(handler.get_field(4, b"k").unwrap(), b"v");
        assert_eq!(handler.get_field(5, b"page").unwrap(), b"2");
        assert_eq!(handler.get_field(5, b"name").unwrap(), b"a b");
    }

    #[test]
    fn test_missing_keys_report_not_found() {
        let config = RequestConfig::default();
        let mut req = request();
        let handler = RequestHandler::new(&config, Some(&mut req));

        for field_type in 0..=5 {
            assert_eq!(
                handler.get_field(field_type, b"nope"),
                Err(CapabilityError::KeyNotFound),
                "field type {field_type}"
            );
        }
    }

    #[test]
    fn test_disabled_capability() {
        let config = RequestConfig {
            enabled: false,
            ..RequestConfig::default()
        };
        let mut req = request();
        let mut handler = RequestHandler::new(&config, Some(&mut req));

        assert_eq!(
            handler.get_field(0, b"method"),
            Err(CapabilityError::NotEnabled)
        );
        assert_eq!(
            handler.set_field(4, b"k", b"v"),
            Err(CapabilityError::NotEnabled)
        );
    }

    #[test]
    fn test_operation_not_allowed() {
        let config = RequestConfig {
            allow_set_field: false,
            ..RequestConfig::default()
        };
        let mut req = request();
        let mut handler = RequestHandler::new(&config, Some(&mut req));

        assert!(handler.get_field(0, b"method").is_ok());
        assert!(matches!(
            handler.set_field(4, b"k", b"v"),
            Err(CapabilityError::NotAllowed { .. })
        ));
    }

    #[test]
    fn test_set_then_get() {
        let config = RequestConfig::default();
        let mut req = request();
        let mut handler = RequestHandler::new(&config, Some(&mut req));

        handler.set_field(1, b"greeting", b"hello").unwrap();
        handler.set_field(2, b"Content-Type", b"text/plain").unwrap();
        handler.set_field(3, b"slug", b"abc").unwrap();
        handler.set_field(4, b"counter", b"1").unwrap();

        assert_eq!(handler.get_field(1, b"greeting").unwrap(), b"hello");
        assert_eq!(handler.get_field(1, b"user").unwrap(), b"alice");
        assert_eq!(handler.get_field(2, b"content-type").unwrap(), b"text/plain");
        assert_eq!(handler.get_field(3, b"slug").unwrap(), b"abc");
        assert_eq!(handler.get_field(4, b"counter").unwrap(), b"1");
    }

    #[test]
    fn test_read_only_fields() {
        let config = RequestConfig::default();
        let mut req = request();
        let mut handler = RequestHandler::new(&config, Some(&mut req));

        assert!(matches!(
            handler.set_field(0, b"method", b"GET"),
            Err(CapabilityError::ReadOnlyField { .. })
        ));
        assert!(matches!(
            handler.set_field(5, b"page", b"3"),
            Err(CapabilityError::ReadOnlyField { .. })
        ));
    }

    #[test]
    fn test_missing_request() {
        let config = RequestConfig::default();
        let mut handler = RequestHandler::new(&config, None);

        assert_eq!(
            handler.get_field(0, b"method"),
            Err(CapabilityError::RequestNotSet)
        );
        assert_eq!(
            handler.set_field(4, b"k", b"v"),
            Err(CapabilityError::RequestNotSet)
        );
    }

    #[test]
    fn test_body_not_json() {
        let config = RequestConfig::default();
        let mut req = CoordinatedRequest::new("POST", "/", b"not json".to_vec());
        let handler = RequestHandler::new(&config, Some(&mut req));

        assert!(matches!(
            handler.get_field(1, b"user"),
            Err(CapabilityError::Policy(_))
        ));
        // Meta access to the raw body still works
        assert_eq!(handler.get_field(0, b"body").unwrap(), b"not json");
    }

    #[test]
    fn test_state_values_are_byte_exact() {
        let config = RequestConfig::default();
        let mut req = request();
        let mut handler = RequestHandler::new(&config, Some(&mut req));
        let blob = [0xff, 0x00, 0x80, b'a'];

        handler.set_field(4, b"blob", &blob).unwrap();
        assert_eq!(handler.get_field(4, b"blob").unwrap(), blob);
    }

    #[test]
    fn test_non_utf8_keys_are_rejected() {
        let config = RequestConfig::default();
        let mut req = request();
        let mut handler = RequestHandler::new(&config, Some(&mut req));

        // Two distinct invalid keys must not collapse onto one entry
        assert_eq!(
            handler.set_field(4, b"\xff", b"first"),
            Err(CapabilityError::invalid_utf8("key"))
        );
        assert_eq!(
            handler.get_field(4, b"\xfe"),
            Err(CapabilityError::invalid_utf8("key"))
        );
        assert!(req.state.is_empty());
    }

    #[test]
    fn test_text_fields_require_utf8_values() {
        let config = RequestConfig::default();
        let mut req = request();
        let mut handler = RequestHandler::new(&config, Some(&mut req));

        assert_eq!(
            handler.set_field(2, b"X-Bin", b"\xff\xfe"),
            Err(CapabilityError::invalid_utf8("header value"))
        );
        assert_eq!(
            handler.set_field(1, b"user", b"\x80"),
            Err(CapabilityError::invalid_utf8("body value"))
        );
        assert_eq!(
            handler.set_field(3, b"id", b"\xc3"),
            Err(CapabilityError::invalid_utf8("params value"))
        );
        assert_eq!(handler.get_field(1, b"user").unwrap(), b"alice");
    }
}
