use serde::Serialize;
use serde_json::Value;

/// JSON-RPC protocol version written on every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request: `{"jsonrpc":"2.0","id":N,"method":...,"params":{...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    /// Compact JSON encoding. Never contains a raw newline.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Outcome carried by a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Value),
    Error(Value),
}

/// Inbound message correlated to a request by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub reply: Reply,
}

/// Classification of one inbound stdout line.
#[derive(Debug)]
pub enum Inbound {
    /// Empty or whitespace-only line.
    Blank,
    /// A response to one of our requests.
    Response(Response),
    /// Valid JSON that is not a response (notification, server request, log object).
    NotAResponse(Value),
    /// Not JSON at all.
    Malformed(serde_json::Error),
}

impl Inbound {
    /// Classify a line of server output.
    ///
    /// A response needs an unsigned integer `id` and an `error` or `result`
    /// key. Key presence counts even when the value is `null`. When both
    /// keys are present the error wins.
    pub fn classify(line: &[u8]) -> Self {
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            return Inbound::Blank;
        }

        let value: Value = match serde_json::from_slice(trimmed) {
            Ok(value) => value,
            Err(err) => return Inbound::Malformed(err),
        };

        let Value::Object(mut map) = value else {
            return Inbound::NotAResponse(value);
        };
        let Some(id) = map.get("id").and_then(Value::as_u64) else {
            return Inbound::NotAResponse(Value::Object(map));
        };

        let reply = if let Some(error) = map.remove("error") {
            Reply::Error(error)
        } else if let Some(result) = map.remove("result") {
            Reply::Result(result)
        } else {
            return Inbound::NotAResponse(Value::Object(map));
        };

        Inbound::Response(Response { id, reply })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(line: &str) -> Response {
        match Inbound::classify(line.as_bytes()) {
            Inbound::Response(response) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn request_wire_shape() {
        let params = json!({"name": "ping", "arguments": {}});
        let line = Request::new(7, "tools/call", &params).to_line().unwrap();
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "tools/call",
                "params": {"name": "ping", "arguments": {}}
            })
        );
        assert!(!line.contains(&b'\n'));
    }

    #[test]
    fn request_with_multiline_text_stays_one_line() {
        let params = json!({"code": "Sub A()\r\n  MsgBox 1\r\nEnd Sub"});
        let line = Request::new(1, "tools/call", &params).to_line().unwrap();
        assert!(!line.contains(&b'\n'));
    }

    #[test]
    fn result_response() {
        let resp = response(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#);
        assert_eq!(resp.id, 1);
        assert_eq!(resp.reply, Reply::Result(json!({"ok": true})));
    }

    #[test]
    fn null_result_still_counts() {
        let resp = response(r#"{"id":3,"result":null}"#);
        assert_eq!(resp.reply, Reply::Result(Value::Null));
    }

    #[test]
    fn error_wins_over_result() {
        let resp = response(r#"{"id":2,"result":1,"error":{"code":-1,"message":"x"}}"#);
        assert_eq!(resp.reply, Reply::Error(json!({"code": -1, "message": "x"})));
    }

    #[test]
    fn blank_and_whitespace_lines() {
        assert!(matches!(Inbound::classify(b""), Inbound::Blank));
        assert!(matches!(Inbound::classify(b"  \t"), Inbound::Blank));
    }

    #[test]
    fn log_line_is_malformed() {
        assert!(matches!(
            Inbound::classify(b"# vba-excel-mcp server: booting..."),
            Inbound::Malformed(_)
        ));
    }

    #[test]
    fn json_without_response_shape() {
        for line in [
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#,
            r#"{"id":"abc","result":1}"#,
            r#"{"id":-4,"result":1}"#,
            r#"{"id":1.5,"result":1}"#,
            r#"{"id":9}"#,
            r#"[1,2,3]"#,
            r#""text""#,
        ] {
            assert!(
                matches!(Inbound::classify(line.as_bytes()), Inbound::NotAResponse(_)),
                "{line}"
            );
        }
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let resp = response("  {\"id\":4,\"result\":\"pong\"}\r");
        assert_eq!(resp.id, 4);
    }
}
