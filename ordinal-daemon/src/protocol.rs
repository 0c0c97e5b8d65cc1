use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ordinal_core::{Ordinal, Record, RecordId};
use ordinal_sync::SaveOutcome;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrdinalRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Kept loosely typed until [`parse_ordered_ids`] validates it.
    #[serde(
        rename = "orderedIds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ordered_ids: Option<Value>,
}

impl OrdinalRequest {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinalResponse {
    pub ok: bool,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrdinalResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            code: 200,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn from_error(err: &DaemonError) -> Self {
        Self::error(err.status_code(), err.to_string())
    }
}

/// One row of a `list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub id: RecordId,
    pub title: String,
    pub primary_ordinal: Ordinal,
    pub thumbnail_url: Option<String>,
}

impl From<&Record> for ListItem {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            primary_ordinal: record.primary_ordinal,
            thumbnail_url: record.thumbnail_url.clone(),
        }
    }
}

/// `data` of a successful `save_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOrderData {
    pub updated_count: usize,
    pub requested: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<&SaveOutcome> for SaveOrderData {
    fn from(outcome: &SaveOutcome) -> Self {
        Self {
            updated_count: outcome.updated,
            requested: outcome.requested,
            warning: outcome.warning(),
        }
    }
}

/// Validate the raw `orderedIds` payload into record ids.
///
/// Accepts an array of positive integers; decimal strings are accepted too,
/// since form-encoded clients send ids as text.
pub fn parse_ordered_ids(raw: Option<&Value>) -> Result<Vec<RecordId>, DaemonError> {
    let Some(raw) = raw else {
        return Err(DaemonError::Validation("orderedIds is required".to_string()));
    };
    let Some(items) = raw.as_array() else {
        return Err(DaemonError::Validation(
            "orderedIds must be an array".to_string(),
        ));
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let id = match item {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            };
            match id {
                Some(id) if id > 0 => Ok(RecordId(id)),
                _ => Err(DaemonError::Validation(format!(
                    "orderedIds[{index}] is not a positive integer: {item}"
                ))),
            }
        })
        .collect()
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &OrdinalRequest) -> Result<OrdinalResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: OrdinalResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = OrdinalRequest::new("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path, token: Option<&str>) -> Result<(), DaemonError> {
    let request = OrdinalRequest {
        token: token.map(str::to_string),
        ..OrdinalRequest::new("stop")
    };
    response_into_data(send_request(home, &request)?).map(|_| ())
}

pub fn request_list(
    home: &Path,
    token: Option<&str>,
    collection: &str,
) -> Result<Vec<ListItem>, DaemonError> {
    let request = OrdinalRequest {
        token: token.map(str::to_string),
        collection: Some(collection.to_string()),
        ..OrdinalRequest::new("list")
    };
    let data = response_into_data(send_request(home, &request)?)?;
    Ok(serde_json::from_value(data)?)
}

pub fn request_save_order(
    home: &Path,
    token: Option<&str>,
    collection: &str,
    ids: &[RecordId],
) -> Result<SaveOrderData, DaemonError> {
    let request = OrdinalRequest {
        token: token.map(str::to_string),
        collection: Some(collection.to_string()),
        ordered_ids: Some(serde_json::to_value(ids)?),
        ..OrdinalRequest::new("save_order")
    };
    let data = response_into_data(send_request(home, &request)?)?;
    Ok(serde_json::from_value(data)?)
}

pub fn request_migrate(
    home: &Path,
    token: Option<&str>,
    collection: &str,
) -> Result<Value, DaemonError> {
    let request = OrdinalRequest {
        token: token.map(str::to_string),
        collection: Some(collection.to_string()),
        ..OrdinalRequest::new("migrate")
    };
    response_into_data(send_request(home, &request)?)
}

fn response_into_data(response: OrdinalResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Remote {
            code: response.code,
            message: response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ordered_ids_accept_integers_and_numeric_strings() {
        let raw = json!([3, "1", " 2 "]);
        let ids = parse_ordered_ids(Some(&raw)).unwrap();
        assert_eq!(ids, vec![RecordId(3), RecordId(1), RecordId(2)]);
    }

    #[test]
    fn ordered_ids_reject_bad_shapes() {
        for raw in [
            json!("1,2,3"),
            json!({"0": 1}),
            json!([1, -4]),
            json!([1, 0]),
            json!([1.5]),
            json!([null]),
            json!(["abc"]),
        ] {
            let err = parse_ordered_ids(Some(&raw)).unwrap_err();
            assert!(matches!(err, DaemonError::Validation(_)), "{raw}: {err}");
        }
        assert!(matches!(
            parse_ordered_ids(None),
            Err(DaemonError::Validation(_))
        ));
    }

    #[test]
    fn request_uses_wire_field_names() {
        let request = OrdinalRequest {
            token: Some("t".into()),
            collection: Some("gallery".into()),
            ordered_ids: Some(json!([2, 1])),
            ..OrdinalRequest::new("save_order")
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({"cmd": "save_order", "token": "t", "collection": "gallery", "orderedIds": [2, 1]})
        );

        let status: OrdinalRequest = serde_json::from_str(r#"{"cmd":"status"}"#).unwrap();
        assert!(status.token.is_none() && status.ordered_ids.is_none());
    }

    #[test]
    fn list_item_is_camel_case() {
        let item = ListItem {
            id: RecordId(4),
            title: "Sunset".into(),
            primary_ordinal: 2,
            thumbnail_url: None,
        };
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({"id": 4, "title": "Sunset", "primaryOrdinal": 2, "thumbnailUrl": null})
        );
    }

    #[test]
    fn error_response_carries_code() {
        let response = OrdinalResponse::from_error(&DaemonError::Permission("no token".into()));
        assert!(!response.ok);
        assert_eq!(response.code, 403);
        let err = response_into_data(response).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn missing_socket_is_not_running() {
        let home = tempfile::TempDir::new().unwrap();
        let err = send_request(home.path(), &OrdinalRequest::new("status")).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }
}
