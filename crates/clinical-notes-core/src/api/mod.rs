//! JSON request surface.
//!
//! [`dispatch`] takes a transport-neutral request, authenticates the bearer
//! token, applies the per-user rate limit, routes, and wraps the outcome in
//! the response envelope:
//!
//! ```text
//! { "success": true,  "data": ... }
//! { "success": false, "error": "...", "errorCode": "...", "details": ... }
//! ```

pub mod auth;
mod rate_limit;
mod routes;

pub use rate_limit::RateLimiter;
pub use routes::{Method, Route};

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::db::NoteFilter;
use crate::engine::NotesEngine;
use crate::error::{NotesError, NotesResult};
use crate::lock::UnlockResponse;
use crate::models::{AuditAction, AuditQuery, NewNote, NotePatch, NoteStatus, NoteType};
use crate::validation::{self, FieldError};
use crate::workflow::{RevisionRequest, SignatureInput};

/// A request as received from the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Decoded query parameters
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }
}

/// Response handed back to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// JSON envelope, or CSV text for exports
    pub body: String,
}

impl ApiResponse {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string(),
        }
    }

    fn ok(status: u16, data: Value) -> Self {
        Self::json(status, json!({ "success": true, "data": data }))
    }

    fn csv(text: String) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".into(), "text/csv".into()),
                (
                    "Content-Disposition".into(),
                    "attachment; filename=\"audit-log.csv\"".into(),
                ),
            ],
            body: text,
        }
    }

    fn error(err: &NotesError) -> Self {
        let mut body = json!({
            "success": false,
            "error": err.public_message(),
            "errorCode": err.error_code(),
        });
        if let Some(details) = err.details() {
            body["details"] = details;
        }
        let mut response = Self::json(err.status_code(), body);
        if let NotesError::RateLimited { retry_after_secs } = err {
            response
                .headers
                .push(("Retry-After".into(), retry_after_secs.to_string()));
        }
        response
    }

    /// Parsed JSON body. CSV bodies come back as a JSON string.
    pub fn envelope(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Handle one request end to end.
pub fn dispatch(engine: &NotesEngine, request: ApiRequest) -> ApiResponse {
    let method = request.method.clone();
    let path = request.path.clone();

    match handle(engine, request) {
        Ok(response) => response,
        Err(err) => {
            if err.status_code() >= 500 {
                tracing::error!(%method, %path, error = %err, "Request failed");
            } else {
                tracing::debug!(%method, %path, code = err.error_code(), "Request rejected");
            }
            ApiResponse::error(&err)
        }
    }
}

fn handle(engine: &NotesEngine, request: ApiRequest) -> NotesResult<ApiResponse> {
    let actor = engine.authenticate(request.bearer_token.as_deref())?;
    engine.check_rate(&actor)?;

    let route = Method::parse(&request.method)
        .and_then(|m| Route::parse(m, &request.path))
        .ok_or_else(|| NotesError::not_found("Route"))?;
    let body = request.body.unwrap_or_else(|| Value::Object(Map::new()));
    let query = request.query;

    let data = match route {
        Route::CreateNote => {
            let created = engine.create_note(&actor, new_note(body)?)?;
            return Ok(ApiResponse::ok(201, to_json(&created)?));
        }
        Route::ListNotes => to_json(&engine.list_notes(&actor, note_filter(&query)?)?)?,
        Route::ValidateNote => {
            let note_type = parse_note_type(body.get("noteType"))?;
            let data = body.get("data").cloned().unwrap_or_else(|| json!({}));
            to_json(&validation::validate(note_type, &data))?
        }
        Route::ValidationRules(t) => {
            let note_type = parse_note_type(Some(&Value::String(t.replace(['-', '_'], " "))))?;
            json!({ "noteType": note_type, "rules": validation::rules_for(note_type) })
        }
        Route::ValidationSummary(t) => {
            let note_type = parse_note_type(Some(&Value::String(t.replace(['-', '_'], " "))))?;
            to_json(&validation::summary(note_type))?
        }
        Route::Dashboard => to_json(&engine.compliance_dashboard(&actor)?)?,
        Route::GetNote(id) => to_json(&engine.view_note(&actor, &id)?)?,
        Route::EditNote(id) => {
            let version = version(&body, &query)?;
            let patch: NotePatch = parse(body)?;
            to_json(&engine.edit_note(&actor, &id, version, patch)?)?
        }
        Route::DeleteNote(id) => {
            engine.delete_note(&actor, &id, version(&body, &query)?)?;
            json!({ "deleted": true, "id": id })
        }
        Route::SignNote(id) => {
            let version = version(&body, &query)?;
            let credential: SignatureInput = parse(body)?;
            to_json(&engine.sign_note(&actor, &id, version, &credential)?)?
        }
        Route::CosignNote(id) => {
            let version = version(&body, &query)?;
            let comments = text(&body, "comments");
            let credential: SignatureInput = parse(body)?;
            to_json(&engine.cosign_note(&actor, &id, version, &credential, comments)?)?
        }
        Route::ReturnNote(id) => {
            let version = version(&body, &query)?;
            let request: RevisionRequest = parse(body)?;
            to_json(&engine.return_for_revision(&actor, &id, version, request)?)?
        }
        Route::ResubmitNote(id) => {
            to_json(&engine.resubmit_note(&actor, &id, version(&body, &query)?)?)?
        }
        Route::AmendNote(id) => {
            let version = version(&body, &query)?;
            let reason = text(&body, "reason").unwrap_or_default();
            let description = text(&body, "changeDescription").unwrap_or_default();
            let note = engine.amend_note(&actor, &id, version, &reason, &description)?;
            return Ok(ApiResponse::ok(201, to_json(&note)?));
        }
        Route::LockNote(id) => {
            let version = version(&body, &query)?;
            to_json(&engine.lock_note(&actor, &id, version, text(&body, "reason"))?)?
        }
        Route::RequestUnlock(id) => {
            let version = version(&body, &query)?;
            let reason = text(&body, "reason").unwrap_or_default();
            to_json(&engine.request_unlock(&actor, &id, version, &reason)?)?
        }
        Route::ApproveUnlock(id) => {
            let version = version(&body, &query)?;
            let duration_hours = match body.get("durationHours") {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    v.as_u64()
                        .and_then(|h| u32::try_from(h).ok())
                        .ok_or_else(|| invalid("durationHours", "durationHours must be a whole number of hours"))?,
                ),
            };
            let response = UnlockResponse::Approve { duration_hours };
            to_json(&engine.decide_unlock(&actor, &id, version, response)?)?
        }
        Route::DenyUnlock(id) => {
            let version = version(&body, &query)?;
            let reason = text(&body, "reason").unwrap_or_default();
            let response = UnlockResponse::Deny { reason };
            to_json(&engine.decide_unlock(&actor, &id, version, response)?)?
        }
        Route::QueryAudit => to_json(&engine.query_audit(&actor, audit_query(&query)?)?)?,
        Route::ExportAudit => {
            let csv = engine.export_audit_csv(&actor, audit_query(&query)?)?;
            return Ok(ApiResponse::csv(csv));
        }
        Route::VerifyAudit => to_json(&engine.verify_audit_chain(&actor)?)?,
        Route::ModifyAuditEntry(id) => {
            engine.modify_audit_entry(&actor, &id)?;
            Value::Null
        }
        Route::DeleteAuditEntry(id) => {
            engine.delete_audit_entry(&actor, &id)?;
            Value::Null
        }
        Route::LockSweep => to_json(&engine.run_lock_sweep_as(&actor)?)?,
        Route::Reminders => to_json(&engine.run_reminders_as(&actor)?)?,
    };

    Ok(ApiResponse::ok(200, data))
}

fn to_json<T: Serialize>(value: &T) -> NotesResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn invalid(field: &str, message: &str) -> NotesError {
    NotesError::validation(message, vec![FieldError::new(field, message)])
}

fn parse<T: DeserializeOwned>(body: Value) -> NotesResult<T> {
    serde_json::from_value(body)
        .map_err(|e| NotesError::validation(format!("Invalid request body: {e}"), Vec::new()))
}

fn text(body: &Value, field: &str) -> Option<String> {
    body.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Caller-supplied note version, from the body or the query string.
fn version(body: &Value, query: &HashMap<String, String>) -> NotesResult<i64> {
    let from_body = body.get("version").and_then(Value::as_i64);
    let from_query = query.get("version").and_then(|v| v.parse().ok());
    from_body
        .or(from_query)
        .ok_or_else(|| invalid("version", "version is required"))
}

fn parse_note_type(value: Option<&Value>) -> NotesResult<NoteType> {
    let name = value
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("noteType", "noteType is required"))?;
    name.parse::<NoteType>()
        .map_err(|e| invalid("noteType", &e.to_string()))
}

/// Create payload, with the note type resolved through the lenient parser.
fn new_note(mut body: Value) -> NotesResult<NewNote> {
    let note_type = match body.get("noteType") {
        None | Some(Value::Null) => None,
        value => Some(parse_note_type(value)?),
    };
    if let Value::Object(map) = &mut body {
        map.remove("noteType");
    }
    let mut input: NewNote = parse(body)?;
    input.note_type = note_type;
    Ok(input)
}

fn note_filter(query: &HashMap<String, String>) -> NotesResult<NoteFilter> {
    let statuses = query
        .get("status")
        .map(|s| {
            s.split(',')
                .map(|part| {
                    NoteStatus::parse(part.trim())
                        .ok_or_else(|| invalid("status", &format!("Unknown status '{}'", part.trim())))
                })
                .collect::<NotesResult<Vec<_>>>()
        })
        .transpose()?;
    let note_type = query
        .get("noteType")
        .map(|t| parse_note_type(Some(&Value::String(t.clone()))))
        .transpose()?;
    let is_locked = match query.get("isLocked").map(String::as_str) {
        None => None,
        Some("true") => Some(true),
        Some("false") => Some(false),
        Some(_) => return Err(invalid("isLocked", "isLocked must be true or false")),
    };

    Ok(NoteFilter {
        clinician_ids: query.get("clinicianId").map(|id| vec![id.clone()]),
        client_id: query.get("clientId").cloned(),
        note_type,
        statuses,
        is_locked,
    })
}

fn audit_query(query: &HashMap<String, String>) -> NotesResult<AuditQuery> {
    let action = query
        .get("action")
        .map(|a| {
            AuditAction::parse(a).ok_or_else(|| invalid("action", &format!("Unknown audit action '{a}'")))
        })
        .transpose()?;
    let timestamp = |key: &str| -> NotesResult<Option<chrono::DateTime<chrono::Utc>>> {
        query
            .get(key)
            .map(|v| {
                chrono::DateTime::parse_from_rfc3339(v)
                    .map(|t| t.with_timezone(&chrono::Utc))
                    .map_err(|_| invalid(key, &format!("{key} must be an RFC 3339 timestamp")))
            })
            .transpose()
    };

    Ok(AuditQuery {
        note_id: query.get("noteId").cloned(),
        user_id: query.get("userId").cloned(),
        action,
        start: timestamp("startDate")?,
        end: timestamp("endDate")?,
    })
}
