//! Request routing.

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PATCH" | "PUT" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

/// Every endpoint the engine serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    CreateNote,
    ListNotes,
    ValidateNote,
    ValidationRules(String),
    ValidationSummary(String),
    Dashboard,
    GetNote(String),
    EditNote(String),
    DeleteNote(String),
    SignNote(String),
    CosignNote(String),
    ReturnNote(String),
    ResubmitNote(String),
    AmendNote(String),
    LockNote(String),
    RequestUnlock(String),
    ApproveUnlock(String),
    DenyUnlock(String),
    QueryAudit,
    ExportAudit,
    VerifyAudit,
    ModifyAuditEntry(String),
    DeleteAuditEntry(String),
    LockSweep,
    Reminders,
}

impl Route {
    /// Match `method` and `path` (leading `/api` optional, no query string).
    pub fn parse(method: Method, path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        let path = path.strip_prefix("/api").unwrap_or(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        use Method::*;
        let route = match (method, segments.as_slice()) {
            (Post, ["clinical-notes"]) => Route::CreateNote,
            (Get, ["clinical-notes"]) => Route::ListNotes,
            (Post, ["clinical-notes", "validate"]) => Route::ValidateNote,
            (Get, ["clinical-notes", "validation-rules", t]) => Route::ValidationRules(t.to_string()),
            (Get, ["clinical-notes", "validation-summary", t]) => Route::ValidationSummary(t.to_string()),
            (Get, ["clinical-notes", "compliance", "dashboard"]) => Route::Dashboard,
            (Get, ["clinical-notes", n]) => Route::GetNote(n.to_string()),
            (Patch, ["clinical-notes", n]) => Route::EditNote(n.to_string()),
            (Delete, ["clinical-notes", n]) => Route::DeleteNote(n.to_string()),
            (Post, ["clinical-notes", n, "sign"]) => Route::SignNote(n.to_string()),
            (Post, ["clinical-notes", n, "cosign"]) => Route::CosignNote(n.to_string()),
            (Post, ["clinical-notes", n, "return-for-revision"]) => Route::ReturnNote(n.to_string()),
            (Post, ["clinical-notes", n, "resubmit"]) => Route::ResubmitNote(n.to_string()),
            (Post, ["clinical-notes", n, "amendments"]) => Route::AmendNote(n.to_string()),
            (Post, ["clinical-notes", n, "lock"]) => Route::LockNote(n.to_string()),
            (Post, ["unlock-requests", n, "request"]) => Route::RequestUnlock(n.to_string()),
            (Post, ["unlock-requests", n, "approve"]) => Route::ApproveUnlock(n.to_string()),
            (Post, ["unlock-requests", n, "deny"]) => Route::DenyUnlock(n.to_string()),
            (Get, ["audit-log"]) => Route::QueryAudit,
            (Get, ["audit-log", "export"]) => Route::ExportAudit,
            (Get, ["audit-log", "verify"]) => Route::VerifyAudit,
            (Patch, ["audit-log", e]) => Route::ModifyAuditEntry(e.to_string()),
            (Delete, ["audit-log", e]) => Route::DeleteAuditEntry(e.to_string()),
            (Post, ["admin", "lock-sweep"]) => Route::LockSweep,
            (Post, ["admin", "reminders"]) => Route::Reminders,
            _ => return None,
        };
        Some(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes() {
        assert_eq!(Route::parse(Method::Post, "/api/clinical-notes"), Some(Route::CreateNote));
        assert_eq!(
            Route::parse(Method::Post, "/clinical-notes/validate"),
            Some(Route::ValidateNote)
        );
        assert_eq!(
            Route::parse(Method::Get, "/clinical-notes/compliance/dashboard"),
            Some(Route::Dashboard)
        );
        assert_eq!(
            Route::parse(Method::Post, "/clinical-notes/n1/return-for-revision/"),
            Some(Route::ReturnNote("n1".into()))
        );
        assert_eq!(
            Route::parse(Method::Delete, "/audit-log/e1"),
            Some(Route::DeleteAuditEntry("e1".into()))
        );
        assert_eq!(Route::parse(Method::Get, "/audit-log/export"), Some(Route::ExportAudit));
        assert_eq!(Route::parse(Method::Delete, "/clinical-notes"), None);
        assert_eq!(Method::parse("put"), Some(Method::Patch));
    }
}
