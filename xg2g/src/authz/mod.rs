//! Scope-based authorization (C3): a static `operationID → required scopes`
//! table, and the middleware that enforces it against the [`Principal`]
//! attached by C2.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};

use crate::auth::Principal;
use crate::errors::AppError;

/// Attached to a route by the router (C12) before dispatch; identifies which
/// operation is being invoked so this middleware knows which scopes to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(pub &'static str);

#[derive(Debug, Clone)]
pub struct ScopePolicy {
    required: HashMap<&'static str, Vec<&'static str>>,
}

#[derive(Debug, thiserror::Error)]
#[error("operation {0} has no scope policy entry")]
pub struct UnmappedOperation(pub &'static str);

impl ScopePolicy {
    /// Builds the policy, failing construction if any operation the router
    /// registers has no scope entry (§4.2, §4.10: "fail the router's
    /// construction, not silently permissive").
    pub fn build(
        entries: &[(&'static str, &[&'static str])],
        registered_operations: &[&'static str],
    ) -> Result<Self, Vec<UnmappedOperation>> {
        let required: HashMap<&'static str, Vec<&'static str>> = entries
            .iter()
            .map(|(op, scopes)| (*op, scopes.to_vec()))
            .collect();

        let missing: Vec<UnmappedOperation> = registered_operations
            .iter()
            .filter(|op| !required.contains_key(*op))
            .map(|op| UnmappedOperation(op))
            .collect();

        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(Self { required })
    }

    pub fn required_scopes(&self, operation: &str) -> Option<&[&'static str]> {
        self.required.get(operation).map(Vec::as_slice)
    }
}

/// The canonical operation table (§4.2's examples plus the rest of §6's
/// endpoint list).
pub fn default_policy_entries() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        ("CreateAuthSession", &["v3:write"]),
        ("CreateIntent", &["v3:write"]),
        ("GetStreams", &["v3:read"]),
        ("GetSession", &["v3:read"]),
        ("StopSession", &["v3:write"]),
        ("GetPlaybackInfo", &["v3:read"]),
        ("GetLiveStreamInfo", &["v3:write"]),
        ("ServeHlsArtifact", &["v3:read"]),
        ("GetRecordingPlaylist", &["v3:read"]),
        ("ServeRecordingArtifact", &["v3:read"]),
        ("GetSystemInfo", &["v3:read"]),
        ("SessionsDebug", &["v3:admin"]),
    ]
}

pub async fn scope_middleware(
    policy: Arc<ScopePolicy>,
    request: Request,
    next: Next,
) -> Response {
    let Some(operation) = request.extensions().get::<OperationId>().copied() else {
        return AppError::internal(anyhow::anyhow!("route missing OperationId extension")).respond(&request);
    };

    let Some(required) = policy.required_scopes(operation.0) else {
        return AppError::internal(anyhow::anyhow!(
            "operation {} has no scope policy entry",
            operation.0
        ))
        .respond(&request);
    };

    let Some(principal) = request.extensions().get::<Principal>().cloned() else {
        return AppError::internal(anyhow::anyhow!("route missing Principal extension")).respond(&request);
    };

    let has_all = required.iter().all(|s| principal.has_scope(s));
    if !has_all {
        return AppError::Forbidden {
            code: "INSUFFICIENT_SCOPE",
            detail: format!("requires scopes: {}", required.join(", ")),
        }
        .respond(&request);
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_fails_on_unmapped_operation() {
        let entries = vec![("CreateIntent", &["v3:write"][..])];
        let result = ScopePolicy::build(&entries, &["CreateIntent", "GetStreams"]);
        assert!(result.is_err());
        let missing = result.unwrap_err();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, "GetStreams");
    }

    #[test]
    fn build_succeeds_when_every_operation_is_mapped() {
        let entries = vec![("CreateIntent", &["v3:write"][..])];
        let policy = ScopePolicy::build(&entries, &["CreateIntent"]).unwrap();
        assert_eq!(policy.required_scopes("CreateIntent"), Some(&["v3:write"][..]));
    }

    #[test]
    fn default_policy_covers_itself() {
        let entries = default_policy_entries();
        let ops: Vec<&'static str> = entries.iter().map(|(op, _)| *op).collect();
        assert!(ScopePolicy::build(&entries, &ops).is_ok());
    }
}
