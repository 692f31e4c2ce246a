//! Collapsing every handler's stub into one status and one header set.

use crate::error::{Result, SingleFetchError};
use crate::stub::{ResponseStub, ResponseStubs, StubKey};
use armature_core::HeaderMap;
use tracing::debug;

/// Which stubs take part in a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeScope {
    /// The action stub followed by every route stub, top-down
    ActionAndRoutes,
    /// Only the action stub
    ActionOnly,
}

/// Final status and headers for the outgoing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedResponse {
    pub status: u16,
    pub headers: HeaderMap,
}

/// Merge the stubs of one request.
///
/// The first stub that declares a status sets the running status. A later
/// declared status replaces it only while the running status is below 300
/// and it differs from the action's own status, so a mutation's status
/// sticks unless a route declares an error or redirect. With no declared
/// status at all, `fallback` (the router's status) is used, else 200.
///
/// Headers are rebuilt by replaying every stub's operation log, in stub
/// order, against one empty map.
pub fn merge_response_stubs(
    stubs: &ResponseStubs,
    route_ids: &[String],
    scope: MergeScope,
    fallback: Option<u16>,
) -> Result<MergedResponse> {
    let action_stub = stubs.peek(&StubKey::Action);
    let action_status = action_stub.as_ref().and_then(ResponseStub::status);

    let mut ordered: Vec<ResponseStub> = action_stub.into_iter().collect();
    if scope == MergeScope::ActionAndRoutes {
        ordered.extend(
            route_ids
                .iter()
                .filter_map(|id| stubs.peek(&StubKey::route(id.as_str()))),
        );
    }

    let mut status: Option<u16> = None;
    let mut headers = HeaderMap::new();

    for stub in &ordered {
        match (status, stub.status()) {
            (None, Some(declared)) => status = Some(declared),
            (Some(running), Some(declared)) if running < 300 && Some(declared) != action_status => {
                status = Some(declared);
            }
            _ => {}
        }

        for operation in stub.operations() {
            operation
                .apply(&mut headers)
                .map_err(|e| SingleFetchError::Merge(e.to_string()))?;
        }
    }

    let status = status.or(fallback).unwrap_or(200);
    debug!(status, headers = headers.len(), stubs = ordered.len(), "merged response stubs");

    Ok(MergedResponse { status, headers })
}
