//! Single-fetch data layer for Armature.
//!
//! Serves one data request for a whole route hierarchy: every matched route
//! handler runs concurrently, each one declares its status and headers on
//! its own response stub, the stubs are merged into a single response, and
//! the results stream back as newline-delimited JSON with deferred values
//! settling on later lines.
//!
//! # Features
//!
//! - **Response stubs** - per-handler status and header intents with an
//!   operation log
//! - **Deterministic merging** - one status and one header set from every stub
//! - **In-band redirects** - redirects never surface as a real 3xx
//! - **Streaming results** - deferred values with a bounded wait
//! - **Error redaction** - messages and stacks stay on the server in
//!   production
//!
//! # Example
//!
//! ```no_run
//! use armature_core::HttpRequest;
//! use armature_single_fetch::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<()> {
//! let routes = |_req: &HttpRequest| {
//!     Ok::<_, armature_core::Error>(
//!         MatchSet::new(vec![
//!             RouteMatch::new("root").with_handler(|args: LoaderArgs| async move {
//!                 args.response.set_status(200);
//!                 Ok(Payload::from("layout"))
//!             }),
//!             RouteMatch::new("routes/feed").with_handler(|_args| async {
//!                 Ok(DeferredData::new()
//!                     .value("title", "Feed")
//!                     .pending("items", async { Ok(Payload::Json(serde_json::json!([1, 2, 3]))) })
//!                     .into())
//!             }),
//!         ])
//!     )
//! };
//!
//! let handler = SingleFetchHandler::new(routes, SingleFetchConfig::from_env()?);
//! let response = handler
//!     .handle(HttpRequest::new("GET", "/feed.data"), CancellationToken::new())
//!     .await;
//! assert_eq!(response.status, 200);
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod encode;
pub mod error;
pub mod merge;
pub mod payload;
pub mod pipeline;
pub mod redirect;
pub mod router;
pub mod sanitize;
pub mod strategy;
pub mod stub;

pub use config::{ServerMode, SingleFetchConfig, DEFAULT_ROUTES_PARAM, DEFAULT_STREAM_TIMEOUT};
pub use encode::{StreamEncoder, TypePlugin};
pub use error::{Result, SingleFetchError};
pub use merge::{merge_response_stubs, MergeScope, MergedResponse};
pub use payload::{
    DeferredData, HandlerResult, Payload, PendingValue, ResponseInit, RouteErrorResponse,
    ThrownError,
};
pub use pipeline::{RouteResult, SingleFetchHandler, SingleFetchOutcome, SingleFetchResult};
pub use redirect::{RedirectResult, SINGLE_FETCH_REDIRECT_STATUS};
pub use router::{HandlerFn, LoaderArgs, MatchSet, RouteMatch, RouteSource, RouterContext};
pub use sanitize::ErrorReporter;
pub use strategy::{DataStrategy, RouteOutcome};
pub use stub::{HeaderOperation, HeaderOperationKind, ResponseStub, ResponseStubs, StubHeaders, StubKey};

/// Prelude for common imports.
///
/// ```
/// use armature_single_fetch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ServerMode, SingleFetchConfig};
    pub use crate::encode::TypePlugin;
    pub use crate::error::{Result, SingleFetchError};
    pub use crate::payload::{DeferredData, Payload, ResponseInit, RouteErrorResponse, ThrownError};
    pub use crate::pipeline::{SingleFetchHandler, SingleFetchResult};
    pub use crate::redirect::RedirectResult;
    pub use crate::router::{LoaderArgs, MatchSet, RouteMatch, RouteSource};
    pub use crate::stub::{ResponseStub, StubKey};
}
