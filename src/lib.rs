// Armature - single-fetch data layer
//
// This library bundles the HTTP primitives of armature-core with the
// single-fetch pipeline: concurrent route handlers, merged response stubs,
// and streamed results with deferred values.

// Re-export core functionality
pub use armature_core::*;

// Re-export the data layer
pub use armature_single_fetch;
pub use armature_single_fetch::{
    DeferredData, LoaderArgs, MatchSet, Payload, RedirectResult, RouteMatch, RouteSource,
    ServerMode, SingleFetchConfig, SingleFetchError, SingleFetchHandler, SingleFetchResult,
    ThrownError, TypePlugin,
};

// Cancellation signal handed to handlers and the encoder
pub use tokio_util::sync::CancellationToken;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        CancellationToken,
        DeferredData,
        Error,
        HeaderMap,
        HttpRequest,
        HttpResponse,
        LoaderArgs,
        MatchSet,
        Payload,
        RedirectResult,
        RouteMatch,
        RouteSource,
        ServerMode,
        SingleFetchConfig,
        SingleFetchError,
        SingleFetchHandler,
        SingleFetchResult,
        StreamingResponse,
        ThrownError,
        TypePlugin,
    };
}
