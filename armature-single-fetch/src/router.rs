//! Route matching collaborator.
//!
//! The data layer does not match URLs itself. A [`RouteSource`] turns a
//! request into a [`MatchSet`]: the matched route segments in top-down order,
//! each with its handler, plus the index of the mutation handler if the
//! deepest route has one.
//!
//! ```rust
//! use armature_core::HttpRequest;
//! use armature_single_fetch::payload::Payload;
//! use armature_single_fetch::router::{MatchSet, RouteMatch, RouteSource};
//!
//! let routes = |_req: &HttpRequest| {
//!     Ok::<_, armature_core::Error>(MatchSet::new(vec![
//!         RouteMatch::new("root").with_handler(|_args| async { Ok(Payload::from("layout")) }),
//!         RouteMatch::new("routes/users.$id").param("id", "7"),
//!     ]))
//! };
//!
//! let set = routes.match_request(&HttpRequest::new("GET", "/users/7")).unwrap();
//! assert_eq!(set.route_ids(), vec!["root", "routes/users.$id"]);
//! ```

use crate::payload::{HandlerResult, Payload, SettleFuture};
use crate::strategy::RouteOutcome;
use crate::stub::ResponseStub;
use armature_core::{HttpRequest, HttpResponse};
use futures_util::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What every handler receives.
#[derive(Debug, Clone)]
pub struct LoaderArgs {
    pub request: HttpRequest,
    pub params: HashMap<String, String>,
    /// This handler's own response stub
    pub response: ResponseStub,
    /// Cancelled when the client goes away
    pub signal: CancellationToken,
}

impl LoaderArgs {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// A type-erased route handler.
pub type HandlerFn = Arc<dyn Fn(LoaderArgs) -> SettleFuture + Send + Sync>;

/// One matched route segment.
#[derive(Clone)]
pub struct RouteMatch {
    pub route_id: String,
    pub params: HashMap<String, String>,
    pub handler: Option<HandlerFn>,
    /// Cleared by the router when the segment's data is known to be fresh
    pub should_load: bool,
}

impl RouteMatch {
    pub fn new(route_id: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            params: HashMap::new(),
            handler: None,
            should_load: true,
        }
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(LoaderArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |args: LoaderArgs| handler(args).boxed()));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn should_load(mut self, should_load: bool) -> Self {
        self.should_load = should_load;
        self
    }

    /// Run the handler; a route without one resolves to `null`.
    pub async fn resolve(&self, args: LoaderArgs) -> HandlerResult {
        match &self.handler {
            Some(handler) => handler(args).await,
            None => Ok(Payload::null()),
        }
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("route_id", &self.route_id)
            .field("params", &self.params)
            .field("has_handler", &self.handler.is_some())
            .field("should_load", &self.should_load)
            .finish()
    }
}

/// The routes matched for one request.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    /// Top-down, root first
    pub matches: Vec<RouteMatch>,
    /// Position of the route whose mutation handler serves non-read requests
    pub action_index: Option<usize>,
    /// Status the router decided on by itself (e.g. 404 for no match)
    pub status_code: Option<u16>,
}

impl MatchSet {
    pub fn new(matches: Vec<RouteMatch>) -> Self {
        Self {
            matches,
            action_index: None,
            status_code: None,
        }
    }

    /// Mark the deepest match as the mutation handler.
    pub fn with_action(mut self) -> Self {
        self.action_index = self.matches.len().checked_sub(1);
        self
    }

    pub fn with_action_index(mut self, index: usize) -> Self {
        self.action_index = Some(index);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn route_ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.route_id.as_str()).collect()
    }

    pub fn action(&self) -> Option<&RouteMatch> {
        self.action_index.and_then(|i| self.matches.get(i))
    }
}

/// Resolves requests to matched routes.
pub trait RouteSource: Send + Sync {
    fn match_request(&self, request: &HttpRequest) -> Result<MatchSet, armature_core::Error>;
}

impl<F> RouteSource for F
where
    F: Fn(&HttpRequest) -> Result<MatchSet, armature_core::Error> + Send + Sync,
{
    fn match_request(&self, request: &HttpRequest) -> Result<MatchSet, armature_core::Error> {
        self(request)
    }
}

/// Router state after one wave of handlers.
#[derive(Debug, Clone, Default)]
pub struct RouterContext {
    /// Matched route ids, top-down
    pub matches: Vec<String>,
    pub loader_data: BTreeMap<String, Payload>,
    /// The mutation handler's data, keyed by its route id
    pub action_data: Option<(String, Payload)>,
    /// Route errors in match order
    pub errors: Vec<(String, Payload)>,
    /// First redirect produced by any handler
    pub redirect: Option<HttpResponse>,
    pub status_code: u16,
}

impl RouterContext {
    /// Fold handler outcomes into router state.
    ///
    /// The status is the router's own status if it set one, otherwise the
    /// status of the first error (500 for errors without one), otherwise 200.
    pub fn from_outcomes(
        match_set: &MatchSet,
        outcomes: &[(String, RouteOutcome)],
        is_mutation: bool,
    ) -> Self {
        let action_id = if is_mutation {
            match_set.action().map(|m| m.route_id.as_str())
        } else {
            None
        };

        let mut context = RouterContext {
            matches: match_set.matches.iter().map(|m| m.route_id.clone()).collect(),
            ..Default::default()
        };

        for (route_id, outcome) in outcomes {
            match outcome {
                RouteOutcome::Data(data) if action_id == Some(route_id.as_str()) => {
                    context.action_data = Some((route_id.clone(), data.clone()));
                }
                RouteOutcome::Data(data) => {
                    context.loader_data.insert(route_id.clone(), data.clone());
                }
                RouteOutcome::Error(error) => context.errors.push((route_id.clone(), error.clone())),
                RouteOutcome::Redirect(response) => {
                    if context.redirect.is_none() {
                        context.redirect = Some(response.clone());
                    }
                }
                RouteOutcome::Skipped => {}
            }
        }

        context.status_code = match_set
            .status_code
            .or_else(|| context.errors.first().map(|(_, error)| error_status(error)))
            .unwrap_or(200);
        context
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// HTTP status implied by a thrown value.
pub fn error_status(error: &Payload) -> u16 {
    match error {
        Payload::ErrorResponse(response) => response.status,
        Payload::Stub(stub) => stub.status().unwrap_or(500),
        _ => 500,
    }
}
