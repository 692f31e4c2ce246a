//! The single-fetch request pipeline.
//!
//! One data request in, one merged status, one header set and one streamed
//! result body out:
//!
//! 1. match the request to routes,
//! 2. run the matched handlers concurrently with fresh response stubs,
//! 3. merge the stubs into a status and headers,
//! 4. shape the results (redirects, errors, sanitization),
//! 5. stream the results with [`StreamEncoder`].

use crate::classify::is_redirect_status_code;
use crate::config::SingleFetchConfig;
use crate::encode::{StreamEncoder, TypePlugin};
use crate::error::Result;
use crate::merge::{merge_response_stubs, MergeScope, MergedResponse};
use crate::payload::{Payload, ThrownError};
use crate::redirect::{RedirectResult, SINGLE_FETCH_REDIRECT_STATUS};
use crate::router::{RouteSource, RouterContext};
use crate::sanitize::{
    default_reporter, materialize_stub_error, sanitize_error, should_report, ErrorReporter,
};
use crate::strategy::{DataStrategy, RouteOutcome};
use crate::stub::ResponseStubs;
use armature_core::{HeaderMap, HttpRequest, StreamingResponse};
use std::collections::{BTreeMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Marks responses produced by the data layer.
pub const RESPONSE_MARKER_HEADER: &str = "X-Remix-Response";

/// One route's result.
#[derive(Debug, Clone)]
pub enum RouteResult {
    Data(Payload),
    Error(Payload),
}

impl RouteResult {
    /// `{"data": v}` or `{"error": v}`.
    pub fn into_payload(self) -> Payload {
        match self {
            RouteResult::Data(data) => Payload::map([("data", data)]),
            RouteResult::Error(error) => Payload::map([("error", error)]),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RouteResult::Error(_))
    }
}

/// The logical result of a data request.
#[derive(Debug, Clone)]
pub enum SingleFetchResult {
    /// Read requests: route id to result
    Routes(BTreeMap<String, RouteResult>),
    /// Mutation requests and internal failures
    Single(RouteResult),
    Redirect(RedirectResult),
}

impl SingleFetchResult {
    /// The root value written on the first line of the stream.
    pub fn into_payload(self) -> Payload {
        match self {
            SingleFetchResult::Routes(routes) => Payload::Map(
                routes
                    .into_iter()
                    .map(|(id, result)| (id, result.into_payload()))
                    .collect(),
            ),
            SingleFetchResult::Single(result) => result.into_payload(),
            SingleFetchResult::Redirect(redirect) => Payload::Redirect(redirect),
        }
    }
}

/// Result, status and headers of one data request.
#[derive(Debug, Clone)]
pub struct SingleFetchOutcome {
    pub result: SingleFetchResult,
    pub headers: HeaderMap,
    pub status: u16,
}

/// Serves data requests for a set of routes.
///
/// ```rust,no_run
/// use armature_core::HttpRequest;
/// use armature_single_fetch::config::SingleFetchConfig;
/// use armature_single_fetch::payload::Payload;
/// use armature_single_fetch::pipeline::SingleFetchHandler;
/// use armature_single_fetch::router::{MatchSet, RouteMatch};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn serve() {
/// let routes = |_req: &HttpRequest| {
///     Ok::<_, armature_core::Error>(MatchSet::new(vec![
///         RouteMatch::new("root").with_handler(|_args| async { Ok(Payload::from("hello")) }),
///     ]))
/// };
/// let handler = SingleFetchHandler::new(routes, SingleFetchConfig::from_env().unwrap_or_default());
///
/// let response = handler
///     .handle(HttpRequest::new("GET", "/_root.data"), CancellationToken::new())
///     .await;
/// let buffered = response.into_buffered().await;
/// assert_eq!(buffered.status, 200);
/// # }
/// ```
pub struct SingleFetchHandler<R> {
    routes: R,
    config: SingleFetchConfig,
    reporter: ErrorReporter,
    encoder: StreamEncoder,
}

impl<R: RouteSource> SingleFetchHandler<R> {
    pub fn new(routes: R, config: SingleFetchConfig) -> Self {
        let encoder = StreamEncoder::new(&config);
        Self {
            routes,
            config,
            reporter: default_reporter(),
            encoder,
        }
    }

    /// Replace the default `tracing` reporter.
    pub fn with_error_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Register a custom value encoding.
    pub fn with_plugin(mut self, plugin: TypePlugin) -> Self {
        self.encoder = self.encoder.with_plugin(plugin);
        self
    }

    pub fn config(&self) -> &SingleFetchConfig {
        &self.config
    }

    /// Serve a data request, dispatching on the method.
    pub async fn handle(&self, request: HttpRequest, signal: CancellationToken) -> StreamingResponse {
        let outcome = if request.is_mutation() {
            self.action(&request, signal.clone()).await
        } else {
            self.loaders(&request, signal.clone()).await
        };
        self.respond(outcome, signal)
    }

    /// Like [`handle`](Self::handle) for a raw method and request target.
    pub async fn handle_uri(
        &self,
        method: &str,
        uri: &str,
        signal: CancellationToken,
    ) -> StreamingResponse {
        match HttpRequest::from_uri(method, uri) {
            Ok(request) => self.handle(request, signal).await,
            Err(err) => {
                let outcome = self.internal_error(err.into());
                self.respond(outcome, signal)
            }
        }
    }

    /// Run every read handler of the request.
    pub async fn loaders(&self, request: &HttpRequest, signal: CancellationToken) -> SingleFetchOutcome {
        match self.run_loaders(request, signal).await {
            Ok(outcome) => outcome,
            Err(err) => self.internal_error(err),
        }
    }

    /// Run the mutation handler of the request.
    ///
    /// Called with a read request, no handler runs and only the action's
    /// stub contributes to the response.
    pub async fn action(&self, request: &HttpRequest, signal: CancellationToken) -> SingleFetchOutcome {
        match self.run_action(request, signal).await {
            Ok(outcome) => outcome,
            Err(err) => self.internal_error(err),
        }
    }

    async fn run_loaders(
        &self,
        request: &HttpRequest,
        signal: CancellationToken,
    ) -> Result<SingleFetchOutcome> {
        let match_set = self.routes.match_request(request)?;
        let stubs = ResponseStubs::new();

        let load_route_ids: Option<HashSet<String>> = request
            .query(&self.config.routes_param)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect()
            });

        let mut strategy = DataStrategy::new(&stubs);
        if let Some(ids) = &load_route_ids {
            strategy = strategy.load_only(ids);
        }
        let outcomes = strategy.run(request, &match_set, signal).await;
        let context = RouterContext::from_outcomes(&match_set, &outcomes, false);

        let merged = merge_response_stubs(
            &stubs,
            &context.matches,
            MergeScope::ActionAndRoutes,
            Some(context.status_code),
        )?;

        if let Some(redirect) = redirect_result(&context, &merged) {
            return Ok(redirect_outcome(redirect, merged.headers));
        }

        self.report(&context);

        let routes = outcomes
            .into_iter()
            .filter_map(|(id, outcome)| self.route_result(outcome).map(|result| (id, result)))
            .collect();

        debug!(path = %request.path, status = merged.status, "loaders complete");
        Ok(SingleFetchOutcome {
            result: SingleFetchResult::Routes(routes),
            headers: merged.headers,
            status: merged.status,
        })
    }

    async fn run_action(
        &self,
        request: &HttpRequest,
        signal: CancellationToken,
    ) -> Result<SingleFetchOutcome> {
        let match_set = self.routes.match_request(request)?;
        let stubs = ResponseStubs::new();
        let is_action_data_request = request.is_read();

        let outcomes = DataStrategy::new(&stubs)
            .action_data_request(is_action_data_request)
            .run(request, &match_set, signal)
            .await;
        let context = RouterContext::from_outcomes(&match_set, &outcomes, !is_action_data_request);

        let merged = merge_response_stubs(
            &stubs,
            &context.matches,
            MergeScope::ActionOnly,
            Some(context.status_code),
        )?;

        if let Some(redirect) = redirect_result(&context, &merged) {
            return Ok(redirect_outcome(redirect, merged.headers));
        }

        self.report(&context);

        let action_id = match_set.action().map(|m| m.route_id.as_str());
        let chosen = outcomes
            .iter()
            .position(|(id, outcome)| Some(id.as_str()) == action_id && !outcome.is_skipped())
            .or_else(|| {
                outcomes
                    .iter()
                    .position(|(_, o)| matches!(o, RouteOutcome::Data(_) | RouteOutcome::Error(_)))
            });

        let result = chosen
            .and_then(|index| outcomes.into_iter().nth(index))
            .and_then(|(_, outcome)| self.route_result(outcome))
            .unwrap_or(RouteResult::Data(Payload::null()));

        debug!(path = %request.path, status = merged.status, "action complete");
        Ok(SingleFetchOutcome {
            result: SingleFetchResult::Single(result),
            headers: merged.headers,
            status: merged.status,
        })
    }

    fn route_result(&self, outcome: RouteOutcome) -> Option<RouteResult> {
        match outcome {
            RouteOutcome::Data(data) => Some(RouteResult::Data(data)),
            RouteOutcome::Error(error) => Some(RouteResult::Error(sanitize_error(
                &materialize_stub_error(error),
                self.config.server_mode,
            ))),
            RouteOutcome::Redirect(_) | RouteOutcome::Skipped => None,
        }
    }

    fn report(&self, context: &RouterContext) {
        for (_, error) in &context.errors {
            if should_report(error) {
                (self.reporter)(error);
            }
        }
    }

    /// Failures outside of any handler: reported once, answered with a
    /// sanitized 500 and no stub headers.
    fn internal_error(&self, err: crate::SingleFetchError) -> SingleFetchOutcome {
        let error = Payload::Error(ThrownError::from_error(&err));
        (self.reporter)(&error);
        SingleFetchOutcome {
            result: SingleFetchResult::Single(RouteResult::Error(sanitize_error(
                &error,
                self.config.server_mode,
            ))),
            headers: HeaderMap::new(),
            status: 500,
        }
    }

    fn respond(&self, outcome: SingleFetchOutcome, signal: CancellationToken) -> StreamingResponse {
        let body = self.encoder.encode(outcome.result.into_payload(), signal);
        StreamingResponse::ndjson(body)
            .status(outcome.status)
            .headers(outcome.headers)
            .header(RESPONSE_MARKER_HEADER, "yes")
    }
}

/// A handler redirect wins; otherwise a merged redirect status with a
/// `Location` turns the whole result into a redirect.
fn redirect_result(context: &RouterContext, merged: &MergedResponse) -> Option<RedirectResult> {
    let (status, location) = match &context.redirect {
        Some(response) => (response.status, response.headers.location()),
        None if is_redirect_status_code(merged.status) => (merged.status, merged.headers.location()),
        None => return None,
    };
    let redirect = RedirectResult::new(location?, status).with_hints(&merged.headers);
    debug!(location = %redirect.redirect, status, "responding with redirect result");
    Some(redirect)
}

fn redirect_outcome(redirect: RedirectResult, headers: HeaderMap) -> SingleFetchOutcome {
    SingleFetchOutcome {
        result: SingleFetchResult::Redirect(redirect),
        headers,
        status: SINGLE_FETCH_REDIRECT_STATUS,
    }
}
