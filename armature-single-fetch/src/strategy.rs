//! Handler invocation.
//!
//! [`DataStrategy`] runs every matched handler of a request concurrently,
//! gives each one its own response stub and folds raw responses back into
//! that stub. One failing or panicking handler never affects its siblings.

use crate::classify::is_redirect_response;
use crate::payload::{HandlerResult, Payload, RouteErrorResponse, ThrownError};
use crate::router::{LoaderArgs, MatchSet, RouteMatch};
use crate::stub::{ResponseStub, ResponseStubs, StubKey};
use armature_core::{HeaderMap, HttpRequest, HttpResponse, SET_COOKIE};
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The result of one route for one request.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    Data(Payload),
    Error(Payload),
    /// A returned or thrown redirect response
    Redirect(HttpResponse),
    /// The handler was not invoked
    Skipped,
}

impl RouteOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RouteOutcome::Skipped)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RouteOutcome::Error(_))
    }
}

/// Drives the handlers of one request.
pub struct DataStrategy<'a> {
    stubs: &'a ResponseStubs,
    load_route_ids: Option<&'a HashSet<String>>,
    is_action_data_request: bool,
}

impl<'a> DataStrategy<'a> {
    pub fn new(stubs: &'a ResponseStubs) -> Self {
        Self {
            stubs,
            load_route_ids: None,
            is_action_data_request: false,
        }
    }

    /// Only run read handlers for these routes.
    pub fn load_only(mut self, route_ids: &'a HashSet<String>) -> Self {
        self.load_route_ids = Some(route_ids);
        self
    }

    /// A read request made only to fetch a prior mutation's result; no
    /// handler runs.
    pub fn action_data_request(mut self, enabled: bool) -> Self {
        self.is_action_data_request = enabled;
        self
    }

    /// Run the matched handlers and return one outcome per match, in match
    /// order.
    pub async fn run(
        &self,
        request: &HttpRequest,
        match_set: &MatchSet,
        signal: CancellationToken,
    ) -> Vec<(String, RouteOutcome)> {
        if self.is_action_data_request {
            debug!(path = %request.path, "action data request, no handlers run");
            return skip_all(match_set);
        }

        let is_mutation = request.is_mutation();
        if is_mutation && match_set.action_index.is_none() {
            return missing_action(request, match_set);
        }

        let runs = match_set.matches.iter().enumerate().map(|(index, route)| {
            let signal = signal.clone();
            async move {
                let outcome = if is_mutation {
                    if match_set.action_index == Some(index) {
                        self.invoke(route, self.stubs.get(&StubKey::Action), request, signal)
                            .await
                    } else {
                        RouteOutcome::Skipped
                    }
                } else if !self.wants(route) {
                    debug!(route_id = %route.route_id, "skipping route handler");
                    RouteOutcome::Skipped
                } else {
                    let stub = self.stubs.get(&StubKey::route(route.route_id.as_str()));
                    self.invoke(route, stub, request, signal).await
                };
                (route.route_id.clone(), outcome)
            }
        });

        join_all(runs).await
    }

    fn wants(&self, route: &RouteMatch) -> bool {
        route.should_load
            && self
                .load_route_ids
                .map_or(true, |ids| ids.contains(&route.route_id))
    }

    async fn invoke(
        &self,
        route: &RouteMatch,
        stub: ResponseStub,
        request: &HttpRequest,
        signal: CancellationToken,
    ) -> RouteOutcome {
        let args = LoaderArgs {
            request: request.clone(),
            params: route.params.clone(),
            response: stub.clone(),
            signal,
        };

        let result = match AssertUnwindSafe(route.resolve(args)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                warn!(route_id = %route.route_id, "route handler panicked");
                Err(ThrownError::named("Panic", panic_message(panic.as_ref())).into())
            }
        };

        process_result(result, &stub, &route.route_id)
    }
}

fn skip_all(match_set: &MatchSet) -> Vec<(String, RouteOutcome)> {
    match_set
        .matches
        .iter()
        .map(|m| (m.route_id.clone(), RouteOutcome::Skipped))
        .collect()
}

/// A mutation against routes without a mutation handler: 405 on the
/// deepest match.
fn missing_action(request: &HttpRequest, match_set: &MatchSet) -> Vec<(String, RouteOutcome)> {
    let mut outcomes = skip_all(match_set);
    if let Some((route_id, outcome)) = outcomes.last_mut() {
        let error = ThrownError::new(format!(
            "You made a {} request to \"{}\" but did not provide an action for route \"{}\", so there is no way to handle the request.",
            request.method, request.path, route_id
        ));
        debug!(route_id = %route_id, method = %request.method, "no action for mutation request");
        *outcome = RouteOutcome::Error(RouteErrorResponse::internal(405, error).into());
    }
    outcomes
}

fn process_result(result: HandlerResult, stub: &ResponseStub, route_id: &str) -> RouteOutcome {
    match result {
        Ok(Payload::Response(response)) => {
            project_response(stub, Some(response.status), &response.headers);
            if is_redirect_response(&response) {
                debug!(route_id, status = response.status, "route returned a redirect");
                return RouteOutcome::Redirect(response);
            }
            match unwrap_body(&response) {
                Ok(data) => RouteOutcome::Data(data),
                Err(error) => RouteOutcome::Error(error),
            }
        }
        Ok(Payload::Deferred(deferred)) => {
            if let Some(init) = &deferred.init {
                project_response(stub, init.status, &init.headers);
            }
            RouteOutcome::Data(Payload::Deferred(deferred))
        }
        Ok(data) => RouteOutcome::Data(data),
        Err(Payload::Response(response)) => {
            project_response(stub, Some(response.status), &response.headers);
            if is_redirect_response(&response) {
                debug!(route_id, status = response.status, "route threw a redirect");
                return RouteOutcome::Redirect(response);
            }
            let data = unwrap_body(&response).unwrap_or_else(|error| error);
            RouteOutcome::Error(
                RouteErrorResponse::new(response.status, response.status_text(), data).into(),
            )
        }
        Err(error) => RouteOutcome::Error(error),
    }
}

/// Copy a raw response's status and headers into the handler's stub.
///
/// The status only lands if the handler has not declared one. Cookies are
/// appended, every other header replaces.
pub fn project_response(stub: &ResponseStub, status: Option<u16>, headers: &HeaderMap) {
    if let Some(status) = status {
        if stub.status().is_none() {
            stub.set_status(status);
        }
    }

    let target = stub.headers();
    for (name, value) in headers.iter() {
        let applied = if name.eq_ignore_ascii_case(SET_COOKIE) {
            target.append(name, value)
        } else {
            target.set(name, value)
        };
        if let Err(err) = applied {
            warn!(header = name, error = %err, "dropping invalid header from route response");
        }
    }
}

/// Decode a raw response body into route data.
fn unwrap_body(response: &HttpResponse) -> HandlerResult {
    if response.body.is_empty() {
        return Ok(Payload::null());
    }
    if response.is_json() {
        return serde_json::from_slice(&response.body)
            .map(Payload::Json)
            .map_err(|e| ThrownError::named("SyntaxError", e.to_string()).into());
    }
    Ok(Payload::from(
        String::from_utf8_lossy(&response.body).into_owned(),
    ))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "route handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{DeferredData, ResponseInit};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new("GET", path)
    }

    async fn explode(_args: LoaderArgs) -> HandlerResult {
        panic!("kaboom")
    }

    async fn run(stubs: &ResponseStubs, request: &HttpRequest, set: &MatchSet) -> Vec<(String, RouteOutcome)> {
        DataStrategy::new(stubs)
            .run(request, set, CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_handlers_get_own_stubs() {
        let set = MatchSet::new(vec![
            RouteMatch::new("root").with_handler(|args: LoaderArgs| async move {
                args.response.set_status(203);
                args.response.headers().set("X-Root", "1").unwrap();
                Ok(Payload::from("root"))
            }),
            RouteMatch::new("child").with_handler(|args: LoaderArgs| async move {
                assert!(args.response.status().is_none());
                Ok(Payload::from(args.param("id").unwrap_or("none").to_string()))
            })
            .param("id", "9"),
        ]);
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &get("/"), &set).await;

        assert_eq!(outcomes[0].0, "root");
        assert!(matches!(&outcomes[1].1, RouteOutcome::Data(Payload::Json(v)) if v == "9"));
        assert_eq!(stubs.get(&StubKey::route("root")).status(), Some(203));
        assert_eq!(stubs.get(&StubKey::route("child")).status(), None);
    }

    #[tokio::test]
    async fn test_partial_load_skips_unrequested_routes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let route = |id: &str| {
            let calls = Arc::clone(&calls);
            RouteMatch::new(id).with_handler(move |_args| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Payload::null()) }
            })
        };
        let set = MatchSet::new(vec![route("A"), route("B"), route("C")]);
        let only: HashSet<String> = ["B".to_string()].into_iter().collect();
        let stubs = ResponseStubs::new();

        let outcomes = DataStrategy::new(&stubs)
            .load_only(&only)
            .run(&get("/"), &set, CancellationToken::new())
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcomes[0].1.is_skipped());
        assert!(!outcomes[1].1.is_skipped());
        assert!(outcomes[2].1.is_skipped());
    }

    #[tokio::test]
    async fn test_action_data_request_runs_nothing() {
        let set = MatchSet::new(vec![RouteMatch::new("root").with_handler(explode)]);
        let stubs = ResponseStubs::new();
        let outcomes = DataStrategy::new(&stubs)
            .action_data_request(true)
            .run(&get("/"), &set, CancellationToken::new())
            .await;
        assert!(outcomes.iter().all(|(_, o)| o.is_skipped()));
    }

    #[tokio::test]
    async fn test_returned_response_is_projected() {
        let set = MatchSet::new(vec![RouteMatch::new("root").with_handler(|args: LoaderArgs| async move {
            args.response.set_status(201);
            let response = HttpResponse::json(&serde_json::json!({"n": 1}))
                .unwrap()
                .with_status(418)
                .with_header("Cache-Control", "no-store")
                .with_cookie("a=1")
                .with_cookie("b=2");
            Ok(response.into())
        })]);
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &get("/"), &set).await;

        let stub = stubs.get(&StubKey::route("root"));
        assert_eq!(stub.status(), Some(201));
        let headers = stub.headers().snapshot();
        assert_eq!(headers.get("Cache-Control"), Some("no-store"));
        assert_eq!(headers.get_set_cookie(), vec!["a=1", "b=2"]);
        assert!(matches!(&outcomes[0].1, RouteOutcome::Data(Payload::Json(v)) if v["n"] == 1));
    }

    #[tokio::test]
    async fn test_deferred_init_is_projected() {
        let set = MatchSet::new(vec![RouteMatch::new("root").with_handler(|_args| async {
            let headers = [("X-Deferred", "yes")].into_iter().collect();
            Ok(DeferredData::new()
                .value("now", serde_json::json!(1))
                .with_init(ResponseInit::new().status(206).headers(headers))
                .into())
        })]);
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &get("/"), &set).await;

        let stub = stubs.get(&StubKey::route("root"));
        assert_eq!(stub.status(), Some(206));
        assert_eq!(stub.headers().get("x-deferred").as_deref(), Some("yes"));
        assert!(matches!(&outcomes[0].1, RouteOutcome::Data(Payload::Deferred(_))));
    }

    #[tokio::test]
    async fn test_redirects_are_reported() {
        let set = MatchSet::new(vec![
            RouteMatch::new("a").with_handler(|_args| async { Ok(HttpResponse::redirect("/one").into()) }),
            RouteMatch::new("b").with_handler(|_args| async { Err(HttpResponse::redirect("/two").into()) }),
        ]);
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &get("/"), &set).await;

        assert!(matches!(&outcomes[0].1, RouteOutcome::Redirect(r) if r.headers.location() == Some("/one")));
        assert!(matches!(&outcomes[1].1, RouteOutcome::Redirect(r) if r.headers.location() == Some("/two")));
        assert_eq!(stubs.get(&StubKey::route("a")).status(), Some(302));
    }

    #[tokio::test]
    async fn test_thrown_response_becomes_error_response() {
        let set = MatchSet::new(vec![RouteMatch::new("root").with_handler(|_args| async {
            Err(HttpResponse::not_found()
                .with_json(&serde_json::json!({"missing": "user"}))
                .unwrap()
                .into())
        })]);
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &get("/"), &set).await;

        match &outcomes[0].1 {
            RouteOutcome::Error(Payload::ErrorResponse(err)) => {
                assert_eq!(err.status, 404);
                assert_eq!(err.status_text, "Not Found");
                assert_eq!(err.data.as_json(), Some(&serde_json::json!({"missing": "user"})));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panics_are_isolated() {
        let set = MatchSet::new(vec![
            RouteMatch::new("bad").with_handler(explode),
            RouteMatch::new("good").with_handler(|_args| async { Ok(Payload::from("fine")) }),
        ]);
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &get("/"), &set).await;

        assert!(matches!(
            &outcomes[0].1,
            RouteOutcome::Error(Payload::Error(e)) if e.name == "Panic" && e.message == "kaboom"
        ));
        assert!(matches!(&outcomes[1].1, RouteOutcome::Data(_)));
    }

    #[tokio::test]
    async fn test_bad_json_body_is_a_syntax_error() {
        let set = MatchSet::new(vec![RouteMatch::new("root").with_handler(|_args| async {
            Ok(HttpResponse::ok()
                .with_header("Content-Type", "application/json")
                .with_body(b"{nope".to_vec())
                .into())
        })]);
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &get("/"), &set).await;
        assert!(matches!(
            &outcomes[0].1,
            RouteOutcome::Error(Payload::Error(e)) if e.name == "SyntaxError"
        ));
    }

    #[tokio::test]
    async fn test_mutation_runs_only_action() {
        let set = MatchSet::new(vec![
            RouteMatch::new("root").with_handler(explode),
            RouteMatch::new("form").with_handler(|args: LoaderArgs| async move {
                args.response.set_status(201);
                Ok(Payload::from("saved"))
            }),
        ])
        .with_action();
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &HttpRequest::new("POST", "/form"), &set).await;

        assert!(outcomes[0].1.is_skipped());
        assert!(matches!(&outcomes[1].1, RouteOutcome::Data(_)));
        assert_eq!(stubs.get(&StubKey::Action).status(), Some(201));
        assert!(stubs.peek(&StubKey::route("form")).is_none());
    }

    #[tokio::test]
    async fn test_mutation_without_action_is_405() {
        let set = MatchSet::new(vec![RouteMatch::new("root"), RouteMatch::new("page")]);
        let stubs = ResponseStubs::new();
        let outcomes = run(&stubs, &HttpRequest::new("POST", "/page"), &set).await;

        assert!(outcomes[0].1.is_skipped());
        match &outcomes[1].1 {
            RouteOutcome::Error(Payload::ErrorResponse(err)) => {
                assert_eq!(err.status, 405);
                assert!(err.internal);
                assert!(err.error.as_ref().unwrap().message.contains("did not provide an action"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
