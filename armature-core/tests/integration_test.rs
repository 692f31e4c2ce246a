//! Integration tests for armature-core

use armature_core::*;

#[test]
fn test_http_request_creation() {
    let req = HttpRequest::new("GET", "/test");
    assert_eq!(req.method, "GET");
    assert_eq!(req.path, "/test");
    assert!(req.headers.is_empty());
    assert!(req.body.is_empty());
    assert!(req.is_read());
}

#[test]
fn test_http_request_from_uri_decodes_query() {
    let req = HttpRequest::from_uri("POST", "/projects.data?_routes=root%2Croutes%2Fa").unwrap();
    assert_eq!(req.path, "/projects.data");
    assert_eq!(req.query("_routes").map(String::as_str), Some("root,routes/a"));
    assert!(req.is_mutation());

    let err = HttpRequest::from_uri("GET", "projects.data").unwrap_err();
    assert!(matches!(err, Error::InvalidUri(_)));
}

#[test]
fn test_http_response_creation() {
    assert_eq!(HttpResponse::ok().status, 200);
    assert_eq!(HttpResponse::not_found().status, 404);
    assert_eq!(HttpResponse::new(500).status, 500);
}

#[test]
fn test_http_response_with_json() {
    use serde_json::json;

    let res = HttpResponse::ok().with_json(&json!({"message": "Hello"})).unwrap();

    assert_eq!(res.status, 200);
    assert!(res.is_json());
    assert_eq!(res.headers.get("content-type"), Some("application/json"));
}

#[test]
fn test_redirect_needs_location() {
    let res = HttpResponse::redirect("/login").with_cookie("session=; Max-Age=0");
    assert!(res.is_redirect());
    assert_eq!(res.headers.location(), Some("/login"));
    assert_eq!(res.headers.get_set_cookie(), vec!["session=; Max-Age=0"]);

    assert!(!HttpResponse::new(302).is_redirect());
}

#[test]
fn test_header_map_set_and_append() {
    let mut headers = HeaderMap::new();
    headers.append("Set-Cookie", "a=1").unwrap();
    headers.append("set-cookie", "b=2").unwrap();
    headers.set("Cache-Control", "no-store").unwrap();
    headers.set("cache-control", "max-age=60").unwrap();

    assert_eq!(headers.get_set_cookie(), vec!["a=1", "b=2"]);
    assert_eq!(headers.get_all("Cache-Control"), vec!["max-age=60"]);
    assert!(headers.set("Bad Name", "x").is_err());
    assert!(headers.append("X-Ok", "line\nbreak").is_err());

    assert_eq!(headers.delete("SET-COOKIE"), 2);
    assert_eq!(headers.len(), 1);
}

#[test]
fn test_status_text_uses_canonical_reasons() {
    assert_eq!(HttpResponse::new(405).status_text(), "Method Not Allowed");
    assert_eq!(HttpResponse::new(410).status_text(), "Gone");
    assert_eq!(HttpResponse::new(451).status_text(), "Unavailable For Legal Reasons");
    assert_eq!(HttpResponse::new(299).status_text(), "");
    assert!(is_redirect_code(303));
}

#[test]
fn test_error_messages() {
    let err = HttpRequest::new("POST", "/").with_body(b"{".to_vec()).json::<serde_json::Value>();
    assert!(matches!(err, Err(Error::Deserialization(_))));
    assert_eq!(Error::RouteNotFound("/x".into()).to_string(), "Route not found: /x");
}

#[tokio::test]
async fn test_streaming_response_buffers_lines() {
    let (stream, sender) = ByteStream::new();

    tokio::spawn(async move {
        sender.send_line(r#"{"a":1}"#).await.unwrap();
        sender.send_line(r#"{"b":2}"#).await.unwrap();
        sender.close().await;
    });

    let response = StreamingResponse::ndjson(stream)
        .status(202)
        .headers([("X-Remix-Revalidate", "yes")].into_iter().collect())
        .into_buffered()
        .await;

    assert_eq!(response.status, 202);
    assert_eq!(response.headers.content_type(), Some(NDJSON_CONTENT_TYPE));
    assert_eq!(response.headers.get("X-Remix-Revalidate"), Some("yes"));
    assert_eq!(String::from_utf8(response.body).unwrap(), "{\"a\":1}\n{\"b\":2}\n");
}
