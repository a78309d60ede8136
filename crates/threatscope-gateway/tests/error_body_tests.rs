//! Integration tests for structured error body parsing.

use threatscope_gateway::{GatewayError, error_from_body};

#[test]
fn error_body_tests_error_field_becomes_server_message() {
    let error = error_from_body(400, r#"{"error":"unsupported file type"}"#);
    assert_eq!(
        error,
        GatewayError::Server {
            status: 400,
            message: "unsupported file type".to_string(),
            detail: None,
        }
    );
}

#[test]
fn error_body_tests_string_detail_is_the_message() {
    let error = error_from_body(404, r#"{"detail":"Analysis not found"}"#);
    assert_eq!(error.user_message(), "Analysis not found");
}

#[test]
fn error_body_tests_object_detail_is_kept_as_map() {
    let error = error_from_body(
        422,
        r#"{"message":"validation failed","detail":{"field":"file","reason":"too large"}}"#,
    );
    let GatewayError::Server { message, detail, .. } = error else {
        panic!("expected server error");
    };
    assert_eq!(message, "validation failed");
    let detail = detail.expect("detail map should be kept");
    assert_eq!(detail["field"], "file");
}

#[test]
fn error_body_tests_unstructured_bodies_are_transport_failures() {
    assert!(matches!(
        error_from_body(502, "<html>Bad Gateway</html>"),
        GatewayError::Transport { status: Some(502), .. }
    ));
    assert!(matches!(
        error_from_body(500, ""),
        GatewayError::Transport { status: Some(500), .. }
    ));
}
