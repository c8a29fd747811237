use std::net::TcpListener;

use asserto::{assert_response, Expectation, ResponseError, ServerHandle, TestRequest};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

#[tokio::test]
async fn external_server_is_never_closed() {
    let mock_server = MockServer::start().await;
    Mock::given(path("/"))
        .and(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .insert_header("X-Powered-By", "wiremock"),
        )
        .expect(2)
        .mount(&mock_server)
        .await;
    let handle = ServerHandle::external(*mock_server.address());

    for _ in 0..2 {
        assert_response(
            &handle,
            TestRequest::get("/"),
            Expectation::new()
                .body("ok")
                .status(200)
                .header("x-powered-by", "wiremock"),
        )
        .await
        .expect("Failed to assert response");

        assert!(handle.is_listening());
        assert_eq!(handle.pending(), 0);
        assert_eq!(handle.port(), Some(mock_server.address().port()));
    }
}

#[tokio::test]
async fn transport_errors_release_pending_count() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
        listener.local_addr().unwrap()
    };
    let handle = ServerHandle::external(addr);

    let result = assert_response(&handle, TestRequest::get("/"), Expectation::new()).await;

    assert!(matches!(result, Err(ResponseError::Transport(_))));
    assert_eq!(handle.pending(), 0);
}
