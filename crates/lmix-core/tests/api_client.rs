use lmix_core::{ApiClient, ApiError, BillingClient, BillingInterval, JobId, JobStatus};
use mockito::{Matcher, Server};

#[tokio::test]
async fn status_parses_snapshot_with_metadata() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/status/job-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status":"completed","progress":100,"fileID":"job-1","durationSeconds":184.2,"format":"mp3","silenceTrimmed":true}"#,
        )
        .create_async()
        .await;

    let client = ApiClient::with_base_url(&server.url()).unwrap();
    let snapshot = client.status(&JobId::from("job-1")).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, Some(100.0));
    let metadata = snapshot.metadata();
    assert_eq!(metadata.format.as_deref(), Some("mp3"));
    assert_eq!(metadata.silence_trimmed, Some(true));
}

#[tokio::test]
async fn unknown_status_strings_are_tolerated() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/status/job-2")
        .with_status(200)
        .with_body(r#"{"status":"analyzing","progress":0}"#)
        .create_async()
        .await;

    let client = ApiClient::with_base_url(&server.url()).unwrap();
    let snapshot = client.status(&JobId::from("job-2")).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Unknown);
    assert!(!snapshot.status.is_terminal());
    assert_eq!(snapshot.authoritative_progress(), None);
}

#[tokio::test]
async fn status_error_body_becomes_server_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/status/missing")
        .with_status(404)
        .with_body(r#"{"error":"File not found"}"#)
        .create_async()
        .await;

    let client = ApiClient::with_base_url(&server.url()).unwrap();
    let err = client.status(&JobId::from("missing")).await.unwrap_err();
    assert!(matches!(err, ApiError::Server(ref text) if text == "File not found"));
}

#[tokio::test]
async fn retry_and_cancel_report_new_status() {
    let mut server = Server::new_async().await;
    let retry = server
        .mock("POST", "/retry/job-3")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_body(r#"{"status":"queued"}"#)
        .create_async()
        .await;
    let cancel = server
        .mock("POST", "/cancel/job-3")
        .with_status(200)
        .with_body(r#"{"status":"cancelled"}"#)
        .create_async()
        .await;

    let client = ApiClient::with_base_url(&server.url()).unwrap();
    let id = JobId::from("job-3");
    assert_eq!(client.retry(&id).await.unwrap(), JobStatus::Queued);
    assert_eq!(client.cancel(&id).await.unwrap(), JobStatus::Cancelled);
    retry.assert_async().await;
    cancel.assert_async().await;
}

#[tokio::test]
async fn action_error_body_wins_over_status() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/cancel/job-4")
        .with_status(409)
        .with_body(r#"{"error":"Job is already finishing"}"#)
        .create_async()
        .await;

    let client = ApiClient::with_base_url(&server.url()).unwrap();
    let err = client.cancel(&JobId::from("job-4")).await.unwrap_err();
    assert_eq!(err.to_string(), "Job is already finishing");
}

#[tokio::test]
async fn download_uses_server_file_name_in_directories() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/download/job-5")
        .with_status(200)
        .with_header(
            "content-disposition",
            r#"attachment; filename="set_normalized.mp3""#,
        )
        .with_body("normalized bytes")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = ApiClient::with_base_url(&server.url()).unwrap();
    let (path, written) = client
        .download(&JobId::from("job-5"), dir.path())
        .await
        .unwrap();

    assert_eq!(path, dir.path().join("set_normalized.mp3"));
    assert_eq!(written, "normalized bytes".len() as u64);
    assert_eq!(std::fs::read_to_string(path).unwrap(), "normalized bytes");
}

#[tokio::test]
async fn checkout_posts_plan_and_interval() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/v1/payment/checkout")
        .match_body(Matcher::Json(serde_json::json!({
            "plan_id": "professional",
            "billing_interval": "yearly",
        })))
        .with_status(200)
        .with_body(r#"{"checkout_url":"https://billing.example/c/abc"}"#)
        .create_async()
        .await;

    let billing = BillingClient::new(ApiClient::with_base_url(&server.url()).unwrap());
    let url = billing
        .checkout_url("professional", BillingInterval::Yearly)
        .await
        .unwrap();
    assert_eq!(url, "https://billing.example/c/abc");
}

#[tokio::test]
async fn checkout_failure_prefers_server_message() {
    let mut server = Server::new_async().await;
    let _with_message = server
        .mock("POST", "/api/v1/payment/checkout")
        .match_body(Matcher::PartialJson(serde_json::json!({"plan_id": "premium"})))
        .with_status(400)
        .with_body(r#"{"message":"You already have an active subscription"}"#)
        .create_async()
        .await;
    let _without_message = server
        .mock("POST", "/api/v1/payment/checkout")
        .match_body(Matcher::PartialJson(serde_json::json!({"plan_id": "broken"})))
        .with_status(502)
        .with_body("<html>bad gateway</html>")
        .create_async()
        .await;

    let billing = BillingClient::new(ApiClient::with_base_url(&server.url()).unwrap());
    let err = billing
        .checkout_url("premium", BillingInterval::Monthly)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "You already have an active subscription");

    let err = billing
        .checkout_url("broken", BillingInterval::Monthly)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Failed to create checkout session");
}

#[tokio::test]
async fn portal_returns_redirect_url() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/v1/payment/portal")
        .with_status(200)
        .with_body(r#"{"url":"https://billing.example/p/xyz"}"#)
        .create_async()
        .await;

    let billing = BillingClient::new(ApiClient::with_base_url(&server.url()).unwrap());
    assert_eq!(
        billing.portal_url().await.unwrap(),
        "https://billing.example/p/xyz"
    );
}
