//! BLOB upload/download through the worker pool.

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    use busgate_bus::{BusClient, BusError, BusReply, BusRequest, BusResponse, ScriptedBus};
    use busgate_core::RouterConfig;
    use tokio_util::sync::CancellationToken;

    use crate::{start_server, start_server_with, test_config};

    /// Answers both helper commands successfully; uploads get blob id 7.
    fn helper_bus() -> Arc<ScriptedBus> {
        Arc::new(ScriptedBus::responding(|req| {
            match req.resource.as_str() {
                "c.sys.uploadBLOBHelper" => Ok(BusResponse::new(
                    http::StatusCode::OK,
                    "application/json",
                    r#"{"newIDs":{"1":7}}"#,
                )),
                "c.sys.downloadBLOBHelper" => Ok(BusResponse::new(
                    http::StatusCode::OK,
                    "application/json",
                    "{}",
                )),
                other => Err(BusError::failed(format!("unexpected resource {other}"))),
            }
        }))
    }

    #[tokio::test]
    async fn test_should_upload_and_download_a_blob() {
        let server = start_server(helper_bus()).await;
        let client = reqwest::Client::new();

        // Single-blob upload: name and mime type in the query, body is the
        // payload, bearer token in the header.
        let resp = client
            .post(server.url("/blob/untill/airs-bp/1?name=test.bin&mimeType=application/x-binary"))
            .header("Authorization", "Bearer principal-token")
            .body("blob content")
            .send()
            .await
            .expect("upload response");
        assert_eq!(resp.status(), 200);
        let blob_id = resp.text().await.expect("body");
        assert_eq!(blob_id, "7");

        // Download with cookie auth (GET only).
        let resp = client
            .get(server.url("/blob/untill/airs-bp/1/7"))
            .header("Cookie", "Authorization=Bearer%20principal-token")
            .send()
            .await
            .expect("download response");
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()
                .get("Content-Type")
                .and_then(|v| v.to_str().ok()),
            Some("application/x-binary"),
        );
        assert_eq!(
            resp.headers()
                .get("Content-Disposition")
                .and_then(|v| v.to_str().ok()),
            Some("attachment;filename=\"test.bin\""),
        );
        assert_eq!(resp.text().await.expect("body"), "blob content");
    }

    #[tokio::test]
    async fn test_should_upload_first_multipart_part() {
        let server = start_server(helper_bus()).await;

        let body = "--xyzzy\r\n\
             Content-Disposition: form-data; name=\"invoice.pdf\"\r\n\
             Content-Type: application/pdf\r\n\
             \r\n\
             %PDF-1.4\r\n\
             --xyzzy--\r\n";

        let resp = reqwest::Client::new()
            .post(server.url("/blob/untill/airs-bp/1"))
            .header("Authorization", "Bearer principal-token")
            .header("Content-Type", "multipart/form-data; boundary=xyzzy")
            .body(body)
            .send()
            .await
            .expect("upload response");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.expect("body"), "7");

        let resp = reqwest::Client::new()
            .get(server.url("/blob/untill/airs-bp/1/7"))
            .header("Authorization", "Bearer principal-token")
            .send()
            .await
            .expect("download response");
        assert_eq!(
            resp.headers()
                .get("Content-Type")
                .and_then(|v| v.to_str().ok()),
            Some("application/pdf"),
        );
        assert_eq!(resp.text().await.expect("body"), "%PDF-1.4");
    }

    #[tokio::test]
    async fn test_should_reject_upload_without_bearer_token() {
        let server = start_server(helper_bus()).await;

        let resp = reqwest::Client::new()
            .post(server.url("/blob/untill/airs-bp/1?name=x&mimeType=y"))
            .body("data")
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 401);

        let resp = reqwest::Client::new()
            .post(server.url("/blob/untill/airs-bp/1?name=x&mimeType=y"))
            .header("Authorization", "Basic not-bearer")
            .body("data")
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn test_should_reject_ambiguous_upload_flavour() {
        let server = start_server(helper_bus()).await;

        // Name without mime type.
        let resp = reqwest::Client::new()
            .post(server.url("/blob/untill/airs-bp/1?name=x"))
            .header("Authorization", "Bearer t")
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 400);

        // Neither flavour.
        let resp = reqwest::Client::new()
            .post(server.url("/blob/untill/airs-bp/1"))
            .header("Authorization", "Bearer t")
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_should_refuse_oversized_blob_with_403() {
        let mut config = test_config();
        config.blob.max_size = 8;
        let server = start_server_with(helper_bus(), config).await;

        let resp = reqwest::Client::new()
            .post(server.url("/blob/untill/airs-bp/1?name=big&mimeType=bin"))
            .header("Authorization", "Bearer t")
            .body("way more than eight bytes")
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 403);
        assert!(resp
            .text()
            .await
            .expect("body")
            .contains("size quota exceeded"));
    }

    #[tokio::test]
    async fn test_should_404_missing_blob() {
        let server = start_server(helper_bus()).await;

        let resp = reqwest::Client::new()
            .get(server.url("/blob/untill/airs-bp/1/404"))
            .header("Authorization", "Bearer t")
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 404);
    }

    /// A bus whose helper commands block until released; lets tests wedge
    /// the worker pool.
    struct StallingBus {
        release: Arc<tokio::sync::Notify>,
    }

    impl BusClient for StallingBus {
        fn send(
            &self,
            _cancel: CancellationToken,
            _request: BusRequest,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<BusReply, BusError>> + Send>> {
            let release = Arc::clone(&self.release);
            Box::pin(async move {
                release.notified().await;
                Ok(BusReply::response(BusResponse::new(
                    http::StatusCode::OK,
                    "application/json",
                    r#"{"newIDs":{"1":7}}"#,
                )))
            })
        }
    }

    #[tokio::test]
    async fn test_should_503_with_retry_after_when_queue_is_full() {
        let release = Arc::new(tokio::sync::Notify::new());
        let bus = Arc::new(StallingBus {
            release: Arc::clone(&release),
        });

        let mut config = test_config();
        config.blob.workers = 1;
        config.blob.queue_depth = 1;
        config.blob.retry_after_secs = 7;
        let server = start_server_with(bus, config).await;

        let client = reqwest::Client::new();
        let upload = |n: u32| {
            client
                .post(server.url("/blob/untill/airs-bp/1?name=x&mimeType=y"))
                .header("Authorization", "Bearer t")
                .body(format!("payload {n}"))
                .send()
        };

        // First job occupies the worker, second fills the queue.
        let first = tokio::spawn(upload(1));
        let second = tokio::spawn(upload(2));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Third finds the queue full.
        let resp = upload(3).await.expect("response");
        assert_eq!(resp.status(), 503);
        assert_eq!(
            resp.headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok()),
            Some("7"),
        );

        // Unblock the helpers so the accepted jobs finish.
        release.notify_waiters();
        release.notify_one();
        let resp = first.await.expect("join").expect("first upload");
        assert_eq!(resp.status(), 200);
        release.notify_waiters();
        release.notify_one();
        let resp = second.await.expect("join").expect("second upload");
        assert_eq!(resp.status(), 200);
    }
}
