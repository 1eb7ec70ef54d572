//! Liveness, enumeration, CORS, and fallthrough behaviour.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use busgate_bus::{BusError, ScriptedBus};

    use crate::start_server;

    fn dead_bus() -> Arc<ScriptedBus> {
        Arc::new(ScriptedBus::responding(|_req| {
            Err(BusError::failed("bus must not be hit by this test"))
        }))
    }

    #[tokio::test]
    async fn test_should_answer_check_with_ok() {
        let server = start_server(dead_bus()).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/check"))
            .send()
            .await
            .expect("response");

        assert_eq!(resp.status(), 200);
        assert!(resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .expect("content type")
            .contains("text/plain"));
        assert_eq!(
            resp.headers()
                .get("Access-Control-Allow-Origin")
                .and_then(|v| v.to_str().ok()),
            Some("*"),
        );
        assert_eq!(
            resp.headers()
                .get("Access-Control-Allow-Headers")
                .and_then(|v| v.to_str().ok()),
            Some("Accept, Content-Type, Content-Length, Accept-Encoding, Authorization"),
        );
        assert_eq!(resp.text().await.expect("body"), "ok");
    }

    #[tokio::test]
    async fn test_should_enumerate_queue_names() {
        let server = start_server(dead_bus()).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api"))
            .send()
            .await
            .expect("response");

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.expect("body"), r#"["airs-bp"]"#);
    }

    #[tokio::test]
    async fn test_should_short_circuit_cors_preflight() {
        let server = start_server(dead_bus()).await;

        let resp = reqwest::Client::new()
            .request(
                reqwest::Method::OPTIONS,
                server.url("/api/airs-bp/1/somefunc"),
            )
            .send()
            .await
            .expect("response");

        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()
                .get("Access-Control-Allow-Methods")
                .and_then(|v| v.to_str().ok()),
            Some("POST, GET, OPTIONS, PUT, PATCH"),
        );
    }

    #[tokio::test]
    async fn test_should_404_unmatched_api_path() {
        let server = start_server(dead_bus()).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/wrong"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_should_reject_unknown_queue_alias() {
        let server = start_server(dead_bus()).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/no-such-queue/1/somefunc"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 400);
        assert!(resp
            .text()
            .await
            .expect("body")
            .contains("can't find queue for alias: no-such-queue"));
    }
}
