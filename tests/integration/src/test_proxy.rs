//! Reverse-proxy matching and forwarding.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use busgate_bus::{BusError, ScriptedBus};

    use crate::{start_capture_backend, start_server_with, test_config};

    fn dead_bus() -> Arc<ScriptedBus> {
        Arc::new(ScriptedBus::responding(|_req| {
            Err(BusError::failed("bus must not be hit by this test"))
        }))
    }

    #[tokio::test]
    async fn test_should_rewrite_prefix_and_forward() {
        let (backend, mut requests) = start_capture_backend("upstream ok").await;

        let mut config = test_config();
        config.routes_rewrite.insert(
            "/grafana-rewrite".to_owned(),
            format!("http://{backend}/rewritten"),
        );
        let server = start_server_with(dead_bus(), config).await;

        let resp = reqwest::Client::new()
            .get(server.url("/grafana-rewrite/foo?x=1"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.expect("body"), "upstream ok");

        let line = tokio::time::timeout(Duration::from_secs(5), requests.recv())
            .await
            .expect("backend hit")
            .expect("request line");
        assert_eq!(line, "GET /rewritten/foo?x=1 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_should_preserve_path_for_plain_route() {
        let (backend, mut requests) = start_capture_backend("grafana").await;

        let mut config = test_config();
        config
            .routes
            .insert("/grafana".to_owned(), format!("http://{backend}"));
        let server = start_server_with(dead_bus(), config).await;

        let resp = reqwest::Client::new()
            .get(server.url("/grafana/dashboards"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 200);

        let line = tokio::time::timeout(Duration::from_secs(5), requests.recv())
            .await
            .expect("backend hit")
            .expect("request line");
        assert_eq!(line, "GET /grafana/dashboards HTTP/1.1");
    }

    #[tokio::test]
    async fn test_should_fall_back_to_default_route() {
        let (backend, mut requests) = start_capture_backend("default").await;

        let mut config = test_config();
        config.route_default = Some(format!("http://{backend}/not-found"));
        let server = start_server_with(dead_bus(), config).await;

        let resp = reqwest::Client::new()
            .get(server.url("/unknown/foo"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 200);

        let line = tokio::time::timeout(Duration::from_secs(5), requests.recv())
            .await
            .expect("backend hit")
            .expect("request line");
        assert_eq!(line, "GET /not-found/unknown/foo HTTP/1.1");
    }

    #[tokio::test]
    async fn test_should_404_without_route_or_default() {
        let server = start_server_with(dead_bus(), test_config()).await;

        let resp = reqwest::Client::new()
            .get(server.url("/nothing/here"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_should_502_when_upstream_is_down() {
        let mut config = test_config();
        // A port nothing listens on.
        config
            .routes
            .insert("/gone".to_owned(), "http://127.0.0.1:1".to_owned());
        let server = start_server_with(dead_bus(), config).await;

        let resp = reqwest::Client::new()
            .get(server.url("/gone/x"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 502);
    }
}
