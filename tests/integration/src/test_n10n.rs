//! Server-Sent Events notification channels.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::StreamExt;

    use busgate_bus::{BusError, ScriptedBus};
    use busgate_n10n::NotificationBroker;

    use crate::{start_server, start_server_with, test_config};

    fn dead_bus() -> Arc<ScriptedBus> {
        Arc::new(ScriptedBus::responding(|_req| {
            Err(BusError::failed("bus must not be hit by this test"))
        }))
    }

    const CHANNEL_PAYLOAD: &str = r#"{"SubjectLogin":"paa","ProjectionKey":[{"App":"Application","Projection":"paa.price","WS":1}]}"#;

    #[tokio::test]
    async fn test_should_stream_channel_id_and_updates() {
        let server = start_server(dead_bus()).await;

        let resp = reqwest::Client::new()
            .get(server.url("/n10n/channel"))
            .query(&[("payload", CHANNEL_PAYLOAD)])
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()
                .get("Content-Type")
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream"),
        );

        let mut stream = resp.bytes_stream();
        let mut received = String::new();

        // First frame announces the channel id.
        while !received.contains("\n\n") {
            let chunk = stream.next().await.expect("greeting chunk").expect("chunk");
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
        assert!(received.starts_with("event: channelId\ndata: "), "got: {received}");

        // A manual update is delivered over the open channel.
        let resp = reqwest::Client::new()
            .post(server.url("/n10n/update/13"))
            .body(r#"{"App":"Application","Projection":"paa.price","WS":1}"#)
            .send()
            .await
            .expect("update response");
        assert_eq!(resp.status(), 200);

        let mut update = String::new();
        let deadline = tokio::time::timeout(Duration::from_secs(10), async {
            while !update.contains("data: 13\n\n") {
                let chunk = stream.next().await.expect("update chunk").expect("chunk");
                update.push_str(&String::from_utf8_lossy(&chunk));
            }
        });
        deadline.await.expect("update delivered in bounded time");
        assert!(update.contains(r#""Projection":"paa.price""#), "got: {update}");
    }

    #[tokio::test]
    async fn test_should_reject_channel_request_without_payload() {
        let server = start_server(dead_bus()).await;

        let resp = reqwest::Client::new()
            .get(server.url("/n10n/channel"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_should_answer_429_when_channel_quota_exhausted() {
        let mut config = test_config();
        config.n10n.max_channels = 0;
        let server = start_server_with(dead_bus(), config).await;

        let resp = reqwest::Client::new()
            .get(server.url("/n10n/channel"))
            .query(&[("payload", CHANNEL_PAYLOAD)])
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 429);
    }

    #[tokio::test]
    async fn test_should_subscribe_additional_projection() {
        let server = start_server(dead_bus()).await;

        // Open a channel first.
        let resp = reqwest::Client::new()
            .get(server.url("/n10n/channel"))
            .query(&[("payload", CHANNEL_PAYLOAD)])
            .send()
            .await
            .expect("channel response");
        let mut stream = resp.bytes_stream();
        let mut greeting = String::new();
        while !greeting.contains("\n\n") {
            let chunk = stream.next().await.expect("chunk").expect("chunk ok");
            greeting.push_str(&String::from_utf8_lossy(&chunk));
        }
        let channel_id = greeting
            .trim_start_matches("event: channelId\ndata: ")
            .trim_end()
            .to_owned();

        let payload = format!(
            r#"{{"Channel":"{channel_id}","ProjectionKey":[{{"App":"Application","Projection":"paa.wine_price","WS":1}}]}}"#
        );
        let resp = reqwest::Client::new()
            .get(server.url("/n10n/subscribe"))
            .query(&[("payload", payload.as_str())])
            .send()
            .await
            .expect("subscribe response");
        assert_eq!(resp.status(), 200);
        assert_eq!(server.broker.subscription_count(), 2);

        let resp = reqwest::Client::new()
            .get(server.url("/n10n/unsubscribe"))
            .query(&[("payload", payload.as_str())])
            .send()
            .await
            .expect("unsubscribe response");
        assert_eq!(resp.status(), 200);
        assert_eq!(server.broker.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_should_reject_subscribe_to_unknown_channel() {
        let server = start_server(dead_bus()).await;

        let payload = r#"{"Channel":"no-such-channel","ProjectionKey":[{"App":"A","Projection":"p","WS":1}]}"#;
        let resp = reqwest::Client::new()
            .get(server.url("/n10n/subscribe"))
            .query(&[("payload", payload)])
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 500);
    }
}
