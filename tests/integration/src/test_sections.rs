//! The dispatch and streaming-response pipeline, end to end.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures_util::StreamExt;
    use serde_json::{json, Value};

    use busgate_bus::{
        BusError, BusRequest, BusResponse, ScriptedBus, StreamError,
    };

    use crate::start_server;

    #[tokio::test]
    async fn test_should_stream_sectioned_reply_with_unicode_intact() {
        let seen = Arc::new(Mutex::new(None::<BusRequest>));
        let record = Arc::clone(&seen);
        let bus = Arc::new(ScriptedBus::streaming(move |_cancel, request, mut sender| {
            let record = Arc::clone(&record);
            async move {
                *record.lock().expect("record lock") = Some(request);
                sender
                    .object_section("obj", vec!["meta".to_owned()], json!({"total": 1}))
                    .await
                    .expect("object section");
                sender
                    .start_map_section(
                        "哇\"呀呀Map",
                        vec!["哇\"呀呀".to_owned(), "21".to_owned()],
                    )
                    .await
                    .expect("map section");
                sender
                    .send_element("id1", json!({"fld1": "fld1Val"}))
                    .await
                    .expect("first pair");
                sender
                    .send_element("哇\"呀呀2", json!({"fld2": "哇\"呀呀"}))
                    .await
                    .expect("second pair");
                sender
                    .start_array_section("secArr", vec!["3".to_owned()])
                    .await
                    .expect("array section");
                sender.send_element("", "e1").await.expect("e1");
                sender.send_element("", "哇\"呀呀").await.expect("e2");
                sender.close(None);
            }
        }));
        let server = start_server(bus).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/airs-bp/1/somefunc"))
            .header("Content-Type", "application/json")
            .body("test body")
            .send()
            .await
            .expect("response");

        assert_eq!(resp.status(), 200);
        assert!(resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .expect("content type")
            .contains("application/json"));

        let actual: Value = resp.json().await.expect("well-formed json");
        let expected = json!({
            "sections": [
                {"type": "obj", "path": ["meta"], "elements": {"total": 1}},
                {
                    "type": "哇\"呀呀Map",
                    "path": ["哇\"呀呀", "21"],
                    "elements": {
                        "id1": {"fld1": "fld1Val"},
                        "哇\"呀呀2": {"fld2": "哇\"呀呀"}
                    }
                },
                {"type": "secArr", "path": ["3"], "elements": ["e1", "哇\"呀呀"]}
            ]
        });
        assert_eq!(actual, expected);

        // The dispatcher built the bus request faithfully.
        let request = seen.lock().expect("record lock").take().expect("request seen");
        assert_eq!(request.method, http::Method::POST);
        assert_eq!(request.wsid.as_i64(), 1);
        assert_eq!(request.queue.as_deref(), Some("airs-bp"));
        assert_eq!(request.partition, Some(0));
        assert_eq!(request.resource, "somefunc");
        assert_eq!(request.body.as_ref(), b"test body");
    }

    #[tokio::test]
    async fn test_should_answer_empty_stream_with_empty_object() {
        let bus = Arc::new(ScriptedBus::streaming(|_cancel, _req, sender| async move {
            sender.close(None);
        }));
        let server = start_server(bus).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/airs-bp/1/somefunc"))
            .send()
            .await
            .expect("response");

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.expect("body"), "{}");
    }

    #[tokio::test]
    async fn test_should_embed_late_stream_error_in_200_body() {
        let bus = Arc::new(ScriptedBus::streaming(|_cancel, _req, mut sender| async move {
            sender
                .object_section("obj", vec!["meta".to_owned()], json!({"total": 1}))
                .await
                .expect("section");
            sender.close(Some(StreamError::new("test error")));
        }));
        let server = start_server(bus).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/airs-bp/1/somefunc"))
            .send()
            .await
            .expect("response");

        assert_eq!(resp.status(), 200);
        let actual: Value = resp.json().await.expect("json");
        assert_eq!(actual["status"], 500);
        assert_eq!(actual["errorDescription"], "test error");
        assert_eq!(actual["sections"][0]["type"], "obj");
    }

    #[tokio::test]
    async fn test_should_answer_early_bus_error_with_plain_500() {
        let bus = Arc::new(ScriptedBus::responding(|_req| Err(BusError::Timeout)));
        let server = start_server(bus).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/airs-bp/1/somefunc"))
            .send()
            .await
            .expect("response");

        assert_eq!(resp.status(), 500);
        assert!(resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .expect("content type")
            .contains("text/plain"));
        assert_eq!(
            resp.text().await.expect("body"),
            "first response read failed: timeout expired"
        );
    }

    #[tokio::test]
    async fn test_should_relay_plain_reply_verbatim() {
        let bus = Arc::new(ScriptedBus::responding(|_req| {
            Ok(BusResponse::new(
                http::StatusCode::OK,
                "text/plain",
                "test resp",
            ))
        }));
        let server = start_server(bus).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/airs-bp/1/somefunc"))
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
        assert_eq!(resp.text().await.expect("body"), "test resp");
    }

    #[tokio::test]
    async fn test_should_catch_handler_panic_as_500() {
        let bus = Arc::new(ScriptedBus::responding(
            |_req| -> Result<BusResponse, BusError> { panic!("test panic") },
        ));
        let server = start_server(bus).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/airs-bp/1/somefunc"))
            .send()
            .await
            .expect("response");

        assert_eq!(resp.status(), 500);
        assert!(resp.text().await.expect("body").contains("test panic"));
    }

    #[tokio::test]
    async fn test_should_stop_producer_when_client_disconnects_mid_stream() {
        // The producer sends one section and one element, waits for the
        // disconnect, then keeps pushing until it observes cancellation or
        // consumer loss.
        let (observed_tx, observed_rx) = tokio::sync::oneshot::channel::<&'static str>();
        let observed_tx = Arc::new(Mutex::new(Some(observed_tx)));
        let (proceed_tx, proceed_rx) = tokio::sync::oneshot::channel::<()>();
        let proceed_rx = Arc::new(Mutex::new(Some(proceed_rx)));

        let bus = Arc::new(ScriptedBus::streaming(move |cancel, _req, mut sender| {
            let observed_tx = Arc::clone(&observed_tx);
            let proceed_rx = Arc::clone(&proceed_rx);
            async move {
                sender
                    .start_map_section("secMap", vec!["2".to_owned()])
                    .await
                    .expect("section");
                sender
                    .send_element("id1", json!({"fld1": "fld1Val"}))
                    .await
                    .expect("first element");

                // Wait until the client has read the first bytes and hung up.
                let proceed = proceed_rx.lock().expect("proceed lock").take();
                if let Some(rx) = proceed {
                    rx.await.expect("proceed signal");
                }

                let outcome = loop {
                    tokio::select! {
                        () = cancel.cancelled() => break "cancelled",
                        sent = sender.send_element("idN", json!({"fld2": "x"})) => {
                            if sent.is_err() {
                                break "no consumer";
                            }
                        }
                    }
                };
                sender.close(None);
                if let Some(tx) = observed_tx.lock().expect("observed lock").take() {
                    let _ = tx.send(outcome);
                }
            }
        }));
        let server = start_server(bus).await;

        let resp = reqwest::Client::new()
            .post(server.url("/api/airs-bp/1/somefunc"))
            .send()
            .await
            .expect("response");
        assert_eq!(resp.status(), 200);

        // Read until the first element is on the wire, then drop the
        // connection.
        let mut stream = resp.bytes_stream();
        let mut received = Vec::new();
        while !String::from_utf8_lossy(&received).contains("fld1Val") {
            let chunk = stream.next().await.expect("chunk").expect("chunk ok");
            received.extend_from_slice(&chunk);
        }
        drop(stream);

        proceed_tx.send(()).expect("producer is waiting");

        let outcome = tokio::time::timeout(Duration::from_secs(10), observed_rx)
            .await
            .expect("producer observes the disconnect in bounded time")
            .expect("outcome reported");
        assert!(outcome == "cancelled" || outcome == "no consumer");
    }
}
