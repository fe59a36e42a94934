//! Integration tests for the line monitor HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use line_monitor::server::{run, ServerConfig};
    use line_monitor::{Config, MemoryStore, Monitor};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn start() -> (SocketAddr, oneshot::Sender<()>, Arc<Monitor>) {
        let monitor = Arc::new(Monitor::new(
            Config::default(),
            Arc::new(MemoryStore::new()),
        ));
        let (addr, shutdown_tx) = run(ServerConfig::local(0), monitor.clone())
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx, monitor)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx, _) = start().await;

        let response = reqwest::get(format!("http://{}/healthz", addr))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_data_endpoint_accepts_packet() {
        let (addr, shutdown_tx, monitor) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/data", addr))
            .json(&serde_json::json!({
                "lineId": "line1",
                "pulses": "12",
                "duration": 1000,
            }))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["ok"], true);
        assert_eq!(body["speed"], 720.0);
        assert_eq!(body["state"], "stopped");
        assert_eq!(body["stateChanged"], false);

        assert_eq!(monitor.engine().line_ids(), vec!["line1".to_string()]);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_data_endpoint_rejects_invalid_packet() {
        let (addr, shutdown_tx, monitor) = start().await;
        let client = reqwest::Client::new();

        for payload in [
            serde_json::json!({ "lineId": "", "pulses": 1, "duration": 1000 }),
            serde_json::json!({ "lineId": "line1", "pulses": 1, "duration": 0 }),
            serde_json::json!({ "lineId": "line1", "pulses": "many", "duration": 1000 }),
        ] {
            let response = client
                .post(format!("http://{}/data", addr))
                .json(&payload)
                .send()
                .await
                .expect("Failed to send request");
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

            let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
            assert_eq!(body["code"], "INVALID_PAYLOAD");
        }

        assert_eq!(monitor.stats().snapshot().rejected, 3);
        assert!(monitor.engine().line_ids().is_empty());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_status_endpoint_lists_enabled_lines() {
        let (addr, shutdown_tx, _) = start().await;
        let client = reqwest::Client::new();

        client
            .post(format!("http://{}/data", addr))
            .json(&serde_json::json!({ "lineId": "line2", "pulses": 5, "duration": 1000 }))
            .send()
            .await
            .expect("Failed to send request");

        let body: serde_json::Value = client
            .get(format!("http://{}/status", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        let lines = body.as_array().expect("status is an array");
        assert_eq!(lines.len(), 13);
        assert_eq!(lines[0]["lineId"], "line1");
        assert_eq!(lines[0]["stateLabel"], "no_data");
        assert_eq!(lines[1]["stateLabel"], "stopped");
        assert_eq!(lines[1]["speed"], 300.0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_chart_data_shape() {
        let (addr, shutdown_tx, _) = start().await;

        let body: serde_json::Value = reqwest::get(format!("http://{}/chartdata/line1", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        let labels = body["speed"]["labels"].as_array().unwrap();
        let data = body["speed"]["data"].as_array().unwrap();
        assert_eq!(labels.len(), 24 * 60 + 1);
        assert_eq!(data.len(), labels.len());
        assert!(data.iter().all(|v| v.is_null()));

        assert_eq!(body["status"]["labels"].as_array().unwrap().len(), 30);
        assert_eq!(body["status"]["down"].as_array().unwrap().len(), 30);
        assert_eq!(body["status"]["lineName"], "line1");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_report_endpoints() {
        let (addr, shutdown_tx, _) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!(
                "http://{}/report?from=2024-03-01&to=2024-03-03",
                addr
            ))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["lines"].as_array().unwrap().len(), 13);
        assert_eq!(body["lines"][0]["summary"]["idle_hours"], 48.0);

        let response = client
            .get(format!(
                "http://{}/report?from=2024-03-03&to=2024-03-01",
                addr
            ))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = client
            .get(format!("http://{}/report/daily?days=7", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["days"], 7);
        assert_eq!(
            body["lines"][0]["daily"]["labels"].as_array().unwrap().len(),
            7
        );

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_report_endpoints_reject_oversized_ranges() {
        let (addr, shutdown_tx, _) = start().await;
        let client = reqwest::Client::new();

        for query in [
            "report/daily?days=4000000000",
            "report/daily?days=367",
            "report?from=1000-01-01&to=2024-03-01",
            "report?from=2022-01-01&to=2024-03-01",
        ] {
            let response = client
                .get(format!("http://{}/{}", addr, query))
                .send()
                .await
                .expect("Failed to send request");
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST, "{query}");

            let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
            assert_eq!(body["code"], "INVALID_PAYLOAD");
        }

        let response = client
            .get(format!("http://{}/report/daily?days=366", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_concurrent_packets_are_all_ingested() {
        let (addr, shutdown_tx, monitor) = start().await;
        let client = reqwest::Client::new();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    client
                        .post(format!("http://{}/data", addr))
                        .json(&serde_json::json!({
                            "lineId": format!("line{}", i % 4 + 1),
                            "pulses": 5,
                            "duration": 1000,
                        }))
                        .send()
                        .await
                        .expect("Failed to send request")
                        .status()
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.expect("request task panicked").is_success());
        }
        assert_eq!(monitor.stats().snapshot().packets, 20);
        assert_eq!(monitor.engine().line_ids().len(), 4);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let (addr, shutdown_tx, monitor) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/settings/save", addr))
            .json(&serde_json::json!({
                "V_START": "2.5",
                "delayStop": 45,
                "windowSec": -10,
                "graphHours": 48,
            }))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["ok"], true);

        let info: serde_json::Value = client
            .get(format!("http://{}/settings/info", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(info["detection"]["V_START"], 2.5);
        assert_eq!(info["detection"]["delayStop"], 45);
        assert_eq!(info["detection"]["windowSec"], 60);
        assert_eq!(info["graph_hours"], 48);

        assert_eq!(monitor.settings().v_start, 2.5);

        let _ = shutdown_tx.send(());
    }
}
