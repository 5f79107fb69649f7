//! End-to-end aggregation runs against mocked pod RPC and credits services
//!
//! Real caches and a real SQLite store are wired exactly as the runtime
//! does; only the network peers are fakes.

#[cfg(test)]
mod pipeline_integration_tests {
    use podwatch::accessibility::{AccessibilityCache, AccessibilityConfig};
    use podwatch::credits::CreditsClient;
    use podwatch::geolocation::{GeolocationCache, GeolocationConfig};
    use podwatch::pipeline::AggregationPipeline;
    use podwatch::rpc::{RpcClient, RpcTarget};
    use podwatch::store::{SnapshotStore, SqliteSnapshotStore};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NOW: i64 = 1_700_000_000;

    fn pod(pubkey: &str, address: &str, committed: u64, used: u64) -> Value {
        let usage_percent = used as f64 / committed as f64 * 100.0;
        json!({
            "pubkey": pubkey,
            "address": address,
            "is_public": true,
            "is_registered": true,
            "last_seen_timestamp": NOW - 10,
            "rpc_port": 6000,
            "storage_committed": committed,
            "storage_used": used,
            "storage_usage_percent": usage_percent,
            "uptime": 86_400,
            "version": "0.8.1"
        })
    }

    async fn mount_roster(server: &MockServer, pods: Vec<Value>) {
        let total = pods.len();
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(body_partial_json(json!({"method": "get-pods-with-stats"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "roster",
                "result": {"pods": pods, "total_count": total}
            })))
            .mount(server)
            .await;
    }

    async fn mount_stats(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(body_partial_json(json!({"method": "get-stats"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "stats",
                "result": {
                    "cpu_percent": 12.5,
                    "ram_used": 1_000,
                    "ram_total": 4_000,
                    "uptime": 86_400,
                    "active_streams": 3,
                    "packets_received": 100,
                    "packets_sent": 90,
                    "file_size": 10_000,
                    "total_bytes": 20_000,
                    "total_pages": 5,
                    "current_index": 4,
                    "last_updated": NOW
                }
            })))
            .mount(server)
            .await;
    }

    /// Pipeline wired like the runtime, with every pod RPC pointed at `server`
    fn build_pipeline(
        server: &MockServer,
        store: Option<Arc<dyn SnapshotStore>>,
        credits_url: Option<String>,
    ) -> AggregationPipeline {
        let http = podwatch::http::build_client().unwrap();
        let rpc = RpcClient::with_http(http.clone());
        let target = RpcTarget {
            scheme: "http".to_string(),
            port: server.address().port(),
        };

        let accessibility = Arc::new(AccessibilityCache::new(
            rpc.clone(),
            store.clone(),
            AccessibilityConfig {
                target: target.clone(),
                backoff_base: Duration::from_millis(5),
                backoff_cap: Duration::from_millis(10),
                ..AccessibilityConfig::default()
            },
        ));
        let geo = GeolocationCache::new(
            http.clone(),
            GeolocationConfig::new(server.uri()),
            store.clone(),
        )
        .unwrap();

        let mut pipeline = AggregationPipeline::new(rpc, format!("{}/rpc", server.uri()), accessibility)
            .with_target(target)
            .with_geolocation(Arc::new(geo))
            .with_timestamp_fn(Box::new(|| NOW));
        if let Some(url) = credits_url {
            pipeline = pipeline.with_credits(CreditsClient::new(http, url));
        }
        if let Some(store) = store {
            pipeline = pipeline.with_store(store);
        }
        pipeline
    }

    #[tokio::test]
    async fn test_one_leaf_per_roster_entry_in_order() {
        let server = MockServer::start().await;
        mount_roster(
            &server,
            vec![
                pod("podC", "127.0.0.1:9001", 100, 10),
                pod("podA", "127.0.0.1:9002", 100, 20),
                pod("podB", "127.0.0.1:9003", 100, 30),
            ],
        )
        .await;
        mount_stats(&server).await;

        let leaves = build_pipeline(&server, None, None).build_leaf_records().await.unwrap();

        let keys: Vec<_> = leaves.iter().map(|l| l.pubkey.as_str()).collect();
        assert_eq!(keys, vec!["podC", "podA", "podB"]);
        assert!(leaves.iter().all(|l| l.is_online));
    }

    #[tokio::test]
    async fn test_empty_roster() {
        let server = MockServer::start().await;
        mount_roster(&server, vec![]).await;

        let pipeline = build_pipeline(&server, None, None);
        assert!(pipeline.build_leaf_records().await.unwrap().is_empty());

        let summary = pipeline.build_root_summary().await.unwrap();
        assert_eq!(summary.total_pods, 0);
        assert_eq!(summary.average_storage_per_pod, 0.0);
        assert_eq!(summary.utilization_rate, 0.0);
    }

    #[tokio::test]
    async fn test_geolocation_failure_keeps_accessibility_and_stats() {
        // 127.0.0.1 is not geolocatable; the pod itself answers get-stats
        let server = MockServer::start().await;
        mount_roster(&server, vec![pod("podA", "127.0.0.1:9001", 100, 50)]).await;
        mount_stats(&server).await;

        let leaves = build_pipeline(&server, None, None).build_leaf_records().await.unwrap();

        let leaf = &leaves[0];
        assert_eq!(leaf.ip.as_deref(), Some("127.0.0.1"));
        assert!(leaf.ip_info.is_none());
        assert!(leaf.is_accessible);
        let stats = leaf.stats.as_ref().unwrap();
        assert_eq!(stats.ram_total, 4_000);
        assert_eq!(stats.active_streams, 3);
    }

    #[tokio::test]
    async fn test_unreachable_pod_has_no_stats() {
        let server = MockServer::start().await;
        mount_roster(&server, vec![pod("podA", "127.0.0.1:9001", 100, 50)]).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "get-stats"})))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let leaves = build_pipeline(&server, None, None).build_leaf_records().await.unwrap();
        assert!(!leaves[0].is_accessible);
        assert!(leaves[0].stats.is_none());
    }

    #[tokio::test]
    async fn test_roster_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "get-pods-with-stats"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "roster",
                "error": {"code": -32603, "message": "internal error"}
            })))
            .mount(&server)
            .await;

        let err = build_pipeline(&server, None, None)
            .build_leaf_records()
            .await
            .unwrap_err();
        assert_eq!(err.rpc_code(), Some(-32603));
    }

    #[tokio::test]
    async fn test_credits_failure_is_not_fatal() {
        let server = MockServer::start().await;
        mount_roster(&server, vec![pod("podA", "127.0.0.1:9001", 100, 50)]).await;
        mount_stats(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/pods-credits"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let pipeline = build_pipeline(
            &server,
            None,
            Some(format!("{}/api/pods-credits", server.uri())),
        );

        let leaves = pipeline.build_leaf_records().await.unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].credits, None);
        assert_eq!(leaves[0].credits_rank, None);

        let summary = pipeline.build_root_summary().await.unwrap();
        assert_eq!(summary.total_credits, None);
        assert_eq!(summary.utilization_rate, 50.0);
    }

    #[tokio::test]
    async fn test_snapshot_replaced_in_store() {
        let server = MockServer::start().await;
        mount_roster(
            &server,
            vec![
                pod("podA", "127.0.0.1:9001", 100, 50),
                pod("podB", "127.0.0.1:9002", 100, 30),
            ],
        )
        .await;
        mount_stats(&server).await;

        let temp = tempfile::NamedTempFile::new().unwrap();
        let store: Arc<dyn SnapshotStore> =
            Arc::new(SqliteSnapshotStore::open(temp.path().to_str().unwrap()).unwrap());
        let pipeline = build_pipeline(&server, Some(store.clone()), None);

        // Two runs: the second replaces the first rather than appending
        pipeline.build_leaf_records().await.unwrap();
        let leaves = pipeline.build_leaf_records().await.unwrap();

        let stored = store.load_leaf_records().await.unwrap();
        assert_eq!(stored, leaves);

        let summary = pipeline.build_root_summary().await.unwrap();
        assert_eq!(summary.total_storage_committed, 200);
        assert_eq!(summary.total_storage_used, 80);
        assert_eq!(summary.average_storage_per_pod, 100.0);
        assert_eq!(summary.utilization_rate, 40.0);
    }
}
