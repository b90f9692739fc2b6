// End-to-end behaviour of the HTTP boundary, filter chain and invocation bridge
mod common;

#[cfg(test)]
mod test {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex, mpsc},
        time::Duration,
    };

    use axum::{
        body::Body,
        http::{Request, StatusCode, Version},
    };
    use rpcgate::{
        GatewayService, GatewayStatus,
        config::{GatewayConfig, WorkerPoolConfig},
        core::{
            Filter, FilterFlow, FilterRegistry, RequestContext, filter::FilterError,
            name_table::NameTable,
        },
    };
    use serde_json::Value;

    use crate::common::{
        Explode, Gate, Log, Recorder, Reject, ScriptedInvoker, body_json, gateway, post, router, send,
    };

    fn recording_registry(log: &Log) -> FilterRegistry {
        let mut registry = FilterRegistry::with_builtins();
        for name in ["outer", "inner"] {
            let log = log.clone();
            registry.register(name, move |_| {
                Box::new(Recorder {
                    name: name.to_string(),
                    log: log.clone(),
                })
            });
        }
        registry
    }

    #[tokio::test]
    async fn test_foreign_application_is_not_handled() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let app = router(gateway(
            GatewayConfig::default(),
            FilterRegistry::default(),
            invoker.clone(),
        ));

        let response = send(&app, post("/other/app1/Svc/method", "{}")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], 404);
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_segment_count_is_illegal() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let app = router(gateway(
            GatewayConfig::default(),
            FilterRegistry::default(),
            invoker.clone(),
        ));

        for uri in [
            "/gw/app1/Svc",
            "/gw/app1/Svc/m/extra",
            "/gw/app1/Svc/m/",
            "/gw/app1//m",
        ] {
            let response = send(&app, post(uri, "{}")).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body_json(response).await["message"], "Illegal request");
        }
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unmapped_service_falls_back_to_raw_token() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let app = router(gateway(
            GatewayConfig::default(),
            FilterRegistry::default(),
            invoker.clone(),
        ));

        let response = send(&app, post("/gw/app1/OrderService/getOrder", r#"{"id":1}"#)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let envelope = body_json(response).await;
        assert_eq!(envelope["application"], "app1");
        assert_eq!(envelope["service"], "OrderService");
        assert_eq!(envelope["method"], "getOrder");
        assert_eq!(envelope["arguments"]["id"], 1);
    }

    #[tokio::test]
    async fn test_mapped_service_and_parameter_overrides() {
        let names = Arc::new(NameTable::from_map(HashMap::from([(
            "app1".to_string(),
            HashMap::from([(
                "OrderService".to_string(),
                "com.acme.OrderService".to_string(),
            )]),
        )])));
        let config = GatewayConfig::builder()
            .default_group("core")
            .default_version("1.0.0")
            .build();
        let invoker = Arc::new(ScriptedInvoker::default());
        let gateway = Arc::new(
            GatewayService::builder(Arc::new(config))
                .invoker(invoker.clone())
                .names(names)
                .build()
                .unwrap(),
        );
        let app = router(gateway);

        let response = send(&app, post("/gw/app1/OrderService/getOrder", "")).await;
        let envelope = body_json(response).await;
        assert_eq!(envelope["service"], "com.acme.OrderService");
        assert_eq!(envelope["group"], "core");
        assert_eq!(envelope["version"], "1.0.0");
        assert_eq!(envelope["arguments"], Value::Null);

        let response = send(
            &app,
            post("/gw/app1/OrderService/getOrder?version=2.0&group=", ""),
        )
        .await;
        let envelope = body_json(response).await;
        assert_eq!(envelope["version"], "2.0");
        assert_eq!(envelope["group"], "core");
    }

    #[tokio::test]
    async fn test_post_phases_run_in_reverse_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let config = GatewayConfig::builder()
            .filter("outer", 5)
            .filter("inner", 50)
            .build();
        let app = router(gateway(
            config,
            recording_registry(&log),
            Arc::new(ScriptedInvoker::default()),
        ));

        let response = send(&app, post("/gw/app1/Svc/thread", "{}")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre:outer", "pre:inner", "post:inner", "post:outer"]
        );
    }

    #[tokio::test]
    async fn test_halting_filter_skips_inner_stages() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = recording_registry(&log);
        registry.register("reject", |_| Box::new(Reject(GatewayStatus::IllegalRequest)));
        let config = GatewayConfig::builder()
            .filter("outer", 5)
            .filter("reject", 25)
            .filter("inner", 50)
            .build();
        let invoker = Arc::new(ScriptedInvoker::default());
        let app = router(gateway(config, registry, invoker.clone()));

        let response = send(&app, post("/gw/app1/Svc/m", "{}")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(*log.lock().unwrap(), vec!["pre:outer", "post:outer"]);
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_is_call_service_error() {
        let app = router(gateway(
            GatewayConfig::default(),
            FilterRegistry::default(),
            Arc::new(ScriptedInvoker::default()),
        ));

        let response = send(&app, post("/gw/app1/Svc/fail", "{}")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["message"], "Call service error");
    }

    #[tokio::test]
    async fn test_missing_completion_handle_still_answers() {
        let app = router(gateway(
            GatewayConfig::default(),
            FilterRegistry::default(),
            Arc::new(ScriptedInvoker::default()),
        ));

        let response = send(&app, post("/gw/app1/Svc/unavailable", "{}")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            body_json(response).await["message"],
            GatewayStatus::InvokeUnavailable.message()
        );
    }

    #[tokio::test]
    async fn test_hanging_invocation_times_out() {
        let config = GatewayConfig::builder().rpc_timeout(Some("100ms")).build();
        let app = router(gateway(
            config,
            FilterRegistry::default(),
            Arc::new(ScriptedInvoker::default()),
        ));

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            send(&app, post("/gw/app1/Svc/hang", "{}")),
        )
        .await
        .expect("gateway never answered");

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_request_id_travels_to_provider_and_back() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let app = router(gateway(
            GatewayConfig::default(),
            FilterRegistry::default(),
            invoker.clone(),
        ));

        let request = Request::builder()
            .method("POST")
            .uri("/gw/app1/Svc/m")
            .header("x-request-id", "trace-42")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;

        assert_eq!(response.headers().get("x-request-id").unwrap(), "trace-42");
        let call = invoker.last_call().unwrap();
        assert!(
            call.attachments
                .iter()
                .any(|(k, v)| k == "x-request-id" && v == "trace-42")
        );
    }

    #[tokio::test]
    async fn test_http10_request_is_closed() {
        let app = router(gateway(
            GatewayConfig::default(),
            FilterRegistry::default(),
            Arc::new(ScriptedInvoker::default()),
        ));

        let request = Request::builder()
            .method("POST")
            .version(Version::HTTP_10)
            .uri("/gw/app1/Svc/m")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("connection").unwrap(), "close");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pooled_chain_answers_from_worker() {
        let config = GatewayConfig::builder()
            .worker_pool(WorkerPoolConfig {
                core_threads: 2,
                max_threads: 4,
                keep_alive: "1s".to_string(),
                queue_capacity: 8,
            })
            .build();
        let gateway = gateway(
            config,
            FilterRegistry::default(),
            Arc::new(ScriptedInvoker::default()),
        );
        let app = router(gateway.clone());

        for method in ["m", "thread"] {
            let response = send(&app, post(&format!("/gw/app1/Svc/{method}"), "{}")).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        gateway.shutdown().await;
        let response = send(&app, post("/gw/app1/Svc/m", "{}")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_saturated_pool_rejects_fast() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });

        let mut registry = FilterRegistry::empty();
        registry.register("gate", move |_| {
            Box::new(SharedGate(gate.clone())) as Box<dyn Filter>
        });
        let config = GatewayConfig::builder()
            .filters(vec![])
            .filter("gate", 10)
            .worker_pool(WorkerPoolConfig {
                core_threads: 1,
                max_threads: 1,
                keep_alive: "1s".to_string(),
                queue_capacity: 0,
            })
            .build();
        let invoker = Arc::new(ScriptedInvoker::default());
        let app = router(gateway(config, registry, invoker.clone()));

        let first = {
            let app = app.clone();
            tokio::spawn(async move { send(&app, post("/gw/app1/Svc/m", "{}")).await })
        };
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first request never reached the worker");

        let rejected = send(&app, post("/gw/app1/Svc/m", "{}")).await;
        assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(rejected).await["message"],
            GatewayStatus::ServerBusy.message()
        );

        release_tx.send(()).unwrap();
        let first = first.await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_json(first).await["gate"], "open");
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_filter_still_answers() {
        let pooled = WorkerPoolConfig {
            core_threads: 1,
            max_threads: 2,
            keep_alive: "1s".to_string(),
            queue_capacity: 2,
        };
        for worker_pool in [None, Some(pooled)] {
            let mut registry = FilterRegistry::with_builtins();
            registry.register("explode", |_| Box::new(Explode));
            let mut builder = GatewayConfig::builder().filter("explode", 15);
            if let Some(pool) = worker_pool.clone() {
                builder = builder.worker_pool(pool);
            }
            let invoker = Arc::new(ScriptedInvoker::default());
            let app = router(gateway(builder.build(), registry, invoker.clone()));

            let response = tokio::time::timeout(
                Duration::from_secs(5),
                send(&app, post("/gw/app1/Svc/m", "{}")),
            )
            .await
            .expect("gateway never answered");

            let mode = if worker_pool.is_some() { "pooled" } else { "inline" };
            assert_eq!(
                response.status(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "{mode}"
            );
            assert_eq!(invoker.call_count(), 0, "{mode}");
        }
    }

    /// Registry factories build a fresh filter per chain; this one forwards
    /// to a gate owned by the test.
    struct SharedGate(Arc<Gate>);

    impl Filter for SharedGate {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn pre_filter(&self, ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
            self.0.pre_filter(ctx)
        }
    }
}
