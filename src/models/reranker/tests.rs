use super::*;
use crate::config::RerankerConfig;

#[test]
fn client_configuration() {
    let config = Config {
        reranker: RerankerConfig {
            protocol: "http".to_string(),
            host: "rerank-host".to_string(),
            port: 9090,
            ..RerankerConfig::default()
        },
        ..Config::default()
    };
    let client = RerankClient::new(&config).expect("Failed to create client");

    assert_eq!(client.base_url.host_str(), Some("rerank-host"));
    assert_eq!(client.base_url.port(), Some(9090));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let config = Config::default();
    let client = RerankClient::new(&config)
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(10))
        .with_retry_attempts(1);

    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn rerank_score_deserialization() {
    let json = r#"[{"index":1,"score":0.92},{"index":0,"score":0.41}]"#;
    let scores: Vec<RerankScore> = serde_json::from_str(json).expect("can parse scores");

    assert_eq!(scores.len(), 2);
    assert_eq!(scores[0].index, 1);
    assert!((scores[0].score - 0.92).abs() < 1e-6);
    assert_eq!(scores[1].index, 0);
}

#[test]
fn rerank_request_serialization() {
    let texts = vec!["first passage".to_string(), "second passage".to_string()];
    let request = RerankRequest {
        query: "what is inertia",
        texts: &texts,
    };

    let json = serde_json::to_string(&request).expect("can serialize request");
    assert!(json.contains("\"query\":\"what is inertia\""));
    assert!(json.contains("\"texts\":[\"first passage\",\"second passage\"]"));
}
