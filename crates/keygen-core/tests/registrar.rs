//! HTTP policy registrar against a mock policy service

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keygen_core::config::PolicySettings;
use keygen_core::registrar::RegistrarError;
use keygen_core::{HttpPolicyRegistrar, PolicyRegistrar};

fn settings(server: &MockServer) -> PolicySettings {
    PolicySettings {
        url: format!("{}/v1/policies", server.uri()),
        policy: "mrenclave={sgx_mrenclave} mrsigner={sgx_mrsigner}".into(),
        policy_name: "perf-policy-{suffix}".into(),
        policy_type: "JWT".into(),
        attestation_type: "SGX".into(),
        service_offer_id: "0b7e4a6e-1c2d-4e5f-8a9b-0c1d2e3f4a5b".into(),
        plan_id: "1c8f5b7f-2d3e-4f60-9bac-1d2e3f4a5b6c".into(),
        service_offer_plan_source_id: "2d906c80-3e4f-4071-8cbd-2e3f4a5b6c7d".into(),
        policies_per_tenant: 1,
        random_tokens: vec!["sgx_mrenclave".into(), "sgx_mrsigner".into()],
        token_length: 64,
    }
}

#[tokio::test]
async fn test_register_policy_created() {
    let server = MockServer::start().await;
    let policy_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/v1/policies"))
        .and(header("x-api-key", "management-key"))
        .and(header("accept", "application/json"))
        .and(body_partial_json(json!({
            "policy_type": "JWT",
            "attestation_type": "SGX",
            "service_offer_id": "0b7e4a6e-1c2d-4e5f-8a9b-0c1d2e3f4a5b"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "policy_id": policy_id })))
        .expect(1)
        .mount(&server)
        .await;

    let registrar = HttpPolicyRegistrar::new(settings(&server));
    assert_eq!(registrar.register_policy("management-key").await.unwrap(), policy_id);
}

#[tokio::test]
async fn test_request_body_is_rendered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "policy_id": Uuid::new_v4() })))
        .mount(&server)
        .await;

    HttpPolicyRegistrar::new(settings(&server))
        .register_policy("k")
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();

    let policy = body["policy"].as_str().unwrap();
    assert!(!policy.contains('{'));
    assert!(body["policy_name"].as_str().unwrap().starts_with("perf-policy-"));
    assert_eq!(
        requests[0].headers.get("content-type").unwrap().to_str().unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn test_non_created_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "policy_id": Uuid::new_v4() })))
        .mount(&server)
        .await;

    let err = HttpPolicyRegistrar::new(settings(&server))
        .register_policy("k")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrarError::UnexpectedStatus { status: 200, .. }));
}

#[tokio::test]
async fn test_unauthorized_body_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    match HttpPolicyRegistrar::new(settings(&server)).register_policy("k").await {
        Err(RegistrarError::UnexpectedStatus { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_policy_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "status": "created" })))
        .mount(&server)
        .await;

    let err = HttpPolicyRegistrar::new(settings(&server))
        .register_policy("k")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrarError::MalformedBody(_)));
}

#[tokio::test]
async fn test_policy_id_not_a_uuid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "policy_id": "42" })))
        .mount(&server)
        .await;

    let err = HttpPolicyRegistrar::new(settings(&server))
        .register_policy("k")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrarError::MalformedBody(_)));
}
