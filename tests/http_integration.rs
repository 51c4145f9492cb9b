//! Integration tests for the signed OCI REST client using wiremock
//!
//! These tests verify request signing, pagination, error decoding and the
//! instance principal token exchange against mocked endpoints.

use ocimetrics::metrics::MetricsClient;
use ocimetrics::oci::api::{ApiConnector, Endpoints, MonitoringApi, OciConnector, OciRestApi};
use ocimetrics::oci::auth::{self, AuthSettings, AuthType};
use ocimetrics::oci::federation::{fetch_instance_identity, FederationClient, InstanceIdentity};
use ocimetrics::oci::http::{format_oci_error, OciHttpClient, ServiceError};
use ocimetrics::oci::models::{ListMetricsDetails, SummarizeMetricsDataDetails};
use ocimetrics::oci::signer::{load_private_key, RequestSigner};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const KEY_PEM: &str = include_str!("fixtures/test_key_pkcs8.pem");
const CERT_PEM: &str = include_str!("fixtures/test_leaf_cert.pem");

const TENANCY: &str = "ocid1.tenancy.oc1..aaaatenancy";

fn signer() -> Arc<RequestSigner> {
    let key_pair = load_private_key(KEY_PEM).unwrap();
    Arc::new(RequestSigner::api_key(
        key_pair,
        TENANCY,
        "ocid1.user.oc1..aaaauser",
        "20:3b:97:13:55:1c:5b:0d:d3:37:d8:50:4e:c5:3a:34",
    ))
}

fn rest_api(server: &MockServer) -> OciRestApi {
    let http = OciHttpClient::new(reqwest::Client::new(), signer());
    OciRestApi::new(http, Endpoints::with_base(&server.uri()))
}

fn authorization(request: &Request) -> String {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Test module for REST client integration tests
mod rest_client_tests {
    use super::*;

    /// GET requests are signed over date, request target and host
    #[tokio::test]
    async fn test_get_is_signed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/20160918/tenancies/{}", TENANCY)))
            .and(header_exists("date"))
            .and(header_exists("opc-request-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": TENANCY,
                "name": "acme",
                "description": "root"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tenancy = rest_api(&server).get_tenancy(TENANCY).await.unwrap();
        assert_eq!(tenancy.name, "acme");

        let requests = server.received_requests().await.unwrap();
        let auth = authorization(&requests[0]);
        assert!(auth.starts_with("Signature version=\"1\""));
        assert!(auth.contains(&format!("keyId=\"{}/ocid1.user.oc1..aaaauser/", TENANCY)));
        assert!(auth.contains("algorithm=\"rsa-sha256\""));
        assert!(auth.contains("headers=\"date (request-target) host\""));
    }

    /// POST requests also sign the body headers
    #[tokio::test]
    async fn test_post_signs_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/20180401/metrics/actions/summarizeMetricsData"))
            .and(query_param("compartmentId", "ocid1.compartment.prod"))
            .and(header_exists("x-content-sha256"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({
                "namespace": "oci_computeagent",
                "query": "CpuUtilization[1h].mean()",
                "startTime": "2024-01-01T00:00:00.000Z"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "name": "CpuUtilization",
                    "namespace": "oci_computeagent",
                    "compartmentId": "ocid1.compartment.prod",
                    "dimensions": {"resourceId": "ocid1.instance.a"},
                    "metadata": {"unit": "percent"},
                    "resolution": "1h",
                    "aggregatedDatapoints": [
                        {"timestamp": "2024-01-01T00:00:00.000Z", "value": 12.5},
                        {"timestamp": "2024-01-01T01:00:00.000Z", "value": 0.1}
                    ]
                }
            ])))
            .mount(&server)
            .await;

        let details = SummarizeMetricsDataDetails {
            namespace: "oci_computeagent".to_string(),
            query: "CpuUtilization[1h].mean()".to_string(),
            start_time: "2024-01-01T00:00:00.000Z".to_string(),
            end_time: "2024-01-02T00:00:00.000Z".to_string(),
            resolution: None,
        };
        let records = rest_api(&server)
            .summarize_metrics_data("ocid1.compartment.prod", &details)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].aggregated_datapoints[1].value, 0.1);

        let requests = server.received_requests().await.unwrap();
        assert!(authorization(&requests[0])
            .contains("headers=\"date (request-target) host content-length content-type x-content-sha256\""));
    }

    /// Compartment listing follows opc-next-page across pages
    #[tokio::test]
    async fn test_compartment_pagination() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/20160918/tenancies/{}", TENANCY)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": TENANCY, "name": "acme"})))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/20160918/compartments"))
            .and(query_param("compartmentIdInSubtree", "true"))
            .and(query_param("accessLevel", "ACCESSIBLE"))
            .and(query_param_is_missing("page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("opc-next-page", "page-2")
                    .set_body_json(json!([
                        {"id": "ocid1.compartment.prod", "name": "prod", "compartmentId": TENANCY, "lifecycleState": "ACTIVE"}
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/20160918/compartments"))
            .and(query_param("page", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "ocid1.compartment.web", "name": "web", "compartmentId": "ocid1.compartment.prod"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = MetricsClient::new(Arc::new(rest_api(&server)), "us-ashburn-1", TENANCY);
        let compartments = client.list_compartments().await.unwrap();

        let paths: Vec<&str> = compartments.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["acme (root)", "acme/prod", "acme/prod/web"]);
    }

    /// listMetrics body carries the filters
    #[tokio::test]
    async fn test_list_metrics_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/20180401/metrics/actions/listMetrics"))
            .and(body_partial_json(json!({
                "namespace": "oci_computeagent",
                "groupBy": ["resourceGroup"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "CpuUtilization", "namespace": "oci_computeagent", "resourceGroup": "web"},
                {"name": "CpuUtilization", "namespace": "oci_computeagent"}
            ])))
            .mount(&server)
            .await;

        let client = MetricsClient::new(Arc::new(rest_api(&server)), "us-ashburn-1", TENANCY);
        let groups = client
            .list_resource_groups("ocid1.compartment.prod", "oci_computeagent")
            .await
            .unwrap();
        assert_eq!(groups, vec!["web"]);

        let details = ListMetricsDetails {
            namespace: Some("oci_computeagent".to_string()),
            group_by: Some(vec!["resourceGroup".to_string()]),
            ..Default::default()
        };
        let page = rest_api(&server)
            .list_metrics("ocid1.compartment.prod", &details, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.next_page.is_none());
    }

    /// Non-2xx responses decode into ServiceError
    #[tokio::test]
    async fn test_service_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/20160918/tenancies/{}/regionSubscriptions", TENANCY)))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("opc-request-id", "req-123")
                    .set_body_json(json!({
                        "code": "NotAuthorizedOrNotFound",
                        "message": "Authorization failed or requested resource not found."
                    })),
            )
            .mount(&server)
            .await;

        let err = rest_api(&server)
            .list_region_subscriptions(TENANCY)
            .await
            .unwrap_err();

        let service = err.downcast_ref::<ServiceError>().expect("service error");
        assert_eq!(service.status, 404);
        assert_eq!(service.code, "NotAuthorizedOrNotFound");
        assert_eq!(service.opc_request_id.as_deref(), Some("req-123"));
        assert_eq!(
            format_oci_error(&err),
            "Resource not found or not authorized. (404 Authorization failed or requested resource not found.)"
        );
    }

    /// Non-JSON error bodies still produce a ServiceError
    #[tokio::test]
    async fn test_service_error_plain_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let err = rest_api(&server).get_tenancy(TENANCY).await.unwrap_err();
        let service = err.downcast_ref::<ServiceError>().expect("service error");
        assert_eq!(service.status, 503);
        assert_eq!(service.code, "Unknown");
        assert!(format_oci_error(&err).starts_with("OCI service temporarily unavailable"));
    }

    /// The connector routes every region to the base URL and rejects bad names
    #[tokio::test]
    async fn test_connector() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/20160918/tenancies/{}/regionSubscriptions", TENANCY)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"regionKey": "IAD", "regionName": "us-ashburn-1", "status": "READY", "isHomeRegion": true}
            ])))
            .mount(&server)
            .await;

        let connector = OciConnector::new(reqwest::Client::new(), signer()).with_base_url(&server.uri());
        let api = connector.connect("us-ashburn-1").unwrap();
        let regions = api.list_region_subscriptions(TENANCY).await.unwrap();
        assert_eq!(regions[0].region_name, "us-ashburn-1");

        let err = connector.connect("Not A Region").err().unwrap();
        assert!(err.to_string().contains("Invalid region name"));
    }
}

/// Instance principal token exchange
mod federation_tests {
    use super::*;

    fn jwt(claims: serde_json::Value) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    #[tokio::test]
    async fn test_fetch_instance_identity() {
        let server = MockServer::start().await;

        for (route, body) in [
            ("/instance/canonicalRegionName", "us-ashburn-1\n"),
            ("/identity/cert.pem", CERT_PEM),
            ("/identity/key.pem", KEY_PEM),
            ("/identity/intermediate.pem", CERT_PEM),
        ] {
            Mock::given(method("GET"))
                .and(path(route))
                .and(header("authorization", "Bearer Oracle"))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }

        let identity = fetch_instance_identity(&reqwest::Client::new(), &server.uri())
            .await
            .unwrap();
        assert_eq!(identity.region, "us-ashburn-1");
        assert_eq!(identity.tenancy_id, "ocid1.tenancy.oc1..aaaatenancytest");
    }

    #[tokio::test]
    async fn test_metadata_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetch_instance_identity(&reqwest::Client::new(), &server.uri())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("canonicalRegionName"));
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let server = MockServer::start().await;
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = jwt(json!({"exp": exp, "res_tenant": "t"}));

        Mock::given(method("POST"))
            .and(path("/v1/x509"))
            .and(header_exists("x-content-sha256"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
            .expect(1)
            .mount(&server)
            .await;

        let identity = InstanceIdentity::from_pem("us-ashburn-1", CERT_PEM, KEY_PEM, CERT_PEM).unwrap();
        let federation = FederationClient::with_endpoint(
            reqwest::Client::new(),
            identity,
            &format!("{}/v1/x509", server.uri()),
        );

        assert_eq!(federation.token().await.unwrap(), token);
        assert_eq!(federation.token().await.unwrap(), token);

        let requests = server.received_requests().await.unwrap();
        let auth = authorization(&requests[0]);
        assert!(auth.contains("keyId=\"ocid1.tenancy.oc1..aaaatenancytest/fed-x509/82:04:E4:87"));
        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert!(body["certificate"].as_str().unwrap().len() > 100);
        assert!(body["publicKey"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_federation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "NotAuthenticated",
                "message": "certificate rejected"
            })))
            .mount(&server)
            .await;

        let identity = InstanceIdentity::from_pem("us-ashburn-1", CERT_PEM, KEY_PEM, CERT_PEM).unwrap();
        let federation = FederationClient::with_endpoint(reqwest::Client::new(), identity, &server.uri());

        let err = federation.token().await.unwrap_err();
        assert!(err.to_string().contains("certificate rejected"));
    }
}

/// Credential resolution from files on disk
mod config_file_tests {
    use super::*;

    fn write_key(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("key.pem");
        std::fs::write(&path, KEY_PEM).unwrap();
        path
    }

    #[tokio::test]
    async fn test_config_file_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(&dir);
        let mut config = tempfile::NamedTempFile::new().unwrap();
        write!(
            config,
            "[DEFAULT]\nregion=us-ashburn-1\ntenancy={}\n\n[PROD]\nuser=ocid1.user.oc1..u\nfingerprint=aa:bb\nkey_file={}\nregion=eu-frankfurt-1\n",
            TENANCY,
            key.display()
        )
        .unwrap();

        let settings = AuthSettings {
            auth_type: Some(AuthType::ConfigFile),
            config_file: config.path().to_path_buf(),
            profile: "PROD".to_string(),
            region: None,
        };
        let credentials = auth::resolve_credentials(&settings, &reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(credentials.info.auth_type, AuthType::ConfigFile);
        assert_eq!(credentials.info.tenancy_id, TENANCY);
        assert_eq!(credentials.info.region, "eu-frankfurt-1");
        assert_eq!(
            credentials.signer.key_id().await.unwrap(),
            format!("{}/ocid1.user.oc1..u/aa:bb", TENANCY)
        );

        let overridden = AuthSettings {
            region: Some("ap-tokyo-1".to_string()),
            ..settings
        };
        let credentials = auth::resolve_credentials(&overridden, &reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(credentials.info.region, "ap-tokyo-1");
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let mut config = tempfile::NamedTempFile::new().unwrap();
        write!(config, "[DEFAULT]\nregion=us-ashburn-1\ntenancy={}\n", TENANCY).unwrap();

        let settings = AuthSettings {
            config_file: config.path().to_path_buf(),
            ..Default::default()
        };
        let err = auth::from_config_file(&settings, |_| None).err().unwrap();
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_security_token_credentials_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(&dir);
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "session-token\n").unwrap();

        let mut config = tempfile::NamedTempFile::new().unwrap();
        write!(
            config,
            "[DEFAULT]\nregion=us-ashburn-1\ntenancy={}\nuser=ocid1.user.oc1..u\nfingerprint=aa:bb\nkey_file={}\nsecurity_token_file={}\n",
            TENANCY,
            key.display(),
            token_path.display()
        )
        .unwrap();
        let settings = AuthSettings {
            config_file: config.path().to_path_buf(),
            ..Default::default()
        };

        let credentials = auth::from_security_token(&settings, |_| None).unwrap();
        assert_eq!(credentials.info.auth_type, AuthType::SecurityToken);

        std::fs::remove_file(&token_path).unwrap();
        let credentials = auth::from_security_token(&settings, |_| None).unwrap();
        assert_eq!(credentials.info.auth_type, AuthType::ConfigFile);
    }
}
