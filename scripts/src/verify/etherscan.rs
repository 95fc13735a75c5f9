use std::time::Duration;

use alloy::{hex, primitives::Address};
use json::JsonValue;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    constants::{EXPLORER_REQUEST_TIMEOUT_SECS, VERIFICATION_PENDING_MARKER},
    errors::ScriptError,
    tx::abi::encode_constructor_args,
    utils::{poll_with_backoff, BackoffPolicy, Cancellation},
    verify::{ContractVerifier, VerificationRequest},
};

/// Etherscan compatible explorer API client
pub struct EtherscanVerifier {
    api_url: String,
    api_key: String,
    client: Client,
    /// How the verification status is polled after submission
    status_policy: BackoffPolicy,
    cancel: Cancellation,
}

impl EtherscanVerifier {
    pub fn new(
        api_url: &str,
        api_key: &str,
        status_policy: BackoffPolicy,
        cancel: Cancellation,
    ) -> Result<Self, ScriptError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(EXPLORER_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ScriptError::Verification(e.to_string()))?;

        Ok(Self {
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            client,
            status_policy,
            cancel,
        })
    }

    /// Run a GET on the api with the given query, returning the parsed body
    async fn get(&self, query: &[(&str, &str)]) -> Result<JsonValue, ScriptError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ScriptError::Verification(e.to_string()))?;
        parse_response(response).await
    }

    /// Submit the sources, returning the GUID to poll
    async fn submit(&self, request: &VerificationRequest) -> Result<String, ScriptError> {
        let build_info = request.artifact.build_info.as_ref().ok_or_else(|| {
            ScriptError::Verification(format!(
                "no build info for {}, cannot publish its sources",
                request.artifact.contract_name
            ))
        })?;

        let form = [
            ("contractaddress", format!("{:#x}", request.address)),
            ("sourceCode", build_info.input.clone()),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", request.artifact.fully_qualified_name()),
            ("compilerversion", format!("v{}", build_info.solc_long_version)),
            // Misspelling is part of the api
            (
                "constructorArguements",
                hex::encode(encode_constructor_args(&request.constructor_args)),
            ),
        ];

        let response = self
            .client
            .post(&self.api_url)
            .query(&[
                ("module", "contract"),
                ("action", "verifysourcecode"),
                ("apikey", self.api_key.as_str()),
            ])
            .form(&form)
            .send()
            .await
            .map_err(|e| ScriptError::Verification(e.to_string()))?;
        let body = parse_response(response).await?;

        let result = body["result"].as_str().unwrap_or_default().to_string();
        if body["status"].as_str() != Some("1") {
            return Err(ScriptError::Verification(result));
        }
        Ok(result)
    }

    /// One status check, `None` while the explorer is still processing
    async fn check_status(&self, guid: &str) -> Result<Option<()>, ScriptError> {
        let body = self
            .get(&[
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .await?;

        let result = body["result"].as_str().unwrap_or_default();
        debug!("Verification {} status: {}", guid, result);
        if result.to_lowercase().contains(VERIFICATION_PENDING_MARKER) {
            return Ok(None);
        }
        if body["status"].as_str() == Some("1") {
            return Ok(Some(()));
        }
        Err(ScriptError::Verification(result.to_string()))
    }
}

impl ContractVerifier for EtherscanVerifier {
    async fn is_indexed(&self, address: Address) -> Result<bool, ScriptError> {
        let address = format!("{address:#x}");
        let body = self
            .get(&[
                ("module", "proxy"),
                ("action", "eth_getCode"),
                ("address", &address),
                ("tag", "latest"),
            ])
            .await?;

        // The proxy module answers in json-rpc shape, the result is the code
        let code = body["result"].as_str().unwrap_or_default();
        if body["status"].as_str() == Some("0") && !code.starts_with("0x") {
            // Api level refusal (bad key, rate limit, retired endpoint), waiting won't help
            return Err(ScriptError::Verification(code.to_string()));
        }
        Ok(code.starts_with("0x") && code.len() > 2)
    }

    async fn verify(&self, request: &VerificationRequest) -> Result<(), ScriptError> {
        let guid = self.submit(request).await?;
        info!("Verification of {} submitted, guid {}", request.address, guid);

        let what = format!("waiting for the verification of {}", request.address);
        let guid = guid.as_str();
        poll_with_backoff(&self.status_policy, &self.cancel, &what, move || {
            self.check_status(guid)
        })
        .await
    }
}

/// Parse an explorer answer, failing on non success http status
async fn parse_response(response: reqwest::Response) -> Result<JsonValue, ScriptError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ScriptError::Verification(e.to_string()))?;
    if !status.is_success() {
        return Err(ScriptError::Verification(format!(
            "explorer api request failed with {}: {}",
            status, text
        )));
    }

    json::parse(&text).map_err(|e| {
        ScriptError::Verification(format!("unreadable explorer response {}: {}", text, e))
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, Bytes};
    use httpmock::{Method::GET, Method::POST, MockServer};
    use serde_json::json;

    use super::*;
    use crate::{
        build::artifacts::{BuildInfo, ContractArtifact},
        deploy::ContractKind,
        verify::{classify, verify_contract, VerificationOutcome},
    };

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            Duration::from_millis(100),
        )
    }

    fn verifier(server: &MockServer) -> EtherscanVerifier {
        EtherscanVerifier::new(
            &server.url("/api"),
            "test-key",
            fast_policy(),
            Cancellation::never(),
        )
        .expect("verifier")
    }

    fn request() -> VerificationRequest {
        VerificationRequest {
            kind: ContractKind::Governor,
            address: address!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"),
            constructor_args: vec![address!("343c43a37d37dff08ae8c4a11544c718abb4fcf8")],
            artifact: ContractArtifact {
                contract_name: "MyGovernor".to_string(),
                source_name: "contracts/MyGovernor.sol".to_string(),
                bytecode: Bytes::from(vec![0x60, 0x80]),
                build_info: Some(BuildInfo {
                    solc_long_version: "0.8.17+commit.8df45f5f".to_string(),
                    input: "{\"language\":\"Solidity\"}".to_string(),
                }),
            },
        }
    }

    #[tokio::test]
    async fn functional_is_indexed_reads_proxy_code() {
        let server = MockServer::start();
        let indexed = server.mock(|when, then| {
            when.method(GET)
                .path("/api")
                .query_param("module", "proxy")
                .query_param("action", "eth_getCode")
                .query_param("address", "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d")
                .query_param("apikey", "test-key");
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x6080604052" }));
        });

        assert!(verifier(&server)
            .is_indexed(request().address)
            .await
            .expect("indexed"));
        indexed.assert_calls(1);
    }

    #[tokio::test]
    async fn functional_empty_code_is_not_indexed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api").query_param("action", "eth_getCode");
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x" }));
        });

        assert!(!verifier(&server)
            .is_indexed(request().address)
            .await
            .expect("not indexed"));
    }

    #[tokio::test]
    async fn regression_explorer_refusal_on_code_lookup_is_reported() {
        let server = MockServer::start();
        let lookup = server.mock(|when, then| {
            when.method(GET).path("/api").query_param("action", "eth_getCode");
            then.status(200).json_body(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Invalid API Key"
            }));
        });

        let policy = BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            Duration::from_secs(5),
        );
        let outcome = verify_contract(
            &verifier(&server),
            &request(),
            &policy,
            &Cancellation::never(),
        )
        .await
        .expect("outcome");

        assert_eq!(
            outcome,
            VerificationOutcome::Failed("error verifying contract: Invalid API Key".to_string())
        );
        lookup.assert_calls(1);
    }

    #[tokio::test]
    async fn functional_v2_endpoint_keeps_its_chain_id() {
        let server = MockServer::start();
        let lookup = server.mock(|when, then| {
            when.method(GET)
                .path("/v2/api")
                .query_param("chainid", "11155111")
                .query_param("action", "eth_getCode")
                .query_param("apikey", "test-key");
            then.status(200)
                .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x6080" }));
        });

        let verifier = EtherscanVerifier::new(
            &server.url("/v2/api?chainid=11155111"),
            "test-key",
            fast_policy(),
            Cancellation::never(),
        )
        .expect("verifier");
        assert!(verifier.is_indexed(request().address).await.expect("indexed"));
        lookup.assert_calls(1);
    }

    #[tokio::test]
    async fn functional_verify_submits_then_polls_status() {
        let server = MockServer::start();
        let submit = server.mock(|when, then| {
            when.method(POST)
                .path("/api")
                .query_param("module", "contract")
                .query_param("action", "verifysourcecode");
            then.status(200)
                .json_body(json!({ "status": "1", "message": "OK", "result": "guid-123" }));
        });
        let status = server.mock(|when, then| {
            when.method(GET)
                .path("/api")
                .query_param("action", "checkverifystatus")
                .query_param("guid", "guid-123");
            then.status(200)
                .json_body(json!({ "status": "1", "message": "OK", "result": "Pass - Verified" }));
        });

        verifier(&server).verify(&request()).await.expect("verified");
        submit.assert_calls(1);
        status.assert_calls(1);
    }

    #[tokio::test]
    async fn functional_already_verified_submission_classifies_as_success() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api").query_param("action", "verifysourcecode");
            then.status(200).json_body(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Contract source code already verified"
            }));
        });

        let result = verifier(&server).verify(&request()).await;
        assert!(result.as_ref().is_err_and(ScriptError::is_already_verified));
        assert_eq!(classify(result), VerificationOutcome::AlreadyVerified);
    }

    #[tokio::test]
    async fn regression_failed_status_is_a_verification_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api").query_param("action", "verifysourcecode");
            then.status(200)
                .json_body(json!({ "status": "1", "message": "OK", "result": "guid-9" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api").query_param("action", "checkverifystatus");
            then.status(200).json_body(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Fail - Unable to verify"
            }));
        });

        let error = verifier(&server)
            .verify(&request())
            .await
            .expect_err("expected failure");
        assert_eq!(
            error,
            ScriptError::Verification("Fail - Unable to verify".to_string())
        );
    }

    #[tokio::test]
    async fn regression_pending_forever_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api").query_param("action", "verifysourcecode");
            then.status(200)
                .json_body(json!({ "status": "1", "message": "OK", "result": "guid-7" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api").query_param("action", "checkverifystatus");
            then.status(200).json_body(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Pending in queue"
            }));
        });

        let error = verifier(&server)
            .verify(&request())
            .await
            .expect_err("expected timeout");
        assert!(matches!(error, ScriptError::Timeout(_)));
    }

    #[tokio::test]
    async fn regression_http_error_is_a_verification_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api");
            then.status(429).body("rate limited");
        });

        let error = verifier(&server)
            .verify(&request())
            .await
            .expect_err("expected failure");
        assert!(matches!(&error, ScriptError::Verification(msg) if msg.contains("rate limited")));
        assert!(!error.is_already_verified());
    }

    #[tokio::test]
    async fn regression_missing_build_info_never_reaches_the_explorer() {
        let server = MockServer::start();
        let submit = server.mock(|when, then| {
            when.method(POST).path("/api");
            then.status(200)
                .json_body(json!({ "status": "1", "message": "OK", "result": "guid" }));
        });

        let mut request = request();
        request.artifact.build_info = None;
        let error = verifier(&server)
            .verify(&request)
            .await
            .expect_err("expected failure");
        assert!(matches!(error, ScriptError::Verification(_)));
        submit.assert_calls(0);
    }
}
