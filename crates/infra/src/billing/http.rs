//! HTTP billing client.
//!
//! | Endpoint | Success | Failure classification |
//! |----------|---------|------------------------|
//! | `GET {base}/validate/{customer}` | 200 + `{"valid": true}` | `valid=false` or 4xx: `CustomerRejected`; 5xx/network: `Transient` |
//! | `POST {base}/refund` `{"amount": n}` | 2xx | 4xx: `Permanent`; 5xx/network: `Transient` |
//!
//! Client-side timeouts surface as `BillingError::Timeout`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use submgr_core::CustomerId;

use crate::ports::{BillingClient, BillingError};

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
}

#[derive(Debug, Serialize)]
struct RefundRequest {
    /// Integer cents; never a float on the wire.
    amount: i64,
}

#[derive(Debug, Clone)]
pub struct HttpBillingClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpBillingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BillingError> {
        let base_url = Url::parse(base_url).map_err(|e| BillingError::Permanent {
            status: None,
            message: format!("invalid billing base url '{base_url}': {e}"),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BillingError::Permanent {
                status: None,
                message: format!("billing base url '{base_url}' cannot carry a path"),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::Permanent {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base url, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn map_reqwest_error(operation: &'static str, err: reqwest::Error) -> BillingError {
    if err.is_timeout() {
        BillingError::Timeout(operation)
    } else {
        BillingError::Transient(format!("{operation} request failed: {err}"))
    }
}

fn classify_status(operation: &str, status: StatusCode, body: &str) -> BillingError {
    let message = format!("{operation} returned {status}: {}", body.trim());
    if status.is_server_error() {
        BillingError::Transient(message)
    } else {
        BillingError::Permanent {
            status: Some(status.as_u16()),
            message,
        }
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    #[instrument(skip(self), fields(customer_id = %customer_id), err)]
    async fn validate_customer(&self, customer_id: &CustomerId) -> Result<(), BillingError> {
        let url = self.endpoint(&["validate", customer_id.as_str()]);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error("validate_customer", e))?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("validate_customer", status, &body));
        }
        if status != StatusCode::OK {
            debug!(%status, "billing refused customer");
            return Err(BillingError::CustomerRejected(customer_id.clone()));
        }

        let body: ValidateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BillingError::Timeout("validate_customer")
            } else {
                BillingError::Permanent {
                    status: Some(status.as_u16()),
                    message: format!("malformed validate response: {e}"),
                }
            }
        })?;

        if body.valid {
            Ok(())
        } else {
            Err(BillingError::CustomerRejected(customer_id.clone()))
        }
    }

    #[instrument(skip(self), err)]
    async fn process_refund(&self, amount_cents: i64) -> Result<(), BillingError> {
        let url = self.endpoint(&["refund"]);

        let response = self
            .client
            .post(url)
            .json(&RefundRequest { amount: amount_cents })
            .send()
            .await
            .map_err(|e| map_reqwest_error("process_refund", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status("process_refund", status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpBillingClient {
        HttpBillingClient::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn valid_customer_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/validate/cust-456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "valid": true })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .validate_customer(&CustomerId::new("cust-456"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_flag_rejects_customer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/validate/cust-456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "valid": false })))
            .mount(&server)
            .await;

        let err = client(&server)
            .validate_customer(&CustomerId::new("cust-456"))
            .await
            .unwrap_err();
        assert_eq!(err, BillingError::CustomerRejected(CustomerId::new("cust-456")));
    }

    #[tokio::test]
    async fn client_error_on_validate_rejects_customer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/validate/cust-unknown"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server)
            .validate_customer(&CustomerId::new("cust-unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::CustomerRejected(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_on_validate_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/validate/cust-456"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&server)
            .validate_customer(&CustomerId::new("cust-456"))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[tokio::test]
    async fn refund_posts_integer_amount() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refund"))
            .and(body_json(serde_json::json!({ "amount": 1600 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).process_refund(1600).await.unwrap();
    }

    #[tokio::test]
    async fn refund_client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refund"))
            .respond_with(ResponseTemplate::new(422).set_body_string("amount exceeds charge"))
            .mount(&server)
            .await;

        let err = client(&server).process_refund(1600).await.unwrap_err();
        match err {
            BillingError::Permanent { status, message } => {
                assert_eq!(status, Some(422));
                assert!(message.contains("amount exceeds charge"));
            }
            other => panic!("expected Permanent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refund_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refund"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = client(&server).process_refund(1600).await.unwrap_err();
        assert!(matches!(err, BillingError::Transient(_)));
    }

    #[tokio::test]
    async fn slow_billing_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refund"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = HttpBillingClient::new(&server.uri(), Duration::from_millis(100)).unwrap();
        let err = client.process_refund(1600).await.unwrap_err();
        assert_eq!(err, BillingError::Timeout("process_refund"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_billing_is_transient() {
        // Nothing listens on port 9 on the loopback in test environments.
        let client = HttpBillingClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let err = client.process_refund(100).await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[test]
    fn customer_ids_are_percent_encoded() {
        let client = HttpBillingClient::new("http://billing.local/api/", Duration::from_secs(1)).unwrap();
        let url = client.endpoint(&["validate", "cust/../admin"]);
        assert_eq!(url.as_str(), "http://billing.local/api/validate/cust%2F..%2Fadmin");
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(HttpBillingClient::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpBillingClient::new("mailto:billing@example.com", Duration::from_secs(1)).is_err());
    }
}
