use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Serialize;

use crate::error::CheckoutError;
use crate::gateway::PaymentGateway;
use crate::models::{Config, InitializeResponse, VerifyResponse};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeBody<'a> {
    item_id: &'a str,
}

/// [PaymentGateway] backed by the marketplace REST API
pub struct RestPaymentGateway {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl RestPaymentGateway {
    pub fn new(config: &Config) -> Result<Self, CheckoutError> {
        // A base without a trailing slash would lose its last segment on join
        let mut base = config.gateway_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url =
            Url::parse(&base).map_err(|e| CheckoutError::InvalidUrl(format!("{base}: {e}")))?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CheckoutError> {
        self.base_url
            .join(path)
            .map_err(|e| CheckoutError::InvalidUrl(format!("{path}: {e}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl PaymentGateway for RestPaymentGateway {
    async fn initialize(&self, item_id: &str) -> Result<InitializeResponse, CheckoutError> {
        let url = self.endpoint("payments/initialize")?;
        let response = self
            .authorize(self.client.post(url))
            .json(&InitializeBody { item_id })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CheckoutError::GatewayUnavailable(e.to_string()))?;

        response
            .json::<InitializeResponse>()
            .await
            .map_err(|e| CheckoutError::GatewayUnavailable(e.to_string()))
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResponse, CheckoutError> {
        let mut url = self.endpoint("payments/verify/")?;
        url.path_segments_mut()
            .map_err(|_| CheckoutError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(reference);

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CheckoutError::VerificationUnavailable(e.to_string()))?;

        response
            .json::<VerifyResponse>()
            .await
            .map_err(|e| CheckoutError::VerificationUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(url: &str) -> RestPaymentGateway {
        RestPaymentGateway::new(&Config::new(url.to_string(), "/tmp".to_string())).unwrap()
    }

    #[test]
    fn test_endpoints_keep_base_path() {
        let with_slash = gateway("http://localhost:5000/api/");
        let without_slash = gateway("http://localhost:5000/api");

        for gateway in [with_slash, without_slash] {
            assert_eq!(
                "http://localhost:5000/api/payments/initialize",
                gateway.endpoint("payments/initialize").unwrap().as_str()
            );
        }
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = RestPaymentGateway::new(&Config::new("::nope".to_string(), "/tmp".to_string()));
        assert!(matches!(result, Err(CheckoutError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_maps_to_domain_errors() {
        // Port 9 (discard) is closed on test hosts
        let gateway = gateway("http://127.0.0.1:9/api");

        assert!(matches!(
            gateway.initialize("item_1").await,
            Err(CheckoutError::GatewayUnavailable(_))
        ));
        assert!(matches!(
            gateway.verify("ref_1").await,
            Err(CheckoutError::VerificationUnavailable(_))
        ));
    }
}
