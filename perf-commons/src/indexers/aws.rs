use std::time::SystemTime;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4::SigningParams;
use aws_smithy_runtime_api::client::identity::Identity;
use reqwest::header::HeaderValue;

use crate::error::{Error, Result};

/// SigV4 request signer for managed OpenSearch domains and collections.
///
/// Credentials are resolved once, from the default AWS provider chain.
#[derive(Clone)]
pub struct AwsSigner {
    credentials: Credentials,
    region: String,
    service: &'static str,
}

impl std::fmt::Debug for AwsSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSigner")
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl AwsSigner {
    pub async fn from_env(service: &'static str) -> Result<Self> {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::from_sdk_config(&sdk_config, service).await
    }

    pub async fn from_sdk_config(sdk_config: &SdkConfig, service: &'static str) -> Result<Self> {
        let region = sdk_config
            .region()
            .ok_or_else(|| Error::Aws("no configured region".to_string()))?
            .to_string();
        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| Error::Aws("no credentials provider".to_string()))?;
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| Error::Aws(format!("cannot fetch credentials: {e}")))?;
        Ok(Self::new(credentials, region, service))
    }

    pub fn new(credentials: Credentials, region: impl Into<String>, service: &'static str) -> Self {
        Self {
            credentials,
            region: region.into(),
            service,
        }
    }

    pub fn sign(&self, request: &mut reqwest::Request) -> Result<()> {
        let identity: Identity = self.credentials.clone().into();
        let params = SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(self.service)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| Error::Aws(e.to_string()))?;

        let body = request
            .body()
            .and_then(|b| b.as_bytes())
            .unwrap_or_default();
        let signable = SignableRequest::new(
            request.method().as_str(),
            request.url().as_str(),
            std::iter::empty(),
            SignableBody::Bytes(body),
        )
        .map_err(|e| Error::Aws(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params.into())
            .map_err(|e| Error::Aws(format!("cannot sign request: {e}")))?
            .into_parts();

        let (headers, _query) = instructions.into_parts();
        for header in headers {
            let mut value =
                HeaderValue::from_str(header.value()).map_err(|e| Error::Aws(e.to_string()))?;
            value.set_sensitive(header.sensitive());
            request.headers_mut().insert(header.name(), value);
        }
        Ok(())
    }
}
