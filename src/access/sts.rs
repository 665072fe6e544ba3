//! STS `AssumeRoleWithWebIdentity` backend (AWS and `MinIO`).
//!
//! Both services speak the same query protocol: a form-encoded POST whose
//! XML response carries `AccessKeyId`, `SecretAccessKey`, `SessionToken`
//! and `Expiration`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{AccessProvider, AccessRequest, IssuedCredentials};
use crate::broker::document::{AccessProviderConfig, AccessProviderKind};
use crate::{Error, Result};

const STS_API_VERSION: &str = "2011-06-15";

/// AWS STS rejects lifetimes below 15 minutes.
const MIN_DURATION_SECS: u64 = 900;

/// Web-identity STS client.
#[derive(Debug, Clone)]
pub struct StsAccessProvider {
    name: String,
    kind: AccessProviderKind,
    endpoint: Url,
    default_role_arn: Option<String>,
    http: reqwest::Client,
}

impl StsAccessProvider {
    /// Build from a `minio` or `aws-sts` configuration entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDocument`] when the endpoint is missing
    /// (`MinIO`) or is not a valid URL.
    pub fn from_config(config: &AccessProviderConfig, http: reqwest::Client) -> Result<Self> {
        let endpoint = match (config.kind, config.endpoint.as_deref()) {
            (_, Some(endpoint)) => endpoint.to_string(),
            (AccessProviderKind::AwsSts, None) => match config.region.as_deref() {
                Some(region) => format!("https://sts.{region}.amazonaws.com"),
                None => "https://sts.amazonaws.com".to_string(),
            },
            _ => {
                return Err(Error::InvalidDocument(format!(
                    "access provider '{}' needs an endpoint",
                    config.name
                )));
            }
        };

        let endpoint = Url::parse(&endpoint).map_err(|e| {
            Error::InvalidDocument(format!(
                "access provider '{}' has an invalid endpoint: {e}",
                config.name
            ))
        })?;

        if endpoint.scheme() != "https" {
            warn!(provider = %config.name, endpoint = %endpoint, "STS endpoint does not use HTTPS");
        }

        Ok(Self {
            name: config.name.clone(),
            kind: config.kind,
            endpoint,
            default_role_arn: config.role_arn.clone(),
            http,
        })
    }

    /// Resolved service endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AccessProvider for StsAccessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mint(&self, request: &AccessRequest<'_>) -> Result<IssuedCredentials> {
        let role_arn = request
            .role_arn
            .map(str::to_string)
            .or_else(|| self.default_role_arn.clone());

        if self.kind == AccessProviderKind::AwsSts && role_arn.is_none() {
            return Err(Error::mint(&self.name, "AWS STS requires a roleArn"));
        }

        let duration = request.duration.as_secs().max(MIN_DURATION_SECS).to_string();
        let mut form = vec![
            ("Action", "AssumeRoleWithWebIdentity"),
            ("Version", STS_API_VERSION),
            ("WebIdentityToken", request.web_identity_token),
            ("DurationSeconds", duration.as_str()),
            ("RoleSessionName", request.session_name.as_str()),
        ];
        if let Some(ref arn) = role_arn {
            form.push(("RoleArn", arn.as_str()));
        }

        debug!(
            provider = %self.name,
            key = %request.key_name,
            endpoint = %self.endpoint,
            "Calling AssumeRoleWithWebIdentity"
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::mint(&self.name, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::mint(&self.name, e.to_string()))?;

        if !status.is_success() {
            let detail = parse_error(&body).unwrap_or_else(|| format!("HTTP {status}"));
            return Err(Error::mint(&self.name, detail));
        }

        let mut issued = parse_credentials(&body).map_err(|e| Error::mint(&self.name, e))?;
        if self.kind == AccessProviderKind::Minio {
            issued
                .fields
                .insert("Endpoint".to_string(), self.endpoint.to_string());
        }
        Ok(issued)
    }
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "AssumeRoleWithWebIdentityResult")]
    result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Error")]
    error: StsError,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse a successful `AssumeRoleWithWebIdentity` response.
fn parse_credentials(body: &str) -> std::result::Result<IssuedCredentials, String> {
    let parsed: AssumeRoleResponse =
        quick_xml::de::from_str(body).map_err(|e| format!("malformed STS response: {e}"))?;
    let creds = parsed.result.credentials;

    let expires_at = DateTime::parse_from_rfc3339(creds.expiration.trim())
        .map_err(|e| format!("invalid Expiration '{}': {e}", creds.expiration))?
        .with_timezone(&Utc);

    let mut fields = BTreeMap::new();
    fields.insert("AccessKeyId".to_string(), creds.access_key_id);
    fields.insert("SecretAccessKey".to_string(), creds.secret_access_key);
    fields.insert("SessionToken".to_string(), creds.session_token);
    fields.insert("Expiration".to_string(), expires_at.to_rfc3339());

    Ok(IssuedCredentials { fields, expires_at })
}

/// Extract `Code: Message` from an STS `ErrorResponse`, if the body is one.
fn parse_error(body: &str) -> Option<String> {
    let parsed: ErrorResponse = quick_xml::de::from_str(body).ok()?;
    match (parsed.error.code, parsed.error.message) {
        (Some(code), Some(message)) => Some(format!("{code}: {message}")),
        (Some(single), None) | (None, Some(single)) => Some(single),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS: &str = r#"<AssumeRoleWithWebIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleWithWebIdentityResult>
    <AssumedRoleUser>
      <Arn>arn:aws:sts::123456789012:assumed-role/voidkey/user-alice</Arn>
      <AssumedRoleId>AROA:user-alice</AssumedRoleId>
    </AssumedRoleUser>
    <Credentials>
      <AccessKeyId>ASIAEXAMPLE</AccessKeyId>
      <SecretAccessKey>wJalrXUtnFEMI</SecretAccessKey>
      <SessionToken>FwoGZXIvYXdzEXAMPLE</SessionToken>
      <Expiration>2026-10-17T12:00:00Z</Expiration>
    </Credentials>
    <SubjectFromWebIdentityToken>user:alice</SubjectFromWebIdentityToken>
  </AssumeRoleWithWebIdentityResult>
  <ResponseMetadata>
    <RequestId>c6104cbe-af31-11e0-8154-cbc7ccf896c7</RequestId>
  </ResponseMetadata>
</AssumeRoleWithWebIdentityResponse>"#;

    const FAILURE: &str = r#"<ErrorResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <Error>
    <Type>Sender</Type>
    <Code>InvalidIdentityToken</Code>
    <Message>Token signature invalid</Message>
  </Error>
  <RequestId>abc</RequestId>
</ErrorResponse>"#;

    fn config(kind: AccessProviderKind, endpoint: Option<&str>, region: Option<&str>) -> AccessProviderConfig {
        AccessProviderConfig {
            name: "sts".to_string(),
            kind,
            endpoint: endpoint.map(str::to_string),
            region: region.map(str::to_string),
            role_arn: None,
        }
    }

    #[test]
    fn parses_success_response() {
        let issued = parse_credentials(SUCCESS).unwrap();

        assert_eq!(issued.fields["AccessKeyId"], "ASIAEXAMPLE");
        assert_eq!(issued.fields["SessionToken"], "FwoGZXIvYXdzEXAMPLE");
        assert_eq!(issued.expires_at.to_rfc3339(), "2026-10-17T12:00:00+00:00");
    }

    #[test]
    fn malformed_response_is_an_error() {
        assert!(parse_credentials("<html>nope</html>").is_err());
    }

    #[test]
    fn parses_error_response() {
        assert_eq!(
            parse_error(FAILURE).as_deref(),
            Some("InvalidIdentityToken: Token signature invalid")
        );
        assert!(parse_error("not xml at all").is_none());
    }

    #[test]
    fn aws_endpoint_defaults_from_region() {
        let regional = StsAccessProvider::from_config(
            &config(AccessProviderKind::AwsSts, None, Some("eu-west-1")),
            reqwest::Client::new(),
        )
        .unwrap();
        let global = StsAccessProvider::from_config(
            &config(AccessProviderKind::AwsSts, None, None),
            reqwest::Client::new(),
        )
        .unwrap();

        assert_eq!(regional.endpoint().as_str(), "https://sts.eu-west-1.amazonaws.com/");
        assert_eq!(global.endpoint().as_str(), "https://sts.amazonaws.com/");
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let result = StsAccessProvider::from_config(
            &config(AccessProviderKind::Minio, Some("not a url"), None),
            reqwest::Client::new(),
        );

        assert!(matches!(result, Err(Error::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn aws_mint_without_role_fails_before_network() {
        let provider = StsAccessProvider::from_config(
            &config(AccessProviderKind::AwsSts, Some("http://127.0.0.1:9"), None),
            reqwest::Client::new(),
        )
        .unwrap();
        let request = AccessRequest {
            key_name: "AWS_CREDENTIALS",
            subject: "user:alice",
            web_identity_token: "token",
            duration: std::time::Duration::from_secs(3600),
            role_arn: None,
            session_name: "user-alice".to_string(),
        };

        let err = provider.mint(&request).await.unwrap_err();

        assert!(err.to_string().contains("roleArn"));
    }
}
