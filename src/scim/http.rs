//! Blocking HTTPS dispatcher.
//!
//! One client per configuration file, authenticated with a client
//! certificate over rustls. Requests are strictly sequential; the engine
//! depends on the per-type dispatch order, so nothing here parallelises.

use crate::config::AppConfig;
use crate::error::TransportError;
use crate::scim::dispatcher::{
    CreateOutcome, DeleteOutcome, ScimDispatcher, UpdateOutcome,
};
use log::debug;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::time::Duration;

const SCIM_CONTENT_TYPE: &str = "application/scim+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Production dispatcher over a client-certificate TLS channel.
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
}

impl HttpDispatcher {
    /// Open the channel described by the configuration.
    ///
    /// Fails when the certificate or key cannot be read or the TLS client
    /// cannot be built; both are fatal for the configuration file.
    pub fn open(config: &AppConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder().use_rustls_tls().timeout(REQUEST_TIMEOUT);

        if let (Some(cert), Some(key)) = (&config.cert, &config.key) {
            let cert_path = config.resolve_path(cert);
            let key_path = config.resolve_path(key);
            let mut pem = std::fs::read(&cert_path).map_err(|error| {
                TransportError::new(format!(
                    "failed to read certificate {}: {error}",
                    cert_path.display()
                ))
            })?;
            let key_bytes = std::fs::read(&key_path).map_err(|error| {
                TransportError::new(format!(
                    "failed to read key {}: {error}",
                    key_path.display()
                ))
            })?;
            pem.extend_from_slice(&key_bytes);

            let identity = reqwest::Identity::from_pem(&pem).map_err(|error| {
                TransportError::new(format!("failed to load client identity: {error}"))
            })?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|error| TransportError::new(format!("failed to build TLS client: {error}")))?;

        Ok(Self {
            client,
            base_url: config.scim_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    fn resource_url(&self, endpoint: &str, uid: &str) -> String {
        format!("{}/{}/{}", self.base_url, endpoint, urlencoding::encode(uid))
    }

    fn body_of(response: Response) -> String {
        response.text().unwrap_or_default()
    }
}

/// A connection-level error has no HTTP status; anything with a status is a
/// typed outcome instead.
fn transport(error: reqwest::Error) -> TransportError {
    TransportError::new(error.to_string())
}

impl ScimDispatcher for HttpDispatcher {
    fn create(&mut self, endpoint: &str, body: &str) -> Result<CreateOutcome, TransportError> {
        let url = self.endpoint_url(endpoint);
        debug!("POST {url}");
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, SCIM_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .map_err(transport)?;

        Ok(match response.status() {
            StatusCode::CREATED => CreateOutcome::Created(Self::body_of(response)),
            StatusCode::OK => CreateOutcome::Ok(Self::body_of(response)),
            StatusCode::CONFLICT => CreateOutcome::Conflict,
            StatusCode::PAYLOAD_TOO_LARGE => CreateOutcome::PayloadTooLarge,
            StatusCode::FORBIDDEN => CreateOutcome::Forbidden,
            status => CreateOutcome::Other(status.as_u16()),
        })
    }

    fn update(
        &mut self,
        endpoint: &str,
        uid: &str,
        body: &str,
    ) -> Result<UpdateOutcome, TransportError> {
        let url = self.resource_url(endpoint, uid);
        debug!("PUT {url}");
        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, SCIM_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .map_err(transport)?;

        Ok(match response.status() {
            StatusCode::OK => UpdateOutcome::Ok(Self::body_of(response)),
            StatusCode::NOT_FOUND => UpdateOutcome::NotFound,
            StatusCode::FORBIDDEN => UpdateOutcome::Forbidden,
            StatusCode::PAYLOAD_TOO_LARGE => UpdateOutcome::PayloadTooLarge,
            status => UpdateOutcome::Other(status.as_u16()),
        })
    }

    fn delete(&mut self, endpoint: &str, uid: &str) -> Result<DeleteOutcome, TransportError> {
        let url = self.resource_url(endpoint, uid);
        debug!("DELETE {url}");
        let response = self.client.delete(&url).send().map_err(transport)?;

        Ok(match response.status() {
            StatusCode::NO_CONTENT => DeleteOutcome::NoContent,
            StatusCode::NOT_FOUND => DeleteOutcome::NotFound,
            status => DeleteOutcome::Other(status.as_u16()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> AppConfig {
        AppConfig::parse(
            r#"
                scim-url = "https://scim.example.com/"
                cache-file = "cache.bin"
                scim-type-send-order = ["Student"]

                [types.Student]
                unique-identifier = "GUID"
                scim-url-endpoint = "Users"
                scim-json-template = "{}"
            "#,
            PathBuf::from("."),
        )
        .unwrap()
    }

    #[test]
    fn test_urls_are_composed_and_escaped() {
        let dispatcher = HttpDispatcher::open(&config()).unwrap();
        assert_eq!(
            dispatcher.endpoint_url("Users"),
            "https://scim.example.com/Users"
        );
        assert_eq!(
            dispatcher.resource_url("Users", "id with space"),
            "https://scim.example.com/Users/id%20with%20space"
        );
    }
}
