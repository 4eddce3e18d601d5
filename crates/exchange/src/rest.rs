//! Thin HTTP layer: one request, one typed result.
//!
//! Retrying is the adapter's job (a signed query must be rebuilt with a
//! fresh timestamp per attempt), so this layer maps exactly one round trip
//! to a [`VenueError`].

use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;

use crate::error::VenueError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) struct Rest {
    client: Client,
    base_url: String,
}

impl Rest {
    pub fn new(base_url: &str) -> Result<Self, VenueError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VenueError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<T, VenueError> {
        let url = match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, path, q),
            _ => format!("{}{}", self.base_url, path),
        };
        tracing::debug!(method = %method, url = %url, "venue request");

        let mut req = self.client.request(method, &url);
        if let Some(key) = api_key {
            req = req.header("X-MBX-APIKEY", key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, VenueError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                tracing::warn!(body = %body, error = %e, "unparseable venue response");
                VenueError::Parse(e.to_string())
            });
        }

        if status.as_u16() == 429 {
            return Err(VenueError::RateLimited {
                retry_after_ms: 60_000,
            });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(VenueError::Auth(body));
        }

        // The venue reports application errors as {"code": .., "msg": ".."}.
        if let Ok(err) = serde_json::from_str::<VenueApiError>(&body) {
            return Err(classify_api_error(status.as_u16(), err));
        }

        Err(VenueError::Http {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct VenueApiError {
    code: i64,
    msg: String,
}

fn classify_api_error(status: u16, err: VenueApiError) -> VenueError {
    match err.code {
        // -1121: invalid symbol, -4141: symbol closed for trading
        -1121 | -4141 => VenueError::UnknownSymbol(err.msg),
        // -2019: margin is insufficient
        -2019 => VenueError::OrderRejected(err.msg),
        // -2014/-2015: bad api key / permissions
        -2014 | -2015 => VenueError::Auth(err.msg),
        // -1013: filter failure (precision, min notional)
        -1013 | -4164 => VenueError::OrderRejected(err.msg),
        _ if status >= 500 => VenueError::Http {
            status,
            message: err.msg,
        },
        _ => VenueError::OrderRejected(err.msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_classification() {
        let unknown = classify_api_error(
            400,
            VenueApiError {
                code: -1121,
                msg: "Invalid symbol.".into(),
            },
        );
        assert!(matches!(unknown, VenueError::UnknownSymbol(_)));

        let auth = classify_api_error(
            400,
            VenueApiError {
                code: -2014,
                msg: "API-key format invalid.".into(),
            },
        );
        assert!(matches!(auth, VenueError::Auth(_)));

        let server = classify_api_error(
            503,
            VenueApiError {
                code: -1000,
                msg: "Internal error.".into(),
            },
        );
        assert!(server.is_transient());
    }
}
