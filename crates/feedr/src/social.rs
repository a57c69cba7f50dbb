use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use data_encoding::BASE64;
use hmac::{Hmac, Mac as _};
use rand::Rng as _;
use rand::distr::Alphanumeric;
use reqwest::{Client, Method};
use serde::Deserialize;
use sha1::Sha1;
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

const LOG_TARGET: &str = "feedr::social";

pub const DEFAULT_API_BASE_URL: &str = "https://api.twitter.com/1.1";
pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://upload.twitter.com/1.1";

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Snafu)]
pub enum SocialError {
    /// The platform understood the request and refused it.
    #[snafu(display("Platform rejected request with HTTP {status}: {message}"))]
    Rejected { status: u16, message: String },
    #[snafu(display("Request to platform failed: {source}"))]
    Network { source: reqwest::Error },
    #[snafu(display("Unexpected platform response: {source}"))]
    Decode { source: serde_json::Error },
    #[snafu(display("Account has no posts"))]
    NoRecentPost,
}

pub type SocialResult<T> = std::result::Result<T, SocialError>;

impl SocialError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, SocialError::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostId(pub String);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The social account updates are published to.
#[async_trait]
pub trait SocialClient: Send + Sync {
    async fn post(&self, text: &str) -> SocialResult<PostId>;

    async fn post_with_media(&self, text: &str, image: &[u8]) -> SocialResult<PostId>;

    async fn delete_post(&self, id: &PostId) -> SocialResult<()>;

    /// The latest post made by the account itself.
    async fn most_recent_post(&self) -> SocialResult<PostId>;

    async fn send_direct_message(&self, account: &str, text: &str) -> SocialResult<()>;
}

/// OAuth 1.0a user-context credentials.
#[derive(Clone)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("access_token", &self.access_token)
            .finish_non_exhaustive()
    }
}

/// Twitter v1.1-style REST client, signing every request with the
/// credentials it was built with.
pub struct TwitterClient {
    client: Client,
    credentials: Credentials,
    api_base_url: String,
    upload_base_url: String,
}

#[derive(Deserialize)]
struct Status {
    id_str: String,
}

#[derive(Deserialize)]
struct MediaUpload {
    media_id_string: String,
}

#[derive(Deserialize)]
struct ApiErrors {
    errors: Vec<ApiErrorMessage>,
}

#[derive(Deserialize)]
struct ApiErrorMessage {
    message: String,
}

impl TwitterClient {
    pub fn new(client: Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            upload_base_url: DEFAULT_UPLOAD_BASE_URL.to_owned(),
        }
    }

    pub fn with_base_urls(
        mut self,
        api_base_url: impl Into<String>,
        upload_base_url: impl Into<String>,
    ) -> Self {
        self.api_base_url = api_base_url.into().trim_end_matches('/').to_owned();
        self.upload_base_url = upload_base_url.into().trim_end_matches('/').to_owned();
        self
    }

    async fn call(
        &self,
        method: Method,
        url: String,
        params: &[(&str, &str)],
    ) -> SocialResult<String> {
        let authorization = authorization_header(
            &self.credentials,
            method.as_str(),
            &url,
            params,
            &OAuthNonce::generate(),
        );

        debug!(target: LOG_TARGET, %method, %url, "Calling platform API");

        let request = self
            .client
            .request(method.clone(), &url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        let request = if method == Method::GET {
            request.query(params)
        } else {
            request.form(params)
        };

        let response = request.send().await.context(NetworkSnafu)?;
        let status = response.status();
        let body = response.text().await.context(NetworkSnafu)?;

        if !status.is_success() {
            return RejectedSnafu {
                status: status.as_u16(),
                message: rejection_message(&body),
            }
            .fail();
        }
        Ok(body)
    }

    async fn update_status(&self, params: &[(&str, &str)]) -> SocialResult<PostId> {
        let body = self
            .call(
                Method::POST,
                format!("{}/statuses/update.json", self.api_base_url),
                params,
            )
            .await?;
        let status: Status = serde_json::from_str(&body).context(DecodeSnafu)?;
        Ok(PostId(status.id_str))
    }
}

#[async_trait]
impl SocialClient for TwitterClient {
    async fn post(&self, text: &str) -> SocialResult<PostId> {
        self.update_status(&[("status", text)]).await
    }

    async fn post_with_media(&self, text: &str, image: &[u8]) -> SocialResult<PostId> {
        let media_data = BASE64.encode(image);
        let body = self
            .call(
                Method::POST,
                format!("{}/media/upload.json", self.upload_base_url),
                &[("media_data", &media_data)],
            )
            .await?;
        let upload: MediaUpload = serde_json::from_str(&body).context(DecodeSnafu)?;

        self.update_status(&[("status", text), ("media_ids", &upload.media_id_string)])
            .await
    }

    async fn delete_post(&self, id: &PostId) -> SocialResult<()> {
        self.call(
            Method::POST,
            format!("{}/statuses/destroy/{}.json", self.api_base_url, id),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn most_recent_post(&self) -> SocialResult<PostId> {
        let body = self
            .call(
                Method::GET,
                format!("{}/statuses/user_timeline.json", self.api_base_url),
                &[("count", "1")],
            )
            .await?;
        let statuses: Vec<Status> = serde_json::from_str(&body).context(DecodeSnafu)?;
        statuses
            .into_iter()
            .next()
            .map(|s| PostId(s.id_str))
            .ok_or(SocialError::NoRecentPost)
    }

    async fn send_direct_message(&self, account: &str, text: &str) -> SocialResult<()> {
        self.call(
            Method::POST,
            format!("{}/direct_messages/new.json", self.api_base_url),
            &[("screen_name", account), ("text", text)],
        )
        .await?;
        Ok(())
    }
}

/// First error message of an API error body, or the raw body.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<ApiErrors>(body)
        .ok()
        .and_then(|e| e.errors.into_iter().next())
        .map(|e| e.message)
        .unwrap_or_else(|| body.trim().to_owned())
}

/// Per-request values of an OAuth signature.
pub struct OAuthNonce {
    pub nonce: String,
    pub timestamp: u64,
}

impl OAuthNonce {
    pub fn generate() -> Self {
        let nonce = rand::rng()
            .sample_iter(Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self { nonce, timestamp }
    }
}

/// RFC 3986 percent-encoding, as required by OAuth 1.0a.
fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn oauth_params<'a>(
    credentials: &'a Credentials,
    nonce: &'a OAuthNonce,
    timestamp: &'a str,
) -> [(&'static str, &'a str); 6] {
    [
        ("oauth_consumer_key", credentials.consumer_key.as_str()),
        ("oauth_nonce", nonce.nonce.as_str()),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_token", credentials.access_token.as_str()),
        ("oauth_version", "1.0"),
    ]
}

/// The signature base string: method, URL and the sorted, encoded
/// parameter string, each encoded and joined with `&`.
pub fn signature_base_string(method: &str, url: &str, params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    )
}

/// Base64 HMAC-SHA1 of `base_string`, keyed with both secrets.
pub fn sign(credentials: &Credentials, base_string: &str) -> String {
    let key = format!(
        "{}&{}",
        percent_encode(&credentials.consumer_secret),
        percent_encode(&credentials.access_token_secret)
    );
    let mut mac =
        Hmac::<Sha1>::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(base_string.as_bytes());
    BASE64.encode(&mac.finalize().into_bytes())
}

/// `Authorization` header value for a request with the given query or
/// form parameters.
pub fn authorization_header(
    credentials: &Credentials,
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    nonce: &OAuthNonce,
) -> String {
    let timestamp = nonce.timestamp.to_string();
    let oauth = oauth_params(credentials, nonce, &timestamp);

    let all_params: Vec<(&str, &str)> = oauth.iter().chain(params.iter()).copied().collect();
    let signature = sign(credentials, &signature_base_string(method, url, &all_params));

    let header_params = oauth
        .iter()
        .copied()
        .chain([("oauth_signature", signature.as_str())])
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("OAuth {header_params}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            consumer_key: "ck".into(),
            consumer_secret: "cs secret".into(),
            access_token: "at".into(),
            access_token_secret: "ats".into(),
        }
    }

    fn fixed_nonce() -> OAuthNonce {
        OAuthNonce {
            nonce: "abc123".into(),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn percent_encoding_follows_rfc3986() {
        assert_eq!(percent_encode("Hello Ladies + Gentlemen!"), "Hello%20Ladies%20%2B%20Gentlemen%21");
        assert_eq!(percent_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(percent_encode("é"), "%C3%A9");
    }

    #[test]
    fn base_string_sorts_and_double_encodes_params() {
        let base = signature_base_string(
            "post",
            "https://api.twitter.com/1.1/statuses/update.json",
            &[("status", "Hi there"), ("include_entities", "true")],
        );
        assert_eq!(
            base,
            "POST&https%3A%2F%2Fapi.twitter.com%2F1.1%2Fstatuses%2Fupdate.json&include_entities%3Dtrue%26status%3DHi%2520there"
        );
    }

    #[test]
    fn signature_is_deterministic_and_secret_dependent() {
        let base = "GET&https%3A%2F%2Fexample.com&a%3D1";
        let sig = sign(&credentials(), base);
        assert_eq!(sig, sign(&credentials(), base));
        // 20-byte SHA-1 MAC in base64
        assert_eq!(sig.len(), 28);

        let mut other = credentials();
        other.access_token_secret = "different".into();
        assert_ne!(sig, sign(&other, base));
    }

    #[test]
    fn authorization_header_contains_oauth_fields() {
        let header = authorization_header(
            &credentials(),
            "POST",
            "https://api.twitter.com/1.1/statuses/update.json",
            &[("status", "hello")],
            &fixed_nonce(),
        );

        assert!(header.starts_with("OAuth "));
        for field in [
            "oauth_consumer_key=\"ck\"",
            "oauth_nonce=\"abc123\"",
            "oauth_signature_method=\"HMAC-SHA1\"",
            "oauth_timestamp=\"1700000000\"",
            "oauth_token=\"at\"",
            "oauth_version=\"1.0\"",
            "oauth_signature=\"",
        ] {
            assert!(header.contains(field), "missing {field} in {header}");
        }
        // Request parameters are signed, not sent in the header
        assert!(!header.contains("status"));
    }

    #[test]
    fn rejection_message_prefers_api_error() {
        assert_eq!(
            rejection_message(r#"{"errors":[{"code":187,"message":"Status is a duplicate."}]}"#),
            "Status is a duplicate."
        );
        assert_eq!(rejection_message(" Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let debug = format!("{:?}", credentials());
        assert!(!debug.contains("cs secret"));
        assert!(!debug.contains("ats"));
    }
}
