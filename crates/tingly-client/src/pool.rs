use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::{HeaderMap, StatusCode};
use tracing::debug;

use tingly_balance::{AuthStyle, Provider};

use crate::transport::TransportPool;
use crate::ClientError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Pluggable per-request credential computation (OAuth-style providers).
/// The hook's kind participates in the transport key so hooked and static
/// clients never share a pool.
pub trait AuthHook: Send + Sync {
    fn kind(&self) -> &'static str;
    fn apply(&self, request: wreq::RequestBuilder) -> wreq::RequestBuilder;
}

/// A reusable upstream client: base URL, credential injector, and a shared
/// transport. Immutable after construction; safe to share across tasks.
pub struct UpstreamClient {
    api_base: String,
    auth_style: AuthStyle,
    token: String,
    hook: Option<Arc<dyn AuthHook>>,
    http: wreq::Client,
    timeout: Duration,
    debug_bodies: bool,
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

pub enum UpstreamBody {
    Buffered(Bytes),
    Stream(BoxStream<'static, Result<Bytes, ClientError>>),
}

impl UpstreamClient {
    /// Provider timeout for non-streaming calls; streaming calls are
    /// governed by stream lifetime instead.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a JSON body. With `stream` set the successful response body is
    /// handed back as a byte stream; error statuses are buffered either way
    /// so callers can wrap them in a proper envelope.
    pub async fn post_json(
        &self,
        path: &str,
        body: Bytes,
        stream: bool,
    ) -> Result<UpstreamResponse, ClientError> {
        let url = self.url(path);
        if self.debug_bodies {
            debug!(
                event = "upstream_request_body",
                url = %url,
                body = %String::from_utf8_lossy(&body),
            );
        }

        let mut request = self
            .http
            .post(&url)
            .header("content-type", "application/json");
        request = self.authorize(request);
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|err| ClientError::Request(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();

        if stream && status.is_success() {
            let byte_stream = response
                .bytes_stream()
                .map(|item| item.map_err(|err| ClientError::Request(err.to_string())))
                .boxed();
            return Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Stream(byte_stream),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ClientError::Request(err.to_string()))?;
        if self.debug_bodies {
            debug!(
                event = "upstream_response_body",
                url = %url,
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&bytes),
            );
        }
        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Buffered(bytes),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: wreq::RequestBuilder) -> wreq::RequestBuilder {
        if let Some(hook) = &self.hook {
            return hook.apply(request);
        }
        match self.auth_style {
            AuthStyle::OpenAI => request.header("authorization", format!("Bearer {}", self.token)),
            AuthStyle::Anthropic => request
                .header("x-api-key", self.token.clone())
                .header("anthropic-version", ANTHROPIC_VERSION),
        }
    }
}

/// Process-wide cache of upstream client handles, keyed by
/// (provider uuid, logical upstream model).
pub struct ClientPool {
    transports: Arc<TransportPool>,
    clients: RwLock<HashMap<(String, String), Arc<UpstreamClient>>>,
    hooks: RwLock<HashMap<String, Arc<dyn AuthHook>>>,
    debug_bodies: bool,
}

impl ClientPool {
    pub fn new(transports: Arc<TransportPool>, debug_bodies: bool) -> Self {
        Self {
            transports,
            clients: RwLock::new(HashMap::new()),
            hooks: RwLock::new(HashMap::new()),
            debug_bodies,
        }
    }

    /// Attach a credential hook for one provider. Existing handles for the
    /// provider are dropped so the next fetch rebuilds them with the hook.
    pub fn register_hook(&self, provider_uuid: &str, hook: Arc<dyn AuthHook>) {
        if let Ok(mut hooks) = self.hooks.write() {
            hooks.insert(provider_uuid.to_string(), hook);
        }
        if let Ok(mut clients) = self.clients.write() {
            clients.retain(|(uuid, _), _| uuid != provider_uuid);
        }
    }

    pub fn client(
        &self,
        provider: &Provider,
        model_hint: &str,
    ) -> Result<Arc<UpstreamClient>, ClientError> {
        let key = (provider.uuid.clone(), model_hint.to_string());

        {
            let clients = self.clients.read().map_err(|_| ClientError::Poisoned)?;
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().map_err(|_| ClientError::Poisoned)?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let hook = self
            .hooks
            .read()
            .map_err(|_| ClientError::Poisoned)?
            .get(&provider.uuid)
            .cloned();
        let auth_kind = match (&hook, provider.api_style) {
            (Some(hook), _) => hook.kind(),
            (None, AuthStyle::OpenAI) => "openai",
            (None, AuthStyle::Anthropic) => "anthropic",
        };
        let http = self.transports.transport(
            &provider.api_base,
            provider.proxy_url.as_deref(),
            auth_kind,
        )?;

        let client = Arc::new(UpstreamClient {
            api_base: provider.api_base.clone(),
            auth_style: provider.api_style,
            token: provider.token.clone(),
            hook,
            http,
            timeout: Duration::from_secs(provider.timeout),
            debug_bodies: self.debug_bodies,
        });
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(uuid: &str, style: AuthStyle) -> Provider {
        Provider {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            api_base: "https://api.example.com/v1".to_string(),
            api_style: style,
            token: "sk-test".to_string(),
            proxy_url: None,
            timeout: 42,
            enabled: true,
            models: Vec::new(),
            starred_models: Vec::new(),
        }
    }

    #[test]
    fn handles_are_cached_per_provider_and_model() {
        let pool = ClientPool::new(Arc::new(TransportPool::new()), false);
        let p = provider("p1", AuthStyle::OpenAI);
        let a = pool.client(&p, "gpt-4o").unwrap();
        let b = pool.client(&p, "gpt-4o").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = pool.client(&p, "gpt-4o-mini").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn timeout_comes_from_the_provider() {
        let pool = ClientPool::new(Arc::new(TransportPool::new()), false);
        let client = pool
            .client(&provider("p1", AuthStyle::Anthropic), "claude-x")
            .unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(42));
    }

    #[test]
    fn registering_a_hook_drops_stale_handles() {
        struct StaticHook;
        impl AuthHook for StaticHook {
            fn kind(&self) -> &'static str {
                "oauth-test"
            }
            fn apply(&self, request: wreq::RequestBuilder) -> wreq::RequestBuilder {
                request.header("authorization", "Bearer hooked")
            }
        }

        let pool = ClientPool::new(Arc::new(TransportPool::new()), false);
        let p = provider("p1", AuthStyle::OpenAI);
        let before = pool.client(&p, "m").unwrap();
        pool.register_hook("p1", Arc::new(StaticHook));
        let after = pool.client(&p, "m").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
