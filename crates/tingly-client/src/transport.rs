use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{info, warn};

use crate::ClientError;

/// Shared connection pools, keyed by a fingerprint of
/// (normalized base URL, proxy URL, auth style). Clients hitting the same
/// endpoint through the same proxy share one `wreq::Client` and therefore
/// one connection pool; a different proxy or a credential hook that rewrites
/// requests gets its own.
#[derive(Default)]
pub struct TransportPool {
    transports: RwLock<HashMap<String, wreq::Client>>,
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool").finish_non_exhaustive()
    }
}

/// 16-hex fingerprint of the (base URL, proxy, auth kind) triple.
pub fn transport_key(api_base: &str, proxy_url: Option<&str>, auth_kind: &str) -> String {
    let base = api_base.trim_end_matches('/');
    let material = format!("{base}|{}|{auth_kind}", proxy_url.unwrap_or(""));
    blake3::hash(material.as_bytes()).to_hex()[..16].to_string()
}

impl TransportPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or lazily create the shared client for this triple. Readers
    /// dominate, so the hit path takes the read lock only; creation
    /// double-checks under the write lock.
    pub fn transport(
        &self,
        api_base: &str,
        proxy_url: Option<&str>,
        auth_kind: &str,
    ) -> Result<wreq::Client, ClientError> {
        let key = transport_key(api_base, proxy_url, auth_kind);

        {
            let transports = self.transports.read().map_err(|_| ClientError::Poisoned)?;
            if let Some(client) = transports.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut transports = self.transports.write().map_err(|_| ClientError::Poisoned)?;
        if let Some(client) = transports.get(&key) {
            return Ok(client.clone());
        }

        info!(
            event = "transport_created",
            key = %key,
            api_base = %api_base,
            proxy = proxy_url.unwrap_or("")
        );
        let client = build_transport(proxy_url)?;
        transports.insert(key, client.clone());
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.transports.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut transports) = self.transports.write() {
            transports.clear();
        }
    }
}

fn build_transport(proxy_url: Option<&str>) -> Result<wreq::Client, ClientError> {
    let builder = wreq::Client::builder();

    let Some(proxy_url) = proxy_url.filter(|value| !value.trim().is_empty()) else {
        return builder
            .build()
            .map_err(|err| ClientError::Build(err.to_string()));
    };

    match proxy_url.split_once("://").map(|(scheme, _)| scheme) {
        Some("http") | Some("https") | Some("socks5") => {
            let proxy =
                wreq::Proxy::all(proxy_url).map_err(|err| ClientError::Build(err.to_string()))?;
            builder
                .proxy(proxy)
                .build()
                .map_err(|err| ClientError::Build(err.to_string()))
        }
        other => {
            warn!(
                event = "proxy_scheme_unsupported",
                scheme = other.unwrap_or("<none>"),
                proxy = %proxy_url,
            );
            wreq::Client::builder()
                .build()
                .map_err(|err| ClientError::Build(err.to_string()))
        }
    }
}
