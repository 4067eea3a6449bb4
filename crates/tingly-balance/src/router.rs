use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::Rng;
use time::OffsetDateTime;
use tracing::debug;

use crate::stats::{StatsKey, StatsStore};
use crate::types::{Provider, Rule, Service, ServiceStats};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("no rule matches model {0:?}")]
    UnknownModel(String),
    #[error("rule for model {0:?} has no services")]
    RuleEmpty(String),
    #[error("all services for model {0:?} are exhausted")]
    AllExhausted(String),
}

/// The outcome of one resolution: which rule matched, which service was
/// picked, and the model string to echo back to the client.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub rule: Arc<Rule>,
    pub service: Service,
    pub provider: Arc<Provider>,
    pub response_model: String,
}

#[derive(Default)]
struct RoutingTable {
    rules: Vec<Arc<Rule>>,
    providers: HashMap<String, Arc<Provider>>,
}

/// Resolves client model names to services. The routing table is an
/// immutable snapshot swapped atomically on refresh; reads never lock.
pub struct Router {
    table: ArcSwap<RoutingTable>,
    stats: Arc<StatsStore>,
}

struct Candidate {
    service: Service,
    provider: Arc<Provider>,
    weight: u32,
    window_request_count: i64,
    last_used: OffsetDateTime,
    order: usize,
}

impl Router {
    pub fn new(stats: Arc<StatsStore>) -> Self {
        Self {
            table: ArcSwap::from_pointee(RoutingTable::default()),
            stats,
        }
    }

    /// Publish a new providers/rules snapshot.
    pub fn refresh(&self, providers: &[Provider], rules: &[Rule]) {
        let table = RoutingTable {
            rules: rules.iter().cloned().map(Arc::new).collect(),
            providers: providers
                .iter()
                .cloned()
                .map(|provider| (provider.uuid.clone(), Arc::new(provider)))
                .collect(),
        };
        self.table.store(Arc::new(table));
    }

    pub async fn resolve(&self, request_model: &str) -> Result<RouteDecision, RouteError> {
        let table = self.table.load_full();
        let rule = table
            .rules
            .iter()
            .find(|rule| rule.enabled && rule.request_model == request_model)
            .cloned()
            .ok_or_else(|| RouteError::UnknownModel(request_model.to_string()))?;

        if rule.services.is_empty() {
            return Err(RouteError::RuleEmpty(request_model.to_string()));
        }

        let snapshot = self.stats.snapshot().await;
        let now = OffsetDateTime::now_utc();

        let mut primary = Vec::new();
        let mut fallback = Vec::new();
        for (order, service) in rule.services.iter().enumerate() {
            if !service.active {
                continue;
            }
            // Deleted or disabled providers drop out silently.
            let Some(provider) = table.providers.get(&service.provider) else {
                continue;
            };
            if !provider.enabled {
                continue;
            }

            let key = StatsKey::new(&rule.uuid, &service.provider, &service.model);
            let (window_request_count, last_used) =
                effective_window(snapshot.get(&key), now);

            // Positive weight doubles as the per-window request budget;
            // weight-0 services are fallback-only and never quota-limited.
            if service.weight > 0 && window_request_count >= service.weight as i64 {
                continue;
            }

            let candidate = Candidate {
                service: service.clone(),
                provider: provider.clone(),
                weight: service.weight,
                window_request_count,
                last_used,
                order,
            };
            if service.weight > 0 {
                primary.push(candidate);
            } else {
                fallback.push(candidate);
            }
        }

        let pool = if primary.is_empty() { fallback } else { primary };
        if pool.is_empty() {
            return Err(RouteError::AllExhausted(request_model.to_string()));
        }

        let picked = &pool[pick_candidate(&pool)];
        debug!(
            event = "route_resolved",
            model = %request_model,
            provider = %picked.provider.name,
            upstream_model = %picked.service.model,
            weight = picked.weight,
            window_request_count = picked.window_request_count,
        );

        let response_model = rule.response_model_or(request_model).to_string();
        Ok(RouteDecision {
            rule: rule.clone(),
            service: picked.service.clone(),
            provider: picked.provider.clone(),
            response_model,
        })
    }
}

/// Counters as the current window sees them: an expired window reads as
/// empty even before the next usage write rolls it.
fn effective_window(stats: Option<&ServiceStats>, now: OffsetDateTime) -> (i64, OffsetDateTime) {
    match stats {
        Some(stats) if !stats.window_expired(now) => (stats.window_request_count, stats.last_used),
        Some(stats) => (0, stats.last_used),
        None => (0, OffsetDateTime::UNIX_EPOCH),
    }
}

/// Sample proportionally to weight; when every candidate carries the same
/// weight, tie-break by lowest window count, then earliest last use, then
/// declaration order.
fn pick_candidate(pool: &[Candidate]) -> usize {
    if pool.len() == 1 {
        return 0;
    }

    let first = pool[0].weight;
    if pool.iter().all(|candidate| candidate.weight == first) {
        return pool
            .iter()
            .enumerate()
            .min_by_key(|(_, candidate)| {
                (
                    candidate.window_request_count,
                    candidate.last_used,
                    candidate.order,
                )
            })
            .map(|(index, _)| index)
            .unwrap_or(0);
    }

    let total: u64 = pool.iter().map(|candidate| candidate.weight as u64).sum();
    let mut roll = rand::rng().random_range(0..total);
    for (index, candidate) in pool.iter().enumerate() {
        let weight = candidate.weight as u64;
        if roll < weight {
            return index;
        }
        roll -= weight;
    }
    pool.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsStore;

    fn provider(uuid: &str, enabled: bool) -> Provider {
        Provider {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            api_base: "https://api.example.com/v1".to_string(),
            api_style: Default::default(),
            token: "sk-test".to_string(),
            proxy_url: None,
            timeout: 300,
            enabled,
            models: Vec::new(),
            starred_models: Vec::new(),
        }
    }

    fn service(provider: &str, model: &str, weight: u32) -> Service {
        Service {
            provider: provider.to_string(),
            model: model.to_string(),
            weight,
            active: true,
            time_window: 60,
        }
    }

    fn rule(request_model: &str, services: Vec<Service>) -> Rule {
        Rule {
            uuid: format!("rule-{request_model}"),
            request_model: request_model.to_string(),
            response_model: String::new(),
            enabled: true,
            services,
        }
    }

    async fn router_with(providers: Vec<Provider>, rules: Vec<Rule>) -> Router {
        let stats = Arc::new(StatsStore::open_in_memory().await.unwrap());
        let router = Router::new(stats);
        router.refresh(&providers, &rules);
        router
    }

    #[tokio::test]
    async fn unknown_model_is_an_error() {
        let router = router_with(vec![provider("p1", true)], Vec::new()).await;
        assert!(matches!(
            router.resolve("nope").await,
            Err(RouteError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn empty_rule_is_an_error() {
        let router =
            router_with(vec![provider("p1", true)], vec![rule("gpt-4o", Vec::new())]).await;
        assert!(matches!(
            router.resolve("gpt-4o").await,
            Err(RouteError::RuleEmpty(_))
        ));
    }

    #[tokio::test]
    async fn disabled_provider_is_filtered_silently() {
        let router = router_with(
            vec![provider("dead", false), provider("live", true)],
            vec![rule(
                "gpt-4o",
                vec![service("dead", "m1", 5), service("live", "m2", 1)],
            )],
        )
        .await;
        let decision = router.resolve("gpt-4o").await.unwrap();
        assert_eq!(decision.provider.uuid, "live");
        assert_eq!(decision.response_model, "gpt-4o");
    }

    #[tokio::test]
    async fn quota_exhaustion_falls_back_to_weight_zero() {
        let stats = Arc::new(StatsStore::open_in_memory().await.unwrap());
        let router = Router::new(stats.clone());
        let a = service("p1", "model-a", 1);
        let b = service("p1", "model-b", 0);
        router.refresh(
            &[provider("p1", true)],
            &[rule("gpt-4o", vec![a.clone(), b.clone()])],
        );

        let decision = router.resolve("gpt-4o").await.unwrap();
        assert_eq!(decision.service.model, "model-a");

        // One recorded use exhausts A's window budget of 1.
        stats
            .record_usage("rule-gpt-4o", &a, 10, 10)
            .await
            .unwrap();
        let decision = router.resolve("gpt-4o").await.unwrap();
        assert_eq!(decision.service.model, "model-b");
    }

    #[tokio::test]
    async fn all_exhausted_when_nothing_remains() {
        let stats = Arc::new(StatsStore::open_in_memory().await.unwrap());
        let router = Router::new(stats.clone());
        let a = service("p1", "model-a", 1);
        router.refresh(&[provider("p1", true)], &[rule("gpt-4o", vec![a.clone()])]);

        stats
            .record_usage("rule-gpt-4o", &a, 1, 1)
            .await
            .unwrap();
        assert!(matches!(
            router.resolve("gpt-4o").await,
            Err(RouteError::AllExhausted(_))
        ));
    }

    #[tokio::test]
    async fn equal_weights_tie_break_on_window_count() {
        let stats = Arc::new(StatsStore::open_in_memory().await.unwrap());
        let router = Router::new(stats.clone());
        let a = service("p1", "model-a", 5);
        let b = service("p1", "model-b", 5);
        router.refresh(
            &[provider("p1", true)],
            &[rule("gpt-4o", vec![a.clone(), b.clone()])],
        );

        stats
            .record_usage("rule-gpt-4o", &a, 1, 1)
            .await
            .unwrap();
        let decision = router.resolve("gpt-4o").await.unwrap();
        assert_eq!(decision.service.model, "model-b");
    }

    #[tokio::test]
    async fn response_model_overrides_echo() {
        let mut routing_rule = rule("gpt-4o", vec![service("p1", "m1", 1)]);
        routing_rule.response_model = "public-name".to_string();
        let router = router_with(vec![provider("p1", true)], vec![routing_rule]).await;
        let decision = router.resolve("gpt-4o").await.unwrap();
        assert_eq!(decision.response_model, "public-name");
    }

    #[tokio::test]
    async fn inactive_service_never_routes() {
        let mut a = service("p1", "model-a", 5);
        a.active = false;
        let router = router_with(
            vec![provider("p1", true)],
            vec![rule("gpt-4o", vec![a])],
        )
        .await;
        assert!(matches!(
            router.resolve("gpt-4o").await,
            Err(RouteError::AllExhausted(_))
        ));
    }
}
