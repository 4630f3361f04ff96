// src/orchestrator/expansion.rs
// LLM-based query expansion: generate N semantically distinct variations of
// a query so the parallel search fan-out covers more of the result space
// than a single literal query would.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::orchestrator::ExpansionConfig;
use crate::llm::{LlmProvider, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpansionStrategy {
    Synonyms,
    Reformulate,
    Specific,
    Broad,
    Balanced,
    Question,
}

impl ExpansionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionStrategy::Synonyms => "synonyms",
            ExpansionStrategy::Reformulate => "reformulate",
            ExpansionStrategy::Specific => "specific",
            ExpansionStrategy::Broad => "broad",
            ExpansionStrategy::Balanced => "balanced",
            ExpansionStrategy::Question => "question",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "synonyms" => Some(ExpansionStrategy::Synonyms),
            "reformulate" => Some(ExpansionStrategy::Reformulate),
            "specific" => Some(ExpansionStrategy::Specific),
            "broad" => Some(ExpansionStrategy::Broad),
            "balanced" => Some(ExpansionStrategy::Balanced),
            "question" => Some(ExpansionStrategy::Question),
            _ => None,
        }
    }

    fn prompt_hint(&self) -> &'static str {
        match self {
            ExpansionStrategy::Synonyms => {
                "Rewrite the query using synonyms and alternate terminology for the same concepts."
            }
            ExpansionStrategy::Reformulate => {
                "Rewrite the query as a different sentence structure expressing the same intent."
            }
            ExpansionStrategy::Specific => {
                "Rewrite the query to be more specific, adding plausible concrete detail."
            }
            ExpansionStrategy::Broad => {
                "Rewrite the query to be broader, generalizing to the parent topic."
            }
            ExpansionStrategy::Balanced => {
                "Rewrite the query keeping the same scope, phrased naturally."
            }
            ExpansionStrategy::Question => {
                "Rewrite the query as a direct question seeking the same information."
            }
        }
    }
}

const STRATEGY_ORDER: [ExpansionStrategy; 6] = [
    ExpansionStrategy::Synonyms,
    ExpansionStrategy::Reformulate,
    ExpansionStrategy::Specific,
    ExpansionStrategy::Broad,
    ExpansionStrategy::Balanced,
    ExpansionStrategy::Question,
];

#[derive(Debug, Clone)]
pub struct ExpandedQuery {
    pub text: String,
    pub strategy: ExpansionStrategy,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    query: String,
    count: usize,
    strategy: Option<ExpansionStrategy>,
    version: u32,
}

/// Expansion format version. Bump to invalidate the in-process cache when
/// the prompt templates change shape.
const CACHE_VERSION: u32 = 1;

pub struct QueryExpander {
    llm: Arc<dyn LlmProvider>,
    config: ExpansionConfig,
    cache: Mutex<HashMap<CacheKey, Vec<ExpandedQuery>>>,
    cache_order: Mutex<Vec<CacheKey>>,
}

impl QueryExpander {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ExpansionConfig) -> Self {
        Self {
            llm,
            config,
            cache: Mutex::new(HashMap::new()),
            cache_order: Mutex::new(Vec::new()),
        }
    }

    /// Produce up to `count` expansions of `query`. When `strategy` is
    /// `Some`, every variation uses that one strategy; when `None`, strategies
    /// are drawn round-robin from the six canonical ones. Falls back to
    /// returning just the original query, unexpanded, if the LLM call fails —
    /// expansion failure must never fail the overall search.
    pub async fn expand(
        &self,
        query: &str,
        count: usize,
        strategy: Option<ExpansionStrategy>,
    ) -> Vec<ExpandedQuery> {
        let count = match strategy {
            Some(_) => count.max(1),
            None => count.min(STRATEGY_ORDER.len()).max(1),
        };
        let key = CacheKey {
            query: query.to_string(),
            count,
            strategy,
            version: CACHE_VERSION,
        };

        if let Some(cached) = self.cache.lock().get(&key).cloned() {
            debug!(query, "query expansion cache hit");
            return cached;
        }

        let strategies: Vec<ExpansionStrategy> = match strategy {
            Some(s) => std::iter::repeat(s).take(count).collect(),
            None => STRATEGY_ORDER.iter().take(count).copied().collect(),
        };

        let mut expansions = Vec::with_capacity(count);
        for strategy in &strategies {
            match self.expand_with_strategy(query, *strategy).await {
                Ok(text) => expansions.push(ExpandedQuery {
                    text,
                    strategy: *strategy,
                }),
                Err(err) => {
                    warn!(error = %err, strategy = strategy.as_str(), "query expansion failed, skipping strategy");
                }
            }
        }

        if expansions.is_empty() {
            expansions.push(ExpandedQuery {
                text: query.to_string(),
                strategy: ExpansionStrategy::Balanced,
            });
        }

        self.insert_cache(key, expansions.clone());
        expansions
    }

    async fn expand_with_strategy(
        &self,
        query: &str,
        strategy: ExpansionStrategy,
    ) -> anyhow::Result<String> {
        let system = format!(
            "You rewrite search queries for a retrieval system. {} \
             Respond with only the rewritten query, no explanation.",
            strategy.prompt_hint()
        );
        let response = self
            .llm
            .chat(vec![Message::user(query.to_string())], system)
            .await?;
        let text = response.content.trim().to_string();
        if text.is_empty() {
            anyhow::bail!("LLM returned an empty expansion");
        }
        Ok(text)
    }

    fn insert_cache(&self, key: CacheKey, value: Vec<ExpandedQuery>) {
        let mut cache = self.cache.lock();
        let mut order = self.cache_order.lock();

        if cache.len() >= self.config.cache_capacity && !cache.contains_key(&key) {
            if let Some(oldest) = order.first().cloned() {
                cache.remove(&oldest);
                order.remove(0);
            }
        }

        if !cache.contains_key(&key) {
            order.push(key.clone());
        }
        cache.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_order_has_six_distinct_strategies() {
        let unique: std::collections::HashSet<_> = STRATEGY_ORDER.iter().collect();
        assert_eq!(unique.len(), 6);
    }
}
