use crate::document::normalize_ticker;
use crate::embeddings::ModelLoader;
use crate::error::{RagError, Result};
use crate::rag::RagEngine;
use crate::store::DocumentStore;
use crate::summarizer::CompletionService;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Summaries keyed by ticker, each with its own time-to-live
#[derive(Default)]
pub struct SummaryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

type CacheEntry = (Instant, Duration, String);

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| RagError::Storage("summary cache poisoned".to_string()))
    }

    pub fn set(&self, ticker: &str, summary: String, ttl: Duration) -> Result<()> {
        self.entries()?
            .insert(normalize_ticker(ticker), (Instant::now(), ttl, summary));
        Ok(())
    }

    /// The cached summary (fresh or stale) and whether it is still fresh
    pub fn get(&self, ticker: &str) -> Result<Option<(String, bool)>> {
        Ok(self
            .entries()?
            .get(&normalize_ticker(ticker))
            .map(|(stored_at, ttl, summary)| (summary.clone(), stored_at.elapsed() < *ttl)))
    }

    pub fn invalidate(&self, ticker: &str) -> Result<()> {
        self.entries()?.remove(&normalize_ticker(ticker));
        Ok(())
    }
}

/// A summary and whether it came from a fresh cache entry or a new run
#[derive(Debug, Clone, PartialEq)]
pub struct ServedSummary {
    pub summary: String,
    pub fresh: bool,
}

/// Caller-side wrapper around [`RagEngine`]: caches summaries per ticker and
/// serialises runs for the same ticker so concurrent requests share one run.
pub struct SummaryService<S, L, C>
where
    S: DocumentStore,
    L: ModelLoader,
    C: CompletionService,
{
    engine: RagEngine<S, L, C>,
    cache: SummaryCache,
    ttl: Duration,
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<S, L, C> SummaryService<S, L, C>
where
    S: DocumentStore,
    L: ModelLoader,
    C: CompletionService,
{
    pub fn new(engine: RagEngine<S, L, C>) -> Self {
        let ttl = engine.config().summary_ttl;
        SummaryService {
            engine,
            cache: SummaryCache::new(),
            ttl,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &RagEngine<S, L, C> {
        &self.engine
    }

    pub fn cache(&self) -> &SummaryCache {
        &self.cache
    }

    fn in_flight(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>>> {
        self.in_flight
            .lock()
            .map_err(|_| RagError::Storage("in-flight map poisoned".to_string()))
    }

    fn ticker_lock(&self, ticker: &str) -> Result<Arc<AsyncMutex<()>>> {
        Ok(self
            .in_flight()?
            .entry(ticker.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Drop the ticker's lock once no other request holds or waits on it
    fn release_ticker_lock(&self, ticker: &str, lock: Arc<AsyncMutex<()>>) -> Result<()> {
        drop(lock);
        let mut in_flight = self.in_flight()?;
        if in_flight
            .get(ticker)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            in_flight.remove(ticker);
        }
        Ok(())
    }

    /// Summary for `ticker`: a fresh cache hit, or a new pipeline run.
    ///
    /// When the run fails with a transient error and a stale summary exists,
    /// the stale summary is served instead.
    pub async fn summary(&self, ticker: &str) -> Result<ServedSummary> {
        let ticker = normalize_ticker(ticker);
        if let Some((summary, true)) = self.cache.get(&ticker)? {
            debug!("Serving cached summary for {}", ticker);
            return Ok(ServedSummary {
                summary,
                fresh: true,
            });
        }

        let lock = self.ticker_lock(&ticker)?;
        let served = {
            let _guard = lock.lock().await;
            self.refresh(&ticker).await
        };
        self.release_ticker_lock(&ticker, lock)?;
        served
    }

    async fn refresh(&self, ticker: &str) -> Result<ServedSummary> {
        // another request may have finished the run while we waited
        let cached = self.cache.get(ticker)?;
        if let Some((summary, true)) = &cached {
            return Ok(ServedSummary {
                summary: summary.clone(),
                fresh: true,
            });
        }

        match self.engine.run_rag_pipeline(ticker).await {
            Ok(summary) => {
                self.cache.set(ticker, summary.clone(), self.ttl)?;
                Ok(ServedSummary {
                    summary,
                    fresh: true,
                })
            }
            Err(e) if e.is_transient() => match cached {
                Some((summary, _)) => {
                    warn!("Serving stale summary for {} after error: {}", ticker, e);
                    Ok(ServedSummary {
                        summary,
                        fresh: false,
                    })
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::document::Document;
    use crate::embeddings::{Embedder, HashingEmbedder};
    use crate::error::ErrorKind;
    use crate::store::MemoryDocumentStore;
    use crate::summarizer::CompletionRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCompletion {
        calls: AtomicUsize,
        fail_after: usize,
    }

    impl CompletionService for CountingCompletion {
        fn credentials_configured(&self) -> bool {
            true
        }

        async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if call >= self.fail_after {
                return Err(RagError::Timeout("completion took too long".to_string()));
            }
            Ok(format!("summary #{}", call + 1))
        }
    }

    fn service(
        ttl: Duration,
        fail_after: usize,
    ) -> SummaryService<MemoryDocumentStore, HashingEmbedder, CountingCompletion> {
        let store = MemoryDocumentStore::new();
        store
            .insert(Document::new("AAPL", "Revenue grew and margins expanded."))
            .unwrap();
        let config = RagConfig {
            summary_ttl: ttl,
            ..RagConfig::default()
        };
        let engine = RagEngine::new(
            store,
            Arc::new(Embedder::new(HashingEmbedder::default(), 16)),
            CountingCompletion {
                calls: AtomicUsize::new(0),
                fail_after,
            },
            config,
        );
        SummaryService::new(engine)
    }

    fn calls(service: &SummaryService<MemoryDocumentStore, HashingEmbedder, CountingCompletion>) -> usize {
        service
            .engine()
            .summarizer()
            .service()
            .calls
            .load(Ordering::SeqCst)
    }

    #[test]
    fn test_cache_freshness() {
        let cache = SummaryCache::new();
        assert!(cache.get("AAPL").unwrap().is_none());
        cache
            .set("aapl", "text".to_string(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(cache.get("AAPL").unwrap(), Some(("text".to_string(), true)));
        cache.set("AAPL", "old".to_string(), Duration::ZERO).unwrap();
        assert_eq!(cache.get("AAPL").unwrap(), Some(("old".to_string(), false)));
        cache.invalidate("AAPL").unwrap();
        assert!(cache.get("AAPL").unwrap().is_none());
    }

    #[test]
    fn test_poisoned_cache_reports_storage_error() {
        let cache = Arc::new(SummaryCache::new());
        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the cache");
        })
        .join();

        let set = cache.set("AAPL", "text".to_string(), Duration::from_secs(60));
        assert_eq!(set.unwrap_err().kind(), ErrorKind::Storage);
        assert_eq!(cache.get("AAPL").unwrap_err().kind(), ErrorKind::Storage);
        assert_eq!(cache.invalidate("AAPL").unwrap_err().kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_pipeline() {
        let service = service(Duration::from_secs(60), usize::MAX);
        let first = service.summary("aapl").await.unwrap();
        let second = service.summary("AAPL").await.unwrap();
        assert_eq!(first.summary, "summary #1");
        assert_eq!(second, first);
        assert_eq!(calls(&service), 1);
    }

    #[tokio::test]
    async fn test_same_ticker_requests_share_one_run() {
        let service = service(Duration::from_secs(60), usize::MAX);
        let (a, b, c) = tokio::join!(
            service.summary("AAPL"),
            service.summary("AAPL"),
            service.summary("aapl"),
        );
        assert_eq!(a.unwrap().summary, "summary #1");
        assert_eq!(b.unwrap().summary, "summary #1");
        assert_eq!(c.unwrap().summary, "summary #1");
        assert_eq!(calls(&service), 1);
        assert!(service.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ticker_locks_released_after_runs() {
        let service = service(Duration::from_secs(60), usize::MAX);
        service.summary("AAPL").await.unwrap();
        service.summary("ZZZ").await.unwrap_err();
        assert!(service.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_summary_served_on_transient_error() {
        let service = service(Duration::ZERO, 1);
        let first = service.summary("AAPL").await.unwrap();
        assert_eq!(first.summary, "summary #1");

        let second = service.summary("AAPL").await.unwrap();
        assert_eq!(second.summary, "summary #1");
        assert!(!second.fresh);
        assert_eq!(calls(&service), 2);
    }

    #[tokio::test]
    async fn test_errors_without_cache_propagate() {
        let service = service(Duration::from_secs(60), 0);
        let err = service.summary("AAPL").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = service.summary("ZZZ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoContent);
    }
}
