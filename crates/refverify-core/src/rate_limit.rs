//! Per-source rate limiting with adaptive governor instances and 429 retry.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::sources::{SourceError, SourceKind};

type DirectLimiter = Governor<NotKeyed, InMemoryState, DefaultClock>;

/// Smallest delay accepted for delay-based gates.
pub const MIN_DELAY: Duration = Duration::from_millis(500);

/// Default delay between ArXiv requests.
pub const ARXIV_DEFAULT_DELAY: Duration = Duration::from_secs(3);

const MAX_SLOWDOWN: u32 = 16;
const COOLDOWN: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

static ARXIV_LIMITER: OnceCell<Arc<RateLimiter>> = OnceCell::new();

fn direct(period: Duration) -> DirectLimiter {
    let quota = Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
    DirectLimiter::direct(quota)
}

/// Rate gate with adaptive slow-down via ArcSwap.
///
/// The first `wait()` passes immediately; each later one waits until the
/// period has elapsed since the previous permit. On a 429 the governor is
/// swapped for a slower one (doubling, capped at 16x). After 60s without
/// another 429 the base rate is restored.
pub struct RateLimiter {
    limiter: ArcSwap<DirectLimiter>,
    base_period: Duration,
    factor: AtomicU32,
    last_429: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("base_period", &self.base_period)
            .field("factor", &self.factor.load(Ordering::Relaxed))
            .finish()
    }
}

impl RateLimiter {
    fn with_period(period: Duration) -> Self {
        Self {
            limiter: ArcSwap::from_pointee(direct(period)),
            base_period: period,
            factor: AtomicU32::new(1),
            last_429: Mutex::new(None),
        }
    }

    /// A gate allowing one request per `delay`, never faster than 0.5s.
    pub fn with_delay(delay: Duration) -> Self {
        Self::with_period(delay.max(MIN_DELAY))
    }

    /// A gate allowing `n` requests per second.
    pub fn per_second(n: u32) -> Self {
        Self::with_period(Duration::from_secs(1) / n.max(1))
    }

    /// The process-wide ArXiv gate. The first caller's delay wins; later
    /// callers share the same instance whatever they pass.
    pub fn arxiv(delay: Duration) -> Arc<Self> {
        ARXIV_LIMITER
            .get_or_init(|| Arc::new(Self::with_delay(delay)))
            .clone()
    }

    /// Current effective delay, including any 429 slow-down.
    pub fn delay(&self) -> Duration {
        self.base_period * self.factor.load(Ordering::SeqCst)
    }

    /// Wait until the gate permits another request.
    pub async fn wait(&self) {
        self.try_decay();
        let limiter = self.limiter.load_full();
        limiter.until_ready().await;
    }

    /// Like [`wait`](Self::wait), but gives up when `cancel` fires.
    pub async fn wait_or_cancel(&self, cancel: &CancellationToken) -> Result<(), SourceError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            _ = self.wait() => Ok(()),
        }
    }

    /// Record a 429: double the slow-down factor and swap the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }
        let _ = self
            .factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(MAX_SLOWDOWN))
            });
        let factor = self.factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor) {
            self.limiter.store(Arc::new(direct(scaled)));
        }
    }

    fn try_decay(&self) {
        let cooled = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed() >= COOLDOWN))
            .unwrap_or(false);
        if cooled && self.factor.swap(1, Ordering::SeqCst) > 1 {
            log::debug!("rate limiter cooled down to {:?}", self.base_period);
            self.limiter.store(Arc::new(direct(self.base_period)));
        }
    }
}

/// One rate gate per remote source.
#[derive(Debug)]
pub struct RateLimiters {
    limiters: HashMap<SourceKind, Arc<RateLimiter>>,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(false, false, ARXIV_DEFAULT_DELAY)
    }
}

impl RateLimiters {
    /// Build the gates based on whether a CrossRef contact and a Semantic
    /// Scholar key are configured.
    pub fn new(has_crossref_mailto: bool, has_s2_api_key: bool, arxiv_delay: Duration) -> Self {
        let mut limiters = HashMap::new();

        // CrossRef: 1/s anonymous, 3/s in the polite pool
        let crossref_rate = if has_crossref_mailto { 3 } else { 1 };
        limiters.insert(
            SourceKind::Crossref,
            Arc::new(RateLimiter::per_second(crossref_rate)),
        );

        limiters.insert(SourceKind::Arxiv, RateLimiter::arxiv(arxiv_delay));

        // Semantic Scholar: a key gets 1/s of its own, keyless shares a pool
        let s2_rate = if has_s2_api_key { 1 } else { 10 };
        limiters.insert(
            SourceKind::SemanticScholar,
            Arc::new(RateLimiter::per_second(s2_rate)),
        );

        limiters.insert(SourceKind::OpenAlex, Arc::new(RateLimiter::per_second(10)));

        limiters.insert(
            SourceKind::Scholar,
            Arc::new(RateLimiter::with_delay(Duration::from_secs(2))),
        );

        Self { limiters }
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<RateLimiter>> {
        self.limiters.get(&kind).cloned()
    }
}

/// Check if an HTTP response is a 429 and extract Retry-After if present.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), SourceError> {
    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(SourceError::RateLimited { retry_after })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    Some(
        when.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}

fn backoff(attempt: u32, retry_after: Option<Duration>) -> Duration {
    retry_after
        .unwrap_or_else(|| {
            let base_ms = 1000u64 << attempt.min(4);
            Duration::from_millis(base_ms + fastrand::u64(0..500))
        })
        .min(MAX_BACKOFF)
}

/// Send a request with proactive rate limiting and reactive 429 retry.
///
/// `build` is called once per attempt. Every wait (gate, request, backoff)
/// is abandoned as soon as `cancel` fires. After `max_retries` retries a
/// persisting 429 is returned as [`SourceError::RateLimited`].
pub async fn send_with_retry<F>(
    source: &str,
    limiter: Option<&RateLimiter>,
    max_retries: u32,
    cancel: &CancellationToken,
    build: F,
) -> Result<reqwest::Response, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        if let Some(lim) = limiter {
            lim.wait_or_cancel(cancel).await?;
        }

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            resp = build().send() => resp?,
        };

        let retry_after = match check_rate_limit_response(&resp) {
            Ok(()) => return Ok(resp),
            Err(SourceError::RateLimited { retry_after }) => retry_after,
            Err(other) => return Err(other),
        };
        if attempt >= max_retries {
            return Err(SourceError::RateLimited { retry_after });
        }
        if let Some(lim) = limiter {
            lim.on_rate_limited();
        }

        let wait = backoff(attempt, retry_after);
        attempt += 1;
        log::info!(
            "{}: 429 rate limited, retry {}/{} after {:.1}s",
            source,
            attempt,
            max_retries,
            wait.as_secs_f64()
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
