use crate::{CircuitBreaker, CircuitBreakerError};
use futures::future::BoxFuture;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

pub(crate) type FallbackFn<Req, Res, Err> =
    dyn Fn(Req) -> BoxFuture<'static, Result<Res, Err>> + Send + Sync;
pub(crate) type SharedFallback<Req, Res, Err> = Arc<FallbackFn<Req, Res, Err>>;

/// A Tower Layer that guards an inner service with a shared [`CircuitBreaker`].
///
/// The layer does not own a breaker of its own. Every service it produces
/// reports into the breaker it was given, so a breaker taken from a
/// [`CircuitBreakerRegistry`](crate::CircuitBreakerRegistry) is shared between
/// the Tower stack and any direct `execute` callers.
///
/// Errors from the inner service count as failures and are returned as
/// [`CircuitBreakerError::Inner`]; rejected requests never reach it.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tower::{ServiceBuilder, service_fn};
/// use tripwire_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer};
///
/// let breaker = Arc::new(CircuitBreaker::new("echo", CircuitBreakerConfig::default()));
///
/// let service = ServiceBuilder::new()
///     .layer(CircuitBreakerLayer::new(breaker))
///     .service(service_fn(|req: String| async move { Ok::<_, std::io::Error>(req) }));
/// ```
#[derive(Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerLayer {
    /// Creates a layer reporting into `breaker`.
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    /// The breaker this layer reports into.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitBreakerService {
            inner: service,
            breaker: Arc::clone(&self.breaker),
        }
    }
}

/// A Tower Service that applies circuit breaker logic to an inner service.
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S> CircuitBreakerService<S> {
    /// The breaker guarding this service.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Sets a fallback used to answer requests the circuit rejects.
    ///
    /// When the circuit rejects a request, the fallback receives it and its
    /// result is returned in place of the inner service's. Errors from the
    /// fallback are returned as [`CircuitBreakerError::Inner`] and are not
    /// recorded as failures.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use futures::future::BoxFuture;
    /// use tower::{Layer, service_fn};
    /// use tripwire_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer};
    ///
    /// let breaker = Arc::new(CircuitBreaker::new("profile", CircuitBreakerConfig::default()));
    /// let svc = service_fn(|req: String| async move { Ok::<String, String>(req) });
    ///
    /// let service = CircuitBreakerLayer::new(breaker)
    ///     .layer(svc)
    ///     .with_fallback(|_req: String| -> BoxFuture<'static, Result<String, String>> {
    ///         Box::pin(async { Ok("guest profile".to_string()) })
    ///     });
    /// ```
    pub fn with_fallback<Req, Res, Err, F>(
        self,
        fallback: F,
    ) -> CircuitBreakerWithFallback<S, Req, Res, Err>
    where
        F: Fn(Req) -> BoxFuture<'static, Result<Res, Err>> + Send + Sync + 'static,
    {
        CircuitBreakerWithFallback {
            inner: self.inner,
            breaker: self.breaker,
            fallback: Arc::new(fallback),
            _phantom: PhantomData,
        }
    }
}

impl<S> Clone for CircuitBreakerService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            breaker: Arc::clone(&self.breaker),
        }
    }
}

impl<S, Req> Service<Req> for CircuitBreakerService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = CircuitBreakerError<S::Error>;
    type Future = BoxFuture<'static, Result<S::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(CircuitBreakerError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let breaker = Arc::clone(&self.breaker);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let permit = match breaker.acquire() {
                Ok(permit) => permit,
                Err(rejected) => return Err(CircuitBreakerError::OpenCircuit(rejected)),
            };
            let result = inner.call(req).await;
            permit.complete(result).map_err(CircuitBreakerError::Inner)
        })
    }
}

/// A circuit breaker service with a configured fallback handler.
///
/// This type is returned by [`CircuitBreakerService::with_fallback`].
pub struct CircuitBreakerWithFallback<S, Req, Res, Err> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
    fallback: SharedFallback<Req, Res, Err>,
    _phantom: PhantomData<fn(Req) -> (Res, Err)>,
}

impl<S, Req, Res, Err> CircuitBreakerWithFallback<S, Req, Res, Err> {
    /// The breaker guarding this service.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<S, Req, Res, Err> Clone for CircuitBreakerWithFallback<S, Req, Res, Err>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            breaker: Arc::clone(&self.breaker),
            fallback: Arc::clone(&self.fallback),
            _phantom: PhantomData,
        }
    }
}

impl<S, Req, Res, Err> Service<Req> for CircuitBreakerWithFallback<S, Req, Res, Err>
where
    S: Service<Req, Response = Res, Error = Err> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Res: Send + 'static,
    Err: Send + 'static,
    Req: Send + 'static,
{
    type Response = Res;
    type Error = CircuitBreakerError<Err>;
    type Future = BoxFuture<'static, Result<Res, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(CircuitBreakerError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let breaker = Arc::clone(&self.breaker);
        let mut inner = self.inner.clone();
        let fallback = Arc::clone(&self.fallback);

        Box::pin(async move {
            let permit = match breaker.acquire() {
                Ok(permit) => permit,
                Err(_) => {
                    breaker.fallback_started();
                    return fallback(req).await.map_err(CircuitBreakerError::Inner);
                }
            };
            let result = inner.call(req).await;
            permit.complete(result).map_err(CircuitBreakerError::Inner)
        })
    }
}
