//! Tower middleware guarding a service with a [`RuleManager`].
//!
//! Every request is checked against the rules of one resource before it
//! reaches the inner service. Queued admissions wait inside the returned
//! future; rejected requests never reach the inner service.
//!
//! ```rust
//! use std::sync::Arc;
//! use flowgate::{CallContext, FlowControlLayer, RuleManager, RuleSpec, StatsNode};
//! use tower::{service_fn, Layer, Service, ServiceExt};
//!
//! #[derive(Debug)]
//! struct Idle;
//! impl StatsNode for Idle {
//!     fn current_qps(&self, _: &str) -> f64 { 0.0 }
//!     fn current_concurrency(&self, _: &str) -> u32 { 0 }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = Arc::new(RuleManager::new());
//! manager.load_rules(vec![RuleSpec::qps("echo", 100.0)]);
//!
//! let layer = FlowControlLayer::new(manager, "echo", Arc::new(Idle))
//!     .with_caller(|req: &String| CallContext::new(req.clone()));
//! let mut svc = layer.layer(service_fn(|req: String| async move {
//!     Ok::<_, std::convert::Infallible>(req.len())
//! }));
//! let len = svc.ready().await.unwrap().call("billing".to_string()).await.unwrap();
//! assert_eq!(len, 7);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::error::FlowRejected;
use crate::manager::RuleManager;
use crate::stats::{CallContext, StatsNode};

/// Error returned by [`FlowControlService`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlowControlError<E> {
    /// A flow rule rejected the request.
    Rejected(FlowRejected),
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for FlowControlError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(rejected) => write!(f, "{}", rejected),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for FlowControlError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rejected(rejected) => Some(rejected),
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> From<FlowRejected> for FlowControlError<E> {
    fn from(rejected: FlowRejected) -> Self {
        Self::Rejected(rejected)
    }
}

impl<E> FlowControlError<E> {
    /// Check if a flow rule rejected the request.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
    /// Borrow the rejection, if present.
    pub fn rejection(&self) -> Option<&FlowRejected> {
        match self {
            Self::Rejected(rejected) => Some(rejected),
            Self::Inner(_) => None,
        }
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected(_) => None,
        }
    }
}

/// Derives the caller identity of a request.
pub trait CallerExtractor<Req>: Clone + Send + Sync + 'static {
    /// Context the rules of the guarded resource are evaluated with.
    fn context(&self, req: &Req) -> CallContext;
}

/// Extractor treating every request as coming from an unknown caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousCaller;

impl<Req> CallerExtractor<Req> for AnonymousCaller {
    fn context(&self, _req: &Req) -> CallContext {
        CallContext::anonymous()
    }
}

impl<Req, F> CallerExtractor<Req> for F
where
    F: Fn(&Req) -> CallContext + Clone + Send + Sync + 'static,
{
    fn context(&self, req: &Req) -> CallContext {
        self(req)
    }
}

/// A layer that checks flow rules for one resource before each request.
#[derive(Clone, Debug)]
pub struct FlowControlLayer<X = AnonymousCaller> {
    manager: Arc<RuleManager>,
    resource: Arc<str>,
    stats: Arc<dyn StatsNode>,
    extractor: X,
    weight: u32,
}

impl FlowControlLayer {
    /// Guard `resource`, reading usage from `stats`. Requests are anonymous
    /// and weigh 1 until configured otherwise.
    pub fn new(
        manager: Arc<RuleManager>,
        resource: impl Into<Arc<str>>,
        stats: Arc<dyn StatsNode>,
    ) -> Self {
        Self { manager, resource: resource.into(), stats, extractor: AnonymousCaller, weight: 1 }
    }
}

impl<X> FlowControlLayer<X> {
    /// Derive the caller of each request with `extractor`.
    pub fn with_caller<Y>(self, extractor: Y) -> FlowControlLayer<Y> {
        FlowControlLayer {
            manager: self.manager,
            resource: self.resource,
            stats: self.stats,
            extractor,
            weight: self.weight,
        }
    }

    /// Units each request consumes.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

impl<S, X: Clone> Layer<S> for FlowControlLayer<X> {
    type Service = FlowControlService<S, X>;

    fn layer(&self, service: S) -> Self::Service {
        FlowControlService {
            inner: service,
            manager: self.manager.clone(),
            resource: self.resource.clone(),
            stats: self.stats.clone(),
            extractor: self.extractor.clone(),
            weight: self.weight,
        }
    }
}

/// Middleware service that enforces flow rules.
#[derive(Clone, Debug)]
pub struct FlowControlService<S, X = AnonymousCaller> {
    inner: S,
    manager: Arc<RuleManager>,
    resource: Arc<str>,
    stats: Arc<dyn StatsNode>,
    extractor: X,
    weight: u32,
}

impl<S, X, Req> Service<Req> for FlowControlService<S, X>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    X: CallerExtractor<Req>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = FlowControlError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(FlowControlError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let ctx = self.extractor.context(&req);
        let manager = self.manager.clone();
        let resource = self.resource.clone();
        let stats = self.stats.clone();
        let weight = self.weight;
        // Take the instance that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            manager.check_admission(&resource, &ctx, stats.as_ref(), weight).await?;
            inner.call(req).await.map_err(FlowControlError::Inner)
        })
    }
}
