use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use futures_util::future::{LocalBoxFuture, ready, Ready};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::repo::Repo;

/// Installs the global Prometheus recorder. Only one may exist per process.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Publishes store counts as gauges every `interval`. Errors are logged and the loop goes on.
pub fn spawn_stats_refresher(repo: Arc<dyn Repo>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match repo.stats().await {
                Ok(s) => {
                    metrics::gauge!("store_users", s.users as f64);
                    metrics::gauge!("store_topics", s.topics as f64);
                    metrics::gauge!("store_explained_topics", s.explained_topics as f64);
                    tracing::debug!(users = s.users, topics = s.topics, explained = s.explained_topics, "store gauges refreshed");
                }
                Err(e) => tracing::error!(error = %e, "failed to refresh store gauges"),
            }
        }
    })
}

/// Counts `http_requests_total{method, path, status}`; `path` is the route pattern.
#[derive(Clone, Default)]
pub struct RequestMetrics;

impl<S, B> Transform<S, ServiceRequest> for RequestMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestMetricsMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestMetricsMiddleware { service: Rc::new(service) }))
    }
}

pub struct RequestMetricsMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestMetricsMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let method = req.method().to_string();
        // unmatched paths share one label to keep cardinality bounded
        let path = req.match_pattern().unwrap_or_else(|| "unmatched".to_string());
        Box::pin(async move {
            let res = svc.call(req).await?;
            let status = res.status().as_u16().to_string();
            metrics::increment_counter!("http_requests_total", "method" => method, "path" => path, "status" => status);
            Ok(res)
        })
    }
}
