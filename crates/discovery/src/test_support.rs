//! Shared helpers for tests that talk to in-process mock services.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::HeaderMap;
use common::Secret;
use forge::{BindingSettings, ServiceBinding, ServiceKind};
use tokio::net::TcpListener;

use crate::request::{RetryPolicy, Service};

/// Retry policy with millisecond backoff so retry tests stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn secrets(tokens: &[&str]) -> Vec<Secret<String>> {
    tokens.iter().map(|t| Secret::new(t.to_string())).collect()
}

pub fn binding(kind: ServiceKind, name: &str, api_url: &str, orgs: &[&str]) -> ServiceBinding {
    let mut settings = BindingSettings::public(kind);
    settings.name = name.to_string();
    settings.api_url = api_url.to_string();
    settings.organizations = orgs.iter().map(|o| o.to_string()).collect();
    ServiceBinding::new(settings)
}

pub fn service(kind: ServiceKind, name: &str, api_url: &str, orgs: &[&str]) -> Service {
    Service::new(binding(kind, name, api_url, orgs), secrets(&["token-a"]), fast_policy()).unwrap()
}

pub fn github_service(api_url: &str, tokens: &[&str]) -> Service {
    Service::new(
        binding(ServiceKind::GitHub, "github", api_url, &[]),
        secrets(tokens),
        fast_policy(),
    )
    .unwrap()
}

/// Records request headers seen by a mock handler.
#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<HeaderMap>>>);

impl RequestLog {
    /// Store `headers` and return how many requests have been seen, this one included.
    pub fn record(&self, headers: &HeaderMap) -> usize {
        let mut seen = self.0.lock().unwrap();
        seen.push(headers.clone());
        seen.len()
    }

    pub fn headers(&self) -> Vec<HeaderMap> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
