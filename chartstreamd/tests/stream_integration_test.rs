//! End-to-end pipeline tests: store through mirrors to a streaming session.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use chartstreamd::{
    Admin, BackendRegistry, Chart, ChartMetric, ConfigStore, DataSource, Error, MemStore, Metric,
    Mirror, Querier, QuerierFactory, Result, SessionDescriptor, SessionState, Sessions,
};

/// Backend that reports the same two entities every round and counts its
/// calls.
struct CountingQuerier {
    datasource: String,
    chart_name: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Querier for CountingQuerier {
    fn datasource(&self) -> &str {
        &self.datasource
    }

    async fn query(&self) -> Result<Vec<Metric>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(vec![
            Metric {
                name: "web-1".to_string(),
                chart_name: self.chart_name.clone(),
                timestamp: 1_756_000_000,
                value: "0.42".to_string(),
            },
            Metric {
                name: "db-9".to_string(),
                chart_name: self.chart_name.clone(),
                timestamp: 1_756_000_000,
                value: "0.9".to_string(),
            },
        ])
    }
}

fn counting_factory(calls: Arc<AtomicUsize>) -> QuerierFactory {
    Box::new(move |source, metrics| {
        let chart_name = metrics
            .first()
            .map(|m| m.chart_name.clone())
            .unwrap_or_default();
        let querier: Box<dyn Querier> = Box::new(CountingQuerier {
            datasource: source.name.clone(),
            chart_name,
            calls: Arc::clone(&calls),
        });
        Ok(querier)
    })
}

struct Harness {
    admin: Admin,
    sessions: Sessions,
    calls: Arc<AtomicUsize>,
}

async fn harness() -> Harness {
    let store: Arc<dyn ConfigStore> = Arc::new(MemStore::new());
    let ready = Duration::from_secs(2);
    let datasources = Arc::new(
        Mirror::<DataSource>::start(store.as_ref(), ready)
            .await
            .unwrap(),
    );
    let charts = Arc::new(Mirror::<Chart>::start(store.as_ref(), ready).await.unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = BackendRegistry::new();
    registry
        .register("static", counting_factory(Arc::clone(&calls)))
        .unwrap();
    let registry = Arc::new(registry);
    let admin = Admin::new(store, datasources, charts, Arc::clone(&registry));
    let sessions = Sessions::new(admin.clone(), registry, Duration::from_secs(2));
    Harness {
        admin,
        sessions,
        calls,
    }
}

fn source(name: &str) -> DataSource {
    DataSource {
        name: name.to_string(),
        backend_type: "static".to_string(),
        connection_string: "mem://".to_string(),
    }
}

fn chart(name: &str, datasource: &str) -> Chart {
    Chart {
        name: name.to_string(),
        metrics: vec![ChartMetric {
            name: format!("{name}-series"),
            chart_name: name.to_string(),
            query: "up".to_string(),
            datasource_name: datasource.to_string(),
        }],
    }
}

fn descriptor(charts: &[&str], entities: &[&str]) -> SessionDescriptor {
    SessionDescriptor {
        chart_names: charts.iter().map(|s| s.to_string()).collect(),
        entity_names: entities.iter().map(|s| s.to_string()).collect(),
        poll_interval: 1,
        fill: None,
    }
}

/// Polls until `check` passes or two seconds elapse; writes reach the
/// mirrors through the event stream, not synchronously.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_stream_session_end_to_end() {
    let h = harness().await;

    h.admin
        .create_datasources(vec![source("prom-east")])
        .await
        .unwrap();
    assert!(
        eventually(|| async { h.admin.read_datasources().await.unwrap().len() == 1 }).await,
        "datasource never reached the mirror"
    );
    h.admin
        .create_charts(vec![chart("cpu", "prom-east")])
        .await
        .unwrap();
    assert!(
        eventually(|| async { h.admin.read_charts().await.unwrap().len() == 1 }).await,
        "chart never reached the mirror"
    );

    let mut session = h
        .sessions
        .open(&descriptor(&["cpu"], &["web-1"]))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Running);

    // only the subscribed entity comes through, with its chart attached
    let metric = tokio::time::timeout(Duration::from_secs(2), session.recv())
        .await
        .expect("no metric within one poll interval")
        .unwrap();
    assert_eq!(metric.name, "web-1");
    assert_eq!(metric.chart_name, "cpu");
    assert_eq!(metric.value, "0.42");

    session.cancel();
    assert!(matches!(session.recv().await, Err(Error::Cancelled)));
    assert_eq!(session.state(), SessionState::Cancelled);

    // polling stops once the session is cancelled
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = h.calls.load(Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.calls.load(Ordering::Relaxed), settled);
}

#[tokio::test]
async fn test_referential_integrity_end_to_end() {
    let h = harness().await;

    // charts cannot be created ahead of their datasource
    let err = h
        .admin
        .create_charts(vec![chart("cpu", "prom-east")])
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::MissingDataSources { names } if names == vec!["prom-east".to_string()])
    );

    h.admin
        .create_datasources(vec![source("prom-east")])
        .await
        .unwrap();
    assert!(
        eventually(|| async { h.admin.read_datasources().await.unwrap().len() == 1 }).await,
        "datasource never reached the mirror"
    );
    h.admin
        .create_charts(vec![chart("cpu", "prom-east")])
        .await
        .unwrap();
    assert!(
        eventually(|| async { h.admin.read_charts().await.unwrap().len() == 1 }).await,
        "chart never reached the mirror"
    );

    // deleting the datasource leaves the chart dangling
    h.admin.delete_datasource(&source("prom-east")).await.unwrap();
    assert!(
        eventually(|| async { h.admin.read_datasources().await.unwrap().is_empty() }).await,
        "datasource delete never reached the mirror"
    );

    let result = h.sessions.open(&descriptor(&["cpu"], &["web-1"])).await;
    assert!(
        matches!(result, Err(Error::MissingDataSources { names }) if names == vec!["prom-east".to_string()])
    );

    // the chart itself is still listed; only sessions over it fail
    assert_eq!(h.admin.read_charts().await.unwrap().len(), 1);
}
