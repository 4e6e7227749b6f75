//! Integration test for [`PostgresPingSignal`] against a real Postgres: a
//! shared container (or an external `IGNITION_TEST_PG_URL`) behind a
//! `OnceCell`.

use ignition_core::{CancellationToken, Signal};
use ignition_probes::PostgresPingSignal;
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedPg {
    url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn init_shared_pg() -> SharedPg {
    if let Ok(url) = std::env::var("IGNITION_TEST_PG_URL") {
        return SharedPg {
            url,
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("18")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    SharedPg {
        url,
        _container: Some(container),
    }
}

async fn pg_url() -> &'static str {
    let shared = SHARED_PG.get_or_init(init_shared_pg).await;
    &shared.url
}

#[tokio::test]
async fn reports_succeeded_against_a_live_postgres() {
    let url = pg_url().await;
    let signal = PostgresPingSignal::new("postgres", url);
    signal
        .wait(CancellationToken::new())
        .await
        .expect("SELECT 1 should succeed against a live container");
}
