//! PostgreSQL container fixture

use anyhow::{bail, Result};
use pglog::config::PgLogConfig;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::time::sleep;
use tracing::{debug, info};

const DB: &str = "logs";
const USER: &str = "writer";
const PASSWORD: &str = "writer-pass";

/// Throwaway PostgreSQL server
pub struct TestPostgres {
    /// Held so the container lives as long as the fixture
    pub container: ContainerAsync<Postgres>,
    /// Host the port is mapped on
    pub host: String,
    /// Mapped PostgreSQL port
    pub port: u16,
}

/// Call `attempt` until it yields `Some`, sleeping `delay * n` after the n-th miss
async fn poll<T, F, Fut>(what: &str, tries: u32, delay: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for n in 1..=tries {
        if let Some(value) = attempt().await {
            debug!(what, attempts = n, "fixture ready");
            return Ok(value);
        }
        sleep(delay * n).await;
    }
    bail!("{} not ready after {} attempts", what, tries)
}

impl TestPostgres {
    /// Start a container and wait until it accepts queries
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_env_var("POSTGRES_DB", DB)
            .with_env_var("POSTGRES_USER", USER)
            .with_env_var("POSTGRES_PASSWORD", PASSWORD)
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        // The mapped port can lag behind `start`.
        let handle = &container;
        let port = poll("mapped port", 10, Duration::from_millis(100), move || async move {
            handle.get_host_port_ipv4(5432).await.ok()
        })
        .await?;

        let pg = Self {
            container,
            host,
            port,
        };
        let server = &pg;
        poll("postgres", 20, Duration::from_millis(250), move || async move {
            let client = server.connect().await.ok()?;
            client.simple_query("SELECT 1").await.ok().map(|_| ())
        })
        .await?;

        info!(host = %pg.host, port = pg.port, "PostgreSQL container up");
        Ok(pg)
    }

    /// Plain tokio-postgres client for setup and assertions
    pub async fn connect(&self) -> Result<tokio_postgres::Client> {
        let (client, connection) = tokio_postgres::Config::new()
            .host(&self.host)
            .port(self.port)
            .user(USER)
            .password(PASSWORD)
            .dbname(DB)
            .connect(tokio_postgres::NoTls)
            .await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "fixture connection ended");
            }
        });

        Ok(client)
    }

    /// Sink configuration pointing at this server
    pub fn sink_config(&self) -> PgLogConfig {
        PgLogConfig {
            host: self.host.clone(),
            port: Some(self.port),
            database: DB.to_string(),
            username: USER.to_string(),
            password: PASSWORD.into(),
            ..Default::default()
        }
    }

    /// Create the `events` table used by most tests
    pub async fn create_events_table(&self) -> Result<()> {
        self.connect()
            .await?
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    a BIGINT PRIMARY KEY,
                    b TEXT
                );
                TRUNCATE TABLE events;
                "#,
            )
            .await?;
        Ok(())
    }
}
