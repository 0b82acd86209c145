use std::{env::var, time::Duration};
use postq::{Config, Connection, Result};

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_url(&var("DATABASE_URL").unwrap()).await?;
    conn.execute("SELECT 1").await?.fetch_all().await?;
    conn.close().await?;

    let conn = Connection::connect_env().await?;
    tracing::info!(
        state = %conn.state(),
        server_version = conn.parameter("server_version"),
        key = ?conn.backend_key_data(),
        "connected",
    );
    conn.close().await?;

    let config = Config::from_env()
        .set_param("application_name", "postq-example")
        .set_timeout(Duration::from_secs(5));
    let mut conn = Connection::connect(&config).await?;
    let name = conn.execute("SELECT current_setting('application_name')").await?.fetch_all().await?;
    assert_eq!(name[0].field(0)?, Some("postq-example"));
    conn.close().await?;

    Ok(())
}
