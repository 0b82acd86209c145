use futures::StreamExt;
use postq::{Connection, Result, types::Json};

#[derive(Debug, serde::Deserialize)]
#[allow(unused)]
struct Profile {
    name: String,
    tags: Vec<String>,
}

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    conn.execute("CREATE TEMP TABLE post(id serial, name text, profile jsonb)").await?;

    let rs = conn.execute(r#"
        INSERT INTO post(name, profile) VALUES
        ('foo', '{"name":"foo","tags":["a"]}'),
        ('bar', NULL)
    "#).await?;
    assert_eq!(rs.rows_affected(), 2);
    drop(rs);

    let mut rs = conn.execute("SELECT id, name, profile FROM post ORDER BY id").await?;
    while let Some(row) = rs.next().await? {
        let id: i32 = row.try_get("id")?;
        let name = row.field("name")?;
        let profile: Option<Json<Profile>> = row.try_get("profile")?;
        tracing::info!(id, name, ?profile, "post");
    }

    // dropped before finished, rest of the result is discarded on next query
    let mut rs = conn.execute("SELECT * FROM generate_series(1, 1000)").await?;
    let _ = rs.next().await?;
    drop(rs);

    let rs = conn.execute("SELECT 1 AS a; SELECT 'two' AS b, NULL AS c").await?;
    let rows = rs.collect::<Vec<_>>().await;
    for row in rows {
        let row = row?;
        for field in &row {
            tracing::info!(column = field.name(), value = field.as_str()?, "field");
        }
    }

    let (id, name) = conn
        .execute("SELECT 420, 'Foo'")
        .await?
        .next_as::<(i32, String)>()
        .await?
        .unwrap();
    assert_eq!(id, 420);
    assert_eq!(name, "Foo");

    conn.close().await
}
