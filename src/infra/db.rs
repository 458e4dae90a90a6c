use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::{env_parse, env_string, first_env};

pub type Db = sqlx::PgPool;

pub async fn connect() -> anyhow::Result<Db> {
    let url = env_string("DATABASE_URL")
        .or_else(derive_supabase_db_url)
        .ok_or_else(|| anyhow::anyhow!(
            "DATABASE_URL missing. Set DATABASE_URL or Supabase env vars (SUPABASE_URL + SUPABASE_DB_PASSWORD)."
        ))?;
    let max_connections = env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(5);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await
        .with_context(
            || "failed to connect to database; check DATABASE_URL/Supabase credentials",
        )?;
    info!(max_connections, "database pool ready");
    Ok(pool)
}

pub async fn migrate(pool: &Db) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to apply database migrations")?;
    Ok(())
}

fn derive_supabase_db_url() -> Option<String> {
    let (supabase_url, supabase_source) = supabase_url_from_env().or_else(|| {
        env_string("SUPABASE_PROJECT_REF")
            .map(|r| (format!("https://{r}.supabase.co"), "SUPABASE_PROJECT_REF"))
    })?;
    let project_ref = supabase_project_ref(&supabase_url)?;
    let host = env_string("SUPABASE_DB_HOST")
        .unwrap_or_else(|| format!("db.{}.supabase.co", project_ref));
    let pooled = host.contains("pooler.supabase.com");
    let port: u16 = env_parse("SUPABASE_DB_PORT").unwrap_or(if pooled { 6543 } else { 5432 });
    let user = env_string("SUPABASE_DB_USER").unwrap_or_else(|| {
        if pooled {
            format!("postgres.{}", project_ref)
        } else {
            "postgres".to_string()
        }
    });
    let password = first_env(&["SUPABASE_DB_PASSWORD", "DATABASE_PASSWORD", "SUPABASE_PASSWORD"])?;

    warn!(
        "DATABASE_URL missing; deriving Supabase connection using {supabase_source} (host={host}, user={user}, port={port})"
    );

    Some(format!(
        "postgresql://{}:{}@{}:{}/postgres",
        user,
        urlencoding::encode(&password),
        host,
        port
    ))
}

fn supabase_url_from_env() -> Option<(String, &'static str)> {
    ["SUPABASE_URL", "VITE_SUPABASE_URL", "REACT_APP_SUPABASE_URL"]
        .into_iter()
        .find_map(|key| env_string(key).map(|val| (val, key)))
}

fn supabase_project_ref(url: &str) -> Option<String> {
    let host = url.split("://").nth(1)?;
    host.split('.').next().filter(|s| !s.is_empty()).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::supabase_project_ref;

    #[test]
    fn project_ref_is_first_host_label() {
        assert_eq!(
            supabase_project_ref("https://abcdxyz.supabase.co").as_deref(),
            Some("abcdxyz")
        );
        assert_eq!(supabase_project_ref("abcdxyz.supabase.co"), None);
    }
}
