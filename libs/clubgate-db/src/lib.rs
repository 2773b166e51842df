pub mod models;
pub mod repositories;

pub use sqlx;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run DB migrations")?;

    Ok(pool)
}

/// True for transient conflicts worth a single retry: serialization failure
/// (40001) or deadlock detected (40P01).
pub fn is_serialization_failure(err: &anyhow::Error) -> bool {
    has_sqlstate(err, &["40001", "40P01"])
}

fn has_sqlstate(err: &anyhow::Error, codes: &[&str]) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .and_then(|db| db.code())
            .map(|code| codes.contains(&code.as_ref()))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_sqlx_errors_are_not_conflicts() {
        let err = anyhow::anyhow!("plain error");
        assert!(!is_serialization_failure(&err));
    }

    #[test]
    fn wrapped_io_error_is_not_a_conflict() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = anyhow::Error::new(sqlx::Error::Io(io)).context("insert failed");
        assert!(!is_serialization_failure(&err));
    }
}
