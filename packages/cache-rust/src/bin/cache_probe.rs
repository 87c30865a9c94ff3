//! Connectivity probe: drives one cache round-trip against a live far tier.
//!
//! Usage: `cache-probe [redis-url]` (defaults to `redis://127.0.0.1:6379`).
//! Exits non-zero when the far tier is unreachable.

use std::process::ExitCode;
use std::time::Duration;

use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use heytom_cache::{CacheConfig, ExpirationOptions, HybridCache};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
    let config = CacheConfig {
        far_connection_string: url.clone(),
        ..CacheConfig::default()
    };

    let cache = match HybridCache::connect(config).await {
        Ok(cache) => cache,
        Err(err) => {
            tracing::error!(url = %url, error = %err, "far tier unreachable");
            return ExitCode::FAILURE;
        }
    };

    let key = "heytom:probe";
    let payload = Bytes::from_static(b"probe");
    let outcome = async {
        cache
            .set(key, payload.clone(), ExpirationOptions::absolute_after(Duration::from_secs(30)))
            .await?;
        let read_back = cache.get(key).await?;
        cache.remove(key).await?;
        Ok::<_, heytom_cache::CacheError>(read_back)
    }
    .await;

    let code = match outcome {
        Ok(Some(value)) if value == payload => {
            let snapshot = cache.metrics();
            tracing::info!(
                url = %url,
                requests = snapshot.total_requests,
                hit_rate = snapshot.hit_rate(),
                "probe round-trip succeeded"
            );
            ExitCode::SUCCESS
        }
        Ok(other) => {
            tracing::error!(url = %url, ?other, "probe read back the wrong value");
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!(url = %url, error = %err, "probe round-trip failed");
            ExitCode::FAILURE
        }
    };

    cache.close().await;
    code
}
