use std::time::Duration;

/// Attempts after the first failure.
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Retry a closure on transient `ureq::Error`s with exponential backoff
/// plus jitter. Non-transient errors surface immediately.
#[allow(clippy::result_large_err)]
pub fn retry_http<T>(
    op_name: &str,
    f: impl Fn() -> std::result::Result<T, ureq::Error>,
) -> std::result::Result<T, ureq::Error> {
    let mut delay_ms = RETRY_DELAY_MS;
    let mut last_err = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let jitter = rand::random::<u64>() % delay_ms.max(1);
            std::thread::sleep(Duration::from_millis(delay_ms + jitter));
            delay_ms = (delay_ms * 2).min(RETRY_MAX_DELAY_MS);
        }
        match f() {
            Ok(val) => return Ok(val),
            Err(e) if is_retryable(&e) && attempt < MAX_RETRIES => {
                tracing::warn!(
                    "S3 {op_name}: transient error (attempt {}/{}), retrying: {e}",
                    attempt + 1,
                    MAX_RETRIES,
                );
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap())
}

/// Whether an HTTP error is transient and worth retrying.
pub fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Transport(_) => true,
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
    }
}
