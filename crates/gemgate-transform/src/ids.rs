use rand::Rng;
use rand::distr::Alphanumeric;

fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Tool-call ids are freshly generated on every translation; the native
/// format does not carry ids for function calls.
pub fn tool_call_id() -> String {
    format!("call_{}", random_suffix(29))
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", random_suffix(29))
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
