#[cfg(feature = "gui")]
use once_cell::sync::Lazy;

#[cfg(feature = "gui")]
pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

#[cfg(feature = "gui")]
pub fn spawn_async<F>(fut: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    RUNTIME.spawn(fut);
}

/// Run `fut` on the shared runtime and hand its output to `on_done` on the
/// GLib main loop.
#[cfg(feature = "gui")]
pub fn run_async_to_main<T, Fut, F>(fut: Fut, on_done: F)
where
    T: Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    F: FnOnce(T) + 'static,
{
    let handle = RUNTIME.spawn(fut);
    glib::MainContext::default().spawn_local(async move {
        match handle.await {
            Ok(out) => on_done(out),
            Err(e) => log::error!("background task failed: {e}"),
        }
    });
}

/// Accepts `host:port`, `http(s)://…` or `ws(s)://…`; bare hosts get `https://`.
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Up to two uppercase initials for an avatar, `?` for a blank name.
pub fn initials(name: &str) -> String {
    let out: String = name
        .split_whitespace()
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect();
    if out.is_empty() {
        "?".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_urls() {
        assert_eq!(normalize_url(" chat.example.com/ "), "https://chat.example.com");
        assert_eq!(normalize_url("http://10.0.0.2:8000/"), "http://10.0.0.2:8000");
        assert_eq!(normalize_url("ws://localhost:1"), "ws://localhost:1");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn initials_take_two_words() {
        assert_eq!(initials("alice bob carol"), "AB");
        assert_eq!(initials("zoë"), "Z");
        assert_eq!(initials("   "), "?");
    }
}
