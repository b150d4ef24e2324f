//! Server-side markdown rendering with syntax highlighting.
//!
//! Uses comrak for CommonMark parsing and its syntect plugin for code
//! highlighting. Raw HTML in the source is escaped, so the output can be
//! inserted into the page as-is. Results are cached by content hash.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use comrak::plugins::syntect::SyntectAdapter;
use comrak::{Options, Plugins, markdown_to_html_with_plugins};
use once_cell::sync::Lazy;
use tokio::sync::RwLock;

static SYNTECT_ADAPTER: Lazy<SyntectAdapter> =
    Lazy::new(|| SyntectAdapter::new(Some("base16-ocean.dark")));

static RENDER_CACHE: Lazy<Arc<RwLock<MarkdownCache>>> =
    Lazy::new(|| Arc::new(RwLock::new(MarkdownCache::new(500))));

struct CacheEntry {
    source: String,
    html: String,
    inserted: Instant,
}

struct MarkdownCache {
    entries: HashMap<u64, CacheEntry>,
    max_entries: usize,
}

impl MarkdownCache {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    /// Hit only when the stored source matches, so a hash collision misses.
    fn get(&self, hash: u64, source: &str) -> Option<String> {
        self.entries
            .get(&hash)
            .filter(|entry| entry.source == source)
            .map(|entry| entry.html.clone())
    }

    fn insert(&mut self, hash: u64, source: String, html: String) {
        if self.entries.len() >= self.max_entries {
            // Drop the oldest quarter
            let mut entries: Vec<_> = self
                .entries
                .iter()
                .map(|(k, entry)| (*k, entry.inserted))
                .collect();
            entries.sort_by(|a, b| a.1.cmp(&b.1));

            for (key, _) in entries.into_iter().take(self.max_entries / 4) {
                self.entries.remove(&key);
            }
        }

        self.entries.insert(
            hash,
            CacheEntry {
                source,
                html,
                inserted: Instant::now(),
            },
        );
    }
}

fn hash_content(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Render markdown to HTML.
///
/// Repeated calls with the same content return the cached HTML.
pub async fn render_markdown(content: &str) -> String {
    let hash = hash_content(content);

    if let Some(html) = RENDER_CACHE.read().await.get(hash, content) {
        return html;
    }

    // comrak/syntect are CPU bound
    let content_owned = content.to_string();
    let html = tokio::task::spawn_blocking(move || render_markdown_sync(&content_owned))
        .await
        .unwrap_or_else(|_| format!("<pre>{}</pre>", html_escape(content)));

    RENDER_CACHE
        .write()
        .await
        .insert(hash, content.to_string(), html.clone());

    html
}

/// Render several markdown strings in parallel, preserving order.
pub async fn render_markdown_batch(contents: Vec<String>) -> Vec<String> {
    let futures: Vec<_> = contents
        .into_iter()
        .map(|c| async move { render_markdown(&c).await })
        .collect();

    futures::future::join_all(futures).await
}

/// Synchronous rendering, for use inside `spawn_blocking`.
pub fn render_markdown_sync(content: &str) -> String {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.render.escape = true;

    let mut plugins = Plugins::default();
    plugins.render.codefence_syntax_highlighter = Some(&*SYNTECT_ADAPTER);

    markdown_to_html_with_plugins(content, &options, &plugins)
}

/// Escape HTML special characters.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_markdown() {
        let html = render_markdown("# Hello\n\nWorld").await;
        assert!(html.contains("<h1>"));
        assert!(html.contains("Hello"));
    }

    #[tokio::test]
    async fn test_code_block() {
        let html = render_markdown("```rust\nfn main() {}\n```").await;
        assert!(html.contains("fn"));
        assert!(html.contains("<pre") || html.contains("<code"));
    }

    #[tokio::test]
    async fn test_raw_html_is_escaped() {
        let html = render_markdown("hi <script>alert(1)</script>").await;
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn test_cache() {
        let content = "# Cached content";
        let html1 = render_markdown(content).await;
        let html2 = render_markdown(content).await;
        assert_eq!(html1, html2);
    }

    #[test]
    fn test_cache_ignores_entry_for_other_source() {
        let mut cache = MarkdownCache::new(8);
        let hash = hash_content("first reply");
        cache.insert(hash, "first reply".into(), "<p>first reply</p>".into());

        assert_eq!(
            cache.get(hash, "first reply").as_deref(),
            Some("<p>first reply</p>")
        );
        // Same key, different text: treated as a miss.
        assert_eq!(cache.get(hash, "second reply"), None);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let html = render_markdown_batch(vec!["*one*".into(), "**two**".into()]).await;
        assert!(html[0].contains("<em>one</em>"));
        assert!(html[1].contains("<strong>two</strong>"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;");
    }
}
