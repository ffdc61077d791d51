//! Live browser tests. They need a local Chrome/Chromium and network access.

use harvest_browser::{BrowserEngine, PageDriver};
use harvest_core::BrowserConfig;

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_open_and_snapshot() {
    let settings = BrowserConfig::default();
    let engine = BrowserEngine::launch(&settings).await.expect("launch browser");

    let page = engine
        .open("https://example.com", Vec::new())
        .await
        .expect("open page");

    let html = page.html().await.expect("page html");
    assert!(html.contains("Example Domain"));

    assert!(page.count("h1").await.expect("count") >= 1);
    assert_eq!(
        page.text_of("h1").await.expect("text").as_deref(),
        Some("Example Domain")
    );

    let metrics = page.scroll_metrics().await.expect("metrics");
    assert!(metrics.viewport_height > 0);

    engine.close().await.expect("close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_controls_and_missing_click() {
    let engine = BrowserEngine::launch(&BrowserConfig::default())
        .await
        .expect("launch browser");
    let page = engine
        .open("https://example.com", Vec::new())
        .await
        .expect("open page");

    let links = page.controls("a").await.expect("controls");
    assert!(!links.is_empty());
    assert!(links[0].href.is_some());

    assert!(page.click(".does-not-exist", 0).await.is_err());
    assert_eq!(page.text_of(".does-not-exist").await.expect("text"), None);

    engine.close().await.expect("close browser");
}
