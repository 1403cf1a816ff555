//! End-to-end tests of the detector over the mock driver.
//!
//! These go through the real worker thread, session manager, probe protocol
//! and filesystem sink; only the browser is scripted.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use hoverprobe::prelude::*;
use hoverprobe::{
    ElementSnapshot, FsArtifactSink, HoverMode, MockDriver, MockHover, MockLauncher,
    NullArtifactSink, RevealedLink, VisibleNode,
};
use std::sync::Arc;
use std::time::Duration;

fn nav() -> ElementSnapshot {
    ElementSnapshot::new(vec![
        VisibleNode::new("UL", 0, 0).with_class("nav"),
        VisibleNode::new("LI", 10, 20)
            .with_class("nav-item")
            .with_text("Products"),
    ])
}

fn nav_with_submenu() -> ElementSnapshot {
    let mut nodes = nav().nodes().to_vec();
    nodes.push(
        VisibleNode::new("A", 40, 20)
            .with_text("Category A")
            .with_href("/category-a"),
    );
    ElementSnapshot::new(nodes)
}

fn quiet_config() -> DetectorConfig {
    DetectorConfig::new().with_probe(ProbeConfig::instant().with_screenshots(false))
}

fn detector(driver: MockDriver) -> (HoverDetector<MockLauncher>, MockLauncher) {
    let launcher = MockLauncher::new(driver);
    let detector =
        HoverDetector::with_sink(launcher.clone(), quiet_config(), Arc::new(NullArtifactSink))
            .unwrap();
    (detector, launcher)
}

// ============================================================================
// Classification scenarios
// ============================================================================

#[tokio::test]
async fn products_menu_reveals_category_link() {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new()
        .with_title("Acme Store")
        .with_snapshot(nav())
        .with_snapshot(nav_with_submenu());
    let config = DetectorConfig::new()
        .with_probe(ProbeConfig::instant())
        .with_output_dir(dir.path())
        .with_session_id("thread-42");
    let detector = HoverDetector::with_launcher(MockLauncher::new(driver), config).unwrap();

    let title = detector.navigate("https://acme.test").await.unwrap();
    assert_eq!(title, "Acme Store");

    let result = detector
        .probe(ProbeRequest::new(r#"text="Products""#).with_label("Products"))
        .await
        .unwrap();

    assert_eq!(result.behavior(), BehaviorCategory::Dropdown);
    assert_eq!(result.new_elements_count(), 1);
    assert_eq!(
        result.revealed_links(),
        &[RevealedLink::new("Category A", "/category-a")]
    );
    assert_eq!(result.new_element_types(), &["A".to_string()]);

    let before = result.screenshot_before().unwrap();
    let after = result.screenshot_after().unwrap();
    assert!(before.as_str().contains("thread-42"));
    assert!(after.as_str().ends_with("002_Products_after.png"));

    let record = detector.record("Products", &result).await.unwrap().unwrap();
    assert!(record.as_str().ends_with("thread-42/behaviors/001_Products.json"));
    let stored: InteractionResult =
        serde_json::from_str(&std::fs::read_to_string(record.as_str()).unwrap()).unwrap();
    assert_eq!(stored, result);

    detector.shutdown().await.unwrap();
}

#[tokio::test]
async fn unchanged_page_reports_no_change() {
    let (detector, _launcher) = detector(MockDriver::new().with_snapshot(nav()));
    let result = detector
        .probe(ProbeRequest::new("#logo").with_label("Logo"))
        .await
        .unwrap();
    assert_eq!(result.behavior(), BehaviorCategory::NoChange);
    assert!(result.revealed_links().is_empty());
    assert!(result.error().is_none());
    detector.shutdown().await.unwrap();
}

#[tokio::test]
async fn hanging_hovers_end_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new()
        .with_snapshot(nav())
        .with_hover(HoverMode::Direct, MockHover::Hang)
        .with_hover(HoverMode::FirstMatch, MockHover::Hang);
    let launcher = MockLauncher::new(driver);
    let config = DetectorConfig::new()
        .with_probe(ProbeConfig::instant().with_hover_timeout(Duration::from_millis(40)))
        .with_output_dir(dir.path());
    let detector = HoverDetector::with_launcher(launcher.clone(), config).unwrap();

    let result = detector.probe(ProbeRequest::new("#mega")).await.unwrap();

    assert_eq!(result.behavior(), BehaviorCategory::Unreachable);
    assert!(result.revealed_links().is_empty());
    assert!(result.screenshot_after().is_none());
    assert!(result.error().is_some());
    assert!(!launcher.driver().was_called("hover:forced"));

    // The worker is still healthy after the timeouts
    assert!(detector.is_live().await.unwrap());
    detector.shutdown().await.unwrap();
}

#[tokio::test]
async fn batch_tally() {
    let driver = MockDriver::new()
        .with_snapshot(nav())
        .with_snapshot(nav_with_submenu());
    let (detector, _launcher) = detector(driver);
    let results = detector
        .probe_all(vec![
            ProbeRequest::new("li.nav-item"),
            ProbeRequest::new("   "),
            ProbeRequest::new("#footer"),
        ])
        .await
        .unwrap();

    let tally: BehaviorTally = results.iter().collect();
    assert_eq!(tally.total(), 3);
    assert_eq!(tally.unreachable, 1);
    assert_eq!(tally.dropdown, 1);
    assert_eq!(tally.no_change, 1);
    detector.shutdown().await.unwrap();
}

// ============================================================================
// Serialization through the worker
// ============================================================================

#[tokio::test]
async fn concurrent_probes_do_not_interleave() {
    let driver = MockDriver::new()
        .with_snapshot(nav())
        .with_hover_delay(Duration::from_millis(15));
    let (detector, launcher) = detector(driver);
    detector.ensure_session().await.unwrap();
    launcher.driver().clear_calls();

    let selectors = ["#a", "#b", "#c", "#d"];
    let results = futures::future::join_all(
        selectors
            .iter()
            .map(|s| detector.probe(ProbeRequest::new(*s))),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));

    let calls = launcher.driver().calls();
    let per_probe = calls.len() / selectors.len();
    assert_eq!(per_probe * selectors.len(), calls.len());
    for chunk in calls.chunks(per_probe) {
        assert_eq!(chunk[0], "mouse_move:0,0", "probe did not start with a reset: {calls:?}");
        let scrolled = chunk
            .iter()
            .find_map(|c| c.strip_prefix("scroll_into_view:"))
            .unwrap();
        let hovered = chunk
            .iter()
            .find_map(|c| c.strip_prefix("hover:direct:"))
            .unwrap();
        assert_eq!(scrolled, hovered, "steps of two probes interleaved: {calls:?}");
    }
    detector.shutdown().await.unwrap();
}

#[tokio::test]
async fn abandoned_wait_does_not_cancel_probe() {
    let driver = MockDriver::new()
        .with_snapshot(nav())
        .with_hover_delay(Duration::from_millis(60));
    let (detector, launcher) = detector(driver);

    let waited = tokio::time::timeout(
        Duration::from_millis(5),
        detector.probe(ProbeRequest::new("#slow")),
    )
    .await;
    assert!(waited.is_err());

    // Queued behind the abandoned probe, which still runs to completion
    let next = detector.probe(ProbeRequest::new("#next")).await.unwrap();
    assert_eq!(next.behavior(), BehaviorCategory::NoChange);
    let driver = launcher.driver();
    assert_eq!(driver.call_count("hover:direct:#slow"), 1);
    assert_eq!(driver.call_count("evaluate:snapshot"), 4);
    detector.shutdown().await.unwrap();
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn launch_failure_reaches_caller() {
    let launcher = MockLauncher::failing("chromium executable not found");
    let detector =
        HoverDetector::with_sink(launcher.clone(), quiet_config(), Arc::new(NullArtifactSink))
            .unwrap();
    let err = detector.navigate("https://acme.test").await.unwrap_err();
    assert!(matches!(err, ProbeError::BrowserLaunch { .. }));
    assert!(err.is_fatal());
    assert_eq!(launcher.launches(), 1);
    detector.shutdown().await.unwrap();
}

#[tokio::test]
async fn close_then_reuse_relaunches() {
    let (detector, launcher) = detector(MockDriver::new().with_snapshot(nav()));
    detector.navigate("https://acme.test").await.unwrap();
    detector.close().await.unwrap();
    assert!(!detector.is_live().await.unwrap());

    detector.probe(ProbeRequest::new("#x")).await.unwrap();
    assert_eq!(launcher.launches(), 2);
    detector.shutdown().await.unwrap();
}

#[tokio::test]
async fn screenshots_land_in_bound_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FsArtifactSink::new(dir.path()));
    let launcher = MockLauncher::new(MockDriver::new());
    let detector = HoverDetector::with_sink(launcher, quiet_config(), sink).unwrap();

    detector.bind_session(Some("run-a".into())).await.unwrap();
    let a = detector.screenshot("landing page", true).await.unwrap().unwrap();
    detector.bind_session(Some("run-b".into())).await.unwrap();
    let b = detector.screenshot("landing page", false).await.unwrap().unwrap();

    assert!(a.as_str().ends_with("run-a/screenshots/001_landing_page.png"));
    assert!(b.as_str().ends_with("run-b/screenshots/001_landing_page.png"));
    detector.shutdown().await.unwrap();
}

#[tokio::test]
async fn page_structure_through_worker() {
    let driver = MockDriver::new().with_script_result(
        "hoverCandidates",
        serde_json::json!({
            "pageTitle": "Acme",
            "url": "https://acme.test/",
            "menus": [],
            "buttons": [{"role": "button", "name": "Cart", "selector": "#cart"}],
            "links": [],
            "landmarks": [],
            "hoverCandidates": []
        }),
    );
    let (detector, _launcher) = detector(driver);
    let structure = detector.page_structure().await.unwrap();
    assert_eq!(structure.summary.buttons, 1);
    assert_eq!(structure.buttons[0].selector, "#cart");
    detector.shutdown().await.unwrap();
}
