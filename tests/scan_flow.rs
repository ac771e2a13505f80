//! End-to-end orchestrator runs against stub scanner scripts.
#![cfg(unix)]

use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use easyinjection::config;
use easyinjection::events::{EventBus, ScanEvent};
use easyinjection::orchestrator::{ScanOrchestrator, ScanOutcome};
use easyinjection::questions::QuestionBank;

fn write_script(dir: &Path, name: &str, content: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

/// Stub SQLi tool: answers --version, fakes a crawl (writes the results CSV
/// and prints the completion line), and reports parameter `id` as injectable
/// on every test invocation.
fn fake_sqlmap(dir: &Path) -> String {
    write_script(
        dir,
        "fake_sqlmap.sh",
        r#"#!/bin/sh
tmp=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--tmp-dir" ]; then tmp="$a"; fi
  prev="$a"
done
case "$*" in
  *--version*)
    echo "1.8.2#stable"
    exit 0;;
  *--crawl*)
    mkdir -p "$tmp"
    printf 'http://site.test/item?id=1\nhttp://site.test/login,user=a&pass=b\n' > "$tmp/results-stub.csv"
    echo "[12:00:00] [INFO] found a total of 2 targets"
    sleep 20
    exit 0;;
  *)
    echo "[12:00:01] [INFO] GET parameter 'id' is vulnerable to boolean-based blind"
    exit 0;;
esac
"#,
    )
}

/// Stub XSS tool: one vulnerability object plus an informational object,
/// concatenated without separators.
fn fake_dalfox(dir: &Path) -> String {
    write_script(
        dir,
        "fake_dalfox.sh",
        r#"#!/bin/sh
case "$*" in
  *--version*)
    echo "v2.9.0"
    exit 0;;
  *)
    printf '{"type":"V","param":"q","payload":"<script>alert(1)</script>","severity":"high","data":"http://site.test/item?q=x"}{"type":"INFO","msg":"done"}'
    exit 0;;
esac
"#,
    )
}

/// Stub SQLi tool whose crawl hangs until killed.
fn hanging_sqlmap(dir: &Path) -> String {
    write_script(
        dir,
        "hanging_sqlmap.sh",
        r#"#!/bin/sh
case "$*" in
  *--version*) echo "1.8.2#stable"; exit 0;;
  *) sleep 60; exit 0;;
esac
"#,
    )
}

struct Harness {
    orchestrator: Arc<ScanOrchestrator>,
    events: Arc<Mutex<Vec<String>>>,
    _tmp: tempfile::TempDir,
}

/// Builds an orchestrator over the stub tools. A background task answers
/// every quiz question correctly through the public answer path.
fn harness(sqlmap: fn(&Path) -> String, flags: serde_json::Value) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let sqlmap_path = sqlmap(tmp.path());
    let dalfox_path = fake_dalfox(tmp.path());

    let raw = json!({
        "url": "http://site.test/",
        "flags": flags,
        "tool_timeout_secs": 20,
        "sqlmap_path": sqlmap_path,
        "dalfox_path": dalfox_path,
        "tmp_dir": tmp.path().join("sqlmap_tmp").display().to_string(),
        "output_dir": tmp.path().join("scans").display().to_string(),
    });
    let config = config::validate(&raw).unwrap();

    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    bus.subscribe(move |event| {
        events_clone.lock().unwrap().push(event.name().to_string());
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ScanEvent>();
    bus.set_sink(event_tx);

    let orchestrator = Arc::new(ScanOrchestrator::new(
        "scan-flow-1",
        config,
        bus,
        Arc::new(QuestionBank::builtin()),
    ));

    let answering = orchestrator.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let ScanEvent::QuestionAsked { prompt, .. } = event {
                answering.answer_question(prompt.correct_index);
            }
        }
    });

    Harness {
        orchestrator,
        events,
        _tmp: tmp,
    }
}

fn count(events: &[String], name: &str) -> usize {
    events.iter().filter(|e| e.as_str() == name).count()
}

#[tokio::test]
async fn test_full_scan_completes_with_findings() {
    let h = harness(fake_sqlmap, json!({ "sqli": true, "xss": true }));

    let outcome = tokio::time::timeout(Duration::from_secs(60), h.orchestrator.run())
        .await
        .expect("scan did not finish in time")
        .expect("scan errored");

    let report = match outcome {
        ScanOutcome::Completed(report) => report,
        ScanOutcome::Stopped => panic!("scan unexpectedly stopped"),
    };

    // One SQLi finding on `id`, one XSS finding on `q`; later invocations on
    // the same identity are suppressed.
    assert_eq!(report.vulnerabilities.len(), 2);
    let identities: Vec<_> = report
        .vulnerabilities
        .iter()
        .map(|v| v.identity())
        .collect();
    let unique: std::collections::HashSet<_> = identities.iter().collect();
    assert_eq!(unique.len(), identities.len());

    // Six gated questions, all answered correctly: 60 quiz points, two
    // findings cost 10 of the 40 vulnerability points.
    assert_eq!(report.question_results.len(), 6);
    assert!(report.question_results.iter().all(|r| r.correct));
    assert_eq!(report.score.final_score, 90);

    let events = h.events.lock().unwrap();
    assert_eq!(
        count(&events, "phase:started"),
        count(&events, "phase:completed")
    );
    assert_eq!(count(&events, "crawler:finished"), 1);
    assert_eq!(count(&events, "scan:completed"), 1);
    assert_eq!(count(&events, "vulnerability:found"), 2);

    // Causal ordering: every vulnerability precedes completion, and the
    // first phase:started precedes the first phase:completed.
    let completed_at = events.iter().position(|e| e == "scan:completed").unwrap();
    let last_vuln = events
        .iter()
        .rposition(|e| e == "vulnerability:found")
        .unwrap();
    assert!(last_vuln < completed_at);
    let first_started = events.iter().position(|e| e == "phase:started").unwrap();
    let first_completed = events.iter().position(|e| e == "phase:completed").unwrap();
    assert!(first_started < first_completed);

    assert!(h.orchestrator.status().stats.total_requests > 0);
}

#[tokio::test]
async fn test_sqli_only_scan_skips_xss_phase() {
    let h = harness(fake_sqlmap, json!({ "sqli": true, "xss": false }));

    let outcome = tokio::time::timeout(Duration::from_secs(60), h.orchestrator.run())
        .await
        .unwrap()
        .unwrap();
    let report = match outcome {
        ScanOutcome::Completed(report) => report,
        ScanOutcome::Stopped => panic!("scan unexpectedly stopped"),
    };

    assert!(report
        .vulnerabilities
        .iter()
        .all(|v| v.kind == easyinjection::models::VulnKind::Sqli));
    // Five questions: discovery plus the four SQLi sub-phases; no XSS gate.
    assert_eq!(report.question_results.len(), 5);
}

#[tokio::test]
async fn test_stop_during_crawl_resolves_stopped() {
    let h = harness(hanging_sqlmap, json!({ "sqli": true, "xss": false }));

    let run = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    };

    // Let the scan get past the discovery question and into the crawl.
    tokio::time::sleep(Duration::from_millis(800)).await;
    h.orchestrator.stop().await;

    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("stop did not unwind the scan")
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, ScanOutcome::Stopped));

    let events = h.events.lock().unwrap();
    assert_eq!(count(&events, "scan:completed"), 0);
    assert_eq!(count(&events, "scan:stopped"), 1);
}
