use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::{TempDir, tempdir};

use super::*;
use crate::combo::ComboError;
use crate::config::{AppConfig, LayoutConfig, ModuleConf};
use crate::project::ProjectLayout;
use crate::transfer::TransferError;

const APP_CONF: &str = r#"{
  "app": "shop",
  "modules": ["shop"],
  "deploy": {
    "tencent": {
      "host": "ftp.example.com",
      "user": "deploy",
      "pass": "secret",
      "remotePath": "/data/static/shop",
      "domain": "cdn.example.com",
      "fdPath": "/static",
      "assestPrefix": "http://cdn.example.com/static/shop",
      "shtmlPrefix": "http://cdn.example.com/shtml",
      "cssi": "/data/cssi"
    },
    "storage": {
      "host": "store.example.com",
      "user": "deploy",
      "pass": "secret",
      "remotePath": "/static-store"
    }
  }
}"#;

const MAP_JSON: &str = r#"{
  "rev": {"css/main.css": "css/main.a1b2c3.css", "js/app.js": "js/app.77aa.js"},
  "include": {
    "index.html": {
      "css": [{"name": "main.css", "module": "shop"}],
      "js": [{"name": "app.js", "module": "shop"}]
    }
  }
}"#;

const CDN: &str = "//cdn.example.com/static/shop/shop/";
const RAW_DIR: &str = "/data/static/shop/shop";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pushed {
  remote_dir: String,
  relative: String,
  contents: String,
}

#[derive(Default)]
struct Recorder {
  pushed: Mutex<Vec<Pushed>>,
  opened: AtomicUsize,
  closed: AtomicUsize,
}

impl Recorder {
  fn pushed(&self) -> Vec<Pushed> {
    let mut pushed = self.pushed.lock().clone();
    pushed.sort_by(|a, b| (&a.remote_dir, &a.relative).cmp(&(&b.remote_dir, &b.relative)));
    pushed
  }

  fn find(&self, relative: &str) -> Pushed {
    self
      .pushed()
      .into_iter()
      .find(|item| item.relative == relative)
      .unwrap_or_else(|| panic!("{relative} was not pushed"))
  }
}

struct RecordingTransfer {
  recorder: Arc<Recorder>,
  fail_on: Option<&'static str>,
}

impl Transfer for RecordingTransfer {
  fn describe(&self) -> String {
    "recording".to_string()
  }

  fn open(&mut self) -> Result<(), TransferError> {
    self.recorder.opened.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn push(&self, remote_dir: &str, item: &TransferItem) -> Result<(), TransferError> {
    if self.fail_on == Some(item.relative.as_str()) {
      return Err(TransferError::Failed {
        program: "fake".into(),
        destination: item.relative.clone(),
        stderr: "connection reset".into(),
      });
    }
    self.recorder.pushed.lock().push(Pushed {
      remote_dir: remote_dir.to_string(),
      relative: item.relative.clone(),
      contents: String::from_utf8_lossy(&item.contents).into_owned(),
    });
    Ok(())
  }

  fn close(&mut self) -> Result<(), TransferError> {
    self.recorder.closed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

#[derive(Clone, Default)]
struct FakeCombo {
  calls: Arc<AtomicUsize>,
  requests: Arc<Mutex<Vec<ComboRequest>>>,
  fail: bool,
}

impl ComboGenerator for FakeCombo {
  fn generate(&self, request: &ComboRequest) -> Result<Vec<ComboArtifact>, ComboError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.requests.lock().push(request.clone());
    if self.fail {
      return Err(ComboError::Failed {
        program: "combo".into(),
        status: "exit status: 1".into(),
        stderr: "boom".into(),
      });
    }

    let html = request.output_dir.join("index.html");
    let shtml = request.output_dir.join("index.shtml");
    fs::write(&html, "<script src=\"js/app.js\"></script>").unwrap();
    fs::write(&shtml, "<!--#include virtual=\"js/app.js\" -->").unwrap();
    Ok(vec![ComboArtifact {
      page: "index.html".into(),
      html,
      shtml: Some(shtml),
    }])
  }
}

/// Combo tool that emits the staged page unchanged, as a bundler does for pages without bundles.
#[derive(Clone, Default)]
struct PassThroughCombo;

impl ComboGenerator for PassThroughCombo {
  fn generate(&self, request: &ComboRequest) -> Result<Vec<ComboArtifact>, ComboError> {
    let html = request.output_dir.join("index.html");
    fs::copy(&request.pages[0], &html).unwrap();
    Ok(vec![ComboArtifact {
      page: "index.html".into(),
      html,
      shtml: None,
    }])
  }
}

/// Transfer that allows two pushes at a time and remembers the most it saw in flight.
#[derive(Clone, Default)]
struct ThrottledTransfer {
  in_flight: Arc<AtomicUsize>,
  peak: Arc<AtomicUsize>,
  pushed: Arc<AtomicUsize>,
}

impl Transfer for ThrottledTransfer {
  fn describe(&self) -> String {
    "throttled".to_string()
  }

  fn max_concurrency(&self) -> Option<usize> {
    Some(2)
  }

  fn push(&self, _remote_dir: &str, _item: &TransferItem) -> Result<(), TransferError> {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    self.pushed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

struct Fixture {
  dir: TempDir,
  app: AppConfig,
  module: ModuleConf,
  layout: ProjectLayout,
}

impl Fixture {
  fn new() -> Self {
    let dir = tempdir().unwrap();
    let module_dir = dir.path().join("shop");
    let output = module_dir.join("dist/output");
    for (relative, contents) in [
      (
        "index.html",
        "<style>.x{behavior:url(css/main.css)}</style><img src=\"images/a.png\">",
      ),
      ("css/main.css", ".a{background:url(../images/a.png)}"),
      ("css/main.a1b2c3.css", ".a{background:url(../images/a.png)}"),
      ("css/other.css", ".o{}"),
      ("js/app.js", "var a = 1;"),
      ("js/app.77aa.js", "var a = 1;"),
      ("images/a.png", "PNG"),
    ] {
      let path = output.join(relative);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, contents).unwrap();
    }
    fs::write(module_dir.join("dist/map.json"), MAP_JSON).unwrap();

    let app: AppConfig = serde_json::from_str(APP_CONF).unwrap();
    let layout = ProjectLayout::new(dir.path(), LayoutConfig::default());
    Self {
      dir,
      app,
      module: ModuleConf {
        module: "shop".into(),
        app: "shop".into(),
      },
      layout,
    }
  }

  fn registry(&self) -> HashMapRegistry {
    HashMapRegistry::new(self.layout.clone(), self.app.modules.clone())
  }

  fn context(&self) -> PublishContext<'_> {
    PublishContext::new(&self.app, &self.module, &self.layout)
  }
}

fn recording(
  recorder: &Arc<Recorder>,
  fail_on: Option<&'static str>,
) -> impl Fn(TargetId) -> Result<Box<dyn Transfer>, ConfigError> + use<> {
  let recorder = Arc::clone(recorder);
  move |_| {
    Ok(Box::new(RecordingTransfer {
      recorder: Arc::clone(&recorder),
      fail_on,
    }) as Box<dyn Transfer>)
  }
}

fn request(target: &str, pages: &[&str]) -> PublishRequest {
  PublishRequest {
    target: target.to_string(),
    pages: pages.iter().map(|page| page.to_string()).collect(),
  }
}

#[test]
fn publishes_selected_page_end_to_end() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());
  let combo = FakeCombo::default();

  let report = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .with_combo(combo.clone())
    .publish(&request("tencent", &["index.html"]))
    .unwrap();

  assert_eq!(report.state, PublishState::Done);
  assert_eq!(report.mode, PublishMode::Pages);

  let raw: Vec<String> = recorder
    .pushed()
    .into_iter()
    .filter(|item| item.remote_dir == RAW_DIR)
    .map(|item| item.relative)
    .collect();
  assert_eq!(raw, vec![
    "css/main.a1b2c3.css",
    "css/main.css",
    "images/a.png",
    "index.html",
    "js/app.77aa.js",
    "js/app.js",
  ]);

  let stylesheet = recorder.find("css/main.css");
  assert_eq!(stylesheet.contents, format!(".a{{background:url({CDN}images/a.png)}}"));

  let staged = fs::read_to_string(fixture.dir.path().join("shop/dist/publish/index.html")).unwrap();
  assert!(staged.contains(&format!("url({CDN}css/main.a1b2c3.css)")));
  assert!(staged.contains(&format!("<img src=\"{CDN}images/a.png\">")));

  let combo_html = recorder.find("index.html");
  assert_eq!(combo_html.contents, format!("<script src=\"{CDN}js/app.77aa.js\"></script>"));
  let combo_shtml = recorder.find("index.shtml");
  assert_eq!(combo_shtml.remote_dir, "/data/cssi/shop");
  assert_eq!(combo_shtml.contents, "<!--#include virtual=\"js/app.js\" -->");

  let requests = combo.requests.lock();
  assert_eq!(requests[0].domain, "cdn.example.com");
  assert_eq!(requests[0].fd_path, "/static");
  assert_eq!(requests[0].pages, vec![fixture.dir.path().join("shop/dist/publish/index.html")]);

  assert_eq!(report.manifest, vec![
    "http://cdn.example.com/static/shop/shop/css/main.css",
    "http://cdn.example.com/static/shop/shop/css/main.min.css",
    "http://cdn.example.com/static/shop/shop/css/main.a1b2c3.css",
    "http://cdn.example.com/static/shop/shop/js/app.js",
    "http://cdn.example.com/static/shop/shop/js/app.77aa.js",
    "http://cdn.example.com/shtml/shop/index.shtml",
    "http://cdn.example.com/static/shop/shop/images/a.png",
  ]);
  assert_eq!(report.transferred, 7);
  assert!(report.warnings.is_empty());
  assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
  assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn whole_output_mode_never_runs_combo() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());
  let combo = FakeCombo::default();

  let report = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .with_combo(combo.clone())
    .publish(&request("tencent", &[]))
    .unwrap();

  assert_eq!(report.mode, PublishMode::WholeOutput);
  assert_eq!(combo.calls.load(Ordering::SeqCst), 0);
  assert_eq!(report.transferred, 7);
  assert_eq!(report.manifest.len(), 7);
  assert!(report
    .manifest
    .contains(&"http://cdn.example.com/static/shop/shop/css/other.css".to_string()));

  let page = recorder.find("index.html");
  assert!(page.contents.contains(&format!("url({CDN}css/main.a1b2c3.css)")));
}

#[test]
fn unknown_target_fails_before_any_transfer() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());

  let err = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .with_combo(FakeCombo::default())
    .publish(&request("ftp", &["index.html"]))
    .unwrap_err();

  assert!(matches!(err, PublishError::Config(ConfigError::UnknownTarget(_))));
  assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
  assert!(err.partial_manifest().is_empty());
}

#[test]
fn unknown_page_is_a_configuration_error() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());

  let err = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .with_combo(FakeCombo::default())
    .publish(&request("tencent", &["missing.html"]))
    .unwrap_err();

  assert!(matches!(
    err,
    PublishError::Config(ConfigError::UnknownPage { ref page, .. }) if page == "missing.html"
  ));
}

#[test]
fn page_mode_requires_a_combo_generator() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());

  let err = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .publish(&request("tencent", &["index.html"]))
    .unwrap_err();

  assert!(matches!(err, PublishError::Config(ConfigError::MissingCombo(_))));
}

#[test]
fn missing_own_asset_map_is_fatal() {
  let fixture = Fixture::new();
  fs::remove_file(fixture.dir.path().join("shop/dist/map.json")).unwrap();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());

  let err = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .publish(&request("tencent", &[]))
    .unwrap_err();

  assert!(matches!(err, PublishError::ManifestMissing(ref missing) if missing.module == "shop"));
  assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_uploads_become_warnings() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());

  let report = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, Some("images/a.png")))
    .with_combo(FakeCombo::default())
    .publish(&request("tencent", &["index.html"]))
    .unwrap();

  assert_eq!(report.state, PublishState::Done);
  assert_eq!(report.transferred, 6);
  assert_eq!(report.warnings.len(), 1);
  assert_eq!(report.warnings[0].kind, WarningKind::Transfer);
  assert_eq!(report.warnings[0].file.as_deref(), Some("images/a.png"));
  assert!(report
    .manifest
    .contains(&"http://cdn.example.com/static/shop/shop/images/a.png".to_string()));
}

#[test]
fn combo_failure_keeps_raw_manifest() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());
  let combo = FakeCombo {
    fail: true,
    ..FakeCombo::default()
  };

  let err = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .with_combo(combo)
    .publish(&request("tencent", &["index.html"]))
    .unwrap_err();

  match &err {
    PublishError::Phase { state, source, .. } => {
      assert_eq!(*state, PublishState::GenerateCombo);
      assert!(matches!(source, PhaseError::Combo(_)));
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(err.partial_manifest().len(), 7);
  assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
  assert!(recorder.pushed().iter().all(|item| item.relative != "index.shtml"));
}

#[test]
fn cdn_page_publish_requires_cssi_path() {
  let mut fixture = Fixture::new();
  if let Some(tencent) = fixture.app.deploy.get_mut("tencent") {
    tencent.cssi_path = None;
  }
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());

  let err = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .with_combo(FakeCombo::default())
    .publish(&request("tencent", &["index.html"]))
    .unwrap_err();

  assert!(matches!(
    err,
    PublishError::Config(ConfigError::MissingField { field: "cssiPath", .. })
  ));
}

#[test]
fn storage_combo_pages_are_prefixed_once() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let recorder = Arc::new(Recorder::default());

  let report = Publisher::new(fixture.context(), &registry)
    .with_transfer(recording(&recorder, None))
    .with_combo(PassThroughCombo)
    .publish(&request("storage", &["index.html"]))
    .unwrap();

  let staged = fs::read_to_string(fixture.dir.path().join("shop/dist/publish/index.html")).unwrap();
  let expected = "<style>.x{behavior:url(/static-store/shop/css/main.a1b2c3.css)}</style>\
                  <img src=\"/static-store/shop/images/a.png\">";
  assert_eq!(staged, expected);

  let pages: Vec<Pushed> = recorder
    .pushed()
    .into_iter()
    .filter(|item| item.relative == "index.html")
    .collect();
  assert_eq!(pages.len(), 2);
  for page in &pages {
    assert_eq!(page.remote_dir, "/static-store/shop");
    assert_eq!(page.contents, expected);
  }
  assert!(recorder
    .pushed()
    .iter()
    .all(|item| !item.contents.contains("static-store/shop/static-store")));
  assert!(report.warnings.is_empty());
}

#[test]
fn pushes_stay_within_the_adapter_concurrency_limit() {
  let fixture = Fixture::new();
  let registry = fixture.registry();
  let transfer = ThrottledTransfer::default();
  let handle = transfer.clone();

  let report = Publisher::new(fixture.context(), &registry)
    .with_transfer(move |_| Ok(Box::new(handle.clone()) as Box<dyn Transfer>))
    .publish(&request("tencent", &[]))
    .unwrap();

  assert_eq!(report.transferred, 7);
  assert_eq!(transfer.pushed.load(Ordering::SeqCst), 7);
  assert!(transfer.peak.load(Ordering::SeqCst) <= 2);
}
