use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn olive_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_olive"))
}

const DOCS_JSON: &str = r#"[
    {"id": "1", "title": "Apel", "text": "saya suka apel merah"},
    {"id": "2", "title": "Kopi", "text": "olive suka kopi hitam tanpa gula"},
    {"id": 3, "title": "Rust", "content": "belajar rust dengan cargo dan crates"},
    {"title": "Kosong"}
]"#;

/// Write a config with live lookup disabled, so nothing leaves the machine.
fn setup_test_env(port: u16) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(root.join("docs.json"), DOCS_JSON).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/olive.sqlite"

[server]
bind = "127.0.0.1:{}"

[retrieval]
top_k = 3

[live]
enabled = false

[provider]
kind = "openai"
base_url = "http://127.0.0.1:9/v1"
api_key_env = "OLIVE_TEST_NO_KEY"
"#,
        root.display(),
        port
    );

    let config_path = config_dir.join("olive.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_olive(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = olive_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run olive binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn import_docs(config_path: &Path) {
    let docs = config_path.parent().unwrap().parent().unwrap().join("docs.json");
    let (stdout, stderr, success) = run_olive(config_path, &["import", docs.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env(0);

    let (stdout, stderr, success) = run_olive(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/olive.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env(0);

    let (_, _, success1) = run_olive(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_olive(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_skips_empty_documents() {
    let (_tmp, config_path) = setup_test_env(0);
    let docs = config_path.parent().unwrap().parent().unwrap().join("docs.json");

    let (stdout, _, success) = run_olive(&config_path, &["import", docs.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("Imported 3 document(s)"), "got: {}", stdout);
}

#[test]
fn test_import_missing_file_fails() {
    let (_tmp, config_path) = setup_test_env(0);
    let (_, stderr, success) = run_olive(&config_path, &["import", "/no/such/docs.json"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read document file"), "got: {}", stderr);
}

#[test]
fn test_retrieve_ranks_by_overlap() {
    let (_tmp, config_path) = setup_test_env(0);
    import_docs(&config_path);

    let (stdout, stderr, success) = run_olive(&config_path, &["retrieve", "apakah olive suka kopi"]);
    assert!(success, "retrieve failed: {}", stderr);

    let first = stdout.lines().next().unwrap();
    assert!(first.starts_with("1. [2] Kopi (score 3)"), "got: {}", stdout);
    assert!(stdout.contains("[1] Apel (score 1)"));
    assert!(!stdout.contains("[3]"));
}

#[test]
fn test_retrieve_no_results() {
    let (_tmp, config_path) = setup_test_env(0);
    import_docs(&config_path);

    let (stdout, _, success) = run_olive(&config_path, &["retrieve", "xyzzy"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_retrieve_top_k() {
    let (_tmp, config_path) = setup_test_env(0);
    import_docs(&config_path);

    let (stdout, _, success) =
        run_olive(&config_path, &["retrieve", "suka apel kopi", "--top-k", "1"]);
    assert!(success);
    assert!(stdout.contains("1. ["));
    assert!(!stdout.contains("2. ["), "got: {}", stdout);
}

#[test]
fn test_models_lists_defaults() {
    let (_tmp, config_path) = setup_test_env(0);

    let (stdout, _, success) = run_olive(&config_path, &["models"]);
    assert!(success);
    assert!(stdout.contains("gpt-4.1-nano"));
    assert!(stdout.contains("Olive-4o Mini"));
    assert!(stdout.contains("(default)"));
}

#[test]
fn test_chat_repl_commands() {
    use std::io::Write;

    let (_tmp, config_path) = setup_test_env(0);
    let mut child = Command::new(olive_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["chat", "--user", "ana"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"/mood\n/mood Senang\n/new\n/quit\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Usage: /mood <mood>"), "got: {}", stdout);
    assert!(stdout.contains("Mood set to Senang."), "got: {}", stdout);
    assert!(stdout.contains("Started a new conversation."));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env(0);
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("top_k = 3", "top_k = 0")).unwrap();

    let (_, stderr, success) = run_olive(&config_path, &["models"]);
    assert!(!success);
    assert!(stderr.contains("top_k"), "got: {}", stderr);
}

// ============ HTTP server ============

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn start_server(config_path: &Path) -> std::process::Child {
    Command::new(olive_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to start server: {}", e))
}

fn wait_for_server(port: u16) {
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

#[test]
fn test_server_endpoints() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);
    import_docs(&config_path);

    let mut server = start_server(&config_path);
    wait_for_server(port);
    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::blocking::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());

    let models: serde_json::Value = client
        .get(format!("{}/api/models", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(models["models"]["gpt-3.5-turbo"], "Olive-3.5 Turbo");

    let resp = client
        .post(format!("{}/api/retrieve", base))
        .json(&serde_json::json!({"q": "apel jeruk", "topK": 3}))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "1");
    assert_eq!(results[0]["score"], 1);

    let resp = client
        .post(format!("{}/api/retrieve", base))
        .json(&serde_json::json!({"q": "suka", "topK": 0}))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["results"].as_array().unwrap().len(), 2);

    let rag: serde_json::Value = client
        .post(format!("{}/rag", base))
        .json(&serde_json::json!({"query": "berita hari ini"}))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(rag["result"], "Tidak ditemukan informasi.");

    let history: serde_json::Value = client
        .get(format!("{}/api/history/nobody", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(history["chats"].as_array().unwrap().len(), 0);

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&serde_json::json!({"username": "ana", "message": "   "}))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);

    server.kill().ok();
    server.wait().ok();
}
