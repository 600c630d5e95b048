// CLI integration tests: offline commands, exit codes, and one flow against `evedata serve`.
use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tempfile::NamedTempFile;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_evedata");
    Command::new(exe)
}

fn parse_json(value: &[u8]) -> Value {
    serde_json::from_slice(value).expect("valid json")
}

fn parse_json_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tempfile");
    file.write_all(contents.as_bytes()).expect("write");
    file
}

fn settings_file() -> NamedTempFile {
    write_temp(
        &json!({
            "API_VERSION": "v1",
            "DOMAIN": {
                "people": {
                    "schema": {
                        "name": {"type": "string", "required": true},
                        "age": {"type": "integer", "min": 0}
                    }
                }
            }
        })
        .to_string(),
    )
}

fn run_with_settings(settings: &Path, url: Option<&str>, args: &[&str]) -> Output {
    let mut command = cmd();
    command.arg("--settings").arg(settings);
    if let Some(url) = url {
        command.args(["--url", url]);
    }
    command.args(args).output().expect("run evedata")
}

struct Server(Child);

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn start_server(settings: &Path) -> (Server, String) {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let bind = format!("127.0.0.1:{port}");
    let child = cmd()
        .arg("--settings")
        .arg(settings)
        .args(["serve", "--bind", &bind])
        .env("RUST_LOG", "warn")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn server");
    let server = Server(child);
    let start = Instant::now();
    while ureq::get(&format!("http://{bind}/healthz")).call().is_err() {
        assert!(start.elapsed() < Duration::from_secs(8), "server did not start");
        sleep(Duration::from_millis(20));
    }
    (server, format!("http://{bind}"))
}

#[test]
fn version_reports_package_version() {
    let output = cmd().arg("version").output().expect("version");
    assert!(output.status.success());
    let value = parse_json(&output.stdout);
    assert_eq!(value["name"], "evedata");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn resources_lists_the_domain() {
    let settings = settings_file();
    let output = run_with_settings(settings.path(), None, &["resources"]);
    assert!(output.status.success());
    let value = parse_json(&output.stdout);
    assert_eq!(value["base_url"], "http://localhost:5000/v1");
    assert_eq!(value["resources"]["people"]["fields"], json!(["name", "age"]));
}

#[test]
fn validate_reports_rejections_with_exit_code() {
    let settings = settings_file();
    let input = write_temp("{\"name\": \"ada\", \"age\": 36}\n{\"age\": \"old\"}\n");
    let output = run_with_settings(
        settings.path(),
        None,
        &["validate", "people", input.path().to_str().expect("path")],
    );
    assert_eq!(output.status.code(), Some(6));
    let value = parse_json(&output.stdout);
    assert_eq!(value["total"], 2);
    assert_eq!(value["valid"], 1);
    let errors = &value["rejected"][0]["errors"];
    assert!(errors.get("name").is_some());
    assert!(errors.get("age").is_some());

    let coerced = write_temp("[{\"name\": \"bob\", \"age\": \"41\"}]");
    let output = run_with_settings(
        settings.path(),
        None,
        &["validate", "people", "--coerce", coerced.path().to_str().expect("path")],
    );
    assert!(output.status.success());
}

#[test]
fn usage_errors_exit_2_with_json_on_stderr() {
    let output = cmd().args(["count", "people"]).output().expect("count");
    assert_eq!(output.status.code(), Some(2));
    let value = parse_json(&output.stderr);
    assert_eq!(value["error"]["kind"], "Usage");
    assert!(value["error"]["hint"].as_str().unwrap_or_default().contains("--settings"));

    let output = cmd().args(["page"]).output().expect("page");
    assert_eq!(output.status.code(), Some(2));

    let settings = settings_file();
    let output = run_with_settings(settings.path(), None, &["count", "people", "--where", "[1]"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unknown_resource_exits_not_found() {
    let settings = settings_file();
    let output = run_with_settings(settings.path(), None, &["count", "animals"]);
    assert_eq!(output.status.code(), Some(3));
    let value = parse_json(&output.stderr);
    assert!(value["error"]["hint"].as_str().unwrap_or_default().contains("people"));
}

#[test]
fn unreachable_server_exits_with_connectivity_code() {
    let settings = settings_file();
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("bind")
        .local_addr()
        .expect("addr")
        .port();
    let url = format!("http://127.0.0.1:{port}");
    let output = run_with_settings(
        settings.path(),
        Some(&url),
        &["--timeout-ms", "300", "count", "people"],
    );
    assert_eq!(output.status.code(), Some(8));
    let value = parse_json(&output.stderr);
    assert_eq!(value["error"]["kind"], "Connectivity");
}

#[test]
fn insert_page_get_delete_flow() {
    let settings = settings_file();
    let (_server, url) = start_server(settings.path());
    let url = Some(url.as_str());

    let docs: Vec<Value> = (0..9)
        .map(|n| json!({"name": format!("p{n}"), "age": n}))
        .collect();
    let input = write_temp(&Value::from(docs).to_string());
    let insert = run_with_settings(
        settings.path(),
        url,
        &["insert", "people", input.path().to_str().expect("path")],
    );
    assert!(insert.status.success(), "{}", String::from_utf8_lossy(&insert.stderr));
    let report = parse_json(&insert.stdout);
    assert_eq!(report["accepted"], 9);
    assert_eq!(report["status"], 201);
    let ids = report["ids"].as_array().expect("ids").clone();
    assert_eq!(ids.len(), 9);

    let count = run_with_settings(
        settings.path(),
        url,
        &["count", "people", "--where", "{\"age\": {\"$gte\": 5}}"],
    );
    assert_eq!(parse_json(&count.stdout)["count"], 4);

    let page = run_with_settings(
        settings.path(),
        url,
        &["--items-per-page", "4", "page", "people", "--page", "3", "--sort", "age"],
    );
    let value = parse_json(&page.stdout);
    assert_eq!(value["count"], 1);
    assert_eq!(value["items"][0]["name"], "p8");

    let table = run_with_settings(
        settings.path(),
        url,
        &["page", "people", "--projection", "{\"name\": 1}", "--table"],
    );
    let value = parse_json(&table.stdout);
    assert_eq!(value["items"]["columns"], json!(["name"]));

    let dump = run_with_settings(settings.path(), url, &["dump", "people", "--limit", "5"]);
    assert_eq!(parse_json_lines(&dump.stdout).len(), 5);

    let partitions = run_with_settings(
        settings.path(),
        url,
        &["--items-per-page", "4", "partitions", "people"],
    );
    let value = parse_json(&partitions.stdout);
    assert_eq!(value["divisions"], json!([0, 4, 8, 9]));

    let id = ids[0].as_str().expect("id");
    let get = run_with_settings(settings.path(), url, &["get", "people", id]);
    let value = parse_json(&get.stdout);
    assert_eq!(value["_id"], id);
    assert!(value["_etag"].is_string());

    let delete = run_with_settings(settings.path(), url, &["delete", "people", id]);
    assert!(delete.status.success());
    let again = run_with_settings(settings.path(), url, &["get", "people", id]);
    assert_eq!(again.status.code(), Some(3));

    let bad = write_temp("{\"age\": 1}");
    let rejected = run_with_settings(
        settings.path(),
        url,
        &["insert", "people", bad.path().to_str().expect("path")],
    );
    assert_eq!(rejected.status.code(), Some(6));
    let notice = parse_json(&rejected.stderr);
    assert_eq!(notice["notice"]["kind"], "rejected");
}
