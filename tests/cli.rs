use std::io::Write;
use std::process::{Command, Stdio};

use pretty_assertions::assert_eq;
use serde_json::Value;

fn run_with_stdin(args: &[&str], stdin: &str) -> Vec<Value> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_donna-vectorize"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");
    child
        .stdin
        .as_mut()
        .expect("stdin open")
        .write_all(stdin.as_bytes())
        .expect("write stdin");

    let output = child.wait_with_output().expect("read CLI output");
    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[test]
fn vectorizes_jsonl_from_stdin() {
    let input = concat!(
        r#"{"id": "doc-1", "title": "Hello World"}"#,
        "\n\n",
        r#"{"description": ""}"#,
        "\n"
    );
    let vectors = run_with_stdin(&["--dimension", "8"], input);
    assert_eq!(vectors.len(), 2);
    assert_eq!(
        vectors[0],
        serde_json::json!({"id": "doc-1", "values": [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]})
    );
    assert_eq!(vectors[1]["values"], serde_json::json!([0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1]));
    assert!(vectors[1].get("id").is_none());
}

#[test]
fn scrapes_html_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("page.html");
    std::fs::write(
        &path,
        "<html><head><title>Hello</title></head><body><p>World</p></body></html>",
    )
    .expect("write html");

    let vectors = run_with_stdin(
        &["--dimension", "8", "--html", path.to_str().expect("utf-8 path")],
        "",
    );
    assert_eq!(vectors.len(), 1);
    assert_eq!(
        vectors[0]["values"],
        serde_json::json!([0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    );
}

#[test]
fn rejects_malformed_lines() {
    let output = Command::new(env!("CARGO_BIN_EXE_donna-vectorize"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            child.stdin.take().expect("stdin").write_all(b"{not json}\n")?;
            child.wait_with_output()
        })
        .expect("run CLI");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid document at line 1"));
}
