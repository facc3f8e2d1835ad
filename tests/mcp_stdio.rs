//! Integration tests for the `rcu mcp` stdio server.
//!
//! These tests verify that:
//! - The MCP server answers initialize with its name, tools capability and
//!   screen-size instructions
//! - All tools are listed with their input schemas
//! - Invalid arguments become JSON-RPC errors while unreachable hosts become
//!   error results
//! - The process exits when stdin is closed
//!
//! Protocol: rmcp's stdio transport uses newline-delimited JSON.
//!
//! Every test points the server at 127.0.0.1:1 for both VNC and SSH, so no
//! remote desktop is needed and connection attempts fail immediately.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

/// Holds the MCP server process and its scratch home directory.
struct McpTestHarness {
    mcp: Child,
    _home: tempfile::TempDir,
}

impl Drop for McpTestHarness {
    fn drop(&mut self) {
        let _ = self.mcp.kill();
        let _ = self.mcp.wait();
    }
}

/// Start `rcu mcp` with a clean environment and unreachable hosts.
fn setup_mcp_test(extra_env: &[(&str, &str)]) -> McpTestHarness {
    let home = tempfile::tempdir().expect("failed to create temp home");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rcu"));
    cmd.arg("mcp")
        .env_clear()
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env("VNC_HOST", "127.0.0.1")
        .env("VNC_PORT", "1")
        .env("VNC_USERNAME", "agent")
        .env("VNC_PASSWORD", "secret")
        .env("SSH_PORT", "1")
        .env("SCREENSHOT_DELAY_MS", "0")
        .env("RUST_LOG", "rcu=debug");
    for (k, v) in extra_env {
        cmd.env(k, v);
    }

    let mcp = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn rcu mcp");

    McpTestHarness { mcp, _home: home }
}

// ---------------------------------------------------------------------------
// JSON-RPC helpers
// ---------------------------------------------------------------------------

/// Send a JSON-RPC message over stdin using newline-delimited JSON framing.
fn send_jsonrpc(stdin: &mut impl Write, msg: &serde_json::Value) {
    let payload = serde_json::to_string(msg).unwrap();
    writeln!(stdin, "{}", payload).unwrap();
    stdin.flush().unwrap();
}

/// Read lines until a JSON-RPC response (containing "jsonrpc" and "id") arrives.
fn read_jsonrpc(reader: &mut BufReader<impl std::io::Read>) -> serde_json::Value {
    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .expect("failed to read line from stdout");
        if bytes_read == 0 {
            panic!("unexpected EOF while reading JSON-RPC response from stdout");
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if json.get("jsonrpc").is_some() && json.get("id").is_some() {
                return json;
            }
        }
    }
}

fn initialize(
    stdin: &mut impl Write,
    reader: &mut BufReader<impl std::io::Read>,
) -> serde_json::Value {
    let init_request = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "test-stdio",
                "version": "0.1"
            }
        }
    });
    send_jsonrpc(stdin, &init_request);
    let response = read_jsonrpc(reader);

    send_jsonrpc(
        stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }),
    );
    response
}

fn call_tool(
    stdin: &mut impl Write,
    reader: &mut BufReader<impl std::io::Read>,
    id: u64,
    name: &str,
    arguments: serde_json::Value,
) -> serde_json::Value {
    send_jsonrpc(
        stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }),
    );
    read_jsonrpc(reader)
}

/// Run `body` on a helper thread, failing the test if it takes too long.
fn with_timeout(harness: McpTestHarness, body: impl FnOnce() + Send + 'static) {
    let handle = std::thread::spawn(body);

    let timeout = Duration::from_secs(30);
    let start = std::time::Instant::now();
    while !handle.is_finished() {
        if start.elapsed() > timeout {
            drop(harness);
            panic!("test timed out after {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let result = handle.join();
    drop(harness);
    result.expect("test thread panicked");
}

// ── Initialize ─────────────────────────────────────────────────────

#[test]
fn test_mcp_stdio_initialize() {
    let mut harness = setup_mcp_test(&[("WIDTH", "1920"), ("HEIGHT", "1080")]);
    let mut stdin = harness.mcp.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.mcp.stdout.take().unwrap());

    with_timeout(harness, move || {
        let response = initialize(&mut stdin, &mut reader);
        assert_eq!(response["id"], 1);

        let result = &response["result"];
        assert!(result.is_object(), "expected result, got: {response}");
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "rcu");
        assert!(result["capabilities"]["tools"].is_object());

        let instructions = result["instructions"].as_str().unwrap();
        assert!(
            instructions.contains("1366x768"),
            "1920x1080 should be presented as 1366x768: {instructions}"
        );
        assert!(instructions.contains(":1"));
    });
}

// ── Tool listing ───────────────────────────────────────────────────

#[test]
fn test_mcp_stdio_lists_all_tools() {
    let mut harness = setup_mcp_test(&[]);
    let mut stdin = harness.mcp.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.mcp.stdout.take().unwrap());

    with_timeout(harness, move || {
        initialize(&mut stdin, &mut reader);
        send_jsonrpc(
            &mut stdin,
            &serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        );
        let response = read_jsonrpc(&mut reader);
        let tools = response["result"]["tools"].as_array().unwrap();

        let mut names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "bash",
                "capture_region",
                "capture_screenshot",
                "computer",
                "key_press",
                "launch_application",
                "list_windows",
                "mouse_click",
                "mouse_double_click",
                "mouse_move",
                "mouse_scroll",
                "str_replace_editor",
                "type_text",
                "window_info",
            ]
        );

        let computer = tools.iter().find(|t| t["name"] == "computer").unwrap();
        let props = &computer["inputSchema"]["properties"];
        for field in [
            "action",
            "coordinate",
            "start_coordinate",
            "text",
            "duration",
            "scroll_direction",
            "scroll_amount",
        ] {
            assert!(props.get(field).is_some(), "computer schema lacks {field}");
        }

        let editor = tools.iter().find(|t| t["name"] == "str_replace_editor").unwrap();
        assert!(editor["inputSchema"]["properties"]["command"].is_object());

        let click = tools.iter().find(|t| t["name"] == "mouse_click").unwrap();
        let required = click["inputSchema"]["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("x")));
        assert!(!required.contains(&serde_json::json!("button")));
    });
}

// ── Error mapping ──────────────────────────────────────────────────

#[test]
fn test_mcp_stdio_validation_error_is_invalid_params() {
    let mut harness = setup_mcp_test(&[]);
    let mut stdin = harness.mcp.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.mcp.stdout.take().unwrap());

    with_timeout(harness, move || {
        initialize(&mut stdin, &mut reader);

        let response = call_tool(
            &mut stdin,
            &mut reader,
            3,
            "computer",
            serde_json::json!({"action": "mouse_move"}),
        );
        assert_eq!(response["error"]["code"], -32602, "got: {response}");
        let message = response["error"]["message"].as_str().unwrap();
        assert!(message.contains("coordinate is required for mouse_move"), "{message}");

        let response = call_tool(
            &mut stdin,
            &mut reader,
            4,
            "computer",
            serde_json::json!({"action": "type", "text": "hi", "coordinate": [1, 2]}),
        );
        assert_eq!(response["error"]["code"], -32602, "got: {response}");
    });
}

#[test]
fn test_mcp_stdio_unreachable_shell_is_error_result() {
    let mut harness = setup_mcp_test(&[]);
    let mut stdin = harness.mcp.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.mcp.stdout.take().unwrap());

    with_timeout(harness, move || {
        initialize(&mut stdin, &mut reader);

        let response = call_tool(
            &mut stdin,
            &mut reader,
            5,
            "bash",
            serde_json::json!({"command": "echo hi"}),
        );
        let result = &response["result"];
        assert_eq!(result["isError"], true, "got: {response}");
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("connect"), "{text}");
    });
}

#[test]
fn test_mcp_stdio_unreachable_display_is_error_result() {
    let mut harness = setup_mcp_test(&[]);
    let mut stdin = harness.mcp.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.mcp.stdout.take().unwrap());

    with_timeout(harness, move || {
        initialize(&mut stdin, &mut reader);

        let response = call_tool(
            &mut stdin,
            &mut reader,
            6,
            "capture_screenshot",
            serde_json::json!({}),
        );
        assert_eq!(response["result"]["isError"], true, "got: {response}");
    });
}

// ── Shutdown ───────────────────────────────────────────────────────

#[test]
fn test_mcp_stdio_exits_when_stdin_closes() {
    let mut harness = setup_mcp_test(&[]);
    let mut stdin = harness.mcp.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.mcp.stdout.take().unwrap());

    let response = initialize(&mut stdin, &mut reader);
    assert!(response["result"].is_object());
    drop(stdin);

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        match harness.mcp.try_wait() {
            Ok(Some(_status)) => break,
            Ok(None) if std::time::Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(None) => panic!("rcu mcp did not exit after stdin closed"),
            Err(e) => panic!("failed to wait for rcu mcp: {e}"),
        }
    }
}
