use std::io::Write;
use tcb_agent::settings::load_filter_settings_with;
use tcb_agent::{classify_feed, generate_pac, Args, ClassifySummary, Command, Session};
use tcb_core::{FilterSettings, HttpExchange};

fn agent_args(config: Option<std::path::PathBuf>) -> Args {
    Args {
        config,
        host_allow: None,
        port_allow: None,
        mime_allow: None,
        only_matches: None,
        log_level: "info".to_string(),
        log_json: false,
        command: Command::Apply,
    }
}

fn exchange_line(host: &str, port: u16, request: &str, response: Option<&str>) -> String {
    let mut value = serde_json::json!({
        "service": { "host": host, "port": port },
        "request": request,
    });
    if let Some(response) = response {
        value["response"] = serde_json::Value::from(response);
    }
    value.to_string()
}

#[test]
fn test_end_to_end_traffic_flow() {
    // 1. Settings from a file, narrowed by the environment
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("tcb.toml");
    std::fs::write(
        &config_path,
        "host_allow = \"thick\\\\.corp\"\nport_allow = \"8443, 9443\"\n",
    )
    .unwrap();

    let settings = load_filter_settings_with(&agent_args(Some(config_path)), |key| {
        (key == "TCB_MIME_ALLOW").then(|| "^application/(json|xml)$".to_string())
    })
    .unwrap();
    assert_eq!(settings.host_allow, "thick\\.corp");

    // 2. Feed of captured traffic
    let feed = [
        exchange_line(
            "api.thick.corp",
            8443,
            "POST /login HTTP/1.1\r\nHost: api.thick.corp\r\nContent-Length: 2\r\n\r\n{}",
            Some("HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"ok\":true}"),
        ),
        exchange_line(
            "api.thick.corp",
            8443,
            "GET /logo HTTP/1.1\r\nHost: api.thick.corp\r\n\r\n",
            Some("HTTP/1.1 200 OK\r\nContent-Type: image/png\r\n\r\n\x7fELF"),
        ),
        exchange_line(
            "thick.corp.cdn.net",
            443,
            "GET / HTTP/1.1\r\nHost: thick.corp.cdn.net\r\n\r\n",
            None,
        ),
        exchange_line("updates.vendor.com", 8443, "garbage", None),
    ]
    .join("\n");

    let session = Session::new(settings);
    session.recorder.clear();

    let mut rows = Vec::new();
    let mut modified = Vec::new();
    let summary = classify_feed(
        &session,
        feed.as_bytes(),
        &mut rows,
        Some(&mut modified as &mut dyn Write),
        false,
    )
    .unwrap();

    // 3. Request and response of the login, request of the logo
    assert_eq!(
        summary,
        ClassifySummary {
            exchanges: 4,
            skipped: 0,
            labeled: 3
        }
    );

    let rows = String::from_utf8(rows).unwrap();
    let labeled: Vec<&str> = rows.lines().filter(|l| l.ends_with("\tlabeled")).collect();
    assert_eq!(labeled.len(), 3);
    assert!(labeled[0].contains("\t→\tapi.thick.corp\t8443\tPOST\t"));
    assert!(labeled[1].contains("\t←\tapi.thick.corp\t8443\t200\t"));
    assert!(labeled[2].contains("\t→\tapi.thick.corp\t8443\tGET\t"));
    // Port 443 is not allowed, the garbage request is never parsed
    assert!(rows.contains("\tthick.corp.cdn.net\t443\t-\tpass"));
    assert!(rows.contains("\tupdates.vendor.com\t8443\t-\tpass"));
    assert!(!rows.contains("\twarn\t"));

    // 4. Modified exchanges carry the marker and comments, bodies untouched
    let exchanges: Vec<HttpExchange> = String::from_utf8(modified)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(exchanges.len(), 4);
    assert!(exchanges[0]
        .request
        .ends_with(b"Content-Length: 2\r\nX-TCB: 1\r\n\r\n{}"));
    assert_eq!(
        exchanges[0].comment.as_deref(),
        Some("[TCB] mime match: application/json")
    );
    assert_eq!(
        exchanges[1].comment.as_deref(),
        Some("[TCB] host/port match")
    );
    assert!(exchanges[2].comment.is_none());
    assert_eq!(&exchanges[3].request[..], b"garbage");

    // 5. PAC for the same host rule
    let pac_path = generate_pac(
        &session,
        Some("192.168.1.20".to_string()),
        Some(8080),
        None,
        Some(temp_dir.path()),
    )
    .unwrap();
    let pac = std::fs::read_to_string(pac_path).unwrap();
    assert!(pac.contains("new RegExp(\"thick\\\\.corp\")"));
    assert!(pac.contains("return \"PROXY 192.168.1.20:8080; DIRECT\";"));
    assert!(pac.ends_with("  return \"DIRECT\";\n}\n"));
}

#[test]
fn test_bad_pattern_keeps_previous_rule_during_traffic() {
    let session = Session::new(FilterSettings::default());
    session.recorder.clear();

    let outcome = session.classifier.apply(&FilterSettings {
        host_allow: "(".to_string(),
        port_allow: "8080".to_string(),
        ..FilterSettings::default()
    });
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.rules.host_pattern().as_str(), FilterSettings::default().host_allow);

    let applied = session.recorder.drain();
    assert!(applied[0].label.starts_with("Bad host regex"));
    assert!(applied[1].label.starts_with("Filters applied: "));

    let feed = exchange_line(
        "auth.example.com",
        8080,
        "GET / HTTP/1.1\r\nHost: auth.example.com\r\n\r\n",
        None,
    );
    let mut rows = Vec::new();
    let summary = classify_feed(&session, feed.as_bytes(), &mut rows, None, false).unwrap();
    assert_eq!(summary.labeled, 1);
}
