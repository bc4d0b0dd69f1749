use super::*;

#[test]
fn test_parse_http_response_content_length() {
    let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\npg_up";
    assert_eq!(parse_http_response(raw).unwrap(), b"pg_up");
}

#[test]
fn test_parse_http_response_close_delimited() {
    let raw = b"HTTP/1.1 200 OK\r\n\r\npg_up 1\n";
    assert_eq!(parse_http_response(raw).unwrap(), b"pg_up 1\n");
}

#[test]
fn test_parse_http_response_chunked() {
    let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\npg_u\r\n3\r\np 1\r\n0\r\n\r\n";
    assert_eq!(parse_http_response(raw).unwrap(), b"pg_up 1");
}

#[test]
fn test_parse_http_response_rejects_non_200() {
    let raw = b"HTTP/1.1 503 Service Unavailable\r\n\r\n";
    assert!(parse_http_response(raw).is_err());
}

#[test]
fn test_parse_http_response_truncated_body() {
    let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort";
    assert!(parse_http_response(raw).is_err());
}

#[test]
fn test_text_to_json_shape() {
    let text = "# HELP pg_up Is the server reachable\n\
                # TYPE pg_up gauge\n\
                pg_up{server=\"a\"} 1\n";
    let bytes = text_to_json(text).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    let families = value["families"].as_array().unwrap();
    assert_eq!(families.len(), 1);
    assert_eq!(families[0]["name"], "pg_up");
    assert_eq!(families[0]["type"], "gauge");
    let samples = families[0]["samples"].as_array().unwrap();
    assert_eq!(samples[0]["labels"]["server"], "a");
    assert_eq!(samples[0]["value"], 1.0);
}

#[test]
fn test_text_to_json_non_finite_values() {
    let text = "pg_v NaN\npg_w +Inf\n";
    let bytes = text_to_json(text).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let families = value["families"].as_array().unwrap();
    assert_eq!(families[0]["samples"][0]["value"], "NaN");
    assert_eq!(families[1]["samples"][0]["value"], "+Inf");
}

#[test]
fn test_text_to_json_empty() {
    let bytes = text_to_json("").unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["families"].as_array().unwrap().len(), 0);
}
