//! Tests analysis detail decoding with sparse backend payloads.

use threatscope_core::{AnalysisStatus, StrideCategory, decode_detail};

#[test]
fn detail_decode_tests_accept_sparse_threats() {
    let raw = br#"{
        "id":"A1",
        "code":"AN-0001",
        "status":"ANALYZED",
        "created_at":"2025-01-01T12:00:00Z",
        "finished_at":"2025-01-01T12:03:00Z",
        "result":{"risk_score":7.8,"threats":[{"dread_score":6},{"dread_score":9},{}]}
    }"#;

    let detail = decode_detail(raw).expect("detail should decode");
    assert_eq!(detail.status, AnalysisStatus::Analyzed);
    assert!(detail.integrity_violations().is_empty());

    let result = detail.result.expect("result should be attached");
    assert_eq!(result.threats.len(), 3);
    assert_eq!(result.threats[2].dread_score, None);
    assert_eq!(result.model_used, "Unknown");
    assert_eq!(result.threat_count(), 3);
    assert_eq!(result.component_count(), 0);
}

#[test]
fn detail_decode_tests_preserve_unknown_stride_labels() {
    let raw = br#"{
        "id":"A2",
        "status":"ANALYZED",
        "created_at":"2025-01-01T12:00:00Z",
        "finished_at":"2025-01-01T12:03:00Z",
        "result":{
            "risk_score":2.0,
            "model_used":"gemini-1.5-pro/vision",
            "threats":[
                {"threat_type":"Elevation of Privilege","dread_score":2.0},
                {"threat_type":"Supply Chain","dread_score":1.0}
            ],
            "components":[{"id":"c1","type":"Database","name":"Orders DB"}],
            "connections":[{"from":"c1","to":"c2","protocol":"HTTPS","encrypted":true}]
        }
    }"#;

    let result = decode_detail(raw)
        .expect("detail should decode")
        .result
        .expect("result should be attached");
    assert_eq!(result.threats[0].threat_type, StrideCategory::ElevationOfPrivilege);
    assert_eq!(
        result.threats[1].threat_type,
        StrideCategory::Other("Supply Chain".to_string())
    );
    assert_eq!(result.components[0].kind, "Database");
    assert_eq!(result.connections[0].from_id, "c1");
    assert_eq!(result.connections[0].encrypted, Some(true));
}

#[test]
fn detail_decode_tests_reject_unknown_status() {
    let raw = br#"{"id":"A3","status":"QUEUED","created_at":"2025-01-01T12:00:00Z"}"#;
    assert!(decode_detail(raw).is_err());
}
