mod test_support;

use serde_json::json;
use test_support::{request_err_code, request_ok, select_workspace, spawn_sidecar};

#[test]
fn setup_sections_default_persist_and_validate() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = select_workspace(&mut stdin, &mut reader, "academicsd-setup");

    let got = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(got["grading"]["strictMarks"], json!(false));
    assert_eq!(got["grading"]["sgpaDropThreshold"], json!(0.4));
    assert_eq!(got["upload"]["maxFileBytes"], json!(5 * 1024 * 1024));
    assert_eq!(
        got["upload"]["allowedMimeTypes"].as_array().map(|a| a.len()),
        Some(3)
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "upload", "patch": { "maxFileBytes": 1024, "allowedMimeTypes": ["text/csv"] } }),
    );
    assert_eq!(updated["section"]["maxFileBytes"], json!(1024));

    let (code, err) = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "upload.checkFile",
        json!({ "mimeType": "text/csv", "sizeBytes": 2048 }),
    );
    assert_eq!(code, "file_rejected");
    assert_eq!(err["details"]["maxBytes"], json!(1024));
    let (code, _) = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "upload.checkFile",
        json!({ "mimeType": "application/vnd.ms-excel", "sizeBytes": 10 }),
    );
    assert_eq!(code, "file_rejected");

    let rejects = [
        ("5", json!({ "section": "grading", "patch": { "strictMarks": "yes" } })),
        ("6", json!({ "section": "grading", "patch": { "sgpaDropThreshold": -1 } })),
        ("7", json!({ "section": "grading", "patch": { "colour": "blue" } })),
        ("8", json!({ "section": "upload", "patch": { "maxFileBytes": 0 } })),
        ("9", json!({ "section": "upload", "patch": { "allowedMimeTypes": [] } })),
        ("10", json!({ "section": "reports", "patch": {} })),
        ("11", json!({ "section": "grading" })),
    ];
    for (id, params) in rejects {
        let (code, _) = request_err_code(&mut stdin, &mut reader, id, "setup.update", params);
        assert_eq!(code, "bad_params");
    }

    drop(stdin);
    let _ = child.wait();

    // Settings live in the workspace and survive a restart.
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let got = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(got["upload"]["maxFileBytes"], json!(1024));
    assert_eq!(got["upload"]["allowedMimeTypes"], json!(["text/csv"]));
    assert_eq!(got["grading"]["strictMarks"], json!(false));

    drop(stdin);
    let _ = child.wait();
}
