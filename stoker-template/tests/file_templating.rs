//! In-place file templating: binary guard, no-op fast path, rewrite.

use rstest::rstest;
use stoker_template::{resolve_file_in_place, TemplateContext, TemplateError, TeraResolver};
use tempfile::TempDir;

fn ctx() -> TemplateContext {
    let mut ctx = TemplateContext::new("gw-blue")
        .with_var("region", "us-east")
        .with_label("site", "plant-7");
    ctx.git_ref = "main".to_string();
    ctx.commit = "abc123".to_string();
    ctx
}

#[test]
fn file_without_markers_is_left_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.xml");
    // Invalid UTF-8 on purpose: a lossy rewrite would change these bytes.
    let original: Vec<u8> = vec![b'<', b'a', b'>', 0xff, 0xfe, b'<', b'/', b'a', b'>'];
    std::fs::write(&path, &original).unwrap();

    let rewritten = resolve_file_in_place(&TeraResolver, &ctx(), &path).unwrap();
    assert!(!rewritten);
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[test]
fn null_byte_is_rejected_and_file_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("image.bin");
    let original = b"{{region}}\0\x01\x02".to_vec();
    std::fs::write(&path, &original).unwrap();

    let err = resolve_file_in_place(&TeraResolver, &ctx(), &path).unwrap_err();
    assert!(matches!(err, TemplateError::BinaryContent { .. }));
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[test]
fn latin1_file_with_markers_is_rejected_and_file_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.properties");
    let original = b"name=Caf\xE9\nregion={{region}}\n".to_vec();
    std::fs::write(&path, &original).unwrap();

    let err = resolve_file_in_place(&TeraResolver, &ctx(), &path).unwrap_err();
    assert!(matches!(err, TemplateError::NonUtf8 { .. }));
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[rstest]
#[case("name={{gatewayName}}", "name=gw-blue")]
#[case("region={{region}}", "region=us-east")]
#[case("site={{labels.site}}", "site=plant-7")]
#[case("at {{ref}}@{{commit}}", "at main@abc123")]
#[case("{% if region == \"us-east\" %}east{% endif %}", "east")]
fn markers_are_resolved_in_place(#[case] input: &str, #[case] expected: &str) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.conf");
    std::fs::write(&path, input).unwrap();

    let rewritten = resolve_file_in_place(&TeraResolver, &ctx(), &path).unwrap();
    assert!(rewritten);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), expected);
}

#[test]
fn missing_key_in_file_fails_closed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.conf");
    std::fs::write(&path, "zone={{zone}}").unwrap();

    let err = resolve_file_in_place(&TeraResolver, &ctx(), &path).unwrap_err();
    assert!(matches!(err, TemplateError::Resolve { .. }));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "zone={{zone}}");
}

#[test]
fn missing_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nope.conf");
    match resolve_file_in_place(&TeraResolver, &ctx(), &path).unwrap_err() {
        TemplateError::Io { path: p, .. } => assert_eq!(p, path),
        other => panic!("expected io error, got {other:?}"),
    }
}
