use super::*;

#[test]
fn test_document_id_valid() {
    let id = DocumentId::parse("notebook-42").unwrap();
    assert_eq!(id.as_str(), "notebook-42");
    assert_eq!(id.to_string(), "notebook-42");
}

#[test]
fn test_document_id_rejects_empty() {
    assert_eq!(DocumentId::parse(""), Err(IdError::Empty));
}

#[test]
fn test_document_id_rejects_uppercase() {
    assert!(matches!(
        DocumentId::parse("Notebook"),
        Err(IdError::InvalidCharacters(_))
    ));
}

#[test]
fn test_document_id_rejects_edge_dash() {
    assert!(matches!(
        DocumentId::parse("-abc"),
        Err(IdError::InvalidBoundary(_))
    ));
    assert!(matches!(
        DocumentId::parse("abc-"),
        Err(IdError::InvalidBoundary(_))
    ));
}

#[test]
fn test_document_id_length_limit() {
    let ok = "a".repeat(MAX_DOCUMENT_ID_LEN);
    assert!(DocumentId::parse(ok).is_ok());
    let long = "a".repeat(MAX_DOCUMENT_ID_LEN + 1);
    assert!(matches!(DocumentId::parse(long), Err(IdError::TooLong(_, _))));
}

#[test]
fn test_user_id_from_str() {
    let user: UserId = "alice".parse().unwrap();
    assert_eq!(user.as_str(), "alice");
}

#[test]
fn test_document_id_serde_validates() {
    let id: DocumentId = serde_json::from_str("\"doc-1\"").unwrap();
    assert_eq!(id.as_str(), "doc-1");

    let bad: Result<DocumentId, _> = serde_json::from_str("\"Doc 1\"");
    assert!(bad.is_err());
}

#[test]
fn test_kernel_kind_round_trip_names() {
    for kind in KernelKind::ALL {
        let parsed: KernelKind = kind.as_str().parse().unwrap();
        assert_eq!(parsed, kind);
    }
}

#[test]
fn test_kernel_kind_unknown() {
    assert_eq!(
        "cobol".parse::<KernelKind>(),
        Err(IdError::UnknownKernelKind("cobol".to_string()))
    );
}

#[test]
fn test_kernel_kind_execute_reply() {
    assert!(KernelKind::Python.emits_execute_reply());
    assert!(!KernelKind::Javascript.emits_execute_reply());
}

#[test]
fn test_kernel_key_display_and_suffix() {
    let key = KernelKey::new(DocumentId::parse("doc-1").unwrap(), KernelKind::Python);
    assert_eq!(key.to_string(), "doc-1/python");
    assert_eq!(key.resource_suffix(), "doc-1-python");
}

#[test]
fn test_kernel_kind_serde_lowercase() {
    let json = serde_json::to_string(&KernelKind::Julia).unwrap();
    assert_eq!(json, "\"julia\"");
}
