use super::*;

#[test]
fn document_id_is_stable() {
    let first = Document::new("notes.txt", "Cells divide.", Metadata::new());
    let second = Document::new("notes.txt", "Cells divide.", Metadata::new());
    assert_eq!(first.id, second.id);
    assert!(first.id.starts_with("doc-"));
    assert_eq!(first.id.len(), "doc-".len() + 16);
}

#[test]
fn document_id_depends_on_source_and_text() {
    let base = Document::new("a.txt", "same text", Metadata::new());
    let other_source = Document::new("b.txt", "same text", Metadata::new());
    let other_text = Document::new("a.txt", "other text", Metadata::new());
    assert_ne!(base.id, other_source.id);
    assert_ne!(base.id, other_text.id);
}

#[test]
fn content_hash_is_hex_sha256() {
    let hash = content_hash("abc");
    assert_eq!(
        hash,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn chunk_source_falls_back_to_document_id() {
    let mut chunk = Chunk {
        id: "doc-1-0".to_string(),
        document_id: "doc-1".to_string(),
        text: "text".to_string(),
        position: 0,
        metadata: Metadata::new(),
        embedding: None,
    };
    assert_eq!(chunk.source(), "doc-1");

    chunk
        .metadata
        .insert("source".to_string(), "biology.pdf".to_string());
    assert_eq!(chunk.source(), "biology.pdf");
}

#[test]
fn char_len_counts_unicode_scalars() {
    let doc = Document::new("x", "héllo", Metadata::new());
    assert_eq!(doc.char_len(), 5);
}

#[test]
fn page_lookup_by_offset() {
    let doc = Document::new("deck.pdf", "first\n\nthird", Metadata::new()).with_pages(vec![
        PageMark { offset: 0, number: 1 },
        PageMark { offset: 7, number: 3 },
    ]);

    assert_eq!(doc.page_at(0), Some(1));
    assert_eq!(doc.page_at(6), Some(1));
    assert_eq!(doc.page_at(7), Some(3));
    assert_eq!(doc.page_at(100), Some(3));
    assert_eq!(Document::new("a.txt", "text", Metadata::new()).page_at(0), None);
}

#[test]
fn chunk_page_number_reads_metadata() {
    let mut metadata = Metadata::new();
    metadata.insert("page_number".to_string(), "4".to_string());
    let chunk = Chunk {
        id: "doc-1-0".to_string(),
        document_id: "doc-1".to_string(),
        text: "text".to_string(),
        position: 0,
        metadata,
        embedding: None,
    };
    assert_eq!(chunk.page_number(), Some(4));
}
