use super::*;

#[test]
fn test_converts_headings_and_paragraphs() {
    let markdown = HtmdConverter::default()
        .convert("<html><head><title>T</title></head><body><h1>Lamp</h1><p>Warm light.</p></body></html>")
        .unwrap();
    assert!(markdown.starts_with("# Lamp"));
    assert!(markdown.contains("Warm light."));
    assert!(!markdown.contains("T\n"));
}

#[test]
fn test_skips_scripts() {
    let markdown = HtmdConverter::default()
        .convert("<body><script>track()</script><p>Visible</p></body>")
        .unwrap();
    assert_eq!(markdown, "Visible");
}

#[test]
fn test_collapse_blank_lines() {
    assert_eq!(collapse_blank_lines("\n\na  \n\n\n\nb\n\n"), "a\n\nb");
}
