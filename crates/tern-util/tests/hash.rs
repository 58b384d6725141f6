use tern_util::hash::sha256_lines;

#[test]
fn test_sha256_lines_empty() {
    assert_eq!(
        sha256_lines(Vec::<String>::new()),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn test_sha256_lines_boundaries_matter() {
    assert_ne!(sha256_lines(["ab", "c"]), sha256_lines(["a", "bc"]));
}

#[test]
fn test_sha256_lines_deterministic() {
    assert_eq!(sha256_lines(["x>=1", "y"]), sha256_lines(["x>=1", "y"]));
}

#[test]
fn test_sha256_lines_order_matters() {
    assert_ne!(sha256_lines(["x", "y"]), sha256_lines(["y", "x"]));
}
