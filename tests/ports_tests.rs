use reach_scan_rs::ports::{load_ports_from_path, parse_port_expr, parse_ports_str};
use std::io::Write;

#[test]
fn parse_single_and_ranges_and_comments() {
    let input = r#"
        # common ports
        22
        80  # http
        443 # https
        8000-8002
        8001  # duplicate
        # blank line follows

    "#;

    let ports = parse_ports_str(input).expect("parse ok");
    // duplicates collapse, ascending
    assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![22, 80, 443, 8000, 8001, 8002]);
}

#[test]
fn invalid_port_rejected() {
    let input = "0\n"; // invalid: out of range
    assert!(parse_ports_str(input).is_err());
}

#[test]
fn cli_expressions() {
    assert_eq!(parse_port_expr("1-1024").unwrap().len(), 1024);
    assert_eq!(parse_port_expr("22,80,443").unwrap().to_string(), "22-443");
    assert_eq!(parse_port_expr("65535").unwrap().to_string(), "65535");
    assert!(parse_port_expr("1-65536").is_err());
}

#[test]
fn ports_file_becomes_sorted_range() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# web\n8443\n80\n20-22\n80").unwrap();

    let range = load_ports_from_path(file.path()).unwrap();
    assert_eq!(range.iter().collect::<Vec<_>>(), vec![20, 21, 22, 80, 8443]);
    assert_eq!(range.to_string(), "20-22,80,8443");
}

#[test]
fn empty_or_missing_ports_file_is_an_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    assert!(load_ports_from_path(file.path()).is_err());
    assert!(load_ports_from_path("/definitely/not/here/ports.txt").is_err());
}
